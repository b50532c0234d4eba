// crates/af_physics/src/numerics/linear_algebra/vector_ops.rs

//! 向量运算（BLAS Level 1 风格）
//!
//! 迭代求解器的基础运算。点积与范数是归约操作：按块并行、
//! 块内 Kahan 补偿求和，结果对求和顺序的敏感度控制在
//! 测试容差允许的范围内。其余运算为逐元素循环。

use af_runtime::{KahanSum, SolverScalar};
use rayon::prelude::*;

/// 并行归约的分块长度
const REDUCE_CHUNK: usize = 1024;

/// 点积 x·y（并行 + 补偿求和）
#[inline]
pub fn dot<S: SolverScalar>(x: &[S], y: &[S]) -> S {
    debug_assert_eq!(x.len(), y.len(), "向量维度不匹配");
    x.par_chunks(REDUCE_CHUNK)
        .zip(y.par_chunks(REDUCE_CHUNK))
        .fold(KahanSum::new, |mut acc, (xc, yc)| {
            for (&a, &b) in xc.iter().zip(yc) {
                acc.add(a * b);
            }
            acc
        })
        .reduce(KahanSum::new, KahanSum::merge)
        .value()
}

/// 二范数 ||x||₂
#[inline]
pub fn norm2<S: SolverScalar>(x: &[S]) -> S {
    dot(x, x).sqrt()
}

/// AXPY: y = α·x + y
#[inline]
pub fn axpy<S: SolverScalar>(alpha: S, x: &[S], y: &mut [S]) {
    debug_assert_eq!(x.len(), y.len(), "向量维度不匹配");
    for (yi, &xi) in y.iter_mut().zip(x.iter()) {
        *yi += alpha * xi;
    }
}

/// 缩放: x = α·x
#[inline]
pub fn scale<S: SolverScalar>(alpha: S, x: &mut [S]) {
    for xi in x.iter_mut() {
        *xi *= alpha;
    }
}

/// 复制: y = x
#[inline]
pub fn copy<S: SolverScalar>(x: &[S], y: &mut [S]) {
    debug_assert_eq!(x.len(), y.len(), "向量维度不匹配");
    y.copy_from_slice(x);
}

/// 残差: r = b - ax，其中 ax 已算好
#[inline]
pub fn residual_from<S: SolverScalar>(b: &[S], ax: &[S], r: &mut [S]) {
    debug_assert_eq!(b.len(), ax.len());
    debug_assert_eq!(b.len(), r.len());
    for ((ri, &bi), &axi) in r.iter_mut().zip(b.iter()).zip(ax.iter()) {
        *ri = bi - axi;
    }
}

/// 线性组合: z = α·x + β·y
#[inline]
pub fn linear_combination<S: SolverScalar>(alpha: S, x: &[S], beta: S, y: &[S], z: &mut [S]) {
    debug_assert_eq!(x.len(), y.len());
    debug_assert_eq!(x.len(), z.len());
    for ((zi, &xi), &yi) in z.iter_mut().zip(x.iter()).zip(y.iter()) {
        *zi = alpha * xi + beta * yi;
    }
}
