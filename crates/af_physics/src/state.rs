// crates/af_physics/src/state.rs

//! 单元场：守恒变量的稠密存储
//!
//! [`CellField<S, V>`] 是 N×V 行主序稠密数组，每个单元存 V 个
//! 守恒变量（V=1 标量方程，V=4 二维 Euler/NS）。状态向量 `U`
//! 由调用方持有并借给驱动器就地修改；残差 `R` 与修正量 `δU`
//! 由驱动器持有，形状相同。
//!
//! 块大小 V 是常量泛型参数：逐单元的块 axpy / 块求逆是唯一
//! 受益于编译期 V 的热循环，单态化后无运行时开销。

use std::ops::{Index, IndexMut};

use af_runtime::SolverScalar;
use rayon::prelude::*;

/// N×V 行主序单元场
#[derive(Debug, Clone)]
pub struct CellField<S: SolverScalar, const V: usize> {
    data: Vec<S>,
    n_cells: usize,
}

impl<S: SolverScalar, const V: usize> CellField<S, V> {
    /// 创建全零场
    pub fn new(n_cells: usize) -> Self {
        Self {
            data: vec![S::ZERO; n_cells * V],
            n_cells,
        }
    }

    /// 按 (单元, 变量) 初始化
    pub fn from_fn(n_cells: usize, f: impl Fn(usize, usize) -> S) -> Self {
        let mut field = Self::new(n_cells);
        for i in 0..n_cells {
            for v in 0..V {
                field.data[i * V + v] = f(i, v);
            }
        }
        field
    }

    /// 单元数
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// 每单元变量数
    #[inline]
    pub const fn n_vars(&self) -> usize {
        V
    }

    /// 展平后的总长度 N*V
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 第 i 个单元的变量切片
    #[inline]
    pub fn row(&self, i: usize) -> &[S] {
        &self.data[i * V..(i + 1) * V]
    }

    /// 第 i 个单元的可变变量切片
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [S] {
        &mut self.data[i * V..(i + 1) * V]
    }

    /// 展平只读视图（行主序）
    #[inline]
    pub fn as_slice(&self) -> &[S] {
        &self.data
    }

    /// 展平可变视图
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [S] {
        &mut self.data
    }

    /// 全场清零（保持形状）
    #[inline]
    pub fn reset(&mut self) {
        self.data.fill(S::ZERO);
    }

    /// 从另一个场复制（形状必须一致）
    pub fn copy_from(&mut self, other: &Self) {
        debug_assert_eq!(self.n_cells, other.n_cells);
        self.data.copy_from_slice(&other.data);
    }

    /// 就地累加: self += other，按单元并行
    pub fn add_assign_field(&mut self, other: &Self) {
        debug_assert_eq!(self.n_cells, other.n_cells);
        self.data
            .par_chunks_exact_mut(V)
            .zip(other.data.par_chunks_exact(V))
            .for_each(|(a, b)| {
                for v in 0..V {
                    a[v] += b[v];
                }
            });
    }

    /// 串行单元行迭代
    pub fn rows(&self) -> std::slice::ChunksExact<'_, S> {
        self.data.chunks_exact(V)
    }

    /// 并行单元行迭代
    pub fn par_rows(&self) -> rayon::slice::ChunksExact<'_, S> {
        self.data.par_chunks_exact(V)
    }

    /// 并行可变单元行迭代
    pub fn par_rows_mut(&mut self) -> rayon::slice::ChunksExactMut<'_, S> {
        self.data.par_chunks_exact_mut(V)
    }

    /// 所有值是否有限
    pub fn is_finite(&self) -> bool {
        S::validate_slice(&self.data).is_ok()
    }
}

impl<S: SolverScalar, const V: usize> Index<(usize, usize)> for CellField<S, V> {
    type Output = S;

    #[inline]
    fn index(&self, (i, v): (usize, usize)) -> &S {
        &self.data[i * V + v]
    }
}

impl<S: SolverScalar, const V: usize> IndexMut<(usize, usize)> for CellField<S, V> {
    #[inline]
    fn index_mut(&mut self, (i, v): (usize, usize)) -> &mut S {
        &mut self.data[i * V + v]
    }
}
