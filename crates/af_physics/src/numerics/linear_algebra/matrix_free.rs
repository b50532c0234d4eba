// crates/af_physics/src/numerics/linear_algebra/matrix_free.rs

//! 有限差分无矩阵算子
//!
//! 遗留路径：不装配雅可比，直接用残差的方向差分近似其作用
//!
//! ```text
//! M·v ≈ (R(U + ε·v) − R(U)) / ε
//! ```
//!
//! 以 [`LinearOperator`] 的形式接入同一套 Krylov 求解器。差分步长
//! ε 可配置，默认取 sqrt(机器精度) 并按基态范数缩放。此路径下
//! 预条件只能用不依赖装配矩阵的变体：恒等，或由伪时间对角项
//! 构造的 [`DiagonalPreconditioner`]。

use af_runtime::{AfError, AfResult, SolverScalar};
use parking_lot::Mutex;
use rayon::prelude::*;

use super::block::{self, Block};
use super::preconditioner::PrecApply;
use super::solver::LinearOperator;
use super::vector_ops::norm2;
use crate::spatial::SpatialScheme;
use crate::state::CellField;

/// 差分计算的临时缓冲
struct Scratch<S: SolverScalar, const V: usize> {
    u_pert: CellField<S, V>,
    r_pert: CellField<S, V>,
}

/// 有限差分雅可比作用算子
pub struct FiniteDifferenceOperator<'a, S: SolverScalar, const V: usize, Sp: SpatialScheme<S, V>> {
    spatial: &'a Sp,
    base_u: CellField<S, V>,
    base_residual: CellField<S, V>,
    epsilon: S,
    scratch: Mutex<Scratch<S, V>>,
}

impl<'a, S: SolverScalar, const V: usize, Sp: SpatialScheme<S, V>>
    FiniteDifferenceOperator<'a, S, V, Sp>
{
    /// 在基态 u 处线性化
    ///
    /// 基态与基态残差被拷贝一次，之后 apply 只做扰动评估。
    pub fn new(spatial: &'a Sp, u: &CellField<S, V>) -> AfResult<Self> {
        let mut base_residual = CellField::new(u.n_cells());
        spatial.compute_residual(u, &mut base_residual, None)?;

        let eps = S::EPSILON.sqrt() * (S::ONE + norm2(u.as_slice()));

        Ok(Self {
            spatial,
            base_u: u.clone(),
            base_residual,
            epsilon: eps,
            scratch: Mutex::new(Scratch {
                u_pert: CellField::new(u.n_cells()),
                r_pert: CellField::new(u.n_cells()),
            }),
        })
    }

    /// 覆盖差分步长
    pub fn with_epsilon(mut self, epsilon: S) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// 当前差分步长
    pub fn epsilon(&self) -> S {
        self.epsilon
    }
}

impl<S: SolverScalar, const V: usize, Sp: SpatialScheme<S, V>> LinearOperator<S>
    for FiniteDifferenceOperator<'_, S, V, Sp>
{
    fn n_rows(&self) -> usize {
        self.base_u.len()
    }

    fn apply(&self, x: &[S], y: &mut [S]) {
        let mut scratch = self.scratch.lock();
        let Scratch { u_pert, r_pert } = &mut *scratch;
        let eps = self.epsilon;

        u_pert
            .as_mut_slice()
            .par_iter_mut()
            .zip(self.base_u.as_slice().par_iter())
            .zip(x.par_iter())
            .for_each(|((up, &ub), &xi)| *up = ub + eps * xi);

        r_pert.reset();
        if let Err(err) = self.spatial.compute_residual(u_pert, r_pert, None) {
            // LinearOperator::apply 无错误通道；以 NaN 浮出，
            // 驱动器在残差检验处按数值错误处理
            log::error!("有限差分算子残差评估失败: {}", err);
            y.fill(S::nan());
            return;
        }

        let inv_eps = S::ONE / eps;
        y.par_iter_mut()
            .zip(r_pert.as_slice().par_iter())
            .zip(self.base_residual.as_slice().par_iter())
            .for_each(|((yi, &rp), &rb)| *yi = (rp - rb) * inv_eps);
    }
}

// ============================================================================
// 对角近似预条件器
// ============================================================================

/// 块对角近似预条件器
///
/// 无矩阵路径下由外部提供的对角块（通常是伪时间项
/// area/(CFL·Δt)·I）构造。
#[derive(Debug, Clone)]
pub struct DiagonalPreconditioner<S: SolverScalar, const V: usize> {
    inv_diag: Vec<Block<S, V>>,
}

impl<S: SolverScalar, const V: usize> DiagonalPreconditioner<S, V> {
    /// 由对角块构造（取逆），奇异块返回 [`AfError::Numerical`]
    pub fn from_blocks(blocks: &[Block<S, V>]) -> AfResult<Self> {
        let mut inv_diag = Vec::with_capacity(blocks.len());
        for (i, b) in blocks.iter().enumerate() {
            inv_diag.push(block::invert(b).ok_or_else(|| {
                AfError::numerical(format!("对角近似: 第 {} 行对角块奇异", i))
            })?);
        }
        Ok(Self { inv_diag })
    }

    /// 由伪时间项构造: diag(i) = area[i]/(cfl·dt[i])·I
    pub fn from_pseudo_time(areas: &[S], dt: &[S], cfl: S) -> Self {
        let inv_diag = areas
            .iter()
            .zip(dt.iter())
            .map(|(&a, &dti)| block::identity_scaled(cfl * dti / a))
            .collect();
        Self { inv_diag }
    }
}

impl<S: SolverScalar, const V: usize> PrecApply<S> for DiagonalPreconditioner<S, V> {
    fn apply(&self, r: &[S], z: &mut [S]) {
        debug_assert_eq!(r.len(), self.inv_diag.len() * V);
        let inv_diag = &self.inv_diag;
        z.par_chunks_exact_mut(V).enumerate().for_each(|(i, zi)| {
            block::mat_vec(&inv_diag[i], &r[i * V..(i + 1) * V], zi);
        });
    }
}
