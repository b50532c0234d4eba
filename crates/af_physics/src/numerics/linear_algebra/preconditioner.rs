// crates/af_physics/src/numerics/linear_algebra/preconditioner.rs

//! 预条件器
//!
//! 内层 Krylov 求解的预条件: z ≈ M⁻¹ r。提供四种：
//!
//! - [`NoPrec`]: 恒等，z = r
//! - [`BlockJacobi`]: 块对角缩放，完全并行
//! - [`SgsPreconditioner`]: 对称 Gauss-Seidel，z = (D+U)⁻¹ D (D+L)⁻¹ r，
//!   扫掠在行序上严格串行
//! - [`BlockIlu0`]: 与矩阵同模式的不完全块 LU 分解，因子存放在
//!   独立的兄弟缓冲区中
//!
//! 两层 trait：[`PrecApply`] 是求解器消费的切片级 apply 接口；
//! [`Preconditioner`] 附加 `setup`，在每个伪时间步雅可比重装配后
//! 调用一次。`setup` 在 ILU(0) 主元块奇异到工作精度时返回
//! [`AfError::Numerical`]。

use std::str::FromStr;

use af_runtime::{AfError, AfResult, SolverScalar};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::block::{self, Block};
use super::bsr::BsrMatrix;

// ============================================================================
// Trait
// ============================================================================

/// 切片级预条件应用接口（迭代求解器消费）
pub trait PrecApply<S: SolverScalar>: Send + Sync {
    /// 应用预条件: z = M⁻¹ r
    fn apply(&self, r: &[S], z: &mut [S]);
}

/// 完整预条件器：矩阵重装配后 setup 一次，Krylov 循环内反复 apply
pub trait Preconditioner<S: SolverScalar, const V: usize>: PrecApply<S> {
    /// 由当前矩阵重建内部因子
    fn setup(&mut self, m: &BsrMatrix<S, V>) -> AfResult<()>;

    /// 预条件器名称
    fn name(&self) -> &'static str;
}

// ============================================================================
// 记号
// ============================================================================

/// 预条件器种类（配置记号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreconditionerKind {
    /// 不做预条件
    #[serde(rename = "NONE")]
    None,
    /// 块 Jacobi
    #[default]
    #[serde(rename = "J")]
    Jacobi,
    /// 对称 Gauss-Seidel
    #[serde(rename = "SGS")]
    Sgs,
    /// 块 ILU(0)
    #[serde(rename = "ILU0")]
    Ilu0,
}

impl FromStr for PreconditionerKind {
    type Err = AfError;

    fn from_str(s: &str) -> AfResult<Self> {
        match s {
            "NONE" => Ok(Self::None),
            "J" => Ok(Self::Jacobi),
            "SGS" => Ok(Self::Sgs),
            "ILU0" => Ok(Self::Ilu0),
            other => Err(AfError::config(format!("未知的预条件器记号 '{}'", other))),
        }
    }
}

impl std::fmt::Display for PreconditionerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Jacobi => write!(f, "J"),
            Self::Sgs => write!(f, "SGS"),
            Self::Ilu0 => write!(f, "ILU0"),
        }
    }
}

// ============================================================================
// 恒等预条件器
// ============================================================================

/// 恒等预条件器: z = r
#[derive(Debug, Clone, Default)]
pub struct NoPrec;

impl<S: SolverScalar> PrecApply<S> for NoPrec {
    fn apply(&self, r: &[S], z: &mut [S]) {
        z.copy_from_slice(r);
    }
}

impl<S: SolverScalar, const V: usize> Preconditioner<S, V> for NoPrec {
    fn setup(&mut self, _m: &BsrMatrix<S, V>) -> AfResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "NONE"
    }
}

// ============================================================================
// 块 Jacobi
// ============================================================================

/// 块 Jacobi 预条件器
///
/// setup 缓存每个对角块的逆；apply 逐单元独立，完全并行。
#[derive(Debug, Clone, Default)]
pub struct BlockJacobi<S: SolverScalar, const V: usize> {
    inv_diag: Vec<Block<S, V>>,
}

impl<S: SolverScalar, const V: usize> BlockJacobi<S, V> {
    /// 创建空的预条件器，首次 setup 时定型
    pub fn new() -> Self {
        Self { inv_diag: Vec::new() }
    }
}

impl<S: SolverScalar, const V: usize> PrecApply<S> for BlockJacobi<S, V> {
    fn apply(&self, r: &[S], z: &mut [S]) {
        debug_assert_eq!(r.len(), self.inv_diag.len() * V);
        let inv_diag = &self.inv_diag;
        z.par_chunks_exact_mut(V).enumerate().for_each(|(i, zi)| {
            block::mat_vec(&inv_diag[i], &r[i * V..(i + 1) * V], zi);
        });
    }
}

impl<S: SolverScalar, const V: usize> Preconditioner<S, V> for BlockJacobi<S, V> {
    fn setup(&mut self, m: &BsrMatrix<S, V>) -> AfResult<()> {
        assert!(m.is_frozen(), "预条件器 setup 要求已冻结的矩阵");
        let n = m.n_block_rows();
        self.inv_diag.resize(n, block::zero());
        for i in 0..n {
            self.inv_diag[i] = block::invert(m.diag_block(i))
                .ok_or_else(|| AfError::numerical(format!("Jacobi: 第 {} 行对角块奇异", i)))?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "J"
    }
}

// ============================================================================
// 对称 Gauss-Seidel
// ============================================================================

/// 对称 Gauss-Seidel 预条件器
///
/// z = (D+U)⁻¹ D (D+L)⁻¹ r。前向扫掠依赖 j<i 的新值、后向扫掠
/// 依赖 j>i 的新值，基线实现按行序串行执行。
/// setup 复制矩阵值到本地缓冲并缓存 D⁻¹。
#[derive(Debug, Clone, Default)]
pub struct SgsPreconditioner<S: SolverScalar, const V: usize> {
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    diag_idx: Vec<usize>,
    values: Vec<Block<S, V>>,
    inv_diag: Vec<Block<S, V>>,
}

impl<S: SolverScalar, const V: usize> SgsPreconditioner<S, V> {
    /// 创建空的预条件器
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: SolverScalar, const V: usize> PrecApply<S> for SgsPreconditioner<S, V> {
    fn apply(&self, r: &[S], z: &mut [S]) {
        let n = self.diag_idx.len();
        debug_assert_eq!(r.len(), n * V);

        // 前向: (D+L) y = r，y 暂存于 z
        for i in 0..n {
            let mut tmp = [S::ZERO; V];
            tmp.copy_from_slice(&r[i * V..(i + 1) * V]);
            for idx in self.row_ptr[i]..self.diag_idx[i] {
                let col = self.col_idx[idx];
                block::mat_vec_sub(&self.values[idx], &z[col * V..(col + 1) * V], &mut tmp);
            }
            block::mat_vec(&self.inv_diag[i], &tmp, &mut z[i * V..(i + 1) * V]);
        }

        // 后向: (D+U) z = D y
        for i in (0..n).rev() {
            let mut tmp = [S::ZERO; V];
            block::mat_vec(&self.values[self.diag_idx[i]], &z[i * V..(i + 1) * V], &mut tmp);
            for idx in (self.diag_idx[i] + 1)..self.row_ptr[i + 1] {
                let col = self.col_idx[idx];
                block::mat_vec_sub(&self.values[idx], &z[col * V..(col + 1) * V], &mut tmp);
            }
            block::mat_vec(&self.inv_diag[i], &tmp, &mut z[i * V..(i + 1) * V]);
        }
    }
}

impl<S: SolverScalar, const V: usize> Preconditioner<S, V> for SgsPreconditioner<S, V> {
    fn setup(&mut self, m: &BsrMatrix<S, V>) -> AfResult<()> {
        assert!(m.is_frozen(), "预条件器 setup 要求已冻结的矩阵");
        if self.row_ptr.len() != m.row_ptr().len() {
            self.row_ptr = m.row_ptr().to_vec();
            self.col_idx = m.col_idx().to_vec();
            self.diag_idx = m.diag_idx().to_vec();
        }
        self.values.clear();
        self.values.extend_from_slice(m.values());

        let n = m.n_block_rows();
        self.inv_diag.resize(n, block::zero());
        for i in 0..n {
            self.inv_diag[i] = block::invert(m.diag_block(i))
                .ok_or_else(|| AfError::numerical(format!("SGS: 第 {} 行对角块奇异", i)))?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SGS"
    }
}

// ============================================================================
// 块 ILU(0)
// ============================================================================

/// 块 ILU(0) 预条件器
///
/// 与矩阵相同稀疏模式的不完全 LU 分解，因子存放在独立的值缓冲
/// 中（L 单位下三角，U 含主元）。apply 执行前向/后向块三角求解。
#[derive(Debug, Clone, Default)]
pub struct BlockIlu0<S: SolverScalar, const V: usize> {
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    diag_idx: Vec<usize>,
    /// 分解后的因子（兄弟缓冲，覆盖式存放 L 与 U）
    lu: Vec<Block<S, V>>,
    /// 主元块 U_ii 的逆
    inv_diag: Vec<Block<S, V>>,
}

impl<S: SolverScalar, const V: usize> BlockIlu0<S, V> {
    /// 创建空的预条件器
    pub fn new() -> Self {
        Self::default()
    }

    /// 行 k 中列 j 的因子索引
    #[inline]
    fn find_in_row(&self, k: usize, j: usize) -> Option<usize> {
        let start = self.row_ptr[k];
        let end = self.row_ptr[k + 1];
        match self.col_idx[start..end].binary_search(&j) {
            Ok(local) => Some(start + local),
            Err(_) => None,
        }
    }
}

impl<S: SolverScalar, const V: usize> PrecApply<S> for BlockIlu0<S, V> {
    fn apply(&self, r: &[S], z: &mut [S]) {
        let n = self.diag_idx.len();
        debug_assert_eq!(r.len(), n * V);

        // 前向: L w = r（L 单位下三角），w 暂存于 z
        for i in 0..n {
            let mut tmp = [S::ZERO; V];
            tmp.copy_from_slice(&r[i * V..(i + 1) * V]);
            for idx in self.row_ptr[i]..self.diag_idx[i] {
                let col = self.col_idx[idx];
                block::mat_vec_sub(&self.lu[idx], &z[col * V..(col + 1) * V], &mut tmp);
            }
            z[i * V..(i + 1) * V].copy_from_slice(&tmp);
        }

        // 后向: U z = w
        for i in (0..n).rev() {
            let mut tmp = [S::ZERO; V];
            tmp.copy_from_slice(&z[i * V..(i + 1) * V]);
            for idx in (self.diag_idx[i] + 1)..self.row_ptr[i + 1] {
                let col = self.col_idx[idx];
                block::mat_vec_sub(&self.lu[idx], &z[col * V..(col + 1) * V], &mut tmp);
            }
            block::mat_vec(&self.inv_diag[i], &tmp, &mut z[i * V..(i + 1) * V]);
        }
    }
}

impl<S: SolverScalar, const V: usize> Preconditioner<S, V> for BlockIlu0<S, V> {
    fn setup(&mut self, m: &BsrMatrix<S, V>) -> AfResult<()> {
        assert!(m.is_frozen(), "预条件器 setup 要求已冻结的矩阵");
        if self.row_ptr.len() != m.row_ptr().len() {
            self.row_ptr = m.row_ptr().to_vec();
            self.col_idx = m.col_idx().to_vec();
            self.diag_idx = m.diag_idx().to_vec();
        }
        self.lu.clear();
        self.lu.extend_from_slice(m.values());

        let n = m.n_block_rows();
        self.inv_diag.resize(n, block::zero());

        // IKJ 形式的块 ILU(0)：只在既有模式内更新
        for i in 0..n {
            let row_start = self.row_ptr[i];
            let row_end = self.row_ptr[i + 1];
            let di = self.diag_idx[i];

            for kk in row_start..di {
                let k = self.col_idx[kk];
                // L_ik = A_ik · U_kk⁻¹
                self.lu[kk] = block::mul(&self.lu[kk], &self.inv_diag[k]);
                let lik = self.lu[kk];

                // 消去行 i 中 k 之后的列（列序有序，j > k）
                for jj in (kk + 1)..row_end {
                    let j = self.col_idx[jj];
                    if let Some(kj) = self.find_in_row(k, j) {
                        let update = block::mul(&lik, &self.lu[kj]);
                        block::sub_assign(&mut self.lu[jj], &update);
                    }
                }
            }

            self.inv_diag[i] = block::invert(&self.lu[di]).ok_or_else(|| {
                AfError::numerical(format!("ILU(0): 第 {} 行主元块奇异", i))
            })?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ILU0"
    }
}

// ============================================================================
// 枚举分发
// ============================================================================

/// 预条件器枚举包装 - 替代 Box<dyn Preconditioner>
///
/// 驱动器按配置记号持有具体变体，避免 trait 对象上行转换。
#[derive(Debug, Clone)]
pub enum AnyPreconditioner<S: SolverScalar, const V: usize> {
    /// 恒等
    None(NoPrec),
    /// 块 Jacobi
    Jacobi(BlockJacobi<S, V>),
    /// 对称 Gauss-Seidel
    Sgs(SgsPreconditioner<S, V>),
    /// 块 ILU(0)
    Ilu0(BlockIlu0<S, V>),
}

impl<S: SolverScalar, const V: usize> AnyPreconditioner<S, V> {
    /// 按配置记号创建
    pub fn from_kind(kind: PreconditionerKind) -> Self {
        match kind {
            PreconditionerKind::None => Self::None(NoPrec),
            PreconditionerKind::Jacobi => Self::Jacobi(BlockJacobi::new()),
            PreconditionerKind::Sgs => Self::Sgs(SgsPreconditioner::new()),
            PreconditionerKind::Ilu0 => Self::Ilu0(BlockIlu0::new()),
        }
    }

    /// 由当前矩阵重建内部因子
    pub fn setup(&mut self, m: &BsrMatrix<S, V>) -> AfResult<()> {
        match self {
            Self::None(p) => Preconditioner::<S, V>::setup(p, m),
            Self::Jacobi(p) => p.setup(m),
            Self::Sgs(p) => p.setup(m),
            Self::Ilu0(p) => p.setup(m),
        }
    }

    /// 预条件器名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::None(_) => "NONE",
            Self::Jacobi(_) => "J",
            Self::Sgs(_) => "SGS",
            Self::Ilu0(_) => "ILU0",
        }
    }
}

impl<S: SolverScalar, const V: usize> PrecApply<S> for AnyPreconditioner<S, V> {
    fn apply(&self, r: &[S], z: &mut [S]) {
        match self {
            Self::None(p) => PrecApply::<S>::apply(p, r, z),
            Self::Jacobi(p) => p.apply(r, z),
            Self::Sgs(p) => p.apply(r, z),
            Self::Ilu0(p) => p.apply(r, z),
        }
    }
}
