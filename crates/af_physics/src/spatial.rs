// crates/af_physics/src/spatial.rs

//! 空间离散接口
//!
//! 驱动器通过本接口向空间离散索取逐单元残差、局部时间步与
//! 雅可比矩阵。残差约定为空间散度项 R，使得半离散方程为
//!
//! ```text
//! dU_i/dt = -R_i(U) / area_i
//! ```
//!
//! 隐式驱动器在此约定下求解 (D_τ + ∂R/∂U) δU = -R 并做 U += δU，
//! 其中 D_τ 是伪时间对角项。`compute_jacobian` 因此填入 ∂R/∂U
//! 本身，不带符号翻转。

use af_runtime::{AfResult, SolverScalar};

use crate::mesh::Mesh;
use crate::numerics::linear_algebra::BsrMatrix;
use crate::state::CellField;

/// 空间离散算子
pub trait SpatialScheme<S: SolverScalar, const V: usize>: Send + Sync {
    /// 网格类型
    type M: Mesh<S>;

    /// 所属网格
    fn mesh(&self) -> &Self::M;

    /// 计算逐单元残差
    ///
    /// # 参数
    /// - `u`: 当前状态
    /// - `residual`: 输出残差（调用前已被驱动器清零）
    /// - `dt`: 若为 Some，同时填入每单元的稳定局部时间步
    fn compute_residual(
        &self,
        u: &CellField<S, V>,
        residual: &mut CellField<S, V>,
        dt: Option<&mut [S]>,
    ) -> AfResult<()>;

    /// 计算残差雅可比 ∂R/∂U 的块条目
    ///
    /// 模式冻结后不得引入新的非零块位置。
    fn compute_jacobian(&self, u: &CellField<S, V>, mat: &mut BsrMatrix<S, V>) -> AfResult<()>;
}
