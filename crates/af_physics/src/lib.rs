// crates/af_physics/src/lib.rs

//! AeroFlow 求解器核心
//!
//! 有限体积 2D 可压缩流求解器的伪时间 ODE 积分层，包括：
//! - 状态与残差的稠密单元场 (state)
//! - 网格与空间离散的窄接口 (mesh / spatial)
//! - 块稀疏线性代数：BSR 矩阵、预条件器、Krylov 求解器 (numerics)
//! - 伪时间推进驱动器 (engine) - 显式松弛、隐式后向欧拉、TVD-RK
//!
//! 网格拓扑、空间离散与通量函数由外部通过 [`Mesh`] 与
//! [`SpatialScheme`] 提供；本 crate 只做时间推进与线性求解。

pub mod engine;
pub mod mesh;
pub mod numerics;
pub mod spatial;
pub mod state;

// 重导出常用类型
pub use af_runtime::{AfError, AfResult, SolverScalar};
pub use engine::{
    LinearSolverKind, PreconditionerKind, SolveReport, SolveStatus, SteadyBackwardEuler,
    SteadyForwardEuler, SteadySolverConfig, TvdRkSolver, UnsteadyReport,
};
pub use mesh::{Mesh, UniformMesh};
pub use numerics::linear_algebra::{
    AnyKrylovSolver, AnyPreconditioner, BiCgStabSolver, BlockIlu0, BlockJacobi, BsrMatrix,
    DiagonalPreconditioner, FiniteDifferenceOperator, GmresSolver, KrylovSolver, LinSolveResult,
    LinearOperator, NoPrec, PrecApply, Preconditioner, RichardsonSolver, SgsPreconditioner,
};
pub use spatial::SpatialScheme;
pub use state::CellField;
