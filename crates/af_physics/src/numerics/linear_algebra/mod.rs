// crates/af_physics/src/numerics/linear_algebra/mod.rs

//! 块稀疏线性代数
//!
//! 隐式伪时间步的内层线性求解栈：
//! - [`block`]: 稠密 V×V 块运算
//! - [`bsr`]: 固定模式块 CSR 矩阵
//! - [`vector_ops`]: BLAS Level 1 风格向量运算与并行归约
//! - [`preconditioner`]: None / 块 Jacobi / SGS / 块 ILU(0)
//! - [`solver`]: Richardson / BiCGStab / 重启 GMRES
//! - [`matrix_free`]: 有限差分无矩阵算子

pub mod block;
pub mod bsr;
pub mod matrix_free;
pub mod preconditioner;
pub mod solver;
pub mod vector_ops;

pub use bsr::BsrMatrix;
pub use matrix_free::{DiagonalPreconditioner, FiniteDifferenceOperator};
pub use preconditioner::{
    AnyPreconditioner, BlockIlu0, BlockJacobi, NoPrec, PrecApply, Preconditioner,
    SgsPreconditioner,
};
pub use solver::{
    AnyKrylovSolver, BiCgStabSolver, GmresSolver, KrylovSolver, LinSolveResult, LinearOperator,
    RichardsonSolver,
};
