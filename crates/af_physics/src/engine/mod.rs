// crates/af_physics/src/engine/mod.rs

//! 伪时间推进引擎
//!
//! 三个驱动器把空间残差算子推进到定常或给定物理时刻：
//! - [`SteadyForwardEuler`]: 局部时间步前向欧拉松弛
//! - [`SteadyBackwardEuler`]: 带 CFL 坡道的后向欧拉伪时间法，
//!   内层为预条件 Krylov 求解
//! - [`TvdRkSolver`]: TVD Runge-Kutta 全局时间步积分

pub mod config;
pub mod report;
pub mod steady;
pub mod unsteady;

pub use config::SteadySolverConfig;
pub use report::{SolveReport, SolveStatus, UnsteadyReport};
pub use steady::{SteadyBackwardEuler, SteadyForwardEuler};
pub use unsteady::TvdRkSolver;

// 记号类型与引擎配置同处使用，重导出
pub use crate::numerics::linear_algebra::preconditioner::PreconditionerKind;
pub use crate::numerics::linear_algebra::solver::LinearSolverKind;
