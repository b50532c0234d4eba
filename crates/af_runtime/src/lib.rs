// crates/af_runtime/src/lib.rs

//! AeroFlow 数值运行时
//!
//! 为求解器各层提供与物理无关的基础设施：
//! - [`SolverScalar`]: 密封的标量抽象，支持 f32/f64 零成本切换
//! - [`AfError`] / [`AfResult`]: 统一错误类型
//! - [`KahanSum`]: 补偿求和，用于数值稳定的并行归约

pub mod error;
pub mod kahan;
pub mod scalar;

pub use error::{AfError, AfResult};
pub use kahan::KahanSum;
pub use scalar::SolverScalar;
