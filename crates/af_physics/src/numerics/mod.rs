// crates/af_physics/src/numerics/mod.rs

//! 数值算法模块

pub mod linear_algebra;
