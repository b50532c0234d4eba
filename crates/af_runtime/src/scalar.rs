// crates/af_runtime/src/scalar.rs

//! SolverScalar - 密封的标量类型抽象
//!
//! 求解器引擎层的唯一标量接口，允许数值核心在 f32 和 f64 之间
//! 零成本切换。配置层统一使用 f64，在构建引擎对象时通过
//! `from_f64` 转换到目标精度。
//!
//! # 设计原则
//!
//! 1. **密封 Trait**: 只有 f32 和 f64 可以实现（通过 private::Sealed）
//! 2. **零成本抽象**: `#[inline]` + 编译期单态化
//! 3. **常量齐全**: 迭代算法所需的 ZERO/ONE/EPSILON 等直接以关联常量提供

use std::fmt::{Debug, Display, LowerExp};
use std::iter::Sum;
use std::ops::Neg;

use bytemuck::Pod;
use num_traits::{Float, FromPrimitive, NumAssign, ToPrimitive};

mod private {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// 求解器标量类型（密封，仅 f32/f64 可实现）
///
/// 所有引擎层组件以 `<S: SolverScalar>` 作为泛型边界；
/// 配置与报告层保持 f64。
pub trait SolverScalar:
    private::Sealed
    + Pod
    + Float
    + FromPrimitive
    + ToPrimitive
    + NumAssign
    + Neg<Output = Self>
    + Debug
    + Display
    + LowerExp
    + Default
    + Send
    + Sync
    + Sum
    + 'static
{
    /// 零值
    const ZERO: Self;
    /// 一
    const ONE: Self;
    /// 二
    const TWO: Self;
    /// 二分之一
    const HALF: Self;
    /// 机器精度
    const EPSILON: Self;
    /// 最小正规格化正值
    const MIN_POSITIVE: Self;
    /// 最大值
    const MAX: Self;

    /// 安全除法：除数绝对值小于 MIN_POSITIVE 时返回 fallback
    #[inline]
    fn safe_div(self, rhs: Self, fallback: Self) -> Self {
        if rhs.abs() < Self::MIN_POSITIVE {
            fallback
        } else {
            self / rhs
        }
    }

    /// 检查是否有限（非 NaN、非 Inf）
    #[inline]
    fn is_safe(self) -> bool {
        self.is_finite()
    }

    /// 近似相等判断
    #[inline]
    fn approx_eq(self, other: Self, epsilon: Self) -> bool {
        (self - other).abs() < epsilon
    }

    /// 批量验证切片中所有值是否有限
    ///
    /// 返回第一个非法值的位置及其内容。
    fn validate_slice(data: &[Self]) -> Result<(), (usize, Self)> {
        for (i, &v) in data.iter().enumerate() {
            if !v.is_safe() {
                return Err((i, v));
            }
        }
        Ok(())
    }
}

impl SolverScalar for f32 {
    const ZERO: f32 = 0.0;
    const ONE: f32 = 1.0;
    const TWO: f32 = 2.0;
    const HALF: f32 = 0.5;
    const EPSILON: f32 = f32::EPSILON;
    const MIN_POSITIVE: f32 = f32::MIN_POSITIVE;
    const MAX: f32 = f32::MAX;
}

impl SolverScalar for f64 {
    const ZERO: f64 = 0.0;
    const ONE: f64 = 1.0;
    const TWO: f64 = 2.0;
    const HALF: f64 = 0.5;
    const EPSILON: f64 = f64::EPSILON;
    const MIN_POSITIVE: f64 = f64::MIN_POSITIVE;
    const MAX: f64 = f64::MAX;
}
