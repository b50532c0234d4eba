// crates/af_runtime/src/error.rs

//! 统一错误类型
//!
//! 求解器核心只区分四类失败：
//!
//! - [`AfError::Config`]: 非法配置（未知枚举记号、不支持的时间精度阶数、
//!   非正的规模参数）。在驱动器边界是致命错误。
//! - [`AfError::Structural`]: 稀疏模式冻结后向不存在的槽位写入。致命错误。
//! - [`AfError::Numerical`]: ILU(0) 主元块奇异、残差中出现 NaN/Inf 等。
//!   内层求解中出现时由驱动器记录并允许外层继续一次；
//!   连续两次则以同类错误中止。
//! - [`AfError::Io`]: 收敛历史 / 运行摘要日志写入失败。
//!
//! 迭代数达到上限不是错误，由 `SolveStatus::IterationCap` 正常返回。

/// 统一结果类型别名
pub type AfResult<T> = Result<T, AfError>;

/// 求解器核心错误
#[derive(Debug, thiserror::Error)]
pub enum AfError {
    /// 配置错误
    #[error("配置错误: {message}")]
    Config {
        /// 说明非法原因
        message: String,
    },

    /// 稀疏结构错误：模式已冻结，目标槽位不存在
    #[error("稀疏结构已冻结, 块位置 ({row}, {col}) 不在模式中")]
    Structural {
        /// 块行
        row: usize,
        /// 块列
        col: usize,
    },

    /// 数值错误
    #[error("数值错误: {message}")]
    Numerical {
        /// 错误描述
        message: String,
    },

    /// IO 错误（日志文件）
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl AfError {
    /// 创建配置错误
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// 创建稀疏结构错误
    #[inline]
    pub fn structural(row: usize, col: usize) -> Self {
        Self::Structural { row, col }
    }

    /// 创建数值错误
    #[inline]
    pub fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical {
            message: message.into(),
        }
    }

    /// 是否为数值错误
    #[inline]
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = AfError::config("未知的线性求解器记号 'CG'");
        assert!(err.to_string().contains("CG"));

        let err = AfError::structural(3, 7);
        assert!(err.to_string().contains("(3, 7)"));
    }

    #[test]
    fn test_is_numerical() {
        assert!(AfError::numerical("奇异主元").is_numerical());
        assert!(!AfError::config("x").is_numerical());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: AfError = io_err.into();
        assert!(matches!(err, AfError::Io(_)));
    }
}
