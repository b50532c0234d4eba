// crates/af_physics/src/engine/config.rs

//! 定常求解器配置（全 f64）
//!
//! 所有参数用 f64 存储以便 JSON 序列化；构建驱动器时按目标
//! 精度转换。枚举记号（预条件器、线性求解器）在反序列化与
//! `FromStr` 两条路径上都做校验，未知记号是配置错误。

use std::path::Path;

use af_runtime::{AfError, AfResult};
use serde::{Deserialize, Serialize};

use crate::numerics::linear_algebra::preconditioner::PreconditionerKind;
use crate::numerics::linear_algebra::solver::LinearSolverKind;

/// 定常伪时间求解配置
// ALLOW_F64: 配置层参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteadySolverConfig {
    /// 外层相对收敛容差
    #[serde(default = "default_tol")]
    pub tol: f64,

    /// 外层最大伪时间步数
    #[serde(default = "default_maxiter")]
    pub maxiter: usize,

    /// 初始 CFL 数（前向欧拉驱动器只用此值，不做坡道）
    #[serde(default = "default_cflinit")]
    pub cflinit: f64,

    /// 最终 CFL 数
    #[serde(default = "default_cflfin")]
    pub cflfin: f64,

    /// 坡道起始步
    #[serde(default = "default_rampstart")]
    pub rampstart: usize,

    /// 坡道结束步
    #[serde(default = "default_rampend")]
    pub rampend: usize,

    /// 内层线性求解相对容差
    #[serde(default = "default_lintol")]
    pub lintol: f64,

    /// 内层迭代上限（坡道起点）
    #[serde(default = "default_linmaxiterstart")]
    pub linmaxiterstart: usize,

    /// 内层迭代上限（坡道终点）
    #[serde(default = "default_linmaxiterend")]
    pub linmaxiterend: usize,

    /// GMRES 重启长度
    #[serde(default = "default_restart_vecs")]
    pub restart_vecs: usize,

    /// 预条件器记号 {NONE, J, SGS, ILU0}
    #[serde(default)]
    pub preconditioner: PreconditionerKind,

    /// 线性求解器记号 {RICHARDSON, BCGSTB, GMRES}
    #[serde(default)]
    pub linearsolver: LinearSolverKind,

    /// 是否记录逐步收敛历史到 {logfile}.conv
    #[serde(default)]
    pub lognres: bool,

    /// 日志文件名；为空则禁用全部日志输出
    #[serde(default)]
    pub logfile: String,
}

fn default_tol() -> f64 {
    1e-6
}
fn default_maxiter() -> usize {
    500
}
fn default_cflinit() -> f64 {
    10.0
}
fn default_cflfin() -> f64 {
    1000.0
}
fn default_rampstart() -> usize {
    10
}
fn default_rampend() -> usize {
    100
}
fn default_lintol() -> f64 {
    1e-3
}
fn default_linmaxiterstart() -> usize {
    20
}
fn default_linmaxiterend() -> usize {
    100
}
fn default_restart_vecs() -> usize {
    30
}

impl Default for SteadySolverConfig {
    fn default() -> Self {
        Self {
            tol: default_tol(),
            maxiter: default_maxiter(),
            cflinit: default_cflinit(),
            cflfin: default_cflfin(),
            rampstart: default_rampstart(),
            rampend: default_rampend(),
            lintol: default_lintol(),
            linmaxiterstart: default_linmaxiterstart(),
            linmaxiterend: default_linmaxiterend(),
            restart_vecs: default_restart_vecs(),
            preconditioner: PreconditionerKind::default(),
            linearsolver: LinearSolverKind::default(),
            lognres: false,
            logfile: String::new(),
        }
    }
}

impl SteadySolverConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> AfResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| AfError::config(format!("配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 参数校验；非正的规模与容差是配置错误
    pub fn validate(&self) -> AfResult<()> {
        if self.maxiter == 0 {
            return Err(AfError::config("maxiter 必须为正"));
        }
        if !(self.tol > 0.0 && self.tol.is_finite()) {
            return Err(AfError::config("tol 必须为正的有限值"));
        }
        if self.cflinit <= 0.0 || self.cflfin <= 0.0 {
            return Err(AfError::config("CFL 数必须为正"));
        }
        if !(self.lintol > 0.0 && self.lintol.is_finite()) {
            return Err(AfError::config("lintol 必须为正的有限值"));
        }
        if self.linmaxiterstart == 0 || self.linmaxiterend == 0 {
            return Err(AfError::config("内层迭代上限必须为正"));
        }
        if self.restart_vecs == 0 {
            return Err(AfError::config("restart_vecs 必须为正"));
        }
        Ok(())
    }

    /// 第 step 步的坡道取值 (CFL, 内层迭代上限)
    ///
    /// - `step < rampstart`: 初始值
    /// - `rampstart ≤ step < rampend`: 线性插值；退化坡道
    ///   (`rampend ≤ rampstart`) 直接用最终值
    /// - `step ≥ rampend`: 最终值
    pub fn ramped_values(&self, step: usize) -> (f64, usize) {
        if step < self.rampstart {
            (self.cflinit, self.linmaxiterstart)
        } else if step < self.rampend {
            if self.rampend <= self.rampstart {
                (self.cflfin, self.linmaxiterend)
            } else {
                let span = (self.rampend - self.rampstart) as f64;
                let offset = (step - self.rampstart) as f64;

                let slope_cfl = (self.cflfin - self.cflinit) / span;
                let cfl = self.cflinit + slope_cfl * offset;

                let slope_iter =
                    (self.linmaxiterend as f64 - self.linmaxiterstart as f64) / span;
                let lin_maxiter = (self.linmaxiterstart as f64 + slope_iter * offset) as usize;

                (cfl, lin_maxiter)
            }
        } else {
            (self.cflfin, self.linmaxiterend)
        }
    }
}
