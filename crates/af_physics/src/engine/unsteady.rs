// crates/af_physics/src/engine/unsteady.rs

//! TVD Runge-Kutta 非定常驱动器
//!
//! 强稳定保持的显式时间积分，阶数 1/2/3。Shu-Osher 凸组合形式，
//! 每个物理时间步：
//!
//! ```text
//! U_stage ← α_s·U + β_s·U_stage − γ_s·(Δt_min·CFL/area)·R(U_stage)
//! ```
//!
//! 全局时间步 Δt_min 取第 0 级局部时间步的最小值，物理时间按
//! Δt_min 推进，直到 t ≥ finaltime − ε（ε 防浮点漂移）。
//! 阶数超过 3 在构造时以配置错误拒绝。

use std::time::Instant;

use af_runtime::{AfError, AfResult, SolverScalar};
use cpu_time::ProcessTime;
use rayon::prelude::*;

use super::report::UnsteadyReport;
use crate::mesh::Mesh;
use crate::spatial::SpatialScheme;
use crate::state::CellField;

/// 终止时刻的浮点漂移防护
const TIME_EPSILON: f64 = 1e-12;

/// TVD-RK 系数表，每级一行 (α, β, γ)
fn tvd_rk_coeffs(order: usize) -> AfResult<Vec<[f64; 3]>> {
    match order {
        1 => Ok(vec![[1.0, 0.0, 1.0]]),
        2 => Ok(vec![[1.0, 0.0, 1.0], [0.5, 0.5, 0.5]]),
        3 => Ok(vec![
            [1.0, 0.0, 1.0],
            [0.75, 0.25, 0.25],
            [1.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0],
        ]),
        other => Err(AfError::config(format!(
            "不支持的 TVD-RK 阶数 {}, 可用阶数为 1/2/3",
            other
        ))),
    }
}

/// TVD-RK 非定常驱动器
#[derive(Debug)]
pub struct TvdRkSolver<'a, S: SolverScalar, const V: usize, Sp: SpatialScheme<S, V>> {
    spatial: &'a Sp,
    order: usize,
    cfl: S,
    coeffs: Vec<[S; 3]>,
    logfile: String,
    residual: CellField<S, V>,
    u_stage: CellField<S, V>,
    dtm: Vec<S>,
    areas: Vec<S>,
}

impl<'a, S: SolverScalar, const V: usize, Sp: SpatialScheme<S, V>> TvdRkSolver<'a, S, V, Sp> {
    /// 创建驱动器；阶数在此校验
    // ALLOW_F64: cfl 为配置参数
    pub fn new(spatial: &'a Sp, order: usize, cfl: f64) -> AfResult<Self> {
        if !(cfl > 0.0 && cfl.is_finite()) {
            return Err(AfError::config("CFL 数必须为正的有限值"));
        }
        let coeffs = tvd_rk_coeffs(order)?
            .into_iter()
            .map(|row| {
                [
                    S::from_f64(row[0]).unwrap_or(S::ZERO),
                    S::from_f64(row[1]).unwrap_or(S::ZERO),
                    S::from_f64(row[2]).unwrap_or(S::ZERO),
                ]
            })
            .collect();

        let n = spatial.mesh().n_cells();
        Ok(Self {
            spatial,
            order,
            cfl: S::from_f64(cfl).unwrap_or(S::ONE),
            coeffs,
            logfile: String::new(),
            residual: CellField::new(n),
            u_stage: CellField::new(n),
            dtm: vec![S::ZERO; n],
            areas: spatial.mesh().collect_areas(),
        })
    }

    /// 设置运行摘要日志文件
    pub fn with_logfile(mut self, logfile: impl Into<String>) -> Self {
        self.logfile = logfile.into();
        self
    }

    /// 时间精度阶数
    pub fn order(&self) -> usize {
        self.order
    }

    /// 推进物理时间到 finaltime；就地修改 u
    // ALLOW_F64: 物理时间为配置参数
    pub fn solve(&mut self, u: &mut CellField<S, V>, finaltime: f64) -> AfResult<UnsteadyReport> {
        let n = self.areas.len();
        if u.n_cells() != n {
            return Err(AfError::config(format!(
                "状态规模 {} 与网格单元数 {} 不一致",
                u.n_cells(),
                n
            )));
        }

        let wall = Instant::now();
        let cpu = ProcessTime::now();

        let mut step = 0usize;
        let mut time = 0.0f64;
        let mut dtmin = S::ZERO;

        self.u_stage.copy_from(u);

        while time <= finaltime - TIME_EPSILON {
            for stage in 0..self.order {
                self.residual.reset();
                let want_dt = stage == 0;
                self.spatial.compute_residual(
                    &self.u_stage,
                    &mut self.residual,
                    if want_dt { Some(&mut self.dtm) } else { None },
                )?;

                if let Err((cell, value)) = S::validate_slice(self.residual.as_slice()) {
                    return Err(AfError::numerical(format!(
                        "第 {} 步第 {} 级残差出现非法值 {} (位置 {})",
                        step, stage, value, cell
                    )));
                }

                // 全局时间步取第 0 级局部步的最小值
                if want_dt {
                    dtmin = self
                        .dtm
                        .par_iter()
                        .copied()
                        .reduce(|| S::MAX, |a, b| a.min(b));
                    if !(dtmin > S::ZERO) {
                        return Err(AfError::numerical(format!(
                            "第 {} 步全局时间步非正: {}",
                            step, dtmin
                        )));
                    }
                }

                let [alpha, beta, gamma] = self.coeffs[stage];
                let cfl = self.cfl;
                let residual = &self.residual;
                let areas = &self.areas;

                self.u_stage
                    .as_mut_slice()
                    .par_chunks_exact_mut(V)
                    .zip(u.as_slice().par_chunks_exact(V))
                    .zip(residual.as_slice().par_chunks_exact(V))
                    .zip(areas.par_iter())
                    .for_each(|(((us, ur), rr), &area)| {
                        let factor = gamma * dtmin * cfl / area;
                        for v in 0..V {
                            us[v] = alpha * ur[v] + beta * us[v] - factor * rr[v];
                        }
                    });
            }

            u.copy_from(&self.u_stage);

            if step % 50 == 0 {
                log::info!("TvdRkSolver: 第 {} 步, 物理时间 {:.6e}", step, time);
            }

            step += 1;
            time += dtmin.to_f64().unwrap_or(0.0);
        }

        let walltime = wall.elapsed().as_secs_f64();
        let cputime = cpu.elapsed().as_secs_f64();
        log::info!(
            "TvdRkSolver: 完成, {} 步, 物理时间 {:.6e}, 墙钟 {:.3}s, CPU {:.3}s",
            step,
            time,
            walltime,
            cputime
        );

        super::steady::append_run_summary(&self.logfile, n, 0.0, 0.0, 0.0, step)?;

        Ok(UnsteadyReport { steps: step, time })
    }
}
