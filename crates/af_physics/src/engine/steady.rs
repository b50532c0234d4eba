// crates/af_physics/src/engine/steady.rs

//! 定常伪时间驱动器
//!
//! - [`SteadyForwardEuler`]: 局部时间步前向欧拉松弛。每步向空间
//!   离散索取 (R, Δt)，做显式单元更新，用末变量的面积加权 L2
//!   范数判敛。CFL 恒为 `cflinit`，不做坡道。
//! - [`SteadyBackwardEuler`]: 后向欧拉伪时间法。每步重装配雅可比，
//!   加伪时间对角项 area/(CFL·Δt)·I，首次装配后冻结稀疏模式，
//!   内层用预条件 Krylov 求解 (D_τ + ∂R/∂U)·δU = −R，随后
//!   U ← U + δU。CFL 与内层迭代上限按配置坡道爬升。
//!
//! 两个驱动器的收敛判据一致：‖R‖ = sqrt(Σ_i R[i,V−1]²·area[i])，
//! 与遗留判据逐位一致（末变量：标量问题即该变量，Euler 为能量）。
//!
//! 内层数值失败（ILU(0) 主元奇异、残差非法值）不立即致命：
//! 记录并跳过本步修正，外层继续；连续两次则以同类错误中止。
//! 迭代上限是正常返回（[`SolveStatus::IterationCap`]），附带警告。

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::time::Instant;

use af_runtime::{AfError, AfResult, KahanSum, SolverScalar};
use cpu_time::ProcessTime;
use rayon::prelude::*;

use super::config::SteadySolverConfig;
use super::report::{SolveReport, SolveStatus};
use crate::mesh::Mesh;
use crate::numerics::linear_algebra::preconditioner::{AnyPreconditioner, PrecApply};
use crate::numerics::linear_algebra::solver::{AnyKrylovSolver, KrylovSolver};
use crate::numerics::linear_algebra::BsrMatrix;
use crate::spatial::SpatialScheme;
use crate::state::CellField;

// ============================================================================
// 共用工具
// ============================================================================

/// 末变量面积加权 L2 残差范数（遗留收敛判据）
fn weighted_last_var_norm<S: SolverScalar, const V: usize>(
    residual: &CellField<S, V>,
    areas: &[S],
) -> S {
    residual
        .as_slice()
        .par_chunks_exact(V)
        .zip(areas.par_iter())
        .fold(KahanSum::new, |mut acc, (row, &area)| {
            let r = row[V - 1];
            acc.add(r * r * area);
            acc
        })
        .reduce(KahanSum::new, KahanSum::merge)
        .value()
        .sqrt()
}

/// 相对残差；初始残差为零时视为已收敛
#[inline]
fn relative<S: SolverScalar>(resi: S, initres: S) -> f64 {
    if initres > S::ZERO {
        (resi / initres).to_f64().unwrap_or(f64::NAN)
    } else {
        0.0
    }
}

/// 逐步收敛历史 {logfile}.conv
struct ConvergenceLog {
    writer: Option<BufWriter<std::fs::File>>,
}

impl ConvergenceLog {
    fn open(config: &SteadySolverConfig) -> AfResult<Self> {
        let writer = if config.lognres && !config.logfile.is_empty() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(format!("{}.conv", config.logfile))?;
            Some(BufWriter::new(file))
        } else {
            None
        };
        Ok(Self { writer })
    }

    fn record(&mut self, step: usize, rel_residual: f64) -> AfResult<()> {
        if let Some(w) = &mut self.writer {
            writeln!(w, "{} {:>10.6e}", step, rel_residual)?;
        }
        Ok(())
    }

    fn finish(mut self) -> AfResult<()> {
        if let Some(w) = &mut self.writer {
            w.flush()?;
        }
        Ok(())
    }
}

/// 向运行摘要 {logfile} 追加一行:
/// nelem threads lin_walltime lin_cputime avg_lin_iters outer_iters
///
/// 显式驱动器在内层求解相关字段写零。
pub(crate) fn append_run_summary(
    logfile: &str,
    nelem: usize,
    lin_walltime: f64,
    lin_cputime: f64,
    avg_lin_iters: f64,
    outer_iters: usize,
) -> AfResult<()> {
    if logfile.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(logfile)?;
    writeln!(
        file,
        "{:>10} {:>6} {:>12.6} {:>12.6} {:>10.2} {:>8}",
        nelem,
        rayon::current_num_threads(),
        lin_walltime,
        lin_cputime,
        avg_lin_iters,
        outer_iters,
    )?;
    Ok(())
}

// ============================================================================
// 前向欧拉松弛
// ============================================================================

/// 显式定常驱动器：局部时间步前向欧拉
pub struct SteadyForwardEuler<'a, S: SolverScalar, const V: usize, Sp: SpatialScheme<S, V>> {
    spatial: &'a Sp,
    config: SteadySolverConfig,
    residual: CellField<S, V>,
    dtm: Vec<S>,
    areas: Vec<S>,
}

impl<'a, S: SolverScalar, const V: usize, Sp: SpatialScheme<S, V>>
    SteadyForwardEuler<'a, S, V, Sp>
{
    /// 创建驱动器；工作数组按网格规模分配一次
    pub fn new(spatial: &'a Sp, config: SteadySolverConfig) -> AfResult<Self> {
        config.validate()?;
        let n = spatial.mesh().n_cells();
        Ok(Self {
            spatial,
            config,
            residual: CellField::new(n),
            dtm: vec![S::ZERO; n],
            areas: spatial.mesh().collect_areas(),
        })
    }

    /// 推进到收敛或迭代上限；就地修改 u
    pub fn solve(&mut self, u: &mut CellField<S, V>) -> AfResult<SolveReport> {
        let n = self.areas.len();
        if u.n_cells() != n {
            return Err(AfError::config(format!(
                "状态规模 {} 与网格单元数 {} 不一致",
                u.n_cells(),
                n
            )));
        }

        let tol = S::from_f64(self.config.tol).unwrap_or(S::EPSILON);
        let cfl = S::from_f64(self.config.cflinit).unwrap_or(S::ONE);

        let mut conv = ConvergenceLog::open(&self.config)?;
        let wall = Instant::now();
        let cpu = ProcessTime::now();

        let mut step = 0usize;
        let mut resi = S::ONE;
        let mut initres = S::ONE;

        while resi / initres > tol && step < self.config.maxiter {
            self.residual.reset();
            self.spatial
                .compute_residual(u, &mut self.residual, Some(&mut self.dtm))?;

            if let Err((cell, value)) = S::validate_slice(self.residual.as_slice()) {
                return Err(AfError::numerical(format!(
                    "第 {} 步残差出现非法值 {} (位置 {})",
                    step, value, cell
                )));
            }

            // 显式单元更新: U[i] -= cflinit·Δt[i]/area[i]·R[i]
            u.as_mut_slice()
                .par_chunks_exact_mut(V)
                .zip(self.residual.as_slice().par_chunks_exact(V))
                .zip(self.dtm.par_iter())
                .zip(self.areas.par_iter())
                .for_each(|(((ur, rr), &dt), &area)| {
                    let factor = cfl * dt / area;
                    for v in 0..V {
                        ur[v] -= factor * rr[v];
                    }
                });

            resi = weighted_last_var_norm(&self.residual, &self.areas);
            if step == 0 {
                initres = resi;
            }

            if step % 50 == 0 {
                log::info!(
                    "SteadyForwardEuler: 第 {} 步, 相对残差 {:.6e}",
                    step,
                    relative(resi, initres)
                );
            }

            step += 1;
            conv.record(step, relative(resi, initres))?;
        }

        conv.finish()?;
        let walltime = wall.elapsed().as_secs_f64();
        let cputime = cpu.elapsed().as_secs_f64();

        let status = if step >= self.config.maxiter && resi / initres > tol {
            log::warn!("SteadyForwardEuler: 超出最大迭代数 {}", self.config.maxiter);
            SolveStatus::IterationCap
        } else {
            SolveStatus::Converged
        };
        log::info!(
            "SteadyForwardEuler: 完成, {} 步, 墙钟 {:.3}s, CPU {:.3}s",
            step,
            walltime,
            cputime
        );

        append_run_summary(&self.config.logfile, n, 0.0, 0.0, 0.0, step)?;

        Ok(SolveReport {
            status,
            steps: step,
            initial_residual: initres.to_f64().unwrap_or(f64::NAN),
            final_residual: resi.to_f64().unwrap_or(f64::NAN),
            avg_lin_iters: 0.0,
            lin_walltime: 0.0,
            lin_cputime: 0.0,
        })
    }
}

// ============================================================================
// 后向欧拉伪时间法
// ============================================================================

/// 隐式定常驱动器：带 CFL 坡道的后向欧拉
pub struct SteadyBackwardEuler<'a, S: SolverScalar, const V: usize, Sp: SpatialScheme<S, V>> {
    spatial: &'a Sp,
    config: SteadySolverConfig,
    residual: CellField<S, V>,
    du: CellField<S, V>,
    rhs: Vec<S>,
    dtm: Vec<S>,
    areas: Vec<S>,
    matrix: BsrMatrix<S, V>,
    prec: AnyPreconditioner<S, V>,
    linsolv: AnyKrylovSolver<S>,
}

impl<'a, S: SolverScalar, const V: usize, Sp: SpatialScheme<S, V>>
    SteadyBackwardEuler<'a, S, V, Sp>
{
    /// 创建驱动器；按配置记号选择预条件器与线性求解器
    pub fn new(spatial: &'a Sp, config: SteadySolverConfig) -> AfResult<Self> {
        config.validate()?;
        let n = spatial.mesh().n_cells();

        let prec = AnyPreconditioner::from_kind(config.preconditioner);
        let linsolv = AnyKrylovSolver::from_kind(config.linearsolver, config.restart_vecs);
        log::info!(
            "SteadyBackwardEuler: 预条件器 {}, 线性求解器 {}",
            prec.name(),
            linsolv.name()
        );

        Ok(Self {
            spatial,
            config,
            residual: CellField::new(n),
            du: CellField::new(n),
            rhs: vec![S::ZERO; n * V],
            dtm: vec![S::ZERO; n],
            areas: spatial.mesh().collect_areas(),
            matrix: BsrMatrix::new(n),
            prec,
            linsolv,
        })
    }

    /// 推进到收敛或迭代上限；就地修改 u
    pub fn solve(&mut self, u: &mut CellField<S, V>) -> AfResult<SolveReport> {
        let n = self.areas.len();
        if u.n_cells() != n {
            return Err(AfError::config(format!(
                "状态规模 {} 与网格单元数 {} 不一致",
                u.n_cells(),
                n
            )));
        }

        let tol = S::from_f64(self.config.tol).unwrap_or(S::EPSILON);

        let mut conv = ConvergenceLog::open(&self.config)?;
        let wall = Instant::now();
        let cpu = ProcessTime::now();

        let mut step = 0usize;
        let mut resi = S::ONE;
        // 基准残差取第一次成功算出的残差范数；步 0 被容忍的数值
        // 失败跳过时在后续步补记
        let mut initres: Option<S> = None;
        let mut total_lin_iters = 0usize;
        let mut lin_walltime = 0.0f64;
        let mut lin_cputime = 0.0f64;
        let mut consecutive_numerical = 0usize;
        let mut last_lin_iters = 0usize;

        while initres.map_or(true, |ir| resi / ir > tol) && step < self.config.maxiter {
            let (cur_cfl, cur_linmaxiter) = self.config.ramped_values(step);
            let mut failure: Option<AfError> = None;

            self.residual.reset();
            self.matrix.set_all_zero();
            self.spatial
                .compute_residual(u, &mut self.residual, Some(&mut self.dtm))?;

            if let Err((cell, value)) = S::validate_slice(self.residual.as_slice()) {
                failure = Some(AfError::numerical(format!(
                    "第 {} 步残差出现非法值 {} (位置 {})",
                    step, value, cell
                )));
            }

            if failure.is_none() {
                self.spatial.compute_jacobian(u, &mut self.matrix)?;

                // 伪时间对角项: area[i]/(CFL·Δt[i])·I
                let cfl = S::from_f64(cur_cfl).unwrap_or(S::ONE);
                let areas = &self.areas;
                let dtm = &self.dtm;
                self.matrix
                    .add_scaled_identity_to_diag(|i| areas[i] / (cfl * dtm[i]));

                // 首次装配后冻结非零结构，后续步不再分配
                self.matrix.freeze_pattern()?;

                match self.prec.setup(&self.matrix) {
                    Ok(()) => {}
                    Err(err) if err.is_numerical() => failure = Some(err),
                    Err(err) => return Err(err),
                }
            }

            if failure.is_none() {
                // 内层求解 (D_τ + ∂R/∂U)·δU = −R，δU 温启动
                self.rhs
                    .par_iter_mut()
                    .zip(self.residual.as_slice().par_iter())
                    .for_each(|(out, &r)| *out = -r);

                self.linsolv.set_params(self.config.lintol, cur_linmaxiter);

                let lin_wall = Instant::now();
                let lin_cpu = ProcessTime::now();
                let lin_result = self.linsolv.solve(
                    &self.matrix,
                    &self.prec as &dyn PrecApply<S>,
                    &self.rhs,
                    self.du.as_mut_slice(),
                );
                lin_walltime += lin_wall.elapsed().as_secs_f64();
                lin_cputime += lin_cpu.elapsed().as_secs_f64();

                total_lin_iters += lin_result.iterations;
                last_lin_iters = lin_result.iterations;

                if self.du.is_finite() {
                    u.add_assign_field(&self.du);
                } else {
                    failure = Some(AfError::numerical(format!(
                        "第 {} 步内层解出现非法值",
                        step
                    )));
                    self.du.reset();
                }
            }

            match failure {
                Some(err) => {
                    consecutive_numerical += 1;
                    log::warn!(
                        "SteadyBackwardEuler: 第 {} 步数值失败, 跳过本步修正: {}",
                        step,
                        err
                    );
                    if consecutive_numerical >= 2 {
                        return Err(err);
                    }
                }
                None => {
                    consecutive_numerical = 0;
                    resi = weighted_last_var_norm(&self.residual, &self.areas);
                    if initres.is_none() {
                        initres = Some(resi);
                    }
                }
            }

            if step % 10 == 0 {
                log::info!(
                    "SteadyBackwardEuler: 第 {} 步, 相对残差 {:.6e}, CFL = {:.1}, 内层上限 {}, 实际 {}",
                    step,
                    relative(resi, initres.unwrap_or(S::ONE)),
                    cur_cfl,
                    cur_linmaxiter,
                    last_lin_iters
                );
            }

            step += 1;
            conv.record(step, relative(resi, initres.unwrap_or(S::ONE)))?;
        }

        conv.finish()?;
        let walltime = wall.elapsed().as_secs_f64();
        let cputime = cpu.elapsed().as_secs_f64();
        let avg_lin_iters = if step > 0 {
            total_lin_iters as f64 / step as f64
        } else {
            0.0
        };

        let status = if step >= self.config.maxiter
            && initres.map_or(true, |ir| resi / ir > tol)
        {
            log::warn!("SteadyBackwardEuler: 超出最大迭代数 {}", self.config.maxiter);
            SolveStatus::IterationCap
        } else {
            SolveStatus::Converged
        };
        log::info!(
            "SteadyBackwardEuler: 完成, {} 步, 相对残差 {:.6e}",
            step,
            relative(resi, initres.unwrap_or(S::ONE))
        );
        log::info!(
            "SteadyBackwardEuler: 内层求解墙钟 {:.3}s, CPU {:.3}s, 平均迭代 {:.1}; 总墙钟 {:.3}s, CPU {:.3}s",
            lin_walltime,
            lin_cputime,
            avg_lin_iters,
            walltime,
            cputime
        );

        append_run_summary(
            &self.config.logfile,
            n,
            lin_walltime,
            lin_cputime,
            avg_lin_iters,
            step,
        )?;

        Ok(SolveReport {
            status,
            steps: step,
            initial_residual: initres.unwrap_or(resi).to_f64().unwrap_or(f64::NAN),
            final_residual: resi.to_f64().unwrap_or(f64::NAN),
            avg_lin_iters,
            lin_walltime,
            lin_cputime,
        })
    }
}
