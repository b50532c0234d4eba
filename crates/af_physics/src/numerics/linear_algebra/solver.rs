// crates/af_physics/src/numerics/linear_algebra/solver.rs

//! 迭代线性求解器
//!
//! 求解 A·x = b 的 Krylov 方法，A 通过 [`LinearOperator`] 抽象
//! （装配好的 BSR 矩阵，或有限差分无矩阵算子）：
//!
//! - [`RichardsonSolver`]: 预条件 Richardson 迭代，无 Krylov 加速
//! - [`BiCgStabSolver`]: 预条件 BiCGStab，ρ/ω 崩溃时重置影子向量
//! - [`GmresSolver`]: 右预条件重启 GMRES(k)，修正 Gram-Schmidt
//!   Arnoldi + Givens 旋转维护上三角系统与残差上界
//!
//! 停机判据为相对残差 ‖r_k‖/‖r_0‖ ≤ tol。不收敛不是错误：
//! 返回到达的最优迭代并由驱动器决定后续。容差与迭代上限
//! 由外层每个伪时间步通过 `set_params` 设置；外层设定截止时刻
//! 时，求解器在迭代之间检查并提前返回当前迭代。

use std::str::FromStr;
use std::time::Instant;

use af_runtime::{AfError, AfResult, SolverScalar};
use serde::{Deserialize, Serialize};

use super::bsr::BsrMatrix;
use super::preconditioner::PrecApply;
use super::vector_ops::{axpy, copy, dot, norm2, residual_from, scale};

// ============================================================================
// 线性算子
// ============================================================================

/// 线性算子抽象：y = A·x
pub trait LinearOperator<S: SolverScalar>: Send + Sync {
    /// 标量行数
    fn n_rows(&self) -> usize;

    /// y = A·x
    fn apply(&self, x: &[S], y: &mut [S]);
}

impl<S: SolverScalar, const V: usize> LinearOperator<S> for BsrMatrix<S, V> {
    fn n_rows(&self) -> usize {
        BsrMatrix::n_rows(self)
    }

    fn apply(&self, x: &[S], y: &mut [S]) {
        BsrMatrix::apply(self, x, y)
    }
}

// ============================================================================
// 记号与结果
// ============================================================================

/// 线性求解器种类（配置记号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinearSolverKind {
    /// Richardson 迭代
    #[default]
    #[serde(rename = "RICHARDSON")]
    Richardson,
    /// BiCGStab
    #[serde(rename = "BCGSTB")]
    BiCgStab,
    /// 重启 GMRES
    #[serde(rename = "GMRES")]
    Gmres,
}

impl FromStr for LinearSolverKind {
    type Err = AfError;

    fn from_str(s: &str) -> AfResult<Self> {
        match s {
            "RICHARDSON" => Ok(Self::Richardson),
            "BCGSTB" => Ok(Self::BiCgStab),
            "GMRES" => Ok(Self::Gmres),
            other => Err(AfError::config(format!("未知的线性求解器记号 '{}'", other))),
        }
    }
}

impl std::fmt::Display for LinearSolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Richardson => write!(f, "RICHARDSON"),
            Self::BiCgStab => write!(f, "BCGSTB"),
            Self::Gmres => write!(f, "GMRES"),
        }
    }
}

/// 线性求解结果
#[derive(Debug, Clone, Copy)]
pub struct LinSolveResult<S: SolverScalar> {
    /// 实际迭代次数
    pub iterations: usize,
    /// 初始残差范数
    pub initial_residual_norm: S,
    /// 最终残差范数
    pub residual_norm: S,
    /// 是否达到相对容差
    pub converged: bool,
}

impl<S: SolverScalar> LinSolveResult<S> {
    fn converged_at(iterations: usize, initial: S, residual: S) -> Self {
        Self {
            iterations,
            initial_residual_norm: initial,
            residual_norm: residual,
            converged: true,
        }
    }

    fn capped(iterations: usize, initial: S, residual: S) -> Self {
        Self {
            iterations,
            initial_residual_norm: initial,
            residual_norm: residual,
            converged: false,
        }
    }

    /// 相对残差 ‖r‖/‖r₀‖
    pub fn relative_residual(&self) -> S {
        if self.initial_residual_norm > S::ZERO {
            self.residual_norm / self.initial_residual_norm
        } else {
            S::ZERO
        }
    }
}

/// 迭代线性求解器 trait
///
/// `solve` 以 `x` 的当前内容为初值（外层驱动器用上一步的修正量
/// 做温启动），返回到达的最优迭代。
pub trait KrylovSolver<S: SolverScalar>: Send {
    /// 设置本次求解的容差与迭代上限
    fn set_params(&mut self, tol: f64, max_iter: usize);

    /// 设置截止时刻；求解器在迭代之间检查
    fn set_deadline(&mut self, deadline: Option<Instant>);

    /// 求解 A·x = b
    fn solve(
        &mut self,
        op: &dyn LinearOperator<S>,
        prec: &dyn PrecApply<S>,
        b: &[S],
        x: &mut [S],
    ) -> LinSolveResult<S>;

    /// 求解器名称
    fn name(&self) -> &'static str;
}

#[inline]
fn deadline_reached(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

// ============================================================================
// Richardson
// ============================================================================

/// 预条件 Richardson 迭代: x ← x + M⁻¹(b − A·x)
pub struct RichardsonSolver<S: SolverScalar> {
    tol: f64,
    max_iter: usize,
    deadline: Option<Instant>,
    r: Vec<S>,
    z: Vec<S>,
    ax: Vec<S>,
    x_best: Vec<S>,
}

impl<S: SolverScalar> RichardsonSolver<S> {
    /// 创建求解器，工作向量首次 solve 时定型
    pub fn new() -> Self {
        Self {
            tol: 1e-6,
            max_iter: 100,
            deadline: None,
            r: Vec::new(),
            z: Vec::new(),
            ax: Vec::new(),
            x_best: Vec::new(),
        }
    }

    fn ensure_workspace(&mut self, n: usize) {
        if self.r.len() != n {
            self.r = vec![S::ZERO; n];
            self.z = vec![S::ZERO; n];
            self.ax = vec![S::ZERO; n];
            self.x_best = vec![S::ZERO; n];
        }
    }
}

impl<S: SolverScalar> Default for RichardsonSolver<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SolverScalar> KrylovSolver<S> for RichardsonSolver<S> {
    fn set_params(&mut self, tol: f64, max_iter: usize) {
        self.tol = tol;
        self.max_iter = max_iter;
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    fn solve(
        &mut self,
        op: &dyn LinearOperator<S>,
        prec: &dyn PrecApply<S>,
        b: &[S],
        x: &mut [S],
    ) -> LinSolveResult<S> {
        let n = b.len();
        self.ensure_workspace(n);
        let tol = S::from_f64(self.tol).unwrap_or(S::EPSILON);

        op.apply(x, &mut self.ax);
        residual_from(b, &self.ax, &mut self.r);
        let initial_norm = norm2(&self.r);
        if initial_norm < S::MIN_POSITIVE {
            return LinSolveResult::converged_at(0, initial_norm, initial_norm);
        }

        // 迭代可能发散（无预条件时谱半径不保证 < 1）；
        // 始终返回到达过的最优迭代
        copy(x, &mut self.x_best);
        let mut best_norm = initial_norm;
        let mut res_norm = initial_norm;
        let mut iters = 0;

        while iters < self.max_iter {
            if deadline_reached(self.deadline) {
                break;
            }

            prec.apply(&self.r, &mut self.z);
            axpy(S::ONE, &self.z, x);

            op.apply(x, &mut self.ax);
            residual_from(b, &self.ax, &mut self.r);
            res_norm = norm2(&self.r);
            iters += 1;

            log::trace!("Richardson iter {}: residual = {:.6e}", iters, res_norm);

            if res_norm < best_norm {
                best_norm = res_norm;
                copy(x, &mut self.x_best);
            }

            if res_norm / initial_norm <= tol {
                return LinSolveResult::converged_at(iters, initial_norm, res_norm);
            }
        }

        if best_norm < res_norm {
            copy(&self.x_best, x);
            res_norm = best_norm;
        }
        LinSolveResult::capped(iters, initial_norm, res_norm)
    }

    fn name(&self) -> &'static str {
        "RICHARDSON"
    }
}

// ============================================================================
// BiCGStab
// ============================================================================

/// 预条件 BiCGStab
///
/// ρ 或 ω 崩溃时以当前残差重置影子向量后继续，不做硬停机。
pub struct BiCgStabSolver<S: SolverScalar> {
    tol: f64,
    max_iter: usize,
    deadline: Option<Instant>,
    r: Vec<S>,
    r0: Vec<S>,
    p: Vec<S>,
    v: Vec<S>,
    s: Vec<S>,
    t: Vec<S>,
    p_hat: Vec<S>,
    s_hat: Vec<S>,
    x_best: Vec<S>,
}

impl<S: SolverScalar> BiCgStabSolver<S> {
    /// 创建求解器
    pub fn new() -> Self {
        Self {
            tol: 1e-6,
            max_iter: 100,
            deadline: None,
            r: Vec::new(),
            r0: Vec::new(),
            p: Vec::new(),
            v: Vec::new(),
            s: Vec::new(),
            t: Vec::new(),
            p_hat: Vec::new(),
            s_hat: Vec::new(),
            x_best: Vec::new(),
        }
    }

    fn ensure_workspace(&mut self, n: usize) {
        if self.r.len() != n {
            self.r = vec![S::ZERO; n];
            self.r0 = vec![S::ZERO; n];
            self.p = vec![S::ZERO; n];
            self.v = vec![S::ZERO; n];
            self.s = vec![S::ZERO; n];
            self.t = vec![S::ZERO; n];
            self.p_hat = vec![S::ZERO; n];
            self.s_hat = vec![S::ZERO; n];
            self.x_best = vec![S::ZERO; n];
        }
    }
}

impl<S: SolverScalar> Default for BiCgStabSolver<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SolverScalar> KrylovSolver<S> for BiCgStabSolver<S> {
    fn set_params(&mut self, tol: f64, max_iter: usize) {
        self.tol = tol;
        self.max_iter = max_iter;
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    fn solve(
        &mut self,
        op: &dyn LinearOperator<S>,
        prec: &dyn PrecApply<S>,
        b: &[S],
        x: &mut [S],
    ) -> LinSolveResult<S> {
        let n = b.len();
        self.ensure_workspace(n);
        let tol = S::from_f64(self.tol).unwrap_or(S::EPSILON);
        let stag_tol = S::from_f64(1e-30).unwrap_or(S::MIN_POSITIVE);

        // r = b - A·x
        op.apply(x, &mut self.t);
        residual_from(b, &self.t, &mut self.r);

        let initial_norm = norm2(&self.r);
        if initial_norm < S::MIN_POSITIVE {
            return LinSolveResult::converged_at(0, initial_norm, initial_norm);
        }

        // 影子残差固定为初始残差，崩溃时重置
        copy(&self.r, &mut self.r0);
        let mut rho_old = S::ONE;
        let mut alpha = S::ONE;
        let mut omega = S::ONE;
        self.v.fill(S::ZERO);
        self.p.fill(S::ZERO);

        // 残差可振荡；跟踪最优迭代，返回值不差于初值
        copy(x, &mut self.x_best);
        let mut best_norm = initial_norm;
        let mut iters = 0;
        let mut res_norm = initial_norm;

        while iters < self.max_iter {
            if deadline_reached(self.deadline) {
                break;
            }

            let rho = dot(&self.r0, &self.r);
            if rho.abs() < stag_tol {
                // ρ 崩溃：重置影子向量后重来
                res_norm = norm2(&self.r);
                if res_norm / initial_norm <= tol {
                    return LinSolveResult::converged_at(iters, initial_norm, res_norm);
                }
                copy(&self.r, &mut self.r0);
                rho_old = S::ONE;
                alpha = S::ONE;
                omega = S::ONE;
                self.v.fill(S::ZERO);
                self.p.fill(S::ZERO);
                continue;
            }

            // p = r + β(p − ω·v)；p=v=0 时退化为 p = r
            let beta = (rho / rho_old) * (alpha / omega);
            rho_old = rho;
            for i in 0..n {
                self.p[i] = self.r[i] + beta * (self.p[i] - omega * self.v[i]);
            }

            prec.apply(&self.p, &mut self.p_hat);
            op.apply(&self.p_hat, &mut self.v);

            let r0v = dot(&self.r0, &self.v);
            if r0v.abs() < stag_tol {
                copy(&self.r, &mut self.r0);
                rho_old = S::ONE;
                alpha = S::ONE;
                omega = S::ONE;
                self.v.fill(S::ZERO);
                self.p.fill(S::ZERO);
                continue;
            }
            alpha = rho / r0v;

            // s = r − α·v
            for i in 0..n {
                self.s[i] = self.r[i] - alpha * self.v[i];
            }

            iters += 1;

            let s_norm = norm2(&self.s);
            if s_norm / initial_norm <= tol {
                axpy(alpha, &self.p_hat, x);
                copy(&self.s, &mut self.r);
                return LinSolveResult::converged_at(iters, initial_norm, s_norm);
            }

            prec.apply(&self.s, &mut self.s_hat);
            op.apply(&self.s_hat, &mut self.t);

            let tt = dot(&self.t, &self.t);
            omega = if tt.abs() < stag_tol {
                S::ONE
            } else {
                dot(&self.t, &self.s) / tt
            };

            // x += α·p̂ + ω·ŝ
            axpy(alpha, &self.p_hat, x);
            axpy(omega, &self.s_hat, x);

            // r = s − ω·t
            for i in 0..n {
                self.r[i] = self.s[i] - omega * self.t[i];
            }

            res_norm = norm2(&self.r);
            log::trace!("BiCGStab iter {}: residual = {:.6e}", iters, res_norm);

            if res_norm < best_norm {
                best_norm = res_norm;
                copy(x, &mut self.x_best);
            }

            if res_norm / initial_norm <= tol {
                return LinSolveResult::converged_at(iters, initial_norm, res_norm);
            }

            if omega.abs() < stag_tol {
                // ω 崩溃：重置影子向量后继续
                copy(&self.r, &mut self.r0);
                rho_old = S::ONE;
                alpha = S::ONE;
                omega = S::ONE;
                self.v.fill(S::ZERO);
                self.p.fill(S::ZERO);
            }
        }

        if best_norm < res_norm {
            copy(&self.x_best, x);
            res_norm = best_norm;
        }
        LinSolveResult::capped(iters, initial_norm, res_norm)
    }

    fn name(&self) -> &'static str {
        "BCGSTB"
    }
}

// ============================================================================
// GMRES(k)
// ============================================================================

/// 右预条件重启 GMRES
///
/// 修正 Gram-Schmidt Arnoldi；Givens 旋转把 Hessenberg 列旋成
/// 上三角并同时给出残差范数上界。重启时由三角系统重构 x 再进入
/// 下一轮。一个重启周期内残差单调不增。
pub struct GmresSolver<S: SolverScalar> {
    tol: f64,
    max_iter: usize,
    restart: usize,
    deadline: Option<Instant>,
    /// Krylov 基（restart+1 个长 n 向量）
    basis: Vec<Vec<S>>,
    /// Hessenberg 列，h[j][i] = H(i, j)
    h: Vec<Vec<S>>,
    cs: Vec<S>,
    sn: Vec<S>,
    g: Vec<S>,
    y: Vec<S>,
    w: Vec<S>,
    z: Vec<S>,
}

impl<S: SolverScalar> GmresSolver<S> {
    /// 创建 GMRES(restart) 求解器
    pub fn new(restart: usize) -> Self {
        Self {
            tol: 1e-6,
            max_iter: 100,
            restart: restart.max(1),
            deadline: None,
            basis: Vec::new(),
            h: Vec::new(),
            cs: Vec::new(),
            sn: Vec::new(),
            g: Vec::new(),
            y: Vec::new(),
            w: Vec::new(),
            z: Vec::new(),
        }
    }

    /// 重启长度
    pub fn restart(&self) -> usize {
        self.restart
    }

    fn ensure_workspace(&mut self, n: usize) {
        let k = self.restart;
        if self.basis.len() != k + 1 || self.basis.first().is_some_and(|v| v.len() != n) {
            self.basis = vec![vec![S::ZERO; n]; k + 1];
            self.h = vec![vec![S::ZERO; k + 1]; k];
            self.cs = vec![S::ZERO; k];
            self.sn = vec![S::ZERO; k];
            self.g = vec![S::ZERO; k + 1];
            self.y = vec![S::ZERO; k];
            self.w = vec![S::ZERO; n];
            self.z = vec![S::ZERO; n];
        }
    }

    /// 由前 m 列的三角系统重构修正量并累加到 x
    fn update_solution(
        &mut self,
        m: usize,
        prec: &dyn PrecApply<S>,
        x: &mut [S],
    ) {
        if m == 0 {
            return;
        }
        // 回代 H(0..m,0..m)·y = g(0..m)
        for i in (0..m).rev() {
            let mut sum = self.g[i];
            for l in (i + 1)..m {
                sum -= self.h[l][i] * self.y[l];
            }
            let hii = self.h[i][i];
            self.y[i] = if hii.abs() > S::MIN_POSITIVE {
                sum / hii
            } else {
                S::ZERO
            };
        }
        // u = Σ y_m·v_m；右预条件下 x += M⁻¹·u
        self.w.fill(S::ZERO);
        for (l, yl) in self.y.iter().take(m).enumerate() {
            axpy(*yl, &self.basis[l], &mut self.w);
        }
        prec.apply(&self.w, &mut self.z);
        axpy(S::ONE, &self.z, x);
    }
}

impl<S: SolverScalar> KrylovSolver<S> for GmresSolver<S> {
    fn set_params(&mut self, tol: f64, max_iter: usize) {
        self.tol = tol;
        self.max_iter = max_iter;
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    fn solve(
        &mut self,
        op: &dyn LinearOperator<S>,
        prec: &dyn PrecApply<S>,
        b: &[S],
        x: &mut [S],
    ) -> LinSolveResult<S> {
        let n = b.len();
        self.ensure_workspace(n);
        let tol = S::from_f64(self.tol).unwrap_or(S::EPSILON);
        let k = self.restart;

        // r = b - A·x
        op.apply(x, &mut self.w);
        residual_from(b, &self.w, &mut self.z);
        let initial_norm = norm2(&self.z);
        if initial_norm < S::MIN_POSITIVE {
            return LinSolveResult::converged_at(0, initial_norm, initial_norm);
        }

        let mut total_iters = 0;
        let mut converged = false;

        'outer: while total_iters < self.max_iter {
            // (重)启动：r = b − A·x
            op.apply(x, &mut self.w);
            residual_from(b, &self.w, &mut self.basis[0]);
            let beta = norm2(&self.basis[0]);

            if beta / initial_norm <= tol {
                converged = true;
                break;
            }

            scale(S::ONE / beta, &mut self.basis[0]);
            self.g.fill(S::ZERO);
            self.g[0] = beta;

            let mut m = 0;
            while m < k && total_iters < self.max_iter {
                if deadline_reached(self.deadline) {
                    self.update_solution(m, prec, x);
                    break 'outer;
                }

                // Arnoldi: w = A·M⁻¹·v_m，修正 Gram-Schmidt 正交化
                prec.apply(&self.basis[m], &mut self.z);
                op.apply(&self.z, &mut self.w);
                for i in 0..=m {
                    let hij = dot(&self.w, &self.basis[i]);
                    self.h[m][i] = hij;
                    axpy(-hij, &self.basis[i], &mut self.w);
                }
                let hnext = norm2(&self.w);

                // 应用既有 Givens 旋转到新列
                for i in 0..m {
                    let h0 = self.h[m][i];
                    let h1 = self.h[m][i + 1];
                    self.h[m][i] = self.cs[i] * h0 + self.sn[i] * h1;
                    self.h[m][i + 1] = -self.sn[i] * h0 + self.cs[i] * h1;
                }

                // 新旋转消去次对角元
                let a = self.h[m][m];
                let denom = (a * a + hnext * hnext).sqrt();
                if denom > S::MIN_POSITIVE {
                    self.cs[m] = a / denom;
                    self.sn[m] = hnext / denom;
                } else {
                    self.cs[m] = S::ONE;
                    self.sn[m] = S::ZERO;
                }
                self.h[m][m] = self.cs[m] * a + self.sn[m] * hnext;
                self.h[m][m + 1] = S::ZERO;

                let gm = self.g[m];
                self.g[m] = self.cs[m] * gm;
                self.g[m + 1] = -self.sn[m] * gm;

                total_iters += 1;
                m += 1;

                let res_bound = self.g[m].abs();
                log::trace!("GMRES iter {}: residual bound = {:.6e}", total_iters, res_bound);

                if res_bound / initial_norm <= tol {
                    converged = true;
                    self.update_solution(m, prec, x);
                    break 'outer;
                }

                if hnext < S::MIN_POSITIVE {
                    // 基向量张成不再扩展：重构后重启
                    break;
                }
                scale(S::ONE / hnext, &mut self.w);
                copy(&self.w, &mut self.basis[m]);
            }

            self.update_solution(m, prec, x);
        }

        // 返回真实残差
        op.apply(x, &mut self.w);
        residual_from(b, &self.w, &mut self.z);
        let res_norm = norm2(&self.z);
        let converged = converged || res_norm / initial_norm <= tol;

        if converged {
            LinSolveResult::converged_at(total_iters, initial_norm, res_norm)
        } else {
            LinSolveResult::capped(total_iters, initial_norm, res_norm)
        }
    }

    fn name(&self) -> &'static str {
        "GMRES"
    }
}

// ============================================================================
// 枚举分发
// ============================================================================

/// 线性求解器枚举包装 - 替代 Box<dyn KrylovSolver>
pub enum AnyKrylovSolver<S: SolverScalar> {
    /// Richardson
    Richardson(RichardsonSolver<S>),
    /// BiCGStab
    BiCgStab(BiCgStabSolver<S>),
    /// 重启 GMRES
    Gmres(GmresSolver<S>),
}

impl<S: SolverScalar> AnyKrylovSolver<S> {
    /// 按配置记号创建；`restart_vecs` 仅 GMRES 使用
    pub fn from_kind(kind: LinearSolverKind, restart_vecs: usize) -> Self {
        match kind {
            LinearSolverKind::Richardson => Self::Richardson(RichardsonSolver::new()),
            LinearSolverKind::BiCgStab => Self::BiCgStab(BiCgStabSolver::new()),
            LinearSolverKind::Gmres => Self::Gmres(GmresSolver::new(restart_vecs)),
        }
    }
}

impl<S: SolverScalar> KrylovSolver<S> for AnyKrylovSolver<S> {
    fn set_params(&mut self, tol: f64, max_iter: usize) {
        match self {
            Self::Richardson(s) => s.set_params(tol, max_iter),
            Self::BiCgStab(s) => s.set_params(tol, max_iter),
            Self::Gmres(s) => s.set_params(tol, max_iter),
        }
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        match self {
            Self::Richardson(s) => s.set_deadline(deadline),
            Self::BiCgStab(s) => s.set_deadline(deadline),
            Self::Gmres(s) => s.set_deadline(deadline),
        }
    }

    fn solve(
        &mut self,
        op: &dyn LinearOperator<S>,
        prec: &dyn PrecApply<S>,
        b: &[S],
        x: &mut [S],
    ) -> LinSolveResult<S> {
        match self {
            Self::Richardson(s) => s.solve(op, prec, b, x),
            Self::BiCgStab(s) => s.solve(op, prec, b, x),
            Self::Gmres(s) => s.solve(op, prec, b, x),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Richardson(s) => s.name(),
            Self::BiCgStab(s) => s.name(),
            Self::Gmres(s) => s.name(),
        }
    }
}
