// crates/af_physics/tests/tvd_rk.rs

//! TVD-RK 非定常驱动器测试
//!
//! 稳定性多项式、收敛阶与一维线性对流算例。对流测试把解与
//! 半离散系统（迎风差分 ODE 组）的解析解对照，而不是 PDE 的
//! 精确解：时间积分层的精度由此与空间离散误差解耦。

use af_physics::{AfError, BsrMatrix, CellField, Mesh, SpatialScheme, TvdRkSolver, UniformMesh};
use af_runtime::AfResult;

// ============================================================
// 测试用空间离散
// ============================================================

/// 指数衰减 du/dt = λ·u：R = −λ·u·area，局部时间步为常数
#[derive(Debug)]
struct DecaySpatial {
    mesh: UniformMesh<f64>,
    lambda: f64,
    dt: f64,
}

impl SpatialScheme<f64, 1> for DecaySpatial {
    type M = UniformMesh<f64>;

    fn mesh(&self) -> &UniformMesh<f64> {
        &self.mesh
    }

    fn compute_residual(
        &self,
        u: &CellField<f64, 1>,
        residual: &mut CellField<f64, 1>,
        dt: Option<&mut [f64]>,
    ) -> AfResult<()> {
        for i in 0..u.n_cells() {
            residual[(i, 0)] = -self.lambda * u[(i, 0)] * self.mesh.area(i);
        }
        if let Some(dt) = dt {
            dt.fill(self.dt);
        }
        Ok(())
    }

    fn compute_jacobian(
        &self,
        _u: &CellField<f64, 1>,
        _mat: &mut BsrMatrix<f64, 1>,
    ) -> AfResult<()> {
        Ok(())
    }
}

/// 一维周期迎风对流: R_j = a·(u_j − u_{j−1})，稳定步含对流 CFL
struct AdvectionSpatial {
    mesh: UniformMesh<f64>,
    speed: f64,
    dx: f64,
    courant: f64,
}

impl SpatialScheme<f64, 1> for AdvectionSpatial {
    type M = UniformMesh<f64>;

    fn mesh(&self) -> &UniformMesh<f64> {
        &self.mesh
    }

    fn compute_residual(
        &self,
        u: &CellField<f64, 1>,
        residual: &mut CellField<f64, 1>,
        dt: Option<&mut [f64]>,
    ) -> AfResult<()> {
        let n = u.n_cells();
        for j in 0..n {
            let prev = if j == 0 { n - 1 } else { j - 1 };
            residual[(j, 0)] = self.speed * (u[(j, 0)] - u[(prev, 0)]);
        }
        if let Some(dt) = dt {
            dt.fill(self.courant * self.dx / self.speed);
        }
        Ok(())
    }

    fn compute_jacobian(
        &self,
        _u: &CellField<f64, 1>,
        _mat: &mut BsrMatrix<f64, 1>,
    ) -> AfResult<()> {
        Ok(())
    }
}

// ============================================================
// 稳定性多项式（性质检验）
// ============================================================

/// 阶数 k 的单步应精确复现稳定性多项式 P_k(z)
#[test]
fn single_step_reproduces_stability_polynomial() {
    let lambda = -2.0;
    let h = 0.3;
    let z: f64 = lambda * h;

    let expected = [
        1.0 + z,
        1.0 + z + z * z / 2.0,
        1.0 + z + z * z / 2.0 + z * z * z / 6.0,
    ];

    for order in 1..=3usize {
        let spatial = DecaySpatial {
            mesh: UniformMesh::new(1, 1.0),
            lambda,
            dt: 1.0,
        };
        // dtmin = 1, cfl = h：单步有效步长 h；物理时间按 dtmin 推进，
        // finaltime = 0.5 恰好执行一步
        let mut solver = TvdRkSolver::new(&spatial, order, h).unwrap();
        let mut u = CellField::<f64, 1>::from_fn(1, |_, _| 1.0);
        let report = solver.solve(&mut u, 0.5).unwrap();

        assert_eq!(report.steps, 1);
        assert!(
            (u[(0, 0)] - expected[order - 1]).abs() < 1e-14,
            "阶数 {}: {} vs {}",
            order,
            u[(0, 0)],
            expected[order - 1]
        );
    }
}

#[test]
fn rk3_third_order_convergence() {
    // du/dt = -u 到 t=1；误差比应接近 2³ = 8
    let exact = (-1.0f64).exp();
    let mut errors = Vec::new();

    for &dt in &[0.1, 0.05] {
        let spatial = DecaySpatial {
            mesh: UniformMesh::new(1, 1.0),
            lambda: -1.0,
            dt,
        };
        let mut solver = TvdRkSolver::new(&spatial, 3, 1.0).unwrap();
        let mut u = CellField::<f64, 1>::from_fn(1, |_, _| 1.0);
        solver.solve(&mut u, 1.0).unwrap();
        errors.push((u[(0, 0)] - exact).abs());
    }

    let ratio = errors[0] / errors[1];
    assert!(ratio > 6.0, "期望比值 ~8, 实际 {}", ratio);
}

#[test]
fn step_count_respects_final_time_guard() {
    let spatial = DecaySpatial {
        mesh: UniformMesh::new(4, 1.0),
        lambda: -1.0,
        dt: 0.1,
    };
    let mut solver = TvdRkSolver::new(&spatial, 2, 1.0).unwrap();
    let mut u = CellField::<f64, 1>::from_fn(4, |_, _| 1.0);
    let report = solver.solve(&mut u, 1.0).unwrap();

    // 10 步后 time = 1.0 ≥ finaltime − ε，不应执行第 11 步
    assert_eq!(report.steps, 10);
    assert!((report.time - 1.0).abs() < 1e-12);
}

// ============================================================
// 一维线性对流（端到端算例）
// ============================================================

#[test]
fn linear_advection_rk2_matches_semidiscrete_solution() {
    let n = 100;
    let dx = 1.0 / n as f64;
    let speed = 1.0;
    let courant = 0.5;
    let finaltime = 1.0;

    let spatial = AdvectionSpatial {
        mesh: UniformMesh::new(n, dx),
        speed,
        dx,
        courant,
    };

    let x = |j: usize| (j as f64 + 0.5) * dx;
    let k = 2.0 * std::f64::consts::PI;

    let mut u = CellField::<f64, 1>::from_fn(n, |j, _| (k * x(j)).sin());
    let mut solver = TvdRkSolver::new(&spatial, 2, 1.0).unwrap();
    let report = solver.solve(&mut u, finaltime).unwrap();

    // 周期迎风半离散系统对模 e^{ikx} 的精确解：
    // 衰减 exp(−(a/dx)(1−cos(k·dx))·t)，相移 (a/dx)·sin(k·dx)·t
    let t = report.time;
    let decay = (-(speed / dx) * (1.0 - (k * dx).cos()) * t).exp();
    let phase = (speed / dx) * (k * dx).sin() * t;

    let mut err2 = 0.0;
    for j in 0..n {
        let exact = decay * (k * x(j) - phase).sin();
        let diff = u[(j, 0)] - exact;
        err2 += diff * diff * dx;
    }
    let l2_error = err2.sqrt();

    assert!(l2_error <= 1e-2, "L2 误差 {:.3e} 超出界限", l2_error);
    // 确认确实发生了积分（非平凡运行）
    assert_eq!(report.steps, 200);
    assert!((report.time - finaltime).abs() < 1e-9);
}

// ============================================================
// 构造期校验
// ============================================================

#[test]
fn order_four_is_rejected_at_construction() {
    let spatial = DecaySpatial {
        mesh: UniformMesh::new(1, 1.0),
        lambda: -1.0,
        dt: 0.1,
    };
    let err = TvdRkSolver::new(&spatial, 4, 0.5).unwrap_err();
    assert!(matches!(err, AfError::Config { .. }));
}

#[test]
fn nonpositive_cfl_rejected() {
    let spatial = DecaySpatial {
        mesh: UniformMesh::new(1, 1.0),
        lambda: -1.0,
        dt: 0.1,
    };
    assert!(TvdRkSolver::new(&spatial, 2, 0.0).is_err());
    assert!(TvdRkSolver::new(&spatial, 2, f64::NAN).is_err());
}
