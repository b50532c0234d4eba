// crates/af_physics/src/mesh.rs

//! 网格窄接口
//!
//! 驱动器只消费单元数与单元面积；面拓扑由空间离散在其内部使用。
//! 网格在一次求解期间不可变。

use af_runtime::SolverScalar;

/// 驱动器消费的网格视图
pub trait Mesh<S: SolverScalar>: Send + Sync {
    /// 单元数 N
    fn n_cells(&self) -> usize;

    /// 第 i 个单元的面积
    fn area(&self, i: usize) -> S;

    /// 收集所有单元面积（驱动器构造时缓存一次）
    fn collect_areas(&self) -> Vec<S> {
        (0..self.n_cells()).map(|i| self.area(i)).collect()
    }
}

/// 等面积单元网格
///
/// 用于测试与一维简单算例；生产网格由外部 crate 适配本 trait。
#[derive(Debug, Clone)]
pub struct UniformMesh<S: SolverScalar> {
    n_cells: usize,
    cell_area: S,
}

impl<S: SolverScalar> UniformMesh<S> {
    /// 创建 n 个等面积单元
    pub fn new(n_cells: usize, cell_area: S) -> Self {
        Self { n_cells, cell_area }
    }
}

impl<S: SolverScalar> Mesh<S> for UniformMesh<S> {
    #[inline]
    fn n_cells(&self) -> usize {
        self.n_cells
    }

    #[inline]
    fn area(&self, _i: usize) -> S {
        self.cell_area
    }
}
