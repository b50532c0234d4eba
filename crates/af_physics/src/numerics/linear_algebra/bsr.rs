// crates/af_physics/src/numerics/linear_algebra/bsr.rs

//! 固定模式块 CSR（BSR）矩阵
//!
//! 隐式驱动器的雅可比存储格式：逻辑规模 NV×NV，按 V×V 稠密块
//! 压缩存放。生命周期分两个阶段：
//!
//! 1. **开放阶段**：首次装配期间，`set_block` / `add_block` 可以
//!    建立新的非零块位置（每行用 BTreeMap 暂存，列序自然有序）。
//! 2. **冻结阶段**：[`BsrMatrix::freeze_pattern`] 把暂存行编译为
//!    紧凑的 `row_ptr` / `col_idx` / `values` 三数组并缓存对角块
//!    索引；此后对既有槽位写入为覆盖，对缺失槽位写入返回
//!    [`AfError::Structural`]，不再发生任何结构分配。
//!
//! 冻结是幂等的。每个块行必须有对角块（伪时间项加在其上）。

use std::collections::BTreeMap;

use af_runtime::{AfError, AfResult, SolverScalar};
use rayon::prelude::*;

use super::block::{self, Block};

/// 块 CSR 矩阵
#[derive(Debug, Clone)]
pub struct BsrMatrix<S: SolverScalar, const V: usize> {
    n_block_rows: usize,
    /// 开放阶段的行暂存；冻结后为 None
    builder: Option<Vec<BTreeMap<usize, Block<S, V>>>>,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<Block<S, V>>,
    /// 每个块行对角块在 values 中的索引
    diag_idx: Vec<usize>,
}

impl<S: SolverScalar, const V: usize> BsrMatrix<S, V> {
    /// 创建 n×n（块）空矩阵，处于开放阶段
    pub fn new(n_block_rows: usize) -> Self {
        Self {
            n_block_rows,
            builder: Some(vec![BTreeMap::new(); n_block_rows]),
            row_ptr: Vec::new(),
            col_idx: Vec::new(),
            values: Vec::new(),
            diag_idx: Vec::new(),
        }
    }

    /// 块行数 N
    #[inline]
    pub fn n_block_rows(&self) -> usize {
        self.n_block_rows
    }

    /// 标量行数 N·V
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_block_rows * V
    }

    /// 模式是否已冻结
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.builder.is_none()
    }

    /// 非零块数
    pub fn nnz_blocks(&self) -> usize {
        match &self.builder {
            Some(rows) => rows.iter().map(|r| r.len()).sum(),
            None => self.values.len(),
        }
    }

    /// 行指针
    #[inline]
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    /// 列索引
    #[inline]
    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }

    /// 块值
    #[inline]
    pub fn values(&self) -> &[Block<S, V>] {
        &self.values
    }

    /// 可变块值
    #[inline]
    pub fn values_mut(&mut self) -> &mut [Block<S, V>] {
        &mut self.values
    }

    /// 对角块索引缓存
    #[inline]
    pub fn diag_idx(&self) -> &[usize] {
        &self.diag_idx
    }

    /// 查找 (row, col) 块在 values 中的索引（要求已冻结）
    pub fn find_index(&self, row: usize, col: usize) -> Option<usize> {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        match self.col_idx[start..end].binary_search(&col) {
            Ok(local) => Some(start + local),
            Err(_) => None,
        }
    }

    /// 第 row 行的对角块
    #[inline]
    pub fn diag_block(&self, row: usize) -> &Block<S, V> {
        &self.values[self.diag_idx[row]]
    }

    /// 写入块：开放阶段建立槽位；冻结后覆盖既有槽位，
    /// 缺失槽位返回 [`AfError::Structural`]
    pub fn set_block(&mut self, row: usize, col: usize, b: Block<S, V>) -> AfResult<()> {
        debug_assert!(row < self.n_block_rows && col < self.n_block_rows);
        match &mut self.builder {
            Some(rows) => {
                rows[row].insert(col, b);
                Ok(())
            }
            None => match self.find_index(row, col) {
                Some(idx) => {
                    self.values[idx] = b;
                    Ok(())
                }
                None => Err(AfError::structural(row, col)),
            },
        }
    }

    /// 累加块：语义同 [`Self::set_block`]，但做就地相加
    pub fn add_block(&mut self, row: usize, col: usize, b: &Block<S, V>) -> AfResult<()> {
        debug_assert!(row < self.n_block_rows && col < self.n_block_rows);
        match &mut self.builder {
            Some(rows) => {
                let slot = rows[row].entry(col).or_insert_with(block::zero);
                block::add_assign(slot, b);
                Ok(())
            }
            None => match self.find_index(row, col) {
                Some(idx) => {
                    block::add_assign(&mut self.values[idx], b);
                    Ok(())
                }
                None => Err(AfError::structural(row, col)),
            },
        }
    }

    /// 对角块就地累加（伪时间项装配的热路径）
    pub fn update_diag_block(&mut self, row: usize, b: &Block<S, V>) {
        match &mut self.builder {
            Some(rows) => {
                let slot = rows[row].entry(row).or_insert_with(block::zero);
                block::add_assign(slot, b);
            }
            None => {
                block::add_assign(&mut self.values[self.diag_idx[row]], b);
            }
        }
    }

    /// 对每个对角块累加 c(i)·I（伪时间项装配）
    ///
    /// 冻结后按值槽位并行执行；对角索引逐行严格递增，
    /// 用二分判定槽位归属。
    pub fn add_scaled_identity_to_diag(&mut self, c: impl Fn(usize) -> S + Send + Sync) {
        match &mut self.builder {
            Some(rows) => {
                for (i, row) in rows.iter_mut().enumerate() {
                    let slot = row.entry(i).or_insert_with(block::zero);
                    let ci = c(i);
                    for v in 0..V {
                        slot[v][v] += ci;
                    }
                }
            }
            None => {
                let diag_idx = &self.diag_idx;
                self.values
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(idx, b)| {
                        if let Ok(i) = diag_idx.binary_search(&idx) {
                            let ci = c(i);
                            for v in 0..V {
                                b[v][v] += ci;
                            }
                        }
                    });
            }
        }
    }

    /// 全部块值清零，模式保持不变
    pub fn set_all_zero(&mut self) {
        match &mut self.builder {
            Some(rows) => {
                for row in rows.iter_mut() {
                    for b in row.values_mut() {
                        *b = block::zero();
                    }
                }
            }
            None => self.values.fill(block::zero()),
        }
    }

    /// 冻结稀疏模式（幂等）
    ///
    /// 把开放阶段的行暂存编译为紧凑 CSR 数组并缓存对角索引。
    /// 某个块行缺少对角块时返回 [`AfError::Structural`]。
    pub fn freeze_pattern(&mut self) -> AfResult<()> {
        let rows = match self.builder.take() {
            Some(rows) => rows,
            None => return Ok(()),
        };

        let nnz = rows.iter().map(|r| r.len()).sum();
        self.row_ptr = Vec::with_capacity(self.n_block_rows + 1);
        self.col_idx = Vec::with_capacity(nnz);
        self.values = Vec::with_capacity(nnz);
        self.diag_idx = vec![usize::MAX; self.n_block_rows];

        self.row_ptr.push(0);
        for (i, row) in rows.iter().enumerate() {
            for (&col, &b) in row {
                if col == i {
                    self.diag_idx[i] = self.col_idx.len();
                }
                self.col_idx.push(col);
                self.values.push(b);
            }
            self.row_ptr.push(self.col_idx.len());
        }

        if let Some(i) = self.diag_idx.iter().position(|&d| d == usize::MAX) {
            return Err(AfError::structural(i, i));
        }
        Ok(())
    }

    /// 矩阵-向量乘 y = M·x，按块行并行
    ///
    /// 要求模式已冻结（驱动器在首次装配后冻结，再进入内层求解）。
    pub fn apply(&self, x: &[S], y: &mut [S]) {
        assert!(self.is_frozen(), "apply 要求已冻结的稀疏模式");
        assert_eq!(x.len(), self.n_rows());
        assert_eq!(y.len(), self.n_rows());

        let row_ptr = &self.row_ptr;
        let col_idx = &self.col_idx;
        let values = &self.values;

        y.par_chunks_exact_mut(V).enumerate().for_each(|(i, yi)| {
            yi.fill(S::ZERO);
            for idx in row_ptr[i]..row_ptr[i + 1] {
                let col = col_idx[idx];
                block::mat_vec_acc(&values[idx], &x[col * V..(col + 1) * V], yi);
            }
        });
    }

    /// 对角块逆作用: y[i] = diag(i)⁻¹ · x[i]
    ///
    /// 对角块奇异时返回 [`AfError::Numerical`]。
    pub fn diagonal_inverse_apply(&self, x: &[S], y: &mut [S]) -> AfResult<()> {
        assert!(self.is_frozen(), "diagonal_inverse_apply 要求已冻结的稀疏模式");
        assert_eq!(x.len(), self.n_rows());
        assert_eq!(y.len(), self.n_rows());

        for i in 0..self.n_block_rows {
            let inv = block::invert(self.diag_block(i)).ok_or_else(|| {
                AfError::numerical(format!("第 {} 行对角块奇异", i))
            })?;
            block::mat_vec(&inv, &x[i * V..(i + 1) * V], &mut y[i * V..(i + 1) * V]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 三对角测试矩阵：对角 d·I，邻接 o·I
    fn tridiag(n: usize, d: f64, o: f64) -> BsrMatrix<f64, 2> {
        let mut m = BsrMatrix::<f64, 2>::new(n);
        for i in 0..n {
            m.set_block(i, i, block::identity_scaled(d)).unwrap();
            if i > 0 {
                m.set_block(i, i - 1, block::identity_scaled(o)).unwrap();
            }
            if i + 1 < n {
                m.set_block(i, i + 1, block::identity_scaled(o)).unwrap();
            }
        }
        m.freeze_pattern().unwrap();
        m
    }

    #[test]
    fn test_freeze_and_nnz() {
        let m = tridiag(4, 2.0, -1.0);
        assert!(m.is_frozen());
        assert_eq!(m.nnz_blocks(), 10);
        assert_eq!(m.n_rows(), 8);
    }

    #[test]
    fn test_freeze_idempotent() {
        let mut m = tridiag(3, 2.0, -1.0);
        let nnz = m.nnz_blocks();
        m.freeze_pattern().unwrap();
        m.freeze_pattern().unwrap();
        assert_eq!(m.nnz_blocks(), nnz);
    }

    #[test]
    fn test_missing_diagonal_rejected() {
        let mut m = BsrMatrix::<f64, 1>::new(2);
        m.set_block(0, 0, [[1.0]]).unwrap();
        m.set_block(1, 0, [[1.0]]).unwrap();
        let err = m.freeze_pattern().unwrap_err();
        assert!(matches!(err, AfError::Structural { row: 1, col: 1 }));
    }

    #[test]
    fn test_frozen_insert_missing_slot() {
        let mut m = tridiag(4, 2.0, -1.0);
        // (0, 3) 不在三对角模式中
        let err = m.set_block(0, 3, block::identity_scaled(1.0)).unwrap_err();
        assert!(matches!(err, AfError::Structural { row: 0, col: 3 }));
        // 既有槽位覆盖成功
        m.set_block(0, 1, block::identity_scaled(9.0)).unwrap();
        assert_eq!(m.values()[m.find_index(0, 1).unwrap()][0][0], 9.0);
    }

    #[test]
    fn test_set_all_zero_preserves_pattern() {
        let mut m = tridiag(4, 2.0, -1.0);
        let nnz = m.nnz_blocks();
        m.set_all_zero();
        assert_eq!(m.nnz_blocks(), nnz);
        assert!(m.values().iter().all(|b| b.iter().all(|r| r.iter().all(|&v| v == 0.0))));
    }

    #[test]
    fn test_update_diag_block() {
        let mut m = tridiag(3, 2.0, -1.0);
        m.update_diag_block(1, &block::identity_scaled(10.0));
        assert_eq!(m.diag_block(1)[0][0], 12.0);
        assert_eq!(m.diag_block(1)[1][1], 12.0);
    }

    #[test]
    fn test_add_scaled_identity_to_diag() {
        // 冻结前后两条路径结果一致
        let mut open = BsrMatrix::<f64, 2>::new(3);
        let mut frozen = tridiag(3, 2.0, -1.0);
        for i in 0..3 {
            open.set_block(i, i, block::identity_scaled(2.0)).unwrap();
            if i > 0 {
                open.set_block(i, i - 1, block::identity_scaled(-1.0)).unwrap();
            }
            if i + 1 < 3 {
                open.set_block(i, i + 1, block::identity_scaled(-1.0)).unwrap();
            }
        }

        open.add_scaled_identity_to_diag(|i| (i + 1) as f64);
        frozen.add_scaled_identity_to_diag(|i| (i + 1) as f64);
        open.freeze_pattern().unwrap();

        for i in 0..3 {
            let expected = 2.0 + (i + 1) as f64;
            assert_eq!(open.diag_block(i)[0][0], expected);
            assert_eq!(frozen.diag_block(i)[0][0], expected);
            assert_eq!(frozen.diag_block(i)[1][1], expected);
            // 非对角元不受影响
            assert_eq!(frozen.diag_block(i)[0][1], 0.0);
        }
    }

    #[test]
    fn test_apply_tridiagonal() {
        let m = tridiag(3, 2.0, -1.0);
        let x = vec![1.0; 6];
        let mut y = vec![0.0; 6];
        m.apply(&x, &mut y);
        // 内部行: 2 - 1 - 1 = 0；边界行: 2 - 1 = 1
        assert_eq!(&y[0..2], &[1.0, 1.0]);
        assert_eq!(&y[2..4], &[0.0, 0.0]);
        assert_eq!(&y[4..6], &[1.0, 1.0]);
    }

    #[test]
    fn test_apply_linearity() {
        let m = tridiag(5, 3.0, -1.0);
        let n = m.n_rows();
        let x: Vec<f64> = (0..n).map(|i| (i as f64 * 0.7).sin()).collect();
        let y: Vec<f64> = (0..n).map(|i| (i as f64 * 1.3).cos()).collect();
        let (alpha, beta) = (2.5, -0.75);

        let combo: Vec<f64> = x.iter().zip(&y).map(|(&a, &b)| alpha * a + beta * b).collect();
        let mut m_combo = vec![0.0; n];
        m.apply(&combo, &mut m_combo);

        let mut mx = vec![0.0; n];
        let mut my = vec![0.0; n];
        m.apply(&x, &mut mx);
        m.apply(&y, &mut my);

        for i in 0..n {
            let expected = alpha * mx[i] + beta * my[i];
            assert!((m_combo[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_reassembly_preserves_nnz() {
        let mut m = tridiag(6, 2.0, -1.0);
        let nnz_before = m.nnz_blocks();
        // 模拟下一个伪时间步：清零后重新装配同一模式
        m.set_all_zero();
        for i in 0..6 {
            m.set_block(i, i, block::identity_scaled(4.0)).unwrap();
            if i > 0 {
                m.set_block(i, i - 1, block::identity_scaled(-2.0)).unwrap();
            }
            if i + 1 < 6 {
                m.set_block(i, i + 1, block::identity_scaled(-2.0)).unwrap();
            }
        }
        m.freeze_pattern().unwrap();
        assert_eq!(m.nnz_blocks(), nnz_before);
    }

    #[test]
    fn test_diagonal_inverse_apply() {
        let mut m = BsrMatrix::<f64, 2>::new(2);
        m.set_block(0, 0, [[2.0, 0.0], [0.0, 4.0]]).unwrap();
        m.set_block(1, 1, [[0.5, 0.0], [0.0, 0.25]]).unwrap();
        m.freeze_pattern().unwrap();

        let x = vec![1.0; 4];
        let mut y = vec![0.0; 4];
        m.diagonal_inverse_apply(&x, &mut y).unwrap();
        assert_eq!(y, vec![0.5, 0.25, 2.0, 4.0]);
    }

    #[test]
    fn test_diagonal_inverse_singular() {
        let mut m = BsrMatrix::<f64, 2>::new(1);
        m.set_block(0, 0, [[1.0, 2.0], [2.0, 4.0]]).unwrap();
        m.freeze_pattern().unwrap();

        let x = vec![1.0; 2];
        let mut y = vec![0.0; 2];
        assert!(m.diagonal_inverse_apply(&x, &mut y).unwrap_err().is_numerical());
    }
}
