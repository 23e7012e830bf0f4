// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::ops::Range;

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;

use crate::error::{InversionError, Result};

/// Output rows of AᵗA handled by one work unit inside a row block.
const ATA_ROW_GROUP: usize = 8;

/// Work units per worker when an output is split by rows.
const UNITS_PER_THREAD: usize = 4;

/// Memory allowed for the partial results of one wave of row blocks.
const PARTIAL_BUDGET_BYTES: usize = 256 << 20;

/// Most row blocks reduced together in one wave.
const MAX_WAVE: usize = 64;

/// Dense linear algebra on a fixed-size worker pool.
///
/// `transpose`, `multiply` and `operate` split their output into contiguous
/// row blocks, one per work unit, so writes never overlap. AᵗA and Aᵗd reduce
/// over A instead: A is cut into blocks of `reduce_rows` rows, each block
/// yields a partial result, and the partials are summed in block order.
/// Block boundaries depend only on `reduce_rows`, never on the pool size, so
/// results are bitwise identical for any number of threads.
#[derive(Debug, Clone)]
pub struct MatrixEngine {
    num_threads: Option<usize>,
    block_rows: usize,
    reduce_rows: usize,
}

impl Default for MatrixEngine {
    fn default() -> Self {
        MatrixEngine::new()
    }
}

impl MatrixEngine {
    /// Create an engine sized to the available hardware concurrency.
    pub fn new() -> Self {
        MatrixEngine {
            num_threads: None,
            block_rows: 64,
            reduce_rows: 1024,
        }
    }

    /// Set the number of worker threads (builder method).
    /// If not specified, defaults to the number of available CPU cores.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set the largest number of output rows per work unit (builder method).
    /// Default is 64. Smaller outputs are split further so every worker gets
    /// several units. Values below 1 are raised to 1.
    pub fn with_block_rows(mut self, block_rows: usize) -> Self {
        self.block_rows = block_rows.max(1);
        self
    }

    /// Set the number of rows of A per reduction block of AᵗA and Aᵗd
    /// (builder method). Default is 1024. Values below 1 are raised to 1.
    pub fn with_reduce_rows(mut self, reduce_rows: usize) -> Self {
        self.reduce_rows = reduce_rows.max(1);
        self
    }

    /// Number of worker threads this engine runs on.
    pub fn num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(available_threads)
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        build_pool(self.num_threads(), "tomo-engine")
    }

    /// Output rows per work unit for an output of `rows` rows on `threads`
    /// workers.
    fn unit_rows(&self, rows: usize, threads: usize) -> usize {
        self.block_rows
            .min(rows.div_ceil(threads * UNITS_PER_THREAD))
            .max(1)
    }

    /// Run `kernel` over `out` split into row blocks of `width` values per
    /// row. The kernel receives the index of the block's first row.
    /// Fails if any block holds a non-finite value afterwards.
    fn run_blocks<F>(
        &self,
        operation: &'static str,
        out: &mut [f64],
        width: usize,
        kernel: F,
    ) -> Result<()>
    where
        F: Fn(usize, &mut [f64]) + Sync,
    {
        if out.is_empty() {
            return Ok(());
        }
        let pool = self.pool()?;
        let rows = out.len() / width;
        let block = self.unit_rows(rows, pool.current_num_threads());
        log::debug!(
            "{}: {} rows in blocks of {} on {} threads",
            operation,
            rows,
            block,
            pool.current_num_threads()
        );
        pool.install(|| {
            out.par_chunks_mut(block * width)
                .enumerate()
                .try_for_each(|(bi, chunk)| {
                    let first_row = bi * block;
                    kernel(first_row, chunk);
                    match chunk.iter().position(|v| !v.is_finite()) {
                        Some(p) => Err(InversionError::NonFiniteResult {
                            operation,
                            row: first_row + p / width,
                        }),
                        None => Ok(()),
                    }
                })
        })
    }

    /// Sum `kernel` over blocks of `reduce_rows` input rows out of `rows`.
    ///
    /// Each block accumulates into its own zeroed partial of `len` values.
    /// Blocks run in parallel in waves and the partials of a wave are added
    /// to the result in block order. Fails if the result holds a non-finite
    /// value; `width` converts its position into an output row.
    fn reduce_row_blocks<F>(
        &self,
        operation: &'static str,
        rows: usize,
        len: usize,
        width: usize,
        kernel: F,
    ) -> Result<Vec<f64>>
    where
        F: Fn(Range<usize>, &mut [f64]) + Sync,
    {
        let mut acc = vec![0.0; len];
        if rows == 0 || len == 0 {
            return Ok(acc);
        }
        let pool = self.pool()?;
        let block = self.reduce_rows;
        let starts: Vec<usize> = (0..rows).step_by(block).collect();
        let wave = (PARTIAL_BUDGET_BYTES / (len * std::mem::size_of::<f64>())).clamp(1, MAX_WAVE);
        log::debug!(
            "{}: {} row blocks of {} in waves of {} on {} threads",
            operation,
            starts.len(),
            block,
            wave,
            pool.current_num_threads()
        );
        pool.install(|| {
            for group in starts.chunks(wave) {
                let partials: Vec<Vec<f64>> = group
                    .par_iter()
                    .map(|&start| {
                        let mut partial = vec![0.0; len];
                        kernel(start..(start + block).min(rows), &mut partial);
                        partial
                    })
                    .collect();
                for partial in &partials {
                    for (a, p) in acc.iter_mut().zip(partial) {
                        *a += p;
                    }
                }
            }
        });
        match acc.iter().position(|v| !v.is_finite()) {
            Some(p) => Err(InversionError::NonFiniteResult {
                operation,
                row: p / width,
            }),
            None => Ok(acc),
        }
    }

    /// Transpose `a`.
    pub fn transpose(&self, a: &Array2<f64>) -> Result<Array2<f64>> {
        let (m, n) = a.dim();
        let a = a.as_standard_layout();
        let a_s = row_major(&a)?;
        let mut out = vec![0.0; m * n];
        self.run_blocks("transpose", &mut out, m, |first, chunk| {
            for (local, out_row) in chunk.chunks_mut(m).enumerate() {
                let j = first + local;
                for (r, v) in out_row.iter_mut().enumerate() {
                    *v = a_s[r * n + j];
                }
            }
        })?;
        to_matrix((n, m), out)
    }

    /// Matrix product `a · b`.
    pub fn multiply(&self, a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
        let (m, k) = a.dim();
        let (kb, n) = b.dim();
        if k != kb {
            return Err(InversionError::DimensionMismatch {
                operation: "multiply",
                expected: vec![k, n],
                got: vec![kb, n],
            });
        }
        let a = a.as_standard_layout();
        let b = b.as_standard_layout();
        let a_s = row_major(&a)?;
        let b_s = row_major(&b)?;
        let mut out = vec![0.0; m * n];
        self.run_blocks("multiply", &mut out, n, |first, chunk| {
            for (local, c_row) in chunk.chunks_mut(n).enumerate() {
                let a_row = &a_s[(first + local) * k..(first + local + 1) * k];
                for (p, &aip) in a_row.iter().enumerate() {
                    let b_row = &b_s[p * n..(p + 1) * n];
                    for (c, &bv) in c_row.iter_mut().zip(b_row) {
                        *c += aip * bv;
                    }
                }
            }
        })?;
        to_matrix((m, n), out)
    }

    /// Matrix-vector product `a · x`.
    pub fn operate(&self, a: &Array2<f64>, x: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        let (m, n) = a.dim();
        if x.len() != n {
            return Err(InversionError::DimensionMismatch {
                operation: "operate",
                expected: vec![n],
                got: vec![x.len()],
            });
        }
        let a = a.as_standard_layout();
        let x = x.as_standard_layout();
        let a_s = row_major(&a)?;
        let x_s = contiguous(&x)?;
        let mut out = vec![0.0; m];
        self.run_blocks("operate", &mut out, 1, |first, chunk| {
            for (local, y) in chunk.iter_mut().enumerate() {
                let row = &a_s[(first + local) * n..(first + local + 1) * n];
                *y = row.iter().zip(x_s).map(|(p, q)| p * q).sum();
            }
        })?;
        Ok(Array1::from_vec(out))
    }

    /// Row-vector product `vᵗ · a`, i.e. `aᵗ · v`.
    pub fn pre_multiply(&self, v: ArrayView1<'_, f64>, a: &Array2<f64>) -> Result<Array1<f64>> {
        let (m, n) = a.dim();
        if v.len() != m {
            return Err(InversionError::DimensionMismatch {
                operation: "pre_multiply",
                expected: vec![m],
                got: vec![v.len()],
            });
        }
        let a = a.as_standard_layout();
        let v = v.as_standard_layout();
        let a_s = row_major(&a)?;
        let v_s = contiguous(&v)?;
        let out = self.reduce_row_blocks("pre_multiply", m, n, 1, |rows, partial| {
            for r in rows {
                let vr = v_s[r];
                let a_row = &a_s[r * n..(r + 1) * n];
                for (y, &av) in partial.iter_mut().zip(a_row) {
                    *y += vr * av;
                }
            }
        })?;
        Ok(Array1::from_vec(out))
    }

    /// Compute `aᵗ · a`.
    ///
    /// Only the upper triangle is accumulated; the lower one is mirrored
    /// afterwards, so the result is exactly symmetric.
    pub fn compute_ata(&self, a: &Array2<f64>) -> Result<Array2<f64>> {
        let (m, n) = a.dim();
        let a = a.as_standard_layout();
        let a_s = row_major(&a)?;
        let mut out = self.reduce_row_blocks("compute_ata", m, n * n, n, |rows, partial| {
            partial
                .par_chunks_mut(ATA_ROW_GROUP * n)
                .enumerate()
                .for_each(|(g, chunk)| {
                    let first = g * ATA_ROW_GROUP;
                    for r in rows.clone() {
                        let a_row = &a_s[r * n..(r + 1) * n];
                        for (local, out_row) in chunk.chunks_mut(n).enumerate() {
                            let i = first + local;
                            let ai = a_row[i];
                            // a non-finite entry still reaches its own diagonal term
                            if ai == 0.0 {
                                continue;
                            }
                            for j in i..n {
                                out_row[j] += ai * a_row[j];
                            }
                        }
                    }
                });
        })?;
        for i in 1..n {
            for j in 0..i {
                out[i * n + j] = out[j * n + i];
            }
        }
        to_matrix((n, n), out)
    }

    /// Compute `aᵗ · d`.
    pub fn compute_atd(&self, a: &Array2<f64>, d: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        self.pre_multiply(d, a)
    }
}

/// Hardware concurrency, or 1 if it cannot be queried.
pub(crate) fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Build a worker pool of exactly `threads` threads.
pub(crate) fn build_pool(threads: usize, name: &'static str) -> Result<rayon::ThreadPool> {
    if threads == 0 {
        return Err(InversionError::InvalidThreadCount(threads));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{}-{}", name, i))
        .build()
        .map_err(|e| InversionError::Other(e.to_string()))
}

fn row_major<'a>(a: &'a ndarray::CowArray<'_, f64, ndarray::Ix2>) -> Result<&'a [f64]> {
    a.as_slice()
        .ok_or_else(|| InversionError::Other("matrix is not in row-major layout".to_string()))
}

fn contiguous<'a>(v: &'a ndarray::CowArray<'_, f64, ndarray::Ix1>) -> Result<&'a [f64]> {
    v.as_slice()
        .ok_or_else(|| InversionError::Other("vector is not contiguous".to_string()))
}

fn to_matrix(shape: (usize, usize), data: Vec<f64>) -> Result<Array2<f64>> {
    Array2::from_shape_vec(shape, data)
        .map_err(|e| InversionError::Other(format!("shape error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pseudo_random(m: usize, n: usize, seed: u64) -> Array2<f64> {
        let mut state = seed;
        Array2::from_shape_fn((m, n), |_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 11) as f64 / (1u64 << 53) as f64) - 0.5
        })
    }

    fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn multiply_small() {
        let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let b = array![[1.0, 0.0, 2.0], [0.0, 1.0, 3.0]];
        let c = MatrixEngine::new().with_threads(2).multiply(&a, &b).unwrap();
        assert_eq!(c, a.dot(&b));
    }

    #[test]
    fn multiply_dimension_mismatch() {
        let a = Array2::<f64>::zeros((3, 2));
        let b = Array2::<f64>::zeros((3, 2));
        let result = MatrixEngine::new().with_threads(1).multiply(&a, &b);
        assert!(matches!(
            result,
            Err(InversionError::DimensionMismatch {
                operation: "multiply",
                ..
            })
        ));
    }

    #[test]
    fn transpose_matches_ndarray() {
        let a = pseudo_random(37, 5, 1);
        let t = MatrixEngine::new()
            .with_threads(3)
            .with_block_rows(2)
            .transpose(&a)
            .unwrap();
        assert_eq!(t, a.t().to_owned());
    }

    #[test]
    fn operate_and_pre_multiply() {
        let a = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let engine = MatrixEngine::new().with_threads(2).with_block_rows(1);
        let y = engine.operate(&a, array![1.0, -1.0].view()).unwrap();
        assert_eq!(y, array![-1.0, -1.0, -1.0]);
        let z = engine.pre_multiply(array![1.0, 0.0, 2.0].view(), &a).unwrap();
        assert_eq!(z, array![11.0, 14.0]);
    }

    #[test]
    fn operate_dimension_mismatch() {
        let a = Array2::<f64>::zeros((3, 2));
        let result = MatrixEngine::new()
            .with_threads(1)
            .operate(&a, array![1.0, 2.0, 3.0].view());
        assert!(matches!(
            result,
            Err(InversionError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn ata_matches_reference_and_is_symmetric() {
        let a = pseudo_random(513, 19, 7);
        let ata = MatrixEngine::new().with_threads(4).compute_ata(&a).unwrap();
        let reference = a.t().dot(&a);
        assert!(max_abs_diff(&ata, &reference) < 1e-10);
        for i in 0..19 {
            for j in 0..19 {
                assert_eq!(ata[[i, j]], ata[[j, i]]);
            }
        }
    }

    #[test]
    fn ata_independent_of_pool_size() {
        let a = pseudo_random(1000, 23, 42);
        let d = Array1::from_shape_fn(1000, |i| (i as f64 * 0.37).cos());
        let engine = |threads| {
            MatrixEngine::new()
                .with_threads(threads)
                .with_reduce_rows(64)
        };
        let reference = engine(1).compute_ata(&a).unwrap();
        let atd_reference = engine(1).compute_atd(&a, d.view()).unwrap();
        for threads in [2, 8] {
            assert_eq!(
                engine(threads).compute_ata(&a).unwrap(),
                reference,
                "threads={} diverged",
                threads
            );
            assert_eq!(engine(threads).compute_atd(&a, d.view()).unwrap(), atd_reference);
        }
    }

    #[test]
    fn reduce_rows_only_change_rounding() {
        let a = pseudo_random(700, 13, 5);
        let reference = a.t().dot(&a);
        for reduce_rows in [1, 7, 700, 5000] {
            let ata = MatrixEngine::new()
                .with_threads(3)
                .with_reduce_rows(reduce_rows)
                .compute_ata(&a)
                .unwrap();
            assert!(max_abs_diff(&ata, &reference) < 1e-10);
        }
    }

    #[test]
    fn tall_reductions_spread_over_pool() {
        let engine = MatrixEngine::new().with_threads(8).with_reduce_rows(1024);
        let rows = 100_000;
        let units = AtomicUsize::new(0);
        let out = engine
            .reduce_row_blocks("count", rows, 100, 1, |range, partial| {
                units.fetch_add(1, Ordering::Relaxed);
                partial[0] += range.len() as f64;
            })
            .unwrap();
        assert_eq!(out[0], rows as f64);
        assert_eq!(units.into_inner(), rows.div_ceil(1024));
        assert!(rows.div_ceil(1024) > 2 * 8);
    }

    #[test]
    fn short_outputs_split_across_workers() {
        let engine = MatrixEngine::new().with_threads(8);
        let block = engine.unit_rows(100, 8);
        assert!(100usize.div_ceil(block) >= 2 * 8);
        assert_eq!(engine.unit_rows(1_000_000, 8), 64);
        assert_eq!(engine.unit_rows(3, 8), 1);
    }

    #[test]
    fn zero_factor_does_not_hide_nan() {
        let engine = MatrixEngine::new().with_threads(2);
        let a = array![[0.0, 1.0], [1.0, 1.0]];
        let b = array![[f64::NAN, 1.0], [1.0, 1.0]];
        assert!(matches!(
            engine.multiply(&a, &b),
            Err(InversionError::NonFiniteResult {
                operation: "multiply",
                row: 0,
            })
        ));
        let c = array![[f64::INFINITY, 1.0], [1.0, 1.0]];
        assert!(matches!(
            engine.pre_multiply(array![0.0, 1.0].view(), &c),
            Err(InversionError::NonFiniteResult {
                operation: "pre_multiply",
                ..
            })
        ));
        let mut tall = Array2::<f64>::ones((50, 4));
        tall[[30, 2]] = f64::NAN;
        assert!(matches!(
            engine.compute_ata(&tall),
            Err(InversionError::NonFiniteResult {
                operation: "compute_ata",
                row: 0,
            })
        ));
    }

    #[test]
    fn atd_matches_transpose_operate() {
        let a = pseudo_random(200, 7, 3);
        let d = Array1::from_shape_fn(200, |i| (i as f64).sin());
        let engine = MatrixEngine::new().with_threads(3);
        let atd = engine.compute_atd(&a, d.view()).unwrap();
        let reference = a.t().dot(&d);
        for (x, y) in atd.iter().zip(reference.iter()) {
            assert!((x - y).abs() < 1e-10);
        }
    }

    #[test]
    fn non_finite_aborts() {
        let mut a = Array2::<f64>::ones((10, 3));
        a[[4, 1]] = f64::NAN;
        let result = MatrixEngine::new().with_threads(2).compute_ata(&a);
        assert!(matches!(
            result,
            Err(InversionError::NonFiniteResult {
                operation: "compute_ata",
                ..
            })
        ));
    }

    #[test]
    fn zero_threads_rejected() {
        let a = Array2::<f64>::ones((2, 2));
        let result = MatrixEngine::new().with_threads(0).compute_ata(&a);
        assert!(matches!(result, Err(InversionError::InvalidThreadCount(0))));
    }

    #[test]
    fn empty_matrix() {
        let a = Array2::<f64>::zeros((0, 3));
        let ata = MatrixEngine::new().with_threads(2).compute_ata(&a).unwrap();
        assert_eq!(ata, Array2::<f64>::zeros((3, 3)));
    }

    #[test]
    fn fortran_layout_input() {
        let a = pseudo_random(20, 4, 9);
        let f = a.t().to_owned().reversed_axes();
        let engine = MatrixEngine::new().with_threads(2);
        assert!(max_abs_diff(&engine.compute_ata(&f).unwrap(), &a.t().dot(&a)) < 1e-12);
    }
}
