// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use ndarray::Array2;
use rayon::prelude::*;

use crate::data_vector::DataVector;
use crate::engine::{available_threads, build_pool};
use crate::error::{InversionError, Result};
use crate::record::{ParameterKey, PartialDerivativeRecord, UnknownParameter};
use crate::weighting::WindowWeights;

/// NaN samples found in a partial derivative record. Logged and kept, but
/// assembly continues.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericAnomaly {
    /// Window the record belongs to.
    pub window: usize,
    /// Parameter the record differentiates with respect to.
    pub parameter: ParameterKey,
    /// Number of NaN samples.
    pub nan_samples: usize,
}

/// The assembled, weighted design matrix A.
#[derive(Debug)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    filled: usize,
    required: usize,
    anomalies: Vec<NumericAnomaly>,
}

impl DesignMatrix {
    /// The matrix, rows × unknowns.
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Consume and return the matrix.
    pub fn into_matrix(self) -> Array2<f64> {
        self.matrix
    }

    /// Number of (window, parameter) cells covered by a partial record.
    pub fn filled_cells(&self) -> usize {
        self.filled
    }

    /// Number of (window, parameter) cells that must be covered.
    pub fn required_cells(&self) -> usize {
        self.required
    }

    /// NaN findings collected during assembly.
    pub fn anomalies(&self) -> &[NumericAnomaly] {
        &self.anomalies
    }
}

struct AtomicBitset {
    bits: Box<[AtomicU64]>,
}

impl AtomicBitset {
    fn new(num_bits: usize) -> Self {
        let num_words = num_bits.div_ceil(64);
        let bits: Box<[AtomicU64]> = (0..num_words)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        AtomicBitset { bits }
    }

    /// Set bit `id`; returns true if it was previously clear.
    fn try_set(&self, id: usize) -> bool {
        let word = id / 64;
        let bit = 1u64 << (id % 64);
        let prev = self.bits[word].fetch_or(bit, Ordering::AcqRel);
        (prev & bit) == 0
    }

    fn contains(&self, id: usize) -> bool {
        let word = id / 64;
        let bit = 1u64 << (id % 64);
        (self.bits[word].load(Ordering::Acquire) & bit) != 0
    }
}

/// Row-major matrix of f64 stored as bit patterns so workers can write
/// through a shared reference.
struct AtomicMatrix {
    cells: Box<[AtomicU64]>,
    rows: usize,
    cols: usize,
}

impl AtomicMatrix {
    fn zeros(rows: usize, cols: usize) -> Self {
        let cells: Box<[AtomicU64]> = (0..rows * cols)
            .map(|_| AtomicU64::new(0.0_f64.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        AtomicMatrix { cells, rows, cols }
    }

    fn store(&self, row: usize, col: usize, val: f64) {
        self.cells[row * self.cols + col].store(val.to_bits(), Ordering::Relaxed);
    }

    fn into_array(self) -> Result<Array2<f64>> {
        let data: Vec<f64> = self
            .cells
            .into_vec()
            .into_iter()
            .map(|a| f64::from_bits(a.into_inner()))
            .collect();
        Array2::from_shape_vec((self.rows, self.cols), data)
            .map_err(|e| InversionError::Other(format!("shape error: {}", e)))
    }
}

/// Fills the design matrix from partial derivative records.
///
/// Each record resolves to one (window, parameter) cell block; records are
/// processed in parallel and every block is claimed in a bitset before it is
/// written, so two records can never write the same cells.
pub struct DesignMatrixAssembler<'a> {
    data: &'a DataVector,
    unknowns: &'a [UnknownParameter],
    weights: &'a WindowWeights,
    columns: HashMap<ParameterKey, usize>,
    fill_empty_partial: bool,
    num_threads: Option<usize>,
}

impl<'a> DesignMatrixAssembler<'a> {
    /// Create an assembler over the windows of `data`.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` if there is not one weight per window and
    /// `InputInconsistency` if an unknown parameter is listed twice.
    pub fn new(
        data: &'a DataVector,
        unknowns: &'a [UnknownParameter],
        weights: &'a WindowWeights,
    ) -> Result<Self> {
        if weights.len() != data.num_windows() {
            return Err(InversionError::DimensionMismatch {
                operation: "design matrix weights",
                expected: vec![data.num_windows()],
                got: vec![weights.len()],
            });
        }
        let mut columns = HashMap::with_capacity(unknowns.len());
        for (col, u) in unknowns.iter().enumerate() {
            if columns.insert(u.key, col).is_some() {
                return Err(InversionError::InputInconsistency {
                    context: format!("unknown parameter {} is listed twice", u.key),
                });
            }
        }
        Ok(DesignMatrixAssembler {
            data,
            unknowns,
            weights,
            columns,
            fill_empty_partial: false,
            num_threads: None,
        })
    }

    /// Leave uncovered (window, parameter) cells at zero instead of failing
    /// (builder method). Default is false.
    pub fn with_fill_empty_partial(mut self, fill: bool) -> Self {
        self.fill_empty_partial = fill;
        self
    }

    /// Set the number of worker threads (builder method).
    /// If not specified, defaults to the number of available CPU cores.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Column of `key`, if it is one of the unknowns.
    pub fn column_of(&self, key: &ParameterKey) -> Option<usize> {
        self.columns.get(key).copied()
    }

    /// Build A from `partials`. Records matching no unknown or no window are
    /// skipped.
    ///
    /// # Errors
    /// - `InputInconsistency` if a record's length differs from its window's,
    ///   or two records target the same (window, parameter).
    /// - `MissingData` if cells stay uncovered and empty partials are not
    ///   filled with zeros.
    pub fn assemble(&self, partials: &[PartialDerivativeRecord]) -> Result<DesignMatrix> {
        let rows = self.data.total_rows();
        let cols = self.unknowns.len();
        let num_windows = self.data.num_windows();
        let required = num_windows * cols;

        let cells = AtomicMatrix::zeros(rows, cols);
        let coverage = AtomicBitset::new(required);
        let filled = AtomicUsize::new(0);
        let anomalies = SegQueue::new();

        let pool = build_pool(
            self.num_threads.unwrap_or_else(available_threads),
            "tomo-fill",
        )?;
        pool.install(|| {
            partials.par_iter().try_for_each(|partial| {
                self.fill_one(partial, &cells, &coverage, &filled, &anomalies)
            })
        })?;

        let filled = filled.into_inner();
        if filled < required {
            let missing = required - filled;
            let uncovered = self.uncovered_windows(&coverage);
            if self.fill_empty_partial {
                log::warn!(
                    "{} of {} partial derivatives missing in {} windows; filled with zeros",
                    missing,
                    required,
                    uncovered.len()
                );
            } else {
                for line in &uncovered {
                    log::error!("uncovered window {}", line);
                }
                return Err(InversionError::MissingData {
                    missing,
                    required,
                    uncovered,
                });
            }
        }

        let mut anomalies: Vec<NumericAnomaly> = std::iter::from_fn(|| anomalies.pop()).collect();
        anomalies.sort_by_key(|a| (a.window, self.columns[&a.parameter]));

        Ok(DesignMatrix {
            matrix: cells.into_array()?,
            filled,
            required,
            anomalies,
        })
    }

    fn fill_one(
        &self,
        partial: &PartialDerivativeRecord,
        cells: &AtomicMatrix,
        coverage: &AtomicBitset,
        filled: &AtomicUsize,
        anomalies: &SegQueue<NumericAnomaly>,
    ) -> Result<()> {
        let Some(col) = self.column_of(&partial.parameter) else {
            return Ok(());
        };
        let Some(wi) = self.data.find_window(partial) else {
            return Ok(());
        };
        let window = &self.data.windows()[wi];
        if partial.data.len() != window.npts {
            return Err(InversionError::InputInconsistency {
                context: format!(
                    "partial {} for window {} has {} samples, window has {}",
                    partial.parameter,
                    window,
                    partial.data.len(),
                    window.npts
                ),
            });
        }
        if !coverage.try_set(wi * self.unknowns.len() + col) {
            return Err(InversionError::InputInconsistency {
                context: format!(
                    "more than one partial {} for window {}",
                    partial.parameter, window
                ),
            });
        }

        let nan_samples = partial.data.iter().filter(|v| v.is_nan()).count();
        if nan_samples > 0 {
            log::warn!(
                "numeric anomaly: {} NaN samples in partial {} for window {}",
                nan_samples,
                partial.parameter,
                window
            );
            anomalies.push(NumericAnomaly {
                window: wi,
                parameter: partial.parameter,
                nan_samples,
            });
        }

        let factor = self.weights.as_slice()[wi] * self.unknowns[col].scale;
        for (k, &v) in partial.data.iter().enumerate() {
            cells.store(window.start_row + k, col, v * factor);
        }
        filled.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn uncovered_windows(&self, coverage: &AtomicBitset) -> Vec<String> {
        let cols = self.unknowns.len();
        self.data
            .windows()
            .iter()
            .enumerate()
            .filter_map(|(wi, window)| {
                let missing: Vec<String> = self
                    .unknowns
                    .iter()
                    .enumerate()
                    .filter(|&(col, _)| !coverage.contains(wi * cols + col))
                    .map(|(_, u)| u.key.to_string())
                    .collect();
                if missing.is_empty() {
                    None
                } else {
                    Some(format!(
                        "{}: {} of {} parameters missing [{}]",
                        window,
                        missing.len(),
                        cols,
                        missing.join(", ")
                    ))
                }
            })
            .collect()
    }
}
