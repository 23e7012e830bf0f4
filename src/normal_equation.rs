// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::{Mutex, OnceLock};

use ndarray::{Array1, Array2, ArrayView1};

use crate::data_vector::DataVector;
use crate::design_matrix::{DesignMatrixAssembler, NumericAnomaly};
use crate::engine::MatrixEngine;
use crate::error::{InversionError, Result};
use crate::record::{PartialDerivativeRecord, UnknownParameter, WaveformRecord};
use crate::weighting::{WeightAssigner, WeightConfig, WindowWeights};

/// Compute-once cell. The first caller runs the initializer while holding
/// the lock; later callers either wait on it or read the stored value.
struct Memo<T> {
    cell: OnceLock<T>,
    lock: Mutex<()>,
}

impl<T> Memo<T> {
    fn new() -> Self {
        Memo {
            cell: OnceLock::new(),
            lock: Mutex::new(()),
        }
    }

    fn preset(value: T) -> Self {
        let memo = Memo::new();
        let _ = memo.cell.set(value);
        memo
    }

    fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    fn get_or_try_init<F>(&self, init: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(v) = self.cell.get() {
            return Ok(v);
        }
        // The guard protects no data, so a poisoned lock is still usable.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(v) = self.cell.get() {
            return Ok(v);
        }
        let value = init()?;
        Ok(self.cell.get_or_init(|| value))
    }
}

/// Configures and runs the assembly of [`NormalEquation`].
pub struct NormalEquationBuilder {
    unknowns: Vec<UnknownParameter>,
    weighting: WeightConfig,
    fill_empty_partial: bool,
    engine: MatrixEngine,
    precomputed_ata: Option<Array2<f64>>,
}

impl NormalEquationBuilder {
    /// Weighting options (builder method). Default weights every window by one.
    pub fn with_weighting(mut self, config: WeightConfig) -> Self {
        self.weighting = config;
        self
    }

    /// Zero-fill missing partial derivatives instead of failing (builder method).
    pub fn with_fill_empty_partial(mut self, fill: bool) -> Self {
        self.fill_empty_partial = fill;
        self
    }

    /// Engine used for the design matrix fill and AᵗA / Aᵗd (builder method).
    pub fn with_engine(mut self, engine: MatrixEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Reuse an AᵗA computed earlier instead of recomputing it (builder method).
    pub fn with_precomputed_ata(mut self, ata: Array2<f64>) -> Self {
        self.precomputed_ata = Some(ata);
        self
    }

    /// Assemble A, d and the derived scalars from waveform and partial records.
    ///
    /// # Errors
    /// Propagates every fatal error of the data vector and design matrix
    /// assembly. Returns `InputInconsistency` if no time window could be
    /// formed or a precomputed AᵗA does not match the unknowns.
    pub fn build(
        self,
        records: &[WaveformRecord],
        partials: &[PartialDerivativeRecord],
    ) -> Result<NormalEquation> {
        let n = self.unknowns.len();
        if let Some(ata) = &self.precomputed_ata {
            let (rows, cols) = ata.dim();
            if rows != cols || rows != n {
                return Err(InversionError::InputInconsistency {
                    context: format!(
                        "precomputed AtA is {}x{} but there are {} unknowns",
                        rows, cols, n
                    ),
                });
            }
        }

        let data = DataVector::new(records)?;
        if data.num_windows() == 0 {
            return Err(InversionError::InputInconsistency {
                context: "no time windows could be formed".to_string(),
            });
        }
        let weights = WeightAssigner::new(self.weighting)
            .with_threads(self.engine.num_threads())
            .assign(&data)?;
        let design = DesignMatrixAssembler::new(&data, &self.unknowns, &weights)?
            .with_fill_empty_partial(self.fill_empty_partial)
            .with_threads(self.engine.num_threads())
            .assemble(partials)?;
        let anomalies = design.anomalies().to_vec();
        let missing_partials = design.required_cells() - design.filled_cells();
        let a = design.into_matrix();

        let d = data.build_weighted_d(weights.as_slice())?;
        let weighted_obs = data.weighted_obs(weights.as_slice())?;
        let d_norm = d.dot(&d).sqrt();
        let obs_norm = weighted_obs.dot(&weighted_obs).sqrt();
        let variance = (d_norm * d_norm) / (obs_norm * obs_norm);
        log::info!(
            "A is {}x{}; |d| = {:.6e}, |obs| = {:.6e}, normalized variance = {:.6}",
            a.nrows(),
            a.ncols(),
            d_norm,
            obs_norm,
            variance
        );

        let ata = match self.precomputed_ata {
            Some(ata) => Memo::preset(ata),
            None => Memo::new(),
        };

        Ok(NormalEquation {
            data,
            weights,
            unknowns: self.unknowns,
            a,
            d,
            weighted_obs,
            d_norm,
            obs_norm,
            variance,
            anomalies,
            missing_partials,
            engine: self.engine,
            ata,
            atd: Memo::new(),
        })
    }
}

/// The weighted linear system Am = d and its normal-equation products.
///
/// AᵗA and Aᵗd are computed on first request and cached; concurrent callers
/// share one computation.
pub struct NormalEquation {
    data: DataVector,
    weights: WindowWeights,
    unknowns: Vec<UnknownParameter>,
    a: Array2<f64>,
    d: Array1<f64>,
    weighted_obs: Array1<f64>,
    d_norm: f64,
    obs_norm: f64,
    variance: f64,
    anomalies: Vec<NumericAnomaly>,
    missing_partials: usize,
    engine: MatrixEngine,
    ata: Memo<Array2<f64>>,
    atd: Memo<Array1<f64>>,
}

impl NormalEquation {
    /// Start configuring an assembly over `unknowns`.
    pub fn builder(unknowns: Vec<UnknownParameter>) -> NormalEquationBuilder {
        NormalEquationBuilder {
            unknowns,
            weighting: WeightConfig::default(),
            fill_empty_partial: false,
            engine: MatrixEngine::new(),
            precomputed_ata: None,
        }
    }

    /// AᵗA, computed on first call.
    pub fn ata(&self) -> Result<&Array2<f64>> {
        self.ata.get_or_try_init(|| self.engine.compute_ata(&self.a))
    }

    /// Aᵗd, computed on first call.
    pub fn atd(&self) -> Result<&Array1<f64>> {
        self.atd
            .get_or_try_init(|| self.engine.compute_atd(&self.a, self.d.view()))
    }

    /// Whether AᵗA is already available without computation.
    pub fn ata_is_cached(&self) -> bool {
        self.ata.get().is_some()
    }

    /// The data vector the system was built from.
    pub fn data_vector(&self) -> &DataVector {
        &self.data
    }

    /// Per-window weights.
    pub fn weights(&self) -> &WindowWeights {
        &self.weights
    }

    /// Unknown parameters, in column order.
    pub fn unknowns(&self) -> &[UnknownParameter] {
        &self.unknowns
    }

    /// Weighted design matrix A.
    pub fn a(&self) -> &Array2<f64> {
        &self.a
    }

    /// Weighted data vector d.
    pub fn d(&self) -> ArrayView1<'_, f64> {
        self.d.view()
    }

    /// Weighted observed vector.
    pub fn weighted_obs(&self) -> ArrayView1<'_, f64> {
        self.weighted_obs.view()
    }

    /// Estimated number of independent samples.
    pub fn num_independent(&self) -> f64 {
        self.data.num_independent()
    }

    /// Euclidean norm of d.
    pub fn d_norm(&self) -> f64 {
        self.d_norm
    }

    /// Euclidean norm of the weighted observed vector.
    pub fn obs_norm(&self) -> f64 {
        self.obs_norm
    }

    /// |d|² / |obs|², the variance before any model update.
    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// NaN findings from the design matrix fill.
    pub fn anomalies(&self) -> &[NumericAnomaly] {
        &self.anomalies
    }

    /// Number of (window, parameter) cells left at zero for lack of a
    /// partial derivative record.
    pub fn missing_partials(&self) -> usize {
        self.missing_partials
    }
}
