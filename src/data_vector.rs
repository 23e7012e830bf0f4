// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashMap;
use std::fmt;

use ndarray::{Array1, ArrayView1};

use crate::error::{InversionError, Result};
use crate::record::{RecordIdentity, WaveformHeader, WaveformRecord, WindowKey};

/// Maximum allowed difference between paired start times, in seconds.
pub const TIME_TOLERANCE: f64 = 15.0;

/// One observed/synthetic pair and its place in the flat row space.
#[derive(Debug, Clone)]
pub struct TimeWindow {
    /// Header of the observed record.
    pub header: WaveformHeader,
    /// Start time of the synthetic record.
    pub synthetic_start: f64,
    /// Number of samples (rows) in the window.
    pub npts: usize,
    /// Index of the window's first row.
    pub start_row: usize,
}

impl TimeWindow {
    /// Row range covered by the window.
    pub fn rows(&self) -> std::ops::Range<usize> {
        self.start_row..self.start_row + self.npts
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.header, f)
    }
}

/// Observed and synthetic waveforms of all time windows laid out as flat
/// vectors sharing one row index.
#[derive(Debug)]
pub struct DataVector {
    windows: Vec<TimeWindow>,
    index: HashMap<WindowKey, Vec<usize>>,
    obs: Array1<f64>,
    syn: Array1<f64>,
    num_independent: f64,
}

impl DataVector {
    /// Pair observed and synthetic records into time windows.
    ///
    /// Windows are ordered as their synthetic records appear in `records`.
    /// Records without a partner are dropped with a warning.
    ///
    /// # Errors
    /// - `InputInconsistency` if a record has no samples, its sample count
    ///   disagrees with its header or its partner, or two synthetics claim the
    ///   same observed record.
    /// - `TimeMisalignment` if paired start times differ by 15 s or more.
    /// - `DegenerateObservation` if an observed window is all zero or has NaN.
    pub fn new(records: &[WaveformRecord]) -> Result<Self> {
        for rec in records {
            match &rec.data {
                None => {
                    return Err(InversionError::InputInconsistency {
                        context: format!("record {} has no sample data", rec.header),
                    })
                }
                Some(data) if data.len() != rec.header.npts => {
                    return Err(InversionError::InputInconsistency {
                        context: format!(
                            "record {} declares {} samples but holds {}",
                            rec.header,
                            rec.header.npts,
                            data.len()
                        ),
                    })
                }
                Some(_) => {}
            }
        }

        let observed: Vec<&WaveformRecord> = records.iter().filter(|r| r.is_observed()).collect();
        let mut observed_index: HashMap<WindowKey, Vec<usize>> = HashMap::new();
        for (i, rec) in observed.iter().enumerate() {
            observed_index.entry(rec.window_key()).or_default().push(i);
        }

        let mut claimed = vec![false; observed.len()];
        let mut pairs: Vec<(&WaveformRecord, &WaveformRecord)> = Vec::new();
        for syn in records.iter().filter(|r| !r.is_observed()) {
            let nearest = observed_index.get(&syn.window_key()).and_then(|bucket| {
                bucket.iter().copied().min_by(|&a, &b| {
                    let da = (observed[a].start_time() - syn.start_time()).abs();
                    let db = (observed[b].start_time() - syn.start_time()).abs();
                    da.total_cmp(&db)
                })
            });
            let Some(oi) = nearest else {
                log::warn!("no observed record pairs with synthetic {}", syn.header);
                continue;
            };
            if claimed[oi] {
                return Err(InversionError::InputInconsistency {
                    context: format!(
                        "observed record {} is paired with more than one synthetic",
                        observed[oi].header
                    ),
                });
            }
            claimed[oi] = true;
            pairs.push((observed[oi], syn));
        }
        for (i, rec) in observed.iter().enumerate() {
            if !claimed[i] {
                log::warn!("no synthetic record pairs with observed {}", rec.header);
            }
        }

        let total_rows: usize = pairs.iter().map(|(o, _)| o.npts()).sum();
        let mut obs = Vec::with_capacity(total_rows);
        let mut syn = Vec::with_capacity(total_rows);
        let mut windows = Vec::with_capacity(pairs.len());
        let mut index: HashMap<WindowKey, Vec<usize>> = HashMap::new();
        let mut num_independent = 0.0;

        for (o, s) in pairs {
            let label = o.header.to_string();
            if (o.start_time() - s.start_time()).abs() >= TIME_TOLERANCE {
                return Err(InversionError::TimeMisalignment {
                    window: label,
                    observed_start: o.start_time(),
                    synthetic_start: s.start_time(),
                });
            }
            if o.npts() != s.npts() {
                return Err(InversionError::InputInconsistency {
                    context: format!(
                        "window {}: observed has {} samples, synthetic has {}",
                        label,
                        o.npts(),
                        s.npts()
                    ),
                });
            }
            check_observation(&label, o.samples())?;

            let window = TimeWindow {
                header: o.header.clone(),
                synthetic_start: s.start_time(),
                npts: o.npts(),
                start_row: obs.len(),
            };
            num_independent += window.npts as f64 / o.header.min_period / o.header.sampling_hz;
            index.entry(o.window_key()).or_default().push(windows.len());
            obs.extend_from_slice(o.samples());
            syn.extend_from_slice(s.samples());
            windows.push(window);
        }

        log::info!(
            "{} time windows, {} rows, {:.1} independent samples",
            windows.len(),
            obs.len(),
            num_independent
        );

        Ok(DataVector {
            windows,
            index,
            obs: Array1::from_vec(obs),
            syn: Array1::from_vec(syn),
            num_independent,
        })
    }

    /// The time windows in row order.
    pub fn windows(&self) -> &[TimeWindow] {
        &self.windows
    }

    /// Number of time windows.
    pub fn num_windows(&self) -> usize {
        self.windows.len()
    }

    /// Total number of rows (sum of window sample counts).
    pub fn total_rows(&self) -> usize {
        self.obs.len()
    }

    /// Estimated number of statistically independent samples.
    pub fn num_independent(&self) -> f64 {
        self.num_independent
    }

    /// Index of the window `record` belongs to, if any.
    ///
    /// Candidates sharing event, station, component and phases are looked up
    /// by hash; among them the one whose synthetic start time is closest and
    /// within tolerance wins.
    pub fn find_window<R: RecordIdentity + ?Sized>(&self, record: &R) -> Option<usize> {
        let t = record.start_time();
        self.index
            .get(&record.window_key())?
            .iter()
            .copied()
            .map(|i| (i, (self.windows[i].synthetic_start - t).abs()))
            .filter(|&(_, dt)| dt < TIME_TOLERANCE)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Concatenate per-window vectors into one flat vector.
    pub fn compose(&self, parts: &[Vec<f64>]) -> Result<Array1<f64>> {
        if parts.len() != self.windows.len() {
            return Err(InversionError::DimensionMismatch {
                operation: "compose",
                expected: vec![self.windows.len()],
                got: vec![parts.len()],
            });
        }
        let mut flat = Vec::with_capacity(self.total_rows());
        for (w, part) in self.windows.iter().zip(parts) {
            if part.len() != w.npts {
                return Err(InversionError::DimensionMismatch {
                    operation: "compose",
                    expected: vec![w.npts],
                    got: vec![part.len()],
                });
            }
            flat.extend_from_slice(part);
        }
        Ok(Array1::from_vec(flat))
    }

    /// Split a flat vector into per-window vectors.
    pub fn decompose(&self, flat: ArrayView1<'_, f64>) -> Result<Vec<Vec<f64>>> {
        if flat.len() != self.total_rows() {
            return Err(InversionError::DimensionMismatch {
                operation: "decompose",
                expected: vec![self.total_rows()],
                got: vec![flat.len()],
            });
        }
        Ok(self
            .windows
            .iter()
            .map(|w| flat.slice(ndarray::s![w.rows()]).to_vec())
            .collect())
    }

    /// Observed samples of window `i`.
    pub fn observed_window(&self, i: usize) -> ArrayView1<'_, f64> {
        self.obs.slice(ndarray::s![self.windows[i].rows()])
    }

    /// Synthetic samples of window `i`.
    pub fn synthetic_window(&self, i: usize) -> ArrayView1<'_, f64> {
        self.syn.slice(ndarray::s![self.windows[i].rows()])
    }

    /// Full unweighted observed vector.
    pub fn obs(&self) -> ArrayView1<'_, f64> {
        self.obs.view()
    }

    /// Full unweighted synthetic vector.
    pub fn syn(&self) -> ArrayView1<'_, f64> {
        self.syn.view()
    }

    /// Unweighted residual `obs - syn`.
    pub fn residual(&self) -> Array1<f64> {
        &self.obs - &self.syn
    }

    /// Observed vector with each window scaled by its weight.
    pub fn weighted_obs(&self, weights: &[f64]) -> Result<Array1<f64>> {
        self.scale_windows(&self.obs, weights)
    }

    /// Synthetic vector with each window scaled by its weight.
    pub fn weighted_syn(&self, weights: &[f64]) -> Result<Array1<f64>> {
        self.scale_windows(&self.syn, weights)
    }

    /// Weighted data vector `d`: each window's residual times its weight.
    pub fn build_weighted_d(&self, weights: &[f64]) -> Result<Array1<f64>> {
        self.scale_windows(&self.residual(), weights)
    }

    fn scale_windows(&self, v: &Array1<f64>, weights: &[f64]) -> Result<Array1<f64>> {
        if weights.len() != self.windows.len() {
            return Err(InversionError::DimensionMismatch {
                operation: "weight windows",
                expected: vec![self.windows.len()],
                got: vec![weights.len()],
            });
        }
        let mut out = v.clone();
        for (w, &weight) in self.windows.iter().zip(weights) {
            out.slice_mut(ndarray::s![w.rows()])
                .mapv_inplace(|x| x * weight);
        }
        Ok(out)
    }
}

fn check_observation(window: &str, samples: &[f64]) -> Result<()> {
    if samples.iter().any(|v| v.is_nan()) {
        return Err(InversionError::DegenerateObservation {
            window: window.to_string(),
            reason: "observed waveform contains NaN".to_string(),
        });
    }
    if samples.iter().all(|&v| v == 0.0) {
        return Err(InversionError::DegenerateObservation {
            window: window.to_string(),
            reason: "observed waveform is identically zero".to_string(),
        });
    }
    Ok(())
}
