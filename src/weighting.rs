// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use ndarray::Array1;
use rayon::prelude::*;

use crate::data_vector::DataVector;
use crate::engine::{available_threads, build_pool};
use crate::error::Result;
use crate::record::{Component, WaveformHeader};

/// Options controlling per-window weights. All balancing divides by a square
/// root because the weight enters the normal equations twice (AᵗWᵗWA).
#[derive(Debug, Clone, PartialEq)]
pub struct WeightConfig {
    amplitude_reciprocal: bool,
    component_factors: [f64; 3],
    component_balancing: bool,
    phase_balancing: bool,
    geometry_balancing: bool,
    geometry_radius: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        WeightConfig {
            amplitude_reciprocal: false,
            component_factors: [1.0; 3],
            component_balancing: false,
            phase_balancing: false,
            geometry_balancing: false,
            geometry_radius: 2.5,
        }
    }
}

impl WeightConfig {
    /// Divide each window by the maximum absolute observed amplitude (builder method).
    pub fn with_amplitude_reciprocal(mut self, enabled: bool) -> Self {
        self.amplitude_reciprocal = enabled;
        self
    }

    /// Multiply windows of `component` by `factor` (builder method). Default is 1.
    pub fn with_component_factor(mut self, component: Component, factor: f64) -> Self {
        self.component_factors[component.index()] = factor;
        self
    }

    /// Balance components by their window counts (builder method).
    pub fn with_component_balancing(mut self, enabled: bool) -> Self {
        self.component_balancing = enabled;
        self
    }

    /// Balance SH and P-SV phase families by their window counts (builder method).
    pub fn with_phase_balancing(mut self, enabled: bool) -> Self {
        self.phase_balancing = enabled;
        self
    }

    /// Down-weight windows with redundant source-receiver geometry (builder method).
    pub fn with_geometry_balancing(mut self, enabled: bool) -> Self {
        self.geometry_balancing = enabled;
        self
    }

    /// Angular radius in degrees within which event and station positions
    /// count as redundant (builder method). Default is 2.5.
    pub fn with_geometry_radius(mut self, degrees: f64) -> Self {
        self.geometry_radius = degrees;
        self
    }

    /// Multiplier applied to windows of `component`.
    pub fn component_factor(&self, component: Component) -> f64 {
        self.component_factors[component.index()]
    }
}

/// Which phase families a window belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseFamilies {
    /// Transversely polarised shear energy.
    pub sh: bool,
    /// Coupled compressional / vertically polarised shear energy.
    pub psv: bool,
}

/// Classify the phases of a window.
///
/// Any leg through P, K, I or J makes a phase P-SV. Pure S phases are SH on
/// the transverse component and P-SV on the vertical and radial ones.
pub fn classify_phases(header: &WaveformHeader) -> PhaseFamilies {
    let mut families = PhaseFamilies::default();
    for name in header.phases.names() {
        if name.chars().any(|c| matches!(c, 'P' | 'p' | 'K' | 'I' | 'J')) {
            families.psv = true;
        } else if name.chars().any(|c| matches!(c, 'S' | 's')) {
            if header.component == Component::T {
                families.sh = true;
            } else {
                families.psv = true;
            }
        }
    }
    families
}

/// One weight per time window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowWeights {
    weights: Vec<f64>,
}

impl WindowWeights {
    /// All windows weighted by one.
    pub fn uniform(num_windows: usize) -> Self {
        WindowWeights {
            weights: vec![1.0; num_windows],
        }
    }

    /// Wrap explicit weights.
    pub fn from_vec(weights: Vec<f64>) -> Self {
        WindowWeights { weights }
    }

    /// Per-window weights.
    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Whether there are no windows.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Each window's weight repeated over its samples.
    pub fn broadcast(&self, data: &DataVector) -> Vec<Vec<f64>> {
        data.windows()
            .iter()
            .zip(&self.weights)
            .map(|(w, &weight)| vec![weight; w.npts])
            .collect()
    }

    /// Diagonal of the weight matrix over the full row space.
    pub fn diagonal(&self, data: &DataVector) -> Array1<f64> {
        let mut diag = Array1::zeros(data.total_rows());
        for (w, &weight) in data.windows().iter().zip(&self.weights) {
            diag.slice_mut(ndarray::s![w.rows()]).fill(weight);
        }
        diag
    }
}

/// Computes window weights from a [`WeightConfig`].
#[derive(Debug, Clone, Default)]
pub struct WeightAssigner {
    config: WeightConfig,
    num_threads: Option<usize>,
}

impl WeightAssigner {
    /// Create an assigner for `config`.
    pub fn new(config: WeightConfig) -> Self {
        WeightAssigner {
            config,
            num_threads: None,
        }
    }

    /// Set the number of worker threads of the geometry pass (builder method).
    /// If not specified, defaults to the number of available CPU cores.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &WeightConfig {
        &self.config
    }

    /// Compute one weight per window of `data`.
    ///
    /// # Errors
    /// Returns `InvalidThreadCount` if geometry balancing is enabled on a
    /// zero-thread assigner.
    pub fn assign(&self, data: &DataVector) -> Result<WindowWeights> {
        let windows = data.windows();
        let total = windows.len() as f64;
        let mut weights = vec![1.0; windows.len()];

        if self.config.amplitude_reciprocal {
            for (i, weight) in weights.iter_mut().enumerate() {
                let peak = data
                    .observed_window(i)
                    .iter()
                    .fold(0.0_f64, |m, v| m.max(v.abs()));
                *weight /= peak;
            }
        }

        let mut component_counts = [0usize; 3];
        for w in windows {
            component_counts[w.header.component.index()] += 1;
        }
        for (w, weight) in windows.iter().zip(weights.iter_mut()) {
            let c = w.header.component;
            *weight *= self.config.component_factor(c);
            if self.config.component_balancing {
                *weight /= (component_counts[c.index()] as f64 / total).sqrt();
            }
        }

        if self.config.phase_balancing {
            let families: Vec<PhaseFamilies> =
                windows.iter().map(|w| classify_phases(&w.header)).collect();
            let sh = families.iter().filter(|f| f.sh).count() as f64;
            let psv = families.iter().filter(|f| f.psv).count() as f64;
            let classified = families.iter().filter(|f| f.sh || f.psv).count() as f64;
            for (f, weight) in families.iter().zip(weights.iter_mut()) {
                if f.sh {
                    *weight /= (sh / classified).sqrt();
                }
                if f.psv {
                    *weight /= (psv / classified).sqrt();
                }
            }
        }

        if self.config.geometry_balancing {
            let radius = self.config.geometry_radius;
            let pool = build_pool(
                self.num_threads.unwrap_or_else(available_threads),
                "tomo-weight",
            )?;
            let redundancy: Vec<usize> = pool.install(|| {
                windows
                    .par_iter()
                    .map(|wi| {
                        windows
                            .iter()
                            .filter(|wj| {
                                wj.header.component == wi.header.component
                                    && wj
                                        .header
                                        .event_position
                                        .angular_distance(&wi.header.event_position)
                                        <= radius
                                    && wj
                                        .header
                                        .station_position
                                        .angular_distance(&wi.header.station_position)
                                        <= radius
                            })
                            .count()
                    })
                    .collect()
            });
            for (&n, weight) in redundancy.iter().zip(weights.iter_mut()) {
                *weight /= (n as f64).sqrt();
            }
        }

        if let (Some(min), Some(max)) = (
            weights.iter().copied().reduce(f64::min),
            weights.iter().copied().reduce(f64::max),
        ) {
            log::info!(
                "assigned {} window weights in [{:.4e}, {:.4e}]",
                weights.len(),
                min,
                max
            );
        }
        Ok(WindowWeights { weights })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InversionError;
    use crate::fixtures::{header, observed, synthetic};
    use crate::record::{GeoPosition, PhaseSet, WaveformRecord};

    fn pair(station: &str, component: Component, obs: Vec<f64>) -> Vec<WaveformRecord> {
        let syn = vec![0.0; obs.len()];
        vec![
            observed("ev1", station, component, 100.0, obs),
            synthetic("ev1", station, component, 100.0, syn),
        ]
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn default_weights_are_one() {
        let dv = DataVector::new(&pair("AAA_XX", Component::T, vec![1.0, -3.0])).unwrap();
        let w = WeightAssigner::default().assign(&dv).unwrap();
        assert_eq!(w.as_slice(), &[1.0]);
    }

    #[test]
    fn amplitude_reciprocal() {
        let dv = DataVector::new(&pair("AAA_XX", Component::T, vec![1.0, -4.0, 2.0])).unwrap();
        let w = WeightAssigner::new(WeightConfig::default().with_amplitude_reciprocal(true))
            .assign(&dv)
            .unwrap();
        assert!(approx(w.as_slice()[0], 0.25));
        assert_eq!(w.broadcast(&dv), vec![vec![0.25; 3]]);
        assert_eq!(w.diagonal(&dv).to_vec(), vec![0.25; 3]);
    }

    #[test]
    fn component_factor_and_balancing() {
        let mut records = Vec::new();
        records.extend(pair("AAA_XX", Component::Z, vec![1.0]));
        records.extend(pair("BBB_XX", Component::Z, vec![1.0]));
        records.extend(pair("CCC_XX", Component::Z, vec![1.0]));
        records.extend(pair("DDD_XX", Component::T, vec![1.0]));
        let dv = DataVector::new(&records).unwrap();
        let config = WeightConfig::default()
            .with_component_factor(Component::T, 2.0)
            .with_component_balancing(true);
        let w = WeightAssigner::new(config).assign(&dv).unwrap();
        let z = 1.0 / (3.0_f64 / 4.0).sqrt();
        let t = 2.0 / (1.0_f64 / 4.0).sqrt();
        assert!(approx(w.as_slice()[0], z));
        assert!(approx(w.as_slice()[2], z));
        assert!(approx(w.as_slice()[3], t));
    }

    #[test]
    fn phase_classification() {
        let mut h = header("ev", "STA", Component::T, 0.0, 1);
        h.phases = PhaseSet::new(["S", "ScS"]);
        assert_eq!(classify_phases(&h), PhaseFamilies { sh: true, psv: false });
        h.component = Component::Z;
        assert_eq!(classify_phases(&h), PhaseFamilies { sh: false, psv: true });
        h.component = Component::T;
        h.phases = PhaseSet::new(["S", "SKS"]);
        assert_eq!(classify_phases(&h), PhaseFamilies { sh: true, psv: true });
    }

    #[test]
    fn phase_balancing() {
        let mut records = Vec::new();
        records.extend(pair("AAA_XX", Component::T, vec![1.0]));
        records.extend(pair("BBB_XX", Component::T, vec![1.0]));
        records.extend(pair("CCC_XX", Component::Z, vec![1.0]));
        let dv = DataVector::new(&records).unwrap();
        let w = WeightAssigner::new(WeightConfig::default().with_phase_balancing(true))
            .assign(&dv)
            .unwrap();
        assert!(approx(w.as_slice()[0], 1.0 / (2.0_f64 / 3.0).sqrt()));
        assert!(approx(w.as_slice()[2], 1.0 / (1.0_f64 / 3.0).sqrt()));
    }

    #[test]
    fn window_in_both_phase_families_divided_twice() {
        let mut records = Vec::new();
        records.extend(pair("AAA_XX", Component::T, vec![1.0]));
        records.extend(pair("BBB_XX", Component::Z, vec![1.0]));
        records.extend(pair("CCC_XX", Component::T, vec![1.0]));
        for rec in records.iter_mut() {
            if rec.header.station == "CCC_XX" {
                rec.header.phases = PhaseSet::new(["S", "SKS"]);
            }
        }
        let dv = DataVector::new(&records).unwrap();
        let w = WeightAssigner::new(WeightConfig::default().with_phase_balancing(true))
            .assign(&dv)
            .unwrap();
        // sh = {AAA, CCC}, psv = {BBB, CCC}, classified = 3
        let sh = 1.0 / (2.0_f64 / 3.0).sqrt();
        let psv = 1.0 / (2.0_f64 / 3.0).sqrt();
        assert!(approx(w.as_slice()[0], sh));
        assert!(approx(w.as_slice()[1], psv));
        assert!(approx(w.as_slice()[2], sh * psv));
        assert!(approx(w.as_slice()[2], 1.5));
    }

    #[test]
    fn geometry_pass_runs_on_configured_pool() {
        let mut records = Vec::new();
        records.extend(pair("AAA_XX", Component::T, vec![1.0]));
        records.extend(pair("BBB_XX", Component::T, vec![1.0]));
        let dv = DataVector::new(&records).unwrap();
        let config = WeightConfig::default().with_geometry_balancing(true);
        let w = WeightAssigner::new(config.clone())
            .with_threads(3)
            .assign(&dv)
            .unwrap();
        assert!(approx(w.as_slice()[0], 1.0 / 2.0_f64.sqrt()));
        assert!(matches!(
            WeightAssigner::new(config).with_threads(0).assign(&dv),
            Err(InversionError::InvalidThreadCount(0))
        ));
        let plain = WeightAssigner::default().with_threads(0).assign(&dv).unwrap();
        assert_eq!(plain.as_slice(), &[1.0, 1.0]);
    }

    #[test]
    fn geometry_balancing() {
        let mut records = Vec::new();
        records.extend(pair("AAA_XX", Component::T, vec![1.0]));
        records.extend(pair("BBB_XX", Component::T, vec![1.0]));
        records.extend(pair("CCC_XX", Component::T, vec![1.0]));
        records.extend(pair("FAR_XX", Component::T, vec![1.0]));
        records.extend(pair("ZZZ_XX", Component::Z, vec![1.0]));
        for rec in records.iter_mut() {
            match rec.header.station.as_str() {
                "BBB_XX" => rec.header.station_position = GeoPosition::new(1.0, 60.0),
                "CCC_XX" => rec.header.station_position = GeoPosition::new(0.0, 61.5),
                "FAR_XX" => rec.header.station_position = GeoPosition::new(20.0, 60.0),
                _ => {}
            }
        }
        let dv = DataVector::new(&records).unwrap();
        let w = WeightAssigner::new(WeightConfig::default().with_geometry_balancing(true))
            .assign(&dv)
            .unwrap();
        let third = 1.0 / 3.0_f64.sqrt();
        assert!(approx(w.as_slice()[0], third));
        assert!(approx(w.as_slice()[1], third));
        assert!(approx(w.as_slice()[2], third));
        assert!(approx(w.as_slice()[3], 1.0));
        assert!(approx(w.as_slice()[4], 1.0));
    }
}
