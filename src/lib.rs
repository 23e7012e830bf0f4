// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Assembly of the weighted linear system Am = d for waveform tomography.
//!
//! Observed and synthetic waveforms are paired into time windows that share
//! one flat row index. Partial derivative waveforms with respect to the
//! unknown model parameters fill the dense design matrix A, window weights
//! scale both A and the residual vector d, and the normal-equation products
//! AᵗA and Aᵗd are computed on a fixed-size worker pool for an external
//! solver.

#![warn(missing_docs)]

/// Time windows and the flat observed / synthetic vectors.
pub mod data_vector;
/// Parallel fill of the design matrix from partial derivatives.
pub mod design_matrix;
/// Parallel dense matrix operations.
pub mod engine;
/// Error types for the library.
pub mod error;
/// Plain-text and .npy persistence of vectors and matrices.
pub mod io;
/// Orchestration and cached AᵗA / Aᵗd.
pub mod normal_equation;
/// Waveform, partial derivative and unknown parameter records.
pub mod record;
/// Per-window weighting policies.
pub mod weighting;

#[cfg(test)]
mod fixtures;

pub use crate::data_vector::{DataVector, TimeWindow};
pub use crate::design_matrix::{DesignMatrix, DesignMatrixAssembler, NumericAnomaly};
pub use crate::engine::MatrixEngine;
pub use crate::error::{InversionError, Result};
pub use crate::normal_equation::{NormalEquation, NormalEquationBuilder};
pub use crate::record::{
    Component, GeoPosition, Location, ParameterKey, ParameterType, PartialDerivativeRecord,
    PhaseSet, RecordIdentity, UnknownParameter, WaveformHeader, WaveformKind, WaveformRecord,
};
pub use crate::weighting::{WeightAssigner, WeightConfig, WindowWeights};
