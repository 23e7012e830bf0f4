// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

/// Errors that can occur while assembling the normal equations or
/// reading and writing their inputs.
#[derive(Debug)]
pub enum InversionError {
    /// Input records disagree with each other or with the expected layout
    /// (sample count mismatch, duplicate pairing, malformed reused AᵗA).
    InputInconsistency {
        /// Description of what was inconsistent.
        context: String,
    },
    /// Some (window, parameter) pairs have no partial derivative record.
    MissingData {
        /// Number of (window, parameter) cells not covered.
        missing: usize,
        /// Number of cells required (windows × parameters).
        required: usize,
        /// One line per uncovered window, naming the missing parameters.
        uncovered: Vec<String>,
    },
    /// An observed waveform is identically zero or contains NaN.
    DegenerateObservation {
        /// Description of the offending window.
        window: String,
        /// Why the observation was rejected.
        reason: String,
    },
    /// Paired observed and synthetic records start too far apart.
    TimeMisalignment {
        /// Description of the offending window.
        window: String,
        /// Start time of the observed record.
        observed_start: f64,
        /// Start time of the synthetic record.
        synthetic_start: f64,
    },
    /// Operand shapes do not fit the requested operation.
    DimensionMismatch {
        /// The operation that was attempted.
        operation: &'static str,
        /// The expected shape.
        expected: Vec<usize>,
        /// The shape encountered.
        got: Vec<usize>,
    },
    /// A worker produced a non-finite value.
    NonFiniteResult {
        /// The operation that was running.
        operation: &'static str,
        /// The first output row holding a non-finite value.
        row: usize,
    },
    /// Worker pool size must be at least one.
    InvalidThreadCount(usize),
    /// A text file could not be parsed.
    Parse {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },
    /// Unsupported file format (unrecognized extension).
    UnsupportedFileFormat(String),
    /// I/O error occurred.
    IoError(std::io::Error),
    /// Other error with a descriptive message.
    Other(String),
}

impl fmt::Display for InversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InversionError::InputInconsistency { context } => {
                write!(f, "input inconsistency: {}", context)
            }
            InversionError::MissingData {
                missing,
                required,
                uncovered,
            } => {
                write!(
                    f,
                    "missing partial derivatives: {} of {} cells uncovered across {} windows",
                    missing,
                    required,
                    uncovered.len()
                )
            }
            InversionError::DegenerateObservation { window, reason } => {
                write!(f, "degenerate observation in window {}: {}", window, reason)
            }
            InversionError::TimeMisalignment {
                window,
                observed_start,
                synthetic_start,
            } => {
                write!(
                    f,
                    "time misalignment in window {}: observed starts at {}, synthetic at {}",
                    window, observed_start, synthetic_start
                )
            }
            InversionError::DimensionMismatch {
                operation,
                expected,
                got,
            } => {
                write!(
                    f,
                    "dimension mismatch in {}: expected {:?}, got {:?}",
                    operation, expected, got
                )
            }
            InversionError::NonFiniteResult { operation, row } => {
                write!(f, "non-finite result in {} at row {}", operation, row)
            }
            InversionError::InvalidThreadCount(n) => {
                write!(f, "invalid thread count: {} (must be >= 1)", n)
            }
            InversionError::Parse { line, reason } => {
                write!(f, "parse error at line {}: {}", line, reason)
            }
            InversionError::UnsupportedFileFormat(ext) => {
                write!(f, "unsupported file format: {}", ext)
            }
            InversionError::IoError(e) => write!(f, "I/O error: {}", e),
            InversionError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for InversionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InversionError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for InversionError {
    fn from(e: std::io::Error) -> Self {
        InversionError::IoError(e)
    }
}

/// Convenience type alias for Results with InversionError.
pub type Result<T> = std::result::Result<T, InversionError>;
