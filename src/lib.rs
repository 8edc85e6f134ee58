//! # jpsicc
//!
//! Event selection, mass reconstruction, and PDF fitting for the search for
//! Higgs boson decays to a J/ψ meson and a charm-quark pair.
//!
//! The crate is split in two halves. The selection half builds derived
//! kinematic columns (four-vectors, angular separations, invariant masses,
//! composite candidates) on a lazily-evaluated [`polars`] frame, applies the
//! analysis cuts while recording a weighted [`CutFlow`], and snapshots the
//! surviving columns to Parquet together with a JSON sidecar listing them.
//! The fitting half loads a frame column as a binned or unbinned dataset,
//! fits parametric PDFs to it by maximum likelihood with randomized-restart
//! recovery, and persists the result as a [`Workspace`](crate::fit::Workspace).
#![warn(clippy::perf, clippy::style)]

use thiserror::Error;

/// Selection orchestration for a single sample.
pub mod analyzer;
/// The weighted cut-flow table.
pub mod cutflow;
/// Column definitions and selection filters for the analysis categories.
pub mod defines;
/// PDFs, likelihood fitting, and the fit workspace.
pub mod fit;
/// JSON input specifications (sample lists, histogram definitions).
pub mod spec;
/// Utility functions, enums, and the four-vector expression wrappers.
pub mod utils;

pub use crate::analyzer::Analyzer;
pub use crate::cutflow::CutFlow;
pub use crate::fit::{FitOptions, FitStatus, FitVariable, FittingTool};
pub use crate::utils::enums::{Category, PdfShape, Sample};
pub use crate::utils::variables::{candidate, delta_r, mass, separation};
pub use crate::utils::vectors::{Vec3, Vec4};

/// The floating-point type used throughout the crate.
pub type Float = f64;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// The error type used by all `jpsicc` internal methods
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`polars::error::PolarsError`].
    #[error("Polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    /// An alias for [`serde_json::Error`].
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An error which occurs when the user tries to parse an invalid string of
    /// text, typically into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// An error which occurs when a requested column is absent from a frame.
    #[error("Column \"{column}\" not found ({context})!")]
    ColumnNotFound {
        /// Name of the missing column
        column: String,
        /// Where the lookup happened
        context: String,
    },
    /// An error which occurs when an enumerated option has no entry for the
    /// requested combination (e.g. a trigger for a category/year pair).
    #[error("No {object} exists for the combination of \"{name}\"!")]
    InvalidOption {
        /// The combination which failed lookup
        name: String,
        /// The kind of object being looked up
        object: String,
    },
    /// An error which occurs when a variable range is empty or inverted.
    #[error("Invalid range: low ({low}) must be smaller than high ({high})!")]
    InvalidRange {
        /// Lower edge of the range
        low: Float,
        /// Upper edge of the range
        high: Float,
    },
    /// An error which occurs when an operation requires a frame that has not
    /// been loaded yet.
    #[error("No frame has been loaded; call one of the create/read methods first!")]
    MissingFrame,
    /// A custom fallback error for errors too complex or too infrequent to
    /// warrant their own error category.
    #[error("{0}")]
    Custom(String),
}

#[cfg(test)]
pub mod tests {
    use polars::prelude::*;
    /// Get the first value of a 1-row float column, panicking on error.
    pub fn val1(df: &DataFrame, col: &str) -> f64 {
        let s = df.column(col).unwrap();
        match s.dtype() {
            DataType::Float64 => s.f64().unwrap().get(0).unwrap(),
            DataType::Float32 => s.f32().unwrap().get(0).unwrap() as f64,
            dt => panic!("column {col} must be f32/f64, got {dt:?}"),
        }
    }
}
