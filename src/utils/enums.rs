use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::AnalysisError;

/// The samples entering the analysis.
///
/// Data and Monte-Carlo backgrounds share the background mode; only the
/// simulated signal sample carries generator-level candidate columns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sample {
    /// Recorded collision data used as background.
    DataBkg,
    /// The merged Monte-Carlo background sample.
    McBkg,
    /// Individual Monte-Carlo background samples.
    McBkg1,
    McBkg2,
    McBkg3,
    McBkg4,
    /// The simulated signal sample.
    McSig,
}

impl Sample {
    /// Whether this sample is recorded data (as opposed to simulation).
    pub fn is_data(&self) -> bool {
        matches!(self, Sample::DataBkg)
    }
    /// Whether this sample enters the analysis as signal.
    pub fn is_signal(&self) -> bool {
        matches!(self, Sample::McSig)
    }
}

impl Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sample::DataBkg => write!(f, "DATA_BKG"),
            Sample::McBkg => write!(f, "MC_BKG"),
            Sample::McBkg1 => write!(f, "MC_BKG1"),
            Sample::McBkg2 => write!(f, "MC_BKG2"),
            Sample::McBkg3 => write!(f, "MC_BKG3"),
            Sample::McBkg4 => write!(f, "MC_BKG4"),
            Sample::McSig => write!(f, "MC_SIG"),
        }
    }
}

impl FromStr for Sample {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DATA_BKG" => Ok(Self::DataBkg),
            "MC_BKG" | "MC_BKG0" => Ok(Self::McBkg),
            "MC_BKG1" => Ok(Self::McBkg1),
            "MC_BKG2" => Ok(Self::McBkg2),
            "MC_BKG3" => Ok(Self::McBkg3),
            "MC_BKG4" => Ok(Self::McBkg4),
            "MC_SIG" => Ok(Self::McSig),
            _ => Err(AnalysisError::ParseError {
                name: s.to_string(),
                object: "Sample".to_string(),
            }),
        }
    }
}

/// The analysis category, which selects the trigger and jet definitions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Gluon fusion.
    GluonFusion,
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::GluonFusion => write!(f, "GF"),
        }
    }
}

impl FromStr for Category {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GF" | "GLUONFUSION" | "GLUON-FUSION" => Ok(Self::GluonFusion),
            _ => Err(AnalysisError::ParseError {
                name: s.to_string(),
                object: "Category".to_string(),
            }),
        }
    }
}

/// Supported parametric PDF shapes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PdfShape {
    /// A Gaussian truncated to the fit range.
    Gaussian,
}

impl Display for PdfShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PdfShape::Gaussian => write!(f, "gaussian"),
        }
    }
}

impl FromStr for PdfShape {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gaussian" | "gauss" => Ok(Self::Gaussian),
            _ => Err(AnalysisError::ParseError {
                name: s.to_string(),
                object: "PdfShape".to_string(),
            }),
        }
    }
}
