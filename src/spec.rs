//! JSON input specifications: sample lists and histogram definitions.

use std::path::PathBuf;

use indexmap::IndexMap;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::defines::define_sample_meta;
use crate::utils::enums::{Category, Sample};
use crate::{AnalysisError, AnalysisResult, Float};

/// Expand `~` and environment variables in a user-provided path.
pub(crate) fn expand_path(path: &str) -> AnalysisResult<PathBuf> {
    Ok(PathBuf::from(shellexpand::full(path)?.into_owned()))
}

/// The input files and metadata of a single sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleSpec {
    /// Parquet event files (paths may contain `~` or environment variables).
    pub files: Vec<String>,
    /// Parquet run files carrying the generator-weight sums (empty for data).
    #[serde(default)]
    pub run_files: Vec<String>,
    /// Cross section in pb.
    pub xsec: Float,
    /// Integrated luminosity in 1/fb.
    pub lumi: Float,
}

/// A named collection of samples, loaded from a JSON object mapping sample
/// names (parsable as [`Sample`]) to their [`SampleSpec`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSpec {
    pub samples: IndexMap<String, SampleSpec>,
}

impl EventSpec {
    /// Load the spec from a JSON file.
    pub fn open(path: &str) -> AnalysisResult<Self> {
        let text = std::fs::read_to_string(expand_path(path)?)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn get(&self, name: &str) -> AnalysisResult<&SampleSpec> {
        self.samples
            .get(name)
            .ok_or_else(|| AnalysisError::InvalidOption {
                name: name.to_string(),
                object: "sample spec".to_string(),
            })
    }
}

/// Lazily scan and concatenate the event files of one sample.
pub fn scan_sample(spec: &SampleSpec) -> AnalysisResult<LazyFrame> {
    scan_files(&spec.files)
}

/// Lazily scan and concatenate the run files of one sample.
pub fn scan_runs(spec: &SampleSpec) -> AnalysisResult<LazyFrame> {
    scan_files(&spec.run_files)
}

fn scan_files(files: &[String]) -> AnalysisResult<LazyFrame> {
    if files.is_empty() {
        return Err(AnalysisError::Custom(
            "sample spec lists no input files".to_string(),
        ));
    }
    let mut frames = Vec::with_capacity(files.len());
    for f in files {
        frames.push(LazyFrame::scan_parquet(
            expand_path(f)?,
            ScanArgsParquet::default(),
        )?);
    }
    Ok(concat(frames, UnionArgs::default())?)
}

/// Scan every sample in the spec, attach its metadata columns, and
/// concatenate into one frame.
///
/// Returns the frame and the metadata branch names it contributes.
pub fn frame_from_spec(
    spec: &EventSpec,
    category: Category,
) -> AnalysisResult<(LazyFrame, Vec<String>)> {
    let mut frames = Vec::with_capacity(spec.samples.len());
    let mut branches = Vec::new();
    for (name, s) in &spec.samples {
        let sample: Sample = name.parse()?;
        let (lf, b) = define_sample_meta(scan_sample(s)?, sample, category, s.xsec, s.lumi);
        branches = b;
        frames.push(lf);
    }
    if frames.is_empty() {
        return Err(AnalysisError::Custom("event spec is empty".to_string()));
    }
    Ok((concat(frames, UnionArgs::default())?, branches))
}

/// One histogram definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistDef {
    /// The column to histogram.
    pub name: String,
    /// Axis title.
    pub title: String,
    /// Number of bins.
    pub bin: usize,
    pub xmin: Float,
    pub xmax: Float,
}

impl HistDef {
    /// Check that the definition describes a fillable histogram.
    pub fn validate(&self) -> AnalysisResult<()> {
        if self.bin == 0 {
            return Err(AnalysisError::Custom(format!(
                "histogram \"{}\" needs at least one bin",
                self.name
            )));
        }
        if self.xmin >= self.xmax {
            return Err(AnalysisError::InvalidRange {
                low: self.xmin,
                high: self.xmax,
            });
        }
        Ok(())
    }
}

/// Grouped histogram definitions, loaded from a JSON object mapping group
/// names to lists of [`HistDef`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistogramSpecs {
    pub groups: IndexMap<String, Vec<HistDef>>,
}

impl HistogramSpecs {
    /// Load the definitions from a JSON file.
    pub fn open(path: &str) -> AnalysisResult<Self> {
        let text = std::fs::read_to_string(expand_path(path)?)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn group(&self, name: &str) -> AnalysisResult<&[HistDef]> {
        self.groups
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| AnalysisError::InvalidOption {
                name: name.to_string(),
                object: "histogram group".to_string(),
            })
    }

    /// The column names referenced by one group's definitions.
    pub fn branches_for(&self, group: &str) -> AnalysisResult<Vec<String>> {
        Ok(self
            .group(group)?
            .iter()
            .map(|h| h.name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_spec_parsing() {
        let spec: EventSpec = serde_json::from_str(
            r#"{
                "MC_SIG": {
                    "files": ["sig_events.parquet"],
                    "run_files": ["sig_runs.parquet"],
                    "xsec": 0.01,
                    "lumi": 59.7
                },
                "DATA_BKG": {
                    "files": ["data_a.parquet", "data_b.parquet"],
                    "xsec": 1.0,
                    "lumi": 1.0
                }
            }"#,
        )
        .unwrap();
        assert_eq!(spec.samples.len(), 2);
        let sig = spec.get("MC_SIG").unwrap();
        assert_eq!(sig.files.len(), 1);
        assert_eq!(sig.run_files.len(), 1);
        assert_eq!(sig.xsec, 0.01);
        let data = spec.get("DATA_BKG").unwrap();
        assert!(data.run_files.is_empty());
        assert!(matches!(
            spec.get("MC_BKG9"),
            Err(AnalysisError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_empty_sample_errors() {
        let s = SampleSpec {
            files: vec![],
            run_files: vec![],
            xsec: 1.0,
            lumi: 1.0,
        };
        assert!(scan_sample(&s).is_err());
        assert!(scan_runs(&s).is_err());
    }

    #[test]
    fn test_histogram_specs() {
        let specs: HistogramSpecs = serde_json::from_str(
            r#"{
                "Jpsi": [
                    {"name": "Jpsi_mass", "title": "m(J/psi) [GeV]", "bin": 60, "xmin": 2.8, "xmax": 3.4},
                    {"name": "Jpsi_pt", "title": "pT(J/psi) [GeV]", "bin": 50, "xmin": 0.0, "xmax": 100.0}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            specs.branches_for("Jpsi").unwrap(),
            vec!["Jpsi_mass", "Jpsi_pt"]
        );
        assert_eq!(specs.group("Jpsi").unwrap()[0].bin, 60);
        assert!(specs.group("muon").is_err());
    }

    #[test]
    fn test_histogram_def_validation() {
        let mut h = HistDef {
            name: "Jpsi_mass".to_string(),
            title: "m".to_string(),
            bin: 60,
            xmin: 2.8,
            xmax: 3.4,
        };
        assert!(h.validate().is_ok());
        h.bin = 0;
        assert!(matches!(h.validate(), Err(AnalysisError::Custom(_))));
        h.bin = 60;
        h.xmax = h.xmin;
        assert!(matches!(
            h.validate(),
            Err(AnalysisError::InvalidRange { .. })
        ));
    }
}
