//! Parametric PDFs, maximum-likelihood fitting with randomized-restart
//! recovery, and the persisted fit workspace.

use std::convert::Infallible;
use std::fs::File;
use std::path::PathBuf;

use ganesh::{algorithms::LBFGSB, Function, Minimizer, Status};
use indexmap::IndexMap;
use log::{info, warn};
use nalgebra::{Cholesky, DMatrix, DVector};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::spec::expand_path;
use crate::utils::enums::{Category, PdfShape};
use crate::utils::functions::{normal_cdf, normal_logpdf};
use crate::utils::{histogram, Histogram};
use crate::{AnalysisError, AnalysisResult, Float};

/// The observable a fit runs over.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitVariable {
    pub name: String,
    pub title: String,
    pub low: Float,
    pub high: Float,
}

impl FitVariable {
    pub fn new(name: &str, title: &str, low: Float, high: Float) -> AnalysisResult<Self> {
        if low >= high {
            return Err(AnalysisError::InvalidRange { low, high });
        }
        Ok(Self {
            name: name.to_string(),
            title: title.to_string(),
            low,
            high,
        })
    }
}

/// A bounded fit parameter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Float,
    pub low: Float,
    pub high: Float,
}

impl Parameter {
    pub fn new(name: &str, value: Float, low: Float, high: Float) -> Self {
        Self {
            name: name.to_string(),
            value,
            low,
            high,
        }
    }
}

/// A Gaussian PDF truncated to the fit range and normalized over it.
///
/// Initial values follow the usual convention for an unknown peak: the mean
/// starts mid-range bounded by the range itself, and the width starts at a
/// tenth of the range.
#[derive(Clone, Debug)]
pub struct GaussianPdf {
    pub name: String,
    pub mean: Parameter,
    pub sigma: Parameter,
    low: Float,
    high: Float,
}

impl GaussianPdf {
    pub fn new(name: &str, variable: &FitVariable) -> Self {
        let (low, high) = (variable.low, variable.high);
        let range = high - low;
        Self {
            name: name.to_string(),
            mean: Parameter::new(&format!("{name}_mean"), low + range / 2.0, low, high),
            sigma: Parameter::new(&format!("{name}_sigma"), range / 10.0, 1e-2, range / 2.0),
            low,
            high,
        }
    }

    /// Normalization of the truncated Gaussian over the fit range.
    fn range_integral(&self, mu: Float, sigma: Float) -> Float {
        (normal_cdf((self.high - mu) / sigma) - normal_cdf((self.low - mu) / sigma)).max(1e-300)
    }

    fn log_density(&self, x: Float, p: &[Float]) -> Float {
        let (mu, sigma) = (p[0], p[1]);
        normal_logpdf(x, mu, sigma) - self.range_integral(mu, sigma).ln()
    }

    fn log_bin_prob(&self, lo: Float, hi: Float, p: &[Float]) -> Float {
        let (mu, sigma) = (p[0], p[1]);
        let pr = (normal_cdf((hi - mu) / sigma) - normal_cdf((lo - mu) / sigma))
            / self.range_integral(mu, sigma);
        pr.max(1e-300).ln()
    }
}

/// A parametric PDF over a single fit variable.
#[derive(Clone, Debug)]
pub enum Pdf {
    Gaussian(GaussianPdf),
}

impl Pdf {
    pub fn new(name: &str, shape: PdfShape, variable: &FitVariable) -> Self {
        match shape {
            PdfShape::Gaussian => Pdf::Gaussian(GaussianPdf::new(name, variable)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Pdf::Gaussian(g) => &g.name,
        }
    }

    pub fn shape(&self) -> PdfShape {
        match self {
            Pdf::Gaussian(_) => PdfShape::Gaussian,
        }
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        match self {
            Pdf::Gaussian(g) => vec![g.mean.clone(), g.sigma.clone()],
        }
    }

    fn set_values(&mut self, values: &[Float]) {
        match self {
            Pdf::Gaussian(g) => {
                g.mean.value = values[0];
                g.sigma.value = values[1];
            }
        }
    }

    fn log_density(&self, x: Float, p: &[Float]) -> Float {
        match self {
            Pdf::Gaussian(g) => g.log_density(x, p),
        }
    }

    fn log_bin_prob(&self, lo: Float, hi: Float, p: &[Float]) -> Float {
        match self {
            Pdf::Gaussian(g) => g.log_bin_prob(lo, hi, p),
        }
    }
}

/// A dataset to fit, either event-by-event or as a weighted histogram.
#[derive(Clone, Debug)]
pub enum FitData {
    Unbinned {
        values: Vec<Float>,
        weights: Vec<Float>,
    },
    Binned(Histogram),
}

impl FitData {
    /// Load an unbinned dataset from a frame column, keeping only entries
    /// inside the variable's range.
    pub fn unbinned(
        df: &DataFrame,
        variable: &FitVariable,
        weight: Option<&str>,
    ) -> AnalysisResult<Self> {
        let raw = fit_column(df, &variable.name)?;
        let raw_w = match weight {
            Some(w) => fit_column(df, w)?,
            None => vec![1.0; raw.len()],
        };
        let mut values = Vec::with_capacity(raw.len());
        let mut weights = Vec::with_capacity(raw.len());
        for (v, w) in raw.into_iter().zip(raw_w) {
            if v >= variable.low && v <= variable.high {
                values.push(v);
                weights.push(w);
            }
        }
        Ok(FitData::Unbinned { values, weights })
    }

    /// Load a binned dataset from a frame column, histogrammed over the
    /// variable's range.
    pub fn binned(
        df: &DataFrame,
        variable: &FitVariable,
        bins: usize,
        weight: Option<&str>,
    ) -> AnalysisResult<Self> {
        if bins == 0 {
            return Err(AnalysisError::Custom(format!(
                "binned dataset over \"{}\" needs at least one bin",
                variable.name
            )));
        }
        let values = fit_column(df, &variable.name)?;
        let weights = match weight {
            Some(w) => Some(fit_column(df, w)?),
            None => None,
        };
        Ok(FitData::Binned(histogram(
            values.as_slice(),
            bins,
            (variable.low, variable.high),
            weights.as_deref(),
        )))
    }

    pub fn entries(&self) -> usize {
        match self {
            FitData::Unbinned { values, .. } => values.len(),
            FitData::Binned(h) => h.counts.len(),
        }
    }

    pub fn sum_weights(&self) -> Float {
        match self {
            FitData::Unbinned { weights, .. } => weights.iter().sum(),
            FitData::Binned(h) => h.integral(),
        }
    }

    pub fn is_binned(&self) -> bool {
        matches!(self, FitData::Binned(_))
    }
}

fn fit_column(df: &DataFrame, name: &str) -> AnalysisResult<Vec<Float>> {
    let s = df
        .column(name)
        .map_err(|_| AnalysisError::ColumnNotFound {
            column: name.to_string(),
            context: "fit dataset".to_string(),
        })?
        .cast(&DataType::Float64)?;
    Ok(s.f64()?
        .into_iter()
        .map(|v| v.unwrap_or(Float::NAN))
        .collect())
}

/// The `-2 ln L` objective for one PDF and one dataset.
struct Nll<'a> {
    pdf: &'a Pdf,
    data: &'a FitData,
}

impl Nll<'_> {
    fn value(&self, p: &[Float]) -> Float {
        match self.data {
            FitData::Unbinned { values, weights } => {
                -2.0 * values
                    .iter()
                    .zip(weights)
                    .map(|(&x, &w)| w * self.pdf.log_density(x, p))
                    .sum::<Float>()
            }
            FitData::Binned(h) => {
                -2.0 * h
                    .counts
                    .iter()
                    .zip(h.bin_edges.windows(2))
                    .map(|(&c, edge)| c * self.pdf.log_bin_prob(edge[0], edge[1], p))
                    .sum::<Float>()
            }
        }
    }
}

impl Function<Float, (), Infallible> for Nll<'_> {
    fn evaluate(&self, parameters: &[Float], _user_data: &mut ()) -> Result<Float, Infallible> {
        Ok(self.value(parameters))
    }
}

/// Fit status codes, mirroring the usual minimizer convention.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// Full accurate covariance matrix.
    Converged,
    /// Covariance had to be forced positive-definite.
    MadePosDef,
    /// Hessian is invalid or unavailable.
    InvalidHessian,
    /// Estimated distance to minimum above maximum.
    EdmAboveMax,
    /// Reached the call or step limit without converging.
    CallLimit,
    /// Any other failure worth investigating.
    Investigate,
}

impl FitStatus {
    /// The numeric status code (0 through 5).
    pub fn code(&self) -> u8 {
        match self {
            FitStatus::Converged => 0,
            FitStatus::MadePosDef => 1,
            FitStatus::InvalidHessian => 2,
            FitStatus::EdmAboveMax => 3,
            FitStatus::CallLimit => 4,
            FitStatus::Investigate => 5,
        }
    }

    /// Whether the fit is usable (converged, possibly with a repaired
    /// covariance).
    pub fn is_good(&self) -> bool {
        self.code() <= 1
    }
}

impl std::fmt::Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitStatus::Converged => write!(f, "converged"),
            FitStatus::MadePosDef => write!(f, "covariance forced positive-definite"),
            FitStatus::InvalidHessian => write!(f, "invalid Hessian"),
            FitStatus::EdmAboveMax => write!(f, "EDM above maximum"),
            FitStatus::CallLimit => write!(f, "call limit reached"),
            FitStatus::Investigate => write!(f, "investigate"),
        }
    }
}

/// Options for the retry fit loop.
#[derive(Clone, Debug)]
pub struct FitOptions {
    /// Maximum number of fit attempts before giving up.
    pub max_tries: usize,
    /// Maximum minimizer steps per attempt.
    pub max_steps: usize,
    /// Seed for the randomized restarts.
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_tries: 10,
            max_steps: 4000,
            seed: 0,
        }
    }
}

/// The outcome of a (possibly retried) fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitResult {
    pub status: FitStatus,
    pub code: u8,
    /// Best-fit parameter values, keyed by parameter name.
    pub parameters: IndexMap<String, Float>,
    /// Parameter uncertainties from the covariance diagonal, when available.
    pub errors: IndexMap<String, Float>,
    /// The objective value at the minimum.
    pub fval: Float,
    /// Number of attempts used.
    pub tries: usize,
}

/// Fit a PDF to a dataset by maximum likelihood with L-BFGS-B.
///
/// After a failed attempt the starting parameters are randomized uniformly
/// within their bounds and the fit retried, up to `max_tries` attempts; the
/// status of the final attempt is returned either way.
pub fn fit(pdf: &mut Pdf, data: &FitData, options: &FitOptions) -> AnalysisResult<FitResult> {
    let params = pdf.parameters();
    let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
    let bounds: Vec<(Float, Float)> = params.iter().map(|p| (p.low, p.high)).collect();
    let mut p0: Vec<Float> = params.iter().map(|p| p.value).collect();
    let mut rng = fastrand::Rng::with_seed(options.seed);
    let nll = Nll { pdf, data };
    let mut tries = 0;
    loop {
        tries += 1;
        let mut m = Minimizer::new_from_box(
            Box::new(LBFGSB::default()) as Box<dyn ganesh::Algorithm<Float, (), Infallible>>,
            params.len(),
        )
        .with_bounds(Some(bounds.clone()))
        .with_max_steps(options.max_steps);
        m.minimize(&nll, &p0, &mut ())
            .unwrap_or_else(|never| match never {});
        let (status, variances) = classify(&m.status);
        if status.is_good() || tries >= options.max_tries {
            if !status.is_good() {
                warn!(
                    "fit of {} did not converge after {tries} tries (status {status})",
                    pdf.name()
                );
            } else {
                info!("fit of {} finished with status {status} after {tries} tries", pdf.name());
            }
            let values: Vec<Float> = m.status.x.iter().copied().collect();
            let parameters: IndexMap<String, Float> =
                names.iter().cloned().zip(values.iter().copied()).collect();
            let errors: IndexMap<String, Float> = match &variances {
                Some(v) => names
                    .iter()
                    .cloned()
                    .zip(v.iter().map(|&var| var.max(0.0).sqrt()))
                    .collect(),
                None => IndexMap::new(),
            };
            let result = FitResult {
                status,
                code: status.code(),
                parameters,
                errors,
                fval: m.status.fx,
                tries,
            };
            drop(nll);
            pdf.set_values(&values);
            return Ok(result);
        }
        warn!(
            "fit attempt {tries} of {} returned status {status}; randomizing parameters and retrying",
            pdf.name()
        );
        p0 = bounds
            .iter()
            .map(|&(lo, hi)| lo + rng.f64() * (hi - lo))
            .collect();
    }
}

/// Map the minimizer status to a fit status, repairing a non-positive-definite
/// covariance with a growing diagonal jitter.
fn classify(status: &Status<Float>) -> (FitStatus, Option<DVector<Float>>) {
    if !status.converged {
        return (FitStatus::CallLimit, None);
    }
    let Some(cov) = &status.cov else {
        return (FitStatus::InvalidHessian, None);
    };
    if Cholesky::new(cov.clone()).is_some() {
        return (FitStatus::Converged, Some(cov.diagonal()));
    }
    let scale = cov.diagonal().amax().max(1.0);
    let mut jitter = 1e-12 * scale;
    for _ in 0..8 {
        let fixed = cov + DMatrix::identity(cov.nrows(), cov.ncols()) * jitter;
        if Cholesky::new(fixed.clone()).is_some() {
            return (FitStatus::MadePosDef, Some(fixed.diagonal()));
        }
        jitter *= 10.0;
    }
    (FitStatus::InvalidHessian, None)
}

/// Summary of a PDF persisted in the workspace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PdfSummary {
    pub shape: PdfShape,
    pub parameters: Vec<Parameter>,
}

/// Summary of a dataset persisted in the workspace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub entries: usize,
    pub sum_weights: Float,
    pub binned: bool,
}

/// A persisted fit workspace: the fit variable, PDFs, dataset summaries, and
/// fit results, serialized as JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workspace {
    pub year: u16,
    pub category: Category,
    pub version: String,
    pub variable: FitVariable,
    pub pdfs: IndexMap<String, PdfSummary>,
    pub datasets: IndexMap<String, DatasetSummary>,
    pub results: IndexMap<String, FitResult>,
}

impl Workspace {
    pub fn save(&self, path: &str) -> AnalysisResult<PathBuf> {
        let path = expand_path(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        serde_json::to_writer_pretty(File::create(&path)?, self)?;
        Ok(path)
    }

    pub fn load(path: &str) -> AnalysisResult<Self> {
        Ok(serde_json::from_reader(File::open(expand_path(path)?)?)?)
    }
}

/// Builds PDFs and datasets for one fit variable and runs the fits.
pub struct FittingTool {
    year: u16,
    category: Category,
    version: String,
    variable: FitVariable,
    signal_pdfs: IndexMap<String, Pdf>,
    background_pdfs: IndexMap<String, Pdf>,
    datasets: IndexMap<String, FitData>,
    results: IndexMap<String, FitResult>,
}

impl FittingTool {
    pub fn new(
        year: u16,
        category: Category,
        version: &str,
        varname: &str,
        vartitle: &str,
        low: Float,
        high: Float,
    ) -> AnalysisResult<Self> {
        Ok(Self {
            year,
            category,
            version: version.to_string(),
            variable: FitVariable::new(varname, vartitle, low, high)?,
            signal_pdfs: IndexMap::new(),
            background_pdfs: IndexMap::new(),
            datasets: IndexMap::new(),
            results: IndexMap::new(),
        })
    }

    pub fn variable(&self) -> &FitVariable {
        &self.variable
    }

    /// The filename suffix identifying this configuration.
    pub fn suffix(&self) -> String {
        format!("{}_{}_v{}", self.year, self.category, self.version)
    }

    fn dataset_key(&self, sample: &str, binned: bool) -> String {
        let kind = if binned { "DataHist" } else { "DataSet" };
        format!("{kind}_{sample}_{}_{}", self.year, self.category)
    }

    /// Build the signal PDF for a sample.
    ///
    /// Setting up a second signal PDF for the same sample is an error.
    pub fn make_signal_pdf(&mut self, sample: &str, shape: PdfShape) -> AnalysisResult<&Pdf> {
        if self.signal_pdfs.contains_key(sample) {
            return Err(AnalysisError::Custom(format!(
                "a signal PDF for {sample} is already set up"
            )));
        }
        let pdf = Pdf::new(&format!("{shape}_sig_{sample}"), shape, &self.variable);
        self.signal_pdfs.insert(sample.to_string(), pdf);
        Ok(&self.signal_pdfs[sample])
    }

    /// Build the background PDF for a sample.
    ///
    /// Setting up a second background PDF for the same sample is an error.
    pub fn make_background_pdf(&mut self, sample: &str, shape: PdfShape) -> AnalysisResult<&Pdf> {
        if self.background_pdfs.contains_key(sample) {
            return Err(AnalysisError::Custom(format!(
                "a background PDF for {sample} is already set up"
            )));
        }
        let pdf = Pdf::new(&format!("{shape}_bkg_{sample}"), shape, &self.variable);
        self.background_pdfs.insert(sample.to_string(), pdf);
        Ok(&self.background_pdfs[sample])
    }

    /// Load an unbinned dataset from a frame, keyed
    /// `DataSet_{samp}_{year}_{cat}`.
    pub fn load_dataset(
        &mut self,
        sample: &str,
        df: &DataFrame,
        weight: Option<&str>,
    ) -> AnalysisResult<String> {
        let key = self.dataset_key(sample, false);
        let data = FitData::unbinned(df, &self.variable, weight)?;
        info!(
            "loaded {key}: {} entries, sum of weights {:.4}",
            data.entries(),
            data.sum_weights()
        );
        self.datasets.insert(key.clone(), data);
        Ok(key)
    }

    /// Load a binned dataset from a frame, keyed
    /// `DataHist_{samp}_{year}_{cat}`.
    pub fn load_datahist(
        &mut self,
        sample: &str,
        df: &DataFrame,
        bins: usize,
        weight: Option<&str>,
    ) -> AnalysisResult<String> {
        let key = self.dataset_key(sample, true);
        let data = FitData::binned(df, &self.variable, bins, weight)?;
        info!(
            "loaded {key}: {} bins, integral {:.4}",
            data.entries(),
            data.sum_weights()
        );
        self.datasets.insert(key.clone(), data);
        Ok(key)
    }

    /// Fit a sample's signal or background PDF to its loaded dataset.
    pub fn fit(
        &mut self,
        sample: &str,
        signal: bool,
        binned: bool,
        options: &FitOptions,
    ) -> AnalysisResult<&FitResult> {
        let key = self.dataset_key(sample, binned);
        let data = self
            .datasets
            .get(&key)
            .ok_or_else(|| AnalysisError::InvalidOption {
                name: key.clone(),
                object: "dataset".to_string(),
            })?;
        let pdfs = if signal {
            &mut self.signal_pdfs
        } else {
            &mut self.background_pdfs
        };
        let pdf = pdfs
            .get_mut(sample)
            .ok_or_else(|| AnalysisError::InvalidOption {
                name: sample.to_string(),
                object: if signal {
                    "signal PDF".to_string()
                } else {
                    "background PDF".to_string()
                },
            })?;
        let result = fit(pdf, data, options)?;
        let result_key = pdf.name().to_string();
        self.results.insert(result_key.clone(), result);
        Ok(&self.results[&result_key])
    }

    /// Persist the fitted variables, PDFs, and dataset summaries to
    /// `{dir}/workspace_{suffix}.json`.
    pub fn save_workspace(&self, dir: &str) -> AnalysisResult<PathBuf> {
        let mut pdfs = IndexMap::new();
        for p in self.signal_pdfs.values().chain(self.background_pdfs.values()) {
            pdfs.insert(
                p.name().to_string(),
                PdfSummary {
                    shape: p.shape(),
                    parameters: p.parameters(),
                },
            );
        }
        let datasets = self
            .datasets
            .iter()
            .map(|(k, d)| {
                (
                    k.clone(),
                    DatasetSummary {
                        entries: d.entries(),
                        sum_weights: d.sum_weights(),
                        binned: d.is_binned(),
                    },
                )
            })
            .collect();
        let ws = Workspace {
            year: self.year,
            category: self.category,
            version: self.version.clone(),
            variable: self.variable.clone(),
            pdfs,
            datasets,
            results: self.results.clone(),
        };
        let dir = expand_path(dir)?;
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("workspace_{}.json", self.suffix()));
        serde_json::to_writer_pretty(File::create(&path)?, &ws)?;
        info!("wrote workspace {}", path.display());
        Ok(path)
    }
}
