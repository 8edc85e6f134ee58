//! Selection orchestration for a single sample.

use std::fs::File;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use log::info;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cutflow::CutFlow;
use crate::defines::{
    compute_sum_weights, define_gen_candidates, define_jets, define_jpsi, define_muons,
    define_sample_meta, define_weights, filter_triggers, trigger_column,
};
use crate::spec::{expand_path, scan_runs, scan_sample, EventSpec, HistogramSpecs};
use crate::utils::enums::{Category, Sample};
use crate::utils::{histogram, Histogram};
use crate::{AnalysisError, AnalysisResult, Float};

/// The JSON sidecar written next to each snapshot, listing its columns.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SnapshotSidecar {
    branches: Vec<String>,
}

/// Runs the selection for one sample: loads the frame, defines the derived
/// columns while recording the weighted cut-flow, and snapshots the tracked
/// branches.
pub struct Analyzer {
    sample: Sample,
    year: u16,
    version: String,
    category: Category,
    weights: bool,
    frame: Option<LazyFrame>,
    branches: IndexSet<String>,
    cut_flow: CutFlow,
}

impl Analyzer {
    /// Create an analyzer for one sample, year, and category.
    ///
    /// `weights` disabled marks the output with a `_NOWEIGHT` suffix and
    /// forces unit event weights. The category/year combination must have a
    /// trigger defined.
    pub fn new(
        sample: Sample,
        year: u16,
        version: &str,
        category: Category,
        weights: bool,
    ) -> AnalysisResult<Self> {
        trigger_column(category, year)?;
        Ok(Self {
            sample,
            year,
            version: version.to_string(),
            category,
            weights,
            frame: None,
            branches: IndexSet::new(),
            cut_flow: CutFlow::new(),
        })
    }

    /// The filename suffix identifying this configuration,
    /// `"{SAMP}_{YEAR}_{CAT}_v{VERS}"` (plus `"_NOWEIGHT"` when weights are
    /// disabled).
    pub fn suffix(&self) -> String {
        let mut s = format!(
            "{}_{}_{}_v{}",
            self.sample, self.year, self.category, self.version
        );
        if !self.weights {
            s.push_str("_NOWEIGHT");
        }
        s
    }

    pub fn sample(&self) -> Sample {
        self.sample
    }

    pub fn cut_flow(&self) -> &CutFlow {
        &self.cut_flow
    }

    /// The snapshot branch list accumulated so far.
    pub fn branches(&self) -> Vec<String> {
        self.branches.iter().cloned().collect()
    }

    fn frame(&self) -> AnalysisResult<&LazyFrame> {
        self.frame.as_ref().ok_or(AnalysisError::MissingFrame)
    }

    /// Use a pre-built frame (the metadata and weight columns must already
    /// be present).
    pub fn load_frame(&mut self, frame: LazyFrame, branches: Vec<String>) {
        self.frame = Some(frame);
        self.branches.extend(branches);
    }

    /// Load the sample's event files and attach metadata and generator
    /// weights from its run files.
    pub fn create_weighted_frame(&mut self, spec: &EventSpec) -> AnalysisResult<()> {
        let s = spec.get(&self.sample.to_string())?;
        let sum_weights = compute_sum_weights(scan_runs(s)?)?;
        let (lf, meta_branches) =
            define_sample_meta(scan_sample(s)?, self.sample, self.category, s.xsec, s.lumi);
        let (mut lf, weight_branches) = define_weights(lf, self.sample, sum_weights);
        if !self.weights {
            lf = lf.with_columns([lit(1.0).alias("w")]);
        }
        self.branches.extend(meta_branches);
        self.branches.extend(weight_branches);
        self.frame = Some(lf);
        Ok(())
    }

    /// Load the data sample's event files with unit weights.
    ///
    /// Errors when the configured sample is not recorded data.
    pub fn create_data_frame(&mut self, spec: &EventSpec) -> AnalysisResult<()> {
        if !self.sample.is_data() {
            return Err(AnalysisError::InvalidOption {
                name: self.sample.to_string(),
                object: "data frame (sample is simulation)".to_string(),
            });
        }
        let s = spec.get(&self.sample.to_string())?;
        let (lf, meta_branches) =
            define_sample_meta(scan_sample(s)?, self.sample, self.category, s.xsec, s.lumi);
        let (lf, weight_branches) = define_weights(lf, self.sample, 1.0);
        self.branches.extend(meta_branches);
        self.branches.extend(weight_branches);
        self.frame = Some(lf);
        Ok(())
    }

    /// Run the category's define/filter sequence, recording the weighted
    /// cut-flow after each selection step.
    ///
    /// Generator-level candidates are only built for the signal sample.
    pub fn define_columns(&mut self) -> AnalysisResult<()> {
        let lf = self.frame()?.clone();
        match self.category {
            Category::GluonFusion => {
                self.cut_flow.record("all_events", weighted_yield(&lf)?);

                let (lf, b) = filter_triggers(lf, self.category, self.year)?;
                self.branches.extend(b);
                self.cut_flow.record("trigger", weighted_yield(&lf)?);

                let (lf, b) = define_jpsi(lf);
                self.branches.extend(b);
                self.cut_flow.record("jpsi_candidate", weighted_yield(&lf)?);

                let (lf, b) = define_muons(lf);
                self.branches.extend(b);

                let (mut lf, b) = define_jets(lf, self.category, self.year)?;
                self.branches.extend(b);

                if self.sample.is_signal() {
                    let (gen_lf, b) = define_gen_candidates(lf);
                    lf = gen_lf;
                    self.branches.extend(b);
                }
                self.frame = Some(lf);
            }
        }
        Ok(())
    }

    /// Restrict the frame to one named sample and log its weighted yield.
    pub fn select_sample(&mut self, name: &str) -> AnalysisResult<()> {
        let lf = self.frame()?.clone().filter(col("sample").eq(lit(name)));
        let y = weighted_yield(&lf)?;
        info!("sample {name}: weighted yield {y:.4}");
        self.frame = Some(lf);
        Ok(())
    }

    /// Collect the tracked branches and write them to
    /// `{dir}/snapshot_{suffix}.parquet`, with a JSON sidecar listing the
    /// output columns. Returns the Parquet path.
    pub fn snapshot(&mut self, dir: &str) -> AnalysisResult<PathBuf> {
        let dir = expand_path(dir)?;
        std::fs::create_dir_all(&dir)?;
        let cols: Vec<Expr> = self.branches.iter().map(|b| col(b.as_str())).collect();
        let mut df = self.frame()?.clone().select(cols).collect()?;
        let path = dir.join(format!("snapshot_{}.parquet", self.suffix()));
        ParquetWriter::new(File::create(&path)?).finish(&mut df)?;
        let sidecar = SnapshotSidecar {
            branches: self.branches(),
        };
        serde_json::to_writer_pretty(File::create(self.sidecar_path(&dir))?, &sidecar)?;
        info!(
            "wrote snapshot {} ({} rows, {} columns)",
            path.display(),
            df.height(),
            df.width()
        );
        Ok(path)
    }

    /// Re-open a snapshot written by [`snapshot`](Analyzer::snapshot),
    /// restoring the branch list from the sidecar.
    pub fn read_snapshot(&mut self, dir: &str) -> AnalysisResult<()> {
        let dir = expand_path(dir)?;
        let sidecar: SnapshotSidecar =
            serde_json::from_reader(File::open(self.sidecar_path(&dir))?)?;
        let path = dir.join(format!("snapshot_{}.parquet", self.suffix()));
        self.frame = Some(LazyFrame::scan_parquet(path, ScanArgsParquet::default())?);
        self.branches = sidecar.branches.into_iter().collect();
        Ok(())
    }

    fn sidecar_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("snapshot_{}.json", self.suffix()))
    }

    /// Fill the weighted histograms of one definition group from the current
    /// frame.
    pub fn histograms(
        &self,
        specs: &HistogramSpecs,
        group: &str,
    ) -> AnalysisResult<IndexMap<String, Histogram>> {
        let defs = specs.group(group)?;
        for h in defs {
            h.validate()?;
        }
        let mut cols: Vec<Expr> = defs.iter().map(|h| col(h.name.as_str())).collect();
        cols.push(col("w"));
        let df = self.frame()?.clone().select(cols).collect()?;
        let weights = column_values(&df, "w", "histogram weights")?;
        let mut out = IndexMap::with_capacity(defs.len());
        for h in defs {
            let values = column_values(&df, &h.name, "histogram values")?;
            out.insert(
                h.name.clone(),
                histogram(&values, h.bin, (h.xmin, h.xmax), Some(&weights)),
            );
        }
        Ok(out)
    }
}

/// The sum of the `w` column of a frame.
pub fn weighted_yield(lf: &LazyFrame) -> AnalysisResult<Float> {
    let df = lf
        .clone()
        .select([col("w").sum().alias("yield")])
        .collect()?;
    Ok(df.column("yield")?.f64()?.get(0).unwrap_or(0.0))
}

fn column_values(df: &DataFrame, name: &str, context: &str) -> AnalysisResult<Vec<Float>> {
    let s = df
        .column(name)
        .map_err(|_| AnalysisError::ColumnNotFound {
            column: name.to_string(),
            context: context.to_string(),
        })?
        .cast(&DataType::Float64)?;
    // nulls fall outside every bin
    Ok(s.f64()?
        .into_iter()
        .map(|v| v.unwrap_or(Float::NAN))
        .collect())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::defines::define_weights;

    /// Capture yield/snapshot logs when running with RUST_LOG set.
    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn test_frame() -> (LazyFrame, Vec<String>) {
        let df = df![
            "sample" => ["MC_SIG", "MC_SIG", "MC_SIG", "MC_SIG"],
            "HLT_Dimuon25_Jpsi" => [true, true, true, false],
            "nJpsi" => [1i32, 1, 0, 1],
            "Jpsi_mass" => [3.09, 3.10, 3.05, 3.08],
            "Jpsi_pt" => [25.0, 30.0, 22.0, 40.0],
            "Jpsi_eta" => [0.1, -0.4, 1.2, 0.3],
            "Jpsi_phi" => [0.5, 1.5, -2.0, 3.0],
            "muminus_pt" => [10.0, 12.0, 9.0, 20.0],
            "muminus_eta" => [0.2, -0.5, 1.1, 0.2],
            "muminus_phi" => [0.4, 1.4, -2.1, 3.0],
            "muplus_pt" => [15.0, 18.0, 13.0, 20.0],
            "muplus_eta" => [0.0, -0.3, 1.3, 0.4],
            "muplus_phi" => [0.6, 1.6, -1.9, -3.1],
            "jet1_pt" => [45.0, 25.0, 30.0, 50.0],
            "jet1_eta" => [1.0, -2.0, 0.5, 2.0],
            "jet1_phi" => [2.0, -1.0, 0.0, 1.0],
            "jet1_mass" => [8.0, 6.0, 7.0, 9.0],
            "jet1_btag_cvl" => [0.6, 0.2, 0.4, 0.8],
            "jet2_pt" => [22.0, 15.0, 21.0, 30.0],
            "jet2_eta" => [-1.5, 0.8, 2.7, -0.2],
            "jet2_phi" => [-2.5, 2.5, 1.0, 0.2],
            "jet2_mass" => [5.0, 4.0, 5.5, 6.0],
            "jet2_btag_cvl" => [0.1, 0.3, 0.2, 0.5],
            "genWeight" => [1.0, 1.0, 1.0, 1.0],
            "xsec" => [0.01, 0.01, 0.01, 0.01],
            "lumi" => [100.0, 100.0, 100.0, 100.0],
        ]
        .unwrap();
        let (lf, branches) = define_weights(df.lazy(), Sample::McSig, 4.0);
        (lf, branches)
    }

    fn gf_analyzer(sample: Sample, weights: bool) -> Analyzer {
        Analyzer::new(sample, 2018, "1", Category::GluonFusion, weights).unwrap()
    }

    #[test]
    fn test_suffix() {
        assert_eq!(
            gf_analyzer(Sample::McSig, true).suffix(),
            "MC_SIG_2018_GF_v1"
        );
        assert_eq!(
            gf_analyzer(Sample::DataBkg, false).suffix(),
            "DATA_BKG_2018_GF_v1_NOWEIGHT"
        );
    }

    #[test]
    fn test_new_rejects_unknown_trigger_year() {
        assert!(Analyzer::new(Sample::McSig, 2016, "1", Category::GluonFusion, true).is_err());
    }

    #[test]
    fn test_data_frame_requires_data_sample() {
        let mut an = gf_analyzer(Sample::McSig, true);
        let spec = EventSpec::default();
        assert!(matches!(
            an.create_data_frame(&spec),
            Err(AnalysisError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_missing_frame() {
        let mut an = gf_analyzer(Sample::McSig, true);
        assert!(matches!(
            an.define_columns(),
            Err(AnalysisError::MissingFrame)
        ));
    }

    #[test]
    fn test_define_columns_cut_flow() {
        let mut an = gf_analyzer(Sample::DataBkg, true);
        let (lf, branches) = test_frame();
        an.load_frame(lf, branches);
        an.define_columns().unwrap();
        let cf = an.cut_flow();
        // per-event weight is 0.01 * 1 * 100 / 4 = 0.25
        assert_relative_eq!(cf.get("00_all_events").unwrap(), 1.0);
        assert_relative_eq!(cf.get("01_trigger").unwrap(), 0.75);
        assert_relative_eq!(cf.get("02_jpsi_candidate").unwrap(), 0.5);
        assert!(cf.is_monotonic());
        let branches = an.branches();
        for b in ["w", "trigger", "nJpsi", "n_good_jets", "muminus_pt"] {
            assert!(branches.iter().any(|x| x == b), "missing branch {b}");
        }
        // not a signal sample, no generator candidates
        assert!(!branches.iter().any(|x| x.starts_with("gen_")));
    }

    #[test]
    fn test_select_sample_and_snapshot_round_trip() {
        init_logs();
        // a non-signal sample keeps the pipeline to the reco columns
        let mut an2 = gf_analyzer(Sample::DataBkg, true);
        let (lf, branches) = test_frame();
        an2.load_frame(lf, branches);
        an2.define_columns().unwrap();
        an2.select_sample("MC_SIG").unwrap();

        let dir = std::env::temp_dir().join(format!("jpsicc_snapshot_{}", std::process::id()));
        let dir_str = dir.to_str().unwrap().to_string();
        let path = an2.snapshot(&dir_str).unwrap();
        assert!(path.exists());

        let mut reread = gf_analyzer(Sample::DataBkg, true);
        reread.read_snapshot(&dir_str).unwrap();
        assert_eq!(reread.branches(), an2.branches());
        let df = reread.frame().unwrap().clone().collect().unwrap();
        assert_eq!(df.height(), 2);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_histograms() {
        let mut an = gf_analyzer(Sample::DataBkg, true);
        let (lf, branches) = test_frame();
        an.load_frame(lf, branches);
        let specs: HistogramSpecs = serde_json::from_str(
            r#"{"Jpsi": [{"name": "Jpsi_mass", "title": "m", "bin": 2, "xmin": 3.0, "xmax": 3.2}]}"#,
        )
        .unwrap();
        let hists = an.histograms(&specs, "Jpsi").unwrap();
        let h = &hists["Jpsi_mass"];
        // all four events in range, each weighted 0.25
        assert_relative_eq!(h.integral(), 1.0);
        assert_eq!(h.counts.len(), 2);
        assert!(an.histograms(&specs, "muon").is_err());
    }

    #[test]
    fn test_histograms_reject_invalid_definitions() {
        let mut an = gf_analyzer(Sample::DataBkg, true);
        let (lf, branches) = test_frame();
        an.load_frame(lf, branches);
        let zero_bins: HistogramSpecs = serde_json::from_str(
            r#"{"Jpsi": [{"name": "Jpsi_mass", "title": "m", "bin": 0, "xmin": 3.0, "xmax": 3.2}]}"#,
        )
        .unwrap();
        assert!(matches!(
            an.histograms(&zero_bins, "Jpsi"),
            Err(AnalysisError::Custom(_))
        ));
        let inverted: HistogramSpecs = serde_json::from_str(
            r#"{"Jpsi": [{"name": "Jpsi_mass", "title": "m", "bin": 2, "xmin": 3.2, "xmax": 3.0}]}"#,
        )
        .unwrap();
        assert!(matches!(
            an.histograms(&inverted, "Jpsi"),
            Err(AnalysisError::InvalidRange { .. })
        ));
    }
}
