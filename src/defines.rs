//! Column definitions and selection filters.
//!
//! Each function takes a [`LazyFrame`], attaches derived columns or applies a
//! filter, and returns the modified frame together with the list of output
//! column names it contributes to the snapshot branch list.

use log::warn;
use polars::prelude::*;

use crate::utils::enums::{Category, Sample};
use crate::utils::variables::{candidate, candidate_from_kin, separation};
use crate::utils::vectors::Vec4;
use crate::{AnalysisError, AnalysisResult, Float};

/// The trigger column for a given analysis category and data-taking year.
pub fn trigger_column(category: Category, year: u16) -> AnalysisResult<&'static str> {
    match (category, year) {
        (Category::GluonFusion, 2018) => Ok("HLT_Dimuon25_Jpsi"),
        _ => Err(AnalysisError::InvalidOption {
            name: format!("{category}, {year}"),
            object: "trigger".to_string(),
        }),
    }
}

/// Attach the literal per-sample metadata columns `sample`,
/// `sample_category`, `xsec`, and `lumi`.
pub fn define_sample_meta(
    lf: LazyFrame,
    sample: Sample,
    category: Category,
    xsec: Float,
    lumi: Float,
) -> (LazyFrame, Vec<String>) {
    let lf = lf.with_columns([
        lit(sample.to_string()).alias("sample"),
        lit(category.to_string()).alias("sample_category"),
        lit(xsec).alias("xsec"),
        lit(lumi).alias("lumi"),
    ]);
    (
        lf,
        ["sample", "sample_category", "xsec", "lumi"]
            .map(String::from)
            .to_vec(),
    )
}

/// Sum the generator weights over the runs frame.
///
/// Returns the total of `genEventSumw`; a mismatch against the raw
/// `genEventCount` total is logged, since it signals non-trivial generator
/// weights (expected for some samples, surprising for others).
pub fn compute_sum_weights(runs: LazyFrame) -> AnalysisResult<Float> {
    let sums = runs
        .select([
            col("genEventSumw").sum().alias("sumw"),
            col("genEventCount")
                .sum()
                .cast(DataType::Float64)
                .alias("count"),
        ])
        .collect()?;
    let sumw = sums
        .column("sumw")?
        .f64()?
        .get(0)
        .ok_or_else(|| AnalysisError::Custom("empty runs frame".to_string()))?;
    let count = sums
        .column("count")?
        .f64()?
        .get(0)
        .ok_or_else(|| AnalysisError::Custom("empty runs frame".to_string()))?;
    if (sumw - count).abs() > 1e-6 * count.abs().max(1.0) {
        warn!("sum of genEventSumw ({sumw}) differs from genEventCount ({count}); the sample carries non-trivial generator weights");
    }
    Ok(sumw)
}

/// Define the per-event weight column `w`.
///
/// For simulation, `w = xsec * genWeight * lumi / sum_weights`; for data the
/// weight is unity. `sum_weights` is materialized alongside.
pub fn define_weights(
    lf: LazyFrame,
    sample: Sample,
    sum_weights: Float,
) -> (LazyFrame, Vec<String>) {
    let w = if sample.is_data() {
        lit(1.0).alias("w")
    } else {
        (col("xsec") * col("genWeight") * col("lumi") / lit(sum_weights)).alias("w")
    };
    let lf = lf.with_columns([w, lit(sum_weights).alias("sum_weights")]);
    (lf, ["w", "sum_weights"].map(String::from).to_vec())
}

/// Require the category trigger and record it in the `trigger` column.
pub fn filter_triggers(
    lf: LazyFrame,
    category: Category,
    year: u16,
) -> AnalysisResult<(LazyFrame, Vec<String>)> {
    let hlt = trigger_column(category, year)?;
    let lf = lf
        .with_columns([col(hlt).alias("trigger")])
        .filter(col("trigger"));
    Ok((lf, vec!["trigger".to_string()]))
}

/// Require at least one reconstructed J/ψ candidate.
pub fn define_jpsi(lf: LazyFrame) -> (LazyFrame, Vec<String>) {
    let lf = lf.filter(col("nJpsi").gt(lit(0)));
    (
        lf,
        ["nJpsi", "Jpsi_mass", "Jpsi_pt", "Jpsi_eta", "Jpsi_phi"]
            .map(String::from)
            .to_vec(),
    )
}

/// Contribute the muon column group to the snapshot branch list.
pub fn define_muons(lf: LazyFrame) -> (LazyFrame, Vec<String>) {
    (
        lf,
        [
            "muminus_pt",
            "muminus_eta",
            "muminus_phi",
            "muplus_pt",
            "muplus_eta",
            "muplus_phi",
        ]
        .map(String::from)
        .to_vec(),
    )
}

/// Flag the leading and subleading jets passing the good-jet requirements
/// and count them.
///
/// A good jet has pt > 20, |eta| < 2.5, and a c-vs-light tag above -1.
pub fn define_jets(
    lf: LazyFrame,
    category: Category,
    year: u16,
) -> AnalysisResult<(LazyFrame, Vec<String>)> {
    let good = |j: &str| {
        col(format!("{j}_pt"))
            .gt(lit(20.0))
            .and(col(format!("{j}_eta")).abs().lt(lit(2.5)))
            .and(col(format!("{j}_btag_cvl")).gt(lit(-1.0)))
    };
    let lf = match (category, year) {
        (Category::GluonFusion, 2018) => lf
            .with_columns([
                good("jet1").alias("jet1_good"),
                good("jet2").alias("jet2_good"),
            ])
            .with_columns([(col("jet1_good").cast(DataType::Int32)
                + col("jet2_good").cast(DataType::Int32))
            .alias("n_good_jets")]),
        _ => {
            return Err(AnalysisError::InvalidOption {
                name: format!("{category}, {year}"),
                object: "good-jet definition".to_string(),
            })
        }
    };
    let mut branches = vec![
        "jet1_good".to_string(),
        "jet2_good".to_string(),
        "n_good_jets".to_string(),
    ];
    for j in ["jet1", "jet2"] {
        for s in ["pt", "eta", "phi", "mass", "btag_cvl"] {
            branches.push(format!("{j}_{s}"));
        }
    }
    Ok((lf, branches))
}

/// Build the generator-level candidate columns for the signal sample.
///
/// From the generator muon and charm daughter columns this derives the muon
/// separations, the J/ψ candidate suite, the pt-ordered leading and
/// subleading charm, the di-charm candidate suite, the charm-J/ψ and
/// di-charm-J/ψ separations, and the Higgs candidate from J/ψ ⊕ di-charm.
pub fn define_gen_candidates(lf: LazyFrame) -> (LazyFrame, Vec<String>) {
    let mut branches = Vec::new();
    // collider kinematics of each generator muon, for the separations
    let mut mu_kin = Vec::new();
    for mu in ["gen_mum", "gen_mup"] {
        let v = Vec4::new(mu);
        mu_kin.extend([
            v.pt().alias(format!("{mu}_pt")),
            v.eta().alias(format!("{mu}_eta")),
            v.phi().alias(format!("{mu}_phi")),
        ]);
        branches.extend(
            ["pt", "eta", "phi", "energy"]
                .iter()
                .map(|s| format!("{mu}_{s}")),
        );
    }
    let lf = lf.with_columns(mu_kin);

    let lf = lf
        .with_columns(separation("gen_mum", "gen_mup"))
        .with_columns(candidate("gen_Jpsi", ["gen_mum", "gen_mup"]));
    branches.extend(
        ["dR", "dEta", "dPhi", "dPt"]
            .iter()
            .map(|s| format!("{s}_gen_mum_gen_mup")),
    );
    branches.extend(candidate_branches("gen_Jpsi"));

    // order the charm pair by pt
    let charm_leads = col("gen_charm_pt").gt_eq(col("gen_anticharm_pt"));
    let mut ordered = Vec::new();
    for s in ["pt", "eta", "phi", "energy"] {
        ordered.push(
            when(charm_leads.clone())
                .then(col(format!("gen_charm_{s}")))
                .otherwise(col(format!("gen_anticharm_{s}")))
                .alias(format!("gen_leadcharm_{s}")),
        );
        ordered.push(
            when(charm_leads.clone())
                .then(col(format!("gen_anticharm_{s}")))
                .otherwise(col(format!("gen_charm_{s}")))
                .alias(format!("gen_subcharm_{s}")),
        );
        branches.push(format!("gen_leadcharm_{s}"));
        branches.push(format!("gen_subcharm_{s}"));
    }
    let lf = lf.with_columns(ordered);

    let lf = lf.with_columns(candidate_from_kin(
        "gen_dicharm",
        ["gen_leadcharm", "gen_subcharm"],
    ));
    branches.extend(candidate_branches("gen_dicharm"));

    let mut seps = Vec::new();
    for a in ["gen_leadcharm", "gen_subcharm", "gen_dicharm"] {
        seps.extend(separation(a, "gen_Jpsi"));
        branches.extend(
            ["dR", "dEta", "dPhi", "dPt"]
                .iter()
                .map(|s| format!("{s}_{a}_gen_Jpsi")),
        );
    }
    let lf = lf.with_columns(seps);

    let lf = lf.with_columns(candidate_from_kin(
        "gen_higgs",
        ["gen_Jpsi", "gen_dicharm"],
    ));
    branches.extend(candidate_branches("gen_higgs"));

    (lf, branches)
}

fn candidate_branches(out: &str) -> Vec<String> {
    ["mass", "energy", "eta", "phi", "p", "pt", "mt"]
        .iter()
        .map(|s| format!("{out}_{s}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::tests::val1;
    use crate::utils::vectors::tests::{add_kin4, add_vec4};

    #[test]
    fn test_trigger_lookup() {
        assert_eq!(
            trigger_column(Category::GluonFusion, 2018).unwrap(),
            "HLT_Dimuon25_Jpsi"
        );
        assert!(matches!(
            trigger_column(Category::GluonFusion, 2017),
            Err(AnalysisError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_sample_meta() {
        let df = df!["x" => [1.0]].unwrap();
        let (lf, branches) =
            define_sample_meta(df.lazy(), Sample::McSig, Category::GluonFusion, 0.01, 59.7);
        let res = lf.collect().unwrap();
        assert_eq!(branches, vec!["sample", "sample_category", "xsec", "lumi"]);
        assert_eq!(
            res.column("sample").unwrap().str().unwrap().get(0),
            Some("MC_SIG")
        );
        assert_eq!(
            res.column("sample_category").unwrap().str().unwrap().get(0),
            Some("GF")
        );
        assert_relative_eq!(val1(&res, "xsec"), 0.01);
        assert_relative_eq!(val1(&res, "lumi"), 59.7);
    }

    #[test]
    fn test_sum_weights() {
        let runs = df![
            "genEventSumw" => [10.0, 20.0],
            "genEventCount" => [10i64, 20],
        ]
        .unwrap();
        assert_relative_eq!(compute_sum_weights(runs.lazy()).unwrap(), 30.0);
    }

    #[test]
    fn test_weights_mc_vs_data() {
        let df = df![
            "genWeight" => [2.0],
            "xsec" => [0.5],
            "lumi" => [10.0],
        ]
        .unwrap();
        let (lf, branches) = define_weights(df.clone().lazy(), Sample::McSig, 4.0);
        assert_eq!(branches, vec!["w", "sum_weights"]);
        let res = lf.collect().unwrap();
        assert_relative_eq!(val1(&res, "w"), 0.5 * 2.0 * 10.0 / 4.0);
        assert_relative_eq!(val1(&res, "sum_weights"), 4.0);
        let (lf, _) = define_weights(df.lazy(), Sample::DataBkg, 4.0);
        let res = lf.collect().unwrap();
        assert_relative_eq!(val1(&res, "w"), 1.0);
    }

    #[test]
    fn test_trigger_filter() {
        let df = df![
            "HLT_Dimuon25_Jpsi" => [true, false, true],
            "x" => [1.0, 2.0, 3.0],
        ]
        .unwrap();
        let (lf, branches) = filter_triggers(df.lazy(), Category::GluonFusion, 2018).unwrap();
        assert_eq!(branches, vec!["trigger"]);
        let res = lf.collect().unwrap();
        assert_eq!(res.height(), 2);
        assert!(res.column("trigger").unwrap().bool().unwrap().all());
    }

    #[test]
    fn test_jpsi_filter() {
        let df = df!["nJpsi" => [0i32, 1, 2]].unwrap();
        let (lf, _) = define_jpsi(df.lazy());
        assert_eq!(lf.collect().unwrap().height(), 2);
    }

    #[test]
    fn test_good_jets() {
        let df = df![
            "jet1_pt" => [25.0], "jet1_eta" => [1.0], "jet1_btag_cvl" => [0.5],
            "jet2_pt" => [10.0], "jet2_eta" => [0.2], "jet2_btag_cvl" => [0.3],
        ]
        .unwrap();
        let (lf, _) = define_jets(df.lazy(), Category::GluonFusion, 2018).unwrap();
        let res = lf.collect().unwrap();
        assert!(res.column("jet1_good").unwrap().bool().unwrap().get(0).unwrap());
        assert!(!res.column("jet2_good").unwrap().bool().unwrap().get(0).unwrap());
        assert_eq!(
            res.column("n_good_jets").unwrap().i32().unwrap().get(0),
            Some(1)
        );
        assert!(matches!(
            define_jets(df!["x" => [0.0]].unwrap().lazy(), Category::GluonFusion, 2016),
            Err(AnalysisError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_gen_candidates() {
        let mut df = DataFrame::empty();
        // back-to-back muons in the transverse plane
        add_vec4(&mut df, "gen_mum", [1.0, 0.0, 0.0, 2.0]);
        add_vec4(&mut df, "gen_mup", [-1.0, 0.0, 0.0, 2.0]);
        // the anticharm leads in pt
        add_kin4(&mut df, "gen_charm", [15.0, 0.4, 0.2, 20.0]);
        add_kin4(&mut df, "gen_anticharm", [30.0, -0.1, 1.0, 35.0]);
        let (lf, branches) = define_gen_candidates(df.lazy());
        let res = lf.collect().unwrap();
        // J/psi from the muon pair: p cancels, m = E
        assert_relative_eq!(val1(&res, "gen_Jpsi_mass"), 4.0, epsilon = 1e-10);
        assert_relative_eq!(val1(&res, "gen_Jpsi_energy"), 4.0);
        // pt ordering swaps charm and anticharm
        assert_relative_eq!(val1(&res, "gen_leadcharm_pt"), 30.0);
        assert_relative_eq!(val1(&res, "gen_subcharm_pt"), 15.0);
        assert_relative_eq!(val1(&res, "gen_leadcharm_eta"), -0.1);
        // energies add up the chain
        assert_relative_eq!(val1(&res, "gen_dicharm_energy"), 55.0);
        assert_relative_eq!(val1(&res, "gen_higgs_energy"), 59.0);
        for b in &branches {
            assert!(res.column(b).is_ok(), "missing branch {b}");
        }
    }
}
