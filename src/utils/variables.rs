use polars::prelude::*;

use crate::utils::list_to_name;
use crate::utils::vectors::Vec4;

/// The invariant mass of the summed four-momenta of `constituents`, aliased
/// `m_{a, b, ...}`.
pub fn mass<I, S>(constituents: I) -> Expr
where
    I: IntoIterator<Item = S> + Clone,
    S: Into<PlSmallStr>,
{
    let name = list_to_name(&constituents);
    Vec4::sum(constituents).mag().alias(format!("m_{name}"))
}

fn candidate_suite(out: &str, total: Vec4) -> Vec<Expr> {
    vec![
        total.mag().alias(format!("{out}_mass")),
        total.e().alias(format!("{out}_energy")),
        total.eta().alias(format!("{out}_eta")),
        total.phi().alias(format!("{out}_phi")),
        total.p().alias(format!("{out}_p")),
        total.pt().alias(format!("{out}_pt")),
        total.mt().alias(format!("{out}_mt")),
    ]
}

/// The full kinematic column suite of a composite candidate built by summing
/// the Cartesian four-momenta of `constituents`.
///
/// Produces `{out}_mass`, `{out}_energy`, `{out}_eta`, `{out}_phi`,
/// `{out}_p`, `{out}_pt`, and `{out}_mt`.
pub fn candidate<I, S>(out: &str, constituents: I) -> Vec<Expr>
where
    I: IntoIterator<Item = S>,
    S: Into<PlSmallStr>,
{
    candidate_suite(out, Vec4::sum(constituents))
}

/// Same column suite as [`candidate`], but the constituents are read from
/// their `(pt, eta, phi, energy)` columns.
pub fn candidate_from_kin<I, S>(out: &str, constituents: I) -> Vec<Expr>
where
    I: IntoIterator<Item = S>,
    S: Into<PlSmallStr>,
{
    candidate_suite(out, Vec4::sum_kinematics(constituents))
}

/// The azimuthal difference of two phi expressions, wrapped to (-pi, pi].
pub fn wrap_delta_phi(phi_a: Expr, phi_b: Expr) -> Expr {
    let d = phi_a - phi_b;
    d.clone().sin().arctan2(d.cos())
}

/// The angular separation `dR = sqrt(dEta^2 + dPhi^2)` of two particles with
/// `{name}_eta` and `{name}_phi` columns, aliased `dR_{a}_{b}`.
pub fn delta_r(a: &str, b: &str) -> Expr {
    let deta = col(format!("{a}_eta")) - col(format!("{b}_eta"));
    let dphi = wrap_delta_phi(col(format!("{a}_phi")), col(format!("{b}_phi")));
    (deta.clone() * deta + dphi.clone() * dphi)
        .sqrt()
        .alias(format!("dR_{a}_{b}"))
}

/// The separation column group of two particles: `dR_{a}_{b}`,
/// `dEta_{a}_{b}`, `dPhi_{a}_{b}` (wrapped), and `dPt_{a}_{b}`.
pub fn separation(a: &str, b: &str) -> Vec<Expr> {
    vec![
        delta_r(a, b),
        (col(format!("{a}_eta")) - col(format!("{b}_eta"))).alias(format!("dEta_{a}_{b}")),
        wrap_delta_phi(col(format!("{a}_phi")), col(format!("{b}_phi")))
            .alias(format!("dPhi_{a}_{b}")),
        (col(format!("{a}_pt")) - col(format!("{b}_pt"))).alias(format!("dPt_{a}_{b}")),
    ]
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::tests::val1;
    use crate::utils::vectors::tests::add_vec4;

    #[test]
    fn test_mass() {
        let mut df = DataFrame::empty();
        add_vec4(&mut df, "mu1", [0.0, 1.0, 0.0, 2.0]);
        add_vec4(&mut df, "mu2", [0.0, -1.0, 0.0, 2.0]);
        let res = df
            .lazy()
            .with_columns([mass(["mu1", "mu2"])])
            .collect()
            .unwrap();
        // back-to-back, p cancels: m = sqrt(16 - 0) = 4
        assert_relative_eq!(val1(&res, "m_mu1, mu2"), 4.0);
    }

    #[test]
    fn test_candidate_suite() {
        let mut df = DataFrame::empty();
        add_vec4(&mut df, "a", [1.0, 0.0, 1.0, 3.0]);
        add_vec4(&mut df, "b", [0.0, 1.0, 1.0, 3.0]);
        let res = df
            .lazy()
            .with_columns(candidate("cand", ["a", "b"]))
            .collect()
            .unwrap();
        // total = (1, 1, 2, 6)
        assert_relative_eq!(val1(&res, "cand_mass"), 30.0_f64.sqrt());
        assert_relative_eq!(val1(&res, "cand_energy"), 6.0);
        assert_relative_eq!(val1(&res, "cand_pt"), 2.0_f64.sqrt());
        assert_relative_eq!(val1(&res, "cand_eta"), (2.0 / 2.0_f64.sqrt()).asinh());
        assert_relative_eq!(val1(&res, "cand_phi"), std::f64::consts::FRAC_PI_4);
        assert_relative_eq!(val1(&res, "cand_p"), 6.0_f64.sqrt());
        assert_relative_eq!(val1(&res, "cand_mt"), 32.0_f64.sqrt());
    }

    #[test]
    fn test_candidate_constructors_agree() {
        let mut df = DataFrame::empty();
        let a = add_vec4(&mut df, "a", [3.0, 4.0, 5.0, 10.0]);
        let b = add_vec4(&mut df, "b", [-1.0, 2.0, 0.5, 4.0]);
        let res = df
            .lazy()
            .with_columns([
                a.pt().alias("a_pt"),
                a.eta().alias("a_eta"),
                a.phi().alias("a_phi"),
                b.pt().alias("b_pt"),
                b.eta().alias("b_eta"),
                b.phi().alias("b_phi"),
            ])
            .with_columns(candidate("cart", ["a", "b"]))
            .with_columns(candidate_from_kin("kin", ["a", "b"]))
            .collect()
            .unwrap();
        for suffix in ["mass", "energy", "eta", "phi", "p", "pt", "mt"] {
            assert_relative_eq!(
                val1(&res, &format!("cart_{suffix}")),
                val1(&res, &format!("kin_{suffix}")),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn test_separation_and_wrapping() {
        let df = df![
            "a_eta" => [0.5],
            "a_phi" => [3.0],
            "a_pt" => [30.0],
            "b_eta" => [-0.5],
            "b_phi" => [-3.0],
            "b_pt" => [20.0],
        ]
        .unwrap();
        let res = df
            .lazy()
            .with_columns(separation("a", "b"))
            .collect()
            .unwrap();
        // raw dPhi = 6.0 wraps to 6.0 - 2*pi
        let dphi = 6.0 - std::f64::consts::TAU;
        assert_relative_eq!(val1(&res, "dPhi_a_b"), dphi, epsilon = 1e-12);
        assert_relative_eq!(val1(&res, "dEta_a_b"), 1.0);
        assert_relative_eq!(val1(&res, "dPt_a_b"), 10.0);
        assert_relative_eq!(
            val1(&res, "dR_a_b"),
            (1.0 + dphi * dphi).sqrt(),
            epsilon = 1e-12
        );
    }
}
