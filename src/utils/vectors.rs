use auto_ops::impl_op_ex;
use polars::prelude::*;

/// A lazy three-vector whose components are polars expressions.
///
/// Component columns follow the `{name}_x`, `{name}_y`, `{name}_z` convention.
#[derive(Clone)]
pub struct Vec3([Expr; 3]);
impl From<[Expr; 3]> for Vec3 {
    fn from(value: [Expr; 3]) -> Self {
        Self([
            value[0].clone().cast(DataType::Float64),
            value[1].clone().cast(DataType::Float64),
            value[2].clone().cast(DataType::Float64),
        ])
    }
}
impl Vec3 {
    pub fn new<S: Into<PlSmallStr>>(name: S) -> Self {
        let name: PlSmallStr = name.into();
        Self([
            col(format!("{}_x", name)).cast(DataType::Float64),
            col(format!("{}_y", name)).cast(DataType::Float64),
            col(format!("{}_z", name)).cast(DataType::Float64),
        ])
    }
    pub fn alias<S: AsRef<str>>(&self, name: S) -> [Expr; 3] {
        let b = name.as_ref();
        [
            self.0[0].clone().alias(format!("{b}_x")),
            self.0[1].clone().alias(format!("{b}_y")),
            self.0[2].clone().alias(format!("{b}_z")),
        ]
    }
    pub fn x(&self) -> Expr {
        self.0[0].clone()
    }
    pub fn y(&self) -> Expr {
        self.0[1].clone()
    }
    pub fn z(&self) -> Expr {
        self.0[2].clone()
    }

    pub fn dot(&self, other: &Self) -> Expr {
        self.x() * other.x() + self.y() * other.y() + self.z() * other.z()
    }
    pub fn mag2(&self) -> Expr {
        self.dot(self)
    }
    pub fn mag(&self) -> Expr {
        self.mag2().sqrt()
    }
    pub fn costheta(&self) -> Expr {
        self.z() / self.mag()
    }
    pub fn theta(&self) -> Expr {
        self.costheta().arccos()
    }
    pub fn phi(&self) -> Expr {
        self.y().arctan2(self.x())
    }
    pub fn add(&self, other: &Self) -> Self {
        Self([
            self.x() + other.x(),
            self.y() + other.y(),
            self.z() + other.z(),
        ])
    }
    pub fn sub(&self, other: &Self) -> Self {
        Self([
            self.x() - other.x(),
            self.y() - other.y(),
            self.z() - other.z(),
        ])
    }
    pub fn neg(&self) -> Self {
        Self([-self.x(), -self.y(), -self.z()])
    }
}

impl_op_ex!(+ |a: &Vec3, b: &Vec3| -> Vec3 { a.add(b) });
impl_op_ex!(-|a: &Vec3, b: &Vec3| -> Vec3 { a.sub(b) });
impl_op_ex!(-|a: &Vec3| -> Vec3 { a.neg() });

/// A lazy four-momentum whose components are polars expressions.
///
/// Component columns follow the `{name}_px`, `{name}_py`, `{name}_pz`,
/// `{name}_energy` convention used by the generator-level branches.
#[derive(Clone)]
pub struct Vec4([Expr; 4]);
impl From<[Expr; 4]> for Vec4 {
    fn from(value: [Expr; 4]) -> Self {
        Self([
            value[0].clone().cast(DataType::Float64),
            value[1].clone().cast(DataType::Float64),
            value[2].clone().cast(DataType::Float64),
            value[3].clone().cast(DataType::Float64),
        ])
    }
}
impl Vec4 {
    /// Read a four-momentum from its Cartesian component columns.
    pub fn new<S: Into<PlSmallStr>>(name: S) -> Self {
        let name: PlSmallStr = name.into();
        Self([
            col(format!("{}_px", name)).cast(DataType::Float64),
            col(format!("{}_py", name)).cast(DataType::Float64),
            col(format!("{}_pz", name)).cast(DataType::Float64),
            col(format!("{}_energy", name)).cast(DataType::Float64),
        ])
    }

    /// Read a four-momentum from its collider-kinematics columns
    /// (`{name}_pt`, `{name}_eta`, `{name}_phi`, `{name}_energy`).
    pub fn from_kinematics<S: Into<PlSmallStr>>(name: S) -> Self {
        let name: PlSmallStr = name.into();
        let pt = col(format!("{}_pt", name)).cast(DataType::Float64);
        let eta = col(format!("{}_eta", name)).cast(DataType::Float64);
        let phi = col(format!("{}_phi", name)).cast(DataType::Float64);
        let e = col(format!("{}_energy", name)).cast(DataType::Float64);
        Self([
            pt.clone() * phi.clone().cos(),
            pt.clone() * phi.sin(),
            pt * eta.sinh(),
            e,
        ])
    }

    /// Sum the four-momenta of several Cartesian-component particles.
    pub fn sum<I, S>(constituents: I) -> Vec4
    where
        I: IntoIterator<Item = S>,
        S: Into<PlSmallStr>,
    {
        let mut it = constituents.into_iter();
        let mut total = if let Some(first) = it.next() {
            Vec4::new(first)
        } else {
            Vec4([lit(0.0), lit(0.0), lit(0.0), lit(0.0)])
        };
        for n in it {
            total = total.add(&Vec4::new(n));
        }
        total
    }

    /// Sum the four-momenta of several collider-kinematics particles.
    pub fn sum_kinematics<I, S>(constituents: I) -> Vec4
    where
        I: IntoIterator<Item = S>,
        S: Into<PlSmallStr>,
    {
        let mut it = constituents.into_iter();
        let mut total = if let Some(first) = it.next() {
            Vec4::from_kinematics(first)
        } else {
            Vec4([lit(0.0), lit(0.0), lit(0.0), lit(0.0)])
        };
        for n in it {
            total = total.add(&Vec4::from_kinematics(n));
        }
        total
    }

    pub fn alias<S: AsRef<str>>(&self, name: S) -> [Expr; 4] {
        let b = name.as_ref();
        [
            self.0[0].clone().alias(format!("{b}_px")),
            self.0[1].clone().alias(format!("{b}_py")),
            self.0[2].clone().alias(format!("{b}_pz")),
            self.0[3].clone().alias(format!("{b}_energy")),
        ]
    }
    pub fn px(&self) -> Expr {
        self.0[0].clone()
    }
    pub fn py(&self) -> Expr {
        self.0[1].clone()
    }
    pub fn pz(&self) -> Expr {
        self.0[2].clone()
    }
    pub fn e(&self) -> Expr {
        self.0[3].clone()
    }
    pub fn vec3(&self) -> Vec3 {
        Vec3([self.px(), self.py(), self.pz()])
    }
    /// The invariant mass squared, `E^2 - |p|^2`.
    pub fn mag2(&self) -> Expr {
        self.e() * self.e() - self.vec3().mag2()
    }
    /// The invariant mass.
    pub fn mag(&self) -> Expr {
        self.mag2().sqrt()
    }
    /// The momentum magnitude.
    pub fn p(&self) -> Expr {
        self.vec3().mag()
    }
    /// The transverse momentum.
    pub fn pt(&self) -> Expr {
        (self.px() * self.px() + self.py() * self.py()).sqrt()
    }
    /// The pseudorapidity, `asinh(pz / pt)`.
    pub fn eta(&self) -> Expr {
        (self.pz() / self.pt()).arcsinh()
    }
    /// The azimuthal angle in (-pi, pi].
    pub fn phi(&self) -> Expr {
        self.py().arctan2(self.px())
    }
    /// The transverse mass, `sqrt(E^2 - pz^2)`.
    pub fn mt(&self) -> Expr {
        (self.e() * self.e() - self.pz() * self.pz()).sqrt()
    }
    pub fn add(&self, other: &Self) -> Self {
        Self([
            self.px() + other.px(),
            self.py() + other.py(),
            self.pz() + other.pz(),
            self.e() + other.e(),
        ])
    }
    pub fn sub(&self, other: &Self) -> Self {
        Self([
            self.px() - other.px(),
            self.py() - other.py(),
            self.pz() - other.pz(),
            self.e() - other.e(),
        ])
    }
}

impl_op_ex!(+ |a: &Vec4, b: &Vec4| -> Vec4 { a.add(b) });
impl_op_ex!(-|a: &Vec4, b: &Vec4| -> Vec4 { a.sub(b) });
