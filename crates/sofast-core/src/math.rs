use nalgebra::{
    Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector2,
    Vector3,
};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Iso3 = Isometry3<Real>;
pub type Rot3 = Rotation3<Real>;

pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Build an isometry from a rotation matrix and a translation vector.
pub fn iso_from_rt(r: &Rot3, t: &Vec3) -> Iso3 {
    Iso3::from_parts(
        Translation3::from(*t),
        UnitQuaternion::from_rotation_matrix(r),
    )
}

/// Smallest rotation taking direction `from` onto direction `to`.
///
/// Antiparallel inputs rotate by π about an axis orthogonal to `from`.
pub fn rotation_between(from: &Vec3, to: &Vec3) -> Rot3 {
    let a = from.normalize();
    let b = to.normalize();
    match Rot3::rotation_between(&a, &b) {
        Some(r) => r,
        None => {
            let helper = if a.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
            let axis = nalgebra::Unit::new_normalize(a.cross(&helper));
            Rot3::from_axis_angle(&axis, std::f64::consts::PI)
        }
    }
}

/// Convert a surface slope pair `(dz/dx, dz/dy)` to an unnormalized normal.
pub fn slope_to_normal(sx: Real, sy: Real) -> Vec3 {
    Vec3::new(-sx, -sy, 1.0)
}

/// Convert a normal back to slopes. Returns `None` for normals in the xy plane.
pub fn normal_to_slope(n: &Vec3) -> Option<Vec2> {
    if n.z.abs() < 1e-15 {
        return None;
    }
    Some(Vec2::new(-n.x / n.z, -n.y / n.z))
}

/// Mean of a non-empty point set.
pub fn centroid3(points: &[Pt3]) -> Option<Pt3> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords);
    Some(Pt3::from(sum / points.len() as Real))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_between_handles_antiparallel() {
        let r = rotation_between(&Vec3::z(), &-Vec3::z());
        let v = r * Vec3::z();
        assert!((v + Vec3::z()).norm() < 1e-12, "v={v}");
    }

    #[test]
    fn slope_normal_roundtrip() {
        let n = slope_to_normal(0.01, -0.02) * 3.0;
        let s = normal_to_slope(&n).unwrap();
        assert!((s.x - 0.01).abs() < 1e-15);
        assert!((s.y + 0.02).abs() < 1e-15);
    }
}
