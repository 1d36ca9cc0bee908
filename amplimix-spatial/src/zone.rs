//! Zone shapes and the inner/outer zone-factor model.
//!
//! A zone pairs an inner shape with an outer shape of the same kind. A
//! point's zone factor is `1` inside the inner shape, `0` outside the outer
//! shape, and interpolates smoothly in the shell between them. Used both for
//! directional attenuation and for environment membership.

use glam::Vec3;

/// A geometric shape centered at the origin of its own local frame, used as
/// either the inner or outer boundary of a [`Zone`].
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    Cone { half_angle_rad: f32, radius: f32 },
    Capsule { radius: f32, half_height: f32 },
}

impl Shape {
    /// Distance from the origin to the shape's surface along `direction`
    /// (a unit vector). Used to build a monotonic radial profile for the
    /// zone-factor interpolation.
    fn boundary_distance(&self, direction: Vec3) -> f32 {
        match *self {
            Shape::Sphere { radius } => radius,
            Shape::Box { half_extents } => {
                // Distance along `direction` to the axis-aligned box surface,
                // i.e. min over axes of half_extent[i] / |direction[i]|.
                let candidates = [
                    safe_div(half_extents.x, direction.x.abs()),
                    safe_div(half_extents.y, direction.y.abs()),
                    safe_div(half_extents.z, direction.z.abs()),
                ];
                candidates.into_iter().fold(f32::INFINITY, f32::min)
            }
            Shape::Cone { half_angle_rad, radius } => {
                // Cone apex at origin, axis +Y. Directions outside the cone's
                // half-angle are treated as having zero extent (immediately
                // outside), which collapses the zone factor to 0 there.
                let axis = Vec3::Y;
                let cos_angle = direction.dot(axis).clamp(-1.0, 1.0);
                let angle = cos_angle.acos();
                if angle > half_angle_rad {
                    0.0
                } else {
                    radius
                }
            }
            Shape::Capsule { radius, half_height } => {
                // Cylinder of `half_height` capped by hemispheres of
                // `radius`; approximate boundary distance along `direction`
                // as the cylinder radius widened near the poles.
                let axial = direction.y.abs();
                if axial * (half_height + radius) <= half_height {
                    safe_div(radius, (1.0 - axial * axial).sqrt().max(1e-6))
                } else {
                    radius + half_height / axial.max(1e-6)
                }
            }
        }
    }
}

fn safe_div(a: f32, b: f32) -> f32 {
    if b < 1e-9 {
        f32::INFINITY
    } else {
        a / b
    }
}

/// An inner shape nested inside an outer shape, both sharing the same
/// local-space center.
#[derive(Debug, Clone, Copy)]
pub struct Zone {
    pub inner: Shape,
    pub outer: Shape,
}

impl Zone {
    pub fn new(inner: Shape, outer: Shape) -> Self {
        Self { inner, outer }
    }

    /// Zone factor at `point` (in the zone's local space): `1` inside the
    /// inner shape, `0` outside the outer shape, linearly interpolated by
    /// radial distance in between. Monotonically non-increasing along any
    /// ray from the inner boundary to the outer boundary.
    pub fn factor(&self, point: Vec3) -> f32 {
        let r = point.length();
        if r <= 1e-9 {
            return 1.0;
        }
        let direction = point / r;
        let inner_r = self.inner.boundary_distance(direction);
        let outer_r = self.outer.boundary_distance(direction);
        if r <= inner_r {
            1.0
        } else if r >= outer_r {
            0.0
        } else {
            let span = (outer_r - inner_r).max(1e-6);
            (1.0 - (r - inner_r) / span).clamp(0.0, 1.0)
        }
    }
}
