//! Distance attenuation, directivity, and air absorption.

use crate::zone::Zone;
use amplimix_dsp::Curve;
use glam::Vec3;

/// Number of air-absorption frequency bands.
pub const AIR_ABSORPTION_BANDS: usize = 4;

/// Per-band air absorption coefficients (dB loss per meter), roughly
/// increasing with frequency, used to scale a distance-dependent rolloff.
#[derive(Debug, Clone, Copy)]
pub struct AirAbsorption {
    pub band_coefficients_db_per_m: [f32; AIR_ABSORPTION_BANDS],
}

impl AirAbsorption {
    /// Linear gain for `band` at `distance_m`.
    pub fn gain(&self, band: usize, distance_m: f32) -> f32 {
        let db = self.band_coefficients_db_per_m[band] * distance_m;
        10f32.powf(-db / 20.0)
    }
}

/// A distance-to-gain curve plus a maximum distance and an optional zone
/// shape for directional attenuation, plus optional per-band air
/// absorption.
#[derive(Debug, Clone)]
pub struct Attenuation {
    curve: Curve,
    max_distance: f32,
    zone: Option<Zone>,
    air_absorption: Option<AirAbsorption>,
}

impl Attenuation {
    pub fn new(curve: Curve, max_distance: f32) -> Self {
        Self {
            curve,
            max_distance: max_distance.max(0.0),
            zone: None,
            air_absorption: None,
        }
    }

    pub fn with_zone(mut self, zone: Zone) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn with_air_absorption(mut self, air_absorption: AirAbsorption) -> Self {
        self.air_absorption = Some(air_absorption);
        self
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    /// Distance gain from the curve at `distance`, clipped to
    /// `[0, max_distance]`.
    pub fn distance_gain(&self, distance: f32) -> f32 {
        let clipped = distance.clamp(0.0, self.max_distance);
        self.curve.eval(clipped)
    }

    /// Combined gain: the curve's distance gain scaled toward the curve's
    /// own maximum inside the zone's inner shape, and toward zero outside
    /// the outer shape. `local_point` is the source position expressed
    /// relative to the listener in the zone's local frame.
    pub fn gain(&self, distance: f32, local_point: Vec3) -> f32 {
        let distance_gain = self.distance_gain(distance);
        match &self.zone {
            None => distance_gain,
            Some(zone) => {
                let factor = zone.factor(local_point);
                let curve_max = self.curve_max();
                // factor=1 (inside inner) pulls toward the curve's max; 0
                // (outside outer) pulls toward zero.
                distance_gain + factor * (curve_max - distance_gain)
            }
        }
    }

    fn curve_max(&self) -> f32 {
        self.distance_gain(0.0)
    }

    pub fn air_absorption_gain(&self, band: usize, distance: f32) -> f32 {
        self.air_absorption
            .as_ref()
            .map(|a| a.gain(band, distance))
            .unwrap_or(1.0)
    }
}

/// Directivity gain: `((1 - alpha) + alpha * cos(azim) * cos(elev))^order`,
/// where `(azim, elev)` locate `other_direction` in the party's own local
/// frame. `order` is clamped to at least 1.
///
/// `forward`/`up` define the local frame of the party whose directivity is
/// being evaluated; `other_direction` is the unit vector from that party
/// toward the other party.
pub fn directivity_gain(
    forward: Vec3,
    up: Vec3,
    other_direction: Vec3,
    alpha: f32,
    sharpness_order: f32,
) -> f32 {
    let forward = forward.normalize_or_zero();
    let up = up.normalize_or_zero();
    let right = forward.cross(up).normalize_or_zero();
    let local = Vec3::new(
        other_direction.dot(right),
        other_direction.dot(up),
        other_direction.dot(forward),
    );
    let azim = local.x.atan2(local.z);
    let elev = local.y.asin().clamp(-std::f32::consts::FRAC_PI_2, std::f32::consts::FRAC_PI_2);
    let order = sharpness_order.max(1.0);
    let base = (1.0 - alpha) + alpha * azim.cos() * elev.cos();
    base.max(0.0).powf(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use amplimix_dsp::{ControlPoint, FaderShape};
    use approx::assert_relative_eq;

    fn linear_curve(max_distance: f32) -> Curve {
        Curve::new(vec![
            ControlPoint { x: 0.0, y: 1.0, shape: FaderShape::Linear },
            ControlPoint { x: max_distance, y: 0.0, shape: FaderShape::Linear },
        ])
    }

    #[test]
    fn gain_at_zero_distance_equals_curve_value_at_zero() {
        let att = Attenuation::new(linear_curve(10.0), 10.0);
        assert_relative_eq!(att.distance_gain(0.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn gain_at_half_max_distance_is_half() {
        let att = Attenuation::new(linear_curve(10.0), 10.0);
        assert_relative_eq!(att.distance_gain(5.0), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn gain_beyond_max_distance_is_clipped_to_curve_end() {
        let att = Attenuation::new(linear_curve(10.0), 10.0);
        assert_relative_eq!(att.distance_gain(20.0), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn omnidirectional_directivity_is_unity() {
        let g = directivity_gain(Vec3::Z, Vec3::Y, Vec3::X, 0.0, 1.0);
        assert_relative_eq!(g, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn directivity_facing_away_is_attenuated() {
        let g_front = directivity_gain(Vec3::Z, Vec3::Y, Vec3::Z, 1.0, 1.0);
        let g_back = directivity_gain(Vec3::Z, Vec3::Y, -Vec3::Z, 1.0, 1.0);
        assert!(g_front > g_back);
    }
}
