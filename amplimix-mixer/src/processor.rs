//! The per-layer processor chain (C9): obstruction/occlusion filtering,
//! environment effect blending, directivity/attenuation gain, and doppler
//! pitch (spec §4.9). Runs entirely in place on a mono scratch buffer using
//! only state preallocated at layer setup, so it never allocates.

use crate::handles::{AmEnvironmentID, EffectAsset};
use crate::layer::LayerRich;
use amplimix_dsp::Curve;
use glam::Vec3;
use std::sync::Arc;

/// Engine-wide curves mapping the obstruction/occlusion scalar (`[0, 1]`)
/// to an LPF coefficient and a gain (spec §4.9 steps 1-2). Shared by every
/// layer; owned by the orchestrator.
pub struct ObstructionOcclusionCurves {
    pub obstruction_lpf_curve: Curve,
    pub obstruction_gain_curve: Curve,
    pub occlusion_lpf_curve: Curve,
    pub occlusion_gain_curve: Curve,
}

/// Listener- and source-side geometry needed for directivity and doppler
/// (spec §4.7, §4.9 step 5).
#[derive(Debug, Clone, Copy)]
pub struct SpatialInputs {
    pub source_position: Vec3,
    pub source_velocity: Vec3,
    pub source_forward: Vec3,
    pub source_up: Vec3,
    pub source_directivity_alpha: f32,
    pub source_directivity_order: f32,
    pub listener_position: Vec3,
    pub listener_velocity: Vec3,
    pub listener_forward: Vec3,
    pub listener_up: Vec3,
    pub listener_directivity_alpha: f32,
    pub listener_directivity_order: f32,
}

/// Speed of sound and the clamp factor from spec §4.9 step 5 ("clamped to
/// `|v| < sound_speed / doppler_factor`").
#[derive(Debug, Clone, Copy)]
pub struct DopplerParams {
    pub speed_of_sound_m_s: f32,
    pub doppler_factor: f32,
}

impl Default for DopplerParams {
    fn default() -> Self {
        Self { speed_of_sound_m_s: 343.0, doppler_factor: 1.0 }
    }
}

/// One environment the playing entity currently belongs to, with its
/// membership factor and the effect asset that realizes it (spec §4.9 step
/// 3: "ordered by factor, descending"). Holds its own `Arc` rather than
/// borrowing, since the membership list is built from a registry lookup
/// that doesn't outlive the per-block `mix` call otherwise.
pub struct EnvironmentMembership {
    pub environment: AmEnvironmentID,
    pub factor: f32,
    pub effect: Arc<dyn EffectAsset>,
}

/// Runs obstruction, occlusion, environment-effect blending, and the
/// directivity/attenuation gain on `mono` in place, then returns the pitch
/// ratio doppler imposes on the next block's resampling (1.0 = no shift).
#[allow(clippy::too_many_arguments)]
pub fn run_chain(
    mono: &mut [f32],
    rich: &mut LayerRich,
    curves: &ObstructionOcclusionCurves,
    obstruction_amount: f32,
    occlusion_amount: f32,
    attenuation_gain: f32,
    environments: &[EnvironmentMembership],
    spatial: Option<&SpatialInputs>,
    doppler: &DopplerParams,
) -> f32 {
    // 1. Obstruction.
    let obstruction_amount = obstruction_amount.clamp(0.0, 1.0);
    rich.obstruction_lpf
        .set_coefficient(curves.obstruction_lpf_curve.eval(obstruction_amount));
    rich.obstruction_lpf.process(mono);
    let obstruction_gain_target = curves.obstruction_gain_curve.eval(obstruction_amount);
    rich.obstruction_gain.process(mono, obstruction_gain_target);

    // 2. Occlusion, driven by occlusion x both parties' directivity.
    let directivity_product = spatial.map(directivity_product_of).unwrap_or(1.0);
    let occlusion_drive = (occlusion_amount.clamp(0.0, 1.0) * directivity_product).clamp(0.0, 1.0);
    rich.occlusion_lpf
        .set_coefficient(curves.occlusion_lpf_curve.eval(occlusion_drive));
    rich.occlusion_lpf.process(mono);
    let occlusion_gain_target = curves.occlusion_gain_curve.eval(occlusion_drive);
    rich.occlusion_gain.process(mono, occlusion_gain_target);

    // 3. Environment effects: each instantiated/cached per (environment,
    // layer), wet-scaled, processed against a copy of the dry signal, and
    // summed back in.
    if !environments.is_empty() {
        let n = mono.len();
        rich.wet_sum_scratch.resize(n, 0.0);
        rich.effect_scratch.resize(n, 0.0);
        rich.wet_sum_scratch.iter_mut().for_each(|s| *s = 0.0);
        for env in environments {
            let instance = rich.effect_instance(env.environment, || env.effect.create_instance());
            instance.set_wet(env.factor);
            rich.effect_scratch.copy_from_slice(mono);
            instance.process(&mut rich.effect_scratch);
            for (w, s) in rich.wet_sum_scratch.iter_mut().zip(rich.effect_scratch.iter()) {
                *w += s;
            }
        }
        for (m, w) in mono.iter_mut().zip(rich.wet_sum_scratch.iter()) {
            *m += w;
        }
    }

    // 4. Directivity/attenuation gain, constant over the block.
    rich.directivity_gain.process(mono, attenuation_gain * directivity_product);

    // 5. Doppler pitch ratio for the next block's resample ratio.
    match spatial {
        Some(s) => doppler_ratio(s, doppler),
        None => 1.0,
    }
}

fn directivity_product_of(s: &SpatialInputs) -> f32 {
    let to_listener = (s.listener_position - s.source_position).normalize_or_zero();
    let source_directivity = amplimix_spatial::attenuation::directivity_gain(
        s.source_forward,
        s.source_up,
        to_listener,
        s.source_directivity_alpha,
        s.source_directivity_order,
    );
    let to_source = -to_listener;
    let listener_directivity = amplimix_spatial::attenuation::directivity_gain(
        s.listener_forward,
        s.listener_up,
        to_source,
        s.listener_directivity_alpha,
        s.listener_directivity_order,
    );
    source_directivity * listener_directivity
}

fn doppler_ratio(s: &SpatialInputs, params: &DopplerParams) -> f32 {
    let axis = (s.listener_position - s.source_position).normalize_or_zero();
    let limit = params.speed_of_sound_m_s / params.doppler_factor.max(1e-6);
    let source_radial = s.source_velocity.dot(axis).clamp(-limit, limit);
    let listener_radial = s.listener_velocity.dot(axis).clamp(-limit, limit);
    let denom = (params.speed_of_sound_m_s - source_radial).max(1.0);
    (params.speed_of_sound_m_s - listener_radial) / denom
}
