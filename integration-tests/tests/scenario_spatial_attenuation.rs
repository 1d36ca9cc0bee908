mod support;

use std::sync::Arc;

use amplimix_buffer::AudioBuffer;
use amplimix_dsp::{ControlPoint, Curve, FaderShape};
use amplimix_mixer::handles::{AmBusID, AttenuationAsset};
use amplimix_mixer::orchestrator::PlayParams;
use amplimix_spatial::attenuation::Attenuation;
use glam::Vec3;
use support::{rms, sine_sound, stereo_engine};

const MAX_DISTANCE: f32 = 10.0;

fn linear_attenuation() -> Arc<dyn AttenuationAsset> {
    let curve = Curve::new(vec![
        ControlPoint { x: 0.0, y: 1.0, shape: FaderShape::Linear },
        ControlPoint { x: MAX_DISTANCE, y: 0.0, shape: FaderShape::Linear },
    ]);
    Arc::new(Attenuation::new(curve, MAX_DISTANCE))
}

/// Renders a spatialized sine source with the listener at the origin and
/// the entity at distance `d` along a fixed direction, returning the
/// RMS of the rendered (summed stereo) block.
fn render_at_distance(d: f32) -> f32 {
    let mut engine = stereo_engine(1024, 4);
    let handle = engine.handle();

    let listener = handle.register_listener();
    handle.set_listener_location(listener, Vec3::ZERO, Vec3::ZERO);
    handle.set_listener_orientation(listener, Vec3::new(0.0, 0.0, -1.0), Vec3::Y);

    let entity = handle.register_entity();
    handle.set_entity_location(entity, Vec3::new(0.0, 0.0, -d), Vec3::ZERO);

    let sound = sine_sound(4096, 300.0, 1.0);
    let token = handle.play(PlayParams {
        sound: &sound,
        bus: AmBusID(0),
        listener: Some(listener),
        entity: Some(entity),
        attenuation: Some(linear_attenuation()),
        gain: 1.0,
        pan: 0.0,
        pitch: 1.0,
        play_speed: 1.0,
        looped: false,
        spatialized: true,
    });
    assert!(!token.is_sentinel());

    let mut out = AudioBuffer::new(1024, 2);
    let mut last = 0.0;
    for _ in 0..4 {
        engine.mix(&mut out, 1024);
        last = (rms(out.channel(0)) + rms(out.channel(1))) / 2.0;
    }
    last
}

/// Spec §8 scenario 6 ("Spatial attenuation"): a linear curve `gain(d) = 1 -
/// d/10` clipped at 0, max distance 10. Direction from listener to entity is
/// held fixed across all three distances, so the ambisonic encode/decode
/// normalization constant is identical in every case and cancels out of the
/// ratio; only the attenuation scalar (1.0, 0.5, 0.0) should distinguish
/// them.
#[test]
fn distance_attenuation_scales_rendered_rms_by_the_curve() {
    let rms_at_0 = render_at_distance(0.0);
    let rms_at_5 = render_at_distance(5.0);
    let rms_at_10 = render_at_distance(MAX_DISTANCE);
    let rms_beyond = render_at_distance(MAX_DISTANCE * 2.0);

    assert!(rms_at_0 > 1e-4, "a source at distance 0 must render non-silent");

    let ratio_5 = rms_at_5 / rms_at_0;
    assert!((ratio_5 - 0.5).abs() < 0.02, "distance 5 should render at half the gain of distance 0, got ratio {ratio_5}");

    assert!(rms_at_10 < 1e-5, "distance == max_distance clips gain to 0");
    assert!(rms_beyond < 1e-5, "distance beyond max_distance stays clipped to 0");
}
