mod support;

use amplimix_buffer::AudioBuffer;
use amplimix_mixer::handles::AmBusID;
use amplimix_mixer::orchestrator::PlayParams;
use support::{sine_sound, stereo_engine};

/// Spec §8 scenario 4 ("Stop with fade"): a playing sine at gain 1.0 is
/// stopped with a 0.010s (480-frame) fade. The fader is block-rate (spec
/// §4.12 "faders... applied... rather than smoothed per-sample"), so with a
/// 160-frame block it settles to zero after exactly three post-stop blocks
/// (480 frames); the fourth block, starting 480 frames after the stop, must
/// be silent.
#[test]
fn stop_with_a_fade_settles_to_silence_after_the_fade_duration() {
    const BLOCK: usize = 160;
    let mut engine = stereo_engine(BLOCK, 4);
    let handle = engine.handle();

    let sound = sine_sound(48_000, 440.0, 1.0);
    let token = handle.play(PlayParams {
        sound: &sound,
        bus: AmBusID(0),
        listener: None,
        entity: None,
        attenuation: None,
        gain: 1.0,
        pan: 0.0,
        pitch: 1.0,
        play_speed: 1.0,
        looped: true,
        spatialized: false,
    });
    assert!(!token.is_sentinel());

    let mut out = AudioBuffer::new(BLOCK, 2);
    engine.mix(&mut out, BLOCK); // first block, at full gain, to get the layer running.

    handle.stop(token, 0.010);

    let peak = |buf: &AudioBuffer| buf.channel(0).iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));

    engine.mix(&mut out, BLOCK); // first post-stop block: drained+applied this same call.
    let first_post_stop_peak = peak(&out);
    assert!(first_post_stop_peak <= 1.0);

    engine.mix(&mut out, BLOCK); // second post-stop block.
    engine.mix(&mut out, BLOCK); // third post-stop block: fade reaches zero here (480 frames in).

    engine.mix(&mut out, BLOCK); // fourth post-stop block, starting 480 frames after the stop.
    assert_eq!(peak(&out), 0.0, "block starting 480+ frames after Stop must be silent");
}
