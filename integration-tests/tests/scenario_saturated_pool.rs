mod support;

use amplimix_buffer::AudioBuffer;
use amplimix_mixer::handles::AmBusID;
use amplimix_mixer::orchestrator::PlayParams;
use support::{sine_sound, stereo_engine};

const CAPACITY: usize = 4096;

/// Fills a fresh engine's layer pool to `CAPACITY` with a looping sound and
/// returns it along with the tokens handed out.
fn filled_engine() -> amplimix_mixer::Amplimix {
    let mut engine = stereo_engine(64, CAPACITY);
    let handle = engine.handle();
    let sound = sine_sound(16, 220.0, 0.5);
    for _ in 0..CAPACITY {
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
    }
    engine
}

/// Spec §8 scenario 5 ("Saturated pool"): `Play` on a fully saturated pool
/// (`pool.claim` fails before any existing slot is touched, see
/// `AmplimixHandle::play`) must not perturb any already-playing layer. This
/// is checked by comparing two otherwise-identical saturated engines,
/// mixing a few blocks on both, one of which additionally attempted (and
/// was refused) a 4097th `Play` in between — their output must be
/// bit-identical.
#[test]
fn overflowing_play_on_a_saturated_pool_does_not_perturb_existing_layers() {
    let mut baseline = filled_engine();
    let mut with_attempted_overflow = filled_engine();

    let overflow_sound = sine_sound(16, 880.0, 0.5);
    let overflow_token = with_attempted_overflow.handle().play(PlayParams {
        sound: &overflow_sound,
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
    assert!(overflow_token.is_sentinel(), "the 4097th Play must return the sentinel token");

    let mut out_a = AudioBuffer::new(64, 2);
    let mut out_b = AudioBuffer::new(64, 2);
    for _ in 0..3 {
        baseline.mix(&mut out_a, 64);
        with_attempted_overflow.mix(&mut out_b, 64);
        assert_eq!(out_a.channel(0), out_b.channel(0));
        assert_eq!(out_a.channel(1), out_b.channel(1));
    }
}
