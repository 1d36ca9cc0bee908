mod support;

use amplimix_buffer::AudioBuffer;
use support::stereo_engine;

#[test]
fn silence_with_no_layers_playing_yields_a_zeroed_full_block() {
    let mut engine = stereo_engine(1024, 16);
    let mut out = AudioBuffer::new(1024, 2);

    let result = engine.mix(&mut out, 1024);

    assert_eq!(result.frames_produced, 1024);
    assert!(out.channel(0).iter().all(|&s| s == 0.0));
    assert!(out.channel(1).iter().all(|&s| s == 0.0));
}
