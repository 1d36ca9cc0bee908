//! Wires an [`amplimix_mixer::Amplimix`] orchestrator into a [`crate::RenderFn`]
//! this crate's backends can drive. This is the concrete realization of spec
//! §6.1's "device calls `Mix(output_buffer, frame_count)`" on top of a
//! `cpal`/mock backend whose own callback shape is an interleaved `&mut [f32]`.

use std::sync::Arc;

use amplimix_buffer::AudioBuffer;
use amplimix_mixer::Amplimix;
use parking_lot::Mutex;

use crate::RenderFn;

/// Owns the orchestrator plus the planar scratch buffer the realtime
/// callback mixes into before interleaving. Scratch is sized once, up front,
/// at `max_frames` so the callback never allocates.
pub struct MixerAdapter {
    engine: Mutex<Amplimix>,
    scratch: Mutex<AudioBuffer>,
}

impl MixerAdapter {
    pub fn new(engine: Amplimix, channels: usize, max_frames: usize) -> Arc<Self> {
        Arc::new(Self {
            engine: Mutex::new(engine),
            scratch: Mutex::new(AudioBuffer::new(max_frames, channels)),
        })
    }

    /// Runs a closure against the wrapped orchestrator from the control
    /// thread (e.g. to call `handle()`, `set_master_gain`, or to register
    /// listeners/entities before the stream starts).
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Amplimix) -> R) -> R {
        f(&mut self.engine.lock())
    }

    /// Builds the realtime [`RenderFn`] a backend's `start` call takes.
    /// `out` is interleaved across `scratch`'s channel count; frames beyond
    /// what `Amplimix::mix` produces (e.g. during shutdown) are zero-filled.
    pub fn render_fn(self: &Arc<Self>) -> RenderFn {
        let this = Arc::clone(self);
        Arc::new(move |out: &mut [f32], _sample_rate: u32, frames: usize| {
            let mut engine = this.engine.lock();
            let mut scratch = this.scratch.lock();
            let channels = scratch.channel_count();
            debug_assert!(frames <= scratch.frame_count(), "callback requested more frames than scratch holds");
            let frames = frames.min(scratch.frame_count());

            let result = engine.mix(&mut scratch, frames);
            let produced = result.frames_produced as usize;

            for frame in 0..produced {
                for ch in 0..channels {
                    out[frame * channels + ch] = scratch.channel(ch)[frame];
                }
            }
            for sample in out.iter_mut().skip(produced * channels) {
                *sample = 0.0;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amplimix_mixer::commands::FullPolicy;
    use amplimix_mixer::orchestrator::OutputStageConfig;
    use amplimix_mixer::processor::{DopplerParams, ObstructionOcclusionCurves};
    use amplimix_mixer::BusDef;
    use amplimix_dsp::{ControlPoint, Curve, FaderShape};
    use amplimix_spatial::ambisonics::{Mode, Order};
    use amplimix_spatial::reflections::{RoomParameters, WallMaterial};
    use glam::Vec3;

    fn flat_curves() -> ObstructionOcclusionCurves {
        let flat = |y: f32| {
            Curve::new(vec![
                ControlPoint { x: 0.0, y, shape: FaderShape::Linear },
                ControlPoint { x: 1.0, y, shape: FaderShape::Linear },
            ])
        };
        ObstructionOcclusionCurves {
            obstruction_lpf_curve: flat(0.0),
            obstruction_gain_curve: flat(1.0),
            occlusion_lpf_curve: flat(0.0),
            occlusion_gain_curve: flat(1.0),
        }
    }

    fn stereo_engine(block_size: usize) -> Amplimix {
        Amplimix::new(amplimix_mixer::AmplimixConfig {
            sample_rate: 48_000,
            block_size,
            layer_capacity: 8,
            command_queue_capacity: 64,
            command_queue_policy: FullPolicy::Drop,
            ambisonic_order: Order::First,
            ambisonic_mode: Mode::ThreeD,
            output_stage: OutputStageConfig::SpeakerDecode {
                speaker_directions: vec![Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)],
            },
            bus_defs: vec![BusDef { name: "master".into(), static_gain: 1.0, parent: None, duck_sources: vec![] }],
            obstruction_occlusion_curves: flat_curves(),
            doppler: DopplerParams::default(),
            reflections_room: RoomParameters {
                walls: [WallMaterial { reflection_coefficient: 0.0, distance_m: 5.0 }; 6],
                hf_absorption_cutoff_hz: 5000.0,
            },
            reflections_max_delay_frames: 4800,
            direct_channels: 2,
            pause_fade_seconds: 0.01,
            master_gain_initial: 1.0,
        })
        .unwrap()
    }

    #[test]
    fn silence_scenario_produces_zeroed_interleaved_block() {
        let adapter = MixerAdapter::new(stereo_engine(256), 2, 256);
        let render = adapter.render_fn();

        let mut out = vec![1.0f32; 256 * 2];
        render(&mut out, 48_000, 256);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
