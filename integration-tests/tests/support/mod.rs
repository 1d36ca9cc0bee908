//! Shared black-box scaffolding for the end-to-end scenarios in spec §8:
//! everything here goes through `amplimix_mixer`'s public API only, the way
//! a host application would.

use amplimix_dsp::{ControlPoint, Curve, FaderShape};
use amplimix_mixer::commands::FullPolicy;
use amplimix_mixer::decoder::{Decoder, PreloadedDecoder};
use amplimix_mixer::handles::{AmSoundID, SoundAsset, SoundFormat};
use amplimix_mixer::orchestrator::OutputStageConfig;
use amplimix_mixer::processor::{DopplerParams, ObstructionOcclusionCurves};
use amplimix_mixer::{Amplimix, AmplimixConfig, BusDef};
use amplimix_spatial::ambisonics::{Mode, Order};
use amplimix_spatial::reflections::{RoomParameters, WallMaterial};
use amplimix_buffer::AudioBuffer;
use glam::Vec3;

pub const SAMPLE_RATE: u32 = 48_000;

pub struct PreloadedSound {
    pub format: SoundFormat,
    pub samples: Vec<f32>,
}

impl SoundAsset for PreloadedSound {
    fn id(&self) -> AmSoundID {
        AmSoundID(1)
    }
    fn format(&self) -> SoundFormat {
        self.format
    }
    fn open(&self) -> Box<dyn Decoder> {
        Box::new(PreloadedDecoder::new(self.format, AudioBuffer::from_channels(vec![self.samples.clone()])))
    }
}

pub fn sine_sound(frames: usize, freq_hz: f32, amplitude: f32) -> PreloadedSound {
    let samples: Vec<f32> = (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * freq_hz * i as f32 / SAMPLE_RATE as f32).sin() * amplitude)
        .collect();
    PreloadedSound {
        format: SoundFormat { sample_rate: SAMPLE_RATE, channel_count: 1, frame_count: Some(frames as u64) },
        samples,
    }
}

pub fn flat_curves() -> ObstructionOcclusionCurves {
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

/// A stereo, speaker-decode engine with one master bus, matching spec §8's
/// `{48000 Hz, stereo, f32}` device description.
pub fn stereo_engine(block_size: usize, layer_capacity: usize) -> Amplimix {
    Amplimix::new(AmplimixConfig {
        sample_rate: SAMPLE_RATE,
        block_size,
        layer_capacity,
        command_queue_capacity: (layer_capacity + 16).next_power_of_two(),
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
            hf_absorption_cutoff_hz: 8_000.0,
        },
        reflections_max_delay_frames: SAMPLE_RATE as usize / 10,
        direct_channels: 2,
        pause_fade_seconds: 0.01,
        master_gain_initial: 1.0,
    })
    .expect("fixed-up test configuration is always valid")
}

pub fn rms(samples: &[f32]) -> f32 {
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}
