//! Asset-facing handles (C14): opaque IDs plus thin read-only trait objects
//! the mixer borrows through `&dyn Trait` / `Arc<dyn Trait>`. The mixer never
//! parses, decodes, or reference-counts assets itself — it only calls pure
//! functions on them, matching §1's non-goal that asset loading lives
//! outside this core.

use amplimix_buffer::AudioBuffer;
use amplimix_spatial::attenuation::Attenuation;
use glam::Vec3;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

opaque_id!(AmSoundID);
opaque_id!(AmCollectionID);
opaque_id!(AmAttenuationID);
opaque_id!(AmEffectID);
opaque_id!(AmBusID);
opaque_id!(AmListenerID);
opaque_id!(AmEntityID);
opaque_id!(AmEnvironmentID);

/// Tuple `{sample_rate, channel_count, frame_count}` (spec §3 "Sound
/// format"). `frame_count` is `None` for an open-ended stream.
#[derive(Debug, Clone, Copy)]
pub struct SoundFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub frame_count: Option<u64>,
}

/// A resolved, immutable sound the mixer may open a [`crate::decoder::Decoder`]
/// for. The scheduler that picks *which* concrete sound out of a collection
/// is out of scope (§1); the mixer only ever sees an already-resolved sound.
pub trait SoundAsset: Send + Sync {
    fn id(&self) -> AmSoundID;
    fn format(&self) -> SoundFormat;
    /// Opens a fresh decoder instance for one layer's playback of this
    /// sound. Each layer owns its own decoder; the same sound can be opened
    /// by many layers concurrently.
    fn open(&self) -> Box<dyn crate::decoder::Decoder>;
}

/// A read-only view of an attenuation curve/zone/air-absorption triple
/// (spec §3 "Attenuation", §4.7).
pub trait AttenuationAsset: Send + Sync {
    fn gain(&self, distance: f32, local_point: Vec3) -> f32;
    fn max_distance(&self) -> f32;
    fn air_absorption_gain(&self, band: usize, distance: f32) -> f32;
}

impl AttenuationAsset for Attenuation {
    fn gain(&self, distance: f32, local_point: Vec3) -> f32 {
        Attenuation::gain(self, distance, local_point)
    }
    fn max_distance(&self) -> f32 {
        Attenuation::max_distance(self)
    }
    fn air_absorption_gain(&self, band: usize, distance: f32) -> f32 {
        Attenuation::air_absorption_gain(self, band, distance)
    }
}

/// One instance of an effect's DSP state, created per (environment, layer)
/// pair on first use and destroyed when the layer ends (spec §4.9 step 3).
pub trait EffectInstance: Send {
    /// Sets the effect's wet-amount parameter to the environment factor.
    fn set_wet(&mut self, wet: f32);
    /// Processes `buf` in place.
    fn process(&mut self, buf: &mut [f32]);
}

/// A named DSP filter family plus its RTPC-driven parameters (spec §3
/// "Effect"). Creates per-layer filter instances on demand.
pub trait EffectAsset: Send + Sync {
    fn id(&self) -> AmEffectID;
    fn create_instance(&self) -> Box<dyn EffectInstance>;
}

/// A window of already-decoded samples, for sounds the orchestrator can read
/// directly rather than through a streaming [`crate::decoder::Decoder`]
/// (spec §3 Decoder contract's `load`).
pub trait PreloadedSound: Send + Sync {
    fn format(&self) -> SoundFormat;
    /// Copies up to `frames` frames starting at `start_frame` into `out`,
    /// returning the count actually copied (less than `frames` only at the
    /// end of the resource).
    fn read_into(&self, start_frame: u64, out: &mut AudioBuffer, frames: usize) -> usize;
}
