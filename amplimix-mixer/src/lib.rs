//! The realtime mixing core (components C9-C13): per-layer DSP chain, layer
//! pool, command queue, bus tree, world registry, device boundary, and the
//! `Amplimix` pipeline orchestrator that ties them together.

pub mod atomic_f32;
pub mod bus;
pub mod commands;
pub mod decoder;
pub mod device;
pub mod error;
pub mod handles;
pub mod layer;
pub mod orchestrator;
pub mod processor;
pub mod world;

pub use bus::{BusDef, BusTree, DuckSource};
pub use commands::{Command, CommandQueue, FullPolicy};
pub use decoder::{Decoder, DecoderError, PreloadedDecoder};
pub use device::{DeviceDescription, SampleFormat};
pub use error::MixerError;
pub use handles::{
    AmAttenuationID, AmBusID, AmCollectionID, AmEffectID, AmEntityID, AmEnvironmentID, AmListenerID,
    AmSoundID, AttenuationAsset, EffectAsset, EffectInstance, PreloadedSound, SoundAsset, SoundFormat,
};
pub use layer::{LayerPool, LayerState, LayerToken};
pub use orchestrator::{Amplimix, AmplimixConfig, MixResult, OutputStage, PlayParams};
pub use world::{EntityState, ListenerState, Transform, WorldRegistry};
