//! Asset-facing handles and collaborator I/O (C14, spec §6.2/§6.3): the
//! literal `AMPK` package format plus a decoded-sound loader with an LRU
//! cache. The `AMIR` HRIR sphere format (spec §6.4) lives in
//! `amplimix_spatial::hrir`, next to the sphere it populates. None of this
//! decodes audio codecs or parses soundbank/event schemas (spec §1
//! non-goal) — it is the layer between those and `amplimix_mixer`'s
//! asset-facing traits.
pub mod asset_manager;
pub mod loader;
pub mod pkg;
pub mod sfx;
pub mod sfx_loader;
pub mod streaming_loader;
pub mod util;

pub use asset_manager::{AssetManager, Error};
pub use util::AssetError;

#[cfg(feature = "streaming")]
pub use streaming_loader::StreamingAsset;
