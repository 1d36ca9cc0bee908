//! The device driver boundary (spec §6.1): a trait abstracting the OS audio
//! driver callback, a `cpal`-backed implementation, and a mock backend for
//! tests that never touch real hardware.
//!
//! The core (`amplimix-mixer`) never depends on this crate; it is wired the
//! other way around via [`mixer_adapter::render_fn`], which turns an
//! `Amplimix` instance into a [`RenderFn`] this crate's backends can drive.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "mock-audio")]
pub mod mock_backend;

#[cfg(not(feature = "mock-audio"))]
pub mod cpal_backend;

pub mod mixer_adapter;

#[cfg(not(feature = "mock-audio"))]
pub use cpal_backend::CpalAudioBackend;
#[cfg(feature = "mock-audio")]
pub use mock_backend::MockAudioBackend;

/// Backend-level failures (spec §7 `DeviceError`).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no output device found")]
    DeviceNotFound,
    #[error("unsupported device format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to create audio stream")]
    StreamCreationFailed,
    #[error("playback error: {0}")]
    PlaybackError(String),
    #[error("{0}")]
    Other(String),
}

/// Render callback invoked on the driver's realtime thread. Implementations
/// must not block, allocate, or panic; `amplimix_mixer::Amplimix::mix` upholds
/// this contract, so [`mixer_adapter::render_fn`] is the only producer this
/// crate ships.
pub type RenderFn = Arc<dyn Fn(&mut [f32], u32, usize) + Send + Sync + 'static>;

/// Non-realtime diagnostics emitted by a backend (stream xruns, device
/// removal, negotiated buffer-size changes).
#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    XRun { count: u32 },
    DeviceRemoved,
    BufferSizeChanged { frames: usize },
    Other(String),
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::XRun { count } => write!(f, "xrun(count={count})"),
            DiagnosticEvent::DeviceRemoved => write!(f, "device removed"),
            DiagnosticEvent::BufferSizeChanged { frames } => write!(f, "buffer size changed to {frames} frames"),
            DiagnosticEvent::Other(s) => write!(f, "{s}"),
        }
    }
}

pub type DiagnosticsCb = Arc<dyn Fn(DiagnosticEvent) + Send + Sync + 'static>;

/// The negotiated device configuration, equivalent to spec §6.1's
/// `DeviceDescription` but owned by the backend rather than the core (the
/// core's own [`amplimix_mixer::device::DeviceDescription`] is constructed
/// from this at wiring time).
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub channels: u16,
    pub device_name: Option<String>,
}

/// Backends that can report a human-readable device name expose this; not
/// every backend can (the mock backend can, a headless CI backend might not).
pub trait DeviceInfoProvider {
    fn get_device_name(&self) -> Option<&str>;
}

/// The contract every concrete backend implements. `start`/`stop` are
/// control-path calls (may block briefly, may allocate); once started, the
/// backend calls `render` from its own realtime thread on every callback.
pub trait AudioBackend {
    fn start(&mut self, render: RenderFn) -> Result<(), BackendError>;
    fn stop(&mut self) -> Result<(), BackendError>;
    fn sample_rate(&self) -> u32;
    fn buffer_size(&self) -> usize;
    fn channels(&self) -> u16;
    /// Frames written since the stream last started; 0 while stopped.
    fn frames_since_start(&self) -> u64;
    fn set_diagnostics_callback(&mut self, cb: Option<DiagnosticsCb>);
    fn as_device_info_provider(&self) -> Option<&dyn DeviceInfoProvider>;
}

/// Runtime check of which backend variant this crate was compiled with.
pub fn is_mock_backend_enabled() -> bool {
    cfg!(feature = "mock-audio")
}

#[cfg(not(feature = "mock-audio"))]
pub fn create_audio_backend() -> Result<Box<dyn AudioBackend>, BackendError> {
    let backend = cpal_backend::CpalAudioBackend::new()?;
    tracing::info!(
        sample_rate = backend.sample_rate(),
        buffer_size = backend.buffer_size(),
        channels = backend.channels(),
        "opened cpal output device"
    );
    Ok(Box::new(backend))
}

#[cfg(feature = "mock-audio")]
pub fn create_audio_backend() -> Result<Box<dyn AudioBackend>, BackendError> {
    let backend = mock_backend::MockAudioBackend::new();
    tracing::info!("opened mock audio backend");
    Ok(Box::new(backend))
}
