//! Error taxonomy (spec §7). Construction-time operations (engine setup,
//! bus-tree building, HRIR sphere loading) return `Result<_, MixerError>`.
//! `Amplimix::mix` never returns `Result` — Mix-time failures are logged and
//! the affected layer transitions to `halt`, per §7's "errors during Mix are
//! never propagated as exceptions."

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("io error: {0}")]
    IoError(String),
    #[error("device error: {0}")]
    DeviceError(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
}
