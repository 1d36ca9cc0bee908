//! Sample-rate/channel conversion, filter primitives, and FFT (components
//! C2, C3, C4).

pub mod curve;
pub mod fft;
pub mod filters;
pub mod resampler;

pub use curve::{ControlPoint, Curve, Fader, FaderShape};
pub use fft::RealFft;
pub use resampler::{DspError, Resampler, ResamplerConfig};
