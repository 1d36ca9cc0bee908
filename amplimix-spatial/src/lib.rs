//! Ambisonic spatialization primitives, the HRIR sphere, attenuation and
//! directivity, and the early-reflections processor (components C5-C8).

pub mod ambisonics;
pub mod attenuation;
pub mod hrir;
pub mod reflections;
pub mod zone;
