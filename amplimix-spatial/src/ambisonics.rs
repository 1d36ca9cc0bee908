//! Ambisonic (B-format) primitives: the B-format buffer, a point-source
//! spherical-harmonic encoder, and a decoder to fixed speaker layouts. ACN
//! channel ordering with SN3D normalization (the AmbiX convention).

use amplimix_buffer::AudioBuffer;
use glam::Vec3;

/// Ambisonic order. `K <= 3` is as far as closed-form coefficients go
/// below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    First = 1,
    Second = 2,
    Third = 3,
}

impl Order {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// 3D mode has `(K+1)^2` channels; 2D (horizontal-only) mode has `2K+1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ThreeD,
    TwoD,
}

/// Number of B-format channels for `order` in `mode`.
pub fn channel_count(order: Order, mode: Mode) -> usize {
    let k = order.as_u32() as usize;
    match mode {
        Mode::ThreeD => (k + 1) * (k + 1),
        Mode::TwoD => 2 * k + 1,
    }
}

/// A planar audio buffer tagged with its ambisonic order and 2D/3D mode.
pub struct BFormatBuffer {
    audio: AudioBuffer,
    order: Order,
    mode: Mode,
}

impl BFormatBuffer {
    pub fn new(frames: usize, order: Order, mode: Mode) -> Self {
        Self {
            audio: AudioBuffer::new(frames, channel_count(order, mode)),
            order,
            mode,
        }
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn audio(&self) -> &AudioBuffer {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioBuffer {
        &mut self.audio
    }

    pub fn clear(&mut self) {
        self.audio.clear();
    }

    pub fn add_assign(&mut self, other: &BFormatBuffer) {
        self.audio.add_assign(&other.audio);
    }
}

/// SN3D-normalized real spherical-harmonic coefficients in ACN order, for
/// `channel_count(order, ThreeD)` channels, evaluated at the unit direction
/// `(x, y, z)` (x=right, y=up, z=forward, matching the attenuation module's
/// local-frame convention).
///
/// Closed-form up to order 3, as commonly tabulated for AmbiX (e.g. the IEM
/// plugin suite's ambisonic encoder); order is the minimum of the
/// coefficient table's reach and the requested `order`.
pub fn sh_coefficients(order: Order, direction: Vec3, out: &mut [f32]) {
    let d = direction.normalize_or_zero();
    let (x, y, z) = (d.x, d.y, d.z);
    debug_assert!(out.len() >= channel_count(order, Mode::ThreeD));

    out[0] = 1.0; // ACN0: W
    if order.as_u32() >= 1 {
        out[1] = y; // ACN1: Y
        out[2] = z; // ACN2: Z
        out[3] = x; // ACN3: X
    }
    if order.as_u32() >= 2 {
        const S3: f32 = 1.732_050_8; // sqrt(3)
        out[4] = S3 * x * y; // ACN4: V
        out[5] = S3 * y * z; // ACN5: T
        out[6] = 0.5 * (3.0 * z * z - 1.0); // ACN6: R
        out[7] = S3 * x * z; // ACN7: S
        out[8] = 0.5 * S3 * (x * x - y * y); // ACN8: U
    }
    if order.as_u32() >= 3 {
        const S5_8: f32 = 0.790_569_4; // sqrt(5/8)
        const S15: f32 = 3.872_983_3; // sqrt(15)
        const S3_8: f32 = 0.612_372_4; // sqrt(3/8)
        const S15_2: f32 = 1.936_491_7; // sqrt(15)/2
        out[9] = S5_8 * y * (3.0 * x * x - y * y); // ACN9
        out[10] = S15 * x * y * z; // ACN10
        out[11] = S3_8 * y * (5.0 * z * z - 1.0); // ACN11
        out[12] = 0.5 * z * (5.0 * z * z - 3.0); // ACN12
        out[13] = S3_8 * x * (5.0 * z * z - 1.0); // ACN13
        out[14] = S15_2 * (x * x - y * y) * z; // ACN14
        out[15] = S5_8 * x * (x * x - 3.0 * y * y); // ACN15
    }
}

/// Per-order weight applied by the decoder to compensate SN3D normalization:
/// `(2*floor(sqrt(c)) + 1)`.
pub fn decoder_order_weight(channel: usize) -> f32 {
    (2.0 * (channel as f32).sqrt().floor() + 1.0) as f32
}

/// Encodes a mono source into B-format at a given direction, gain, and
/// per-order weighting. Crossfades from the previous call's coefficients
/// over `interp_samples` samples to avoid zipper noise when the source
/// moves.
pub struct SourceEncoder {
    order: Order,
    mode: Mode,
    prev_coeffs: Vec<f32>,
    interp_samples: usize,
}

impl SourceEncoder {
    pub fn new(order: Order, mode: Mode) -> Self {
        let n = channel_count(order, mode);
        Self {
            order,
            mode,
            prev_coeffs: vec![0.0; n],
            interp_samples: 0,
        }
    }

    fn target_coefficients(&self, direction: Vec3, gain: f32, per_order_weight: &[f32]) -> Vec<f32> {
        let n = channel_count(self.order, self.mode);
        let mut full = vec![0.0f32; channel_count(self.order, Mode::ThreeD)];
        sh_coefficients(self.order, direction, &mut full);
        let mut out = vec![0.0f32; n];
        for c in 0..n {
            let weight = per_order_weight.get(c).copied().unwrap_or(1.0);
            out[c] = full[c] * gain * weight;
        }
        out
    }

    /// Writes `mono[i] * coeff[c]` into `out[c][i]`, crossfading from the
    /// previous coefficient set over `round(interp * block)` samples.
    pub fn process(
        &mut self,
        mono: &[f32],
        out: &mut BFormatBuffer,
        direction: Vec3,
        gain: f32,
        per_order_weight: &[f32],
        interp: f32,
    ) {
        out.clear();
        self.process_accumulate(mono, out, direction, gain, per_order_weight, interp);
    }

    /// Same as [`process`](Self::process) but adds into `out` rather than
    /// overwriting it.
    pub fn process_accumulate(
        &mut self,
        mono: &[f32],
        out: &mut BFormatBuffer,
        direction: Vec3,
        gain: f32,
        per_order_weight: &[f32],
        interp: f32,
    ) {
        let n = channel_count(self.order, self.mode);
        let target = self.target_coefficients(direction, gain, per_order_weight);
        let block = mono.len();
        self.interp_samples = ((interp * block as f32).round() as usize).min(block).max(1);

        for c in 0..n {
            let start = self.prev_coeffs[c];
            let end = target[c];
            let channel = out.audio_mut().channel_mut(c);
            for (i, m) in mono.iter().enumerate() {
                let t = ((i + 1) as f32 / self.interp_samples as f32).min(1.0);
                let coeff = start + (end - start) * t;
                channel[i] += m * coeff;
            }
        }
        self.prev_coeffs = target;
    }
}

/// One decoder output speaker: a fixed direction and its row of decode
/// coefficients (one per ambisonic channel).
#[derive(Debug, Clone)]
pub struct Speaker {
    pub direction: Vec3,
    coefficients: Vec<f32>,
}

impl Speaker {
    pub fn decode_coefficients(&self) -> &[f32] {
        &self.coefficients
    }
}

/// Decodes a B-format signal to a fixed speaker layout by per-channel dot
/// product against each speaker's coefficient row.
pub struct AmbisonicDecoder {
    order: Order,
    mode: Mode,
    speakers: Vec<Speaker>,
}

impl AmbisonicDecoder {
    /// Builds a decoder for the given speaker directions, deriving each
    /// speaker's coefficient row from the spherical-harmonic basis at that
    /// direction, scaled by the SN3D-compensation weight per channel.
    pub fn new(order: Order, mode: Mode, speaker_directions: &[Vec3]) -> Self {
        let n = channel_count(order, mode);
        let speakers = speaker_directions
            .iter()
            .map(|&direction| {
                let mut full = vec![0.0f32; channel_count(order, Mode::ThreeD)];
                sh_coefficients(order, direction, &mut full);
                let coefficients = (0..n)
                    .map(|c| full[c] * decoder_order_weight(c))
                    .collect();
                Speaker { direction, coefficients }
            })
            .collect();
        Self { order, mode, speakers }
    }

    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }

    pub fn speakers(&self) -> &[Speaker] {
        &self.speakers
    }

    /// Common fixed speaker layouts.
    pub fn stereo(order: Order, mode: Mode) -> Self {
        let a = 110f32.to_radians();
        Self::new(
            order,
            mode,
            &[
                Vec3::new(a.sin(), 0.0, a.cos()),
                Vec3::new(-a.sin(), 0.0, a.cos()),
            ],
        )
    }

    pub fn quad(order: Order, mode: Mode) -> Self {
        let angles = [45f32, 135.0, -135.0, -45.0];
        let dirs: Vec<Vec3> = angles
            .iter()
            .map(|&deg| {
                let r = deg.to_radians();
                Vec3::new(r.sin(), 0.0, r.cos())
            })
            .collect();
        Self::new(order, mode, &dirs)
    }

    /// Decodes one frame's worth of B-format into `out`, one channel per
    /// speaker, `out.channel_count() == speaker_count()`.
    pub fn decode(&self, input: &BFormatBuffer, out: &mut AudioBuffer) {
        debug_assert_eq!(out.channel_count(), self.speakers.len());
        let n = channel_count(self.order, self.mode);
        let frames = input.audio().frame_count();
        for (s, speaker) in self.speakers.iter().enumerate() {
            let dst = out.channel_mut(s);
            dst[..frames].fill(0.0);
            for c in 0..n {
                let coeff = speaker.coefficients[c];
                if coeff == 0.0 {
                    continue;
                }
                let src = input.audio().channel(c);
                for i in 0..frames {
                    dst[i] += src[i] * coeff;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn omni_channel_count_matches_order() {
        assert_eq!(channel_count(Order::First, Mode::ThreeD), 4);
        assert_eq!(channel_count(Order::Second, Mode::ThreeD), 9);
        assert_eq!(channel_count(Order::Third, Mode::ThreeD), 16);
    }

    #[test]
    fn encode_front_source_maximizes_in_matching_speaker() {
        let mut encoder = SourceEncoder::new(Order::First, Mode::ThreeD);
        let decoder = AmbisonicDecoder::stereo(Order::First, Mode::ThreeD);
        let mono = vec![1.0f32; 64];
        let mut bformat = BFormatBuffer::new(64, Order::First, Mode::ThreeD);
        let weights = vec![1.0f32; 4];

        // encode dead ahead (+Z), directly at the front speakers' bisector
        encoder.process(&mono, &mut bformat, Vec3::Z, 1.0, &weights, 0.0);

        let mut decoded = AudioBuffer::new(64, decoder.speaker_count());
        decoder.decode(&bformat, &mut decoded);

        let left_energy: f32 = decoded.channel(0).iter().map(|s| s * s).sum();
        let right_energy: f32 = decoded.channel(1).iter().map(|s| s * s).sum();
        assert_relative_eq!(left_energy, right_energy, epsilon = 1e-3);
        assert!(left_energy > 0.0);
    }

    #[test]
    fn coefficients_at_origin_are_omnidirectional_only() {
        let mut out = vec![0.0f32; 16];
        sh_coefficients(Order::Third, Vec3::ZERO, &mut out);
        assert_relative_eq!(out[0], 1.0, epsilon = 1e-6);
    }
}
