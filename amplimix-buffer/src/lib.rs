//! Planar, SIMD-aligned multichannel PCM container.
//!
//! An [`AudioBuffer`] is an ordered sequence of channels, each a contiguous
//! aligned array of `f32` samples of identical length (the frame count).
//! Channel count and frame count are fixed at construction. The buffer is
//! planar (channel-major) rather than interleaved so that per-channel DSP
//! kernels (filters, convolution) can operate on a contiguous slice without
//! a interleave gather/scatter step.

mod aligned;

pub use aligned::AlignedF32Vec;

/// SIMD alignment, in bytes, used for all channel storage. 32 bytes covers
/// AVX2 without over-aligning for narrower targets; wider kernels simply see
/// more alignment than they asked for.
pub const SIMD_ALIGN: usize = 32;

/// A planar multichannel audio buffer.
///
/// Invariants (debug-asserted, not enforced in release — matching spec
/// §4.1's "programmer error" contract for shape mismatches):
/// - every channel has exactly `frame_count()` samples;
/// - channel storage starts at a [`SIMD_ALIGN`]-byte boundary.
#[derive(Clone)]
pub struct AudioBuffer {
    channels: Vec<AlignedF32Vec>,
    frames: usize,
}

impl AudioBuffer {
    /// Constructs a buffer with `channel_count` channels of `frames` samples
    /// each, zero-filled.
    pub fn new(frames: usize, channel_count: usize) -> Self {
        let channels = (0..channel_count)
            .map(|_| AlignedF32Vec::zeroed(frames))
            .collect();
        Self { channels, frames }
    }

    /// Constructs a buffer from existing planar data. Panics if any channel's
    /// length differs from the first.
    pub fn from_channels(data: Vec<Vec<f32>>) -> Self {
        let frames = data.first().map(|c| c.len()).unwrap_or(0);
        for c in &data {
            assert_eq!(c.len(), frames, "all channels must have equal length");
        }
        let channels = data
            .into_iter()
            .map(|c| AlignedF32Vec::from_slice(&c))
            .collect();
        Self { channels, frames }
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    pub fn channels_mut(&mut self) -> &mut [AlignedF32Vec] {
        &mut self.channels
    }

    /// Zeroes every sample in every channel.
    pub fn clear(&mut self) {
        for ch in &mut self.channels {
            ch.fill(0.0);
        }
    }

    /// Copies `count` samples from `src` channel `src_ch` starting at
    /// `src_off` into `self` channel `dst_ch` starting at `dst_off`.
    pub fn copy_from(
        &mut self,
        dst_ch: usize,
        dst_off: usize,
        src: &AudioBuffer,
        src_ch: usize,
        src_off: usize,
        count: usize,
    ) {
        debug_assert!(src_off + count <= src.frames);
        debug_assert!(dst_off + count <= self.frames);
        let src_slice = &src.channels[src_ch][src_off..src_off + count];
        self.channels[dst_ch][dst_off..dst_off + count].copy_from_slice(src_slice);
    }

    /// Adds every channel of `other` into `self` (`self += other`).
    /// Requires matching shape.
    pub fn add_assign(&mut self, other: &AudioBuffer) {
        debug_assert_eq!(self.frames, other.frames);
        debug_assert_eq!(self.channel_count(), other.channel_count());
        for (a, b) in self.channels.iter_mut().zip(other.channels.iter()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += *y;
            }
        }
    }

    /// Subtracts every channel of `other` from `self` (`self -= other`).
    pub fn sub_assign(&mut self, other: &AudioBuffer) {
        debug_assert_eq!(self.frames, other.frames);
        debug_assert_eq!(self.channel_count(), other.channel_count());
        for (a, b) in self.channels.iter_mut().zip(other.channels.iter()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x -= *y;
            }
        }
    }

    /// Multiplies `self` channel-wise by `other` (`self *= other`).
    pub fn mul_assign(&mut self, other: &AudioBuffer) {
        debug_assert_eq!(self.frames, other.frames);
        debug_assert_eq!(self.channel_count(), other.channel_count());
        for (a, b) in self.channels.iter_mut().zip(other.channels.iter()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x *= *y;
            }
        }
    }

    /// Scales every sample in every channel by `scalar`.
    pub fn scale(&mut self, scalar: f32) {
        for ch in &mut self.channels {
            for x in ch.iter_mut() {
                *x *= scalar;
            }
        }
    }

    /// Adds `other` scaled by `gain` into `self` (multiply-accumulate).
    pub fn mul_add_assign(&mut self, other: &AudioBuffer, gain: f32) {
        debug_assert_eq!(self.frames, other.frames);
        debug_assert_eq!(self.channel_count(), other.channel_count());
        for (a, b) in self.channels.iter_mut().zip(other.channels.iter()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += *y * gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn new_buffer_is_zeroed() {
        let buf = AudioBuffer::new(64, 2);
        assert_eq!(buf.frame_count(), 64);
        assert_eq!(buf.channel_count(), 2);
        assert!(buf.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn channels_are_aligned() {
        let buf = AudioBuffer::new(128, 4);
        for i in 0..4 {
            let ptr = buf.channel(i).as_ptr() as usize;
            assert_eq!(ptr % SIMD_ALIGN, 0, "channel {i} not aligned");
        }
    }

    #[test]
    fn add_then_sub_restores_original() {
        let mut a = AudioBuffer::from_channels(vec![vec![1.0, 2.0, 3.0]]);
        let b = AudioBuffer::from_channels(vec![vec![0.5, -1.0, 2.0]]);
        let original = a.channel(0).to_vec();

        a.add_assign(&b);
        a.sub_assign(&b);

        for (got, want) in a.channel(0).iter().zip(original.iter()) {
            assert_relative_eq!(got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn scale_by_zero_clears() {
        let mut a = AudioBuffer::from_channels(vec![vec![1.0, 2.0, 3.0]]);
        a.scale(0.0);
        assert!(a.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn mul_add_accumulates() {
        let mut a = AudioBuffer::from_channels(vec![vec![1.0, 1.0]]);
        let b = AudioBuffer::from_channels(vec![vec![2.0, 3.0]]);
        a.mul_add_assign(&b, 0.5);
        assert_relative_eq!(a.channel(0)[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(a.channel(0)[1], 2.5, epsilon = 1e-6);
    }

    #[test]
    fn copy_from_copies_window() {
        let src = AudioBuffer::from_channels(vec![vec![1.0, 2.0, 3.0, 4.0]]);
        let mut dst = AudioBuffer::new(4, 1);
        dst.copy_from(0, 1, &src, 0, 1, 2);
        assert_eq!(dst.channel(0), &[0.0, 2.0, 3.0, 0.0]);
    }
}
