//! The `Decoder` contract (spec §3): closed → open(file) → {load-all |
//! stream(offset, length) | seek(offset)} → close. Codec internals are out
//! of scope (§1) — this module specifies only the interface the mixer pulls
//! decoded frames through, plus a trivial in-memory implementation wrapping
//! an already-decoded buffer, sufficient for every §8 scenario since no
//! actual codec decoding is exercised by the core's own tests.

use crate::handles::SoundFormat;
use amplimix_buffer::AudioBuffer;

/// Produces planar float32 frames at the resource's native rate and channel
/// count into a caller-provided buffer. One `Decoder` instance belongs to
/// exactly one layer for the lifetime of that layer's playback.
pub trait Decoder: Send {
    fn format(&self) -> SoundFormat;

    /// Reads up to `frames` frames starting from the decoder's current
    /// cursor into `out` (channel-major, `out.channel_count() >=
    /// format().channel_count()`). Returns the number of frames actually
    /// produced; a return less than `frames` signals end-of-resource.
    fn read(&mut self, out: &mut AudioBuffer, frames: usize) -> Result<usize, DecoderError>;

    /// Repositions the decode cursor to `frame` (frames from the start of
    /// the resource).
    fn seek(&mut self, frame: u64) -> Result<(), DecoderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("decoder I/O failure: {0}")]
    Io(String),
    #[error("seek past end of resource")]
    SeekOutOfRange,
}

/// A `Decoder` over an already-decoded, fully in-memory planar buffer. Used
/// by tests and the CLI demo to exercise the mixer without a real codec.
pub struct PreloadedDecoder {
    format: SoundFormat,
    samples: AudioBuffer,
    cursor: u64,
}

impl PreloadedDecoder {
    pub fn new(format: SoundFormat, samples: AudioBuffer) -> Self {
        Self { format, samples, cursor: 0 }
    }
}

impl Decoder for PreloadedDecoder {
    fn format(&self) -> SoundFormat {
        self.format
    }

    fn read(&mut self, out: &mut AudioBuffer, frames: usize) -> Result<usize, DecoderError> {
        let total = self.samples.frame_count() as u64;
        let remaining = total.saturating_sub(self.cursor);
        let n = (frames as u64).min(remaining) as usize;
        for c in 0..out.channel_count().min(self.samples.channel_count()) {
            out.copy_from(c, 0, &self.samples, c, self.cursor as usize, n);
        }
        self.cursor += n as u64;
        Ok(n)
    }

    fn seek(&mut self, frame: u64) -> Result<(), DecoderError> {
        if frame > self.samples.frame_count() as u64 {
            return Err(DecoderError::SeekOutOfRange);
        }
        self.cursor = frame;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_ramp(frames: usize) -> AudioBuffer {
        let data: Vec<f32> = (0..frames).map(|i| i as f32).collect();
        AudioBuffer::from_channels(vec![data])
    }

    #[test]
    fn preloaded_decoder_reads_sequential_windows() {
        let samples = mono_ramp(10);
        let mut dec = PreloadedDecoder::new(
            SoundFormat { sample_rate: 48000, channel_count: 1, frame_count: Some(10) },
            samples,
        );
        let mut out = AudioBuffer::new(4, 1);
        let n = dec.read(&mut out, 4).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out.channel(0), &[0.0, 1.0, 2.0, 3.0]);

        let n2 = dec.read(&mut out, 4).unwrap();
        assert_eq!(n2, 4);
        assert_eq!(out.channel(0), &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn preloaded_decoder_signals_short_read_at_end() {
        let samples = mono_ramp(5);
        let mut dec = PreloadedDecoder::new(
            SoundFormat { sample_rate: 48000, channel_count: 1, frame_count: Some(5) },
            samples,
        );
        let mut out = AudioBuffer::new(8, 1);
        let n = dec.read(&mut out, 8).unwrap();
        assert_eq!(n, 5);
    }

    #[test]
    fn seek_repositions_cursor() {
        let samples = mono_ramp(10);
        let mut dec = PreloadedDecoder::new(
            SoundFormat { sample_rate: 48000, channel_count: 1, frame_count: Some(10) },
            samples,
        );
        dec.seek(5).unwrap();
        let mut out = AudioBuffer::new(2, 1);
        dec.read(&mut out, 2).unwrap();
        assert_eq!(out.channel(0), &[5.0, 6.0]);
    }
}
