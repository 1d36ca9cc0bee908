//! The device driver boundary (spec §6.1): `DeviceDescription` plus the
//! final planar-float32-to-interleaved-device-format conversion stage. The
//! mixer works internally in float32 planar throughout; this module is the
//! one place that knows about the driver's negotiated sample format.

use amplimix_buffer::AudioBuffer;

/// Sample storage format the device driver negotiated (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    I16,
    I24,
    I32,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
            SampleFormat::I32 => 4,
            SampleFormat::F32 => 4,
        }
    }
}

/// `{sample_rate, channel_count, sample_format, buffer_size}` negotiated
/// with the driver (spec §6.1). `channel_count` is one of `{1, 2, 4, 6, 8}`.
#[derive(Debug, Clone, Copy)]
pub struct DeviceDescription {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub sample_format: SampleFormat,
    pub buffer_size: usize,
}

/// Converts `frames` of `src` (planar float32, `src.channel_count() ==
/// device.channel_count`) into interleaved bytes of `device.sample_format`,
/// appending to `out` (which is cleared first).
pub fn write_interleaved(src: &AudioBuffer, frames: usize, device: &DeviceDescription, out: &mut Vec<u8>) {
    let channels = device.channel_count as usize;
    out.clear();
    out.reserve(frames * channels * device.sample_format.bytes_per_sample());

    for frame in 0..frames {
        for ch in 0..channels {
            let sample = src.channel(ch.min(src.channel_count() - 1))[frame];
            match device.sample_format {
                SampleFormat::F32 => out.extend_from_slice(&sample.to_le_bytes()),
                SampleFormat::I32 => {
                    let v = (sample.clamp(-1.0, 1.0) * i32::MAX as f32) as i32;
                    out.extend_from_slice(&v.to_le_bytes());
                }
                SampleFormat::I24 => {
                    let v = (sample.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                    let bytes = v.to_le_bytes();
                    out.extend_from_slice(&bytes[0..3]);
                }
                SampleFormat::I16 => {
                    let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    out.extend_from_slice(&v.to_le_bytes());
                }
                SampleFormat::U8 => {
                    let v = ((sample.clamp(-1.0, 1.0) * 0.5 + 0.5) * u8::MAX as f32) as u8;
                    out.push(v);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_round_trips_through_interleave() {
        let mut buf = AudioBuffer::new(4, 2);
        buf.channel_mut(0).copy_from_slice(&[0.1, 0.2, 0.3, 0.4]);
        buf.channel_mut(1).copy_from_slice(&[-0.1, -0.2, -0.3, -0.4]);
        let device = DeviceDescription {
            sample_rate: 48000,
            channel_count: 2,
            sample_format: SampleFormat::F32,
            buffer_size: 4,
        };
        let mut out = Vec::new();
        write_interleaved(&buf, 4, &device, &mut out);
        assert_eq!(out.len(), 4 * 2 * 4);
        let first = f32::from_le_bytes(out[0..4].try_into().unwrap());
        assert!((first - 0.1).abs() < 1e-6);
    }

    #[test]
    fn i16_clamps_and_scales() {
        let mut buf = AudioBuffer::new(1, 1);
        buf.channel_mut(0)[0] = 2.0; // out of range, must clamp
        let device = DeviceDescription {
            sample_rate: 48000,
            channel_count: 1,
            sample_format: SampleFormat::I16,
            buffer_size: 1,
        };
        let mut out = Vec::new();
        write_interleaved(&buf, 1, &device, &mut out);
        let v = i16::from_le_bytes(out[0..2].try_into().unwrap());
        assert_eq!(v, i16::MAX);
    }
}
