//! Six-tap image-source early reflections processor, encoded into a
//! first-order ambisonic buffer.

use crate::ambisonics::{BFormatBuffer, Mode, Order};
use amplimix_dsp::filters::{Crossfader, DelayLine, GainSmoother, MonopoleLpf};
use glam::Vec3;

pub const SPEED_OF_SOUND_M_S: f32 = 343.0;

/// The six walls of the rectangular room model, in their principal
/// directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wall {
    PlusX,
    MinusX,
    PlusY,
    MinusY,
    PlusZ,
    MinusZ,
}

impl Wall {
    pub const ALL: [Wall; 6] = [
        Wall::PlusX,
        Wall::MinusX,
        Wall::PlusY,
        Wall::MinusY,
        Wall::PlusZ,
        Wall::MinusZ,
    ];

    pub fn direction(self) -> Vec3 {
        match self {
            Wall::PlusX => Vec3::X,
            Wall::MinusX => -Vec3::X,
            Wall::PlusY => Vec3::Y,
            Wall::MinusY => -Vec3::Y,
            Wall::PlusZ => Vec3::Z,
            Wall::MinusZ => -Vec3::Z,
        }
    }
}

/// Per-wall material absorption and geometry.
#[derive(Debug, Clone, Copy)]
pub struct WallMaterial {
    /// Reflection coefficient in `[0, 1]`; 0 fully absorptive.
    pub reflection_coefficient: f32,
    /// Distance from the listener to this wall, in meters.
    pub distance_m: f32,
}

/// A rectangular room around the listener, one material per wall, plus a
/// single high-frequency absorption cutoff shared by the low-pass stage.
#[derive(Debug, Clone, Copy)]
pub struct RoomParameters {
    pub walls: [WallMaterial; 6],
    pub hf_absorption_cutoff_hz: f32,
}

struct WallState {
    gain: GainSmoother,
}

/// Computes each wall's delay and magnitude, low-passes the source, and
/// accumulates six delayed, gained taps into a first-order ambisonic
/// buffer, crossfading between the previous and current room parameters
/// over one block whenever they change.
pub struct ReflectionsProcessor {
    sample_rate: f32,
    delay_line: amplimix_dsp::filters::DelayLine,
    lpf: MonopoleLpf,
    walls: [WallState; 6],
    current_params: RoomParameters,
    pending_params: Option<RoomParameters>,
    block_size: usize,
    scratch_current: BFormatBuffer,
    scratch_target: BFormatBuffer,
}

impl ReflectionsProcessor {
    pub fn new(sample_rate: f32, max_delay_frames: usize, block_size: usize, initial: RoomParameters) -> Self {
        let lpf_coeff = hf_cutoff_to_coeff(initial.hf_absorption_cutoff_hz, sample_rate);
        Self {
            sample_rate,
            delay_line: DelayLine::new(max_delay_frames.max(block_size + 1)),
            lpf: MonopoleLpf::new(lpf_coeff),
            walls: std::array::from_fn(|_| WallState { gain: GainSmoother::new(0.0) }),
            current_params: initial,
            pending_params: None,
            block_size,
            scratch_current: BFormatBuffer::new(block_size, Order::First, Mode::ThreeD),
            scratch_target: BFormatBuffer::new(block_size, Order::First, Mode::ThreeD),
        }
    }

    /// Call when listener position or room properties change; the next
    /// `process` crossfades from the current reflection buffer to one
    /// computed with the new parameters.
    pub fn set_room_parameters(&mut self, params: RoomParameters) {
        self.pending_params = Some(params);
    }

    fn wall_delay_frames(&self, distance_m: f32) -> usize {
        let delay_s = distance_m / SPEED_OF_SOUND_M_S;
        ((delay_s * self.sample_rate) as usize).min(self.delay_line.capacity() - 1)
    }

    /// `source` is the mono signal reaching the listener before reflections
    /// (already attenuated/filtered by the per-layer chain). Returns the
    /// ambisonic reflections contribution for this block.
    pub fn process(&mut self, source: &[f32]) -> &BFormatBuffer {
        debug_assert_eq!(source.len(), self.block_size);

        let mut filtered = source.to_vec();
        self.lpf.process(&mut filtered);
        self.delay_line.insert(&filtered);

        self.scratch_current.clear();
        let frames = self.block_size;
        let mut tap = vec![0.0f32; frames];
        Self::render_walls(
            &self.current_params,
            &self.delay_line,
            self.sample_rate,
            &mut tap,
            &mut self.scratch_current,
        );

        match self.pending_params.take() {
            None => &self.scratch_current,
            Some(target) => {
                self.scratch_target.clear();
                Self::render_walls(
                    &target,
                    &self.delay_line,
                    self.sample_rate,
                    &mut tap,
                    &mut self.scratch_target,
                );
                for c in 0..self.scratch_current.audio().channel_count() {
                    let a = self.scratch_current.audio().channel(c).to_vec();
                    let b = self.scratch_target.audio().channel(c).to_vec();
                    Crossfader::crossfade(self.scratch_current.audio_mut().channel_mut(c), &a, &b);
                }
                self.current_params = target;
                &self.scratch_current
            }
        }
    }

    /// Reads each wall's delayed tap from `delay_line` and accumulates its
    /// gained contribution into `dst`'s W channel plus the directional
    /// channel(s) matching the wall's principal axis.
    fn render_walls(
        params: &RoomParameters,
        delay_line: &DelayLine,
        sample_rate: f32,
        tap: &mut [f32],
        dst: &mut BFormatBuffer,
    ) {
        for (i, wall) in Wall::ALL.iter().enumerate() {
            let material = params.walls[i];
            let delay_s = material.distance_m / SPEED_OF_SOUND_M_S;
            let delay = ((delay_s * sample_rate) as usize).min(delay_line.capacity() - 1);
            delay_line.read(delay, tap);
            let magnitude = material.reflection_coefficient / (material.distance_m + 1.0);

            let w_channel = dst.audio_mut().channel_mut(0);
            for (s, t) in w_channel.iter_mut().zip(tap.iter()) {
                *s += t * magnitude * std::f32::consts::FRAC_1_SQRT_2;
            }

            let dir = wall.direction();
            for (ch, weight) in [(1usize, dir.y), (2usize, dir.z), (3usize, dir.x)] {
                if weight.abs() < 1e-6 {
                    continue;
                }
                let target = dst.audio_mut().channel_mut(ch);
                for (s, t) in target.iter_mut().zip(tap.iter()) {
                    *s += t * magnitude * weight;
                }
            }
        }
    }
}

fn hf_cutoff_to_coeff(cutoff_hz: f32, sample_rate: f32) -> f32 {
    let x = (-2.0 * std::f32::consts::PI * cutoff_hz / sample_rate).exp();
    x.clamp(0.0, 0.999)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_room(distance: f32, coeff: f32) -> RoomParameters {
        RoomParameters {
            walls: [WallMaterial { reflection_coefficient: coeff, distance_m: distance }; 6],
            hf_absorption_cutoff_hz: 5000.0,
        }
    }

    #[test]
    fn silence_in_produces_silence_out() {
        let mut proc = ReflectionsProcessor::new(48000.0, 4800, 256, flat_room(3.0, 0.5));
        let silence = vec![0.0f32; 256];
        for _ in 0..4 {
            let out = proc.process(&silence);
            assert!(out.audio().channel(0).iter().all(|&s| s.abs() < 1e-6));
        }
    }

    #[test]
    fn impulse_produces_nonzero_reflections_after_delay() {
        let mut proc = ReflectionsProcessor::new(48000.0, 4800, 256, flat_room(1.0, 0.8));
        let mut impulse = vec![0.0f32; 256];
        impulse[0] = 1.0;
        let silence = vec![0.0f32; 256];
        let _ = proc.process(&impulse);
        let mut any_nonzero = false;
        for _ in 0..10 {
            let out = proc.process(&silence);
            if out.audio().channel(0).iter().any(|&s| s.abs() > 1e-6) {
                any_nonzero = true;
            }
        }
        assert!(any_nonzero);
    }
}
