//! Filter primitives: biquad, one-pole smoothing, a delay line, a
//! partitioned FFT convolver (with a two-stage head/tail variant), a
//! per-block gain smoother, and an equal-power crossfader.

use crate::fft::RealFft;
use std::f32::consts::PI;
use std::thread::JoinHandle;

/// Biquad filter topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    LowPass,
    HighPass,
    BandPass,
}

/// A resonant biquad (LP/HP/BP), RBJ cookbook coefficients, recomputed only
/// when cutoff/resonance change.
#[derive(Debug, Clone)]
pub struct Biquad {
    kind: BiquadKind,
    sample_rate: f32,
    cutoff_hz: f32,
    resonance: f32,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    pub fn new(kind: BiquadKind, sample_rate: f32, cutoff_hz: f32, resonance: f32) -> Self {
        let mut f = Self {
            kind,
            sample_rate,
            cutoff_hz: 0.0,
            resonance: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        };
        f.set_params(cutoff_hz, resonance);
        f
    }

    /// Recomputes coefficients only if the parameters actually changed.
    pub fn set_params(&mut self, cutoff_hz: f32, resonance: f32) {
        if cutoff_hz == self.cutoff_hz && resonance == self.resonance {
            return;
        }
        self.cutoff_hz = cutoff_hz.clamp(1.0, self.sample_rate * 0.49);
        self.resonance = resonance.max(0.01);

        let omega = 2.0 * PI * self.cutoff_hz / self.sample_rate;
        let alpha = omega.sin() / (2.0 * self.resonance);
        let cos_omega = omega.cos();

        let (b0, b1, b2, a0, a1, a2) = match self.kind {
            BiquadKind::LowPass => {
                let b1 = 1.0 - cos_omega;
                let b0 = b1 / 2.0;
                let b2 = b0;
                (b0, b1, b2, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
            }
            BiquadKind::HighPass => {
                let b1 = -(1.0 + cos_omega);
                let b0 = -b1 / 2.0;
                let b2 = b0;
                (b0, b1, b2, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
            }
            BiquadKind::BandPass => {
                let b0 = alpha;
                (b0, 0.0, -b0, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
            }
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Processes `buf` in place using transposed direct-form-II state.
    pub fn process(&mut self, buf: &mut [f32]) {
        for x in buf.iter_mut() {
            let input = *x;
            let output = self.b0 * input + self.z1;
            self.z1 = self.b1 * input - self.a1 * output + self.z2;
            self.z2 = self.b2 * input - self.a2 * output;
            *x = output;
        }
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// One-pole smoothing low-pass filter. The coefficient `a` in `[0, 1]` is the
/// fraction of the previous output retained per sample (`a = 0` passes the
/// input unfiltered; `a` close to `1` is heavily smoothed).
#[derive(Debug, Clone, Copy)]
pub struct MonopoleLpf {
    coeff: f32,
    state: f32,
}

impl MonopoleLpf {
    pub fn new(coeff: f32) -> Self {
        Self {
            coeff: coeff.clamp(0.0, 1.0),
            state: 0.0,
        }
    }

    pub fn set_coefficient(&mut self, coeff: f32) {
        self.coeff = coeff.clamp(0.0, 1.0);
    }

    pub fn process(&mut self, buf: &mut [f32]) {
        for x in buf.iter_mut() {
            self.state = self.coeff * self.state + (1.0 - self.coeff) * *x;
            *x = self.state;
        }
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

/// A fixed-capacity ring delay line. `insert` advances the write head by one
/// block (used once per block by the owner that drives time forward);
/// `process`/`read` reads a delayed block without advancing, so multiple taps
/// at different delays can read the same history independently.
pub struct DelayLine {
    buf: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    pub fn new(max_delay_frames: usize) -> Self {
        Self {
            buf: vec![0.0; max_delay_frames.max(1)],
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Writes `block` starting at the current head and advances the head by
    /// `block.len()` frames (wrapping).
    pub fn insert(&mut self, block: &[f32]) {
        let cap = self.buf.len();
        for &s in block {
            self.buf[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % cap;
        }
    }

    /// Reads `out.len()` frames delayed by `delay_frames` behind the current
    /// write head, without advancing anything.
    pub fn read(&self, delay_frames: usize, out: &mut [f32]) {
        let cap = self.buf.len();
        let delay = delay_frames.min(cap - 1);
        for (i, o) in out.iter_mut().enumerate() {
            let idx = (self.write_pos + cap - delay - (out.len() - i)) % cap;
            *o = self.buf[idx];
        }
    }

    pub fn reset(&mut self) {
        self.buf.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }
}

/// Per-block gain smoother: linearly interpolates from the last applied
/// gain to a new target across the block, avoiding zipper/click artifacts
/// from stepped gain changes.
#[derive(Debug, Clone, Copy)]
pub struct GainSmoother {
    current: f32,
}

impl GainSmoother {
    pub fn new(initial: f32) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// Applies a ramp from the current gain to `target` in place over `buf`.
    pub fn process(&mut self, buf: &mut [f32], target: f32) {
        let n = buf.len();
        if n == 0 {
            self.current = target;
            return;
        }
        let start = self.current;
        let step = (target - start) / n as f32;
        for (i, x) in buf.iter_mut().enumerate() {
            *x *= start + step * i as f32;
        }
        self.current = target;
    }

    /// Multiply-accumulates `src * ramp(current..target)` into `dst`.
    pub fn process_mul_add(&mut self, dst: &mut [f32], src: &[f32], target: f32) {
        let n = dst.len().min(src.len());
        if n == 0 {
            self.current = target;
            return;
        }
        let start = self.current;
        let step = (target - start) / n as f32;
        for i in 0..n {
            dst[i] += src[i] * (start + step * i as f32);
        }
        self.current = target;
    }

    pub fn snap(&mut self, gain: f32) {
        self.current = gain;
    }
}

/// Equal-power crossfade between two same-shaped buffers over one block, in
/// place into `out`. Used when reflection/ambisonic parameters change
/// discontinuously between blocks.
pub struct Crossfader;

impl Crossfader {
    /// `out[i] = a[i] * cos(t*pi/2) + b[i] * sin(t*pi/2)`, `t` ramping 0..1
    /// across the block.
    pub fn crossfade(out: &mut [f32], a: &[f32], b: &[f32]) {
        let n = out.len().min(a.len()).min(b.len());
        if n == 0 {
            return;
        }
        for i in 0..n {
            let t = if n > 1 { i as f32 / (n - 1) as f32 } else { 1.0 };
            let (fade_out, fade_in) = (t * PI / 2.0).cos_sin_pair();
            out[i] = a[i] * fade_out + b[i] * fade_in;
        }
    }
}

trait CosSinPair {
    fn cos_sin_pair(self) -> (f32, f32);
}

impl CosSinPair for f32 {
    fn cos_sin_pair(self) -> (f32, f32) {
        (self.cos(), self.sin())
    }
}

/// Identity filter: passes its input through unchanged. Serves as the base
/// case for a family of FFT-domain filters that default to no-op behavior
/// until configured with a real impulse response.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFilter;

impl IdentityFilter {
    pub fn process(&self, _buf: &mut [f32]) {}
}

/// Single-segment partitioned FFT convolver. The impulse response is split
/// into `ceil(ir_len / block_size)` segments of `block_size` samples each;
/// each input block is transformed once and complex-multiply-accumulated
/// against every IR segment in the frequency domain, then summed via
/// overlap-add. All scratch is allocated in `new`; `process` never
/// allocates (spec §4.3/§9 "all allocations happen in init").
pub struct PartitionedConvolver {
    block_size: usize,
    fft: RealFft,
    segments_re: Vec<Vec<f32>>,
    segments_im: Vec<Vec<f32>>,
    history_re: Vec<Vec<f32>>,
    history_im: Vec<Vec<f32>>,
    history_pos: usize,
    input_scratch: Vec<f32>,
    fdl_re: Vec<f32>,
    fdl_im: Vec<f32>,
    overlap: Vec<f32>,
    time_scratch: Vec<f32>,
}

impl PartitionedConvolver {
    /// `block_size` is the FFT segment size (the convolver transforms
    /// `2*block_size`-point FFTs to get linear, not circular, convolution per
    /// segment). `ir` is the impulse response, split into `block_size`-sample
    /// partitions, zero-padded in the last partition if needed.
    pub fn new(block_size: usize, ir: &[f32]) -> Self {
        let fft_size = block_size * 2;
        let mut fft = RealFft::new(fft_size);
        let bins = fft.bin_count();

        let num_segments = ir.len().div_ceil(block_size).max(1);
        let mut segments_re = Vec::with_capacity(num_segments);
        let mut segments_im = Vec::with_capacity(num_segments);

        for seg in 0..num_segments {
            let start = seg * block_size;
            let end = (start + block_size).min(ir.len());
            let mut padded = vec![0.0f32; fft_size];
            if start < end {
                padded[..end - start].copy_from_slice(&ir[start..end]);
            }
            let mut re = vec![0.0f32; bins];
            let mut im = vec![0.0f32; bins];
            fft.forward(&padded, &mut re, &mut im);
            segments_re.push(re);
            segments_im.push(im);
        }

        Self {
            block_size,
            fft,
            segments_re,
            segments_im,
            history_re: vec![vec![0.0; bins]; num_segments],
            history_im: vec![vec![0.0; bins]; num_segments],
            history_pos: 0,
            input_scratch: vec![0.0; fft_size],
            fdl_re: vec![0.0; bins],
            fdl_im: vec![0.0; bins],
            overlap: vec![0.0; block_size],
            time_scratch: vec![0.0; fft_size],
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_segments(&self) -> usize {
        self.segments_re.len()
    }

    /// Convolves one `block_size`-sample block, writing `block_size` output
    /// samples (overlap-added with the previous call's tail).
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.block_size);
        debug_assert_eq!(output.len(), self.block_size);

        self.input_scratch[..self.block_size].copy_from_slice(input);
        self.input_scratch[self.block_size..].fill(0.0);

        let bins = self.fft.bin_count();
        let num_segments = self.segments_re.len();
        self.history_pos = (self.history_pos + num_segments - 1) % num_segments;
        self.fft.forward(
            &self.input_scratch,
            &mut self.history_re[self.history_pos],
            &mut self.history_im[self.history_pos],
        );

        self.fdl_re.iter_mut().for_each(|v| *v = 0.0);
        self.fdl_im.iter_mut().for_each(|v| *v = 0.0);

        for seg in 0..num_segments {
            let hist_idx = (self.history_pos + seg) % num_segments;
            let (hr, hi) = (&self.history_re[hist_idx], &self.history_im[hist_idx]);
            let (sr, si) = (&self.segments_re[seg], &self.segments_im[seg]);
            for b in 0..bins {
                self.fdl_re[b] += hr[b] * sr[b] - hi[b] * si[b];
                self.fdl_im[b] += hr[b] * si[b] + hi[b] * sr[b];
            }
        }

        self.fft
            .inverse(&self.fdl_re, &self.fdl_im, &mut self.time_scratch);

        for i in 0..self.block_size {
            output[i] = self.time_scratch[i] + self.overlap[i];
        }
        self.overlap
            .copy_from_slice(&self.time_scratch[self.block_size..]);
    }

    pub fn reset(&mut self) {
        for v in self.history_re.iter_mut().chain(self.history_im.iter_mut()) {
            v.iter_mut().for_each(|x| *x = 0.0);
        }
        self.overlap.iter_mut().for_each(|x| *x = 0.0);
        self.history_pos = 0;
    }
}

/// Combines a short head-block convolver (low algorithmic latency) with a
/// long tail-block convolver (amortized cost over a larger block) the way
/// HRIR convolution typically splits a few-hundred-sample head from a
/// multi-thousand-sample tail. `start_background_processing`/
/// `wait_for_background_processing` let callers offload the tail convolver
/// to a worker thread (spec §4.3/§9: the background worker is
/// implementation-defined; here it's a real `std::thread`).
pub struct TwoStageConvolver {
    head: PartitionedConvolver,
    tail: Option<PartitionedConvolver>,
    tail_block_size: usize,
    pending_tail_input: Vec<f32>,
    pending_tail_output: Vec<f32>,
    worker: Option<JoinHandle<PartitionedConvolver>>,
}

impl TwoStageConvolver {
    pub fn new(head_block: usize, tail_block: usize, ir: &[f32]) -> Self {
        let head_len = ir.len().min(head_block);
        let head = PartitionedConvolver::new(head_block, &ir[..head_len]);
        let tail = if ir.len() > head_block {
            Some(PartitionedConvolver::new(tail_block, &ir[head_block..]))
        } else {
            None
        };
        Self {
            head,
            tail,
            tail_block_size: tail_block,
            pending_tail_input: Vec::new(),
            pending_tail_output: vec![0.0; tail_block],
            worker: None,
        }
    }

    /// Processes one `head_block`-sized block through the head convolver
    /// synchronously, and accumulates the (already computed) tail
    /// contribution for samples that line up with this block.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        self.head.process(input, output);
        if !self.pending_tail_output.is_empty() {
            let n = output.len().min(self.pending_tail_output.len());
            for i in 0..n {
                output[i] += self.pending_tail_output[i];
            }
        }
        self.pending_tail_input.extend_from_slice(input);
    }

    /// Kicks off tail-convolver processing of whatever input has
    /// accumulated since the last tail block boundary, on a worker thread.
    /// No-op if the IR has no tail or a worker is already running.
    pub fn start_background_processing(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let Some(mut tail) = self.tail.take() else {
            return;
        };
        if self.pending_tail_input.len() < self.tail_block_size {
            self.tail = Some(tail);
            return;
        }
        let block: Vec<f32> = self
            .pending_tail_input
            .drain(..self.tail_block_size)
            .collect();
        self.worker = Some(std::thread::spawn(move || {
            let mut out = vec![0.0; block.len()];
            tail.process(&block, &mut out);
            tail
        }));
    }

    /// Blocks until the background tail computation started by
    /// `start_background_processing` completes, publishing its result for
    /// the next `process` call to mix in.
    pub fn wait_for_background_processing(&mut self) {
        if let Some(handle) = self.worker.take() {
            let tail = handle.join().expect("tail convolver worker panicked");
            self.tail = Some(tail);
        }
    }

    pub fn reset(&mut self) {
        self.wait_for_background_processing();
        self.head.reset();
        if let Some(tail) = self.tail.as_mut() {
            tail.reset();
        }
        self.pending_tail_input.clear();
        self.pending_tail_output.iter_mut().for_each(|x| *x = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lowpass_biquad_attenuates_high_frequency() {
        let mut f = Biquad::new(BiquadKind::LowPass, 48000.0, 200.0, 0.707);
        let n = 1024;
        let mut hf: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * 18000.0 * i as f32 / 48000.0).sin())
            .collect();
        let input_rms = rms(&hf);
        f.process(&mut hf);
        let output_rms = rms(&hf[512..]);
        assert!(output_rms < input_rms * 0.2);
    }

    #[test]
    fn monopole_lpf_smooths_step() {
        let mut f = MonopoleLpf::new(0.99);
        let mut buf = vec![1.0f32; 256];
        f.process(&mut buf);
        assert!(buf[0] < 0.05);
        assert!(buf[255] > 0.5);
    }

    #[test]
    fn delay_line_reproduces_input_after_delay() {
        let mut d = DelayLine::new(64);
        let block_a = vec![1.0f32; 16];
        d.insert(&block_a);
        let block_b = vec![2.0f32; 16];
        d.insert(&block_b);
        let mut out = vec![0.0f32; 16];
        d.read(16, &mut out);
        for &s in &out {
            assert_relative_eq!(s, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn gain_smoother_ramps_to_target() {
        let mut s = GainSmoother::new(0.0);
        let mut buf = vec![1.0f32; 8];
        s.process(&mut buf, 1.0);
        assert_relative_eq!(buf[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(buf[7], 0.875, epsilon = 1e-6);
        assert_relative_eq!(s.current(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn crossfade_endpoints_favor_each_input() {
        let a = vec![1.0f32; 32];
        let b = vec![0.0f32; 32];
        let mut out = vec![0.0f32; 32];
        Crossfader::crossfade(&mut out, &a, &b);
        assert_relative_eq!(out[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(out[31], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn partitioned_convolver_matches_direct_convolution() {
        let block = 32;
        let ir = vec![1.0f32, 0.5, 0.25];
        let mut conv = PartitionedConvolver::new(block, &ir);
        let input: Vec<f32> = (0..block).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect();
        let mut output = vec![0.0f32; block];
        conv.process(&input, &mut output);
        assert_relative_eq!(output[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(output[1], 0.5, epsilon = 1e-4);
        assert_relative_eq!(output[2], 0.25, epsilon = 1e-4);
        assert_relative_eq!(output[3], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn two_stage_convolver_background_tail_roundtrips() {
        let mut ir = vec![0.0f32; 300];
        ir[0] = 1.0;
        ir[250] = 0.5;
        let mut conv = TwoStageConvolver::new(64, 128, &ir);
        let silence = vec![0.0f32; 64];
        let mut impulse = silence.clone();
        impulse[0] = 1.0;
        let mut out = vec![0.0f32; 64];
        conv.process(&impulse, &mut out);
        assert_relative_eq!(out[0], 1.0, epsilon = 1e-4);
        for _ in 0..4 {
            conv.start_background_processing();
            conv.wait_for_background_processing();
            conv.process(&silence, &mut out);
        }
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
    }
}
