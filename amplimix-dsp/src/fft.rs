//! Real-to-split-complex forward/inverse FFT.
//!
//! Wraps [`realfft`] (itself built on [`rustfft`]) and unzips its
//! interleaved `Complex<f32>` output into separate real/imaginary slices.
//! Split-complex layout is what the partitioned convolver wants: it lets
//! the complex multiply-accumulate over IR segments run as two independent
//! real-valued SIMD loops instead of one interleaved one.
//!
//! All scratch buffers are allocated in [`RealFft::new`]; `forward`/
//! `inverse` never allocate.

use realfft::num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// A forward/inverse real FFT pair of a fixed size `n`.
///
/// `forward` transforms `n` real samples into `n/2 + 1` complex bins,
/// written as separate `re`/`im` slices. `inverse` is the matching
/// synthesis transform, normalized so that `inverse(forward(x)) == x`
/// (realfft's inverse is unnormalized by convention; this wrapper divides
/// by `n` so callers never have to remember to).
pub struct RealFft {
    n: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    fwd_input: Vec<f32>,
    fwd_output: Vec<Complex32>,
    fwd_scratch: Vec<Complex32>,
    inv_input: Vec<Complex32>,
    inv_output: Vec<f32>,
    inv_scratch: Vec<Complex32>,
}

impl RealFft {
    /// Builds forward/inverse plans and scratch for real FFTs of size `n`.
    /// `n` should be even (as it always is for power-of-two segment sizes).
    pub fn new(n: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);

        let fwd_input = forward.make_input_vec();
        let fwd_output = forward.make_output_vec();
        let fwd_scratch = forward.make_scratch_vec();

        let inv_input = inverse.make_input_vec();
        let inv_output = inverse.make_output_vec();
        let inv_scratch = inverse.make_scratch_vec();

        Self {
            n,
            forward,
            inverse,
            fwd_input,
            fwd_output,
            fwd_scratch,
            inv_input,
            inv_output,
            inv_scratch,
        }
    }

    /// Number of real samples this FFT operates on.
    pub fn size(&self) -> usize {
        self.n
    }

    /// Number of complex bins produced by `forward` (`n/2 + 1`).
    pub fn bin_count(&self) -> usize {
        self.n / 2 + 1
    }

    /// Forward real FFT. `input` must have exactly `size()` samples.
    /// `re_out`/`im_out` must each have exactly `bin_count()` samples.
    pub fn forward(&mut self, input: &[f32], re_out: &mut [f32], im_out: &mut [f32]) {
        debug_assert_eq!(input.len(), self.n);
        debug_assert_eq!(re_out.len(), self.bin_count());
        debug_assert_eq!(im_out.len(), self.bin_count());

        self.fwd_input.copy_from_slice(input);
        self.forward
            .process_with_scratch(&mut self.fwd_input, &mut self.fwd_output, &mut self.fwd_scratch)
            .expect("realfft forward process: shape mismatch");

        for (i, c) in self.fwd_output.iter().enumerate() {
            re_out[i] = c.re;
            im_out[i] = c.im;
        }
    }

    /// Inverse real FFT, normalized by `1/n`. `re_in`/`im_in` must each have
    /// exactly `bin_count()` samples; `out` must have exactly `size()`.
    pub fn inverse(&mut self, re_in: &[f32], im_in: &[f32], out: &mut [f32]) {
        debug_assert_eq!(re_in.len(), self.bin_count());
        debug_assert_eq!(im_in.len(), self.bin_count());
        debug_assert_eq!(out.len(), self.n);

        for (i, c) in self.inv_input.iter_mut().enumerate() {
            c.re = re_in[i];
            c.im = im_in[i];
        }

        self.inverse
            .process_with_scratch(&mut self.inv_input, &mut self.inv_output, &mut self.inv_scratch)
            .expect("realfft inverse process: shape mismatch");

        let norm = 1.0 / self.n as f32;
        for (o, v) in out.iter_mut().zip(self.inv_output.iter()) {
            *o = v * norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn round_trip_restores_signal() {
        let n = 64;
        let mut fft = RealFft::new(n);
        let input: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 3.0 * i as f32 / n as f32).sin())
            .collect();

        let bins = fft.bin_count();
        let mut re = vec![0.0f32; bins];
        let mut im = vec![0.0f32; bins];
        fft.forward(&input, &mut re, &mut im);

        let mut output = vec![0.0f32; n];
        fft.inverse(&re, &im, &mut output);

        for (a, b) in input.iter().zip(output.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn dc_signal_has_energy_only_in_bin_zero() {
        let n = 32;
        let mut fft = RealFft::new(n);
        let input = vec![1.0f32; n];
        let bins = fft.bin_count();
        let mut re = vec![0.0f32; bins];
        let mut im = vec![0.0f32; bins];
        fft.forward(&input, &mut re, &mut im);

        assert_relative_eq!(re[0], n as f32, epsilon = 1e-3);
        for i in 1..bins {
            assert!(re[i].abs() < 1e-3, "bin {i} re={}", re[i]);
            assert!(im[i].abs() < 1e-3, "bin {i} im={}", im[i]);
        }
    }
}
