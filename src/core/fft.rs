//! FFT kernel shared by the STFT pipeline.
//!
//! Whole transforms go through cached rustfft plans. Power-of-two sizes can
//! also be computed one stage at a time (bit reversal, then one radix-2 pass
//! per step) so that a transform can be spread across several audio
//! callbacks. Forward transforms are unnormalised; inverse transforms scale by
//! `1/N`.

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft as RustFft, FftPlanner};

use crate::error::StretchError;

/// Zero-valued complex number, used for FFT buffer initialization.
pub const COMPLEX_ZERO: Complex<f32> = Complex::new(0.0, 0.0);

/// Minimum window sum (as a fraction of max) to prevent amplification
/// in low-overlap regions during overlap-add normalization.
pub const WINDOW_SUM_FLOOR_RATIO: f32 = 0.1;

/// Absolute floor for window sum normalization to prevent division by zero.
pub const WINDOW_SUM_EPSILON: f32 = 1e-6;

/// Returns true when `size` is non-zero and has no prime factors other than
/// 2, 3 and 5.
pub fn is_supported_size(size: usize) -> bool {
    if size == 0 {
        return false;
    }
    let mut n = size;
    for factor in [2, 3, 5] {
        while n % factor == 0 {
            n /= factor;
        }
    }
    n == 1
}

/// Complex FFT of a fixed size.
///
/// All working memory is allocated by [`Fft::new`] and [`Fft::resize`];
/// transforms never allocate.
pub struct Fft {
    size: usize,
    forward: Arc<dyn RustFft<f32>>,
    inverse: Arc<dyn RustFft<f32>>,
    scratch: Vec<Complex<f32>>,
    split_buffer: Vec<Complex<f32>>,
    /// `e^{-2πik/N}` for `k < N/2`. Empty unless the size is a power of two.
    twiddles: Vec<Complex<f32>>,
    /// Source index for each output slot of the bit-reversal step.
    bit_reverse: Vec<usize>,
}

impl Fft {
    /// Creates a kernel for `size`-point transforms.
    ///
    /// # Errors
    /// Returns [`StretchError::UnsupportedFftSize`] for zero or for sizes with
    /// prime factors above 5.
    pub fn new(size: usize) -> Result<Self, StretchError> {
        if !is_supported_size(size) {
            return Err(StretchError::UnsupportedFftSize(size));
        }
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let (twiddles, bit_reverse) = if size.is_power_of_two() {
            radix2_tables(size)
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(Self {
            size,
            forward,
            inverse,
            scratch: vec![COMPLEX_ZERO; scratch_len],
            split_buffer: vec![COMPLEX_ZERO; size],
            twiddles,
            bit_reverse,
        })
    }

    /// Changes the transform size. On error the kernel keeps its old size.
    pub fn resize(&mut self, size: usize) -> Result<(), StretchError> {
        if size != self.size {
            *self = Self::new(size)?;
        }
        Ok(())
    }

    /// Returns the transform size.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of steps a stepwise transform is split into.
    pub fn steps(&self) -> usize {
        if self.is_radix2() {
            self.size.trailing_zeros() as usize + 1
        } else {
            1
        }
    }

    #[inline]
    fn is_radix2(&self) -> bool {
        !self.bit_reverse.is_empty()
    }

    /// Forward transform of the first `size()` values of `input`.
    pub fn fft(&mut self, input: &[Complex<f32>], output: &mut [Complex<f32>]) {
        self.check_lengths(input.len(), output.len());
        let n = self.size;
        output[..n].copy_from_slice(&input[..n]);
        self.forward
            .process_with_scratch(&mut output[..n], &mut self.scratch);
    }

    /// Inverse transform, scaled by `1/N`.
    pub fn ifft(&mut self, input: &[Complex<f32>], output: &mut [Complex<f32>]) {
        self.check_lengths(input.len(), output.len());
        let n = self.size;
        output[..n].copy_from_slice(&input[..n]);
        self.inverse
            .process_with_scratch(&mut output[..n], &mut self.scratch);
        let scale = 1.0 / n as f32;
        for v in &mut output[..n] {
            *v *= scale;
        }
    }

    /// Forward transform on separate real and imaginary arrays.
    pub fn fft_split(
        &mut self,
        input_re: &[f32],
        input_im: &[f32],
        output_re: &mut [f32],
        output_im: &mut [f32],
    ) {
        self.split_transform(false, input_re, input_im, output_re, output_im);
    }

    /// Inverse transform on separate real and imaginary arrays, scaled by `1/N`.
    pub fn ifft_split(
        &mut self,
        input_re: &[f32],
        input_im: &[f32],
        output_re: &mut [f32],
        output_im: &mut [f32],
    ) {
        self.split_transform(true, input_re, input_im, output_re, output_im);
    }

    fn split_transform(
        &mut self,
        inverse: bool,
        input_re: &[f32],
        input_im: &[f32],
        output_re: &mut [f32],
        output_im: &mut [f32],
    ) {
        let n = self.size;
        self.check_lengths(input_re.len().min(input_im.len()), output_re.len().min(output_im.len()));
        for (i, slot) in self.split_buffer.iter_mut().enumerate() {
            *slot = Complex::new(input_re[i], input_im[i]);
        }
        let (plan, scale) = if inverse {
            (&self.inverse, 1.0 / n as f32)
        } else {
            (&self.forward, 1.0)
        };
        plan.process_with_scratch(&mut self.split_buffer, &mut self.scratch);
        for (i, v) in self.split_buffer.iter().enumerate() {
            output_re[i] = v.re * scale;
            output_im[i] = v.im * scale;
        }
    }

    /// Runs one step of a forward transform.
    ///
    /// `input` is only read by step 0; every step must be given the same
    /// `output` buffer, which holds the result once all [`Fft::steps`] steps
    /// have run in order.
    pub fn fft_step(&mut self, step: usize, input: &[Complex<f32>], output: &mut [Complex<f32>]) {
        self.run_step(step, false, input, output);
    }

    /// Runs one step of an inverse transform. The final step applies `1/N`.
    pub fn ifft_step(&mut self, step: usize, input: &[Complex<f32>], output: &mut [Complex<f32>]) {
        self.run_step(step, true, input, output);
    }

    fn run_step(
        &mut self,
        step: usize,
        inverse: bool,
        input: &[Complex<f32>],
        output: &mut [Complex<f32>],
    ) {
        debug_assert!(step < self.steps(), "FFT step {step} out of range");
        if !self.is_radix2() {
            if inverse {
                self.ifft(input, output);
            } else {
                self.fft(input, output);
            }
            return;
        }

        let n = self.size;
        if step == 0 {
            self.check_lengths(input.len(), output.len());
            for (slot, &src) in output.iter_mut().zip(self.bit_reverse.iter()) {
                *slot = input[src];
            }
            return;
        }

        let half = 1usize << (step - 1);
        let span = half * 2;
        let stride = n / span;
        for start in (0..n).step_by(span) {
            for j in 0..half {
                let twiddle = self.twiddles[j * stride];
                let twiddle = if inverse { twiddle.conj() } else { twiddle };
                let a = output[start + j];
                let b = output[start + j + half] * twiddle;
                output[start + j] = a + b;
                output[start + j + half] = a - b;
            }
        }

        if inverse && step + 1 == self.steps() {
            let scale = 1.0 / n as f32;
            for v in &mut output[..n] {
                *v *= scale;
            }
        }
    }

    #[inline]
    fn check_lengths(&self, input: usize, output: usize) {
        assert!(
            input >= self.size && output >= self.size,
            "FFT buffers shorter than transform size {} (input {input}, output {output})",
            self.size
        );
    }
}

fn radix2_tables(size: usize) -> (Vec<Complex<f32>>, Vec<usize>) {
    let twiddles = (0..size / 2)
        .map(|k| {
            let angle = -2.0 * PI * k as f64 / size as f64;
            Complex::new(angle.cos() as f32, angle.sin() as f32)
        })
        .collect();

    let bits = size.trailing_zeros();
    let bit_reverse = (0..size)
        .map(|i| {
            if bits == 0 {
                0
            } else {
                i.reverse_bits() >> (usize::BITS - bits)
            }
        })
        .collect();

    (twiddles, bit_reverse)
}
