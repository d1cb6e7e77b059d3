//! Core types, FFT kernel, window functions and sample rings.

pub mod fft;
pub mod ring_buffer;
pub mod types;
pub mod window;

pub use types::*;
pub use window::{generate_window, synthesis_window, WindowShape};
