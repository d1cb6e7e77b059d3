//! The stretch engine and the spectral stages it drives.

pub mod engine;
pub mod formant;
pub mod freq_map;
pub mod params;
pub mod phase_vocoder;

pub use engine::{EngineState, Stretch, MAX_CLEAN_STRETCH, NOISE_FLOOR};
pub use formant::FormantShift;
pub use freq_map::{FrequencyMap, MapPoint};
pub use params::StretchConfig;
pub use phase_vocoder::PhaseVocoder;
