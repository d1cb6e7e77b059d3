//! Streaming wrapper around the engine.

mod processor;

pub use processor::StreamProcessor;
