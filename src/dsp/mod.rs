//! DSP — synthesis and effects for live and offline playback.
//!
//! All DSP runs in Rust, so the AudioWorklet in the browser and the offline
//! WAV renderer produce the same samples.

pub mod delay;
pub mod engine;
pub mod envelope;
pub mod oscillator;
pub mod reverb;
pub mod sampler;
pub mod voice;
pub mod wav;
