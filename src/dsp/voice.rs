//! Voice — one sounding note of the built-in synth.

use serde::{Deserialize, Serialize};

use super::envelope::{Envelope, EnvelopeShape};
use super::oscillator::{Oscillator, Waveform};

/// Waveform plus envelope: everything needed to start a synth note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoicePreset {
    pub waveform: Waveform,
    pub envelope: EnvelopeShape,
}

impl VoicePreset {
    pub const fn new(waveform: Waveform, envelope: EnvelopeShape) -> Self {
        VoicePreset { waveform, envelope }
    }
}

#[derive(Debug, Clone)]
pub struct SynthVoice {
    oscillator: Oscillator,
    envelope: Envelope,
    /// Velocity gain [0, 1].
    velocity: f64,
    finished: bool,
}

impl SynthVoice {
    /// Start a note immediately.
    pub fn start(preset: &VoicePreset, frequency: f64, velocity: f64, sample_rate: f64) -> Self {
        let mut oscillator = Oscillator::new(preset.waveform, sample_rate);
        oscillator.start(frequency);
        let mut envelope = Envelope::new(preset.envelope, sample_rate);
        envelope.gate_on();
        SynthVoice {
            oscillator,
            envelope,
            velocity: velocity.clamp(0.0, 1.0),
            finished: false,
        }
    }

    pub fn note_off(&mut self) {
        self.envelope.gate_off();
    }

    pub fn next_sample(&mut self) -> f64 {
        if self.finished {
            return 0.0;
        }
        let osc = self.oscillator.next_sample();
        let env = self.envelope.next_sample();
        if self.envelope.is_finished() {
            self.finished = true;
        }
        osc * env * self.velocity
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn frequency(&self) -> f64 {
        self.oscillator.frequency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRESET: VoicePreset =
        VoicePreset::new(Waveform::Sine, EnvelopeShape::new(0.005, 0.1, 0.3, 0.05));

    #[test]
    fn produces_sound() {
        let mut voice = SynthVoice::start(&PRESET, 440.0, 1.0, 44100.0);
        let peak = (0..2205).map(|_| voice.next_sample().abs()).fold(0.0, f64::max);
        assert!(peak > 0.1, "voice should be audible, peak={peak}");
    }

    #[test]
    fn silent_after_release() {
        let mut voice = SynthVoice::start(&PRESET, 440.0, 1.0, 44100.0);
        for _ in 0..1000 {
            voice.next_sample();
        }
        voice.note_off();
        for _ in 0..44100 {
            voice.next_sample();
            if voice.is_finished() {
                break;
            }
        }
        assert!(voice.is_finished());
        assert_eq!(voice.next_sample(), 0.0);
    }

    #[test]
    fn velocity_scales_output() {
        let mut loud = SynthVoice::start(&PRESET, 220.0, 1.0, 44100.0);
        let mut quiet = SynthVoice::start(&PRESET, 220.0, 0.25, 44100.0);
        let l = (0..4410).map(|_| loud.next_sample().abs()).fold(0.0, f64::max);
        let q = (0..4410).map(|_| quiet.next_sample().abs()).fold(0.0, f64::max);
        assert!((q / l - 0.25).abs() < 0.01, "ratio {}", q / l);
    }
}
