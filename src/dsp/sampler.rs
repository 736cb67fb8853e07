//! Single-zone sample playback.
//!
//! A sampled instrument is one mono buffer recorded at a known root note.
//! Other pitches are produced by resampling with linear interpolation.

use std::sync::Arc;

use super::envelope::{Envelope, EnvelopeShape};

/// Click-free attack with full sustain and a short tail.
pub const SAMPLER_ENVELOPE: EnvelopeShape = EnvelopeShape::new(0.005, 0.1, 1.0, 0.1);

#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Mono samples in [-1, 1].
    pub data: Vec<f64>,
    /// Native sample rate of the recording.
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(data: Vec<f64>, sample_rate: u32) -> Self {
        SampleBuffer { data, sample_rate }
    }

    /// Create from 16-bit signed PCM.
    pub fn from_i16(pcm: &[i16], sample_rate: u32) -> Self {
        SampleBuffer::new(pcm.iter().map(|&s| s as f64 / 32768.0).collect(), sample_rate)
    }

    /// Mix interleaved frames down to mono.
    pub fn from_interleaved(samples: &[f64], channels: u16, sample_rate: u32) -> Self {
        let channels = usize::from(channels.max(1));
        let data = samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f64>() / frame.len() as f64)
            .collect();
        SampleBuffer::new(data, sample_rate)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read at a fractional position. Out-of-range reads are silent.
    pub fn read_interpolated(&self, position: f64) -> f64 {
        if position < 0.0 {
            return 0.0;
        }
        let idx = position as usize;
        match (self.data.get(idx), self.data.get(idx + 1)) {
            (Some(&a), Some(&b)) => {
                let frac = position - idx as f64;
                a + (b - a) * frac
            }
            (Some(&a), None) => a,
            _ => 0.0,
        }
    }
}

/// A loaded instrument: shared buffer plus the MIDI note it was recorded at.
#[derive(Debug, Clone)]
pub struct SampledInstrument {
    buffer: Arc<SampleBuffer>,
    pub root_note: u8,
}

impl SampledInstrument {
    pub fn new(buffer: SampleBuffer, root_note: u8) -> Self {
        SampledInstrument {
            buffer: Arc::new(buffer),
            root_note,
        }
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    /// Resampling step for `midi_note` at the engine's output rate.
    pub fn playback_step(&self, midi_note: i32, engine_sample_rate: f64) -> f64 {
        let semitones = (midi_note - i32::from(self.root_note)) as f64;
        let pitch_ratio = 2.0_f64.powf(semitones / 12.0);
        pitch_ratio * self.buffer.sample_rate as f64 / engine_sample_rate
    }

    pub fn voice(&self, midi_note: i32, velocity: f64, engine_sample_rate: f64) -> SamplerVoice {
        let mut envelope = Envelope::new(SAMPLER_ENVELOPE, engine_sample_rate);
        envelope.gate_on();
        SamplerVoice {
            buffer: Arc::clone(&self.buffer),
            position: 0.0,
            step: self.playback_step(midi_note, engine_sample_rate),
            velocity: velocity.clamp(0.0, 1.0),
            envelope,
            finished: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplerVoice {
    buffer: Arc<SampleBuffer>,
    position: f64,
    step: f64,
    velocity: f64,
    envelope: Envelope,
    finished: bool,
}

impl SamplerVoice {
    pub fn next_sample(&mut self) -> f64 {
        if self.finished {
            return 0.0;
        }
        let sample = self.buffer.read_interpolated(self.position);
        self.position += self.step;
        if self.position >= self.buffer.len() as f64 {
            self.finished = true;
            return 0.0;
        }

        let env = self.envelope.next_sample();
        if self.envelope.is_finished() {
            self.finished = true;
        }
        sample * env * self.velocity
    }

    pub fn note_off(&mut self) {
        self.envelope.gate_off();
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
