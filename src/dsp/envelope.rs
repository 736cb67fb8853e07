//! Linear ADSR envelopes.

use serde::{Deserialize, Serialize};

/// Attack/decay/release in seconds, sustain as a level in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeShape {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl EnvelopeShape {
    pub const fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        EnvelopeShape {
            attack,
            decay,
            sustain,
            release,
        }
    }
}

impl Default for EnvelopeShape {
    fn default() -> Self {
        EnvelopeShape::new(0.01, 0.1, 0.7, 0.3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Per-voice envelope state. The shape is copied at construction, so later
/// changes to an instrument's envelope never reach notes already sounding.
#[derive(Debug, Clone)]
pub struct Envelope {
    shape: EnvelopeShape,
    sample_rate: f64,
    stage: Stage,
    level: f64,
    /// Per-sample change for the current stage.
    step: f64,
}

impl Envelope {
    pub fn new(shape: EnvelopeShape, sample_rate: f64) -> Self {
        Envelope {
            shape,
            sample_rate,
            stage: Stage::Idle,
            level: 0.0,
            step: 0.0,
        }
    }

    pub fn shape(&self) -> EnvelopeShape {
        self.shape
    }

    fn samples(&self, seconds: f64) -> f64 {
        (seconds.max(0.0) * self.sample_rate).max(1.0)
    }

    pub fn gate_on(&mut self) {
        self.stage = Stage::Attack;
        self.step = (1.0 - self.level) / self.samples(self.shape.attack);
    }

    pub fn gate_off(&mut self) {
        if self.stage == Stage::Idle {
            return;
        }
        self.stage = Stage::Release;
        self.step = self.level / self.samples(self.shape.release);
    }

    pub fn next_sample(&mut self) -> f64 {
        let sustain = self.shape.sustain.clamp(0.0, 1.0);
        match self.stage {
            Stage::Idle => self.level = 0.0,
            Stage::Attack => {
                self.level += self.step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                    self.step = (1.0 - sustain) / self.samples(self.shape.decay);
                }
            }
            Stage::Decay => {
                self.level -= self.step;
                if self.level <= sustain {
                    self.level = sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => self.level = sustain,
            Stage::Release => {
                self.level -= self.step;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }
        self.level
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Idle
    }

    pub fn is_releasing(&self) -> bool {
        self.stage == Stage::Release
    }
}
