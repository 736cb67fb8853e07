//! Band-limited oscillators (PolyBLEP) for the built-in synth voices.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    #[default]
    Triangle,
    Square,
    Sawtooth,
}

impl Waveform {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sine" => Some(Waveform::Sine),
            "triangle" => Some(Waveform::Triangle),
            "square" => Some(Waveform::Square),
            "sawtooth" | "saw" => Some(Waveform::Sawtooth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Oscillator {
    pub waveform: Waveform,
    frequency: f64,
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, sample_rate: f64) -> Self {
        Oscillator {
            waveform,
            frequency: 440.0,
            phase: 0.0,
            sample_rate,
        }
    }

    /// Retune and restart the cycle.
    pub fn start(&mut self, frequency: f64) {
        self.frequency = frequency;
        self.phase = 0.0;
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    fn increment(&self) -> f64 {
        self.frequency / self.sample_rate
    }

    pub fn next_sample(&mut self) -> f64 {
        let dt = self.increment();
        let t = self.phase;
        let out = match self.waveform {
            Waveform::Sine => (TAU * t).sin(),
            Waveform::Sawtooth => (2.0 * t - 1.0) - poly_blep(t, dt),
            Waveform::Square => {
                let naive = if t < 0.5 { 1.0 } else { -1.0 };
                naive + poly_blep(t, dt) - poly_blep((t + 0.5) % 1.0, dt)
            }
            // Triangle has no step discontinuity; the naive shape is fine.
            Waveform::Triangle => 1.0 - 4.0 * (t - 0.5).abs(),
        };

        self.phase = (self.phase + dt).fract();
        out
    }
}

/// Polynomial band-limited step correction around a wrap at phase 0.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        0.0
    } else if t < dt {
        let x = t / dt;
        2.0 * x - x * x - 1.0
    } else if t > 1.0 - dt {
        let x = (t - 1.0) / dt;
        x * x + 2.0 * x + 1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(waveform: Waveform) -> f64 {
        let mut osc = Oscillator::new(waveform, 44100.0);
        osc.start(440.0);
        (0..44100).map(|_| osc.next_sample().abs()).fold(0.0, f64::max)
    }

    #[test]
    fn sine_starts_at_zero() {
        let mut osc = Oscillator::new(Waveform::Sine, 44100.0);
        osc.start(440.0);
        assert!(osc.next_sample().abs() < 1e-12);
    }

    #[test]
    fn outputs_stay_bounded() {
        assert!(peak(Waveform::Sine) <= 1.0);
        assert!(peak(Waveform::Triangle) <= 1.0);
        assert!(peak(Waveform::Square) <= 1.5);
        assert!(peak(Waveform::Sawtooth) <= 1.5);
    }

    #[test]
    fn triangle_starts_at_minus_one() {
        let mut osc = Oscillator::new(Waveform::Triangle, 44100.0);
        osc.start(100.0);
        assert!((osc.next_sample() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn parse_names() {
        assert_eq!(Waveform::parse("saw"), Some(Waveform::Sawtooth));
        assert_eq!(Waveform::parse("sine"), Some(Waveform::Sine));
        assert_eq!(Waveform::parse("noise"), None);
    }
}
