//! Freeverb-style stereo reverb.
//!
//! Eight parallel damped combs feed four series allpasses per channel. The
//! host speaks in decay seconds; that is mapped onto comb feedback.

#[derive(Debug, Clone)]
struct Comb {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damp: f32,
    store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Comb {
            buffer: vec![0.0; len.max(1)],
            index: 0,
            feedback: 0.84,
            damp: 0.2,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let out = self.buffer[self.index];
        self.store = out * (1.0 - self.damp) + self.store * self.damp;
        self.buffer[self.index] = input + self.store * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        out
    }
}

#[derive(Debug, Clone)]
struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Allpass {
            buffer: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let held = self.buffer[self.index];
        self.buffer[self.index] = input + held * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        held - input
    }
}

#[derive(Debug, Clone)]
struct Channel {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl Channel {
    fn new(scale: f64, spread: usize) -> Self {
        let len = |t: usize| (t as f64 * scale) as usize + spread;
        Channel {
            combs: COMB_TUNING.iter().map(|&t| Comb::new(len(t))).collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&t| Allpass::new(len(t))).collect(),
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let summed: f32 = self.combs.iter_mut().map(|c| c.process(input)).sum();
        self.allpasses.iter_mut().fold(summed, |acc, ap| ap.process(acc))
    }

    fn set(&mut self, feedback: f32, damp: f32) {
        for comb in &mut self.combs {
            comb.feedback = feedback;
            comb.damp = damp;
        }
    }

    fn clear(&mut self) {
        for comb in &mut self.combs {
            comb.buffer.fill(0.0);
            comb.store = 0.0;
        }
        for ap in &mut self.allpasses {
            ap.buffer.fill(0.0);
        }
    }
}

// Delay lengths in samples at 44.1 kHz.
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const INPUT_GAIN: f32 = 0.015;
/// Decay time that maps to the largest room.
const MAX_DECAY_SECONDS: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct Reverb {
    left: Channel,
    right: Channel,
    /// Room size in [0, 1].
    room_size: f64,
    damping: f64,
    /// Wet level in [0, 1]; the dry signal always passes at unity.
    wet: f64,
}

impl Reverb {
    pub fn new(sample_rate: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let mut reverb = Reverb {
            left: Channel::new(scale, 0),
            right: Channel::new(scale, STEREO_SPREAD),
            room_size: 0.5,
            damping: 0.5,
            wet: 0.3,
        };
        reverb.apply();
        reverb
    }

    /// Map a decay time in seconds onto room size.
    pub fn set_decay_seconds(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds } else { 0.0 };
        self.room_size = (seconds / MAX_DECAY_SECONDS).clamp(0.0, 1.0);
        self.apply();
    }

    pub fn set_wet(&mut self, wet: f64) {
        self.wet = if wet.is_finite() { wet.clamp(0.0, 1.0) } else { 0.0 };
    }

    pub fn room_size(&self) -> f64 {
        self.room_size
    }

    pub fn wet(&self) -> f64 {
        self.wet
    }

    fn apply(&mut self) {
        let feedback = (self.room_size * 0.28 + 0.7) as f32;
        let damp = self.damping as f32;
        self.left.set(feedback, damp);
        self.right.set(feedback, damp);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = (left + right) * INPUT_GAIN;
        let wet = self.wet as f32;
        (
            left + self.left.process(input) * wet,
            right + self.right.process(input) * wet,
        )
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}
