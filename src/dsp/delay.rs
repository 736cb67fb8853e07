//! Stereo feedback delay.

/// Longest delay time the buffers can hold.
pub const MAX_DELAY_SECONDS: f64 = 1.5;
const MAX_FEEDBACK: f64 = 0.99;

#[derive(Debug, Clone)]
pub struct Delay {
    left: Vec<f32>,
    right: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
    time: f64,
    feedback: f64,
    /// Wet level; the dry signal always passes at unity.
    wet: f64,
}

impl Delay {
    pub fn new(sample_rate: f64) -> Self {
        let len = ((sample_rate * MAX_DELAY_SECONDS) as usize + 1).max(2);
        Delay {
            left: vec![0.0; len],
            right: vec![0.0; len],
            write_pos: 0,
            sample_rate,
            time: 0.25,
            feedback: 0.3,
            wet: 0.2,
        }
    }

    pub fn set_time(&mut self, seconds: f64) {
        self.time = finite_or_zero(seconds).clamp(0.0, MAX_DELAY_SECONDS);
    }

    pub fn set_feedback(&mut self, feedback: f64) {
        self.feedback = finite_or_zero(feedback).clamp(0.0, MAX_FEEDBACK);
    }

    pub fn set_wet(&mut self, wet: f64) {
        self.wet = finite_or_zero(wet).clamp(0.0, 1.0);
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn feedback(&self) -> f64 {
        self.feedback
    }

    fn delay_samples(&self) -> usize {
        ((self.time * self.sample_rate) as usize).clamp(1, self.left.len() - 1)
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let len = self.left.len();
        let read_pos = (self.write_pos + len - self.delay_samples()) % len;
        let echo_l = self.left[read_pos];
        let echo_r = self.right[read_pos];

        let fb = self.feedback as f32;
        self.left[self.write_pos] = left + echo_l * fb;
        self.right[self.write_pos] = right + echo_r * fb;
        self.write_pos = (self.write_pos + 1) % len;

        let wet = self.wet as f32;
        (left + echo_l * wet, right + echo_r * wet)
    }

    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
        self.write_pos = 0;
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_arrives_after_delay_time() {
        let mut delay = Delay::new(1000.0);
        delay.set_time(0.01);
        delay.set_feedback(0.0);
        delay.set_wet(1.0);

        let (first, _) = delay.process(1.0, 1.0);
        assert_eq!(first, 1.0);
        for _ in 1..10 {
            let (l, _) = delay.process(0.0, 0.0);
            assert_eq!(l, 0.0);
        }
        let (l, r) = delay.process(0.0, 0.0);
        assert!((l - 1.0).abs() < 1e-6 && (r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn feedback_repeats_with_decay() {
        let mut delay = Delay::new(1000.0);
        delay.set_time(0.01);
        delay.set_feedback(0.5);
        delay.set_wet(1.0);
        delay.process(1.0, 1.0);
        let outs: Vec<f32> = (0..20).map(|_| delay.process(0.0, 0.0).0).collect();
        assert!((outs[9] - 1.0).abs() < 1e-6, "{outs:?}");
        assert!((outs[19] - 0.5).abs() < 1e-6, "{outs:?}");
    }

    #[test]
    fn zero_sample_rate_still_processes() {
        let mut delay = Delay::new(0.0);
        delay.set_time(0.5);
        delay.set_wet(1.0);
        let (l, r) = delay.process(0.25, 0.25);
        assert!(l.is_finite() && r.is_finite());
        delay.process(0.0, 0.0);
    }

    #[test]
    fn parameters_are_clamped() {
        let mut delay = Delay::new(44100.0);
        delay.set_time(5.0);
        assert_eq!(delay.time(), MAX_DELAY_SECONDS);
        delay.set_feedback(1.2);
        assert_eq!(delay.feedback(), 0.99);
        delay.set_feedback(f64::NAN);
        assert_eq!(delay.feedback(), 0.0);
    }
}
