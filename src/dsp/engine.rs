//! Live audio engine.
//!
//! Voices are grouped on three buses. The melody bus is monophonic: a new
//! melodic note releases the previous one. Chord and keyboard buses are
//! polyphonic. Output is pulled in blocks; every voice is summed, scaled by
//! the master volume, passed through delay then reverb and soft-clipped.

use serde::{Deserialize, Serialize};

use super::delay::Delay;
use super::reverb::Reverb;
use super::sampler::{SampledInstrument, SamplerVoice};
use super::voice::{SynthVoice, VoicePreset};

/// Hard cap on simultaneous voices; the oldest is stolen past this.
pub const MAX_VOICES: usize = 64;
pub const DEFAULT_VOLUME: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    Melody,
    Chord,
    Keyboard,
}

/// What a trigger should sound like.
#[derive(Debug, Clone)]
pub enum VoiceSource {
    Synth(VoicePreset),
    Sampled(SampledInstrument),
}

#[derive(Debug, Clone)]
enum VoiceKind {
    Synth(SynthVoice),
    Sampler(SamplerVoice),
}

impl VoiceKind {
    fn next_sample(&mut self) -> f64 {
        match self {
            VoiceKind::Synth(v) => v.next_sample(),
            VoiceKind::Sampler(v) => v.next_sample(),
        }
    }

    fn note_off(&mut self) {
        match self {
            VoiceKind::Synth(v) => v.note_off(),
            VoiceKind::Sampler(v) => v.note_off(),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            VoiceKind::Synth(v) => v.is_finished(),
            VoiceKind::Sampler(v) => v.is_finished(),
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveVoice {
    bus: Bus,
    midi: i32,
    kind: VoiceKind,
    /// Engine sample at which the gate closes, for timed notes.
    release_at: Option<u64>,
    released: bool,
}

impl ActiveVoice {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.kind.note_off();
        }
    }
}

/// Parse a note name (e.g. "C4", "F#3", "Bb5") into a MIDI note number.
pub fn note_to_midi(note: &str) -> Option<i32> {
    let mut chars = note.trim().chars();
    let semitone = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (shift, octave) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave.parse().ok()?;
    if !(-1..=9).contains(&octave) {
        return None;
    }

    let midi = (octave + 1) * 12 + semitone + shift;
    (0..=127).contains(&midi).then_some(midi)
}

/// `tuning_pitch` is the frequency of A4 (MIDI 69).
pub fn midi_to_frequency(midi: i32, tuning_pitch: f64) -> f64 {
    tuning_pitch * 2.0_f64.powf((midi as f64 - 69.0) / 12.0)
}

pub fn note_to_frequency_with_tuning(note: &str, tuning_pitch: f64) -> Option<f64> {
    note_to_midi(note).map(|m| midi_to_frequency(m, tuning_pitch))
}

pub struct AudioEngine {
    sample_rate: f64,
    tuning_pitch: f64,
    voices: Vec<ActiveVoice>,
    /// Samples rendered since creation.
    clock: u64,
    volume: f64,
    delay: Delay,
    reverb: Reverb,
}

impl AudioEngine {
    pub fn new(sample_rate: f64, tuning_pitch: f64) -> Self {
        AudioEngine {
            sample_rate,
            tuning_pitch,
            voices: Vec::new(),
            clock: 0,
            volume: DEFAULT_VOLUME,
            delay: Delay::new(sample_rate),
            reverb: Reverb::new(sample_rate),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
    }

    pub fn delay_mut(&mut self) -> &mut Delay {
        &mut self.delay
    }

    pub fn reverb_mut(&mut self) -> &mut Reverb {
        &mut self.reverb
    }

    /// Start a note. With `hold_seconds` the gate closes by itself.
    ///
    /// Returns the MIDI note, or `None` if the pitch does not parse.
    pub fn trigger(
        &mut self,
        bus: Bus,
        source: &VoiceSource,
        note: &str,
        velocity: f64,
        hold_seconds: Option<f64>,
    ) -> Option<i32> {
        let midi = note_to_midi(note)?;

        if bus == Bus::Melody {
            self.release_bus(Bus::Melody);
        }
        if self.voices.len() >= MAX_VOICES {
            self.voices.remove(0);
        }

        let kind = match source {
            VoiceSource::Synth(preset) => VoiceKind::Synth(SynthVoice::start(
                preset,
                midi_to_frequency(midi, self.tuning_pitch),
                velocity,
                self.sample_rate,
            )),
            VoiceSource::Sampled(inst) => {
                VoiceKind::Sampler(inst.voice(midi, velocity, self.sample_rate))
            }
        };
        let release_at = hold_seconds.map(|s| {
            let s = if s.is_finite() { s.max(0.0) } else { 0.0 };
            self.clock + (s * self.sample_rate) as u64
        });

        self.voices.push(ActiveVoice {
            bus,
            midi,
            kind,
            release_at,
            released: false,
        });
        Some(midi)
    }

    /// Close the gate of every voice on `bus` playing `midi`.
    pub fn release_note(&mut self, bus: Bus, midi: i32) {
        for v in self.voices.iter_mut().filter(|v| v.bus == bus && v.midi == midi) {
            v.release();
        }
    }

    pub fn release_bus(&mut self, bus: Bus) {
        for v in self.voices.iter_mut().filter(|v| v.bus == bus) {
            v.release();
        }
    }

    pub fn release_all(&mut self) {
        for v in &mut self.voices {
            v.release();
        }
    }

    /// Voices still producing sound, including ones in release.
    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn sounding_on(&self, bus: Bus) -> usize {
        self.voices.iter().filter(|v| v.bus == bus && !v.released).count()
    }

    /// Render the next block. Both slices are overwritten; the shorter one
    /// sets the block length.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        for i in 0..frames {
            let now = self.clock;
            let mut sum = 0.0;
            for v in &mut self.voices {
                if v.release_at.is_some_and(|at| now >= at) {
                    v.release();
                }
                sum += v.kind.next_sample();
            }

            let dry = (sum * self.volume) as f32;
            let (l, r) = self.delay.process(dry, dry);
            let (l, r) = self.reverb.process(l, r);
            left[i] = l.tanh();
            right[i] = r.tanh();
            self.clock += 1;
        }
        self.voices.retain(|v| !v.kind.is_finished());
    }

    /// Drop every voice and effect tail.
    pub fn silence(&mut self) {
        self.voices.clear();
        self.delay.clear();
        self.reverb.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::envelope::EnvelopeShape;
    use crate::dsp::oscillator::Waveform;
    use crate::dsp::sampler::SampleBuffer;

    const SINE: VoiceSource = VoiceSource::Synth(VoicePreset::new(
        Waveform::Sine,
        EnvelopeShape::new(0.005, 0.05, 0.5, 0.05),
    ));

    fn render(engine: &mut AudioEngine, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut l = vec![0.0; frames];
        let mut r = vec![0.0; frames];
        engine.render(&mut l, &mut r);
        (l, r)
    }

    fn quiet_engine() -> AudioEngine {
        let mut engine = AudioEngine::new(44100.0, 440.0);
        engine.delay_mut().set_wet(0.0);
        engine.reverb_mut().set_wet(0.0);
        engine
    }

    #[test]
    fn note_names() {
        assert_eq!(note_to_midi("C4"), Some(60));
        assert_eq!(note_to_midi("A4"), Some(69));
        assert_eq!(note_to_midi("F#3"), Some(54));
        assert_eq!(note_to_midi("Bb5"), Some(82));
        assert_eq!(note_to_midi("c4"), Some(60));
        assert_eq!(note_to_midi("C-1"), Some(0));
        assert_eq!(note_to_midi("H4"), None);
        assert_eq!(note_to_midi("C"), None);
        assert_eq!(note_to_midi(""), None);
        assert_eq!(note_to_midi("C12"), None);
        assert_eq!(note_to_midi("C999999999"), None);
        assert_eq!(note_to_midi("B#-999999999"), None);
    }

    #[test]
    fn frequencies() {
        assert!((midi_to_frequency(69, 440.0) - 440.0).abs() < 1e-9);
        assert!((note_to_frequency_with_tuning("C4", 440.0).unwrap() - 261.6256).abs() < 1e-3);
        assert!((note_to_frequency_with_tuning("A4", 432.0).unwrap() - 432.0).abs() < 1e-9);
        assert!((midi_to_frequency(81, 440.0) - 880.0).abs() < 1e-9);
    }

    #[test]
    fn silent_when_idle() {
        let mut engine = AudioEngine::new(44100.0, 440.0);
        let (l, r) = render(&mut engine, 256);
        assert!(l.iter().chain(&r).all(|s| *s == 0.0));
        assert_eq!(engine.clock(), 256);
    }

    #[test]
    fn trigger_produces_bounded_sound() {
        let mut engine = AudioEngine::new(44100.0, 440.0);
        engine.trigger(Bus::Keyboard, &SINE, "A4", 1.0, None).unwrap();
        let (l, _) = render(&mut engine, 4410);
        let peak = l.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.05, "peak={peak}");
        assert!(peak < 1.0);
    }

    #[test]
    fn unparseable_pitch_is_rejected() {
        let mut engine = AudioEngine::new(44100.0, 440.0);
        assert_eq!(engine.trigger(Bus::Chord, &SINE, "X9", 1.0, None), None);
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn melody_bus_is_monophonic() {
        let mut engine = quiet_engine();
        engine.trigger(Bus::Melody, &SINE, "C4", 0.8, None);
        engine.trigger(Bus::Melody, &SINE, "E4", 0.8, None);
        assert_eq!(engine.sounding_on(Bus::Melody), 1);

        engine.trigger(Bus::Chord, &SINE, "C3", 0.5, None);
        engine.trigger(Bus::Chord, &SINE, "E3", 0.5, None);
        assert_eq!(engine.sounding_on(Bus::Chord), 2);
    }

    #[test]
    fn timed_notes_release_themselves() {
        let mut engine = quiet_engine();
        engine.trigger(Bus::Melody, &SINE, "G4", 1.0, Some(0.01));
        render(&mut engine, 441 + 2205 + 100);
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn release_note_only_touches_matching_bus() {
        let mut engine = quiet_engine();
        let midi = engine.trigger(Bus::Keyboard, &SINE, "C4", 1.0, None).unwrap();
        engine.trigger(Bus::Chord, &SINE, "C4", 1.0, None);
        engine.release_note(Bus::Keyboard, midi);
        assert_eq!(engine.sounding_on(Bus::Keyboard), 0);
        assert_eq!(engine.sounding_on(Bus::Chord), 1);
        engine.release_all();
        assert_eq!(engine.sounding_on(Bus::Chord), 0);
    }

    #[test]
    fn volume_is_clamped_and_zero_mutes() {
        let mut engine = quiet_engine();
        engine.set_volume(3.0);
        assert_eq!(engine.volume(), 1.0);
        engine.set_volume(0.0);
        engine.trigger(Bus::Keyboard, &SINE, "A4", 1.0, None);
        let (l, _) = render(&mut engine, 1000);
        assert!(l.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn voices_are_capped() {
        let mut engine = quiet_engine();
        for i in 0..(MAX_VOICES + 10) {
            engine.trigger(Bus::Keyboard, &SINE, if i % 2 == 0 { "C4" } else { "D4" }, 0.1, None);
        }
        assert_eq!(engine.active_voice_count(), MAX_VOICES);
    }

    #[test]
    fn sampled_source_plays() {
        let mut engine = quiet_engine();
        let buf = SampleBuffer::new(vec![0.5; 44100], 44100);
        let source = VoiceSource::Sampled(SampledInstrument::new(buf, 60));
        engine.trigger(Bus::Keyboard, &source, "C4", 1.0, None);
        let (l, _) = render(&mut engine, 1000);
        assert!(l[999] > 0.1, "{}", l[999]);
    }

    #[test]
    fn effects_add_a_tail() {
        let mut engine = AudioEngine::new(44100.0, 440.0);
        engine.delay_mut().set_wet(0.8);
        engine.delay_mut().set_time(0.05);
        engine.trigger(Bus::Keyboard, &SINE, "A4", 1.0, Some(0.01));
        render(&mut engine, 441 + 2205 + 10);
        assert_eq!(engine.active_voice_count(), 0);
        let (l, _) = render(&mut engine, 4410);
        assert!(l.iter().any(|s| s.abs() > 1e-4), "echo should outlive the voice");
        engine.silence();
        let (l, _) = render(&mut engine, 64);
        assert!(l.iter().all(|s| *s == 0.0));
    }
}
