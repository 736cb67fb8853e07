//! Audio voice manager.
//!
//! Owns the DSP engine and decides which voice plays what: the melodic voice
//! for scheduler notes, the chord voice for chord tones, the keyboard voice
//! for user key presses, or the loaded sample instrument for all three.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::dsp::engine::{AudioEngine, Bus, VoiceSource, note_to_midi};
use crate::dsp::envelope::EnvelopeShape;
use crate::dsp::oscillator::Waveform;
use crate::dsp::sampler::SampledInstrument;
use crate::dsp::voice::VoicePreset;
use crate::error::{PianoError, Result};
use crate::melody::Articulation;

pub(crate) const TARGET: &str = "skyline_piano::voices";

pub const KEYBOARD_PRESET: VoicePreset =
    VoicePreset::new(Waveform::Sine, EnvelopeShape::new(0.005, 0.1, 0.3, 1.0));
pub const MELODY_PRESET: VoicePreset =
    VoicePreset::new(Waveform::Triangle, EnvelopeShape::new(0.01, 0.2, 0.4, 0.8));
pub const CHORD_PRESET: VoicePreset =
    VoicePreset::new(Waveform::Sine, EnvelopeShape::new(0.02, 0.2, 0.5, 1.5));

// ── Effects ─────────────────────────────────────────────────

/// Parameters of the shared delay → reverb send chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectSettings {
    pub reverb_wet: f64,
    /// Reverb decay in seconds.
    pub reverb_decay: f64,
    pub delay_wet: f64,
    /// Delay time in seconds, at most 1.5.
    pub delay_time: f64,
    pub delay_feedback: f64,
}

impl Default for EffectSettings {
    fn default() -> Self {
        EffectSettings {
            reverb_wet: 0.3,
            reverb_decay: 1.5,
            delay_wet: 0.2,
            delay_time: 0.25,
            delay_feedback: 0.3,
        }
    }
}

// ── Instruments ─────────────────────────────────────────────

/// Which sound the voices use.
#[derive(Debug, Clone, Default)]
pub enum InstrumentSlot {
    /// Built-in synth voices.
    #[default]
    Synth,
    /// A sample instrument is loading; the synth plays meanwhile.
    Loading(String),
    Sampled {
        id: String,
        instrument: SampledInstrument,
    },
}

impl InstrumentSlot {
    pub fn id(&self) -> Option<&str> {
        match self {
            InstrumentSlot::Synth => None,
            InstrumentSlot::Loading(id) | InstrumentSlot::Sampled { id, .. } => Some(id),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, InstrumentSlot::Loading(_))
    }
}

/// Envelope and velocity for a keyboard note with the given articulation.
pub fn articulated(
    baseline: EnvelopeShape,
    articulation: Articulation,
    velocity: f64,
) -> (EnvelopeShape, f64) {
    let mut env = baseline;
    let mut velocity = velocity;
    match articulation {
        Articulation::Staccato => {
            env.release = 0.1;
            env.sustain = 0.1;
        }
        Articulation::Legato => {
            env.release = 1.5;
            env.sustain = 0.8;
        }
        Articulation::Accent => {
            env.attack = 0.001;
            env.sustain = 0.4;
            velocity *= 1.2;
        }
        Articulation::Tenuto => {
            env.sustain = 0.7;
            env.release = 1.2;
        }
        Articulation::Marcato => {
            env.attack = 0.001;
            env.sustain = 0.5;
            velocity *= 1.3;
        }
        Articulation::Normal => {}
    }
    (env, velocity.clamp(0.0, 1.0))
}

// ── Voice output seam ───────────────────────────────────────

/// Everything the scheduler and session need from the audio side.
pub trait VoiceOutput {
    /// Sustained keyboard note with an articulation envelope. The override
    /// stays on the keyboard voice until `restore_envelopes`.
    fn play_note(&mut self, pitch: &str, velocity: f64, articulation: Articulation) -> Result<()>;

    fn stop_note(&mut self, pitch: &str) -> Result<()>;

    /// Fire-and-forget melodic note lasting `seconds`.
    fn play_timed_note(&mut self, pitch: &str, seconds: f64, velocity: f64) -> Result<()>;

    fn play_chord(&mut self, pitches: &[String], seconds: f64, velocity: f64) -> Result<()>;

    fn release_all(&mut self);

    /// Put the keyboard voice back on its baseline envelope.
    fn restore_envelopes(&mut self);

    fn update_effects(&mut self, settings: &EffectSettings);

    fn set_instrument(&mut self, slot: InstrumentSlot);

    fn instrument(&self) -> &InstrumentSlot;

    /// Pull the next block of master output.
    fn render_block(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Master gain in [0, 1].
    fn set_volume(&mut self, volume: f64);

    /// Release everything. Later notes fail with `VoiceUnavailable`.
    fn dispose(&mut self);
}

// ── Voice manager ───────────────────────────────────────────

pub struct VoiceManager {
    engine: AudioEngine,
    keyboard_baseline: VoicePreset,
    keyboard: VoicePreset,
    melody: VoicePreset,
    chord: VoicePreset,
    instrument: InstrumentSlot,
    effects: EffectSettings,
    disposed: bool,
}

impl VoiceManager {
    pub fn new(sample_rate: u32, tuning_pitch: f64, effects: &EffectSettings) -> Self {
        let mut manager = VoiceManager {
            engine: AudioEngine::new(f64::from(sample_rate), tuning_pitch),
            keyboard_baseline: KEYBOARD_PRESET,
            keyboard: KEYBOARD_PRESET,
            melody: MELODY_PRESET,
            chord: CHORD_PRESET,
            instrument: InstrumentSlot::Synth,
            effects: effects.clone(),
            disposed: false,
        };
        manager.apply_effects();
        manager
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    pub fn effects(&self) -> &EffectSettings {
        &self.effects
    }

    /// Envelope the next keyboard note will use.
    pub fn keyboard_envelope(&self) -> EnvelopeShape {
        self.keyboard.envelope
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_alive(&self, pitch: &str) -> Result<()> {
        if self.disposed {
            return Err(PianoError::VoiceUnavailable(pitch.to_string()));
        }
        Ok(())
    }

    fn source(&self, synth: VoicePreset) -> VoiceSource {
        match &self.instrument {
            InstrumentSlot::Sampled { instrument, .. } => VoiceSource::Sampled(instrument.clone()),
            _ => VoiceSource::Synth(synth),
        }
    }

    fn apply_effects(&mut self) {
        let fx = &self.effects;
        let delay = self.engine.delay_mut();
        delay.set_time(fx.delay_time);
        delay.set_feedback(fx.delay_feedback);
        delay.set_wet(fx.delay_wet);
        let reverb = self.engine.reverb_mut();
        reverb.set_decay_seconds(fx.reverb_decay);
        reverb.set_wet(fx.reverb_wet);
    }
}

impl VoiceOutput for VoiceManager {
    fn play_note(&mut self, pitch: &str, velocity: f64, articulation: Articulation) -> Result<()> {
        self.ensure_alive(pitch)?;
        let (envelope, velocity) =
            articulated(self.keyboard_baseline.envelope, articulation, velocity);
        self.keyboard.envelope = envelope;

        let source = self.source(self.keyboard);
        self.engine
            .trigger(Bus::Keyboard, &source, pitch, velocity, None)
            .ok_or_else(|| PianoError::VoiceUnavailable(pitch.to_string()))?;
        debug!(target: TARGET, "key {pitch} on ({}, v={velocity:.2})", articulation.as_str());
        Ok(())
    }

    fn stop_note(&mut self, pitch: &str) -> Result<()> {
        self.ensure_alive(pitch)?;
        let midi = note_to_midi(pitch).ok_or_else(|| PianoError::VoiceUnavailable(pitch.to_string()))?;
        self.engine.release_note(Bus::Keyboard, midi);
        Ok(())
    }

    fn play_timed_note(&mut self, pitch: &str, seconds: f64, velocity: f64) -> Result<()> {
        self.ensure_alive(pitch)?;
        let source = self.source(self.melody);
        self.engine
            .trigger(Bus::Melody, &source, pitch, velocity, Some(seconds))
            .ok_or_else(|| PianoError::VoiceUnavailable(pitch.to_string()))?;
        Ok(())
    }

    fn play_chord(&mut self, pitches: &[String], seconds: f64, velocity: f64) -> Result<()> {
        self.ensure_alive("chord")?;
        let source = self.source(self.chord);
        for pitch in pitches {
            if self
                .engine
                .trigger(Bus::Chord, &source, pitch, velocity, Some(seconds))
                .is_none()
            {
                warn!(target: TARGET, "skipping unplayable chord tone '{pitch}'");
            }
        }
        Ok(())
    }

    fn release_all(&mut self) {
        self.engine.release_all();
    }

    fn restore_envelopes(&mut self) {
        self.keyboard = self.keyboard_baseline;
    }

    fn update_effects(&mut self, settings: &EffectSettings) {
        self.effects = settings.clone();
        self.apply_effects();
        debug!(target: TARGET, "effects updated: {settings:?}");
    }

    fn set_instrument(&mut self, slot: InstrumentSlot) {
        match &slot {
            InstrumentSlot::Synth => debug!(target: TARGET, "using built-in synth"),
            InstrumentSlot::Loading(id) => debug!(target: TARGET, "loading '{id}', synth meanwhile"),
            InstrumentSlot::Sampled { id, .. } => debug!(target: TARGET, "using sampled '{id}'"),
        }
        self.instrument = slot;
    }

    fn instrument(&self) -> &InstrumentSlot {
        &self.instrument
    }

    fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.disposed {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }
        self.engine.render(left, right);
    }

    fn set_volume(&mut self, volume: f64) {
        self.engine.set_volume(volume);
    }

    fn dispose(&mut self) {
        self.engine.silence();
        self.instrument = InstrumentSlot::Synth;
        self.disposed = true;
        debug!(target: TARGET, "voices disposed");
    }
}

// ── Test double ─────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::sampler::SampleBuffer;

    fn manager() -> VoiceManager {
        VoiceManager::new(44100, 440.0, &EffectSettings::default())
    }

    fn render(m: &mut VoiceManager, frames: usize) -> Vec<f32> {
        let mut l = vec![0.0; frames];
        let mut r = vec![0.0; frames];
        m.render_block(&mut l, &mut r);
        l
    }

    #[test]
    fn articulation_overrides() {
        let base = KEYBOARD_PRESET.envelope;
        let (env, v) = articulated(base, Articulation::Staccato, 0.5);
        assert_eq!((env.release, env.sustain, v), (0.1, 0.1, 0.5));
        let (env, _) = articulated(base, Articulation::Legato, 0.5);
        assert_eq!((env.release, env.sustain), (1.5, 0.8));
        let (env, v) = articulated(base, Articulation::Accent, 0.5);
        assert_eq!((env.attack, env.sustain), (0.001, 0.4));
        assert!((v - 0.6).abs() < 1e-12);
        let (env, _) = articulated(base, Articulation::Tenuto, 0.5);
        assert_eq!((env.sustain, env.release), (0.7, 1.2));
        let (env, v) = articulated(base, Articulation::Marcato, 0.5);
        assert_eq!((env.attack, env.sustain), (0.001, 0.5));
        assert!((v - 0.65).abs() < 1e-12);
        let (env, _) = articulated(base, Articulation::Normal, 0.5);
        assert_eq!(env, base);
    }

    #[test]
    fn boosted_velocity_is_capped() {
        let (_, v) = articulated(KEYBOARD_PRESET.envelope, Articulation::Marcato, 1.0);
        assert_eq!(v, 1.0);
    }

    #[test]
    fn override_lasts_until_restore() {
        let mut m = manager();
        m.play_note("C4", 0.8, Articulation::Staccato).unwrap();
        assert_eq!(m.keyboard_envelope().release, 0.1);
        m.restore_envelopes();
        assert_eq!(m.keyboard_envelope(), KEYBOARD_PRESET.envelope);
    }

    #[test]
    fn keyboard_note_sounds_and_stops() {
        let mut m = manager();
        m.play_note("A4", 1.0, Articulation::Normal).unwrap();
        assert!(render(&mut m, 2048).iter().any(|s| s.abs() > 0.01));
        m.stop_note("A4").unwrap();
        assert_eq!(m.engine().sounding_on(Bus::Keyboard), 0);
    }

    #[test]
    fn chord_skips_bad_tones() {
        let mut m = manager();
        let tones = vec!["C3".to_string(), "??".to_string(), "G3".to_string()];
        m.play_chord(&tones, 1.0, 0.6).unwrap();
        assert_eq!(m.engine().sounding_on(Bus::Chord), 2);
    }

    #[test]
    fn disposed_manager_is_unavailable() {
        let mut m = manager();
        m.dispose();
        assert!(m.is_disposed());
        assert!(matches!(
            m.play_timed_note("C4", 0.5, 0.6),
            Err(PianoError::VoiceUnavailable(_))
        ));
        assert!(m.play_note("C4", 0.5, Articulation::Normal).is_err());
        assert!(render(&mut m, 64).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn volume_scales_master_output() {
        let mut m = manager();
        m.play_note("A4", 1.0, Articulation::Normal).unwrap();
        m.set_volume(0.0);
        assert_eq!(m.engine().volume(), 0.0);
        assert!(render(&mut m, 512).iter().all(|s| *s == 0.0));
        m.set_volume(0.8);
        assert!(render(&mut m, 2048).iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn sampled_chord_triggers_every_tone_at_once() {
        let mut m = manager();
        let inst = SampledInstrument::new(SampleBuffer::new(vec![0.5; 44100], 44100), 60);
        m.set_instrument(InstrumentSlot::Sampled {
            id: "pad".into(),
            instrument: inst,
        });
        let tones = vec!["C3".to_string(), "E3".to_string(), "G3".to_string()];
        m.play_chord(&tones, 1.0, 0.6).unwrap();
        assert_eq!(m.engine().sounding_on(Bus::Chord), 3);
    }

    #[test]
    fn loading_slot_still_uses_synth() {
        let mut m = manager();
        m.set_instrument(InstrumentSlot::Loading("piano".into()));
        assert!(m.instrument().is_loading());
        m.play_timed_note("C4", 0.5, 0.8).unwrap();
        assert!(render(&mut m, 2048).iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn sampled_slot_plays_buffer() {
        let mut m = manager();
        let inst = SampledInstrument::new(SampleBuffer::new(vec![0.5; 44100], 44100), 60);
        m.set_instrument(InstrumentSlot::Sampled {
            id: "pad".into(),
            instrument: inst,
        });
        assert_eq!(m.instrument().id(), Some("pad"));
        m.play_timed_note("C4", 0.5, 1.0).unwrap();
        let out = render(&mut m, 1024);
        assert!(out[1023] > 0.1, "{}", out[1023]);
    }

    #[test]
    fn effects_update_keeps_voices() {
        let mut m = manager();
        m.play_note("E4", 0.8, Articulation::Normal).unwrap();
        let settings = EffectSettings {
            reverb_wet: 0.6,
            delay_time: 0.5,
            ..EffectSettings::default()
        };
        m.update_effects(&settings);
        assert_eq!(m.effects(), &settings);
        assert_eq!(m.engine().sounding_on(Bus::Keyboard), 1);
    }

    #[test]
    fn effect_settings_camel_case() {
        let fx: EffectSettings = serde_json::from_str(r#"{"reverbWet":0.5,"delayTime":1.0}"#).unwrap();
        assert_eq!(fx.reverb_wet, 0.5);
        assert_eq!(fx.delay_time, 1.0);
        assert_eq!(fx.delay_feedback, 0.3);
    }
}
