//! The piano session.
//!
//! One `Session` owns every component and the single timer queue. The host
//! drives it with an explicit millisecond clock: each entry point takes the
//! current time, and [`Session::tick`] fires whatever timers have come due.
//! Audio is pulled with [`Session::render_block`].

use log::{info, warn};

use crate::config::PianoConfig;
use crate::dsp::sampler::SampledInstrument;
use crate::dsp::wav::encode_wav;
use crate::error::{PianoError, Result};
use crate::instruments::{DEFAULT_SOUND_ID, InstrumentProvider, LoadStatus};
use crate::melody::{Articulation, MelodyDocument};
use crate::recorder::{Recording, RecordingBridge, suggested_file_name};
use crate::scheduler::{AudioActivation, Scheduler, StepContext, StepOutcome};
use crate::timer::{TimerKind, TimerQueue};
use crate::view::{PianoMode, ViewSnapshot, ViewState};
use crate::voices::{
    EffectSettings, InstrumentSlot, TARGET as VOICES_TARGET, VoiceManager, VoiceOutput,
};
use crate::watchdog::StallDetector;

const TARGET: &str = "skyline_piano::session";

/// Output is available only once the user has interacted with the page.
#[derive(Debug, Clone, Default)]
pub struct AudioGate {
    gesture_granted: bool,
    running: bool,
}

impl AudioGate {
    pub fn grant_gesture(&mut self) {
        self.gesture_granted = true;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl AudioActivation for AudioGate {
    fn ensure_running(&mut self) -> bool {
        if self.gesture_granted {
            self.running = true;
        }
        self.running
    }
}

macro_rules! step_ctx {
    ($session:ident) => {
        StepContext {
            now_ms: $session.now_ms,
            timers: &mut $session.timers,
            voices: &mut $session.voices,
            view: &mut $session.view,
        }
    };
}

pub struct Session<V: VoiceOutput = VoiceManager> {
    config: PianoConfig,
    now_ms: u64,
    timers: TimerQueue,
    voices: V,
    view: ViewState,
    scheduler: Scheduler,
    watchdog: StallDetector,
    recorder: RecordingBridge,
    gate: AudioGate,
}

impl Session<VoiceManager> {
    pub fn new(config: PianoConfig) -> Self {
        let config = config.normalized();
        let voices = VoiceManager::new(config.sample_rate, config.tuning_pitch, &config.effects);
        Session::with_voices(config, voices)
    }
}

impl<V: VoiceOutput> Session<V> {
    pub fn with_voices(config: PianoConfig, voices: V) -> Self {
        let config = config.normalized();
        Session {
            timers: TimerQueue::new(),
            view: ViewState::new(config.debug_log_capacity),
            scheduler: Scheduler::new(config.timing.clone()),
            watchdog: StallDetector::new(config.watchdog.clone()),
            recorder: RecordingBridge::new(config.sample_rate),
            gate: AudioGate::default(),
            now_ms: 0,
            voices,
            config,
        }
    }

    // ── Accessors ──

    pub fn config(&self) -> &PianoConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.view.snapshot()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn watchdog(&self) -> &StallDetector {
        &self.watchdog
    }

    pub fn voices(&self) -> &V {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut V {
        &mut self.voices
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Earliest pending timer, for hosts that sleep between ticks.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn grant_gesture(&mut self) {
        self.gate.grant_gesture();
        self.view.needs_user_interaction = false;
    }

    /// The clock never runs backwards.
    fn set_clock(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    fn log(&mut self, message: impl AsRef<str>) {
        self.view.debug(self.now_ms, message);
    }

    // ── Melody playback ──

    /// Replace the melody. Playback stops and the view switches to melody mode.
    pub fn load_melody(&mut self, now_ms: u64, document: MelodyDocument) {
        self.set_clock(now_ms);
        self.stop_playback();
        let count = document.notes.len();
        if count == 0 {
            self.log("Warning: melody contains no notes");
        } else {
            self.log(format!("Melody loaded with {count} notes"));
        }
        info!(
            target: TARGET,
            "loaded {} melody: {count} notes, {} chords",
            document.style_name(),
            document.chords.len()
        );
        self.scheduler.set_document(Some(document));
        self.view.mode = PianoMode::Melody;
        self.watchdog.arm(&self.scheduler, self.now_ms, &mut self.timers);
    }

    pub fn load_melody_json(&mut self, now_ms: u64, json: &str) -> Result<()> {
        let document = MelodyDocument::from_json(json)?;
        self.load_melody(now_ms, document);
        Ok(())
    }

    pub fn start(&mut self, now_ms: u64) -> Result<StepOutcome> {
        self.set_clock(now_ms);
        let mut ctx = step_ctx!(self);
        let outcome = self.scheduler.start(&mut ctx, &mut self.gate)?;
        self.view.mode = PianoMode::Melody;
        self.watchdog.arm(&self.scheduler, self.now_ms, &mut self.timers);
        self.after_step(Some(outcome.clone()));
        Ok(outcome)
    }

    pub fn stop(&mut self, now_ms: u64) {
        self.set_clock(now_ms);
        self.stop_playback();
    }

    /// Start when stopped, stop when playing. Returns whether it is now playing.
    pub fn toggle(&mut self, now_ms: u64) -> Result<bool> {
        if self.is_playing() {
            self.stop(now_ms);
        } else {
            self.start(now_ms)?;
        }
        Ok(self.is_playing())
    }

    fn stop_playback(&mut self) {
        let mut ctx = step_ctx!(self);
        self.scheduler.stop(&mut ctx);
        self.watchdog.disarm(&mut self.timers);
    }

    /// Tear the session down: close any recording, stop playback, drop every
    /// timer and release the voices. Keys pressed afterwards are ignored.
    pub fn dispose(&mut self, now_ms: u64) {
        self.set_clock(now_ms);
        if self.recorder.is_recording() {
            let mut ctx = step_ctx!(self);
            if let Err(err) = self.recorder.stop(&mut self.scheduler, &mut ctx) {
                warn!(target: TARGET, "recording lost on dispose: {err}");
            }
        }
        self.stop_playback();
        self.timers.clear();
        self.view.clear_active();
        self.voices.dispose();
        self.log("Audio disposed");
        info!(target: TARGET, "session disposed");
    }

    /// Switching surfaces stops playback and darkens every key.
    pub fn set_mode(&mut self, now_ms: u64, mode: PianoMode) {
        self.set_clock(now_ms);
        self.stop_playback();
        self.view.clear_active();
        self.view.mode = mode;
        self.log(format!("Mode changed to {mode:?}"));
    }

    /// Fold a step outcome back into session state.
    fn after_step(&mut self, outcome: Option<StepOutcome>) {
        if outcome == Some(StepOutcome::Finished) {
            let mut ctx = step_ctx!(self);
            if let Some(Err(err)) = self.recorder.on_playback_finished(&mut self.scheduler, &mut ctx) {
                warn!(target: TARGET, "recording could not be finalized: {err}");
            }
        }
        if !self.scheduler.is_playing() && self.watchdog.is_armed() {
            self.watchdog.disarm(&mut self.timers);
        }
    }

    // ── Timers ──

    /// Fire every timer due at `now_ms`. Returns how many fired.
    pub fn tick(&mut self, now_ms: u64) -> usize {
        self.set_clock(now_ms);
        let mut fired = 0;
        while let Some((id, kind)) = self.timers.pop_due(self.now_ms) {
            fired += 1;
            let mut ctx = step_ctx!(self);
            let outcome = match kind {
                TimerKind::Advance => Some(self.scheduler.on_advance_timer(id, &mut ctx)),
                TimerKind::StallCheck => self.watchdog.on_stall_check(id, &mut self.scheduler, &mut ctx),
                TimerKind::Failsafe => self.watchdog.on_failsafe(id, &mut self.scheduler, &mut ctx),
                TimerKind::ClearActive(pitch) => {
                    self.view.note_off(&pitch);
                    None
                }
                TimerKind::RevertEnvelope => {
                    self.voices.restore_envelopes();
                    None
                }
                TimerKind::SoundLoadTimeout(sound) => {
                    self.on_sound_load_timeout(&sound);
                    None
                }
            };
            if outcome.is_some() {
                self.after_step(outcome);
            }
        }
        fired
    }

    // ── Keyboard ──

    /// Press a key. The articulation envelope reverts shortly afterwards.
    pub fn key_down(
        &mut self,
        now_ms: u64,
        pitch: &str,
        velocity: f64,
        articulation: Articulation,
    ) -> Result<()> {
        self.set_clock(now_ms);
        if !self.gate.ensure_running() {
            self.view.needs_user_interaction = true;
            return Err(PianoError::NeedsUserInteraction);
        }
        if let Err(err) = self.voices.play_note(pitch, velocity, articulation) {
            if !err.is_recoverable() {
                return Err(err);
            }
            warn!(target: VOICES_TARGET, "key {pitch} dropped: {err}");
            self.log(format!("Key {pitch} not played: {err}"));
            return Ok(());
        }
        self.view.note_on(pitch, articulation);
        self.timers.cancel_kind(&TimerKind::RevertEnvelope);
        self.timers
            .schedule(self.now_ms, self.config.envelope_revert_ms, TimerKind::RevertEnvelope);
        Ok(())
    }

    pub fn key_up(&mut self, now_ms: u64, pitch: &str) -> Result<()> {
        self.set_clock(now_ms);
        self.view.release_key(pitch);
        match self.voices.stop_note(pitch) {
            Err(err) if err.is_recoverable() => {
                warn!(target: VOICES_TARGET, "key {pitch} release dropped: {err}");
                Ok(())
            }
            other => other,
        }
    }

    // ── Sound ──

    pub fn set_volume(&mut self, volume: f64) {
        self.voices.set_volume(volume);
    }

    pub fn update_effects(&mut self, settings: &EffectSettings) {
        self.voices.update_effects(settings);
        self.config.effects = settings.clone();
    }

    /// Switch sound. A pending load keeps the synth until the bytes arrive
    /// or the load times out.
    pub fn select_instrument(
        &mut self,
        now_ms: u64,
        id: &str,
        provider: &mut dyn InstrumentProvider,
    ) -> Result<()> {
        self.set_clock(now_ms);
        self.timers
            .cancel_if(|k| matches!(k, TimerKind::SoundLoadTimeout(_)));
        self.view.notice = None;

        if id == DEFAULT_SOUND_ID {
            self.voices.set_instrument(InstrumentSlot::Synth);
            self.log("Using default synth");
            return Ok(());
        }
        if !provider.list_available().iter().any(|o| o.id == id) {
            return Err(PianoError::UnknownInstrument(id.to_string()));
        }

        match provider.load(id) {
            LoadStatus::Ready(instrument) => {
                self.use_sample(id, instrument);
                Ok(())
            }
            LoadStatus::Pending => {
                self.voices.set_instrument(InstrumentSlot::Loading(id.to_string()));
                self.timers.schedule(
                    self.now_ms,
                    self.config.sound_load_timeout_ms,
                    TimerKind::SoundLoadTimeout(id.to_string()),
                );
                self.log(format!("Loading sound {id}"));
                Ok(())
            }
            LoadStatus::Failed(reason) => {
                self.voices.set_instrument(InstrumentSlot::Synth);
                self.view.notice = Some(format!("Could not load sound: {reason}"));
                self.log(format!("Sound {id} failed: {reason}"));
                Err(PianoError::ProviderFailure(reason))
            }
        }
    }

    /// Deliver a pending sample. Returns false when `id` is no longer awaited.
    pub fn complete_instrument_load(&mut self, id: &str, instrument: SampledInstrument) -> bool {
        match self.voices.instrument() {
            InstrumentSlot::Loading(pending) if pending == id => {}
            _ => return false,
        }
        self.timers
            .cancel_kind(&TimerKind::SoundLoadTimeout(id.to_string()));
        self.use_sample(id, instrument);
        true
    }

    fn use_sample(&mut self, id: &str, instrument: SampledInstrument) {
        self.voices.set_instrument(InstrumentSlot::Sampled {
            id: id.to_string(),
            instrument,
        });
        self.log(format!("Using sound {id}"));
    }

    fn on_sound_load_timeout(&mut self, id: &str) {
        match self.voices.instrument() {
            InstrumentSlot::Loading(pending) if pending == id => {}
            _ => return,
        }
        let err = PianoError::SoundLoadTimeout {
            id: id.to_string(),
            timeout_ms: self.config.sound_load_timeout_ms,
        };
        warn!(target: TARGET, "{err}");
        self.voices.set_instrument(InstrumentSlot::Synth);
        self.view.notice = Some(format!("{err}; using the default synth"));
        self.log(format!("{err}"));
    }

    // ── Recording ──

    pub fn start_recording(&mut self, now_ms: u64) -> Result<()> {
        self.set_clock(now_ms);
        let was_playing = self.scheduler.is_playing();
        let mut ctx = step_ctx!(self);
        self.recorder.start(&mut self.scheduler, &mut ctx, &mut self.gate)?;
        if !was_playing && self.scheduler.is_playing() {
            self.watchdog.arm(&self.scheduler, self.now_ms, &mut self.timers);
        }
        Ok(())
    }

    pub fn stop_recording(&mut self, now_ms: u64) -> Result<Recording> {
        self.set_clock(now_ms);
        let mut ctx = step_ctx!(self);
        let recording = self.recorder.stop(&mut self.scheduler, &mut ctx)?.clone();
        self.after_step(None);
        Ok(recording)
    }

    pub fn last_recording(&self) -> Option<&Recording> {
        self.recorder.last_recording()
    }

    pub fn take_recording(&mut self) -> Option<Recording> {
        self.recorder.take_recording()
    }

    /// Download name for the current melody's recording on `date` (YYYY-MM-DD).
    pub fn recording_file_name(&self, date: &str) -> String {
        let style = self.scheduler.document().map_or("piano", MelodyDocument::style_name);
        suggested_file_name(style, date)
    }

    // ── Audio ──

    /// Pull the next block of master output; it is also captured while recording.
    pub fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.voices.render_block(left, right);
        self.recorder.capture(left, right);
    }
}

// ── Offline rendering ───────────────────────────────────────

/// Frames rendered between clock ticks.
const BLOCK_SIZE: usize = 128;
/// Effects ring-out after the last voice ends.
const EFFECTS_TAIL_MS: u64 = 500;

/// Play a melody through a fresh session on a virtual clock and return it
/// as 16-bit stereo WAV.
pub fn render_melody_wav(document: MelodyDocument, config: PianoConfig) -> Result<Vec<u8>> {
    let config = config.normalized();
    let sample_rate = config.sample_rate;
    let step_budget_ms = config
        .timing
        .max_step_delay_ms
        .max(config.timing.recovery_delay_ms as f64);
    let mut session = Session::new(config);
    session.grant_gesture();
    session.load_melody(0, document);

    let notes = session.scheduler().note_count() as f64;
    let limit_ms = (notes * step_budget_ms) as u64 + 10_000;

    session.start(0)?;

    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut block_l = [0.0_f32; BLOCK_SIZE];
    let mut block_r = [0.0_f32; BLOCK_SIZE];
    let mut frames: u64 = 0;
    let mut silent_since: Option<u64> = None;

    loop {
        let now = frames * 1000 / u64::from(sample_rate);
        session.tick(now);

        if !session.is_playing() && session.voices().engine().active_voice_count() == 0 {
            let since = *silent_since.get_or_insert(now);
            if now - since >= EFFECTS_TAIL_MS {
                break;
            }
        }
        if now > limit_ms {
            warn!(target: TARGET, "offline render hit its time limit at {now} ms");
            break;
        }

        session.render_block(&mut block_l, &mut block_r);
        left.extend_from_slice(&block_l);
        right.extend_from_slice(&block_r);
        frames += BLOCK_SIZE as u64;
    }

    info!(
        target: TARGET,
        "rendered {:.2}s offline",
        frames as f64 / f64::from(sample_rate)
    );
    encode_wav(&left, &right, sample_rate)
}
