//! Melody playback scheduler.
//!
//! A timer-driven cursor over a [`MelodyDocument`]. Each advance step plays
//! (or rests on) one note, fires the chord that belongs to that index, and
//! schedules exactly one follow-up advance. Delays are clamped into a fixed
//! band, so playback always reaches its end in bounded time, and any failure
//! inside a step turns into a short retry instead of a stall.
//!
//! The scheduler owns no clock and no audio. Every call receives a
//! [`StepContext`] with the current time, the session's timer queue, the
//! voice output and the view state.

use log::{debug, info, warn};

use crate::config::TimingConfig;
use crate::error::{PianoError, Result};
use crate::melody::{Articulation, ChordEvent, MelodyDocument, NoteEvent};
use crate::timer::{TimerId, TimerKind, TimerQueue};
use crate::timing::{
    chord_index_for, clamp_duration, next_step_delay_ms, progress_percent, rest_delay_ms,
    sanitize_seconds, seconds_to_ms, sounded_duration,
};
use crate::view::ViewState;
use crate::voices::VoiceOutput;

const TARGET: &str = "skyline_piano::scheduler";

/// Something that can bring audio output up, or say it cannot yet.
pub trait AudioActivation {
    fn ensure_running(&mut self) -> bool;
}

// ── Cursor ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackCursor {
    /// Index of the current note, -1 when idle.
    pub note_index: i64,
    pub is_playing: bool,
    pending: Option<TimerId>,
    /// Set and cleared together with `pending`.
    has_pending_work: bool,
    pub last_advance_ms: u64,
}

impl Default for PlaybackCursor {
    fn default() -> Self {
        PlaybackCursor {
            note_index: -1,
            is_playing: false,
            pending: None,
            has_pending_work: false,
            last_advance_ms: 0,
        }
    }
}

impl PlaybackCursor {
    pub fn pending(&self) -> Option<TimerId> {
        self.pending
    }

    pub fn has_pending_work(&self) -> bool {
        self.has_pending_work
    }
}

// ── Step plumbing ───────────────────────────────────────────

/// Borrowed session state for one scheduler call.
pub struct StepContext<'a> {
    pub now_ms: u64,
    pub timers: &'a mut TimerQueue,
    pub voices: &'a mut dyn VoiceOutput,
    pub view: &'a mut ViewState,
}

impl StepContext<'_> {
    fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(target: TARGET, "{message}");
        self.view.debug(self.now_ms, message);
    }
}

/// What an advance step did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Played {
        index: usize,
        pitch: String,
        next_in_ms: u64,
    },
    Rested {
        index: usize,
        next_in_ms: u64,
    },
    /// The step failed and a retry is scheduled.
    Recovering { index: usize },
    /// The cursor ran past the last note.
    Finished,
    /// There was nothing to play; playback stopped.
    NoMelody,
    /// Not playing, nothing done.
    Idle,
}

// ── Scheduler ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Scheduler {
    cursor: PlaybackCursor,
    document: Option<MelodyDocument>,
    timing: TimingConfig,
}

impl Scheduler {
    pub fn new(timing: TimingConfig) -> Self {
        Scheduler {
            cursor: PlaybackCursor::default(),
            document: None,
            timing,
        }
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn is_playing(&self) -> bool {
        self.cursor.is_playing
    }

    pub fn document(&self) -> Option<&MelodyDocument> {
        self.document.as_ref()
    }

    pub fn note_count(&self) -> usize {
        self.document.as_ref().map_or(0, |d| d.notes.len())
    }

    /// Replace the melody. Callers stop playback first.
    pub fn set_document(&mut self, document: Option<MelodyDocument>) {
        self.document = document;
    }

    /// Begin playback from the first note.
    ///
    /// Fails without touching the cursor when audio cannot run yet or there
    /// is nothing to play.
    pub fn start(
        &mut self,
        ctx: &mut StepContext<'_>,
        audio: &mut dyn AudioActivation,
    ) -> Result<StepOutcome> {
        if !audio.ensure_running() {
            ctx.view.needs_user_interaction = true;
            ctx.log("Audio is suspended; waiting for user interaction");
            return Err(PianoError::NeedsUserInteraction);
        }
        ctx.view.needs_user_interaction = false;

        if !self.document.as_ref().is_some_and(MelodyDocument::is_playable) {
            ctx.log("No melody available to play");
            return Err(PianoError::NoMelodyAvailable);
        }

        self.cancel_pending(ctx.timers);
        self.cursor.note_index = -1;
        self.cursor.is_playing = true;
        self.cursor.last_advance_ms = ctx.now_ms;

        ctx.view.is_playing = true;
        ctx.view.note_index = -1;
        ctx.view.progress_percent = 0.0;
        ctx.view.playback_issue_detected = false;

        info!(target: TARGET, "starting playback of {} notes", self.note_count());
        ctx.log(format!("Playback started ({} notes)", self.note_count()));
        Ok(self.advance(ctx))
    }

    /// Stop playback and silence everything. Safe to call at any time.
    pub fn stop(&mut self, ctx: &mut StepContext<'_>) {
        let was_playing = self.cursor.is_playing;
        self.cancel_pending(ctx.timers);
        self.cursor.is_playing = false;
        self.cursor.note_index = -1;

        ctx.voices.release_all();
        ctx.timers.cancel_if(|k| matches!(k, TimerKind::ClearActive(_)));
        ctx.view.clear_active();
        ctx.view.is_playing = false;
        ctx.view.note_index = -1;
        ctx.view.progress_percent = 0.0;

        if was_playing {
            info!(target: TARGET, "playback stopped");
            ctx.log("Playback stopped");
        }
    }

    /// Handle a fired advance timer.
    pub fn on_advance_timer(&mut self, id: TimerId, ctx: &mut StepContext<'_>) -> StepOutcome {
        if self.cursor.pending != Some(id) {
            debug!(target: TARGET, "ignoring stale advance timer");
            return StepOutcome::Idle;
        }
        self.cursor.pending = None;
        self.cursor.has_pending_work = false;

        if !self.cursor.is_playing {
            return StepOutcome::Idle;
        }
        self.advance(ctx)
    }

    /// Watchdog entry point: drop the pending timer and step once now.
    pub fn force_advance(&mut self, ctx: &mut StepContext<'_>) -> StepOutcome {
        if !self.cursor.is_playing {
            return StepOutcome::Idle;
        }
        self.cancel_pending(ctx.timers);
        ctx.log(format!("Forcing advance from idx={}", self.cursor.note_index));
        self.advance(ctx)
    }

    /// One advance step.
    pub fn advance(&mut self, ctx: &mut StepContext<'_>) -> StepOutcome {
        let len = self.note_count();
        if len == 0 {
            self.cancel_pending(ctx.timers);
            self.cursor.is_playing = false;
            self.cursor.note_index = -1;
            ctx.view.is_playing = false;
            ctx.view.note_index = -1;
            ctx.log("No melody available; playback halted");
            return StepOutcome::NoMelody;
        }

        self.cursor.note_index += 1;
        let index = self.cursor.note_index.max(0) as usize;
        if index >= len {
            return self.finish(ctx);
        }

        ctx.view.note_index = self.cursor.note_index;
        ctx.view.progress_percent = progress_percent(index, len);

        let (note, chord) = match &self.document {
            Some(doc) => (
                doc.notes[index].clone(),
                chord_index_for(index, doc.chords.len()).map(|c| doc.chords[c].clone()),
            ),
            None => return StepOutcome::NoMelody,
        };

        match self.play_step(ctx, index, &note, chord.as_ref()) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(target: TARGET, "step {index} failed: {err}");
                let retry = self.timing.recovery_delay_ms;
                ctx.log(format!("Step {index} failed ({err}); retrying in {retry} ms"));
                self.schedule_advance(ctx, retry);
                StepOutcome::Recovering { index }
            }
        }
    }

    fn play_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        index: usize,
        note: &NoteEvent,
        chord: Option<&ChordEvent>,
    ) -> Result<StepOutcome> {
        let pitch = if note.rest {
            None
        } else {
            Some(note.playable_pitch(index)?.to_string())
        };

        if let Some(chord) = chord {
            self.trigger_chord(ctx, chord, sanitize_seconds(note.duration))?;
        }

        let Some(pitch) = pitch else {
            let delay = rest_delay_ms(&self.timing, note.duration);
            self.cursor.last_advance_ms = ctx.now_ms;
            self.schedule_advance(ctx, delay);
            ctx.log(format!("Rest for {delay} ms (idx={index})"));
            return Ok(StepOutcome::Rested {
                index,
                next_in_ms: delay,
            });
        };

        let articulation = note.articulation;
        let clamped = clamp_duration(&self.timing, note.duration, articulation);
        let sounded = sounded_duration(&self.timing, clamped, articulation);
        let velocity = f64::from(note.velocity) / 127.0;

        let played = ctx.voices.play_timed_note(&pitch, sounded, velocity);
        tolerate_unavailable(ctx, played)?;
        self.cursor.last_advance_ms = ctx.now_ms;

        ctx.view.note_on(&pitch, articulation);
        let delay = next_step_delay_ms(&self.timing, clamped, articulation);
        self.schedule_advance(ctx, delay);
        ctx.timers.schedule(
            ctx.now_ms,
            seconds_to_ms(sounded),
            TimerKind::ClearActive(pitch.clone()),
        );

        ctx.log(format!(
            "Played {pitch} (idx={index}, {}, {sounded:.2}s, next in {delay} ms)",
            articulation.as_str()
        ));
        Ok(StepOutcome::Played {
            index,
            pitch,
            next_in_ms: delay,
        })
    }

    fn trigger_chord(
        &mut self,
        ctx: &mut StepContext<'_>,
        chord: &ChordEvent,
        note_seconds: f64,
    ) -> Result<()> {
        let seconds = note_seconds * self.timing.chord_clear_fraction;
        let played = ctx.voices.play_chord(&chord.notes, seconds, self.timing.chord_velocity);
        tolerate_unavailable(ctx, played)?;

        let clear_ms = seconds_to_ms(seconds);
        for tone in &chord.notes {
            ctx.view.note_on(tone, Articulation::Normal);
            ctx.timers
                .schedule(ctx.now_ms, clear_ms, TimerKind::ClearActive(tone.clone()));
        }
        ctx.log(format!("Chord {}", chord.label()));
        Ok(())
    }

    fn finish(&mut self, ctx: &mut StepContext<'_>) -> StepOutcome {
        self.cancel_pending(ctx.timers);
        self.cursor.is_playing = false;
        self.cursor.note_index = -1;
        ctx.view.is_playing = false;
        ctx.view.note_index = -1;
        ctx.view.progress_percent = 100.0;
        info!(target: TARGET, "melody finished");
        ctx.log("Melody finished");
        StepOutcome::Finished
    }

    fn schedule_advance(&mut self, ctx: &mut StepContext<'_>, delay_ms: u64) {
        self.cancel_pending(ctx.timers);
        if !self.cursor.is_playing {
            return;
        }
        let id = ctx.timers.schedule(ctx.now_ms, delay_ms, TimerKind::Advance);
        self.cursor.pending = Some(id);
        self.cursor.has_pending_work = true;
    }

    fn cancel_pending(&mut self, timers: &mut TimerQueue) {
        if let Some(id) = self.cursor.pending.take() {
            timers.cancel(id);
        }
        self.cursor.has_pending_work = false;
    }
}

/// A missing voice is logged and playback carries on; other errors fail the step.
fn tolerate_unavailable(ctx: &mut StepContext<'_>, result: Result<()>) -> Result<()> {
    match result {
        Err(err) if err.is_recoverable() => {
            ctx.log(format!("Skipped audio, {err}"));
            Ok(())
        }
        other => other,
    }
}
