//! UI-observable state.
//!
//! The scheduler and the keyboard path write here synchronously while they
//! trigger audio; the host reads a serializable snapshot after each tick.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::melody::Articulation;

/// Which surface the piano is currently driven by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PianoMode {
    #[default]
    Keyboard,
    Melody,
}

// ── Debug log ───────────────────────────────────────────────

/// Append-only log that keeps the most recent `capacity` lines.
#[derive(Debug, Clone)]
pub struct DebugLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DebugLog {
    pub fn new(capacity: usize) -> Self {
        DebugLog {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
        }
    }

    /// Append a line stamped with the session clock.
    pub fn push(&mut self, now_ms: u64, message: impl AsRef<str>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines
            .push_back(format!("{}: {}", clock_stamp(now_ms), message.as_ref()));
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

/// Format milliseconds as `HH:MM:SS.mmm`.
fn clock_stamp(ms: u64) -> String {
    let millis = ms % 1000;
    let secs = ms / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60,
        millis
    )
}

// ── View state ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ViewState {
    pub mode: PianoMode,
    /// Pitch → number of overlapping triggers still lit.
    active: BTreeMap<String, u32>,
    articulations: HashMap<String, Articulation>,
    pub progress_percent: f64,
    pub note_index: i64,
    pub is_playing: bool,
    pub is_recording: bool,
    pub playback_issue_detected: bool,
    pub needs_user_interaction: bool,
    /// User-facing notice, e.g. a sound that failed to load.
    pub notice: Option<String>,
    pub debug_log: DebugLog,
}

impl ViewState {
    pub fn new(debug_capacity: usize) -> Self {
        ViewState {
            mode: PianoMode::default(),
            active: BTreeMap::new(),
            articulations: HashMap::new(),
            progress_percent: 0.0,
            note_index: -1,
            is_playing: false,
            is_recording: false,
            playback_issue_detected: false,
            needs_user_interaction: false,
            notice: None,
            debug_log: DebugLog::new(debug_capacity),
        }
    }

    /// Light a key.
    pub fn note_on(&mut self, pitch: &str, articulation: Articulation) {
        *self.active.entry(pitch.to_string()).or_insert(0) += 1;
        self.articulations.insert(pitch.to_string(), articulation);
    }

    /// Release one trigger of a key; it goes dark when none remain.
    pub fn note_off(&mut self, pitch: &str) {
        if let Some(count) = self.active.get_mut(pitch) {
            *count -= 1;
            if *count == 0 {
                self.active.remove(pitch);
                self.articulations.remove(pitch);
            }
        }
    }

    /// Force a key dark regardless of how many triggers lit it.
    pub fn release_key(&mut self, pitch: &str) {
        self.active.remove(pitch);
        self.articulations.remove(pitch);
    }

    pub fn clear_active(&mut self) {
        self.active.clear();
        self.articulations.clear();
    }

    pub fn is_active(&self, pitch: &str) -> bool {
        self.active.contains_key(pitch)
    }

    pub fn active_notes(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn has_active_notes(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn articulation_of(&self, pitch: &str) -> Option<Articulation> {
        self.articulations.get(pitch).copied()
    }

    pub fn debug(&mut self, now_ms: u64, message: impl AsRef<str>) {
        self.debug_log.push(now_ms, message);
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            mode: self.mode,
            active_notes: self
                .active
                .keys()
                .map(|p| ActiveKey {
                    pitch: p.clone(),
                    articulation: self.articulations.get(p).copied().unwrap_or_default(),
                })
                .collect(),
            progress_percent: self.progress_percent,
            note_index: self.note_index,
            is_playing: self.is_playing,
            is_recording: self.is_recording,
            playback_issue_detected: self.playback_issue_detected,
            needs_user_interaction: self.needs_user_interaction,
            notice: self.notice.clone(),
            debug_log: self.debug_log.lines().map(str::to_string).collect(),
        }
    }
}

/// A lit key and how it was played, for CSS classes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveKey {
    pub pitch: String,
    pub articulation: Articulation,
}

/// Serializable copy of the view state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub mode: PianoMode,
    pub active_notes: Vec<ActiveKey>,
    pub progress_percent: f64,
    pub note_index: i64,
    pub is_playing: bool,
    pub is_recording: bool,
    pub playback_issue_detected: bool,
    pub needs_user_interaction: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    pub debug_log: Vec<String>,
}
