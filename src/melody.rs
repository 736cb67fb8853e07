//! Melody document model.
//!
//! Documents come from an untrusted provider, so deserialization is lenient:
//! missing fields take defaults, numeric fields accept any JSON number, and
//! unknown articulations degrade to `normal`. The scheduler still validates
//! each event before playing it.

use serde::{Deserialize, Deserializer, Serialize};

use crate::dsp::engine::note_to_midi;
use crate::error::{PianoError, Result};

pub const DEFAULT_TEMPO: u32 = 120;
pub const DEFAULT_VELOCITY: u8 = 80;
pub const DEFAULT_NOTE_DURATION: f64 = 1.0;
pub const DEFAULT_CHORD_DURATION: f64 = 2.0;

// ── Articulation ────────────────────────────────────────────

/// Playing style of a single note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Articulation {
    #[default]
    Normal,
    Staccato,
    Legato,
    Accent,
    Tenuto,
    Marcato,
}

impl Articulation {
    /// Parse an articulation name. Unknown names are `Normal`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "staccato" => Articulation::Staccato,
            "legato" => Articulation::Legato,
            "accent" => Articulation::Accent,
            "tenuto" => Articulation::Tenuto,
            "marcato" => Articulation::Marcato,
            _ => Articulation::Normal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Articulation::Normal => "normal",
            Articulation::Staccato => "staccato",
            Articulation::Legato => "legato",
            Articulation::Accent => "accent",
            Articulation::Tenuto => "tenuto",
            Articulation::Marcato => "marcato",
        }
    }
}

impl From<String> for Articulation {
    fn from(s: String) -> Self {
        Articulation::parse(&s)
    }
}

// ── Events ──────────────────────────────────────────────────

/// One step of the melody: a pitched note or a rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    /// Scientific pitch notation ("C4", "F#3"). Providers also call it `note`.
    #[serde(default, alias = "note", skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    /// Nominal length in seconds, before any clamping.
    #[serde(default = "default_note_duration", deserialize_with = "lenient_duration")]
    pub duration: f64,
    /// MIDI-style velocity, 0–127.
    #[serde(default = "default_velocity", deserialize_with = "lenient_velocity")]
    pub velocity: u8,
    #[serde(default)]
    pub articulation: Articulation,
    #[serde(default)]
    pub rest: bool,
}

impl NoteEvent {
    pub fn note(pitch: &str, duration: f64) -> Self {
        NoteEvent {
            pitch: Some(pitch.to_string()),
            duration,
            velocity: DEFAULT_VELOCITY,
            articulation: Articulation::Normal,
            rest: false,
        }
    }

    pub fn rest(duration: f64) -> Self {
        NoteEvent {
            pitch: None,
            duration,
            velocity: DEFAULT_VELOCITY,
            articulation: Articulation::Normal,
            rest: true,
        }
    }

    pub fn with_articulation(mut self, articulation: Articulation) -> Self {
        self.articulation = articulation;
        self
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity.min(127);
        self
    }

    /// Return the playable pitch of a non-rest event, or why it is unplayable.
    pub fn playable_pitch(&self, index: usize) -> Result<&str> {
        let pitch = self
            .pitch
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PianoError::InvalidNoteEvent {
                index,
                reason: "missing pitch".to_string(),
            })?;
        if note_to_midi(pitch).is_none() {
            return Err(PianoError::InvalidNoteEvent {
                index,
                reason: format!("unparseable pitch '{pitch}'"),
            });
        }
        Ok(pitch)
    }
}

/// A chord played underneath the melody.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default = "default_chord_duration", deserialize_with = "lenient_duration")]
    pub duration: f64,
    /// Display label such as "Cmaj7".
    #[serde(default, alias = "chord_symbol", skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voicing: Option<String>,
}

impl ChordEvent {
    pub fn new(notes: &[&str], duration: f64) -> Self {
        ChordEvent {
            notes: notes.iter().map(|n| n.to_string()).collect(),
            duration,
            symbol: None,
            voicing: None,
        }
    }

    /// Label for logs: the symbol if present, otherwise the tones.
    pub fn label(&self) -> String {
        match &self.symbol {
            Some(s) if !s.is_empty() => s.clone(),
            _ if self.notes.is_empty() => "(unknown)".to_string(),
            _ => self.notes.join(","),
        }
    }
}

// ── Document ────────────────────────────────────────────────

/// A generated melody: the notes to walk plus chords and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MelodyDocument {
    #[serde(default, alias = "melody")]
    pub notes: Vec<NoteEvent>,
    #[serde(default)]
    pub chords: Vec<ChordEvent>,
    #[serde(default = "default_tempo", deserialize_with = "lenient_tempo")]
    pub tempo: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, alias = "time_signature", skip_serializing_if = "Option::is_none")]
    pub time_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl Default for MelodyDocument {
    fn default() -> Self {
        MelodyDocument {
            notes: Vec::new(),
            chords: Vec::new(),
            tempo: DEFAULT_TEMPO,
            key: None,
            time_signature: None,
            style: None,
        }
    }
}

impl MelodyDocument {
    pub fn new(notes: Vec<NoteEvent>, chords: Vec<ChordEvent>) -> Self {
        MelodyDocument {
            notes,
            chords,
            ..MelodyDocument::default()
        }
    }

    /// Parse a document from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// A document can start playback only with at least one note.
    pub fn is_playable(&self) -> bool {
        !self.notes.is_empty()
    }

    pub fn style_name(&self) -> &str {
        self.style.as_deref().unwrap_or("piano")
    }
}

// ── Lenient field parsing ───────────────────────────────────

fn default_note_duration() -> f64 {
    DEFAULT_NOTE_DURATION
}

fn default_chord_duration() -> f64 {
    DEFAULT_CHORD_DURATION
}

fn default_velocity() -> u8 {
    DEFAULT_VELOCITY
}

fn default_tempo() -> u32 {
    DEFAULT_TEMPO
}

/// Round and clamp any number into the 0–127 velocity range.
pub fn velocity_from_f64(v: f64) -> u8 {
    if v.is_finite() {
        v.round().clamp(0.0, 127.0) as u8
    } else {
        DEFAULT_VELOCITY
    }
}

fn lenient_velocity<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u8, D::Error> {
    let v = Option::<f64>::deserialize(d)?;
    Ok(v.map(velocity_from_f64).unwrap_or(DEFAULT_VELOCITY))
}

fn lenient_duration<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    let v = Option::<f64>::deserialize(d)?;
    Ok(v.filter(|d| d.is_finite()).unwrap_or(DEFAULT_NOTE_DURATION))
}

fn lenient_tempo<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    let v = Option::<f64>::deserialize(d)?;
    Ok(tempo_from_f64(v))
}

/// Positive finite tempos are rounded; everything else is the default.
pub fn tempo_from_f64(v: Option<f64>) -> u32 {
    match v {
        Some(t) if t.is_finite() && t >= 1.0 => t.round().min(u32::MAX as f64) as u32,
        _ => DEFAULT_TEMPO,
    }
}
