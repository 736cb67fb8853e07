//! Melody provider boundary.
//!
//! Melodies are produced by an external generator. Whatever it returns is
//! untrusted: [`normalize_response`] turns any JSON value into a playable
//! [`MelodyDocument`], and [`generate_or_fallback`] falls back to a built-in
//! melody for the requested style when generation fails outright.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PianoError, Result};
use crate::melody::{
    Articulation, ChordEvent, DEFAULT_TEMPO, DEFAULT_VELOCITY, MelodyDocument, NoteEvent,
    tempo_from_f64, velocity_from_f64,
};

const TARGET: &str = "skyline_piano::provider";

/// Generation attempts before falling back.
pub const MAX_ATTEMPTS: usize = 3;

// ── Request ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicStyle {
    Jazz,
    #[default]
    Classical,
    Blues,
    Pop,
    Ambient,
    Cinematic,
    Electronic,
    Folk,
}

impl MusicStyle {
    pub const ALL: [MusicStyle; 8] = [
        MusicStyle::Jazz,
        MusicStyle::Classical,
        MusicStyle::Blues,
        MusicStyle::Pop,
        MusicStyle::Ambient,
        MusicStyle::Cinematic,
        MusicStyle::Electronic,
        MusicStyle::Folk,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MusicStyle::Jazz => "jazz",
            MusicStyle::Classical => "classical",
            MusicStyle::Blues => "blues",
            MusicStyle::Pop => "pop",
            MusicStyle::Ambient => "ambient",
            MusicStyle::Cinematic => "cinematic",
            MusicStyle::Electronic => "electronic",
            MusicStyle::Folk => "folk",
        }
    }

    /// Tempo of the built-in melody for this style.
    pub fn tempo(self) -> u32 {
        match self {
            MusicStyle::Jazz | MusicStyle::Pop => 120,
            MusicStyle::Classical => 90,
            MusicStyle::Blues => 80,
            MusicStyle::Ambient => 70,
            MusicStyle::Cinematic => 60,
            MusicStyle::Electronic => 128,
            MusicStyle::Folk => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Medium,
    Complex,
}

impl Complexity {
    /// Sampling temperature handed to the generator.
    pub fn temperature(self) -> f64 {
        match self {
            Complexity::Simple => 0.3,
            Complexity::Medium => 0.5,
            Complexity::Complex => 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MelodyRequest {
    pub style: MusicStyle,
    pub complexity: Complexity,
    /// Free-form prompt replacing the generated one.
    pub prompt: Option<String>,
    pub length_bars: u32,
    pub use_chords: bool,
}

impl Default for MelodyRequest {
    fn default() -> Self {
        MelodyRequest {
            style: MusicStyle::default(),
            complexity: Complexity::default(),
            prompt: None,
            length_bars: 8,
            use_chords: true,
        }
    }
}

impl MelodyRequest {
    pub fn for_style(style: MusicStyle) -> Self {
        MelodyRequest {
            style,
            ..MelodyRequest::default()
        }
    }
}

pub trait MelodyProvider {
    fn generate(&mut self, request: &MelodyRequest) -> Result<MelodyDocument>;
}

/// Ask the provider a few times, then fall back to the built-in melody.
///
/// Never fails: the result always has notes.
pub fn generate_or_fallback(
    provider: &mut dyn MelodyProvider,
    request: &MelodyRequest,
) -> MelodyDocument {
    for attempt in 1..=MAX_ATTEMPTS {
        match provider.generate(request) {
            Ok(mut doc) if doc.is_playable() => {
                if !request.use_chords {
                    doc.chords.clear();
                }
                info!(
                    target: TARGET,
                    "generated {} melody: {} notes, {} chords",
                    request.style.as_str(),
                    doc.notes.len(),
                    doc.chords.len()
                );
                return doc;
            }
            Ok(_) => warn!(target: TARGET, "attempt {attempt}/{MAX_ATTEMPTS}: empty melody"),
            Err(err) => warn!(target: TARGET, "attempt {attempt}/{MAX_ATTEMPTS}: {err}"),
        }
    }
    info!(target: TARGET, "using built-in {} melody", request.style.as_str());
    let mut doc = fallback_melody(request.style);
    if !request.use_chords {
        doc.chords.clear();
    }
    doc
}

// ── Built-in melodies ───────────────────────────────────────

fn chord_table(style: MusicStyle) -> (&'static [&'static [&'static str]], f64) {
    match style {
        MusicStyle::Jazz => (
            &[
                &["D4", "F#4", "A4", "C5"],
                &["G4", "B4", "D5", "F5"],
                &["C4", "E4", "G4", "B4"],
                &["F4", "A4", "C5", "E5"],
                &["Bb4", "D5", "F5"],
                &["A4", "C#5", "E5", "G5"],
                &["D4", "F#4", "A4", "C5"],
                &["G4", "B4", "D5"],
            ],
            1.0,
        ),
        MusicStyle::Classical => (
            &[
                &["C4", "E4", "G4"],
                &["G4", "B4", "D5"],
                &["A4", "C5", "E5"],
                &["F4", "A4", "C5"],
                &["C4", "E4", "G4"],
                &["G4", "B4", "D5"],
                &["C4", "E4", "G4"],
            ],
            1.0,
        ),
        MusicStyle::Blues => (
            &[
                &["C4", "E4", "G4", "Bb4"],
                &["C4", "E4", "G4", "Bb4"],
                &["C4", "E4", "G4", "Bb4"],
                &["C4", "E4", "G4", "Bb4"],
                &["F4", "A4", "C5", "Eb5"],
                &["F4", "A4", "C5", "Eb5"],
                &["C4", "E4", "G4", "Bb4"],
                &["C4", "E4", "G4", "Bb4"],
                &["G4", "B4", "D5", "F5"],
                &["F4", "A4", "C5", "Eb5"],
                &["C4", "E4", "G4", "Bb4"],
                &["G4", "B4", "D5", "F5"],
            ],
            1.0,
        ),
        MusicStyle::Pop => (
            &[
                &["C4", "E4", "G4"],
                &["G4", "B4", "D5"],
                &["A4", "C5", "E5"],
                &["F4", "A4", "C5"],
                &["C4", "E4", "G4"],
                &["G4", "B4", "D5"],
                &["A4", "C5", "E5"],
                &["F4", "A4", "C5"],
            ],
            1.0,
        ),
        MusicStyle::Ambient => (
            &[
                &["C4", "G4", "C5", "E5"],
                &["A3", "E4", "A4", "C5"],
                &["F3", "C4", "F4", "A4"],
                &["G3", "D4", "G4", "B4"],
                &["C4", "G4", "C5", "E5"],
                &["A3", "E4", "A4", "C5"],
            ],
            2.0,
        ),
        MusicStyle::Cinematic => (
            &[
                &["C3", "G3", "C4", "E4"],
                &["Ab3", "Eb4", "Ab4", "C5"],
                &["F3", "C4", "F4", "A4"],
                &["G3", "D4", "G4", "B4"],
                &["C3", "G3", "C4", "E4"],
                &["F3", "C4", "F4", "A4"],
            ],
            2.0,
        ),
        MusicStyle::Electronic => (
            &[
                &["C4", "E4", "G4", "B4"],
                &["A3", "C4", "E4", "G4"],
                &["F3", "A3", "C4", "E4"],
                &["G3", "B3", "D4", "F4"],
                &["C4", "E4", "G4", "B4"],
                &["A3", "C4", "E4", "G4"],
                &["F3", "A3", "C4", "E4"],
                &["G3", "B3", "D4", "F4"],
            ],
            1.0,
        ),
        MusicStyle::Folk => (
            &[
                &["G3", "B3", "D4"],
                &["C4", "E4", "G4"],
                &["D4", "F#4", "A4"],
                &["G3", "B3", "D4"],
                &["E4", "G4", "B4"],
                &["C4", "E4", "G4"],
                &["D4", "F#4", "A4"],
                &["G3", "B3", "D4"],
            ],
            1.0,
        ),
    }
}

/// Built-in melody for a style.
///
/// Each chord is split into two melody notes, its top tone then its second
/// tone, so the chord cadence (one chord per two notes) lines up.
pub fn fallback_melody(style: MusicStyle) -> MelodyDocument {
    let (table, duration) = chord_table(style);
    let chords: Vec<ChordEvent> = table.iter().map(|tones| ChordEvent::new(tones, duration)).collect();

    let half = duration / 2.0;
    let mut notes: Vec<NoteEvent> = chords
        .iter()
        .flat_map(|chord| {
            let top = chord.notes.last().map_or("C4", String::as_str);
            let inner = chord.notes.get(1).map_or(top, String::as_str);
            [NoteEvent::note(top, half), NoteEvent::note(inner, half)]
        })
        .collect();
    if let Some(last) = notes.last_mut() {
        last.articulation = Articulation::Tenuto;
    }

    MelodyDocument {
        notes,
        chords,
        tempo: style.tempo(),
        key: Some("C major".to_string()),
        time_signature: Some("4/4".to_string()),
        style: Some(style.as_str().to_string()),
    }
}

fn c_major() -> ChordEvent {
    let mut chord = ChordEvent::new(&["C4", "E4", "G4"], 2.0);
    chord.symbol = Some("C".to_string());
    chord
}

/// I–V–vi–IV in C.
fn default_progression() -> Vec<ChordEvent> {
    [
        ["C4", "E4", "G4"],
        ["G3", "B3", "D4"],
        ["A3", "C4", "E4"],
        ["F3", "A3", "C4"],
    ]
    .iter()
    .map(|tones| ChordEvent::new(tones, 2.0))
    .collect()
}

/// Eight-note arpeggio used when a response has no melody.
fn default_arpeggio() -> Vec<NoteEvent> {
    ["C5", "E5", "G5", "E5", "G5", "B5", "A5", "F5"]
        .iter()
        .map(|p| NoteEvent::note(p, 0.5).with_velocity(89))
        .collect()
}

// ── Normalization ───────────────────────────────────────────

fn first_array<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(Value::as_array)
        .filter(|a| !a.is_empty())
}

fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn normalize_note(index: usize, value: &Value) -> NoteEvent {
    let Some(obj) = value.as_object() else {
        warn!(target: TARGET, "note {index} is not an object; using a rest");
        return NoteEvent::rest(1.0);
    };
    let rest = obj.get("rest").and_then(Value::as_bool).unwrap_or(false);
    let pitch = first_str(obj, &["note", "pitch"]);
    if pitch.is_none() && !rest {
        warn!(target: TARGET, "note {index} has no pitch; using a rest");
        return NoteEvent::rest(1.0);
    }

    NoteEvent {
        pitch: pitch.map(str::to_string),
        duration: obj
            .get("duration")
            .and_then(Value::as_f64)
            .filter(|d| d.is_finite())
            .unwrap_or(1.0),
        velocity: obj
            .get("velocity")
            .and_then(Value::as_f64)
            .map_or(DEFAULT_VELOCITY, velocity_from_f64),
        articulation: obj
            .get("articulation")
            .and_then(Value::as_str)
            .map(Articulation::parse)
            .unwrap_or_default(),
        rest,
    }
}

fn normalize_chord(index: usize, value: &Value) -> ChordEvent {
    let Some(obj) = value.as_object() else {
        warn!(target: TARGET, "chord {index} is not an object; using C major");
        return c_major();
    };
    let notes: Vec<String> = match first_array(obj, &["notes", "chord"]) {
        Some(tones) => tones.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        None => Vec::new(),
    };
    if notes.is_empty() {
        warn!(target: TARGET, "chord {index} has no tones; using C major");
        return c_major();
    }
    ChordEvent {
        notes,
        duration: obj
            .get("duration")
            .and_then(Value::as_f64)
            .filter(|d| d.is_finite())
            .unwrap_or(2.0),
        symbol: first_str(obj, &["chord_symbol", "symbol"]).map(str::to_string),
        voicing: Some(first_str(obj, &["voicing"]).unwrap_or("close").to_string()),
    }
}

/// Turn a provider response into a playable document.
pub fn normalize_response(response: &Value, style: MusicStyle) -> MelodyDocument {
    let Some(obj) = response.as_object() else {
        warn!(target: TARGET, "response is not an object; using built-in melody");
        return fallback_melody(style);
    };

    let notes = match first_array(obj, &["melody", "notes", "melodic_elements"]) {
        Some(values) => values.iter().enumerate().map(|(i, v)| normalize_note(i, v)).collect(),
        None => {
            warn!(target: TARGET, "response has no melody; using an arpeggio");
            default_arpeggio()
        }
    };
    let chords = match first_array(obj, &["chords", "chord_progression", "harmony"]) {
        Some(values) => values.iter().enumerate().map(|(i, v)| normalize_chord(i, v)).collect(),
        None => {
            warn!(target: TARGET, "response has no chords; using I-V-vi-IV");
            default_progression()
        }
    };

    let tempo = match obj.get("tempo").and_then(Value::as_f64) {
        Some(t) if t > 0.0 => tempo_from_f64(Some(t)),
        _ => DEFAULT_TEMPO,
    };
    let doc = MelodyDocument {
        notes,
        chords,
        tempo,
        key: Some(first_str(obj, &["key"]).unwrap_or("C major").to_string()),
        time_signature: Some(
            first_str(obj, &["time_signature", "timeSignature"])
                .unwrap_or("4/4")
                .to_string(),
        ),
        style: Some(first_str(obj, &["style"]).unwrap_or(style.as_str()).to_string()),
    };
    debug!(
        target: TARGET,
        "normalized response: {} notes, {} chords, {} bpm",
        doc.notes.len(),
        doc.chords.len(),
        doc.tempo
    );
    doc
}

/// The span from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse free text from a generator into a document.
///
/// Chatter around the JSON object is dropped. A truncated object is cut back
/// to the longest prefix that still parses.
pub fn parse_provider_text(text: &str, style: MusicStyle) -> Result<MelodyDocument> {
    let Some(json) = extract_json_object(text) else {
        return Err(PianoError::ProviderFailure(
            "response contains no JSON object".to_string(),
        ));
    };
    let value = match serde_json::from_str::<Value>(json) {
        Ok(value) => value,
        Err(err) => {
            let Some(value) = longest_valid_prefix(json) else {
                return Err(err.into());
            };
            warn!(target: TARGET, "recovered a truncated response");
            value
        }
    };
    Ok(normalize_response(&value, style))
}

fn longest_valid_prefix(json: &str) -> Option<Value> {
    json.match_indices('}')
        .rev()
        .find_map(|(i, _)| serde_json::from_str(&json[..=i]).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::engine::note_to_midi;
    use serde_json::json;

    struct Scripted {
        replies: Vec<Result<MelodyDocument>>,
        calls: usize,
    }

    impl MelodyProvider for Scripted {
        fn generate(&mut self, _request: &MelodyRequest) -> Result<MelodyDocument> {
            self.calls += 1;
            if self.replies.is_empty() {
                return Err(PianoError::ProviderFailure("exhausted".to_string()));
            }
            self.replies.remove(0)
        }
    }

    #[test]
    fn styles_parse_and_carry_tempos() {
        assert_eq!(MusicStyle::parse("Jazz"), Some(MusicStyle::Jazz));
        assert_eq!(MusicStyle::parse("polka"), None);
        assert_eq!(MusicStyle::Electronic.tempo(), 128);
        assert_eq!(MusicStyle::Cinematic.tempo(), 60);
        assert_eq!(Complexity::Complex.temperature(), 0.8);
    }

    #[test]
    fn every_fallback_is_playable() {
        for style in MusicStyle::ALL {
            let doc = fallback_melody(style);
            assert!(doc.is_playable(), "{style:?} has no notes");
            assert_eq!(doc.notes.len(), doc.chords.len() * 2, "{style:?} cadence");
            assert_eq!(doc.tempo, style.tempo());
            for (i, note) in doc.notes.iter().enumerate() {
                assert!(note.playable_pitch(i).is_ok(), "{style:?} note {i}");
            }
            for chord in &doc.chords {
                assert!(chord.notes.iter().all(|n| note_to_midi(n).is_some()));
            }
        }
    }

    #[test]
    fn fallback_tables_match_styles() {
        let blues = fallback_melody(MusicStyle::Blues);
        assert_eq!(blues.chords.len(), 12);
        assert_eq!(blues.chords[4].notes, vec!["F4", "A4", "C5", "Eb5"]);
        let ambient = fallback_melody(MusicStyle::Ambient);
        assert_eq!(ambient.chords[0].duration, 2.0);
        assert_eq!(ambient.notes[0].duration, 1.0);
        assert_eq!(ambient.notes[0].pitch.as_deref(), Some("E5"));
    }

    #[test]
    fn normalize_applies_aliases_and_defaults() {
        let response = json!({
            "melody": [
                { "note": "C4", "duration": 0.5, "velocity": 100.4, "articulation": "staccato" },
                { "pitch": "E4" },
                { "duration": 2 },
                { "rest": true, "duration": 0.25 },
                "garbage"
            ],
            "chord_progression": [
                { "chord": ["C4", "E4", "G4"], "chord_symbol": "C" },
                42,
                { "notes": [] }
            ],
            "tempo": -5,
            "time_signature": "3/4"
        });
        let doc = normalize_response(&response, MusicStyle::Pop);

        assert_eq!(doc.notes.len(), 5);
        assert_eq!(doc.notes[0].velocity, 100);
        assert_eq!(doc.notes[0].articulation, Articulation::Staccato);
        assert_eq!(doc.notes[1].pitch.as_deref(), Some("E4"));
        assert_eq!(doc.notes[1].duration, 1.0);
        assert!(doc.notes[2].rest, "pitchless note becomes a rest");
        assert_eq!(doc.notes[2].duration, 1.0);
        assert_eq!(doc.notes[3].duration, 0.25);
        assert!(doc.notes[4].rest);

        assert_eq!(doc.chords[0].notes, vec!["C4", "E4", "G4"]);
        assert_eq!(doc.chords[0].duration, 2.0);
        assert_eq!(doc.chords[0].voicing.as_deref(), Some("close"));
        assert_eq!(doc.chords[1].symbol.as_deref(), Some("C"));
        assert_eq!(doc.chords[2].notes, vec!["C4", "E4", "G4"]);

        assert_eq!(doc.tempo, 120);
        assert_eq!(doc.time_signature.as_deref(), Some("3/4"));
        assert_eq!(doc.key.as_deref(), Some("C major"));
        assert_eq!(doc.style.as_deref(), Some("pop"));
    }

    #[test]
    fn empty_response_gets_arpeggio_and_progression() {
        let doc = normalize_response(&json!({ "tempo": 96, "style": "lofi" }), MusicStyle::Jazz);
        assert_eq!(doc.notes.len(), 8);
        assert_eq!(doc.notes[0].pitch.as_deref(), Some("C5"));
        assert_eq!(doc.chords.len(), 4);
        assert_eq!(doc.chords[1].notes, vec!["G3", "B3", "D4"]);
        assert_eq!(doc.tempo, 96);
        assert_eq!(doc.style.as_deref(), Some("lofi"));
    }

    #[test]
    fn non_object_response_falls_back() {
        let doc = normalize_response(&json!([1, 2, 3]), MusicStyle::Folk);
        assert_eq!(doc, fallback_melody(MusicStyle::Folk));
    }

    #[test]
    fn json_is_extracted_from_chatter() {
        let text = "Sure! Here it is:\n{\"notes\": [{\"note\": \"G4\"}]}\nEnjoy.";
        assert_eq!(extract_json_object(text), Some("{\"notes\": [{\"note\": \"G4\"}]}"));
        assert_eq!(extract_json_object("no json"), None);
        assert_eq!(extract_json_object("} backwards {"), None);

        let doc = parse_provider_text(text, MusicStyle::Pop).unwrap();
        assert_eq!(doc.notes[0].pitch.as_deref(), Some("G4"));
    }

    #[test]
    fn truncated_text_is_recovered_or_reported() {
        let text = r#"{"melody": [{"note": "A4"}], "tempo": 100} trailing {"broken": }"#;
        let doc = parse_provider_text(text, MusicStyle::Pop).unwrap();
        assert_eq!(doc.tempo, 100);

        assert!(matches!(
            parse_provider_text("{ nope }", MusicStyle::Pop),
            Err(PianoError::MalformedDocument { .. })
        ));
        assert!(matches!(
            parse_provider_text("plain words", MusicStyle::Pop),
            Err(PianoError::ProviderFailure(_))
        ));
    }

    #[test]
    fn generation_retries_then_falls_back() {
        let mut provider = Scripted { replies: vec![], calls: 0 };
        let request = MelodyRequest::for_style(MusicStyle::Blues);
        let doc = generate_or_fallback(&mut provider, &request);
        assert_eq!(provider.calls, MAX_ATTEMPTS);
        assert_eq!(doc, fallback_melody(MusicStyle::Blues));
    }

    #[test]
    fn generation_skips_empty_documents() {
        let good = MelodyDocument::new(
            vec![NoteEvent::note("C4", 1.0)],
            vec![ChordEvent::new(&["C4", "E4"], 1.0)],
        );
        let mut provider = Scripted {
            replies: vec![Ok(MelodyDocument::default()), Ok(good.clone())],
            calls: 0,
        };
        let request = MelodyRequest {
            use_chords: false,
            ..MelodyRequest::default()
        };
        let doc = generate_or_fallback(&mut provider, &request);
        assert_eq!(provider.calls, 2);
        assert_eq!(doc.notes, good.notes);
        assert!(doc.chords.is_empty(), "chords dropped when not requested");
    }
}
