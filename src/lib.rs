pub mod config;
pub mod dsp;
pub mod error;
pub mod instruments;
pub mod melody;
pub mod provider;
pub mod recorder;
pub mod scheduler;
pub mod session;
pub mod timer;
pub mod timing;
pub mod view;
pub mod voices;
pub mod watchdog;

use crate::config::PianoConfig;
use crate::error::{PianoError, render_report};
use crate::instruments::{HostProvider, InstrumentProvider};
use crate::melody::{Articulation, MelodyDocument};
use crate::provider::MusicStyle;
use crate::session::Session;
use crate::view::PianoMode;
use crate::voices::EffectSettings;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the skyline-piano-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Parse a melody document, rendering parse failures as a diagnostic report.
pub fn parse_melody(source: &str) -> Result<MelodyDocument, String> {
    MelodyDocument::from_json(source).map_err(|e| render_report(source, &e))
}

fn style_or_default(style: &str) -> MusicStyle {
    MusicStyle::parse(style).unwrap_or_default()
}

/// WASM-exposed: turn raw generator output (JSON, possibly wrapped in chatter)
/// into a normalized melody document JSON.
#[wasm_bindgen]
pub fn normalize_melody(response: &str, style: &str) -> Result<String, JsValue> {
    let style = style_or_default(style);
    let document = provider::parse_provider_text(response, style)
        .map_err(|e| JsValue::from_str(&format!("{e}")))?;
    document.to_json().map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: the built-in melody for a style, as JSON.
#[wasm_bindgen]
pub fn fallback_melody(style: &str) -> Result<String, JsValue> {
    provider::fallback_melody(style_or_default(style))
        .to_json()
        .map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: play a melody document offline and return a WAV byte array.
#[wasm_bindgen]
pub fn render_melody_wav(source: &str, sample_rate: u32) -> Result<Vec<u8>, JsValue> {
    let document = parse_melody(source).map_err(|e| JsValue::from_str(&e))?;
    let config = PianoConfig {
        sample_rate,
        ..PianoConfig::default()
    };
    session::render_melody_wav(document, config).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// Browser-facing piano: a [`Session`] plus the sounds the page has fetched.
///
/// Every time argument is `performance.now()` in milliseconds.
#[wasm_bindgen]
pub struct WebPiano {
    session: Session,
    sounds: HostProvider,
}

fn clock(now_ms: f64) -> u64 {
    now_ms as u64
}

fn js_error(err: PianoError) -> JsValue {
    JsValue::from_str(&format!("{err}"))
}

#[wasm_bindgen]
impl WebPiano {
    #[wasm_bindgen(constructor)]
    pub fn new() -> WebPiano {
        WebPiano {
            session: Session::new(PianoConfig::default()),
            sounds: HostProvider::new(),
        }
    }

    /// Build from a (possibly partial) `PianoConfig` JSON object.
    pub fn with_config(json: &str) -> Result<WebPiano, JsValue> {
        let config = PianoConfig::from_json(json).map_err(|e| JsValue::from_str(&render_report(json, &e)))?;
        Ok(WebPiano {
            session: Session::new(config),
            sounds: HostProvider::new(),
        })
    }

    /// Call from a click or key handler so audio may start.
    pub fn grant_gesture(&mut self) {
        self.session.grant_gesture();
    }

    pub fn load_melody(&mut self, now_ms: f64, json: &str) -> Result<(), JsValue> {
        let document = parse_melody(json).map_err(|e| JsValue::from_str(&e))?;
        self.session.load_melody(clock(now_ms), document);
        Ok(())
    }

    pub fn start(&mut self, now_ms: f64) -> Result<(), JsValue> {
        self.session.start(clock(now_ms)).map(|_| ()).map_err(js_error)
    }

    pub fn stop(&mut self, now_ms: f64) {
        self.session.stop(clock(now_ms));
    }

    pub fn toggle(&mut self, now_ms: f64) -> Result<bool, JsValue> {
        self.session.toggle(clock(now_ms)).map_err(js_error)
    }

    pub fn note_on(
        &mut self,
        now_ms: f64,
        pitch: &str,
        velocity: f64,
        articulation: &str,
    ) -> Result<(), JsValue> {
        self.session
            .key_down(clock(now_ms), pitch, velocity, Articulation::parse(articulation))
            .map_err(js_error)
    }

    pub fn note_off(&mut self, now_ms: f64, pitch: &str) -> Result<(), JsValue> {
        self.session.key_up(clock(now_ms), pitch).map_err(js_error)
    }

    /// `"keyboard"` or `"melody"`.
    pub fn set_mode(&mut self, now_ms: f64, mode: &str) -> Result<(), JsValue> {
        let mode = match mode {
            "keyboard" => PianoMode::Keyboard,
            "melody" => PianoMode::Melody,
            other => return Err(JsValue::from_str(&format!("unknown mode '{other}'"))),
        };
        self.session.set_mode(clock(now_ms), mode);
        Ok(())
    }

    /// Apply a (possibly partial) `EffectSettings` JSON object.
    pub fn set_effects(&mut self, json: &str) -> Result<(), JsValue> {
        let settings: EffectSettings =
            serde_json::from_str(json).map_err(|e| JsValue::from_str(&format!("{e}")))?;
        self.session.update_effects(&settings);
        Ok(())
    }

    /// Master gain in [0, 1].
    pub fn set_volume(&mut self, volume: f64) {
        self.session.set_volume(volume);
    }

    /// Release audio on page teardown; later notes are ignored.
    pub fn dispose(&mut self, now_ms: f64) {
        self.session.dispose(clock(now_ms));
    }

    /// Register a sample file the page is about to fetch; returns its id.
    pub fn announce_sound(&mut self, filename: &str) -> String {
        self.sounds.announce(filename)
    }

    pub fn available_sounds(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(&self.sounds.list_available())
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    pub fn select_sound(&mut self, now_ms: f64, id: &str) -> Result<(), JsValue> {
        self.session
            .select_instrument(clock(now_ms), id, &mut self.sounds)
            .map_err(js_error)
    }

    /// Hand over fetched WAV bytes. Returns whether the sound went live.
    pub fn supply_sound(&mut self, id: &str, wav: &[u8]) -> Result<bool, JsValue> {
        let instrument = self.sounds.supply(id, wav).map_err(js_error)?;
        Ok(self.session.complete_instrument_load(id, instrument))
    }

    pub fn start_recording(&mut self, now_ms: f64) -> Result<(), JsValue> {
        self.session.start_recording(clock(now_ms)).map_err(js_error)
    }

    /// Finish recording and return the WAV bytes.
    pub fn stop_recording(&mut self, now_ms: f64) -> Result<Vec<u8>, JsValue> {
        self.session
            .stop_recording(clock(now_ms))
            .map(|r| r.wav)
            .map_err(js_error)
    }

    /// WAV bytes of a recording closed by the end of playback, if any.
    pub fn take_recording(&mut self) -> Option<Vec<u8>> {
        self.session.take_recording().map(|r| r.wav)
    }

    /// `date` is `YYYY-MM-DD`.
    pub fn recording_file_name(&self, date: &str) -> String {
        self.session.recording_file_name(date)
    }

    /// Fire due timers. Returns how many fired.
    pub fn tick(&mut self, now_ms: f64) -> u32 {
        self.session.tick(clock(now_ms)) as u32
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.session.next_deadline().map(|ms| ms as f64)
    }

    /// Fill one AudioWorklet block.
    pub fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.session.render_block(left, right);
    }

    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(&self.session.snapshot())
            .map_err(|e| JsValue::from_str(&format!("{e}")))
    }

    pub fn snapshot_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.session.snapshot()).map_err(|e| JsValue::from_str(&format!("{e}")))
    }
}

impl Default for WebPiano {
    fn default() -> Self {
        WebPiano::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_melody_reports_position() {
        let err = parse_melody("{\n  \"notes\": [ { \"pitch\": \"C4\" ]\n}").unwrap_err();
        assert!(err.contains("melody document could not be parsed"), "{err}");
        assert!(parse_melody(r#"{"notes": [{"pitch": "C4"}]}"#).is_ok());
    }

    #[test]
    fn normalize_melody_round_trips_json() {
        let json = normalize_melody(r#"Here: {"melody": [{"note": "D4"}]}"#, "folk").unwrap();
        let doc = MelodyDocument::from_json(&json).unwrap();
        assert_eq!(doc.notes[0].pitch.as_deref(), Some("D4"));
        assert_eq!(doc.style.as_deref(), Some("folk"));
    }

    #[test]
    fn unknown_style_uses_default_fallback() {
        let json = fallback_melody("polka").unwrap();
        let doc = MelodyDocument::from_json(&json).unwrap();
        assert_eq!(doc.style.as_deref(), Some("classical"));
    }

    #[test]
    fn web_piano_plays_after_gesture() {
        let mut piano = WebPiano::new();
        piano
            .load_melody(0.0, r#"{"notes": [{"pitch": "C4", "duration": 0.5}]}"#)
            .unwrap();
        piano.grant_gesture();
        assert!(piano.toggle(1.0).unwrap());

        let mut left = vec![0.0_f32; 256];
        let mut right = vec![0.0_f32; 256];
        piano.render_block(&mut left, &mut right);
        assert!(left.iter().any(|s| s.abs() > 0.0), "note should be audible");

        piano.tick(5_000.0);
        let snapshot = piano.snapshot_json().unwrap();
        assert!(snapshot.contains("\"isPlaying\":false"), "{snapshot}");
        assert!(snapshot.contains("\"progressPercent\":100"), "{snapshot}");
    }

    #[test]
    fn zero_sample_rate_config_still_renders() {
        let mut piano = WebPiano::with_config(r#"{"sampleRate": 0}"#).unwrap();
        piano.grant_gesture();
        piano.note_on(0.0, "A4", 1.0, "normal").unwrap();
        let mut left = vec![0.0_f32; 128];
        let mut right = vec![0.0_f32; 128];
        piano.render_block(&mut left, &mut right);
        assert!(left.iter().all(|s| s.is_finite()));

        let wav = render_melody_wav(r#"{"notes": [{"pitch": "C4", "duration": 0.25}]}"#, 0).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
    }

    #[test]
    fn disposed_piano_ignores_keys() {
        let mut piano = WebPiano::new();
        piano.grant_gesture();
        piano.dispose(0.0);
        piano.note_on(10.0, "C4", 1.0, "normal").unwrap();
        let mut left = vec![1.0_f32; 64];
        let mut right = vec![1.0_f32; 64];
        piano.render_block(&mut left, &mut right);
        assert!(left.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn web_piano_sound_lifecycle() {
        let mut piano = WebPiano::new();
        let id = piano.announce_sound("Srm_LEAD - Bright_C4 C4.wav");
        piano.select_sound(0.0, &id).unwrap();

        let tone: Vec<f32> = (0..800).map(|i| (i as f32 * 0.03).sin()).collect();
        let wav = dsp::wav::encode_wav(&tone, &tone, 8000).unwrap();
        assert!(piano.supply_sound(&id, &wav).unwrap());
        assert!(!piano.supply_sound(&id, &wav).unwrap(), "already live");
    }
}
