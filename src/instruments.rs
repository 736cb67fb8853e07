//! Instrument providers.
//!
//! A provider lists the sample instruments it can offer and hands out loaded
//! [`SampledInstrument`]s. Loads may be pending; the session times them out
//! and keeps playing on the synth meanwhile.

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::dsp::engine::note_to_midi;
use crate::dsp::sampler::SampledInstrument;
use crate::dsp::wav::decode_wav;
use crate::error::{PianoError, Result};

const TARGET: &str = "skyline_piano::instruments";

/// Id of the built-in synth, always available.
pub const DEFAULT_SOUND_ID: &str = "default";

/// Root note assumed when a file name carries no pitch (C4).
pub const DEFAULT_ROOT_NOTE: u8 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundOption {
    pub id: String,
    pub name: String,
    pub category: String,
}

impl SoundOption {
    pub fn default_synth() -> Self {
        SoundOption {
            id: DEFAULT_SOUND_ID.to_string(),
            name: "Default Synth".to_string(),
            category: "synth".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LoadStatus {
    Ready(SampledInstrument),
    /// Bytes are on their way; the caller should wait.
    Pending,
    Failed(String),
}

pub trait InstrumentProvider {
    /// Every selectable sound, the default synth first.
    fn list_available(&self) -> Vec<SoundOption>;
    fn load(&mut self, id: &str) -> LoadStatus;
}

// ── Naming ──────────────────────────────────────────────────

fn file_stem(filename: &str) -> &str {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_alphanumeric() || first == '_' => {
            first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
        }
        _ => word.to_string(),
    }
}

/// Display name for a sample file: extension dropped, `_`/`-` turned into
/// spaces, words title-cased, and a `Bass:`/`Lead:`/`Pad:` prefix when the
/// file name says so.
pub fn sound_name_from_filename(filename: &str) -> String {
    let spaced = file_stem(filename).replace(['_', '-'], " ");
    let name = spaced.split(' ').map(title_case).collect::<Vec<_>>().join(" ");
    match sound_category(filename) {
        "bass" => format!("Bass: {name}"),
        "lead" => format!("Lead: {name}"),
        "pad" => format!("Pad: {name}"),
        _ => name,
    }
}

pub fn sound_category(filename: &str) -> &'static str {
    if filename.contains("BASS") {
        "bass"
    } else if filename.contains("LEAD") {
        "lead"
    } else if filename.contains("PAD") {
        "pad"
    } else {
        "sample"
    }
}

/// MIDI root note from the last token of the file name, e.g. `..._C3 C3.wav`.
pub fn root_note_from_filename(filename: &str) -> u8 {
    file_stem(filename)
        .rsplit([' ', '_', '-'])
        .next()
        .and_then(note_to_midi)
        .and_then(|m| u8::try_from(m).ok())
        .unwrap_or(DEFAULT_ROOT_NOTE)
}

fn sound_id(filename: &str) -> String {
    format!("sound_{filename}")
}

fn option_for(filename: &str) -> SoundOption {
    SoundOption {
        id: sound_id(filename),
        name: sound_name_from_filename(filename),
        category: sound_category(filename).to_string(),
    }
}

fn decode_instrument(filename: &str, bytes: &[u8]) -> Result<SampledInstrument> {
    let buffer = decode_wav(Cursor::new(bytes))?;
    Ok(SampledInstrument::new(buffer, root_note_from_filename(filename)))
}

// ── WAV directory ───────────────────────────────────────────

/// Serves every `.wav` file in one directory.
#[derive(Debug, Clone)]
pub struct WavDirectoryProvider {
    dir: PathBuf,
    files: Vec<String>,
}

impl WavDirectoryProvider {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_wav = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
            if !is_wav {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push(name.to_string());
            }
        }
        files.sort();
        debug!(target: TARGET, "{} sample files in {}", files.len(), dir.display());
        Ok(WavDirectoryProvider { dir, files })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl InstrumentProvider for WavDirectoryProvider {
    fn list_available(&self) -> Vec<SoundOption> {
        std::iter::once(SoundOption::default_synth())
            .chain(self.files.iter().map(|f| option_for(f)))
            .collect()
    }

    fn load(&mut self, id: &str) -> LoadStatus {
        let Some(file) = self.files.iter().find(|f| sound_id(f) == id) else {
            return LoadStatus::Failed(format!("unknown sound '{id}'"));
        };
        let loaded = fs::read(self.dir.join(file))
            .map_err(PianoError::from)
            .and_then(|bytes| decode_instrument(file, &bytes));
        match loaded {
            Ok(instrument) => {
                debug!(target: TARGET, "loaded {file} (root {})", instrument.root_note);
                LoadStatus::Ready(instrument)
            }
            Err(err) => {
                warn!(target: TARGET, "failed to load {file}: {err}");
                LoadStatus::Failed(err.to_string())
            }
        }
    }
}

// ── Host supplied ───────────────────────────────────────────

/// Sounds whose bytes arrive from the host, e.g. fetched by the browser.
///
/// An announced sound reports [`LoadStatus::Pending`] until its bytes are
/// supplied.
#[derive(Debug, Clone, Default)]
pub struct HostProvider {
    sounds: BTreeMap<String, HostSound>,
}

#[derive(Debug, Clone)]
struct HostSound {
    filename: String,
    instrument: Option<SampledInstrument>,
}

impl HostProvider {
    pub fn new() -> Self {
        HostProvider::default()
    }

    /// Make a sample file selectable; returns its id.
    pub fn announce(&mut self, filename: &str) -> String {
        let id = sound_id(filename);
        self.sounds.entry(id.clone()).or_insert_with(|| HostSound {
            filename: filename.to_string(),
            instrument: None,
        });
        id
    }

    /// Deliver WAV bytes for an announced sound.
    pub fn supply(&mut self, id: &str, bytes: &[u8]) -> Result<SampledInstrument> {
        let Some(sound) = self.sounds.get_mut(id) else {
            return Err(PianoError::UnknownInstrument(id.to_string()));
        };
        let instrument = decode_instrument(&sound.filename, bytes)?;
        sound.instrument = Some(instrument.clone());
        Ok(instrument)
    }
}

impl InstrumentProvider for HostProvider {
    fn list_available(&self) -> Vec<SoundOption> {
        std::iter::once(SoundOption::default_synth())
            .chain(self.sounds.values().map(|s| option_for(&s.filename)))
            .collect()
    }

    fn load(&mut self, id: &str) -> LoadStatus {
        match self.sounds.get(id) {
            Some(HostSound { instrument: Some(i), .. }) => LoadStatus::Ready(i.clone()),
            Some(_) => LoadStatus::Pending,
            None => LoadStatus::Failed(format!("unknown sound '{id}'")),
        }
    }
}
