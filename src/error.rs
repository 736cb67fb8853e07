use ariadne::{Config, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Everything that can go wrong between a melody document and the speakers.
///
/// Most variants never escape the playback loop: the scheduler recovers from
/// them locally and only mirrors them into the debug log. `start()` failures
/// and provider/instrument failures are returned to the caller.
#[derive(Debug, Error)]
pub enum PianoError {
    #[error("no melody available to play")]
    NoMelodyAvailable,

    #[error("invalid note event at index {index}: {reason}")]
    InvalidNoteEvent { index: usize, reason: String },

    #[error("audio output is suspended until the user interacts with the page")]
    NeedsUserInteraction,

    #[error("no voice available to play {0}")]
    VoiceUnavailable(String),

    #[error("sound '{id}' did not load within {timeout_ms} ms")]
    SoundLoadTimeout { id: String, timeout_ms: u64 },

    #[error("recorder failure: {0}")]
    RecorderFailure(String),

    #[error("malformed melody document at line {line}, column {column}: {message}")]
    MalformedDocument {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("unknown instrument '{0}'")]
    UnknownInstrument(String),

    #[error("melody provider failed: {0}")]
    ProviderFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, PianoError>;

impl From<serde_json::Error> for PianoError {
    fn from(e: serde_json::Error) -> Self {
        PianoError::MalformedDocument {
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        }
    }
}

impl PianoError {
    /// Errors callers log and carry on past, without failing the step.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PianoError::VoiceUnavailable(_))
    }
}

/// Render a human-readable diagnostic for a document parse failure.
///
/// Errors without a source position fall back to their `Display` text.
pub fn render_report(source: &str, err: &PianoError) -> String {
    let PianoError::MalformedDocument { line, column, message } = err else {
        return err.to_string();
    };

    let offset = byte_offset(source, *line, *column);
    let end = (offset + 1).min(source.len()).max(offset);

    let mut out = Vec::new();
    let written = Report::build(ReportKind::Error, offset..end)
        .with_config(Config::default().with_color(false))
        .with_message("melody document could not be parsed")
        .with_label(Label::new(offset..end).with_message(message.as_str()))
        .finish()
        .write(Source::from(source), &mut out);

    match written {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(_) => err.to_string(),
    }
}

/// Convert a 1-based (line, column) pair from serde_json into a byte offset.
fn byte_offset(source: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (i, text) in source.split_inclusive('\n').enumerate() {
        if i + 1 == line {
            return (offset + column.saturating_sub(1)).min(source.len());
        }
        offset += text.len();
    }
    source.len()
}
