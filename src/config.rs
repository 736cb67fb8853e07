//! Session configuration.
//!
//! Every tunable number the playback path uses lives here as a named field
//! with a default, so a host can override any of them from JSON without
//! touching the scheduler. Field names are camelCase on the wire to match the
//! rest of the JS-facing surface.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::voices::EffectSettings;

// ── Timing ──────────────────────────────────────────────────

/// Duration and delay constants for the advance step.
///
/// These were tuned by ear against provider-generated melodies rather than
/// derived from tempo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimingConfig {
    /// Upper bound on a legato note's nominal duration, in seconds.
    pub legato_max_duration: f64,
    /// Upper bound on every other note's nominal duration, in seconds.
    pub max_duration: f64,
    /// Fraction of the clamped duration that a staccato note sounds.
    pub staccato_fraction: f64,
    /// Fraction of the clamped duration that a legato note sounds.
    pub legato_fraction: f64,
    /// Fraction for every other articulation.
    pub default_fraction: f64,
    /// Milliseconds of delay per second of legato duration.
    pub legato_delay_scale_ms: f64,
    /// Cap on the legato delay before the liveness band applies.
    pub legato_max_delay_ms: f64,
    /// Lower edge of the liveness band.
    pub min_step_delay_ms: f64,
    /// Upper edge of the liveness band.
    pub max_step_delay_ms: f64,
    /// Delay before retrying after a malformed event or a failed step.
    pub recovery_delay_ms: u64,
    /// Velocity used for chord tones, in [0, 1].
    pub chord_velocity: f64,
    /// Fraction of the current note's duration a chord tone stays lit.
    pub chord_clear_fraction: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            legato_max_duration: 0.8,
            max_duration: 1.0,
            staccato_fraction: 0.5,
            legato_fraction: 0.95,
            default_fraction: 0.9,
            legato_delay_scale_ms: 800.0,
            legato_max_delay_ms: 1200.0,
            min_step_delay_ms: 200.0,
            max_step_delay_ms: 2000.0,
            recovery_delay_ms: 500,
            chord_velocity: 0.6,
            chord_clear_fraction: 0.9,
        }
    }
}

// ── Watchdogs ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchdogConfig {
    /// No advance for longer than this counts as a stall.
    pub stall_threshold_ms: u64,
    /// Period of the index-unchanged failsafe.
    pub failsafe_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            stall_threshold_ms: 3000,
            failsafe_interval_ms: 3500,
        }
    }
}

// ── Session ─────────────────────────────────────────────────

/// Lowest output rate accepted; the Web Audio API floor.
pub const MIN_SAMPLE_RATE: u32 = 3000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PianoConfig {
    pub timing: TimingConfig,
    pub watchdog: WatchdogConfig,
    /// Number of debug log lines kept for the view.
    pub debug_log_capacity: usize,
    pub sample_rate: u32,
    /// Frequency of A4 in Hz.
    pub tuning_pitch: f64,
    /// Effect parameters applied when the session is created.
    pub effects: EffectSettings,
    /// How long a pending sample load may take before falling back to the synth.
    pub sound_load_timeout_ms: u64,
    /// How long a keyboard articulation override stays on the envelope.
    pub envelope_revert_ms: u64,
}

impl Default for PianoConfig {
    fn default() -> Self {
        PianoConfig {
            timing: TimingConfig::default(),
            watchdog: WatchdogConfig::default(),
            debug_log_capacity: 20,
            sample_rate: 44100,
            tuning_pitch: 440.0,
            effects: EffectSettings::default(),
            sound_load_timeout_ms: 5000,
            envelope_revert_ms: 100,
        }
    }
}

impl PianoConfig {
    /// Parse a (possibly partial) JSON configuration. Missing fields keep
    /// their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PianoConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Pull values the audio path cannot run with back into range.
    pub fn normalized(mut self) -> Self {
        self.sample_rate = self.sample_rate.max(MIN_SAMPLE_RATE);
        self
    }
}
