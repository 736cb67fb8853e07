//! Per-note timing math for the advance step.
//!
//! The sounded length of a note and the delay until the next step are
//! computed independently and clamped independently, so one absurd duration
//! from a provider can neither freeze playback nor make steps inaudible.

use crate::config::TimingConfig;
use crate::melody::Articulation;

/// Replace NaN/infinite/negative durations with zero.
pub fn sanitize_seconds(seconds: f64) -> f64 {
    if seconds.is_finite() { seconds.max(0.0) } else { 0.0 }
}

/// Clamp a nominal duration to the articulation's ceiling.
pub fn clamp_duration(cfg: &TimingConfig, duration: f64, articulation: Articulation) -> f64 {
    let ceiling = match articulation {
        Articulation::Legato => cfg.legato_max_duration,
        _ => cfg.max_duration,
    };
    sanitize_seconds(duration).min(ceiling)
}

/// How long the note actually sounds, given its clamped duration.
pub fn sounded_duration(cfg: &TimingConfig, clamped: f64, articulation: Articulation) -> f64 {
    let fraction = match articulation {
        Articulation::Staccato => cfg.staccato_fraction,
        Articulation::Legato => cfg.legato_fraction,
        _ => cfg.default_fraction,
    };
    clamped * fraction
}

/// Delay before the next advance step, in milliseconds.
///
/// Always inside `[min_step_delay_ms, max_step_delay_ms]`.
pub fn next_step_delay_ms(cfg: &TimingConfig, clamped: f64, articulation: Articulation) -> u64 {
    let raw = match articulation {
        Articulation::Legato => {
            (clamped * cfg.legato_delay_scale_ms).min(cfg.legato_max_delay_ms)
        }
        _ => clamped * 1000.0,
    };
    liveness_band(cfg, raw)
}

/// Delay for a rest: its full duration, but never past the band's ceiling.
pub fn rest_delay_ms(cfg: &TimingConfig, duration: f64) -> u64 {
    let ms = sanitize_seconds(duration) * 1000.0;
    ms.min(cfg.max_step_delay_ms).round() as u64
}

fn liveness_band(cfg: &TimingConfig, ms: f64) -> u64 {
    let ms = if ms.is_finite() { ms } else { cfg.max_step_delay_ms };
    ms.clamp(cfg.min_step_delay_ms, cfg.max_step_delay_ms).round() as u64
}

/// Seconds → whole milliseconds, for visual-clear timers.
pub fn seconds_to_ms(seconds: f64) -> u64 {
    (sanitize_seconds(seconds) * 1000.0).round() as u64
}

/// Which chord (if any) sounds at this melodic index.
///
/// Every even index advances the chord pointer; the last chord repeats once
/// the progression runs out.
pub fn chord_index_for(note_index: usize, chord_count: usize) -> Option<usize> {
    if chord_count == 0 || note_index % 2 != 0 {
        return None;
    }
    Some((note_index / 2).min(chord_count - 1))
}

/// Playback progress in percent after `note_index` has been reached.
pub fn progress_percent(note_index: usize, note_count: usize) -> f64 {
    if note_count == 0 {
        return 0.0;
    }
    ((note_index + 1) as f64 / note_count as f64 * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Articulation; 6] = [
        Articulation::Normal,
        Articulation::Staccato,
        Articulation::Legato,
        Articulation::Accent,
        Articulation::Tenuto,
        Articulation::Marcato,
    ];

    #[test]
    fn delay_always_inside_liveness_band() {
        let cfg = TimingConfig::default();
        let inputs = [0.0, -3.0, 0.05, 0.19, 0.2, 0.5, 1.0, 2.5, 1e9, f64::NAN, f64::INFINITY, f64::NEG_INFINITY];
        for art in ALL {
            for d in inputs {
                let clamped = clamp_duration(&cfg, d, art);
                let delay = next_step_delay_ms(&cfg, clamped, art);
                assert!((200..=2000).contains(&delay), "{art:?} {d} -> {delay}");
            }
        }
    }

    #[test]
    fn legato_is_shorter_than_generic_cap() {
        let cfg = TimingConfig::default();
        let legato = clamp_duration(&cfg, 5.0, Articulation::Legato);
        assert!(legato <= 0.8);
        let legato_delay = next_step_delay_ms(&cfg, legato, Articulation::Legato);
        assert!(legato_delay <= 1200);

        let normal = clamp_duration(&cfg, 5.0, Articulation::Normal);
        let normal_delay = next_step_delay_ms(&cfg, normal, Articulation::Normal);
        assert!(legato_delay < normal_delay);
    }

    #[test]
    fn sounded_fractions() {
        let cfg = TimingConfig::default();
        assert!((sounded_duration(&cfg, 1.0, Articulation::Staccato) - 0.5).abs() < 1e-12);
        assert!((sounded_duration(&cfg, 0.8, Articulation::Legato) - 0.76).abs() < 1e-12);
        assert!((sounded_duration(&cfg, 1.0, Articulation::Accent) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn short_notes_hit_the_floor() {
        let cfg = TimingConfig::default();
        let clamped = clamp_duration(&cfg, 0.1, Articulation::Normal);
        assert_eq!(next_step_delay_ms(&cfg, clamped, Articulation::Normal), 200);
    }

    #[test]
    fn quarter_note_at_half_second() {
        let cfg = TimingConfig::default();
        let clamped = clamp_duration(&cfg, 0.5, Articulation::Normal);
        assert_eq!(next_step_delay_ms(&cfg, clamped, Articulation::Normal), 500);
        assert_eq!(next_step_delay_ms(&cfg, clamp_duration(&cfg, 0.5, Articulation::Legato), Articulation::Legato), 400);
    }

    #[test]
    fn rest_delay_is_exact_within_band() {
        let cfg = TimingConfig::default();
        assert_eq!(rest_delay_ms(&cfg, 0.5), 500);
        assert_eq!(rest_delay_ms(&cfg, 0.0), 0);
        assert_eq!(rest_delay_ms(&cfg, 30.0), 2000);
        assert_eq!(rest_delay_ms(&cfg, -1.0), 0);
    }

    #[test]
    fn chord_cadence_follows_even_indices() {
        let hits: Vec<(usize, usize)> = (0..6)
            .filter_map(|i| chord_index_for(i, 2).map(|c| (i, c)))
            .collect();
        assert_eq!(hits, vec![(0, 0), (2, 1), (4, 1)]);
        assert_eq!(chord_index_for(0, 0), None);
    }

    #[test]
    fn progress_reaches_one_hundred() {
        assert_eq!(progress_percent(0, 4), 25.0);
        assert_eq!(progress_percent(3, 4), 100.0);
        assert_eq!(progress_percent(0, 0), 0.0);
    }

    #[test]
    fn overridden_band_is_respected() {
        let cfg = TimingConfig {
            min_step_delay_ms: 50.0,
            max_step_delay_ms: 300.0,
            ..TimingConfig::default()
        };
        assert_eq!(next_step_delay_ms(&cfg, 1.0, Articulation::Normal), 300);
        assert_eq!(next_step_delay_ms(&cfg, 0.01, Articulation::Normal), 50);
    }
}
