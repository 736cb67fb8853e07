//! Recording bridge.
//!
//! Captures the master output while a recording is active and turns it into
//! a WAV file when it ends. Recording follows playback: starting a recording
//! starts an idle melody, stopping it stops the melody, and a melody that
//! plays to the end finishes the recording.

use log::{info, warn};

use crate::dsp::wav::encode_wav;
use crate::error::{PianoError, Result};
use crate::scheduler::{AudioActivation, Scheduler, StepContext};

const TARGET: &str = "skyline_piano::recorder";

/// A finished recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// 16-bit stereo WAV bytes.
    pub wav: Vec<u8>,
    pub frames: usize,
    pub sample_rate: u32,
}

impl Recording {
    pub fn duration_seconds(&self) -> f64 {
        self.frames as f64 / f64::from(self.sample_rate.max(1))
    }
}

/// Download name for a recording, e.g. `melody_jazz_2024-05-01.wav`.
pub fn suggested_file_name(style: &str, date: &str) -> String {
    let style = style.trim();
    let style = if style.is_empty() { "piano" } else { style };
    format!("melody_{style}_{date}.wav")
}

#[derive(Debug, Default)]
pub struct RecordingBridge {
    sample_rate: u32,
    capturing: bool,
    left: Vec<f32>,
    right: Vec<f32>,
    last: Option<Recording>,
}

impl RecordingBridge {
    pub fn new(sample_rate: u32) -> Self {
        RecordingBridge {
            sample_rate,
            ..RecordingBridge::default()
        }
    }

    pub fn is_recording(&self) -> bool {
        self.capturing
    }

    pub fn last_recording(&self) -> Option<&Recording> {
        self.last.as_ref()
    }

    pub fn take_recording(&mut self) -> Option<Recording> {
        self.last.take()
    }

    /// Frames captured so far in the active recording.
    pub fn captured_frames(&self) -> usize {
        self.left.len()
    }

    /// Begin capturing, starting playback if it is idle.
    pub fn start(
        &mut self,
        scheduler: &mut Scheduler,
        ctx: &mut StepContext<'_>,
        audio: &mut dyn AudioActivation,
    ) -> Result<()> {
        if !audio.ensure_running() {
            self.capturing = false;
            ctx.view.is_recording = false;
            ctx.view.needs_user_interaction = true;
            ctx.view.debug(ctx.now_ms, "Recording failed: audio is not running");
            return Err(PianoError::RecorderFailure(
                "audio output is not running".to_string(),
            ));
        }

        self.left.clear();
        self.right.clear();
        self.capturing = true;
        ctx.view.is_recording = true;
        ctx.view.debug(ctx.now_ms, "Recording started");
        info!(target: TARGET, "recording started");

        if !scheduler.is_playing() {
            if let Err(err) = scheduler.start(ctx, audio) {
                warn!(target: TARGET, "recording without playback: {err}");
            }
        }
        Ok(())
    }

    /// Finish the active recording and stop playback if it is running.
    pub fn stop(&mut self, scheduler: &mut Scheduler, ctx: &mut StepContext<'_>) -> Result<&Recording> {
        if !self.capturing {
            warn!(target: TARGET, "stop requested with no active recording");
            ctx.view.debug(ctx.now_ms, "Cannot stop recording: none active");
            return Err(PianoError::RecorderFailure("no active recording".to_string()));
        }
        self.capturing = false;
        ctx.view.is_recording = false;

        let left = std::mem::take(&mut self.left);
        let right = std::mem::take(&mut self.right);
        let wav = encode_wav(&left, &right, self.sample_rate).map_err(|e| {
            ctx.view.debug(ctx.now_ms, format!("Recording failed: {e}"));
            PianoError::RecorderFailure(e.to_string())
        })?;

        if scheduler.is_playing() {
            scheduler.stop(ctx);
        }

        let recording = Recording {
            wav,
            frames: left.len(),
            sample_rate: self.sample_rate,
        };
        info!(
            target: TARGET,
            "recording finished: {:.2}s",
            recording.duration_seconds()
        );
        ctx.view.debug(
            ctx.now_ms,
            format!("Recording finished ({:.1}s)", recording.duration_seconds()),
        );
        Ok(self.last.insert(recording))
    }

    /// Playback reached its end; close an active recording.
    pub fn on_playback_finished(
        &mut self,
        scheduler: &mut Scheduler,
        ctx: &mut StepContext<'_>,
    ) -> Option<Result<()>> {
        if !self.capturing {
            return None;
        }
        Some(self.stop(scheduler, ctx).map(|_| ()))
    }

    /// Append a rendered block while capturing.
    pub fn capture(&mut self, left: &[f32], right: &[f32]) {
        if self.capturing {
            let n = left.len().min(right.len());
            self.left.extend_from_slice(&left[..n]);
            self.right.extend_from_slice(&right[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use crate::melody::{MelodyDocument, NoteEvent};
    use crate::timer::TimerQueue;
    use crate::view::ViewState;
    use crate::voices::fake::FakeVoices;

    struct Gate(bool);

    impl AudioActivation for Gate {
        fn ensure_running(&mut self) -> bool {
            self.0
        }
    }

    struct Rig {
        sched: Scheduler,
        bridge: RecordingBridge,
        timers: TimerQueue,
        voices: FakeVoices,
        view: ViewState,
    }

    impl Rig {
        fn new(notes: Vec<NoteEvent>) -> Self {
            let mut sched = Scheduler::new(TimingConfig::default());
            sched.set_document(Some(MelodyDocument::new(notes, vec![])));
            Rig {
                sched,
                bridge: RecordingBridge::new(8000),
                timers: TimerQueue::new(),
                voices: FakeVoices::default(),
                view: ViewState::new(20),
            }
        }

        fn start(&mut self, gate: bool) -> Result<()> {
            let mut ctx = StepContext {
                now_ms: 0,
                timers: &mut self.timers,
                voices: &mut self.voices,
                view: &mut self.view,
            };
            self.bridge.start(&mut self.sched, &mut ctx, &mut Gate(gate))
        }

        fn stop(&mut self) -> Result<Recording> {
            let mut ctx = StepContext {
                now_ms: 0,
                timers: &mut self.timers,
                voices: &mut self.voices,
                view: &mut self.view,
            };
            self.bridge.stop(&mut self.sched, &mut ctx).cloned()
        }
    }

    #[test]
    fn start_requires_running_audio() {
        let mut rig = Rig::new(vec![NoteEvent::note("C4", 0.5)]);
        assert!(matches!(rig.start(false), Err(PianoError::RecorderFailure(_))));
        assert!(!rig.bridge.is_recording());
        assert!(!rig.view.is_recording);
        assert!(!rig.sched.is_playing());
    }

    #[test]
    fn start_begins_idle_playback() {
        let mut rig = Rig::new(vec![NoteEvent::note("C4", 0.5)]);
        rig.start(true).unwrap();
        assert!(rig.bridge.is_recording());
        assert!(rig.view.is_recording);
        assert!(rig.sched.is_playing());
        assert_eq!(rig.voices.timed_pitches(), vec!["C4"]);
    }

    #[test]
    fn recording_without_a_melody_still_captures() {
        let mut rig = Rig::new(vec![]);
        rig.start(true).unwrap();
        assert!(rig.bridge.is_recording());
        assert!(!rig.sched.is_playing());
    }

    #[test]
    fn stop_produces_wav_and_stops_playback() {
        let mut rig = Rig::new(vec![NoteEvent::note("C4", 0.5), NoteEvent::note("D4", 0.5)]);
        rig.start(true).unwrap();
        rig.bridge.capture(&[0.5; 800], &[-0.5; 800]);
        let rec = rig.stop().unwrap();
        assert_eq!(rec.frames, 800);
        assert_eq!(&rec.wav[0..4], b"RIFF");
        assert!(rec.wav.len() > 800 * 4);
        assert!((rec.duration_seconds() - 0.1).abs() < 1e-9);
        assert!(!rig.sched.is_playing());
        assert!(!rig.view.is_recording);
        assert_eq!(rig.bridge.last_recording(), Some(&rec));
    }

    #[test]
    fn capture_is_ignored_when_not_recording() {
        let mut rig = Rig::new(vec![NoteEvent::note("C4", 0.5)]);
        rig.bridge.capture(&[0.1; 64], &[0.1; 64]);
        assert_eq!(rig.bridge.captured_frames(), 0);
    }

    #[test]
    fn stop_without_recording_fails() {
        let mut rig = Rig::new(vec![NoteEvent::note("C4", 0.5)]);
        assert!(matches!(rig.stop(), Err(PianoError::RecorderFailure(_))));
        assert!(rig.view.debug_log.contains("none active"));
    }

    #[test]
    fn playback_end_finishes_recording() {
        let mut rig = Rig::new(vec![NoteEvent::note("C4", 0.5)]);
        rig.start(true).unwrap();
        let mut ctx = StepContext {
            now_ms: 500,
            timers: &mut rig.timers,
            voices: &mut rig.voices,
            view: &mut rig.view,
        };
        assert!(rig.bridge.on_playback_finished(&mut rig.sched, &mut ctx).unwrap().is_ok());
        assert!(!rig.bridge.is_recording());
        assert!(rig.bridge.take_recording().is_some());
        assert!(rig.bridge.on_playback_finished(&mut rig.sched, &mut ctx).is_none());
    }

    #[test]
    fn file_name_uses_style_and_date() {
        assert_eq!(suggested_file_name("jazz", "2024-05-01"), "melody_jazz_2024-05-01.wav");
        assert_eq!(suggested_file_name("  ", "2024-05-01"), "melody_piano_2024-05-01.wav");
    }
}
