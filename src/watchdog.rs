//! Stall detector and failsafe.
//!
//! Two watchdogs sit beside the scheduler and nudge it when the advance chain
//! breaks. The stall check fires once the cursor has gone longer than the
//! threshold without an advance. The failsafe fires on a fixed period and
//! steps the cursor if its index has not moved since the previous check. Both
//! go through [`Scheduler::force_advance`], so the single-pending-timer rule
//! holds.

use log::warn;

use crate::config::WatchdogConfig;
use crate::scheduler::{Scheduler, StepContext, StepOutcome};
use crate::timer::{TimerId, TimerKind, TimerQueue};

const TARGET: &str = "skyline_piano::watchdog";

#[derive(Debug, Clone)]
pub struct StallDetector {
    config: WatchdogConfig,
    stall_timer: Option<TimerId>,
    failsafe_timer: Option<TimerId>,
    /// Cursor index seen at the previous failsafe check.
    last_seen_index: i64,
}

impl StallDetector {
    pub fn new(config: WatchdogConfig) -> Self {
        StallDetector {
            config,
            stall_timer: None,
            failsafe_timer: None,
            last_seen_index: -1,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.stall_timer.is_some() || self.failsafe_timer.is_some()
    }

    /// (Re)start both watchdogs from the scheduler's current state.
    pub fn arm(&mut self, scheduler: &Scheduler, now_ms: u64, timers: &mut TimerQueue) {
        self.disarm(timers);
        self.schedule_stall_check(scheduler, now_ms, timers);
        self.last_seen_index = scheduler.cursor().note_index;
        self.failsafe_timer =
            Some(timers.schedule(now_ms, self.config.failsafe_interval_ms, TimerKind::Failsafe));
    }

    pub fn disarm(&mut self, timers: &mut TimerQueue) {
        if let Some(id) = self.stall_timer.take() {
            timers.cancel(id);
        }
        if let Some(id) = self.failsafe_timer.take() {
            timers.cancel(id);
        }
    }

    /// Deadline is the first millisecond at which the cursor counts as stalled.
    fn schedule_stall_check(&mut self, scheduler: &Scheduler, now_ms: u64, timers: &mut TimerQueue) {
        let stalled_at = scheduler
            .cursor()
            .last_advance_ms
            .saturating_add(self.config.stall_threshold_ms + 1);
        let delay = stalled_at.saturating_sub(now_ms).max(1);
        self.stall_timer = Some(timers.schedule(now_ms, delay, TimerKind::StallCheck));
    }

    /// Handle a fired stall check. Returns the forced step, if any.
    pub fn on_stall_check(
        &mut self,
        id: TimerId,
        scheduler: &mut Scheduler,
        ctx: &mut StepContext<'_>,
    ) -> Option<StepOutcome> {
        if self.stall_timer != Some(id) {
            return None;
        }
        self.stall_timer = None;
        if !scheduler.is_playing() {
            return None;
        }

        let since = ctx.now_ms.saturating_sub(scheduler.cursor().last_advance_ms);
        let forced = if since > self.config.stall_threshold_ms {
            let index = scheduler.cursor().note_index;
            warn!(target: TARGET, "no advance for {since} ms at idx={index}; forcing");
            ctx.view.playback_issue_detected = true;
            ctx.view
                .debug(ctx.now_ms, format!("Playback stalled for {since} ms at idx={index}"));
            Some(scheduler.force_advance(ctx))
        } else {
            None
        };

        if scheduler.is_playing() {
            self.schedule_stall_check(scheduler, ctx.now_ms, ctx.timers);
        }
        forced
    }

    /// Handle a fired failsafe. Returns the forced step, if any.
    pub fn on_failsafe(
        &mut self,
        id: TimerId,
        scheduler: &mut Scheduler,
        ctx: &mut StepContext<'_>,
    ) -> Option<StepOutcome> {
        if self.failsafe_timer != Some(id) {
            return None;
        }
        self.failsafe_timer = None;
        if !scheduler.is_playing() {
            return None;
        }

        let index = scheduler.cursor().note_index;
        let last = scheduler.note_count() as i64 - 1;
        let forced = if index == self.last_seen_index && (0..last).contains(&index) {
            warn!(target: TARGET, "failsafe: cursor stuck at idx={index}");
            ctx.view.debug(ctx.now_ms, format!("Failsafe: stuck at idx={index}, advancing"));
            Some(scheduler.force_advance(ctx))
        } else {
            None
        };

        self.last_seen_index = scheduler.cursor().note_index;
        if scheduler.is_playing() {
            self.failsafe_timer = Some(ctx.timers.schedule(
                ctx.now_ms,
                self.config.failsafe_interval_ms,
                TimerKind::Failsafe,
            ));
        }
        forced
    }
}
