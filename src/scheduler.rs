//! Picks the next alarm to ring and keeps a single timer armed for it.
//!
//! The scheduler itself is synchronous, it is told the current time and
//! driven by [`crate::service::SchedulerService`] which owns the timer thread.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};

use crate::{
    alarm::{Alarm, AlarmId},
    registry::AlarmRegistry,
};

/// Whatever makes the noise when an alarm rings.
///
/// Called from the scheduler thread, implementations must hand off anything slow.
pub trait RingSink: Send {
    fn ring(&self, alarm: &Alarm);
}

impl<F> RingSink for F
where
    F: Fn(&Alarm) + Send,
{
    fn ring(&self, alarm: &Alarm) {
        self(alarm);
    }
}

/// how far ahead a timer may be armed, the clock is not trusted beyond that
pub const DEFAULT_LOOKAHEAD_MINUTES: u32 = 1;

/// the one outstanding timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer {
    pub alarm_id: AlarmId,
    pub at: DateTime<Local>,
    /// how long from arming until `at`
    pub delay: Duration,
}

pub struct Scheduler<R> {
    registry: Arc<AlarmRegistry>,
    sink: R,
    lookahead_minutes: u32,
    armed: Option<ArmedTimer>,
}

impl<R> std::fmt::Debug for Scheduler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("lookahead_minutes", &self.lookahead_minutes)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl<R: RingSink> Scheduler<R> {
    #[must_use]
    pub fn new(registry: Arc<AlarmRegistry>, sink: R, lookahead_minutes: u32) -> Self {
        Self {
            registry,
            sink,
            lookahead_minutes,
            armed: None,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<AlarmRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn armed(&self) -> Option<&ArmedTimer> {
        self.armed.as_ref()
    }

    /// drops the pending timer and releases its alarm so it can be picked again
    pub fn cancel_all(&mut self) {
        if let Some(timer) = self.armed.take() {
            log::debug!("cancelled timer for alarm {}", timer.alarm_id);
            self.registry.mark_scheduled(timer.alarm_id, false);
        }
    }

    /// Cancels whatever is pending and arms a timer for the next alarm due
    /// within the lookahead window. Stays idle if there is none.
    pub fn arm(&mut self, now: &DateTime<Local>) -> Option<ArmedTimer> {
        self.cancel_all();
        let next = self.registry.get_next_ring(now, self.lookahead_minutes)?;
        let alarm_id = next.alarm.id();
        let delay = match (next.at - *now).to_std() {
            Ok(delay) => delay,
            Err(e) => {
                // the clock moved under us, the next tick or mutation tries again
                log::warn!("couldn't arm alarm {alarm_id} for {}: {e}", next.at);
                return None;
            }
        };
        self.registry.mark_scheduled(alarm_id, true);
        let timer = ArmedTimer {
            alarm_id,
            at: next.at,
            delay,
        };
        log::info!("armed alarm {alarm_id} ({}) for {}", next.alarm.name, next.at);
        self.armed = Some(timer);
        Some(timer)
    }

    /// Rings every alarm due at `now`, not only the armed one, then re-arms.
    /// Returns the ids that rang.
    pub fn fire(&mut self, now: &DateTime<Local>) -> Vec<AlarmId> {
        let fired = self.armed.take();
        if let Some(timer) = &fired {
            log::debug!("timer for alarm {} fired", timer.alarm_id);
        }
        let rung = self.ring_due(now);
        if let Some(timer) = fired {
            if !rung.contains(&timer.alarm_id) {
                // fired without being due (clock change), don't leave it stuck as scheduled
                self.registry.mark_scheduled(timer.alarm_id, false);
            }
        }
        self.arm(now);
        rung
    }

    fn ring_due(&self, now: &DateTime<Local>) -> Vec<AlarmId> {
        let mut rung = Vec::new();
        for alarm in self.registry.get_all() {
            if !alarm.should_ring(now) {
                continue;
            }
            log::info!("ringing alarm {} ({})", alarm.id(), alarm.name);
            self.sink.ring(&alarm);
            self.registry
                .modify(alarm.id(), |alarm| alarm.set_scheduled(false));
            rung.push(alarm.id());
        }
        rung
    }
}
