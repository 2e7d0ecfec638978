//! Timed callbacks driven by the kernel tick.
//!
//! Every enabled entry accumulates the time passed to [`Scheduler::advance`]
//! and fires once per elapsed period. When a tick arrives so late that more
//! than [`SCHEDULER_MAX_SKIP_BEFORE_RESET`] periods were missed, the entry
//! fires once and starts a fresh period instead of bursting.

use alloc::boxed::Box;

use embassy_time::Duration;
use heapless::Vec;
use log::{debug, warn};

use super::event::{Event, EventCode};
use super::queue::EventQueue;
use crate::config::{MAX_SCHEDULES, SCHEDULER_MAX_SKIP_BEFORE_RESET};
use crate::error::{Error, Result};

/// Repeat count meaning "never expire".
pub const REPEAT_FOREVER: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleHandle(u16);

impl ScheduleHandle {
    pub const fn id(self) -> u16 {
        self.0
    }
}

/// What a callback wants done with its own entry after it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleControl {
    Continue,
    /// Stop firing but keep the entry and its phase.
    Disable,
    /// Drop the entry once the current sweep completes.
    Remove,
}

enum ScheduleAction<'a> {
    Callback(Box<dyn FnMut() -> ScheduleControl + 'a>),
    Raise(EventCode),
}

struct ScheduleEntry<'a> {
    handle: ScheduleHandle,
    period: Duration,
    repeat_count: i32,
    enabled: bool,
    accumulated: Duration,
    action: ScheduleAction<'a>,
    retired: bool,
}

impl ScheduleEntry<'_> {
    fn run(&mut self, queue: &mut EventQueue, report: &mut SweepReport) -> ScheduleControl {
        report.fired += 1;
        match &mut self.action {
            ScheduleAction::Callback(callback) => callback(),
            ScheduleAction::Raise(code) => {
                if queue.raise(Event::new(*code)).is_err() {
                    warn!(
                        "Schedule {} could not raise {:?}: queue full",
                        self.handle.0, code
                    );
                    report.dropped += 1;
                }
                ScheduleControl::Continue
            }
        }
    }

    /// Count one fire against the repeat budget.
    fn consume_repeat(&mut self) {
        if self.repeat_count > 0 {
            self.repeat_count -= 1;
            if self.repeat_count == 0 {
                self.retired = true;
            }
        }
    }
}

/// Outcome of one scheduler sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub fired: usize,
    /// Events a schedule could not enqueue.
    pub dropped: usize,
}

pub struct Scheduler<'a> {
    entries: Vec<ScheduleEntry<'a>, MAX_SCHEDULES>,
    next_handle: u16,
}

impl<'a> Scheduler<'a> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_handle: 0,
        }
    }

    /// Register a callback fired every `period`.
    ///
    /// `repeat_count < 0` repeats forever; otherwise the entry is destroyed
    /// after that many fires. `autoenable` decides whether it starts armed.
    pub fn create_schedule<F>(
        &mut self,
        period: Duration,
        repeat_count: i32,
        autoenable: bool,
        callback: F,
    ) -> Result<ScheduleHandle>
    where
        F: FnMut() -> ScheduleControl + 'a,
    {
        self.insert(
            period,
            repeat_count,
            autoenable,
            ScheduleAction::Callback(Box::new(callback)),
        )
    }

    /// Register an entry that raises `code` on the kernel queue every `period`.
    pub fn create_event_schedule(
        &mut self,
        period: Duration,
        repeat_count: i32,
        autoenable: bool,
        code: EventCode,
    ) -> Result<ScheduleHandle> {
        self.insert(period, repeat_count, autoenable, ScheduleAction::Raise(code))
    }

    fn insert(
        &mut self,
        period: Duration,
        repeat_count: i32,
        autoenable: bool,
        action: ScheduleAction<'a>,
    ) -> Result<ScheduleHandle> {
        if period.as_ticks() == 0 || repeat_count == 0 {
            return Err(Error::InvalidSchedule);
        }
        if self.entries.is_full() {
            return Err(Error::ScheduleCapacity);
        }
        let handle = self.allocate_handle();
        let entry = ScheduleEntry {
            handle,
            period,
            repeat_count,
            enabled: autoenable,
            accumulated: Duration::from_ticks(0),
            action,
            retired: false,
        };
        self.entries
            .push(entry)
            .map_err(|_| Error::ScheduleCapacity)?;
        debug!(
            "Created schedule {} every {}ms (repeat {})",
            handle.0,
            period.as_millis(),
            repeat_count
        );
        Ok(handle)
    }

    /// Next handle not held by a live entry. The table is far smaller than
    /// the handle space, so the search always ends.
    fn allocate_handle(&mut self) -> ScheduleHandle {
        loop {
            let candidate = ScheduleHandle(self.next_handle);
            self.next_handle = self.next_handle.wrapping_add(1);
            if !self.entries.iter().any(|e| e.handle == candidate) {
                return candidate;
            }
        }
    }

    fn entry_mut(&mut self, handle: ScheduleHandle) -> Result<&mut ScheduleEntry<'a>> {
        self.entries
            .iter_mut()
            .find(|e| e.handle == handle && !e.retired)
            .ok_or(Error::UnknownSchedule(handle.0))
    }

    fn entry(&self, handle: ScheduleHandle) -> Option<&ScheduleEntry<'a>> {
        self.entries
            .iter()
            .find(|e| e.handle == handle && !e.retired)
    }

    /// Arm or disarm an entry. The accumulated phase survives.
    pub fn enable_schedule(&mut self, handle: ScheduleHandle, enabled: bool) -> Result<()> {
        self.entry_mut(handle)?.enabled = enabled;
        Ok(())
    }

    /// Restart the current period from zero.
    pub fn reset_schedule(&mut self, handle: ScheduleHandle) -> Result<()> {
        self.entry_mut(handle)?.accumulated = Duration::from_ticks(0);
        Ok(())
    }

    pub fn remove_schedule(&mut self, handle: ScheduleHandle) -> Result<()> {
        let index = self
            .entries
            .iter()
            .position(|e| e.handle == handle && !e.retired)
            .ok_or(Error::UnknownSchedule(handle.0))?;
        self.entries.remove(index);
        Ok(())
    }

    pub fn is_enabled(&self, handle: ScheduleHandle) -> Option<bool> {
        self.entry(handle).map(|e| e.enabled)
    }

    /// Fires left before the entry expires; negative means unlimited.
    pub fn repeat_count(&self, handle: ScheduleHandle) -> Option<i32> {
        self.entry(handle).map(|e| e.repeat_count)
    }

    pub fn contains(&self, handle: ScheduleHandle) -> bool {
        self.entry(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advance every enabled entry by `elapsed` and fire the ones that are due.
    pub fn advance(&mut self, elapsed: Duration, queue: &mut EventQueue) -> SweepReport {
        let mut report = SweepReport::default();

        for entry in self.entries.iter_mut() {
            if !entry.enabled || entry.retired {
                continue;
            }
            let period = entry.period.as_ticks();
            let accumulated = entry.accumulated.as_ticks().saturating_add(elapsed.as_ticks());
            let due = accumulated / period;
            if due == 0 {
                entry.accumulated = Duration::from_ticks(accumulated);
                continue;
            }

            // On reset the accumulator restarts from zero; otherwise each fire
            // consumes one period and unfired periods stay as phase.
            let (runs, mut remaining) = if due > SCHEDULER_MAX_SKIP_BEFORE_RESET {
                warn!(
                    "Schedule {} missed {} periods, resetting",
                    entry.handle.0, due
                );
                (1, 0)
            } else {
                (due, accumulated)
            };

            for _ in 0..runs {
                remaining = remaining.saturating_sub(period);
                let control = entry.run(queue, &mut report);
                entry.consume_repeat();
                match control {
                    ScheduleControl::Continue => {}
                    ScheduleControl::Disable => entry.enabled = false,
                    ScheduleControl::Remove => entry.retired = true,
                }
                if entry.retired || !entry.enabled {
                    break;
                }
            }
            entry.accumulated = Duration::from_ticks(remaining);
        }

        self.entries.retain(|e| !e.retired);
        report
    }
}

impl Default for Scheduler<'_> {
    fn default() -> Self {
        Self::new()
    }
}
