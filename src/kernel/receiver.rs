//! The capability every kernel-driven component implements.

use embassy_time::Duration;

use super::event::{Event, EventCode, EventFilter, ReceiverId};
use super::queue::EventQueue;
use super::scheduler::{ScheduleHandle, Scheduler};
use crate::error::Result;

/// Whether an event should keep propagating after a receiver saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// Claim exclusive consumption; later receivers do not see the event.
    Consumed,
}

/// A component the kernel dispatches events to.
///
/// Handlers must not panic. Anything that goes wrong is returned as an
/// `Err`, which the kernel turns into a `ReceiverFault` event before moving
/// on to the next receiver.
pub trait EventReceiver {
    /// Short name used in logs and fault reports.
    fn name(&self) -> &'static str;

    /// Event codes this receiver wants. Read once, at subscription.
    fn interests(&self) -> EventFilter {
        EventFilter::ALL
    }

    /// Called for every queued event that passes the filter.
    fn notify(&mut self, event: &Event, ctx: &mut KernelContext<'_, '_>) -> Result<Dispatch>;

    /// Called on the originator once its event has finished propagating.
    fn callback(&mut self, _event: &Event, _ctx: &mut KernelContext<'_, '_>) -> Result<()> {
        Ok(())
    }
}

/// Kernel services available to a receiver while it handles an event.
pub struct KernelContext<'k, 'a> {
    pub(crate) queue: &'k mut EventQueue,
    pub(crate) scheduler: &'k mut Scheduler<'a>,
    pub(crate) current: ReceiverId,
}

impl<'k, 'a> KernelContext<'k, 'a> {
    /// The receiver being dispatched to.
    pub fn receiver_id(&self) -> ReceiverId {
        self.current
    }

    /// Queue an event with this receiver as originator. It is appended to the
    /// tail and may still be handled in the current tick.
    pub fn raise_event(&mut self, event: Event) -> Result<()> {
        self.queue.raise(event.from_originator(self.current))
    }

    pub fn create_event_schedule(
        &mut self,
        period: Duration,
        repeat_count: i32,
        autoenable: bool,
        code: EventCode,
    ) -> Result<ScheduleHandle> {
        self.scheduler
            .create_event_schedule(period, repeat_count, autoenable, code)
    }

    pub fn enable_schedule(&mut self, handle: ScheduleHandle, enabled: bool) -> Result<()> {
        self.scheduler.enable_schedule(handle, enabled)
    }

    pub fn reset_schedule(&mut self, handle: ScheduleHandle) -> Result<()> {
        self.scheduler.reset_schedule(handle)
    }

    pub fn remove_schedule(&mut self, handle: ScheduleHandle) -> Result<()> {
        self.scheduler.remove_schedule(handle)
    }
}
