//! Cooperative event kernel.
//!
//! The kernel owns the event queue and the [`Scheduler`] and holds
//! subscriptions to every [`EventReceiver`]. All work happens inside
//! [`Kernel::proc_idle_flags`], called in a tight loop by the composition
//! root. Each call runs, in this fixed order:
//!
//! 1. the scheduler, advanced by the time since the previous call;
//! 2. the event queue, drained FIFO. Events raised while dispatching are
//!    appended and handled in the same call until
//!    [`EVENT_QUEUE_CAPACITY`] events have been dispatched; the rest wait
//!    for the next call.
//!
//! Receivers are borrowed for the kernel's lifetime `'a`, so a subscription
//! can never outlive its receiver.

pub mod event;
pub mod queue;
pub mod receiver;
pub mod scheduler;

use core::cell::RefCell;

use embassy_time::{Duration, Instant};
use heapless::Vec;
use log::{debug, error, info, warn};

use crate::config::{EVENT_QUEUE_CAPACITY, MAX_SUBSCRIBERS};
use crate::error::{Error, Result};

pub use event::{Event, EventCode, EventFilter, PAYLOAD_BYTES, Payload, ReceiverId};
pub use queue::EventQueue;
pub use receiver::{Dispatch, EventReceiver, KernelContext};
pub use scheduler::{REPEAT_FOREVER, ScheduleControl, ScheduleHandle, Scheduler, SweepReport};

struct Subscription<'a> {
    id: ReceiverId,
    name: &'static str,
    filter: EventFilter,
    receiver: &'a RefCell<dyn EventReceiver + 'a>,
}

/// Counters kept for the event profiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    pub events_raised: u32,
    pub events_dispatched: u32,
    pub schedules_fired: u32,
    pub receiver_faults: u32,
    /// Events the kernel itself could not enqueue (scheduled raises, fault reports).
    pub events_dropped: u32,
}

/// What one call to [`Kernel::proc_idle_flags`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub schedules_fired: usize,
    pub events_dispatched: usize,
}

impl TickReport {
    /// Nothing fired and nothing was dispatched; the caller may sleep.
    pub const fn is_idle(&self) -> bool {
        self.schedules_fired == 0 && self.events_dispatched == 0
    }
}

pub struct Kernel<'a> {
    queue: EventQueue,
    scheduler: Scheduler<'a>,
    subscriptions: Vec<Subscription<'a>, MAX_SUBSCRIBERS>,
    next_id: u8,
    last_tick: Instant,
    stats: KernelStats,
}

impl<'a> Kernel<'a> {
    /// A kernel whose scheduler clock starts at `boot`.
    pub fn new(boot: Instant) -> Self {
        Self {
            queue: EventQueue::new(),
            scheduler: Scheduler::new(),
            subscriptions: Vec::new(),
            next_id: 0,
            last_tick: boot,
            stats: KernelStats::default(),
        }
    }

    /// Register a receiver with the filter it declares through
    /// [`EventReceiver::interests`].
    pub fn subscribe<R>(&mut self, receiver: &'a RefCell<R>) -> Result<ReceiverId>
    where
        R: EventReceiver + 'a,
    {
        let filter = receiver
            .try_borrow()
            .map(|r| r.interests())
            .map_err(|_| Error::ReceiverFault("busy during subscribe"))?;
        self.subscribe_filtered(receiver, filter)
    }

    /// Register a receiver with an explicit filter.
    pub fn subscribe_filtered<R>(
        &mut self,
        receiver: &'a RefCell<R>,
        filter: EventFilter,
    ) -> Result<ReceiverId>
    where
        R: EventReceiver + 'a,
    {
        let receiver: &'a RefCell<dyn EventReceiver + 'a> = receiver;
        if self
            .subscriptions
            .iter()
            .any(|s| core::ptr::addr_eq(s.receiver.as_ptr(), receiver.as_ptr()))
        {
            return Err(Error::AlreadySubscribed);
        }
        let name = receiver
            .try_borrow()
            .map(|r| r.name())
            .map_err(|_| Error::ReceiverFault("busy during subscribe"))?;

        if self.subscriptions.is_full() {
            return Err(Error::SubscriberCapacity);
        }
        let id = self.allocate_id();
        self.subscriptions
            .push(Subscription {
                id,
                name,
                filter,
                receiver,
            })
            .map_err(|_| Error::SubscriberCapacity)?;
        info!("Subscribed {} as receiver {}", name, id.0);
        Ok(id)
    }

    /// Next id not held by a live subscription.
    fn allocate_id(&mut self) -> ReceiverId {
        loop {
            let candidate = ReceiverId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.subscriptions.iter().any(|s| s.id == candidate) {
                return candidate;
            }
        }
    }

    /// Drop a subscription. Returns `false` if the id was unknown.
    pub fn unsubscribe(&mut self, id: ReceiverId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        before != self.subscriptions.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Enqueue an event from outside any receiver. Never blocks and never
    /// drops silently.
    pub fn raise_event(&mut self, event: Event) -> Result<()> {
        self.queue.raise(event)
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

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
        self.scheduler
            .create_schedule(period, repeat_count, autoenable, callback)
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

    pub fn scheduler(&self) -> &Scheduler<'a> {
        &self.scheduler
    }

    pub fn stats(&self) -> KernelStats {
        KernelStats {
            events_raised: self.queue.accepted(),
            ..self.stats
        }
    }

    /// The driving tick. Fires due schedules, then drains the queue.
    pub fn proc_idle_flags(&mut self, now: Instant) -> TickReport {
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        let sweep = self.scheduler.advance(elapsed, &mut self.queue);
        self.stats.schedules_fired = self.stats.schedules_fired.saturating_add(sweep.fired as u32);
        self.stats.events_dropped = self.stats.events_dropped.saturating_add(sweep.dropped as u32);

        let mut dispatched = 0;
        while dispatched < EVENT_QUEUE_CAPACITY {
            let Some(event) = self.queue.pop() else {
                break;
            };
            self.dispatch(&event);
            dispatched += 1;
        }
        if !self.queue.is_empty() {
            debug!("{} events deferred to next tick", self.queue.len());
        }
        self.stats.events_dispatched = self.stats.events_dispatched.saturating_add(dispatched as u32);

        TickReport {
            schedules_fired: sweep.fired,
            events_dispatched: dispatched,
        }
    }

    fn dispatch(&mut self, event: &Event) {
        let Self {
            queue,
            scheduler,
            subscriptions,
            stats,
            ..
        } = self;

        for sub in subscriptions.iter() {
            if !sub.filter.accepts(event.code()) {
                continue;
            }
            let mut ctx = KernelContext {
                queue: &mut *queue,
                scheduler: &mut *scheduler,
                current: sub.id,
            };
            let outcome = match sub.receiver.try_borrow_mut() {
                Ok(mut receiver) => receiver.notify(event, &mut ctx),
                Err(_) => Err(Error::ReceiverFault(sub.name)),
            };
            match outcome {
                Ok(Dispatch::Continue) => {}
                Ok(Dispatch::Consumed) => {
                    debug!("{:?} consumed by {}", event.code(), sub.name);
                    break;
                }
                Err(e) => report_fault(queue, stats, sub.name, event.code(), e),
            }
        }

        let Some(originator) = event.originator() else {
            return;
        };
        let Some(sub) = subscriptions.iter().find(|s| s.id == originator) else {
            return;
        };
        let mut ctx = KernelContext {
            queue: &mut *queue,
            scheduler: &mut *scheduler,
            current: sub.id,
        };
        let outcome = match sub.receiver.try_borrow_mut() {
            Ok(mut receiver) => receiver.callback(event, &mut ctx),
            Err(_) => Err(Error::ReceiverFault(sub.name)),
        };
        if let Err(e) = outcome {
            report_fault(queue, stats, sub.name, event.code(), e);
        }
    }
}

/// Log a receiver failure and announce it as a `ReceiverFault` event.
///
/// Failures while handling a `ReceiverFault` are only logged, so a receiver
/// that chokes on fault reports cannot feed itself.
fn report_fault(
    queue: &mut EventQueue,
    stats: &mut KernelStats,
    receiver: &'static str,
    code: EventCode,
    error: Error,
) {
    stats.receiver_faults = stats.receiver_faults.saturating_add(1);
    error!("Receiver {} faulted handling {:?}: {}", receiver, code, error);
    if code == EventCode::ReceiverFault {
        return;
    }
    let fault = Event::with_payload(
        EventCode::ReceiverFault,
        Payload::Fault {
            receiver,
            code,
            error,
        },
    );
    if queue.raise(fault).is_err() {
        warn!("Fault report for {} dropped: queue full", receiver);
        stats.events_dropped = stats.events_dropped.saturating_add(1);
    }
}

#[cfg(test)]
mod tests;
