extern crate alloc;
use alloc::vec::Vec;

use core::cell::{Cell, RefCell};

use super::*;
use crate::config::SCHEDULER_MAX_SKIP_BEFORE_RESET;

struct Recorder {
    name: &'static str,
    filter: EventFilter,
    consume: bool,
    seen: Vec<EventCode>,
    callbacks: Vec<EventCode>,
    /// Raise this code the first time a `Boot` arrives.
    on_boot: Option<EventCode>,
}

impl Recorder {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            filter: EventFilter::ALL,
            consume: false,
            seen: Vec::new(),
            callbacks: Vec::new(),
            on_boot: None,
        }
    }

    fn filtered(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    fn consuming(mut self) -> Self {
        self.consume = true;
        self
    }

    fn raising_on_boot(mut self, code: EventCode) -> Self {
        self.on_boot = Some(code);
        self
    }
}

impl EventReceiver for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn interests(&self) -> EventFilter {
        self.filter
    }

    fn notify(&mut self, event: &Event, ctx: &mut KernelContext<'_, '_>) -> Result<Dispatch> {
        self.seen.push(event.code());
        if event.code() == EventCode::Boot {
            if let Some(code) = self.on_boot.take() {
                ctx.raise_event(Event::new(code))?;
            }
        }
        Ok(if self.consume {
            Dispatch::Consumed
        } else {
            Dispatch::Continue
        })
    }

    fn callback(&mut self, event: &Event, _ctx: &mut KernelContext<'_, '_>) -> Result<()> {
        self.callbacks.push(event.code());
        Ok(())
    }
}

/// Fails on every event it is handed.
struct Broken;

impl EventReceiver for Broken {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn notify(&mut self, _event: &Event, _ctx: &mut KernelContext<'_, '_>) -> Result<Dispatch> {
        Err(Error::TelemetryReadFailure(crate::error::TelemetrySource::Charger))
    }
}

/// Re-raises every tick event it sees.
struct Echo;

impl EventReceiver for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn interests(&self) -> EventFilter {
        EventFilter::of(&[EventCode::PmuTick])
    }

    fn notify(&mut self, event: &Event, ctx: &mut KernelContext<'_, '_>) -> Result<Dispatch> {
        ctx.raise_event(Event::new(event.code()))?;
        Ok(Dispatch::Continue)
    }
}

/// Disables a schedule when it sees a `ChargerAlert`.
struct Switch {
    handle: Option<ScheduleHandle>,
}

impl EventReceiver for Switch {
    fn name(&self) -> &'static str {
        "switch"
    }

    fn notify(&mut self, event: &Event, ctx: &mut KernelContext<'_, '_>) -> Result<Dispatch> {
        if let (EventCode::ChargerAlert, Some(handle)) = (event.code(), self.handle) {
            ctx.enable_schedule(handle, false)?;
        }
        Ok(Dispatch::Continue)
    }
}

fn at(millis: u64) -> Instant {
    Instant::from_millis(millis)
}

#[test]
fn test_empty_tick_is_idle() {
    let recorder = RefCell::new(Recorder::new("rec"));
    let mut kernel = Kernel::new(at(0));
    let report = kernel.proc_idle_flags(at(10));
    assert!(report.is_idle());
    assert_eq!(kernel.stats(), KernelStats::default());

    kernel.subscribe(&recorder).unwrap();
    kernel
        .create_event_schedule(Duration::from_secs(1), REPEAT_FOREVER, true, EventCode::PmuTick)
        .unwrap();
    assert!(kernel.proc_idle_flags(at(20)).is_idle());
    assert!(kernel.proc_idle_flags(at(30)).is_idle());
    assert!(recorder.borrow().seen.is_empty());
}

#[test]
fn test_double_subscribe_is_rejected() {
    let recorder = RefCell::new(Recorder::new("rec"));
    let mut kernel = Kernel::new(at(0));
    kernel.subscribe(&recorder).unwrap();
    assert_eq!(kernel.subscribe(&recorder), Err(Error::AlreadySubscribed));
    assert_eq!(kernel.subscriber_count(), 1);
}

#[test]
fn test_subscriber_table_is_bounded() {
    let receivers: Vec<RefCell<Recorder>> = (0..=MAX_SUBSCRIBERS)
        .map(|_| RefCell::new(Recorder::new("rec")))
        .collect();
    let mut kernel = Kernel::new(at(0));
    for receiver in receivers.iter().take(MAX_SUBSCRIBERS) {
        kernel.subscribe(receiver).unwrap();
    }
    assert_eq!(
        kernel.subscribe(&receivers[MAX_SUBSCRIBERS]),
        Err(Error::SubscriberCapacity)
    );
}

#[test]
fn test_events_are_dispatched_in_order_to_matching_receivers() {
    let everything = RefCell::new(Recorder::new("all"));
    let alerts = RefCell::new(
        Recorder::new("alerts").filtered(EventFilter::of(&[
            EventCode::ChargerAlert,
            EventCode::GasGaugeAlert,
        ])),
    );
    let mut kernel = Kernel::new(at(0));
    kernel.subscribe(&everything).unwrap();
    kernel.subscribe(&alerts).unwrap();

    kernel.raise_event(Event::new(EventCode::Boot)).unwrap();
    kernel.raise_event(Event::new(EventCode::GasGaugeAlert)).unwrap();
    kernel.raise_event(Event::new(EventCode::ChargerAlert)).unwrap();

    let report = kernel.proc_idle_flags(at(1));
    assert_eq!(report.events_dispatched, 3);
    assert_eq!(
        everything.borrow().seen,
        [EventCode::Boot, EventCode::GasGaugeAlert, EventCode::ChargerAlert]
    );
    assert_eq!(
        alerts.borrow().seen,
        [EventCode::GasGaugeAlert, EventCode::ChargerAlert]
    );
}

#[test]
fn test_consumed_event_stops_propagating() {
    let first = RefCell::new(Recorder::new("first").consuming());
    let second = RefCell::new(Recorder::new("second"));
    let mut kernel = Kernel::new(at(0));
    kernel.subscribe(&first).unwrap();
    kernel.subscribe(&second).unwrap();

    kernel.raise_event(Event::new(EventCode::PowerReportRequest)).unwrap();
    kernel.proc_idle_flags(at(1));
    assert_eq!(first.borrow().seen, [EventCode::PowerReportRequest]);
    assert!(second.borrow().seen.is_empty());
}

#[test]
fn test_faulty_receiver_does_not_block_others() {
    let broken = RefCell::new(Broken);
    let recorder = RefCell::new(Recorder::new("rec"));
    let mut kernel = Kernel::new(at(0));
    kernel.subscribe(&broken).unwrap();
    kernel.subscribe(&recorder).unwrap();

    kernel.raise_event(Event::new(EventCode::PmuTick)).unwrap();
    kernel.raise_event(Event::new(EventCode::PmuTick)).unwrap();
    let report = kernel.proc_idle_flags(at(1));

    // Two ticks plus one fault report each. Faults raised while handling a
    // fault report are not re-reported.
    assert_eq!(report.events_dispatched, 4);
    assert_eq!(
        recorder.borrow().seen,
        [
            EventCode::PmuTick,
            EventCode::PmuTick,
            EventCode::ReceiverFault,
            EventCode::ReceiverFault
        ]
    );
    assert_eq!(kernel.pending_events(), 0);
    assert_eq!(kernel.stats().receiver_faults, 4);
}

#[test]
fn test_fault_event_names_the_receiver() {
    struct Inspector(Vec<Payload>);
    impl EventReceiver for Inspector {
        fn name(&self) -> &'static str {
            "inspector"
        }
        fn interests(&self) -> EventFilter {
            EventFilter::of(&[EventCode::ReceiverFault])
        }
        fn notify(&mut self, event: &Event, _ctx: &mut KernelContext<'_, '_>) -> Result<Dispatch> {
            self.0.push(event.payload().clone());
            Ok(Dispatch::Continue)
        }
    }

    let broken = RefCell::new(Broken);
    let inspector = RefCell::new(Inspector(Vec::new()));
    let mut kernel = Kernel::new(at(0));
    kernel
        .subscribe_filtered(&broken, EventFilter::of(&[EventCode::Boot]))
        .unwrap();
    kernel.subscribe(&inspector).unwrap();

    kernel.raise_event(Event::new(EventCode::Boot)).unwrap();
    kernel.proc_idle_flags(at(1));

    assert_eq!(
        inspector.borrow().0,
        [Payload::Fault {
            receiver: "broken",
            code: EventCode::Boot,
            error: Error::TelemetryReadFailure(crate::error::TelemetrySource::Charger),
        }]
    );
}

#[test]
fn test_busy_receiver_is_reported_as_fault() {
    let recorder = RefCell::new(Recorder::new("rec"));
    let mut kernel = Kernel::new(at(0));
    kernel.subscribe(&recorder).unwrap();
    kernel.raise_event(Event::new(EventCode::Boot)).unwrap();

    {
        let _held = recorder.borrow_mut();
        kernel.proc_idle_flags(at(1));
    }
    // Boot failed, then the fault report itself failed and was only logged.
    assert_eq!(kernel.stats().receiver_faults, 2);
    assert!(recorder.borrow().seen.is_empty());
    assert_eq!(kernel.pending_events(), 0);
}

#[test]
fn test_events_raised_during_dispatch_run_in_same_tick() {
    let recorder = RefCell::new(Recorder::new("rec").raising_on_boot(EventCode::PowerReportRequest));
    let mut kernel = Kernel::new(at(0));
    kernel.subscribe(&recorder).unwrap();
    kernel.raise_event(Event::new(EventCode::Boot)).unwrap();

    let report = kernel.proc_idle_flags(at(1));
    assert_eq!(report.events_dispatched, 2);
    assert_eq!(
        recorder.borrow().seen,
        [EventCode::Boot, EventCode::PowerReportRequest]
    );
    // The originator hears back once its own event finished propagating.
    assert_eq!(recorder.borrow().callbacks, [EventCode::PowerReportRequest]);
}

#[test]
fn test_self_feeding_receiver_is_bounded_per_tick() {
    let echo = RefCell::new(Echo);
    let mut kernel = Kernel::new(at(0));
    kernel.subscribe(&echo).unwrap();
    kernel.raise_event(Event::new(EventCode::PmuTick)).unwrap();

    let report = kernel.proc_idle_flags(at(1));
    assert_eq!(report.events_dispatched, EVENT_QUEUE_CAPACITY);
    assert_eq!(kernel.pending_events(), 1);

    let report = kernel.proc_idle_flags(at(2));
    assert_eq!(report.events_dispatched, EVENT_QUEUE_CAPACITY);
}

#[test]
fn test_full_queue_is_reported_to_caller() {
    let mut kernel = Kernel::new(at(0));
    for _ in 0..EVENT_QUEUE_CAPACITY {
        kernel.raise_event(Event::new(EventCode::PmuTick)).unwrap();
    }
    assert_eq!(
        kernel.raise_event(Event::new(EventCode::Boot)),
        Err(Error::QueueFull)
    );
    assert_eq!(kernel.stats().events_raised, EVENT_QUEUE_CAPACITY as u32);
}

#[test]
fn test_scheduled_events_are_seen_in_the_same_tick() {
    let recorder = RefCell::new(Recorder::new("rec"));
    let mut kernel = Kernel::new(at(0));
    kernel.subscribe(&recorder).unwrap();
    kernel
        .create_event_schedule(Duration::from_millis(500), REPEAT_FOREVER, true, EventCode::PmuTick)
        .unwrap();

    let report = kernel.proc_idle_flags(at(500));
    assert_eq!(report.schedules_fired, 1);
    assert_eq!(report.events_dispatched, 1);
    assert_eq!(recorder.borrow().seen, [EventCode::PmuTick]);
}

#[test]
fn test_late_tick_fires_schedule_once() {
    let fired = Cell::new(0u32);
    let mut kernel = Kernel::new(at(0));
    kernel
        .create_schedule(Duration::from_millis(40), REPEAT_FOREVER, true, || {
            fired.set(fired.get() + 1);
            ScheduleControl::Continue
        })
        .unwrap();

    let late = 40 * (SCHEDULER_MAX_SKIP_BEFORE_RESET + 3);
    let report = kernel.proc_idle_flags(at(late));
    assert_eq!(report.schedules_fired, 1);
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_receiver_can_disable_a_schedule() {
    let fired = Cell::new(0u32);
    let switch = RefCell::new(Switch { handle: None });
    let mut kernel = Kernel::new(at(0));
    let handle = kernel
        .create_schedule(Duration::from_millis(10), REPEAT_FOREVER, true, || {
            fired.set(fired.get() + 1);
            ScheduleControl::Continue
        })
        .unwrap();
    switch.borrow_mut().handle = Some(handle);
    kernel.subscribe(&switch).unwrap();

    kernel.proc_idle_flags(at(10));
    assert_eq!(fired.get(), 1);

    kernel.raise_event(Event::new(EventCode::ChargerAlert)).unwrap();
    kernel.proc_idle_flags(at(20));
    // The schedule fires before the alert is drained, then stays quiet.
    assert_eq!(fired.get(), 2);
    kernel.proc_idle_flags(at(100));
    assert_eq!(fired.get(), 2);
    assert_eq!(kernel.scheduler().is_enabled(handle), Some(false));
}

#[test]
fn test_unsubscribed_receiver_gets_nothing() {
    let recorder = RefCell::new(Recorder::new("rec"));
    let mut kernel = Kernel::new(at(0));
    let id = kernel.subscribe(&recorder).unwrap();
    assert!(kernel.unsubscribe(id));
    assert!(!kernel.unsubscribe(id));

    kernel.raise_event(Event::new(EventCode::Boot)).unwrap();
    kernel.proc_idle_flags(at(1));
    assert!(recorder.borrow().seen.is_empty());
}

#[test]
fn test_receiver_ids_skip_live_subscriptions_after_wrapping() {
    let a = RefCell::new(
        Recorder::new("a")
            .filtered(EventFilter::of(&[EventCode::Boot]))
            .raising_on_boot(EventCode::PmuTick),
    );
    let b = RefCell::new(Recorder::new("b"));
    let c = RefCell::new(Recorder::new("c").filtered(EventFilter::NONE));
    let mut kernel = Kernel::new(at(0));

    let a_id = kernel.subscribe(&a).unwrap();
    for _ in 0..u8::MAX {
        let b_id = kernel.subscribe(&b).unwrap();
        assert!(kernel.unsubscribe(b_id));
    }
    let c_id = kernel.subscribe(&c).unwrap();
    assert_ne!(a_id, c_id);

    // The originator callback still reaches `a`, not the newcomer.
    kernel.raise_event(Event::new(EventCode::Boot)).unwrap();
    kernel.proc_idle_flags(at(1));
    assert_eq!(a.borrow().callbacks, [EventCode::PmuTick]);
    assert!(c.borrow().callbacks.is_empty());

    assert!(kernel.unsubscribe(c_id));
    assert_eq!(kernel.subscriber_count(), 1);
}
