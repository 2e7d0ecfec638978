//! Typed events routed by the kernel.

use heapless::Vec;

use crate::error::Error;
use crate::pmu::{ChargeState, PowerReport};

/// Maximum size of an opaque byte payload.
pub const PAYLOAD_BYTES: usize = 16;

/// Identity handed out by [`Kernel::subscribe`](super::Kernel::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverId(pub(crate) u8);

impl ReceiverId {
    pub const fn index(self) -> u8 {
        self.0
    }
}

/// Event catalog used by the power board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventCode {
    /// Raised once by the composition root after wiring.
    Boot = 0,
    /// Periodic re-evaluation tick for the power supervisor.
    PmuTick = 1,
    /// Charger status pin changed.
    ChargerAlert = 2,
    /// Gas gauge alert pin asserted.
    GasGaugeAlert = 3,
    /// The charge state moved.
    PowerStateChanged = 4,
    /// Someone (usually the console) wants a status report.
    PowerReportRequest = 5,
    PowerReport = 6,
    /// A regulator pin rejected a write.
    RegulatorFault = 7,
    /// A receiver failed while handling an event.
    ReceiverFault = 8,
}

impl EventCode {
    const fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// Set of event codes a receiver wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter(u32);

impl EventFilter {
    pub const ALL: Self = Self(u32::MAX);
    pub const NONE: Self = Self(0);

    pub const fn of(codes: &[EventCode]) -> Self {
        let mut mask = 0;
        let mut i = 0;
        while i < codes.len() {
            mask |= codes[i].bit();
            i += 1;
        }
        Self(mask)
    }

    pub const fn with(self, code: EventCode) -> Self {
        Self(self.0 | code.bit())
    }

    pub const fn accepts(self, code: EventCode) -> bool {
        self.0 & code.bit() != 0
    }
}

/// Typed payload carried by an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Transition {
        from: ChargeState,
        to: ChargeState,
        report: PowerReport,
    },
    Report(PowerReport),
    Error(Error),
    Fault {
        receiver: &'static str,
        code: EventCode,
        error: Error,
    },
    Bytes(Vec<u8, PAYLOAD_BYTES>),
}

/// A message in the kernel queue. Immutable once raised.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    code: EventCode,
    originator: Option<ReceiverId>,
    payload: Payload,
}

impl Event {
    pub const fn new(code: EventCode) -> Self {
        Self {
            code,
            originator: None,
            payload: Payload::None,
        }
    }

    pub const fn with_payload(code: EventCode, payload: Payload) -> Self {
        Self {
            code,
            originator: None,
            payload,
        }
    }

    /// Opaque bytes, truncated to [`PAYLOAD_BYTES`].
    pub fn with_bytes(code: EventCode, bytes: &[u8]) -> Self {
        let len = bytes.len().min(PAYLOAD_BYTES);
        let mut buf = Vec::new();
        buf.extend_from_slice(&bytes[..len]).ok();
        Self::with_payload(code, Payload::Bytes(buf))
    }

    pub(crate) fn from_originator(mut self, originator: ReceiverId) -> Self {
        self.originator = Some(originator);
        self
    }

    pub const fn code(&self) -> EventCode {
        self.code
    }

    pub const fn originator(&self) -> Option<ReceiverId> {
        self.originator
    }

    pub const fn payload(&self) -> &Payload {
        &self.payload
    }
}
