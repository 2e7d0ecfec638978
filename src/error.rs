//! Error taxonomy shared by the event kernel and the power supervisor.
//!
//! Construction-time errors ([`Error::ConfigInvalid`]) are returned to the
//! composition root. Everything else is recovered where it happens and turned
//! into state or a reported event; nothing here is allowed to unwind out of
//! the driving loop.

use thiserror_no_std::Error;

/// Telemetry source that failed a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetrySource {
    Charger,
    GasGauge,
}

/// Regulator output that rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegulatorPin {
    VoltageSelect,
    AuxEnable,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(&'static str),
    #[error("telemetry read from {0:?} failed")]
    TelemetryReadFailure(TelemetrySource),
    #[error("event queue is full")]
    QueueFull,
    #[error("receiver is already subscribed")]
    AlreadySubscribed,
    #[error("receiver {0} faulted")]
    ReceiverFault(&'static str),
    #[error("regulator write to {0:?} failed")]
    RegulatorWriteFailure(RegulatorPin),
    #[error("subscriber table is full")]
    SubscriberCapacity,
    #[error("schedule table is full")]
    ScheduleCapacity,
    #[error("no schedule with handle {0}")]
    UnknownSchedule(u16),
    #[error("schedule needs a non-zero period and repeat count")]
    InvalidSchedule,
}

pub type Result<T> = core::result::Result<T, Error>;
