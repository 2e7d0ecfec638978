//! Battery charge-state classification.
//!
//! [`ChargeStateMachine`] is the only place a [`ChargeState`] changes. It is
//! fed one fused telemetry sample (or read failure) at a time and has no I/O
//! of its own.

use log::{debug, error, info, warn};

use super::devices::Telemetry;
use crate::config::{BatteryProfile, PmuTuning};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    /// No valid sample from both devices yet.
    Unknown,
    Dead,
    Discharging,
    Charging,
    /// At float voltage with tapered current.
    Float,
    Full,
    /// Telemetry is untrustworthy. Sticky until recovery is debounced.
    Fault,
}

impl ChargeState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Dead => "dead",
            Self::Discharging => "discharging",
            Self::Charging => "charging",
            Self::Float => "float",
            Self::Full => "full",
            Self::Fault => "fault",
        }
    }

    /// States that force the regulators into their lowest-draw configuration.
    pub const fn is_safe_mode(self) -> bool {
        matches!(self, Self::Dead | Self::Fault)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ChargeState,
    pub to: ChargeState,
}

pub struct ChargeStateMachine {
    state: ChargeState,
    profile: BatteryProfile,
    tuning: PmuTuning,
    consecutive_failures: u8,
    /// Good samples seen while in `Fault`.
    recovery_streak: u8,
}

impl ChargeStateMachine {
    pub fn new(profile: BatteryProfile, tuning: PmuTuning) -> Self {
        Self {
            state: ChargeState::Unknown,
            profile,
            tuning,
            consecutive_failures: 0,
            recovery_streak: 0,
        }
    }

    pub fn state(&self) -> ChargeState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u8 {
        self.consecutive_failures
    }

    /// Feed one sample. Returns the transition if the state moved.
    pub fn evaluate(&mut self, sample: Result<Telemetry, Error>) -> Option<Transition> {
        let next = match sample {
            Ok(telemetry) => self.on_sample(&telemetry),
            Err(e) => self.on_read_failure(e),
        };
        if next == self.state {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to: next,
        };
        info!(
            "Charge state {} -> {}",
            transition.from.label(),
            transition.to.label()
        );
        self.state = next;
        Some(transition)
    }

    fn on_read_failure(&mut self, e: Error) -> ChargeState {
        self.recovery_streak = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.tuning.read_failure_limit {
            if self.state != ChargeState::Fault {
                error!(
                    "{} after {} consecutive failures, entering fault",
                    e, self.consecutive_failures
                );
            }
            ChargeState::Fault
        } else {
            warn!(
                "{} ({} of {} tolerated)",
                e, self.consecutive_failures, self.tuning.read_failure_limit
            );
            self.state
        }
    }

    fn on_sample(&mut self, telemetry: &Telemetry) -> ChargeState {
        self.consecutive_failures = 0;

        if telemetry.battery_v > self.profile.max_v() {
            self.recovery_streak = 0;
            warn!(
                "Battery at {}V exceeds max {}V",
                telemetry.battery_v,
                self.profile.max_v()
            );
            return ChargeState::Fault;
        }

        if self.state == ChargeState::Fault {
            self.recovery_streak = self.recovery_streak.saturating_add(1);
            if self.recovery_streak < self.tuning.fault_recovery_samples {
                debug!(
                    "Fault recovery {} of {}",
                    self.recovery_streak, self.tuning.fault_recovery_samples
                );
                return ChargeState::Fault;
            }
        }
        self.recovery_streak = 0;
        self.classify(telemetry)
    }

    fn classify(&self, telemetry: &Telemetry) -> ChargeState {
        if telemetry.battery_v <= self.profile.dead_v() {
            return ChargeState::Dead;
        }
        if !telemetry.input_power {
            return ChargeState::Discharging;
        }

        let at_float = telemetry.battery_v >= self.profile.float_v();
        let tapered = at_float && telemetry.charge_current_ma < self.tuning.taper_current_ma;
        let topped_up = telemetry.charge_mah >= self.profile.capacity_mah() as f32;
        match self.state {
            ChargeState::Float | ChargeState::Full if !at_float => ChargeState::Charging,
            ChargeState::Float if topped_up => ChargeState::Full,
            ChargeState::Float => ChargeState::Float,
            ChargeState::Full => ChargeState::Full,
            ChargeState::Charging if tapered => ChargeState::Float,
            _ => ChargeState::Charging,
        }
    }
}
