//! Firmware constants and the immutable configuration records.
//!
//! Kernel table sizes are compile-time constants. The battery profile and
//! power-plant options are supplied once at construction and never mutated;
//! both can be persisted as postcard blobs and are validated on load.

use bitflags::bitflags;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifies this firmware to other devices.
pub const FIRMWARE_NAME: &str = "PowerPlant";
pub const VERSION_STRING: &str = "0.1.1";
pub const HW_VERSION_STRING: &str = "1";

/// Pending events the kernel can hold before `raise_event` fails.
pub const EVENT_QUEUE_CAPACITY: usize = 8;
/// Receivers the kernel can dispatch to.
pub const MAX_SUBSCRIBERS: usize = 8;
/// Live schedule entries.
pub const MAX_SCHEDULES: usize = 8;
/// Missed periods tolerated before a schedule resets its accumulator instead
/// of catching up.
pub const SCHEDULER_MAX_SKIP_BEFORE_RESET: u64 = 6;

/// Electrical profile of the attached cell.
///
/// Thresholds are in volts and must satisfy `dead < weak < float <= max`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BatteryProfile {
    capacity_mah: u32,
    dead_v: f32,
    weak_v: f32,
    float_v: f32,
    max_v: f32,
}

impl BatteryProfile {
    pub fn new(capacity_mah: u32, dead_v: f32, weak_v: f32, float_v: f32, max_v: f32) -> Result<Self> {
        let profile = Self {
            capacity_mah,
            dead_v,
            weak_v,
            float_v,
            max_v,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// A common 2600mAh 18650 cell.
    pub fn common_18650() -> Self {
        Self {
            capacity_mah: 2600,
            dead_v: 3.6,
            weak_v: 3.75,
            float_v: 4.15,
            max_v: 4.3,
        }
    }

    /// Decode a persisted profile and check its threshold ordering.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self> {
        let profile: Self = postcard::from_bytes(bytes).map_err(|e| {
            warn!("Battery profile blob rejected: {:?}", e);
            Error::ConfigInvalid("battery profile is not decodable")
        })?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        let thresholds = [self.dead_v, self.weak_v, self.float_v, self.max_v];
        if thresholds.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(Error::ConfigInvalid("battery thresholds must be positive"));
        }
        if self.capacity_mah == 0 {
            return Err(Error::ConfigInvalid("battery capacity must be non-zero"));
        }
        if !(self.dead_v < self.weak_v && self.weak_v < self.float_v && self.float_v <= self.max_v) {
            return Err(Error::ConfigInvalid(
                "battery thresholds must satisfy dead < weak < float <= max",
            ));
        }
        Ok(())
    }

    pub const fn capacity_mah(&self) -> u32 {
        self.capacity_mah
    }

    pub const fn dead_v(&self) -> f32 {
        self.dead_v
    }

    pub const fn weak_v(&self) -> f32 {
        self.weak_v
    }

    pub const fn float_v(&self) -> f32 {
        self.float_v
    }

    pub const fn max_v(&self) -> f32 {
        self.max_v
    }
}

bitflags! {
    /// Flag bits of [`PowerPlantConfig`].
    #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    #[serde(transparent)]
    pub struct PowerPlantFlags: u8 {
        /// Aux regulator may be switched on.
        const ENABLED = 0x01;
        /// Select the 2.5V output instead of 3.3V.
        const V_25 = 0x02;
    }
}

/// Output voltage chosen by the voltage-select pin.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageMode {
    V3_3,
    /// Lowest-draw setting, also used as the safe configuration.
    V2_5,
}

impl VoltageMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::V3_3 => "3.3V",
            Self::V2_5 => "2.5V",
        }
    }
}

/// Board wiring and operator intent for the regulators.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerPlantConfig {
    voltage_select_pin: u8,
    aux_enable_pin: u8,
    flags: PowerPlantFlags,
}

impl PowerPlantConfig {
    pub fn new(voltage_select_pin: u8, aux_enable_pin: u8, flags: PowerPlantFlags) -> Result<Self> {
        let config = Self {
            voltage_select_pin,
            aux_enable_pin,
            flags,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_postcard(bytes: &[u8]) -> Result<Self> {
        let config: Self = postcard::from_bytes(bytes).map_err(|e| {
            warn!("Power plant blob rejected: {:?}", e);
            Error::ConfigInvalid("power plant config is not decodable")
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.voltage_select_pin == self.aux_enable_pin {
            return Err(Error::ConfigInvalid(
                "voltage select and aux enable must be different pins",
            ));
        }
        Ok(())
    }

    pub const fn voltage_select_pin(&self) -> u8 {
        self.voltage_select_pin
    }

    pub const fn aux_enable_pin(&self) -> u8 {
        self.aux_enable_pin
    }

    pub const fn flags(&self) -> PowerPlantFlags {
        self.flags
    }

    pub const fn enabled(&self) -> bool {
        self.flags.contains(PowerPlantFlags::ENABLED)
    }

    pub const fn voltage_mode(&self) -> VoltageMode {
        if self.flags.contains(PowerPlantFlags::V_25) {
            VoltageMode::V2_5
        } else {
            VoltageMode::V3_3
        }
    }
}

/// Calibration knobs of the charge-state machine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PmuTuning {
    /// Charge current below which a battery at float voltage counts as tapered.
    pub taper_current_ma: f32,
    /// Consecutive failed samples that escalate to `Fault`.
    pub read_failure_limit: u8,
    /// Consecutive good samples required to leave `Fault`.
    pub fault_recovery_samples: u8,
}

impl PmuTuning {
    /// C/20 taper, two-sample escalation and recovery.
    pub fn for_profile(profile: &BatteryProfile) -> Self {
        Self {
            taper_current_ma: profile.capacity_mah() as f32 / 20.0,
            read_failure_limit: 2,
            fault_recovery_samples: 2,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.taper_current_ma.is_finite() || self.taper_current_ma <= 0.0 {
            return Err(Error::ConfigInvalid("taper current must be positive"));
        }
        if self.read_failure_limit == 0 || self.fault_recovery_samples == 0 {
            return Err(Error::ConfigInvalid("sample counts must be at least one"));
        }
        Ok(())
    }
}
