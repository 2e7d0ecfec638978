//! Regulator outputs and the policy that drives them.

use embedded_hal::digital::OutputPin;
use log::{debug, warn};

use super::charge_state::ChargeState;
use crate::config::{PowerPlantConfig, VoltageMode};
use crate::error::{Error, RegulatorPin, Result};

/// Desired level of both regulator outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegulatorDecision {
    pub aux_enabled: bool,
    pub voltage_select: VoltageMode,
}

impl RegulatorDecision {
    /// Lowest-draw configuration used in `Dead` and `Fault`.
    pub const SAFE: Self = Self {
        aux_enabled: false,
        voltage_select: VoltageMode::V2_5,
    };

    /// Configuration follows the operator flags unless the battery state
    /// demands the safe configuration. The override cannot be configured away.
    pub fn for_state(config: &PowerPlantConfig, state: ChargeState) -> Self {
        if state.is_safe_mode() {
            return Self::SAFE;
        }
        Self {
            aux_enabled: config.enabled(),
            voltage_select: config.voltage_mode(),
        }
    }
}

/// Exclusive owner of the voltage-select and aux-enable pins.
///
/// A high voltage-select pin picks the 2.5V output.
pub struct PowerPlant<V, A> {
    voltage_select: V,
    aux_enable: A,
    applied: Option<RegulatorDecision>,
}

impl<V, A> PowerPlant<V, A>
where
    V: OutputPin,
    A: OutputPin,
{
    pub fn new(voltage_select: V, aux_enable: A) -> Self {
        Self {
            voltage_select,
            aux_enable,
            applied: None,
        }
    }

    /// Last decision that reached the pins, `None` before the first write or
    /// after a failed one.
    pub fn applied(&self) -> Option<RegulatorDecision> {
        self.applied
    }

    /// Drive the pins to `decision`. Returns whether anything was written.
    ///
    /// The aux regulator is switched off before the select pin moves and only
    /// switched on after it settled.
    pub fn apply(&mut self, decision: RegulatorDecision) -> Result<bool> {
        if self.applied == Some(decision) {
            return Ok(false);
        }
        self.applied = None;
        if decision.aux_enabled {
            self.write_select(decision.voltage_select)?;
            self.write_aux(true)?;
        } else {
            self.write_aux(false)?;
            self.write_select(decision.voltage_select)?;
        }
        debug!(
            "Regulator aux {} at {}",
            if decision.aux_enabled { "on" } else { "off" },
            decision.voltage_select.label()
        );
        self.applied = Some(decision);
        Ok(true)
    }

    fn write_select(&mut self, mode: VoltageMode) -> Result<()> {
        let written = match mode {
            VoltageMode::V2_5 => self.voltage_select.set_high(),
            VoltageMode::V3_3 => self.voltage_select.set_low(),
        };
        written.map_err(|e| {
            warn!("Voltage select write failed: {:?}", e);
            Error::RegulatorWriteFailure(RegulatorPin::VoltageSelect)
        })
    }

    fn write_aux(&mut self, enabled: bool) -> Result<()> {
        let written = if enabled {
            self.aux_enable.set_high()
        } else {
            self.aux_enable.set_low()
        };
        written.map_err(|e| {
            warn!("Aux enable write failed: {:?}", e);
            Error::RegulatorWriteFailure(RegulatorPin::AuxEnable)
        })
    }
}
