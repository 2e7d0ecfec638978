//! Simulated PowerPlant board: one 18650 cell behind a charger IC, a gas
//! gauge and the two regulator control lines.
//!
//! The cell model is coarse: open-circuit voltage is linear in state of
//! charge. The charger runs constant current until the terminal voltage
//! reaches the full-charge level and tapers after that.

use std::cell::Cell;
use std::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};
use log::{debug, info};

use powerplant::pmu::{Charger, ChargerOptions, GasGauge, GasGaugeOptions, StateOfCharge};

// ---------------------------------------------------------------------------
// Cell model constants
// ---------------------------------------------------------------------------

/// Open-circuit voltage of an empty cell.
const OCV_EMPTY_V: f32 = 3.5;

/// Open-circuit voltage of a full cell, also the charger's regulation point.
const OCV_FULL_V: f32 = 4.2;

/// Internal resistance in ohms.
const INTERNAL_RESISTANCE_OHMS: f32 = 0.2;

/// Constant-current phase limit.
const CHARGE_LIMIT_MA: f32 = 1000.0;

/// Floor the charger holds until the cell tops out.
const TRICKLE_MA: f32 = 20.0;

/// Board load while running from battery.
const LOAD_MA: f32 = 400.0;

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// Errors the simulated I2C devices can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// Device did not acknowledge its address.
    Nack,
}

/// Shared physical state read by both simulated ICs.
pub struct SimCell {
    capacity_mah: u32,
    charge_mah: Cell<f32>,
    current_ma: Cell<f32>,
    input_power: Cell<bool>,
    gauge_failures: Cell<u8>,
}

impl SimCell {
    pub fn new(capacity_mah: u32, state_of_charge: f32) -> Self {
        Self {
            capacity_mah,
            charge_mah: Cell::new(capacity_mah as f32 * state_of_charge.clamp(0.0, 1.0)),
            current_ma: Cell::new(0.0),
            input_power: Cell::new(false),
            gauge_failures: Cell::new(0),
        }
    }

    /// Connect or disconnect the external supply.
    pub fn plug(&self, present: bool) {
        info!(
            "[sim] input power {}",
            if present { "connected" } else { "removed" }
        );
        self.input_power.set(present);
    }

    /// Make the next `count` gauge voltage reads fail.
    pub fn inject_gauge_failures(&self, count: u8) {
        info!("[sim] injecting {} gas gauge read failures", count);
        self.gauge_failures.set(count);
    }

    pub fn state_of_charge(&self) -> f32 {
        self.charge_mah.get() / self.capacity_mah as f32
    }

    fn open_circuit_v(&self) -> f32 {
        OCV_EMPTY_V + (OCV_FULL_V - OCV_EMPTY_V) * self.state_of_charge()
    }

    /// Voltage across the cell terminals under the present load.
    pub fn terminal_v(&self) -> f32 {
        let drop = INTERNAL_RESISTANCE_OHMS / 1000.0;
        if self.input_power.get() {
            self.open_circuit_v() + self.current_ma.get() * drop
        } else {
            self.open_circuit_v() - LOAD_MA * drop
        }
    }

    /// Integrate charge flow over `dt_secs` of simulated time.
    pub fn step(&self, dt_secs: f32) {
        let capacity = self.capacity_mah as f32;
        let charge = self.charge_mah.get();
        let hours = dt_secs / 3600.0;

        if self.input_power.get() {
            let current = if charge >= capacity {
                0.0
            } else {
                let headroom = OCV_FULL_V - self.open_circuit_v();
                (headroom * 1000.0 / INTERNAL_RESISTANCE_OHMS).clamp(TRICKLE_MA, CHARGE_LIMIT_MA)
            };
            self.current_ma.set(current);
            self.charge_mah.set((charge + current * hours).min(capacity));
        } else {
            self.current_ma.set(0.0);
            self.charge_mah.set((charge - LOAD_MA * hours).max(0.0));
        }
    }
}

// ---------------------------------------------------------------------------
// Telemetry devices
// ---------------------------------------------------------------------------

pub struct SimCharger<'a> {
    cell: &'a SimCell,
}

impl<'a> SimCharger<'a> {
    pub fn new(cell: &'a SimCell, options: ChargerOptions) -> Self {
        info!(
            "[sim] charger: {}mOhm sense, STAT on GPIO{}, ISEL on GPIO{}",
            options.sense_milliohms, options.stat_pin, options.isel_pin
        );
        Self { cell }
    }
}

impl Charger for SimCharger<'_> {
    type Error = BusFault;

    fn is_input_power_present(&mut self) -> Result<bool, BusFault> {
        Ok(self.cell.input_power.get())
    }

    fn charge_current_ma(&mut self) -> Result<f32, BusFault> {
        Ok(self.cell.current_ma.get())
    }
}

pub struct SimGasGauge<'a> {
    cell: &'a SimCell,
}

impl<'a> SimGasGauge<'a> {
    pub fn new(cell: &'a SimCell, options: GasGaugeOptions) -> Self {
        info!(
            "[sim] gas gauge: ALERT on GPIO{}, auto conversion {}",
            options.alert_pin,
            options.auto_conversion()
        );
        Self { cell }
    }
}

impl GasGauge for SimGasGauge<'_> {
    type Error = BusFault;

    fn state_of_charge(&mut self) -> Result<StateOfCharge, BusFault> {
        Ok(StateOfCharge::Percent(self.cell.state_of_charge() * 100.0))
    }

    fn battery_voltage(&mut self) -> Result<f32, BusFault> {
        let pending = self.cell.gauge_failures.get();
        if pending > 0 {
            self.cell.gauge_failures.set(pending - 1);
            return Err(BusFault::Nack);
        }
        Ok(self.cell.terminal_v())
    }
}

// ---------------------------------------------------------------------------
// Regulator control lines
// ---------------------------------------------------------------------------

/// Output line that logs every level change.
pub struct SimPin {
    label: &'static str,
    gpio: u8,
    high: bool,
}

impl SimPin {
    pub fn new(label: &'static str, gpio: u8) -> Self {
        Self {
            label,
            gpio,
            high: false,
        }
    }

    fn drive(&mut self, high: bool) {
        if self.high != high {
            info!(
                "[sim] GPIO{} {} -> {}",
                self.gpio,
                self.label,
                if high { "HIGH" } else { "LOW" }
            );
        } else {
            debug!("[sim] GPIO{} {} unchanged", self.gpio, self.label);
        }
        self.high = high;
    }
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true);
        Ok(())
    }
}
