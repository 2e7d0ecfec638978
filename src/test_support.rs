//! Scriptable stand-ins for the charger, gas gauge and regulator pins.

use core::cell::Cell;

use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin};

use crate::pmu::{Charger, GasGauge, StateOfCharge};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchFault;

impl digital::Error for BenchFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Shared bench state. Tests tweak it between kernel ticks.
pub struct Bench {
    pub input_power: Cell<bool>,
    pub current_ma: Cell<f32>,
    pub voltage: Cell<f32>,
    pub charge_mah: Cell<f32>,
    /// Samples left on which the charger read fails.
    pub charger_failures: Cell<u32>,
    /// Samples left on which the gauge read fails.
    pub gauge_failures: Cell<u32>,
    pub select: Cell<bool>,
    pub aux: Cell<bool>,
    pub pin_fault: Cell<bool>,
    pub pin_writes: Cell<u32>,
}

impl Bench {
    pub fn new() -> Self {
        Self {
            input_power: Cell::new(false),
            current_ma: Cell::new(0.0),
            voltage: Cell::new(3.9),
            charge_mah: Cell::new(1300.0),
            charger_failures: Cell::new(0),
            gauge_failures: Cell::new(0),
            select: Cell::new(false),
            aux: Cell::new(false),
            pin_fault: Cell::new(false),
            pin_writes: Cell::new(0),
        }
    }

    pub fn set(&self, input_power: bool, voltage: f32, current_ma: f32, charge_mah: f32) {
        self.input_power.set(input_power);
        self.voltage.set(voltage);
        self.current_ma.set(current_ma);
        self.charge_mah.set(charge_mah);
    }

    fn take_failure(counter: &Cell<u32>) -> bool {
        let left = counter.get();
        if left > 0 {
            counter.set(left - 1);
            true
        } else {
            false
        }
    }
}

pub struct BenchCharger<'b>(pub &'b Bench);

impl Charger for BenchCharger<'_> {
    type Error = BenchFault;

    fn is_input_power_present(&mut self) -> Result<bool, BenchFault> {
        if Bench::take_failure(&self.0.charger_failures) {
            return Err(BenchFault);
        }
        Ok(self.0.input_power.get())
    }

    fn charge_current_ma(&mut self) -> Result<f32, BenchFault> {
        Ok(self.0.current_ma.get())
    }
}

pub struct BenchGauge<'b>(pub &'b Bench);

impl GasGauge for BenchGauge<'_> {
    type Error = BenchFault;

    fn state_of_charge(&mut self) -> Result<StateOfCharge, BenchFault> {
        Ok(StateOfCharge::MilliampHours(self.0.charge_mah.get()))
    }

    fn battery_voltage(&mut self) -> Result<f32, BenchFault> {
        if Bench::take_failure(&self.0.gauge_failures) {
            return Err(BenchFault);
        }
        Ok(self.0.voltage.get())
    }
}

pub struct BenchPin<'b> {
    bench: &'b Bench,
    level: &'b Cell<bool>,
}

impl<'b> BenchPin<'b> {
    pub fn select(bench: &'b Bench) -> Self {
        Self {
            bench,
            level: &bench.select,
        }
    }

    pub fn aux(bench: &'b Bench) -> Self {
        Self {
            bench,
            level: &bench.aux,
        }
    }

    fn write(&mut self, high: bool) -> Result<(), BenchFault> {
        if self.bench.pin_fault.get() {
            return Err(BenchFault);
        }
        self.level.set(high);
        self.bench.pin_writes.set(self.bench.pin_writes.get() + 1);
        Ok(())
    }
}

impl ErrorType for BenchPin<'_> {
    type Error = BenchFault;
}

impl OutputPin for BenchPin<'_> {
    fn set_low(&mut self) -> Result<(), BenchFault> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), BenchFault> {
        self.write(true)
    }
}
