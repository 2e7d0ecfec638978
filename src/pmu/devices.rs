//! Contracts of the two telemetry devices the supervisor reads.
//!
//! Register-level drivers live elsewhere; the supervisor only needs these
//! reads. Reads must be short and non-blocking. Blanket impls for `&mut T`
//! let the composition root lend a driver that a bus adapter also talks to.

use core::fmt::Debug;

use bitflags::bitflags;

/// Battery charger IC.
pub trait Charger {
    type Error: Debug;

    /// Whether external input power is present.
    fn is_input_power_present(&mut self) -> Result<bool, Self::Error>;

    /// Current flowing into the battery, in mA.
    fn charge_current_ma(&mut self) -> Result<f32, Self::Error>;
}

impl<T: Charger + ?Sized> Charger for &mut T {
    type Error = T::Error;

    fn is_input_power_present(&mut self) -> Result<bool, Self::Error> {
        T::is_input_power_present(self)
    }

    fn charge_current_ma(&mut self) -> Result<f32, Self::Error> {
        T::charge_current_ma(self)
    }
}

/// Gauges report charge either as a percentage or as a coulomb count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateOfCharge {
    Percent(f32),
    MilliampHours(f32),
}

impl StateOfCharge {
    /// Normalise to mAh against the rated capacity.
    pub fn to_mah(self, capacity_mah: u32) -> f32 {
        match self {
            Self::Percent(pct) => pct / 100.0 * capacity_mah as f32,
            Self::MilliampHours(mah) => mah,
        }
    }
}

/// Fuel-gauge IC.
pub trait GasGauge {
    type Error: Debug;

    fn state_of_charge(&mut self) -> Result<StateOfCharge, Self::Error>;

    /// Battery terminal voltage, in volts.
    fn battery_voltage(&mut self) -> Result<f32, Self::Error>;
}

impl<T: GasGauge + ?Sized> GasGauge for &mut T {
    type Error = T::Error;

    fn state_of_charge(&mut self) -> Result<StateOfCharge, Self::Error> {
        T::state_of_charge(self)
    }

    fn battery_voltage(&mut self) -> Result<f32, Self::Error> {
        T::battery_voltage(self)
    }
}

/// One fused reading of both devices.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    pub input_power: bool,
    pub charge_current_ma: f32,
    pub battery_v: f32,
    pub charge_mah: f32,
}

/// Wiring of the charger IC, consumed by its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargerOptions {
    /// Current-sense resistor in milliohms.
    pub sense_milliohms: u16,
    pub stat_pin: u8,
    pub isel_pin: u8,
}

impl ChargerOptions {
    pub const fn new(sense_milliohms: u16, stat_pin: u8, isel_pin: u8) -> Self {
        Self {
            sense_milliohms,
            stat_pin,
            isel_pin,
        }
    }
}

bitflags! {
    /// Sense-mode bits of the gas gauge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GasGaugeFlags: u8 {
        /// Automatic ADC conversions.
        const ACD_AUTO = 0x01;
        /// Integrate sense-resistor current.
        const INTEG_SENSE = 0x02;
    }
}

/// Wiring and sense mode of the gas gauge, consumed by its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasGaugeOptions {
    pub alert_pin: u8,
    pub flags: GasGaugeFlags,
}

impl GasGaugeOptions {
    pub const fn new(alert_pin: u8, flags: GasGaugeFlags) -> Self {
        Self { alert_pin, flags }
    }

    pub const fn auto_conversion(&self) -> bool {
        self.flags.contains(GasGaugeFlags::ACD_AUTO)
    }
}
