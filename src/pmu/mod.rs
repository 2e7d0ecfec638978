//! Power supervisor.
//!
//! [`Pmu`] is an [`EventReceiver`] that samples the charger and the gas
//! gauge whenever it is poked (boot, periodic tick, device alerts),
//! classifies the battery through [`ChargeStateMachine`] and drives the
//! regulator outputs it exclusively owns through [`PowerPlant`].
//!
//! Every state change is announced as a `PowerStateChanged` event so the
//! indicator and console can react without polling.

pub mod charge_state;
pub mod devices;
pub mod regulator;

use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::config::{BatteryProfile, PmuTuning, PowerPlantConfig};
use crate::error::{Error, Result, TelemetrySource};
use crate::kernel::{Dispatch, Event, EventCode, EventFilter, EventReceiver, KernelContext, Payload};

pub use charge_state::{ChargeState, ChargeStateMachine, Transition};
pub use devices::{
    Charger, ChargerOptions, GasGauge, GasGaugeFlags, GasGaugeOptions, StateOfCharge, Telemetry,
};
pub use regulator::{PowerPlant, RegulatorDecision};

/// Snapshot published with state changes and on request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReport {
    pub state: ChargeState,
    pub input_power: bool,
    pub battery_v: f32,
    pub charge_current_ma: f32,
    pub charge_mah: f32,
    /// At or below the profile's weak threshold.
    pub battery_weak: bool,
    /// Configuration on the regulator pins, `None` until a write succeeds
    /// or after one failed.
    pub regulator: Option<RegulatorDecision>,
}

pub struct Pmu<C, G, V, A> {
    charger: C,
    gauge: G,
    plant: PowerPlant<V, A>,
    config: PowerPlantConfig,
    profile: BatteryProfile,
    machine: ChargeStateMachine,
    last_sample: Option<Telemetry>,
}

impl<C, G, V, A> Pmu<C, G, V, A>
where
    C: Charger,
    G: GasGauge,
    V: OutputPin,
    A: OutputPin,
{
    /// Build a supervisor with tuning derived from the battery profile.
    ///
    /// Refuses to start with an inconsistent profile or board config.
    pub fn new(
        charger: C,
        gauge: G,
        plant: PowerPlant<V, A>,
        config: PowerPlantConfig,
        profile: BatteryProfile,
    ) -> Result<Self> {
        let tuning = PmuTuning::for_profile(&profile);
        Self::with_tuning(charger, gauge, plant, config, profile, tuning)
    }

    pub fn with_tuning(
        charger: C,
        gauge: G,
        plant: PowerPlant<V, A>,
        config: PowerPlantConfig,
        profile: BatteryProfile,
        tuning: PmuTuning,
    ) -> Result<Self> {
        profile.validate()?;
        config.validate()?;
        tuning.validate()?;
        info!(
            "PMU: {}mAh cell, dead {}V weak {}V float {}V max {}V, taper {}mA",
            profile.capacity_mah(),
            profile.dead_v(),
            profile.weak_v(),
            profile.float_v(),
            profile.max_v(),
            tuning.taper_current_ma
        );
        Ok(Self {
            charger,
            gauge,
            plant,
            config,
            profile,
            machine: ChargeStateMachine::new(profile, tuning),
            last_sample: None,
        })
    }

    pub fn charge_state(&self) -> ChargeState {
        self.machine.state()
    }

    /// Regulator configuration currently on the pins.
    pub fn regulator(&self) -> Option<RegulatorDecision> {
        self.plant.applied()
    }

    pub fn last_sample(&self) -> Option<Telemetry> {
        self.last_sample
    }

    pub fn report(&self) -> PowerReport {
        let sample = self.last_sample.unwrap_or_default();
        PowerReport {
            state: self.machine.state(),
            input_power: sample.input_power,
            battery_v: sample.battery_v,
            charge_current_ma: sample.charge_current_ma,
            charge_mah: sample.charge_mah,
            battery_weak: self.last_sample.is_some() && sample.battery_v <= self.profile.weak_v(),
            regulator: self.plant.applied(),
        }
    }

    /// Read both devices. The first failing read aborts the sample.
    fn sample(&mut self) -> Result<Telemetry> {
        let input_power = self
            .charger
            .is_input_power_present()
            .map_err(|e| read_failure(TelemetrySource::Charger, e))?;
        let charge_current_ma = self
            .charger
            .charge_current_ma()
            .map_err(|e| read_failure(TelemetrySource::Charger, e))?;
        let battery_v = self
            .gauge
            .battery_voltage()
            .map_err(|e| read_failure(TelemetrySource::GasGauge, e))?;
        let charge = self
            .gauge
            .state_of_charge()
            .map_err(|e| read_failure(TelemetrySource::GasGauge, e))?;

        if !battery_v.is_finite() || battery_v < 0.0 {
            warn!("Gas gauge returned nonsense voltage {}", battery_v);
            return Err(Error::TelemetryReadFailure(TelemetrySource::GasGauge));
        }
        if !charge_current_ma.is_finite() {
            warn!("Charger returned nonsense current {}", charge_current_ma);
            return Err(Error::TelemetryReadFailure(TelemetrySource::Charger));
        }
        Ok(Telemetry {
            input_power,
            charge_current_ma,
            battery_v,
            charge_mah: charge.to_mah(self.profile.capacity_mah()),
        })
    }

    /// Sample, classify and drive the regulators, announcing what changed.
    fn reevaluate(&mut self, ctx: &mut KernelContext<'_, '_>) {
        let sample = self.sample();
        if let Ok(telemetry) = sample {
            self.last_sample = Some(telemetry);
        }
        let transition = self.machine.evaluate(sample);

        let decision = RegulatorDecision::for_state(&self.config, self.machine.state());
        if let Err(e) = self.plant.apply(decision) {
            announce(ctx, Event::with_payload(EventCode::RegulatorFault, Payload::Error(e)));
        }

        if let Some(Transition { from, to }) = transition {
            let report = self.report();
            announce(
                ctx,
                Event::with_payload(EventCode::PowerStateChanged, Payload::Transition { from, to, report }),
            );
        }
    }
}

fn read_failure<E: core::fmt::Debug>(source: TelemetrySource, e: E) -> Error {
    warn!("{:?} read failed: {:?}", source, e);
    Error::TelemetryReadFailure(source)
}

/// Raise an event the supervisor cannot afford to fail on.
fn announce(ctx: &mut KernelContext<'_, '_>, event: Event) {
    let code = event.code();
    if let Err(e) = ctx.raise_event(event) {
        warn!("PMU could not announce {:?}: {}", code, e);
    }
}

impl<C, G, V, A> EventReceiver for Pmu<C, G, V, A>
where
    C: Charger,
    G: GasGauge,
    V: OutputPin,
    A: OutputPin,
{
    fn name(&self) -> &'static str {
        "pmu"
    }

    fn interests(&self) -> EventFilter {
        EventFilter::of(&[
            EventCode::Boot,
            EventCode::PmuTick,
            EventCode::ChargerAlert,
            EventCode::GasGaugeAlert,
            EventCode::PowerReportRequest,
        ])
    }

    fn notify(&mut self, event: &Event, ctx: &mut KernelContext<'_, '_>) -> Result<Dispatch> {
        match event.code() {
            EventCode::Boot
            | EventCode::PmuTick
            | EventCode::ChargerAlert
            | EventCode::GasGaugeAlert => self.reevaluate(ctx),
            EventCode::PowerReportRequest => announce(
                ctx,
                Event::with_payload(EventCode::PowerReport, Payload::Report(self.report())),
            ),
            _ => {}
        }
        Ok(Dispatch::Continue)
    }
}
