//! Desktop simulator for the PowerPlant battery board.
//!
//! Runs the powerplant kernel and power supervisor against a simulated
//! 18650 cell on an accelerated clock, so a full discharge and recharge cycle
//! plays out in a few seconds. Regulator pin changes, state transitions and
//! periodic power reports are logged.
//!
//! # Scenario
//!
//! | Step | Trigger                     | Action                        |
//! |------|-----------------------------|-------------------------------|
//! | 1    | start                       | run from battery              |
//! | 2    | supervisor reports dead     | connect input power           |
//! | 3    | supervisor reports full     | two gas gauge reads fail      |
//! | 4    | supervisor leaves fault     | remove input power            |
//! | 5    | supervisor discharging      | request a final report, exit  |
//!
//! Run with `RUST_LOG=info`. An optional first argument caps the wall-clock
//! run time in seconds.

mod board;

use std::cell::RefCell;

use embassy_time::{Duration, Instant};
use log::{debug, info, trace, warn};

use powerplant::config::{
    BatteryProfile, FIRMWARE_NAME, HW_VERSION_STRING, PowerPlantConfig, PowerPlantFlags,
    VERSION_STRING,
};
use powerplant::kernel::{
    Dispatch, Event, EventCode, EventFilter, EventReceiver, Kernel, KernelContext, Payload,
    REPEAT_FOREVER, ScheduleControl,
};
use powerplant::pmu::{
    ChargeState, ChargerOptions, GasGaugeFlags, GasGaugeOptions, Pmu, PowerPlant, PowerReport,
};

use board::{SimCell, SimCharger, SimGasGauge, SimPin};

// ---------------------------------------------------------------------------
// Board wiring
// ---------------------------------------------------------------------------

const CHARGER_OPTIONS: ChargerOptions = ChargerOptions::new(68, 14, 15);

const GAS_GAUGE_OPTIONS: GasGaugeOptions = GasGaugeOptions::new(
    16,
    GasGaugeFlags::ACD_AUTO.union(GasGaugeFlags::INTEG_SENSE),
);

const VOLTAGE_SELECT_GPIO: u8 = 22;
const AUX_ENABLE_GPIO: u8 = 23;

// ---------------------------------------------------------------------------
// Timing constants
// ---------------------------------------------------------------------------

/// Simulated seconds per wall-clock second.
const TIME_SCALE: f32 = 2000.0;

/// Supervisor sampling period.
const PMU_TICK_PERIOD: Duration = Duration::from_millis(250);

/// Interval between periodic power reports.
const REPORT_PERIOD: Duration = Duration::from_secs(2);

/// Logo fade animation step.
const LOGO_FADE_PERIOD: Duration = Duration::from_millis(40);

/// Sleep taken when a kernel pass found nothing to do.
const IDLE_SLEEP: std::time::Duration = std::time::Duration::from_millis(1);

/// Default wall-clock cap on the run.
const DEFAULT_RUN_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Receivers
// ---------------------------------------------------------------------------

/// Serial-console stand-in: prints identity at boot, transitions and reports.
#[derive(Default)]
struct Console {
    reports: u32,
}

fn log_report(report: &PowerReport) {
    let (aux, select) = match report.regulator {
        Some(applied) => (if applied.aux_enabled { "on" } else { "off" }, applied.voltage_select.label()),
        None => ("unknown", "-"),
    };
    info!(
        "[console] {} | {:.3}V {:.0}mA {:.0}mAh | input {} | aux {} @ {}{}",
        report.state.label(),
        report.battery_v,
        report.charge_current_ma,
        report.charge_mah,
        if report.input_power { "yes" } else { "no" },
        aux,
        select,
        if report.battery_weak { " | WEAK" } else { "" }
    );
}

impl EventReceiver for Console {
    fn name(&self) -> &'static str {
        "console"
    }

    fn interests(&self) -> EventFilter {
        EventFilter::of(&[
            EventCode::Boot,
            EventCode::PowerStateChanged,
            EventCode::PowerReport,
            EventCode::RegulatorFault,
            EventCode::ReceiverFault,
        ])
    }

    fn notify(
        &mut self,
        event: &Event,
        ctx: &mut KernelContext<'_, '_>,
    ) -> powerplant::Result<Dispatch> {
        match (event.code(), event.payload()) {
            (EventCode::Boot, _) => {
                info!(
                    "[console] {} v{} (hw {})",
                    FIRMWARE_NAME, VERSION_STRING, HW_VERSION_STRING
                );
                ctx.raise_event(Event::new(EventCode::PowerReportRequest))?;
            }
            (EventCode::PowerStateChanged, Payload::Transition { from, to, report }) => {
                info!("[console] {} -> {}", from.label(), to.label());
                log_report(report);
            }
            (EventCode::PowerReport, Payload::Report(report)) => {
                self.reports += 1;
                log_report(report);
            }
            (EventCode::RegulatorFault, payload) => {
                warn!("[console] regulator fault: {:?}", payload);
            }
            (EventCode::ReceiverFault, Payload::Fault { receiver, code, error }) => {
                warn!(
                    "[console] receiver '{}' failed on {:?}: {}",
                    receiver, code, error
                );
            }
            _ => {}
        }
        Ok(Dispatch::Continue)
    }

    fn callback(&mut self, event: &Event, _ctx: &mut KernelContext<'_, '_>) -> powerplant::Result<()> {
        debug!("[console] {:?} delivered", event.code());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedPattern {
    Off,
    SlowBlink,
    Solid,
    FastBlink,
}

impl LedPattern {
    fn for_state(state: ChargeState) -> Self {
        match state {
            ChargeState::Unknown | ChargeState::Discharging | ChargeState::Dead => Self::Off,
            ChargeState::Charging => Self::SlowBlink,
            ChargeState::Float | ChargeState::Full => Self::Solid,
            ChargeState::Fault => Self::FastBlink,
        }
    }
}

/// Charge indicator LED driven purely by supervisor events.
struct StatusLed {
    pattern: LedPattern,
}

impl EventReceiver for StatusLed {
    fn name(&self) -> &'static str {
        "status-led"
    }

    fn interests(&self) -> EventFilter {
        EventFilter::of(&[EventCode::PowerStateChanged])
    }

    fn notify(
        &mut self,
        event: &Event,
        _ctx: &mut KernelContext<'_, '_>,
    ) -> powerplant::Result<Dispatch> {
        if let Payload::Transition { to, .. } = event.payload() {
            let pattern = LedPattern::for_state(*to);
            if pattern != self.pattern {
                info!("[led] {:?} -> {:?}", self.pattern, pattern);
                self.pattern = pattern;
            }
        }
        Ok(Dispatch::Continue)
    }
}

/// Boot logo brightness, swept up and down between 0 and [`Self::MAX`].
struct LogoFade {
    level: u8,
    rising: bool,
}

impl LogoFade {
    const MAX: u8 = 200;
    const STEP: u8 = 5;

    fn new() -> Self {
        Self {
            level: 0,
            rising: true,
        }
    }

    fn step(&mut self) -> u8 {
        if self.rising {
            self.level = self.level.saturating_add(Self::STEP).min(Self::MAX);
            self.rising = self.level < Self::MAX;
        } else {
            self.level = self.level.saturating_sub(Self::STEP);
            self.rising = self.level == 0;
        }
        self.level
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Draining,
    Charging,
    Glitching,
    Recovering,
    Unplugging,
    Done,
}

/// Scripted stimulus. Watches the supervisor and pokes the cell.
struct Scenario {
    phase: Phase,
}

impl Scenario {
    fn new() -> Self {
        Self {
            phase: Phase::Draining,
        }
    }

    fn enter(&mut self, phase: Phase) {
        info!("[sim] scenario {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Step the script. Returns the device alert the stimulus would raise.
    fn advance(&mut self, state: ChargeState, cell: &SimCell) -> Option<EventCode> {
        match (self.phase, state) {
            (Phase::Draining, ChargeState::Dead) => {
                cell.plug(true);
                self.enter(Phase::Charging);
                Some(EventCode::ChargerAlert)
            }
            (Phase::Charging, ChargeState::Full) => {
                cell.inject_gauge_failures(2);
                self.enter(Phase::Glitching);
                Some(EventCode::GasGaugeAlert)
            }
            (Phase::Glitching, ChargeState::Fault) => {
                self.enter(Phase::Recovering);
                None
            }
            (Phase::Recovering, s) if s != ChargeState::Fault => {
                cell.plug(false);
                self.enter(Phase::Unplugging);
                Some(EventCode::ChargerAlert)
            }
            (Phase::Unplugging, ChargeState::Discharging) => {
                self.enter(Phase::Done);
                Some(EventCode::PowerReportRequest)
            }
            _ => None,
        }
    }

    fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Kernel clock derived from the host's monotonic clock.
fn kernel_now(start: std::time::Instant) -> Instant {
    Instant::from_micros(start.elapsed().as_micros() as u64)
}

fn main() -> powerplant::Result<()> {
    env_logger::init();

    let run_limit = std::time::Duration::from_secs(
        std::env::args()
            .nth(1)
            .and_then(|arg| arg.parse().ok())
            .unwrap_or(DEFAULT_RUN_SECS),
    );

    let profile = BatteryProfile::common_18650();
    let plant_config = PowerPlantConfig::new(
        VOLTAGE_SELECT_GPIO,
        AUX_ENABLE_GPIO,
        PowerPlantFlags::ENABLED | PowerPlantFlags::V_25,
    )?;

    let cell = SimCell::new(profile.capacity_mah(), 0.45);
    let pmu = RefCell::new(Pmu::new(
        SimCharger::new(&cell, CHARGER_OPTIONS),
        SimGasGauge::new(&cell, GAS_GAUGE_OPTIONS),
        PowerPlant::new(
            SimPin::new("VSEL", VOLTAGE_SELECT_GPIO),
            SimPin::new("AUX_EN", AUX_ENABLE_GPIO),
        ),
        plant_config,
        profile,
    )?);
    let led = RefCell::new(StatusLed {
        pattern: LedPattern::Off,
    });
    let console = RefCell::new(Console::default());

    let start = std::time::Instant::now();
    let mut kernel = Kernel::new(kernel_now(start));
    kernel.subscribe(&pmu)?;
    kernel.subscribe(&led)?;
    kernel.subscribe(&console)?;

    kernel.create_event_schedule(PMU_TICK_PERIOD, REPEAT_FOREVER, true, EventCode::PmuTick)?;
    kernel.create_event_schedule(
        REPORT_PERIOD,
        REPEAT_FOREVER,
        true,
        EventCode::PowerReportRequest,
    )?;

    let mut fade = LogoFade::new();
    let logo = kernel.create_schedule(LOGO_FADE_PERIOD, REPEAT_FOREVER, false, move || {
        trace!("[logo] brightness {}", fade.step());
        ScheduleControl::Continue
    })?;
    kernel.enable_schedule(logo, true)?;

    kernel.raise_event(Event::new(EventCode::Boot))?;
    info!(
        "Simulator started: {}x time, {}s limit",
        TIME_SCALE,
        run_limit.as_secs()
    );

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    let mut scenario = Scenario::new();
    let mut last_step = start;

    while start.elapsed() < run_limit {
        let now = std::time::Instant::now();
        cell.step(now.duration_since(last_step).as_secs_f32() * TIME_SCALE);
        last_step = now;

        let state = pmu.borrow().charge_state();
        if let Some(code) = scenario.advance(state, &cell)
            && let Err(e) = kernel.raise_event(Event::new(code))
        {
            warn!("Dropped {:?} alert: {}", code, e);
        }

        let report = kernel.proc_idle_flags(kernel_now(start));
        if scenario.is_done() && kernel.pending_events() == 0 {
            break;
        }
        if report.is_idle() {
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    if !scenario.is_done() {
        warn!("Run limit reached in phase {:?}", scenario.phase);
    }

    let stats = kernel.stats();
    info!(
        "Kernel: {} raised, {} dispatched, {} schedule fires, {} receiver faults, {} dropped",
        stats.events_raised,
        stats.events_dispatched,
        stats.schedules_fired,
        stats.receiver_faults,
        stats.events_dropped
    );
    info!(
        "Console printed {} reports; final cell charge {:.1}%",
        console.borrow().reports,
        cell.state_of_charge() * 100.0
    );

    Ok(())
}
