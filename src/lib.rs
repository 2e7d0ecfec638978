//! Runtime core of the PowerPlant battery board.
//!
//! Two pieces live here: a cooperative event [`kernel`] that peripheral
//! drivers subscribe to, and the power supervisor ([`pmu`]) that turns
//! charger and gas-gauge telemetry into regulator decisions.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both the
//! board and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod config;
pub mod error;
pub mod kernel;
pub mod pmu;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
