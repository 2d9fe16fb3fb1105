//! Core contracts for cycle-accurate emulation.
//!
//! Time is counted in half cycles of the master crystal. Every component
//! exposes `run_for(HalfCycles)`; everything else — clocking preferences,
//! video sinks, audio sinks, activity feedback — is an observer protocol
//! defined here so that chip crates need not know about hosts.

mod activity;
mod clocking;
mod half_cycles;
mod pulse;
mod scan_target;
mod speaker;

pub use activity::{DriveEvent, LedPresentation, Observer};
pub use clocking::{ClockingObserver, ClockingPreference, ClockingSource};
pub use half_cycles::{Cycles, HalfCycles};
pub use pulse::{Pulse, PulseType, Time};
pub use scan_target::ScanTarget;
pub use speaker::SpeakerDelegate;
