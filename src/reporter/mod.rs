//! Turns scan and location events into sealed bundles.
//!
//! [`state::Reporter`] is the synchronous state machine; the loop in
//! [`loop_worker`] owns it so that producers only ever talk to a queue.

pub mod controller;
pub mod loop_worker;
pub mod state;

pub use controller::{ReporterController, ReporterHandle};
pub use state::{Reporter, ReporterStats, ScanEvent};
