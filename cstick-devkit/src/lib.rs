//! cStick DevKit - doubles and harnesses for agent development
//!
//! Test the uplink loop without a radio or a broker:
//! - Connectivity stubs standing in for the link driver and broker session
//! - Canned record stores on temp files
//! - A replay harness that runs ticks and checks expectations

pub mod harness;
pub mod store;
pub mod stubs;

pub use harness::ReplayHarness;
pub use stubs::{MockBroker, MockLink};
