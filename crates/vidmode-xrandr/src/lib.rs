//! vidmode-xrandr library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/` and
//! the binary entry point in `main.rs` share the same module tree.
//!
//! # What does this crate do?
//!
//! It takes a fully-populated [`vidmode_core::ModelineRequest`] from a timing
//! generator, registers it with the X server as a custom mode, and switches
//! one output to it while keeping every other monitor on the same X screen
//! where the user expects it:
//!
//! 1. Bind libX11 and libXrandr at run time and connect to the display.
//! 2. Pick the managed output (`"auto"`, a connector name, or `screenN`) and
//!    remember the desktop mode it was using.
//! 3. Create, destroy, update and look up custom modes on that output.
//! 4. Switch the output's controller to a mode, moving sibling controllers
//!    and resizing the shared frame buffer in one server-grabbed transaction.
//! 5. Report the output's modes one at a time back to the caller.

/// Application layer: the engine and the display server seam it drives.
pub mod application;

/// Infrastructure layer: XRandR backend, simulated backend, configuration.
pub mod infrastructure;

pub use application::display_server::{DisplayServer, ServerGrab};
pub use application::engine::{Baseline, ManagedOutput, TimingEngine, TimingError};
pub use application::enumerate::TimingStep;
pub use application::fault_trap::{FaultMask, FaultTrap};
pub use application::set_timing::SwitchOutcome;
