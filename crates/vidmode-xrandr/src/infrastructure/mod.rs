//! Infrastructure layer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `vidmode_core`, but MUST NOT be imported by the `application` layer outside
//! of tests.
//!
//! # Sub-modules
//!
//! - **`xrandr`** – the production [`DisplayServer`](crate::DisplayServer),
//!   bound to libX11/libXrandr at run time.  Linux only.
//! - **`simulated`** – an in-memory display server with fault injection, used
//!   by the test suites and always compiled.
//! - **`config`** – TOML configuration for the binary.

pub mod config;
pub mod simulated;

#[cfg(target_os = "linux")]
pub mod xrandr;
