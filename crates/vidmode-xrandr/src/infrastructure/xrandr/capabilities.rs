//! Run-time binding of libX11 and libXrandr.
//!
//! Both libraries are opened with `dlopen` when the engine is created, not at
//! link time, so the binary starts on systems without X and reports a
//! [`TimingError::MissingCapability`] naming the library that could not be
//! bound.  Every entry point the backend calls is resolved during the open;
//! a library that loads but lacks a symbol fails the same way.

use std::fmt;

use tracing::debug;
use x11_dl::xlib::Xlib;
use x11_dl::xrandr::Xrandr;

use crate::application::engine::TimingError;

/// Bound function tables for the two libraries.
pub struct Capabilities {
    pub xlib: Xlib,
    pub xrandr: Xrandr,
}

impl Capabilities {
    /// Opens libX11, then libXrandr.
    ///
    /// # Errors
    ///
    /// [`TimingError::MissingCapability`] for the first library that cannot
    /// be opened or is missing a required symbol.
    pub fn load() -> Result<Self, TimingError> {
        let xlib = Xlib::open().map_err(|e| TimingError::MissingCapability {
            library: "libX11",
            detail: e.to_string(),
        })?;
        debug!("bound libX11");

        let xrandr = Xrandr::open().map_err(|e| TimingError::MissingCapability {
            library: "libXrandr",
            detail: e.to_string(),
        })?;
        debug!("bound libXrandr");

        Ok(Self { xlib, xrandr })
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
