//! Reporting the managed output's modes one at a time.

use tracing::{debug, warn};

use vidmode_core::{ModeClass, ModeId, ModelineRequest, MODE_NAME_PREFIX};

use super::display_server::DisplayServer;
use super::engine::{TimingEngine, TimingError};

/// Outcome of one [`TimingEngine::get_timing`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingStep {
    /// The request was filled from the mode at the cursor.
    Filled(ModeId),
    /// The listed mode could not be resolved; the request is untouched.
    Skipped(ModeId),
    /// Every mode has been reported; the cursor is back at the start and the
    /// request is untouched.
    Wrapped,
}

impl<S: DisplayServer> TimingEngine<S> {
    /// Fills `request` from the next mode in the managed output's list.
    ///
    /// The classification's DESKTOP and ROTATED bits are recomputed; XRANDR
    /// is always set.  Once the list is exhausted the call returns
    /// [`TimingStep::Wrapped`] and the next call starts over.
    pub fn get_timing(&mut self, request: &mut ModelineRequest) -> Result<TimingStep, TimingError> {
        let output = self.require_output("get_timing")?;
        let resources = self
            .server
            .resources(output.screen)
            .ok_or(TimingError::Query("XRRGetScreenResourcesCurrent"))?;
        let info = self
            .server
            .output_info(output.screen, output.id)
            .ok_or(TimingError::Query("XRRGetOutputInfo"))?;

        let Some(&id) = info.modes.get(self.cursor) else {
            self.cursor = 0;
            return Ok(TimingStep::Wrapped);
        };
        self.cursor += 1;

        let Some(mode) = resources.mode(id) else {
            warn!(instance = %self.id, mode = %id, "output lists a mode the screen does not know");
            return Ok(TimingStep::Skipped(id));
        };

        mode.fill_request(request);
        request.classification.remove(ModeClass::DESKTOP | ModeClass::ROTATED);
        request.classification.insert(ModeClass::XRANDR);
        if self.baseline.rotated {
            request.classification.insert(ModeClass::ROTATED);
        }
        if self.baseline.desktop_mode.as_ref().is_some_and(|d| d.id == id) {
            request.classification.insert(ModeClass::DESKTOP);
        }

        if mode.name.starts_with(MODE_NAME_PREFIX) {
            debug!(instance = %self.id, mode = %id, name = %mode.name, "custom mode");
        }
        debug!(
            instance = %self.id,
            mode = %id,
            "{}x{}@{:.6} {:.2} kHz",
            mode.width, mode.height, request.vfreq, request.hfreq / 1000.0
        );
        Ok(TimingStep::Filled(id))
    }

    /// Resets the enumeration cursor.
    pub fn rewind_timings(&mut self) {
        self.cursor = 0;
    }

    /// Collects every mode of the managed output, starting from the top.
    pub fn list_timings(&mut self) -> Result<Vec<ModelineRequest>, TimingError> {
        self.rewind_timings();
        let mut timings = Vec::new();
        loop {
            let mut request = ModelineRequest::default();
            match self.get_timing(&mut request)? {
                TimingStep::Filled(_) => timings.push(request),
                TimingStep::Skipped(_) => {}
                TimingStep::Wrapped => return Ok(timings),
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
