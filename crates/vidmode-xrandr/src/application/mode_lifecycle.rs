//! Registering and unregistering custom modes on the managed output.

use tracing::{debug, error, info, warn};

use vidmode_core::{mode_name, ModeClass, ModeId, ModeInfo, ModelineRequest};

use super::display_server::DisplayServer;
use super::engine::{TimingEngine, TimingError};
use super::fault_trap::FaultTrap;

/// Fault bits raised by [`TimingEngine::create_mode`].
pub const CREATE_FAULT: u32 = 0x01;
pub const ATTACH_FAULT: u32 = 0x02;
pub const ORPHAN_FAULT: u32 = 0x04;

/// Fault bits raised by [`TimingEngine::destroy_mode`].
pub const DETACH_FAULT: u32 = 0x01;
pub const DESTROY_FAULT: u32 = 0x02;

impl<S: DisplayServer> TimingEngine<S> {
    /// Registers `request` as a new mode and attaches it to the managed
    /// output.
    ///
    /// On success the request's handle is set and its classification gains
    /// [`ModeClass::XRANDR`].  If the attach step faults, the freshly created
    /// mode is destroyed again and the handle stays unset.
    pub fn create_mode(&mut self, request: &mut ModelineRequest) -> Result<ModeId, TimingError> {
        let output = self.require_output("create_mode")?;
        if let Err(err) = request.validate() {
            error!(instance = %self.id, %err, "rejecting modeline");
            return Err(err.into());
        }
        if request.is_registered() && self.find_mode(request)?.is_some() {
            error!(instance = %self.id, "mode already exists");
        }

        let name = mode_name(self.id, request);
        let descriptor = ModeInfo::from_request(name, request);
        debug!(instance = %self.id, mode = %descriptor.name, "creating mode");

        let mut trap = FaultTrap::new(&self.server);
        let id = trap.run(CREATE_FAULT, "XRRCreateMode", |s| {
            s.create_mode(output.screen, &descriptor)
        });
        if trap.tripped(CREATE_FAULT) || id == ModeId(0) {
            error!(instance = %self.id, mode = %descriptor.name, "could not create mode");
            trap.raise(CREATE_FAULT);
            return Err(TimingError::PlatformFault {
                call: "XRRCreateMode",
                mask: trap.mask(),
            });
        }

        trap.run(ATTACH_FAULT, "XRRAddOutputMode", |s| s.add_output_mode(output.id, id));
        if trap.tripped(ATTACH_FAULT) {
            error!(instance = %self.id, mode = %id, output = %output.name, "could not attach mode, removing it");
            trap.run(ORPHAN_FAULT, "XRRDestroyMode", |s| s.destroy_mode(id));
            return Err(TimingError::PlatformFault {
                call: "XRRAddOutputMode",
                mask: trap.mask(),
            });
        }

        request.platform_handle = Some(id);
        request.classification.insert(ModeClass::XRANDR);
        info!(instance = %self.id, mode = %id, name = %descriptor.name, output = %output.name, "mode created");
        Ok(id)
    }

    /// Detaches the request's mode from the managed output and unregisters
    /// it.
    ///
    /// A handle that no longer names a registered mode is cleared with a
    /// warning and the call succeeds.  Destroying the mode the output is
    /// currently using is allowed; the server leaves the output without a
    /// mode.
    pub fn destroy_mode(&mut self, request: &mut ModelineRequest) -> Result<(), TimingError> {
        let output = self.require_output("destroy_mode")?;
        let Some(handle) = request.platform_handle else {
            error!(instance = %self.id, "cannot destroy a modeline without a handle");
            return Err(TimingError::HandleUnset);
        };

        let resources = self
            .server
            .resources(output.screen)
            .ok_or(TimingError::Query("XRRGetScreenResourcesCurrent"))?;
        let Some(mode) = resources.mode(handle) else {
            warn!(instance = %self.id, mode = %handle, "mode is no longer registered, clearing handle");
            request.platform_handle = None;
            return Ok(());
        };

        let active = self
            .server
            .output_info(output.screen, output.id)
            .and_then(|o| o.crtc)
            .and_then(|crtc| self.server.crtc_info(output.screen, crtc))
            .is_some_and(|crtc| crtc.mode == Some(handle));
        if active {
            warn!(instance = %self.id, mode = %handle, output = %output.name, "destroying the active mode");
        }

        debug!(instance = %self.id, mode = %mode.name, "removing mode");
        let mut trap = FaultTrap::new(&self.server);
        trap.run(DETACH_FAULT, "XRRDeleteOutputMode", |s| {
            s.delete_output_mode(output.id, handle)
        });
        trap.run(DESTROY_FAULT, "XRRDestroyMode", |s| s.destroy_mode(handle));

        if !trap.is_clean() {
            let call = if trap.tripped(DETACH_FAULT) {
                "XRRDeleteOutputMode"
            } else {
                "XRRDestroyMode"
            };
            return Err(TimingError::PlatformFault {
                call,
                mask: trap.mask(),
            });
        }

        request.platform_handle = None;
        info!(instance = %self.id, mode = %handle, "mode destroyed");
        Ok(())
    }

    /// Replaces the request's registered mode with its current timing.
    ///
    /// The new handle generally differs from the old one.
    pub fn update_mode(&mut self, request: &mut ModelineRequest) -> Result<ModeId, TimingError> {
        self.destroy_mode(request)?;
        self.create_mode(request)
    }

    /// Looks up the registered mode named by the request's handle.
    ///
    /// Returns `Ok(None)` when the handle is unset or no longer registered.
    pub fn find_mode(&self, request: &ModelineRequest) -> Result<Option<ModeInfo>, TimingError> {
        let output = self.require_output("find_mode")?;
        let Some(handle) = request.platform_handle else {
            return Ok(None);
        };
        let resources = self
            .server
            .resources(output.screen)
            .ok_or(TimingError::Query("XRRGetScreenResourcesCurrent"))?;
        let found = resources.mode(handle).cloned();
        if found.is_none() {
            debug!(instance = %self.id, mode = %handle, "mode not found");
        }
        Ok(found)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
