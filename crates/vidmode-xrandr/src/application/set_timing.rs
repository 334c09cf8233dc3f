//! Switching the managed output to a registered mode.
//!
//! A switch may change the size of the managed controller, so every sibling
//! controller positioned to its right or below it is moved by the size
//! delta and the shared frame buffer is resized to the new bounding box.
//! The whole change runs under a server grab:
//!
//! 1. snapshot every controller on the screen and plan the new layout,
//! 2. disable every controller that moves or changes mode,
//! 3. resize the frame buffer,
//! 4. re-enable each disabled controller with its planned configuration.
//!
//! Step 4 is attempted for every controller even when earlier steps failed,
//! so a failed switch leaves as many displays lit as possible.  There is no
//! rollback.

use tracing::{debug, error, info, warn};

use vidmode_core::{
    plan_layout, CrtcConfig, CrtcState, ModeClass, ModeInfo, ModelineRequest, TargetChange,
};

use super::display_server::{DisplayServer, ServerGrab};
use super::engine::{TimingEngine, TimingError};
use super::fault_trap::FaultTrap;

/// Fault bits raised by [`TimingEngine::set_timing`].
pub const DISABLE_FAULT: u32 = 0x01;
pub const RESIZE_FAULT: u32 = 0x02;
pub const ENABLE_FAULT: u32 = 0x10;

/// Result of a successful [`TimingEngine::set_timing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The output already showed the mode; nothing was sent to the server.
    AlreadyActive,
    /// The layout transaction completed.
    Applied,
}

impl<S: DisplayServer> TimingEngine<S> {
    /// Makes the managed output display `request`'s mode.
    ///
    /// A request classified [`ModeClass::DESKTOP`] selects the mode the
    /// output had when it was discovered, regardless of its handle.
    ///
    /// # Errors
    ///
    /// - [`TimingError::ModeNotFound`] if the mode is not registered.
    /// - [`TimingError::PlatformFault`] if disabling or resizing faulted.
    /// - [`TimingError::PartialTransaction`] if some controllers could not be
    ///   re-enabled.
    pub fn set_timing(&mut self, request: &ModelineRequest) -> Result<SwitchOutcome, TimingError> {
        let output = self.require_output("set_timing")?;
        let target = self.resolve_target_mode(request)?;
        let screen = output.screen;

        let resources = self
            .server
            .resources(screen)
            .ok_or(TimingError::Query("XRRGetScreenResourcesCurrent"))?;
        let bound = self
            .server
            .output_info(screen, output.id)
            .ok_or(TimingError::Query("XRRGetOutputInfo"))?
            .crtc;
        let crtc_id = match bound {
            Some(crtc) => crtc,
            // Deleting the active mode unbinds the output; drive it through
            // the controller it had at discovery if that still exists.
            None if resources.crtcs.contains(&output.crtc) => {
                warn!(
                    instance = %self.id,
                    output = %output.name,
                    crtc = %output.crtc,
                    "output has no controller, reusing the one found at discovery"
                );
                output.crtc
            }
            None => {
                error!(instance = %self.id, output = %output.name, "output has no controller");
                return Err(TimingError::OutputWithoutController(output.name.clone()));
            }
        };
        let live = self
            .server
            .crtc_info(screen, crtc_id)
            .ok_or(TimingError::Query("XRRGetCrtcInfo"))?;

        let last_mode = self.baseline.last_crtc.as_ref().and_then(|c| c.mode);
        if let Some(last) = &self.baseline.last_crtc {
            if last.mode == live.mode
                && last.x == live.x
                && last.y == live.y
                && live.mode == Some(target.id)
            {
                info!(instance = %self.id, mode = %target.id, "changing mode is not required");
                return Ok(SwitchOutcome::AlreadyActive);
            }
        }
        if last_mode != live.mode {
            warn!(
                instance = %self.id,
                crtc = %crtc_id,
                last = ?last_mode,
                live = ?live.mode,
                "controller was reconfigured outside this engine"
            );
        }

        // A dark controller reports no size; fall back to the geometry this
        // engine last left it in.
        let geometry = match &self.baseline.last_crtc {
            Some(last) if !live.is_active() && last.id == crtc_id => last,
            _ => &live,
        };
        let (new_width, new_height) = if geometry.rotation.swaps_axes() {
            debug!(
                instance = %self.id,
                rotation = geometry.rotation.describe(),
                "controller is turned, exchanging mode width and height"
            );
            (target.height, target.width)
        } else {
            (target.width, target.height)
        };
        let change = TargetChange {
            crtc: crtc_id,
            output: output.id,
            x: geometry.x,
            y: geometry.y,
            old_width: geometry.width,
            old_height: geometry.height,
            mode: target.id,
            new_width,
            new_height,
        };

        let (mask, failed) = {
            let _grab = ServerGrab::new(&self.server);

            let snapshot: Vec<CrtcState> = resources
                .crtcs
                .iter()
                .filter_map(|&id| {
                    let state = self.server.crtc_info(screen, id);
                    if state.is_none() {
                        warn!(instance = %self.id, crtc = %id, "could not read controller, leaving it out of the layout");
                    }
                    state
                })
                .collect();
            let plan = plan_layout(snapshot, &change);
            for planned in &plan.crtcs {
                debug!(
                    instance = %self.id,
                    crtc = %planned.before.id,
                    role = ?planned.role,
                    "{}x{}+{}+{} -> {}x{}+{}+{}",
                    planned.before.width, planned.before.height, planned.before.x, planned.before.y,
                    planned.after.width, planned.after.height, planned.after.x, planned.after.y
                );
            }

            let mut trap = FaultTrap::new(&self.server);

            for planned in plan.affected() {
                let id = planned.before.id;
                if !trap.run_checked(DISABLE_FAULT, "XRRSetCrtcConfig", |s| {
                    s.set_crtc_config(screen, id, &CrtcConfig::disabled())
                }) {
                    error!(instance = %self.id, crtc = %id, "could not disable controller");
                }
            }

            if trap.is_clean() {
                let size = plan.frame_buffer();
                info!(
                    instance = %self.id,
                    "changing frame buffer to {}x{} ({}x{} mm)",
                    size.width, size.height, size.mm_width, size.mm_height
                );
                trap.run(RESIZE_FAULT, "XRRSetScreenSize", |s| s.set_screen_size(screen, size));
            } else {
                error!(instance = %self.id, mask = %trap.mask(), "skipping frame buffer resize");
            }

            let mut failed = Vec::new();
            for planned in plan.affected() {
                let after = &planned.after;
                if !trap.run_checked(ENABLE_FAULT, "XRRSetCrtcConfig", |s| {
                    s.set_crtc_config(screen, after.id, &CrtcConfig::from_state(after))
                }) {
                    error!(
                        instance = %self.id,
                        crtc = %after.id,
                        mode = ?after.mode,
                        "could not re-enable controller at {}+{}",
                        after.x, after.y
                    );
                    failed.push(after.id);
                }
            }

            (trap.mask(), failed)
        };

        match self.server.crtc_info(screen, crtc_id) {
            Some(state) => {
                if state.mode.is_none() {
                    error!(instance = %self.id, crtc = %crtc_id, "controller has no mode after the switch");
                }
                self.baseline.last_crtc = Some(state);
            }
            None => {
                error!(instance = %self.id, crtc = %crtc_id, "could not re-read controller after the switch");
                self.baseline.last_crtc = None;
            }
        }

        if !failed.is_empty() {
            return Err(TimingError::PartialTransaction { crtcs: failed });
        }
        if mask.contains(DISABLE_FAULT) {
            return Err(TimingError::PlatformFault {
                call: "XRRSetCrtcConfig",
                mask,
            });
        }
        if mask.contains(RESIZE_FAULT) {
            return Err(TimingError::PlatformFault {
                call: "XRRSetScreenSize",
                mask,
            });
        }

        info!(
            instance = %self.id,
            output = %output.name,
            mode = %target.id,
            "switched to {}x{}@{:.2}",
            target.width, target.height, target.vfreq()
        );
        Ok(SwitchOutcome::Applied)
    }

    fn resolve_target_mode(&self, request: &ModelineRequest) -> Result<ModeInfo, TimingError> {
        if request.classification.contains(ModeClass::DESKTOP) {
            return self.baseline.desktop_mode.clone().ok_or_else(|| {
                error!(instance = %self.id, "no desktop mode recorded");
                TimingError::ModeNotFound
            });
        }
        self.find_mode(request)?.ok_or_else(|| {
            error!(instance = %self.id, handle = ?request.platform_handle, "mode not found");
            TimingError::ModeNotFound
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulated::SimulatedDisplay;
    use vidmode_core::{CrtcId, InstanceId, ModeId, Rotation};

    fn request(width: u32, height: u32) -> ModelineRequest {
        ModelineRequest {
            pclock: u64::from(width + 160) * u64::from(height + 45) * 60,
            hactive: width,
            hbegin: width + 16,
            hend: width + 112,
            htotal: width + 160,
            vactive: height,
            vbegin: height + 10,
            vend: height + 12,
            vtotal: height + 45,
            vfreq: 60.0,
            ..Default::default()
        }
    }

    fn managed(sim: SimulatedDisplay, device: &str) -> TimingEngine<SimulatedDisplay> {
        let mut engine = TimingEngine::new(sim, device, InstanceId(0));
        engine.init().expect("init");
        engine
    }

    #[test]
    fn test_set_timing_unknown_mode_is_not_found() {
        let mut engine = managed(SimulatedDisplay::single_output(640, 480), "auto");
        let missing = ModelineRequest {
            platform_handle: Some(ModeId(0x777)),
            ..request(320, 240)
        };
        assert!(matches!(engine.set_timing(&missing), Err(TimingError::ModeNotFound)));
        assert!(engine.server().mutations().is_empty());
    }

    #[test]
    fn test_set_timing_single_output_resizes_frame_buffer() {
        // Arrange
        let mut engine = managed(SimulatedDisplay::single_output(640, 480), "auto");
        let mut mode = request(320, 240);
        engine.create_mode(&mut mode).expect("create");

        // Act
        let outcome = engine.set_timing(&mode).expect("switch");

        // Assert
        assert_eq!(outcome, SwitchOutcome::Applied);
        assert_eq!(engine.server().frame_buffer(0), (320, 240));
        let crtc = engine.managed_output().expect("output").crtc;
        let state = engine.server().crtc(crtc).expect("crtc");
        assert_eq!(state.mode, mode.platform_handle);
        assert_eq!(engine.baseline().last_crtc.as_ref(), Some(&state));
        assert!(!engine.server().is_grabbed());
        assert_eq!(engine.server().grab_count(), 1);
    }

    #[test]
    fn test_set_timing_twice_skips_second_switch() {
        let mut engine = managed(SimulatedDisplay::single_output(640, 480), "auto");
        let mut mode = request(320, 240);
        engine.create_mode(&mut mode).expect("create");
        engine.set_timing(&mode).expect("first switch");
        engine.server().clear_mutations();

        let outcome = engine.set_timing(&mode).expect("second switch");

        assert_eq!(outcome, SwitchOutcome::AlreadyActive);
        assert!(engine.server().mutations().is_empty());
        assert_eq!(engine.server().grab_count(), 1);
    }

    #[test]
    fn test_set_timing_desktop_class_restores_original_mode() {
        let mut engine = managed(SimulatedDisplay::single_output(640, 480), "auto");
        let mut mode = request(320, 240);
        engine.create_mode(&mut mode).expect("create");
        engine.set_timing(&mode).expect("switch");

        let desktop = ModelineRequest {
            classification: ModeClass(ModeClass::DESKTOP),
            ..Default::default()
        };
        engine.set_timing(&desktop).expect("restore");

        assert_eq!(engine.server().frame_buffer(0), (640, 480));
        let crtc = engine.managed_output().expect("output").crtc;
        let desktop_id = engine.baseline().desktop_mode.as_ref().map(|m| m.id);
        assert_eq!(engine.server().crtc(crtc).expect("crtc").mode, desktop_id);
    }

    #[test]
    fn test_set_timing_disable_fault_skips_resize_but_reenables() {
        // Arrange
        let mut engine = managed(SimulatedDisplay::single_output(640, 480), "auto");
        let mut mode = request(320, 240);
        engine.create_mode(&mut mode).expect("create");
        engine.server().fail_disable();

        // Act
        let err = engine.set_timing(&mode).unwrap_err();

        // Assert
        match err {
            TimingError::PlatformFault { call, mask } => {
                assert_eq!(call, "XRRSetCrtcConfig");
                assert!(mask.contains(DISABLE_FAULT));
                assert!(!mask.contains(RESIZE_FAULT));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!engine.server().mutations().contains(&"XRRSetScreenSize"));
        assert!(!engine.server().is_grabbed());
    }

    #[test]
    fn test_set_timing_enable_failure_is_partial_transaction() {
        let sim = SimulatedDisplay::side_by_side(&[(640, 480), (640, 480)]);
        let sibling = sim.crtc_ids(0)[1];
        let mut engine = managed(sim, "screen0");
        let mut mode = request(800, 600);
        engine.create_mode(&mut mode).expect("create");
        engine.server().fail_enable(sibling);

        let err = engine.set_timing(&mode).unwrap_err();

        match err {
            TimingError::PartialTransaction { crtcs } => assert_eq!(crtcs, vec![sibling]),
            other => panic!("unexpected error: {other:?}"),
        }
        // The target was still re-enabled.
        let crtc = engine.managed_output().expect("output").crtc;
        assert_eq!(engine.server().crtc(crtc).expect("crtc").mode, mode.platform_handle);
        assert!(!engine.server().is_grabbed());
    }

    #[test]
    fn test_set_timing_drift_is_tolerated() {
        // Arrange: someone else switches the output back to another mode
        let sim = SimulatedDisplay::single_output(640, 480);
        let other = sim.add_mode(0, 800, 600);
        let mut engine = managed(sim, "auto");
        let crtc: CrtcId = engine.managed_output().expect("output").crtc;
        let output = engine.managed_output().expect("output").id;
        engine.server().allow_mode(output, other);
        engine.server().reconfigure_externally(crtc, Some(other), 0, 0);

        let mut mode = request(320, 240);
        engine.create_mode(&mut mode).expect("create");

        // Act
        engine.set_timing(&mode).expect("switch");

        // Assert: geometry is taken from the live controller
        assert_eq!(engine.server().frame_buffer(0), (320, 240));
    }

    #[test]
    fn test_set_timing_drift_uses_live_geometry_for_siblings() {
        // Arrange: another client grows the target to 800x600 and moves the
        // sibling to stay adjacent
        let sim = SimulatedDisplay::side_by_side(&[(640, 480), (640, 480)]);
        let crtcs = sim.crtc_ids(0);
        let (target, sibling) = (crtcs[0], crtcs[1]);
        let big = sim.add_mode(0, 800, 600);
        let sibling_mode = sim.crtc(sibling).expect("sibling").mode;
        let mut engine = managed(sim, "screen0");
        let output = engine.managed_output().expect("output").id;
        engine.server().allow_mode(output, big);
        engine.server().reconfigure_externally(target, Some(big), 0, 0);
        engine.server().reconfigure_externally(sibling, sibling_mode, 800, 0);
        let mut mode = request(320, 240);
        engine.create_mode(&mut mode).expect("create");

        // Act
        let outcome = engine.set_timing(&mode).expect("switch");

        // Assert: the sibling is pulled back by the live width, not the cached one
        assert_eq!(outcome, SwitchOutcome::Applied);
        let moved = engine.server().crtc(sibling).expect("sibling");
        assert_eq!((moved.x, moved.y), (320, 0));
        assert!(moved.is_active());
        assert_eq!(engine.server().frame_buffer(0), (960, 480));
    }

    #[test]
    fn test_set_timing_quarter_turned_output_keeps_turned_extent() {
        // Arrange: a 640x480 output turned left scans out 480x640
        let sim = SimulatedDisplay::single_output(640, 480);
        let crtc = sim.crtc_ids(0)[0];
        sim.set_crtc_rotation(crtc, Rotation::LEFT);
        let mut engine = managed(sim, "auto");
        let mut mode = request(320, 240);
        engine.create_mode(&mut mode).expect("create");

        // Act
        let outcome = engine.set_timing(&mode).expect("switch");

        // Assert
        assert_eq!(outcome, SwitchOutcome::Applied);
        assert_eq!(engine.server().frame_buffer(0), (240, 320));
        let state = engine.server().crtc(crtc).expect("crtc");
        assert_eq!(state.mode, mode.platform_handle);
        assert_eq!(state.rotation, Rotation::LEFT);
        assert_eq!((state.width, state.height), (240, 320));
    }

    #[test]
    fn test_set_timing_desktop_relights_output_after_active_mode_destroyed() {
        // Arrange: the active custom mode is deleted, leaving the output dark
        let mut engine = managed(SimulatedDisplay::single_output(640, 480), "auto");
        let managed_output = engine.managed_output().expect("output").clone();
        let mut mode = request(320, 240);
        engine.create_mode(&mut mode).expect("create");
        engine.set_timing(&mode).expect("switch");
        engine.destroy_mode(&mut mode).expect("destroy");
        assert_eq!(
            engine.server().output(managed_output.id).expect("output").crtc,
            None
        );

        // Act
        let desktop = ModelineRequest {
            classification: ModeClass(ModeClass::DESKTOP),
            ..Default::default()
        };
        let outcome = engine.set_timing(&desktop).expect("restore");

        // Assert
        assert_eq!(outcome, SwitchOutcome::Applied);
        assert_eq!(engine.server().frame_buffer(0), (640, 480));
        let desktop_id = engine.baseline().desktop_mode.as_ref().map(|m| m.id);
        let state = engine.server().crtc(managed_output.crtc).expect("crtc");
        assert_eq!(state.mode, desktop_id);
        assert_eq!(state.outputs, vec![managed_output.id]);
        assert_eq!(
            engine.server().output(managed_output.id).expect("output").crtc,
            Some(managed_output.crtc)
        );
    }
}
