//! In-memory display server for tests and dry runs.
//!
//! `SimulatedDisplay` keeps screens, outputs, controllers and modes in a
//! `Mutex` and applies every [`DisplayServer`] request to them with the same
//! validation a real X server performs for the cases the engine cares about:
//!
//! - a controller may only be enabled with a registered mode, and only if it
//!   fits inside the frame buffer;
//! - the frame buffer may not shrink below an enabled controller;
//! - mode names are unique per screen;
//! - destroying a mode disables every controller using it.
//!
//! Violations are reported as faults through the capture protocol, exactly
//! like asynchronous X errors, so engine code paths are exercised end to end.
//!
//! # Fault injection
//!
//! - [`fail_call`](SimulatedDisplay::fail_call) makes a named request fault.
//! - [`fail_disable`](SimulatedDisplay::fail_disable) makes every disable
//!   request return a failed status.
//! - [`fail_enable`](SimulatedDisplay::fail_enable) does the same for enable
//!   requests on one controller.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};
use vidmode_core::{
    CrtcConfig, CrtcId, CrtcState, FrameBufferSize, ModeFlags, ModeId, ModeInfo, OutputId,
    OutputState, ResourceSnapshot, Rotation,
};

use crate::application::display_server::DisplayServer;

/// First id handed out for outputs, controllers and modes.
const FIRST_XID: u64 = 0x40;

#[derive(Debug, Default)]
struct SimScreen {
    outputs: Vec<OutputState>,
    crtcs: Vec<CrtcState>,
    modes: Vec<ModeInfo>,
    width: u32,
    height: u32,
    rotation: Rotation,
}

impl SimScreen {
    fn grow_to_fit(&mut self, crtc: &CrtcState) {
        if crtc.is_active() {
            self.width = self.width.max(to_extent(crtc.right()));
            self.height = self.height.max(to_extent(crtc.bottom()));
        }
    }

    fn fits(&self, x: i32, y: i32, width: u32, height: u32) -> bool {
        x >= 0
            && y >= 0
            && i64::from(x) + i64::from(width) <= i64::from(self.width)
            && i64::from(y) + i64::from(height) <= i64::from(self.height)
    }

    fn rebind(&mut self, crtc: CrtcId, old: &[OutputId], new: &[OutputId]) {
        for output in self.outputs.iter_mut() {
            if new.contains(&output.id) {
                output.crtc = Some(crtc);
            } else if old.contains(&output.id) && output.crtc == Some(crtc) {
                output.crtc = None;
            }
        }
    }

    /// Applies a controller request; returns `false` if the server would
    /// reject it.
    fn apply(&mut self, crtc: CrtcId, config: &CrtcConfig) -> bool {
        let size = match config.mode {
            None => Some((0, 0)),
            Some(mode) => self.modes.iter().find(|m| m.id == mode).map(|m| {
                if config.rotation.swaps_axes() {
                    (m.height, m.width)
                } else {
                    (m.width, m.height)
                }
            }),
        };
        let Some((width, height)) = size else {
            return false;
        };
        if config.mode.is_some() && !self.fits(config.x, config.y, width, height) {
            return false;
        }
        let Some(target) = self.crtcs.iter_mut().find(|c| c.id == crtc) else {
            return false;
        };

        let old_outputs = std::mem::replace(&mut target.outputs, config.outputs.clone());
        target.x = config.x;
        target.y = config.y;
        target.width = width;
        target.height = height;
        target.mode = config.mode;
        target.rotation = config.rotation;
        self.rebind(crtc, &old_outputs, &config.outputs);
        true
    }
}

#[derive(Debug, Default)]
struct SimState {
    screens: Vec<SimScreen>,
    next_xid: u64,
    failing_calls: Vec<&'static str>,
    fail_disable: bool,
    failing_enables: Vec<CrtcId>,
    capturing: bool,
    captured: u32,
    uncaptured: u32,
    grabbed: bool,
    grab_count: u32,
    mutations: Vec<&'static str>,
}

impl SimState {
    fn xid(&mut self) -> u64 {
        if self.next_xid < FIRST_XID {
            self.next_xid = FIRST_XID;
        }
        let id = self.next_xid;
        self.next_xid += 1;
        id
    }

    fn screen_mut(&mut self, index: usize) -> &mut SimScreen {
        if self.screens.len() <= index {
            self.screens.resize_with(index + 1, SimScreen::default);
        }
        &mut self.screens[index]
    }

    /// Records a mutating request; returns `true` if it must fault.
    fn request(&mut self, call: &'static str) -> bool {
        trace!(call, "simulated request");
        self.mutations.push(call);
        if self.failing_calls.contains(&call) {
            self.fault(call);
            return true;
        }
        false
    }

    fn fault(&mut self, call: &'static str) {
        if self.capturing {
            self.captured += 1;
        } else {
            warn!(call, "fault raised outside a capture");
            self.uncaptured += 1;
        }
    }

    fn output_mut(&mut self, id: OutputId) -> Option<&mut OutputState> {
        self.screens
            .iter_mut()
            .flat_map(|s| s.outputs.iter_mut())
            .find(|o| o.id == id)
    }

    fn crtc_mut(&mut self, id: CrtcId) -> Option<&mut CrtcState> {
        self.screens
            .iter_mut()
            .flat_map(|s| s.crtcs.iter_mut())
            .find(|c| c.id == id)
    }

    fn screen_of_mode(&self, id: ModeId) -> Option<usize> {
        self.screens
            .iter()
            .position(|s| s.modes.iter().any(|m| m.id == id))
    }
}

/// Display server backed by in-memory state.
#[derive(Debug, Default)]
pub struct SimulatedDisplay {
    state: Mutex<SimState>,
}

impl SimulatedDisplay {
    /// An empty display with no screens.
    pub fn new() -> Self {
        Self::default()
    }

    /// One screen with one connected output named `Virtual-1` showing a
    /// `width`x`height` mode at the origin.
    pub fn single_output(width: u32, height: u32) -> Self {
        Self::side_by_side(&[(width, height)])
    }

    /// One screen with one connected output per entry, laid out left to
    /// right in order and top-aligned.
    pub fn side_by_side(sizes: &[(u32, u32)]) -> Self {
        let sim = Self::new();
        let screen = sim.add_screen();
        let mut x: i32 = 0;
        for (n, &(width, height)) in sizes.iter().enumerate() {
            let mode = sim.add_mode(screen, width, height);
            let output = sim.add_output(screen, &format!("Virtual-{}", n + 1), true);
            sim.add_crtc(screen, Some(output), Some(mode), x, 0);
            x = x.saturating_add(i32::try_from(width).unwrap_or(i32::MAX));
        }
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Fixture construction ──────────────────────────────────────────────

    /// Appends an empty screen and returns its index.
    pub fn add_screen(&self) -> usize {
        let mut state = self.lock();
        let index = state.screens.len();
        state.screen_mut(index);
        index
    }

    /// Registers a `width`x`height` mode at roughly 60 Hz.
    pub fn add_mode(&self, screen: usize, width: u32, height: u32) -> ModeId {
        let mut state = self.lock();
        let id = ModeId(state.xid());
        let h_total = width + 160;
        let v_total = height + 45;
        state.screen_mut(screen).modes.push(ModeInfo {
            id,
            name: format!("{width}x{height}"),
            dot_clock: u64::from(h_total) * u64::from(v_total) * 60,
            width,
            h_sync_start: width + 16,
            h_sync_end: width + 112,
            h_total,
            h_skew: 0,
            height,
            v_sync_start: height + 10,
            v_sync_end: height + 12,
            v_total,
            flags: ModeFlags(ModeFlags::HSYNC_NEGATIVE | ModeFlags::VSYNC_POSITIVE),
        });
        id
    }

    pub fn add_output(&self, screen: usize, name: &str, connected: bool) -> OutputId {
        let mut state = self.lock();
        let id = OutputId(state.xid());
        state.screen_mut(screen).outputs.push(OutputState {
            id,
            name: name.to_string(),
            connected,
            crtc: None,
            modes: Vec::new(),
        });
        id
    }

    /// Adds a controller, binding `output` to it and growing the frame
    /// buffer to fit.
    pub fn add_crtc(
        &self,
        screen: usize,
        output: Option<OutputId>,
        mode: Option<ModeId>,
        x: i32,
        y: i32,
    ) -> CrtcId {
        let mut state = self.lock();
        let id = CrtcId(state.xid());
        let screen = state.screen_mut(screen);
        let (width, height) = mode
            .and_then(|m| screen.modes.iter().find(|info| info.id == m))
            .map_or((0, 0), |info| (info.width, info.height));
        let crtc = CrtcState {
            id,
            x,
            y,
            width,
            height,
            mode,
            rotation: Rotation::NORMAL,
            outputs: output.into_iter().collect(),
        };
        if let Some(output) = output {
            if let Some(bound) = screen.outputs.iter_mut().find(|o| o.id == output) {
                bound.crtc = Some(id);
                if let Some(mode) = mode {
                    if !bound.modes.contains(&mode) {
                        bound.modes.push(mode);
                    }
                }
            }
        }
        screen.grow_to_fit(&crtc);
        screen.crtcs.push(crtc);
        id
    }

    /// Removes a controller, as when a GPU or dock is unplugged.
    pub fn remove_crtc(&self, crtc: CrtcId) {
        let mut state = self.lock();
        for screen in state.screens.iter_mut() {
            if let Some(index) = screen.crtcs.iter().position(|c| c.id == crtc) {
                let removed = screen.crtcs.remove(index);
                screen.rebind(crtc, &removed.outputs, &[]);
            }
        }
    }

    /// Adds `mode` to the output's accepted list.
    pub fn allow_mode(&self, output: OutputId, mode: ModeId) {
        if let Some(state) = self.lock().output_mut(output) {
            if !state.modes.contains(&mode) {
                state.modes.push(mode);
            }
        }
    }

    /// Rotates a controller, swapping its extent for quarter turns.
    pub fn set_crtc_rotation(&self, crtc: CrtcId, rotation: Rotation) {
        if let Some(state) = self.lock().crtc_mut(crtc) {
            if rotation.swaps_axes() != state.rotation.swaps_axes() {
                std::mem::swap(&mut state.width, &mut state.height);
            }
            state.rotation = rotation;
        }
    }

    pub fn set_screen_rotation(&self, screen: usize, rotation: Rotation) {
        self.lock().screen_mut(screen).rotation = rotation;
    }

    /// Changes a controller behind the engine's back, as another client
    /// would.
    pub fn reconfigure_externally(&self, crtc: CrtcId, mode: Option<ModeId>, x: i32, y: i32) {
        let mut state = self.lock();
        for screen in state.screens.iter_mut() {
            let size = mode
                .and_then(|m| screen.modes.iter().find(|info| info.id == m))
                .map_or((0, 0), |info| (info.width, info.height));
            let Some(index) = screen.crtcs.iter().position(|c| c.id == crtc) else {
                continue;
            };
            let updated = {
                let target = &mut screen.crtcs[index];
                target.mode = mode;
                target.x = x;
                target.y = y;
                (target.width, target.height) = size;
                target.clone()
            };
            screen.grow_to_fit(&updated);
        }
    }

    // ── Fault injection ───────────────────────────────────────────────────

    /// Makes every future request named `call` (e.g. `"XRRAddOutputMode"`)
    /// fault without taking effect.
    pub fn fail_call(&self, call: &'static str) {
        self.lock().failing_calls.push(call);
    }

    /// Makes every future disable request return a failed status.
    pub fn fail_disable(&self) {
        self.lock().fail_disable = true;
    }

    /// Makes every future enable request for `crtc` return a failed status.
    pub fn fail_enable(&self, crtc: CrtcId) {
        self.lock().failing_enables.push(crtc);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_calls.clear();
        state.failing_enables.clear();
        state.fail_disable = false;
    }

    // ── Inspection ────────────────────────────────────────────────────────

    pub fn crtc(&self, id: CrtcId) -> Option<CrtcState> {
        self.lock().crtc_mut(id).map(|c| c.clone())
    }

    pub fn output(&self, id: OutputId) -> Option<OutputState> {
        self.lock().output_mut(id).map(|o| o.clone())
    }

    pub fn crtc_ids(&self, screen: usize) -> Vec<CrtcId> {
        let state = self.lock();
        state
            .screens
            .get(screen)
            .map(|s| s.crtcs.iter().map(|c| c.id).collect())
            .unwrap_or_default()
    }

    pub fn output_ids(&self, screen: usize) -> Vec<OutputId> {
        let state = self.lock();
        state
            .screens
            .get(screen)
            .map(|s| s.outputs.iter().map(|o| o.id).collect())
            .unwrap_or_default()
    }

    /// Frame buffer size in pixels.
    pub fn frame_buffer(&self, screen: usize) -> (u32, u32) {
        let state = self.lock();
        state
            .screens
            .get(screen)
            .map_or((0, 0), |s| (s.width, s.height))
    }

    pub fn mode_by_name(&self, name: &str) -> Option<ModeInfo> {
        let state = self.lock();
        state
            .screens
            .iter()
            .flat_map(|s| s.modes.iter())
            .find(|m| m.name == name)
            .cloned()
    }

    /// Names of the mutating requests received so far, in order.
    pub fn mutations(&self) -> Vec<&'static str> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    pub fn is_grabbed(&self) -> bool {
        self.lock().grabbed
    }

    /// How many times the server has been grabbed.
    pub fn grab_count(&self) -> u32 {
        self.lock().grab_count
    }

    /// Faults raised while no capture was active.
    pub fn uncaptured_faults(&self) -> u32 {
        self.lock().uncaptured
    }
}

fn to_extent(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

impl DisplayServer for SimulatedDisplay {
    fn screen_count(&self) -> usize {
        self.lock().screens.len()
    }

    fn resources(&self, screen: usize) -> Option<ResourceSnapshot> {
        let state = self.lock();
        let screen = state.screens.get(screen)?;
        Some(ResourceSnapshot {
            outputs: screen.outputs.iter().map(|o| o.id).collect(),
            crtcs: screen.crtcs.iter().map(|c| c.id).collect(),
            modes: screen.modes.clone(),
        })
    }

    fn output_info(&self, screen: usize, output: OutputId) -> Option<OutputState> {
        let state = self.lock();
        state
            .screens
            .get(screen)?
            .outputs
            .iter()
            .find(|o| o.id == output)
            .cloned()
    }

    fn crtc_info(&self, screen: usize, crtc: CrtcId) -> Option<CrtcState> {
        let state = self.lock();
        state
            .screens
            .get(screen)?
            .crtcs
            .iter()
            .find(|c| c.id == crtc)
            .cloned()
    }

    fn screen_rotation(&self, screen: usize) -> Rotation {
        let state = self.lock();
        state.screens.get(screen).map(|s| s.rotation).unwrap_or_default()
    }

    fn create_mode(&self, screen: usize, mode: &ModeInfo) -> ModeId {
        let mut state = self.lock();
        if state.request("XRRCreateMode") {
            return ModeId(0);
        }
        let duplicate = state
            .screens
            .get(screen)
            .map_or(true, |s| s.modes.iter().any(|m| m.name == mode.name));
        if duplicate {
            state.fault("XRRCreateMode");
            return ModeId(0);
        }
        let id = ModeId(state.xid());
        state.screen_mut(screen).modes.push(ModeInfo {
            id,
            ..mode.clone()
        });
        id
    }

    fn destroy_mode(&self, mode: ModeId) {
        let mut state = self.lock();
        if state.request("XRRDestroyMode") {
            return;
        }
        let Some(index) = state.screen_of_mode(mode) else {
            state.fault("XRRDestroyMode");
            return;
        };
        let screen = state.screen_mut(index);
        let mut released = Vec::new();
        for crtc in screen.crtcs.iter_mut().filter(|c| c.mode == Some(mode)) {
            crtc.mode = None;
            crtc.width = 0;
            crtc.height = 0;
            released.push((crtc.id, std::mem::take(&mut crtc.outputs)));
        }
        for (crtc, outputs) in released {
            screen.rebind(crtc, &outputs, &[]);
        }
        for output in screen.outputs.iter_mut() {
            output.modes.retain(|&m| m != mode);
        }
        screen.modes.retain(|m| m.id != mode);
    }

    fn add_output_mode(&self, output: OutputId, mode: ModeId) {
        let mut state = self.lock();
        if state.request("XRRAddOutputMode") {
            return;
        }
        let registered = state.screen_of_mode(mode).is_some();
        let attached = match state.output_mut(output) {
            Some(target) if registered => {
                if !target.modes.contains(&mode) {
                    target.modes.push(mode);
                }
                true
            }
            _ => false,
        };
        if !attached {
            state.fault("XRRAddOutputMode");
        }
    }

    fn delete_output_mode(&self, output: OutputId, mode: ModeId) {
        let mut state = self.lock();
        if state.request("XRRDeleteOutputMode") {
            return;
        }
        let detached = match state.output_mut(output) {
            Some(target) if target.modes.contains(&mode) => {
                target.modes.retain(|&m| m != mode);
                true
            }
            _ => false,
        };
        if !detached {
            state.fault("XRRDeleteOutputMode");
        }
    }

    fn set_crtc_config(&self, screen: usize, crtc: CrtcId, config: &CrtcConfig) -> bool {
        let mut state = self.lock();
        if state.request("XRRSetCrtcConfig") {
            return true;
        }
        match config.mode {
            None if state.fail_disable => return false,
            Some(_) if state.failing_enables.contains(&crtc) => return false,
            _ => {}
        }

        let applied = state
            .screens
            .get_mut(screen)
            .is_some_and(|sim| sim.apply(crtc, config));
        if !applied {
            state.fault("XRRSetCrtcConfig");
        }
        true
    }

    fn set_screen_size(&self, screen: usize, size: FrameBufferSize) {
        let mut state = self.lock();
        if state.request("XRRSetScreenSize") {
            return;
        }
        let valid = state.screens.get(screen).is_some_and(|s| {
            size.width > 0
                && size.height > 0
                && s.crtcs.iter().filter(|c| c.is_active()).all(|c| {
                    c.right() <= i64::from(size.width) && c.bottom() <= i64::from(size.height)
                })
        });
        if !valid {
            state.fault("XRRSetScreenSize");
            return;
        }
        let sim = state.screen_mut(screen);
        sim.width = size.width;
        sim.height = size.height;
    }

    fn grab_server(&self) {
        let mut state = self.lock();
        state.grabbed = true;
        state.grab_count += 1;
    }

    fn ungrab_server(&self) {
        self.lock().grabbed = false;
    }

    fn sync(&self) {}

    fn begin_fault_capture(&self) {
        let mut state = self.lock();
        state.capturing = true;
        state.captured = 0;
    }

    fn end_fault_capture(&self) -> u32 {
        let mut state = self.lock();
        state.capturing = false;
        std::mem::take(&mut state.captured)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_by_side_lays_out_left_to_right() {
        let sim = SimulatedDisplay::side_by_side(&[(640, 480), (800, 600)]);
        let crtcs = sim.crtc_ids(0);
        assert_eq!(crtcs.len(), 2);
        assert_eq!(sim.crtc(crtcs[1]).expect("crtc").x, 640);
        assert_eq!(sim.frame_buffer(0), (1440, 600));
    }

    #[test]
    fn test_enable_outside_frame_buffer_faults() {
        // Arrange
        let sim = SimulatedDisplay::single_output(640, 480);
        let crtc = sim.crtc_ids(0)[0];
        let big = sim.add_mode(0, 1024, 768);
        let output = sim.output_ids(0)[0];
        let config = CrtcConfig {
            x: 0,
            y: 0,
            mode: Some(big),
            rotation: Rotation::NORMAL,
            outputs: vec![output],
        };

        // Act
        sim.begin_fault_capture();
        sim.set_crtc_config(0, crtc, &config);
        let faults = sim.end_fault_capture();

        // Assert
        assert_eq!(faults, 1);
        assert_eq!(sim.crtc(crtc).expect("crtc").width, 640);
    }

    #[test]
    fn test_disable_unbinds_output() {
        let sim = SimulatedDisplay::single_output(640, 480);
        let crtc = sim.crtc_ids(0)[0];
        let output = sim.output_ids(0)[0];

        assert!(sim.set_crtc_config(0, crtc, &CrtcConfig::disabled()));

        assert!(sim.output(output).expect("output").crtc.is_none());
        assert!(!sim.crtc(crtc).expect("crtc").is_active());
    }

    #[test]
    fn test_shrinking_below_active_controller_faults() {
        let sim = SimulatedDisplay::single_output(640, 480);

        sim.begin_fault_capture();
        sim.set_screen_size(0, FrameBufferSize::from_pixels(320, 240));

        assert_eq!(sim.end_fault_capture(), 1);
        assert_eq!(sim.frame_buffer(0), (640, 480));
    }

    #[test]
    fn test_destroying_active_mode_disables_controller() {
        let sim = SimulatedDisplay::single_output(640, 480);
        let crtc = sim.crtc_ids(0)[0];
        let mode = sim.crtc(crtc).and_then(|c| c.mode).expect("active mode");

        sim.destroy_mode(mode);

        assert!(sim.crtc(crtc).expect("crtc").mode.is_none());
        assert!(sim.mode_by_name("640x480").is_none());
        assert_eq!(sim.uncaptured_faults(), 0);
    }

    #[test]
    fn test_fault_outside_capture_is_counted() {
        let sim = SimulatedDisplay::single_output(640, 480);
        sim.destroy_mode(ModeId(0x9999));
        assert_eq!(sim.uncaptured_faults(), 1);
    }
}
