//! The seam between the timing engine and a concrete display server.
//!
//! [`DisplayServer`] mirrors the handful of XRandR requests the engine needs.
//! The production implementation lives in
//! `infrastructure::xrandr::XrandrServer`; tests use either the generated
//! `MockDisplayServer` or `infrastructure::simulated::SimulatedDisplay`.
//!
//! Mutating calls report failure two ways, just like the X protocol does:
//! some return a status, and all of them may raise an asynchronous fault that
//! only surfaces once the request queue is flushed.  Callers collect the
//! latter through [`FaultTrap`](super::fault_trap::FaultTrap).

use vidmode_core::{
    CrtcConfig, CrtcId, CrtcState, FrameBufferSize, ModeId, ModeInfo, OutputId, OutputState,
    ResourceSnapshot, Rotation,
};

/// Display server operations used by the timing engine.
///
/// All methods take `&self`: a display connection is a single-threaded
/// handle and implementations keep any bookkeeping behind interior
/// mutability.
#[cfg_attr(test, mockall::automock)]
pub trait DisplayServer {
    /// Number of X screens on the connection.
    fn screen_count(&self) -> usize;

    /// Fresh resource lists for `screen`, or `None` if the query failed.
    fn resources(&self, screen: usize) -> Option<ResourceSnapshot>;

    /// Fresh state of one output.
    fn output_info(&self, screen: usize, output: OutputId) -> Option<OutputState>;

    /// Fresh state of one controller.
    fn crtc_info(&self, screen: usize, crtc: CrtcId) -> Option<CrtcState>;

    /// Rotation of the screen's current configuration.
    fn screen_rotation(&self, screen: usize) -> Rotation;

    /// Registers a new mode and returns its id (`ModeId(0)` on failure).
    fn create_mode(&self, screen: usize, mode: &ModeInfo) -> ModeId;

    /// Unregisters a mode.
    fn destroy_mode(&self, mode: ModeId);

    /// Adds a registered mode to an output's accepted list.
    fn add_output_mode(&self, output: OutputId, mode: ModeId);

    /// Removes a mode from an output's accepted list.
    fn delete_output_mode(&self, output: OutputId, mode: ModeId);

    /// Reconfigures one controller.  Returns `false` if the server rejected
    /// the request.
    fn set_crtc_config(&self, screen: usize, crtc: CrtcId, config: &CrtcConfig) -> bool;

    /// Resizes the screen's shared frame buffer.
    fn set_screen_size(&self, screen: usize, size: FrameBufferSize);

    /// Suspends processing of other clients' requests.
    fn grab_server(&self);

    /// Resumes processing of other clients' requests.
    fn ungrab_server(&self);

    /// Flushes the request queue and waits for every reply or fault.
    fn sync(&self);

    /// Starts routing faults to a private sink instead of the default
    /// handler.
    fn begin_fault_capture(&self);

    /// Restores the previous fault handler and returns how many faults were
    /// captured since [`begin_fault_capture`](Self::begin_fault_capture).
    fn end_fault_capture(&self) -> u32;
}

/// Holds the server grab for as long as it lives.
///
/// Dropping the guard ungrabs, so every exit path out of a transaction,
/// early returns included, releases the server.
#[must_use = "the server is ungrabbed as soon as the guard is dropped"]
pub struct ServerGrab<'s, S: DisplayServer + ?Sized> {
    server: &'s S,
}

impl<'s, S: DisplayServer + ?Sized> ServerGrab<'s, S> {
    pub fn new(server: &'s S) -> Self {
        server.grab_server();
        Self { server }
    }
}

impl<S: DisplayServer + ?Sized> Drop for ServerGrab<'_, S> {
    fn drop(&mut self) {
        self.server.ungrab_server();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
