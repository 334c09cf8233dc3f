//! The timing engine: one managed output on one display connection.
//!
//! Operations are split across sibling modules, one `impl` block each:
//!
//! | Module             | Operations                                               |
//! |--------------------|----------------------------------------------------------|
//! | `discovery`        | [`init`](TimingEngine::init)                             |
//! | `mode_lifecycle`   | `create_mode`, `destroy_mode`, `update_mode`, `find_mode` |
//! | `set_timing`       | `set_timing`                                             |
//! | `enumerate`        | `get_timing`, `list_timings`                             |
//!
//! Every operation requires a managed output.  Until [`init`](TimingEngine::init)
//! has selected one, each fails with [`TimingError::NoOutputDetected`] without
//! touching the display server.

use thiserror::Error;
use tracing::error;

use vidmode_core::{CrtcId, CrtcState, InstanceId, ModeInfo, ModelineError, OutputId, Rotation};

use super::display_server::DisplayServer;
use super::fault_trap::FaultMask;

/// Longest device selector kept, in characters.
pub const MAX_DEVICE_NAME: usize = 31;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum TimingError {
    #[error("missing {library} capability: {detail}")]
    MissingCapability {
        library: &'static str,
        detail: String,
    },
    #[error("cannot connect to display server (DISPLAY={display})")]
    DisplayUnavailable { display: String },
    #[error("no screen detected")]
    NoOutputDetected,
    #[error("invalid modeline: {0}")]
    InvalidModeline(#[from] ModelineError),
    #[error("modeline has no platform handle")]
    HandleUnset,
    #[error("mode not found")]
    ModeNotFound,
    #[error("output {0} is not driven by any controller")]
    OutputWithoutController(String),
    #[error("{call} failed (fault mask {mask})")]
    PlatformFault { call: &'static str, mask: FaultMask },
    #[error("controllers {crtcs:?} could not be re-enabled")]
    PartialTransaction { crtcs: Vec<CrtcId> },
    #[error("{0} returned no data")]
    Query(&'static str),
}

/// The output selected by [`TimingEngine::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedOutput {
    /// X screen the output belongs to.
    pub screen: usize,
    /// Position in the screen's output list.
    pub index: usize,
    pub id: OutputId,
    pub name: String,
    /// Controller driving the output when it was selected.
    pub crtc: CrtcId,
}

/// What the engine remembers between operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    /// Controller state after the last completed mode switch, or at
    /// selection time.
    pub last_crtc: Option<CrtcState>,
    /// The mode the output was using when it was selected.
    pub desktop_mode: Option<ModeInfo>,
    pub desktop_rotation: Rotation,
    /// Whether the output's controller was rotated at selection time.
    pub rotated: bool,
}

/// Drives one output through mode lifecycle and switch operations.
pub struct TimingEngine<S: DisplayServer> {
    pub(crate) id: InstanceId,
    pub(crate) server: S,
    pub(crate) device_name: String,
    pub(crate) output: Option<ManagedOutput>,
    pub(crate) baseline: Baseline,
    pub(crate) cursor: usize,
}

impl<S: DisplayServer> TimingEngine<S> {
    /// Creates an engine that will manage the output matching `device_name`.
    ///
    /// `device_name` is `"auto"`, a connector name such as `"DP-1"`, or
    /// `"screenN"`; it is truncated to [`MAX_DEVICE_NAME`] characters.
    /// Nothing is queried until [`init`](Self::init).
    pub fn new(server: S, device_name: &str, id: InstanceId) -> Self {
        if device_name.chars().count() > MAX_DEVICE_NAME {
            error!(instance = %id, device = device_name, "device name too long, truncating to {MAX_DEVICE_NAME} characters");
        }
        Self {
            id,
            server,
            device_name: device_name.chars().take(MAX_DEVICE_NAME).collect(),
            output: None,
            baseline: Baseline::default(),
            cursor: 0,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn managed_output(&self) -> Option<&ManagedOutput> {
        self.output.as_ref()
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// The display server this engine drives.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Consumes the engine, returning the display server.
    pub fn into_server(self) -> S {
        self.server
    }

    /// Returns a copy of the managed output, or fails without touching the
    /// server.
    pub(crate) fn require_output(&self, operation: &'static str) -> Result<ManagedOutput, TimingError> {
        match &self.output {
            Some(output) => Ok(output.clone()),
            None => {
                error!(instance = %self.id, operation, "no screen detected");
                Err(TimingError::NoOutputDetected)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::display_server::MockDisplayServer;

    #[test]
    fn test_new_truncates_device_name() {
        let long = "DisplayPort-connector-with-a-very-long-name";
        let engine = TimingEngine::new(MockDisplayServer::new(), long, InstanceId(0));
        assert_eq!(engine.device_name().chars().count(), MAX_DEVICE_NAME);
        assert!(long.starts_with(engine.device_name()));
    }

    #[test]
    fn test_new_does_not_query_server() {
        // A mock with no expectations panics on any call.
        let engine = TimingEngine::new(MockDisplayServer::new(), "auto", InstanceId(3));
        assert!(engine.managed_output().is_none());
        assert_eq!(engine.id(), InstanceId(3));
    }

    #[test]
    fn test_error_messages_are_readable() {
        let err = TimingError::PlatformFault {
            call: "XRRCreateMode",
            mask: FaultMask(0x01),
        };
        assert_eq!(err.to_string(), "XRRCreateMode failed (fault mask 0x01)");
        assert_eq!(TimingError::NoOutputDetected.to_string(), "no screen detected");
    }
}
