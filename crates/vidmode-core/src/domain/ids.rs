//! Identifier newtypes.
//!
//! The display server hands out 32-bit resource ids (XIDs) for modes, outputs
//! and controllers.  Wrapping each in its own type keeps a mode id from being
//! passed where a controller id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a mode object registered with the display server.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ModeId(pub u64);

/// Identifies an output (connector).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u64);

/// Identifies a display controller (CRTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrtcId(pub u64);

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Display for CrtcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Identity of one engine instance.
///
/// Mode names embed this id so two instances in the same process (or two
/// processes sharing one display server) never register colliding names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out sequential [`InstanceId`]s.
///
/// Owned by whoever creates engines, so there is no process-wide counter.
#[derive(Debug, Default)]
pub struct InstanceIds {
    next: u32,
}

impl InstanceIds {
    /// Starts allocating at `first`.
    pub fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    /// Returns the next unused id.
    pub fn allocate(&mut self) -> InstanceId {
        let id = InstanceId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }
}
