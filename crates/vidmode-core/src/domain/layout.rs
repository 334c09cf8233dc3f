//! Multi-controller layout planning.
//!
//! All controllers of a screen scan out of one shared frame buffer.  When the
//! managed controller switches to a mode of a different size, controllers
//! placed to its right (or below it) must move by the size difference so they
//! stay adjacent, and the frame buffer must be resized to bound everything.
//!
//! [`plan_layout`] computes that new arrangement without touching the display
//! server.  The engine then applies it: disable every controller whose
//! [`CrtcRole::needs_reconfigure`] is true, resize the frame buffer, and
//! re-enable them with their planned state.
//!
//! # Shift rule
//!
//! With the target at origin `(tx, ty)` and old size `(ow, oh)` switching to
//! new size `(nw, nh)`, any other active controller with `x >= tx + ow` moves
//! to `x + (nw - ow)`; independently, `y >= ty + oh` moves to `y + (nh - oh)`.
//! Everything else keeps its origin.

use tracing::trace;

use super::ids::{CrtcId, ModeId, OutputId};
use super::resources::{CrtcState, FrameBufferSize};

/// How a controller takes part in a layout transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrtcRole {
    /// The managed controller; its mode or geometry changes.
    Target,
    /// The managed controller, already in the requested state.
    TargetUnchanged,
    /// Another active controller moved to stay adjacent to the target.
    Shifted,
    /// Another active controller left in place.
    Unchanged,
    /// A controller with no mode; ignored for shifting and bounding.
    Inactive,
}

impl CrtcRole {
    /// Returns `true` if the controller must be disabled before the frame
    /// buffer resize and re-enabled afterwards.
    pub fn needs_reconfigure(self) -> bool {
        matches!(self, Self::Target | Self::Shifted)
    }
}

/// The requested change on the managed controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetChange {
    pub crtc: CrtcId,
    /// Output the target drives; bound again if the controller lost it.
    pub output: OutputId,
    /// Origin the target keeps.
    pub x: i32,
    pub y: i32,
    /// Size before the switch, used for the shift thresholds.
    pub old_width: u32,
    pub old_height: u32,
    pub mode: ModeId,
    pub new_width: u32,
    pub new_height: u32,
}

/// A controller's state before and after the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCrtc {
    pub before: CrtcState,
    pub after: CrtcState,
    pub role: CrtcRole,
}

/// Output of [`plan_layout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    /// Controllers in the order they were supplied.
    pub crtcs: Vec<PlannedCrtc>,
    /// Minimal frame buffer width bounding every active controller.
    pub width: u32,
    /// Minimal frame buffer height bounding every active controller.
    pub height: u32,
}

impl LayoutPlan {
    /// Frame buffer size to request, with physical dimensions at 96 DPI.
    pub fn frame_buffer(&self) -> FrameBufferSize {
        FrameBufferSize::from_pixels(self.width, self.height)
    }

    /// The managed controller, if it was part of the snapshot.
    pub fn target(&self) -> Option<&PlannedCrtc> {
        self.crtcs
            .iter()
            .find(|c| matches!(c.role, CrtcRole::Target | CrtcRole::TargetUnchanged))
    }

    /// Controllers that must be disabled and re-enabled.
    pub fn affected(&self) -> impl Iterator<Item = &PlannedCrtc> {
        self.crtcs.iter().filter(|c| c.role.needs_reconfigure())
    }
}

/// Classifies every controller and computes the bounding frame buffer size.
///
/// `crtcs` is a fresh snapshot of all controllers sharing the frame buffer.
pub fn plan_layout(crtcs: Vec<CrtcState>, change: &TargetChange) -> LayoutPlan {
    let threshold_x = i64::from(change.x) + i64::from(change.old_width);
    let threshold_y = i64::from(change.y) + i64::from(change.old_height);
    let delta_x = i64::from(change.new_width) - i64::from(change.old_width);
    let delta_y = i64::from(change.new_height) - i64::from(change.old_height);

    let mut width: i64 = 0;
    let mut height: i64 = 0;
    let mut planned = Vec::with_capacity(crtcs.len());

    for before in crtcs {
        let mut after = before.clone();
        let role = if before.id == change.crtc {
            after.mode = Some(change.mode);
            after.x = change.x;
            after.y = change.y;
            after.width = change.new_width;
            after.height = change.new_height;
            if !after.outputs.contains(&change.output) {
                after.outputs.push(change.output);
            }
            if after == before {
                CrtcRole::TargetUnchanged
            } else {
                CrtcRole::Target
            }
        } else if !before.is_active() {
            CrtcRole::Inactive
        } else {
            let mut shifted = false;
            if i64::from(before.x) >= threshold_x && delta_x != 0 {
                after.x = to_coordinate(i64::from(before.x) + delta_x);
                shifted = true;
            }
            if i64::from(before.y) >= threshold_y && delta_y != 0 {
                after.y = to_coordinate(i64::from(before.y) + delta_y);
                shifted = true;
            }
            if shifted {
                CrtcRole::Shifted
            } else {
                CrtcRole::Unchanged
            }
        };

        if role != CrtcRole::Inactive {
            width = width.max(after.right());
            height = height.max(after.bottom());
        }

        trace!(
            crtc = %before.id,
            ?role,
            "{}x{}+{}+{} -> {}x{}+{}+{}",
            before.width, before.height, before.x, before.y,
            after.width, after.height, after.x, after.y
        );
        planned.push(PlannedCrtc { before, after, role });
    }

    LayoutPlan {
        crtcs: planned,
        width: to_extent(width),
        height: to_extent(height),
    }
}

fn to_coordinate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn to_extent(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

// ── Tests ─────────────────────────────────────────────────────────────────────
