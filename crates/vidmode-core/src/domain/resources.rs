//! Point-in-time views of the display server's outputs and controllers.
//!
//! None of these types are cached by the engine between operations: the
//! server state can change under us at any time, so every operation fetches
//! fresh snapshots and drops them before returning.

use super::ids::{CrtcId, ModeId, OutputId};
use super::mode::{ModeInfo, Rotation};

/// Dots per inch assumed when deriving the frame buffer's physical size.
pub const ASSUMED_DPI: f64 = 96.0;

/// The screen-wide resource lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// Outputs in enumeration order.
    pub outputs: Vec<OutputId>,
    /// Controllers in enumeration order.
    pub crtcs: Vec<CrtcId>,
    /// Every mode registered with the screen.
    pub modes: Vec<ModeInfo>,
}

impl ResourceSnapshot {
    /// Looks up a registered mode by id.
    pub fn mode(&self, id: ModeId) -> Option<&ModeInfo> {
        self.modes.iter().find(|m| m.id == id)
    }
}

/// One output (connector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputState {
    pub id: OutputId,
    /// Connector name, e.g. `"HDMI-1"`.
    pub name: String,
    pub connected: bool,
    /// Controller currently driving this output, if any.
    pub crtc: Option<CrtcId>,
    /// Modes the output accepts, in the server's order.
    pub modes: Vec<ModeId>,
}

/// One controller's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcState {
    pub id: CrtcId,
    /// Left edge within the frame buffer.
    pub x: i32,
    /// Top edge within the frame buffer.
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Active mode; `None` when the controller is disabled.
    pub mode: Option<ModeId>,
    pub rotation: Rotation,
    /// Outputs bound to this controller.
    pub outputs: Vec<OutputId>,
}

impl CrtcState {
    /// A disabled controller with no outputs.
    pub fn disabled(id: CrtcId) -> Self {
        Self {
            id,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            mode: None,
            rotation: Rotation::NORMAL,
            outputs: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_some()
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }
}

/// Arguments of a controller reconfiguration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcConfig {
    pub x: i32,
    pub y: i32,
    pub mode: Option<ModeId>,
    pub rotation: Rotation,
    pub outputs: Vec<OutputId>,
}

impl CrtcConfig {
    /// Detaches the controller's mode and outputs.
    pub fn disabled() -> Self {
        Self {
            x: 0,
            y: 0,
            mode: None,
            rotation: Rotation::NORMAL,
            outputs: Vec::new(),
        }
    }

    /// Re-applies `state` as-is.
    pub fn from_state(state: &CrtcState) -> Self {
        Self {
            x: state.x,
            y: state.y,
            mode: state.mode,
            rotation: state.rotation,
            outputs: state.outputs.clone(),
        }
    }
}

/// Size of the shared frame buffer in pixels and millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferSize {
    pub width: u32,
    pub height: u32,
    pub mm_width: u32,
    pub mm_height: u32,
}

impl FrameBufferSize {
    /// Derives the physical size assuming [`ASSUMED_DPI`].
    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mm_width: pixels_to_mm(width),
            mm_height: pixels_to_mm(height),
        }
    }
}

fn pixels_to_mm(pixels: u32) -> u32 {
    (25.4 * f64::from(pixels) / ASSUMED_DPI) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_buffer_size_uses_96_dpi() {
        let size = FrameBufferSize::from_pixels(1920, 1080);
        // 25.4 * 1920 / 96 = 508.0, 25.4 * 1080 / 96 = 285.75
        assert_eq!(size.mm_width, 508);
        assert_eq!(size.mm_height, 285);
    }

    #[test]
    fn test_crtc_edges_do_not_overflow_i32() {
        let crtc = CrtcState {
            x: i32::MAX,
            width: 10,
            ..CrtcState::disabled(CrtcId(1))
        };
        assert_eq!(crtc.right(), i64::from(i32::MAX) + 10);
    }

    #[test]
    fn test_snapshot_mode_lookup_by_id() {
        let snapshot = ResourceSnapshot {
            modes: vec![ModeInfo {
                id: ModeId(0x42),
                name: "640x480".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(snapshot.mode(ModeId(0x42)).map(|m| m.name.as_str()), Some("640x480"));
        assert!(snapshot.mode(ModeId(0x43)).is_none());
    }

    #[test]
    fn test_crtc_config_from_state_keeps_rotation_and_outputs() {
        let state = CrtcState {
            id: CrtcId(0x40),
            x: 640,
            y: 0,
            width: 640,
            height: 480,
            mode: Some(ModeId(7)),
            rotation: Rotation::LEFT,
            outputs: vec![OutputId(0x50)],
        };
        let config = CrtcConfig::from_state(&state);
        assert_eq!(config.rotation, Rotation::LEFT);
        assert_eq!(config.outputs, vec![OutputId(0x50)]);
        assert_eq!((config.x, config.y, config.mode), (640, 0, Some(ModeId(7))));
    }
}
