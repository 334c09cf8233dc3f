//! The caller-owned timing record.
//!
//! A [`ModelineRequest`] is produced by a timing generator outside this
//! workspace and handed to the engine fully populated.  The engine only
//! writes back the platform handle (on create), the classification bits, and
//! the measured geometry/frequencies (on enumeration).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{InstanceId, ModeId};

/// Prefix of every mode name registered by this engine.
pub const MODE_NAME_PREFIX: &str = "VM-";

/// Classification bits attached to a [`ModelineRequest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeClass(pub u32);

impl ModeClass {
    /// The timing currently used by the desktop on the managed output.
    pub const DESKTOP: u32 = 1 << 0;
    /// The managed output is rotated left, right or inverted.
    pub const ROTATED: u32 = 1 << 1;
    /// The timing was registered with, or reported by, the XRandR platform.
    pub const XRANDR: u32 = 1 << 2;

    /// Returns `true` if every bit of `bits` is set.
    pub fn contains(&self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    /// Sets `bits`.
    pub fn insert(&mut self, bits: u32) {
        self.0 |= bits;
    }

    /// Clears `bits`.
    pub fn remove(&mut self, bits: u32) {
        self.0 &= !bits;
    }
}

/// Reasons a request cannot be turned into a platform mode.
#[derive(Debug, Error, PartialEq)]
pub enum ModelineError {
    #[error("pixel clock must be non-zero")]
    ZeroPixelClock,
    #[error("active area must be non-zero, got {width}x{height}")]
    EmptyActiveArea { width: u32, height: u32 },
    #[error("horizontal timing out of order: active {active} <= sync start {start} <= sync end {end} <= total {total} violated")]
    HorizontalOrder { active: u32, start: u32, end: u32, total: u32 },
    #[error("vertical timing out of order: active {active} <= sync start {start} <= sync end {end} <= total {total} violated")]
    VerticalOrder { active: u32, start: u32, end: u32, total: u32 },
}

/// A display timing plus the bookkeeping the engine round-trips through it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelineRequest {
    /// Pixel clock in Hz.
    pub pclock: u64,
    pub hactive: u32,
    /// Horizontal sync start.
    pub hbegin: u32,
    /// Horizontal sync end.
    pub hend: u32,
    pub htotal: u32,
    pub vactive: u32,
    /// Vertical sync start.
    pub vbegin: u32,
    /// Vertical sync end.
    pub vend: u32,
    pub vtotal: u32,
    /// Positive horizontal sync polarity.
    #[serde(default)]
    pub hsync: bool,
    /// Positive vertical sync polarity.
    #[serde(default)]
    pub vsync: bool,
    #[serde(default)]
    pub interlace: bool,
    #[serde(default)]
    pub doublescan: bool,
    /// Horizontal frequency in Hz.
    #[serde(default)]
    pub hfreq: f64,
    /// Vertical frequency in Hz.
    #[serde(default)]
    pub vfreq: f64,
    #[serde(default)]
    pub refresh: f64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Platform mode id, `None` until the mode is registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_handle: Option<ModeId>,
    #[serde(default)]
    pub classification: ModeClass,
}

impl ModelineRequest {
    /// Checks that the timing fields describe a usable mode.
    ///
    /// # Errors
    ///
    /// Returns the first [`ModelineError`] found.
    pub fn validate(&self) -> Result<(), ModelineError> {
        if self.pclock == 0 {
            return Err(ModelineError::ZeroPixelClock);
        }
        if self.hactive == 0 || self.vactive == 0 {
            return Err(ModelineError::EmptyActiveArea {
                width: self.hactive,
                height: self.vactive,
            });
        }
        if !(self.hactive <= self.hbegin && self.hbegin <= self.hend && self.hend <= self.htotal) {
            return Err(ModelineError::HorizontalOrder {
                active: self.hactive,
                start: self.hbegin,
                end: self.hend,
                total: self.htotal,
            });
        }
        if !(self.vactive <= self.vbegin && self.vbegin <= self.vend && self.vend <= self.vtotal) {
            return Err(ModelineError::VerticalOrder {
                active: self.vactive,
                start: self.vbegin,
                end: self.vend,
                total: self.vtotal,
            });
        }
        Ok(())
    }

    /// Returns `true` if the platform handle is set.
    pub fn is_registered(&self) -> bool {
        self.platform_handle.is_some()
    }
}

/// Derives the platform mode name for `request` registered by `instance`.
///
/// The name is unique per (instance, active width, active height, vertical
/// frequency), e.g. `VM-0_320x240_59.940000`.
pub fn mode_name(instance: InstanceId, request: &ModelineRequest) -> String {
    format!(
        "{MODE_NAME_PREFIX}{}_{}x{}_{:.6}",
        instance, request.hactive, request.vactive, request.vfreq
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request() -> ModelineRequest {
        ModelineRequest {
            pclock: 6_700_000,
            hactive: 320,
            hbegin: 336,
            hend: 367,
            htotal: 426,
            vactive: 240,
            vbegin: 244,
            vend: 247,
            vtotal: 262,
            vfreq: 60.022,
            ..Default::default()
        }
    }

    #[test]
    fn test_mode_name_embeds_instance_geometry_and_frequency() {
        let name = mode_name(InstanceId(3), &make_request());
        assert_eq!(name, "VM-3_320x240_60.022000");
    }

    #[test]
    fn test_mode_name_differs_between_instances_for_identical_timing() {
        let request = make_request();
        let a = mode_name(InstanceId(0), &request);
        let b = mode_name(InstanceId(1), &request);
        assert_ne!(a, b, "names must not collide across instances");
    }

    #[test]
    fn test_validate_accepts_well_formed_timing() {
        assert_eq!(make_request().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_zero_pixel_clock() {
        let mut request = make_request();
        request.pclock = 0;
        assert_eq!(request.validate(), Err(ModelineError::ZeroPixelClock));
    }

    #[test]
    fn test_validate_rejects_empty_active_area() {
        let mut request = make_request();
        request.vactive = 0;
        assert!(matches!(
            request.validate(),
            Err(ModelineError::EmptyActiveArea { width: 320, height: 0 })
        ));
    }

    #[test]
    fn test_validate_rejects_sync_past_total() {
        let mut request = make_request();
        request.hend = 500;
        assert!(matches!(request.validate(), Err(ModelineError::HorizontalOrder { .. })));
    }

    #[test]
    fn test_mode_class_insert_contains_remove() {
        let mut class = ModeClass::default();
        class.insert(ModeClass::DESKTOP | ModeClass::XRANDR);
        assert!(class.contains(ModeClass::DESKTOP));
        assert!(!class.contains(ModeClass::ROTATED));

        class.remove(ModeClass::DESKTOP);
        assert!(!class.contains(ModeClass::DESKTOP));
        assert!(class.contains(ModeClass::XRANDR));
    }

    #[test]
    fn test_request_deserializes_from_toml_with_defaults() {
        let text = r#"
pclock = 6700000
hactive = 320
hbegin = 336
hend = 367
htotal = 426
vactive = 240
vbegin = 244
vend = 247
vtotal = 262
vfreq = 60.0
"#;
        let request: ModelineRequest = toml::from_str(text).expect("deserialize");
        assert_eq!(request.hactive, 320);
        assert!(!request.interlace);
        assert_eq!(request.platform_handle, None);
        assert_eq!(request.classification, ModeClass::default());
    }
}
