//! Platform mode descriptors.
//!
//! [`ModeInfo`] mirrors the display server's mode record.  The flag and
//! rotation bit values are the RandR protocol values, so backends can pass
//! them through unchanged.

use super::ids::ModeId;
use super::modeline::ModelineRequest;

/// Mode flag word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModeFlags(pub u64);

impl ModeFlags {
    pub const HSYNC_POSITIVE: u64 = 0x0001;
    pub const HSYNC_NEGATIVE: u64 = 0x0002;
    pub const VSYNC_POSITIVE: u64 = 0x0004;
    pub const VSYNC_NEGATIVE: u64 = 0x0008;
    pub const INTERLACE: u64 = 0x0010;
    pub const DOUBLESCAN: u64 = 0x0020;

    /// Folds a request's polarity and scan flags into one flag word.
    ///
    /// Exactly one of the positive/negative bits is set for each axis.
    pub fn from_request(request: &ModelineRequest) -> Self {
        let mut bits = 0;
        if request.interlace {
            bits |= Self::INTERLACE;
        }
        if request.doublescan {
            bits |= Self::DOUBLESCAN;
        }
        bits |= if request.hsync {
            Self::HSYNC_POSITIVE
        } else {
            Self::HSYNC_NEGATIVE
        };
        bits |= if request.vsync {
            Self::VSYNC_POSITIVE
        } else {
            Self::VSYNC_NEGATIVE
        };
        Self(bits)
    }

    pub fn has(&self, bit: u64) -> bool {
        self.0 & bit != 0
    }
}

/// Controller rotation/reflection bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rotation(pub u16);

impl Rotation {
    pub const NORMAL: Self = Self(0x1);
    pub const LEFT: Self = Self(0x2);
    pub const INVERTED: Self = Self(0x4);
    pub const RIGHT: Self = Self(0x8);

    /// Returns `true` for left, right or inverted orientations.
    pub fn is_rotated(&self) -> bool {
        self.0 & 0xe != 0
    }

    /// Returns `true` for left or right, where the scanned-out extent is
    /// the mode's size with width and height exchanged.
    pub fn swaps_axes(&self) -> bool {
        self.0 & (Self::LEFT.0 | Self::RIGHT.0) != 0
    }

    /// Human-readable orientation, used in logs.
    pub fn describe(&self) -> &'static str {
        if self.0 & Self::LEFT.0 != 0 {
            "left"
        } else if self.0 & Self::RIGHT.0 != 0 {
            "right"
        } else if self.0 & Self::INVERTED.0 != 0 {
            "inverted"
        } else {
            "normal"
        }
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// A mode object as known to the display server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeInfo {
    /// Server-assigned id; zero for a descriptor not yet registered.
    pub id: ModeId,
    pub name: String,
    /// Pixel clock in Hz.
    pub dot_clock: u64,
    pub width: u32,
    pub h_sync_start: u32,
    pub h_sync_end: u32,
    pub h_total: u32,
    pub h_skew: u32,
    pub height: u32,
    pub v_sync_start: u32,
    pub v_sync_end: u32,
    pub v_total: u32,
    pub flags: ModeFlags,
}

impl ModeInfo {
    /// Builds an unregistered descriptor named `name` from a request's timing.
    pub fn from_request(name: String, request: &ModelineRequest) -> Self {
        Self {
            id: ModeId(0),
            name,
            dot_clock: request.pclock,
            width: request.hactive,
            h_sync_start: request.hbegin,
            h_sync_end: request.hend,
            h_total: request.htotal,
            h_skew: 0,
            height: request.vactive,
            v_sync_start: request.vbegin,
            v_sync_end: request.vend,
            v_total: request.vtotal,
            flags: ModeFlags::from_request(request),
        }
    }

    /// Horizontal frequency in Hz (`dot_clock / h_total`).
    pub fn hfreq(&self) -> f64 {
        if self.h_total == 0 {
            return 0.0;
        }
        self.dot_clock as f64 / self.h_total as f64
    }

    /// Vertical frequency in Hz, doubled for interlaced modes.
    pub fn vfreq(&self) -> f64 {
        if self.v_total == 0 {
            return 0.0;
        }
        let fields = if self.flags.has(ModeFlags::INTERLACE) { 2.0 } else { 1.0 };
        self.hfreq() / self.v_total as f64 * fields
    }

    /// Copies this mode's timing into `request`, deriving the frequencies.
    ///
    /// The handle is set to this mode's id; classification bits are left to
    /// the caller.
    pub fn fill_request(&self, request: &mut ModelineRequest) {
        request.platform_handle = Some(self.id);
        request.pclock = self.dot_clock;
        request.hactive = self.width;
        request.hbegin = self.h_sync_start;
        request.hend = self.h_sync_end;
        request.htotal = self.h_total;
        request.vactive = self.height;
        request.vbegin = self.v_sync_start;
        request.vend = self.v_sync_end;
        request.vtotal = self.v_total;
        request.interlace = self.flags.has(ModeFlags::INTERLACE);
        request.doublescan = self.flags.has(ModeFlags::DOUBLESCAN);
        request.hsync = self.flags.has(ModeFlags::HSYNC_POSITIVE);
        request.vsync = self.flags.has(ModeFlags::VSYNC_POSITIVE);
        request.hfreq = self.hfreq();
        request.vfreq = self.vfreq();
        request.refresh = request.vfreq;
        request.width = self.width;
        request.height = self.height;
    }

    /// Returns `true` if the timing fields equal the request's.
    pub fn matches_timing(&self, request: &ModelineRequest) -> bool {
        self.dot_clock == request.pclock
            && self.width == request.hactive
            && self.h_sync_start == request.hbegin
            && self.h_sync_end == request.hend
            && self.h_total == request.htotal
            && self.height == request.vactive
            && self.v_sync_start == request.vbegin
            && self.v_sync_end == request.vend
            && self.v_total == request.vtotal
            && self.flags == ModeFlags::from_request(request)
    }
}
