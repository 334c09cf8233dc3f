//! [`DisplayServer`] over a live X display with the RandR extension.
//!
//! Every query fetches fresh data from the server and copies it into owned
//! `vidmode_core` types before the Xlib allocation is freed, so nothing
//! returned from here borrows X memory.
//!
//! # Fault capture
//!
//! Xlib delivers protocol errors to a single process-wide handler.  While a
//! capture is active, [`record_fault`] appends each error to a thread-local
//! sink; [`end_fault_capture`](DisplayServer::end_fault_capture) restores the
//! previous handler, logs the sink's contents and returns the count.

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_ulong};
use std::{ptr, slice};

use tracing::{debug, error};
use x11_dl::xlib::{Display, Time, Window, XErrorEvent};
use x11_dl::xrandr::{RRCrtc, RRMode, RROutput, XRRModeInfo, XRRScreenResources};

use vidmode_core::{
    CrtcConfig, CrtcId, CrtcState, FrameBufferSize, ModeFlags, ModeId, ModeInfo, OutputId,
    OutputState, ResourceSnapshot, Rotation,
};

use super::capabilities::Capabilities;
use crate::application::display_server::DisplayServer;
use crate::application::engine::TimingError;

type XErrorHandler = Option<unsafe extern "C" fn(*mut Display, *mut XErrorEvent) -> c_int>;

const CURRENT_TIME: Time = 0;
const RR_CONNECTED: c_int = 0;
const RR_SET_CONFIG_SUCCESS: c_int = 0;

#[derive(Debug, Clone, Copy)]
struct CapturedFault {
    error_code: u8,
    request_code: u8,
    minor_code: u8,
}

thread_local! {
    static CAPTURED: RefCell<Vec<CapturedFault>> = const { RefCell::new(Vec::new()) };
}

/// Xlib error handler installed while a capture is active.
unsafe extern "C" fn record_fault(_display: *mut Display, event: *mut XErrorEvent) -> c_int {
    // SAFETY: Xlib passes a valid event that lives for the duration of the
    // callback; a null pointer is tolerated.
    if let Some(event) = event.as_ref() {
        let fault = CapturedFault {
            error_code: event.error_code,
            request_code: event.request_code,
            minor_code: event.minor_code,
        };
        CAPTURED.with(|sink| sink.borrow_mut().push(fault));
    }
    0
}

/// Builds a slice over an Xlib-owned array, treating null or non-positive
/// lengths as empty.
///
/// # Safety
///
/// `data` must point to at least `len` initialised elements that stay valid
/// for `'a`.
unsafe fn raw_slice<'a, T>(data: *const T, len: c_int) -> &'a [T] {
    match usize::try_from(len) {
        Ok(n) if n > 0 && !data.is_null() => slice::from_raw_parts(data, n),
        _ => &[],
    }
}

/// Copies a length-delimited Xlib string.
///
/// # Safety
///
/// `data` must point to at least `len` readable bytes.
unsafe fn raw_name(data: *const c_char, len: usize) -> String {
    if data.is_null() || len == 0 {
        return String::new();
    }
    let bytes = slice::from_raw_parts(data.cast::<u8>(), len);
    String::from_utf8_lossy(bytes).into_owned()
}

fn mode_from_raw(raw: &XRRModeInfo) -> ModeInfo {
    ModeInfo {
        id: ModeId(u64::from(raw.id)),
        // SAFETY: `name` holds `nameLength` bytes owned by the resources
        // allocation `raw` was read from.
        name: unsafe { raw_name(raw.name, raw.nameLength as usize) },
        dot_clock: u64::from(raw.dotClock),
        width: raw.width,
        h_sync_start: raw.hSyncStart,
        h_sync_end: raw.hSyncEnd,
        h_total: raw.hTotal,
        h_skew: raw.hSkew,
        height: raw.height,
        v_sync_start: raw.vSyncStart,
        v_sync_end: raw.vSyncEnd,
        v_total: raw.vTotal,
        flags: ModeFlags(u64::from(raw.modeFlags)),
    }
}

/// Owns an `XRRScreenResources` allocation.
struct Resources<'s> {
    caps: &'s Capabilities,
    raw: *mut XRRScreenResources,
}

impl Resources<'_> {
    fn outputs(&self) -> &[RROutput] {
        // SAFETY: `raw` is non-null and owned until drop.
        unsafe { raw_slice((*self.raw).outputs, (*self.raw).noutput) }
    }

    fn crtcs(&self) -> &[RRCrtc] {
        // SAFETY: as above.
        unsafe { raw_slice((*self.raw).crtcs, (*self.raw).ncrtc) }
    }

    fn modes(&self) -> &[XRRModeInfo] {
        // SAFETY: as above.
        unsafe { raw_slice((*self.raw).modes, (*self.raw).nmode) }
    }
}

impl Drop for Resources<'_> {
    fn drop(&mut self) {
        // SAFETY: `raw` came from XRRGetScreenResourcesCurrent and is freed once.
        unsafe { (self.caps.xrandr.XRRFreeScreenResources)(self.raw) };
    }
}

/// A connection to an X display.
pub struct XrandrServer {
    caps: Capabilities,
    display: *mut Display,
    previous_handler: Cell<XErrorHandler>,
    version: (i32, i32),
}

impl XrandrServer {
    /// Binds the libraries and opens the display named by `DISPLAY`.
    ///
    /// # Errors
    ///
    /// - [`TimingError::MissingCapability`] if a library cannot be bound.
    /// - [`TimingError::DisplayUnavailable`] if the display cannot be opened.
    pub fn connect() -> Result<Self, TimingError> {
        let caps = Capabilities::load()?;

        // SAFETY: a null name selects the DISPLAY environment variable; the
        // returned pointer is closed in Drop.
        let display = unsafe { (caps.xlib.XOpenDisplay)(ptr::null()) };
        if display.is_null() {
            let display_env =
                std::env::var("DISPLAY").unwrap_or_else(|_| "<unset>".to_string());
            error!(display = %display_env, "XOpenDisplay failed");
            return Err(TimingError::DisplayUnavailable {
                display: display_env,
            });
        }

        let (mut major, mut minor): (c_int, c_int) = (0, 0);
        // SAFETY: `display` is a valid open connection.
        unsafe { (caps.xrandr.XRRQueryVersion)(display, &mut major, &mut minor) };
        debug!(major, minor, "XRandR version");

        Ok(Self {
            caps,
            display,
            previous_handler: Cell::new(None),
            version: (major, minor),
        })
    }

    /// RandR protocol version reported by the server.
    pub fn version(&self) -> (i32, i32) {
        self.version
    }

    fn root(&self, screen: usize) -> Option<Window> {
        if screen >= self.screen_count() {
            return None;
        }
        let screen = c_int::try_from(screen).ok()?;
        // SAFETY: `screen` is within the display's screen count.
        Some(unsafe { (self.caps.xlib.XRootWindow)(self.display, screen) })
    }

    fn screen_resources(&self, screen: usize) -> Option<Resources<'_>> {
        let root = self.root(screen)?;
        // SAFETY: `root` is a valid root window on this display.
        let raw = unsafe { (self.caps.xrandr.XRRGetScreenResourcesCurrent)(self.display, root) };
        if raw.is_null() {
            error!(screen, "XRRGetScreenResourcesCurrent returned null");
            return None;
        }
        Some(Resources {
            caps: &self.caps,
            raw,
        })
    }

    fn error_text(&self, code: u8) -> String {
        let mut buf = [0 as c_char; 256];
        // SAFETY: `buf` is writable for its full length; the last byte is
        // forced to NUL before reading it back.
        unsafe {
            (self.caps.xlib.XGetErrorText)(
                self.display,
                c_int::from(code),
                buf.as_mut_ptr(),
                buf.len() as c_int,
            );
        }
        buf[buf.len() - 1] = 0;
        // SAFETY: `buf` is NUL-terminated.
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for XrandrServer {
    fn drop(&mut self) {
        // SAFETY: `display` was opened in `connect` and is closed once.
        unsafe { (self.caps.xlib.XCloseDisplay)(self.display) };
    }
}

impl DisplayServer for XrandrServer {
    fn screen_count(&self) -> usize {
        // SAFETY: `display` is a valid open connection.
        let count = unsafe { (self.caps.xlib.XScreenCount)(self.display) };
        usize::try_from(count).unwrap_or(0)
    }

    fn resources(&self, screen: usize) -> Option<ResourceSnapshot> {
        let res = self.screen_resources(screen)?;
        Some(ResourceSnapshot {
            outputs: res.outputs().iter().map(|&o| OutputId(u64::from(o))).collect(),
            crtcs: res.crtcs().iter().map(|&c| CrtcId(u64::from(c))).collect(),
            modes: res.modes().iter().map(mode_from_raw).collect(),
        })
    }

    fn output_info(&self, screen: usize, output: OutputId) -> Option<OutputState> {
        let res = self.screen_resources(screen)?;
        // SAFETY: `res.raw` is live; the returned allocation is freed below.
        let raw = unsafe {
            (self.caps.xrandr.XRRGetOutputInfo)(self.display, res.raw, output.0 as RROutput)
        };
        if raw.is_null() {
            return None;
        }
        // SAFETY: `raw` is non-null and valid until XRRFreeOutputInfo.
        let state = unsafe {
            let info = &*raw;
            OutputState {
                id: output,
                name: raw_name(info.name, usize::try_from(info.nameLen).unwrap_or(0)),
                connected: info.connection as c_int == RR_CONNECTED,
                crtc: (info.crtc != 0).then(|| CrtcId(u64::from(info.crtc))),
                modes: raw_slice(info.modes, info.nmode)
                    .iter()
                    .map(|&m| ModeId(u64::from(m)))
                    .collect(),
            }
        };
        // SAFETY: freed exactly once.
        unsafe { (self.caps.xrandr.XRRFreeOutputInfo)(raw) };
        Some(state)
    }

    fn crtc_info(&self, screen: usize, crtc: CrtcId) -> Option<CrtcState> {
        let res = self.screen_resources(screen)?;
        // SAFETY: `res.raw` is live; the returned allocation is freed below.
        let raw =
            unsafe { (self.caps.xrandr.XRRGetCrtcInfo)(self.display, res.raw, crtc.0 as RRCrtc) };
        if raw.is_null() {
            return None;
        }
        // SAFETY: `raw` is non-null and valid until XRRFreeCrtcInfo.
        let state = unsafe {
            let info = &*raw;
            CrtcState {
                id: crtc,
                x: info.x,
                y: info.y,
                width: info.width,
                height: info.height,
                mode: (info.mode != 0).then(|| ModeId(u64::from(info.mode))),
                rotation: Rotation(info.rotation),
                outputs: raw_slice(info.outputs, info.noutput)
                    .iter()
                    .map(|&o| OutputId(u64::from(o)))
                    .collect(),
            }
        };
        // SAFETY: freed exactly once.
        unsafe { (self.caps.xrandr.XRRFreeCrtcInfo)(raw) };
        Some(state)
    }

    fn screen_rotation(&self, screen: usize) -> Rotation {
        let Some(root) = self.root(screen) else {
            return Rotation::default();
        };
        // SAFETY: `root` is valid; the configuration is freed below.
        unsafe {
            let config = (self.caps.xrandr.XRRGetScreenInfo)(self.display, root);
            if config.is_null() {
                return Rotation::default();
            }
            let mut current: x11_dl::xrandr::Rotation = 0;
            (self.caps.xrandr.XRRConfigCurrentConfiguration)(config, &mut current);
            (self.caps.xrandr.XRRFreeScreenConfigInfo)(config);
            Rotation(current)
        }
    }

    fn create_mode(&self, screen: usize, mode: &ModeInfo) -> ModeId {
        let Some(root) = self.root(screen) else {
            return ModeId(0);
        };
        let Ok(name) = CString::new(mode.name.as_str()) else {
            error!(name = %mode.name, "mode name contains a NUL byte");
            return ModeId(0);
        };
        let mut info = XRRModeInfo {
            id: 0,
            width: mode.width,
            height: mode.height,
            dotClock: mode.dot_clock as c_ulong,
            hSyncStart: mode.h_sync_start,
            hSyncEnd: mode.h_sync_end,
            hTotal: mode.h_total,
            hSkew: mode.h_skew,
            vSyncStart: mode.v_sync_start,
            vSyncEnd: mode.v_sync_end,
            vTotal: mode.v_total,
            name: name.as_ptr() as *mut c_char,
            nameLength: mode.name.len() as c_uint,
            modeFlags: mode.flags.0 as c_ulong,
        };
        // SAFETY: `info` and the name it points to outlive the call; Xlib
        // copies both into the request.
        let id = unsafe { (self.caps.xrandr.XRRCreateMode)(self.display, root, &mut info) };
        ModeId(u64::from(id))
    }

    fn destroy_mode(&self, mode: ModeId) {
        // SAFETY: `display` is valid; a stale id raises a captured fault.
        unsafe { (self.caps.xrandr.XRRDestroyMode)(self.display, mode.0 as RRMode) };
    }

    fn add_output_mode(&self, output: OutputId, mode: ModeId) {
        // SAFETY: as above.
        unsafe {
            (self.caps.xrandr.XRRAddOutputMode)(self.display, output.0 as RROutput, mode.0 as RRMode)
        };
    }

    fn delete_output_mode(&self, output: OutputId, mode: ModeId) {
        // SAFETY: as above.
        unsafe {
            (self.caps.xrandr.XRRDeleteOutputMode)(
                self.display,
                output.0 as RROutput,
                mode.0 as RRMode,
            )
        };
    }

    fn set_crtc_config(&self, screen: usize, crtc: CrtcId, config: &CrtcConfig) -> bool {
        let Some(res) = self.screen_resources(screen) else {
            return false;
        };
        let mut outputs: Vec<RROutput> = config.outputs.iter().map(|o| o.0 as RROutput).collect();
        let outputs_ptr = if outputs.is_empty() {
            ptr::null_mut()
        } else {
            outputs.as_mut_ptr()
        };
        // SAFETY: `res.raw` is live and `outputs` outlives the call.
        let status = unsafe {
            (self.caps.xrandr.XRRSetCrtcConfig)(
                self.display,
                res.raw,
                crtc.0 as RRCrtc,
                CURRENT_TIME,
                config.x,
                config.y,
                config.mode.map_or(0, |m| m.0 as RRMode),
                config.rotation.0,
                outputs_ptr,
                outputs.len() as c_int,
            )
        };
        status == RR_SET_CONFIG_SUCCESS
    }

    fn set_screen_size(&self, screen: usize, size: FrameBufferSize) {
        let Some(root) = self.root(screen) else {
            return;
        };
        let clamp = |v: u32| c_int::try_from(v).unwrap_or(c_int::MAX);
        // SAFETY: `root` is valid; an invalid size raises a captured fault.
        unsafe {
            (self.caps.xrandr.XRRSetScreenSize)(
                self.display,
                root,
                clamp(size.width),
                clamp(size.height),
                clamp(size.mm_width),
                clamp(size.mm_height),
            )
        };
    }

    fn grab_server(&self) {
        // SAFETY: `display` is a valid open connection.
        unsafe { (self.caps.xlib.XGrabServer)(self.display) };
    }

    fn ungrab_server(&self) {
        // SAFETY: as above.
        unsafe { (self.caps.xlib.XUngrabServer)(self.display) };
    }

    fn sync(&self) {
        // SAFETY: as above.
        unsafe { (self.caps.xlib.XSync)(self.display, 0) };
    }

    fn begin_fault_capture(&self) {
        CAPTURED.with(|sink| sink.borrow_mut().clear());
        // SAFETY: `record_fault` matches the handler signature and only
        // touches thread-local state.
        let previous = unsafe { (self.caps.xlib.XSetErrorHandler)(Some(record_fault)) };
        self.previous_handler.set(previous);
    }

    fn end_fault_capture(&self) -> u32 {
        // SAFETY: restores whatever handler was installed before the capture.
        unsafe { (self.caps.xlib.XSetErrorHandler)(self.previous_handler.take()) };
        let faults = CAPTURED.with(|sink| std::mem::take(&mut *sink.borrow_mut()));
        for fault in &faults {
            error!(
                code = fault.error_code,
                request = fault.request_code,
                minor = fault.minor_code,
                "X error: {}",
                self.error_text(fault.error_code)
            );
        }
        u32::try_from(faults.len()).unwrap_or(u32::MAX)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
