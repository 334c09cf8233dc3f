//! Scoped capture of asynchronous display server faults.
//!
//! X reports most request failures asynchronously: the call returns, and an
//! error event arrives once the queue is flushed.  A [`FaultTrap`] wraps each
//! platform call in `sync / capture / call / sync / release` so that a fault
//! is attributed to exactly the call that caused it and recorded as a bit in
//! the operation's [`FaultMask`].
//!
//! Each engine operation creates its own trap, so masks start clean and never
//! leak between operations.  The underlying capture is process-global on X;
//! two engines driving the same connection from different threads would see
//! each other's faults.

use std::fmt;

use tracing::error;

use super::display_server::DisplayServer;

/// Bitmask of the steps that faulted during one operation.
///
/// The meaning of each bit is local to the operation that raised it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultMask(pub u32);

impl FaultMask {
    pub fn is_clean(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    pub fn insert(&mut self, flag: u32) {
        self.0 |= flag;
    }
}

impl fmt::Display for FaultMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Per-operation fault collector.
pub struct FaultTrap<'s, S: DisplayServer + ?Sized> {
    server: &'s S,
    mask: FaultMask,
}

impl<'s, S: DisplayServer + ?Sized> FaultTrap<'s, S> {
    pub fn new(server: &'s S) -> Self {
        Self {
            server,
            mask: FaultMask::default(),
        }
    }

    /// Runs one platform call under capture.
    ///
    /// If the server reports any fault for the call, `flag` is set in the
    /// mask.  The call's own return value is passed through untouched.
    pub fn run<T>(&mut self, flag: u32, call: &'static str, f: impl FnOnce(&S) -> T) -> T {
        self.server.sync();
        self.server.begin_fault_capture();
        let value = f(self.server);
        self.server.sync();
        let faults = self.server.end_fault_capture();
        if faults > 0 {
            error!(call, flag = %FaultMask(flag), faults, "display server reported a fault");
            self.mask.insert(flag);
        }
        value
    }

    /// Runs a call that also returns a success status.
    ///
    /// Returns `true` only if the status was success and no fault was
    /// captured.  Either kind of failure sets `flag`.
    pub fn run_checked(
        &mut self,
        flag: u32,
        call: &'static str,
        f: impl FnOnce(&S) -> bool,
    ) -> bool {
        let faults_before = self.mask;
        self.mask = FaultMask::default();
        let status_ok = self.run(flag, call, f);
        let faulted = self.mask.contains(flag);
        self.mask.insert(faults_before.0);
        if !status_ok {
            error!(call, flag = %FaultMask(flag), "display server rejected the request");
            self.mask.insert(flag);
        }
        status_ok && !faulted
    }

    /// Marks `flag` without running anything.
    pub fn raise(&mut self, flag: u32) {
        self.mask.insert(flag);
    }

    pub fn tripped(&self, flag: u32) -> bool {
        self.mask.contains(flag)
    }

    pub fn mask(&self) -> FaultMask {
        self.mask
    }

    pub fn is_clean(&self) -> bool {
        self.mask.is_clean()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
