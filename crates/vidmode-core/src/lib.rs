//! # vidmode-core
//!
//! Platform-independent building blocks for switching a live display output
//! to a caller-supplied video timing.
//!
//! This crate has no OS dependencies.  It defines:
//!
//! - **`domain::modeline`** – the caller-owned [`ModelineRequest`] record and
//!   its [`ModeClass`] classification bits.
//! - **`domain::mode`** – [`ModeInfo`], the platform's view of a registered
//!   mode, and the conversions between it and a request.
//! - **`domain::resources`** – point-in-time snapshots of outputs and
//!   controllers (CRTCs) as reported by the display server.
//! - **`domain::layout`** – the pure planner that decides, for a mode switch on
//!   one controller, where every sibling controller moves and how large the
//!   shared frame buffer must become.
//!
//! The `vidmode-xrandr` crate drives a real display server with these types.

pub mod domain;

pub use domain::ids::{CrtcId, InstanceId, InstanceIds, ModeId, OutputId};
pub use domain::layout::{plan_layout, CrtcRole, LayoutPlan, PlannedCrtc, TargetChange};
pub use domain::mode::{ModeFlags, ModeInfo, Rotation};
pub use domain::modeline::{mode_name, ModeClass, ModelineError, ModelineRequest, MODE_NAME_PREFIX};
pub use domain::resources::{CrtcConfig, CrtcState, FrameBufferSize, OutputState, ResourceSnapshot};
