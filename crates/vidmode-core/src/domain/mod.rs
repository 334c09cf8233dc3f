//! Domain entities for vidmode.
//!
//! Everything in here is plain data plus pure functions, so the whole module
//! can be unit-tested without a display server.

/// Identifier newtypes for platform objects and engine instances.
pub mod ids;

/// Multi-controller layout planning.
///
/// See [`layout::plan_layout`] for the entry point.
pub mod layout;

pub mod mode;
pub mod modeline;
pub mod resources;
