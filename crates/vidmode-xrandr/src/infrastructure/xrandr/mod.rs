//! XRandR backend.
//!
//! libX11 and libXrandr are bound at run time by [`Capabilities`]; the
//! connection itself is [`XrandrServer`].

mod capabilities;
mod server;

pub use capabilities::Capabilities;
pub use server::XrandrServer;

use tracing::info;
use vidmode_core::InstanceId;

use crate::application::engine::{TimingEngine, TimingError};

/// Connects to the default display and selects the output matching
/// `device_name`.
///
/// # Errors
///
/// Any error from [`XrandrServer::connect`] or [`TimingEngine::init`].
pub fn open_engine(
    device_name: &str,
    id: InstanceId,
) -> Result<TimingEngine<XrandrServer>, TimingError> {
    let server = XrandrServer::connect()?;
    let (major, minor) = server.version();
    info!(instance = %id, "connected to X server, RandR {major}.{minor}");

    let mut engine = TimingEngine::new(server, device_name, id);
    engine.init()?;
    Ok(engine)
}
