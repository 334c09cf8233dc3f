//! vidmode-xrandr entry point.
//!
//! ```text
//! vidmode-xrandr [--simulate] [CONFIG]
//! ```
//!
//! Loads the configuration, opens an engine on the configured output and
//! lists its modes.  If the configuration carries a `[modeline]`, the mode is
//! registered, shown for `hold_seconds`, and then the desktop mode is
//! restored and the custom mode removed again.
//!
//! `--simulate` runs the same session against an in-memory two-monitor
//! display instead of the X server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vidmode_core::{InstanceId, InstanceIds, ModeClass, ModelineRequest};
use vidmode_xrandr::infrastructure::config::{load_config, load_config_from, AppConfig};
use vidmode_xrandr::infrastructure::simulated::SimulatedDisplay;
use vidmode_xrandr::{DisplayServer, TimingEngine};

fn main() -> anyhow::Result<()> {
    let mut simulate = false;
    let mut config_path: Option<PathBuf> = None;
    for arg in std::env::args_os().skip(1) {
        if arg == "--simulate" {
            simulate = true;
        } else {
            config_path = Some(PathBuf::from(arg));
        }
    }

    let config = match &config_path {
        Some(path) => load_config_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => load_config().context("loading default config")?,
    };

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.engine.log_level)),
        )
        .init();

    info!("vidmode-xrandr starting");
    let mut ids = InstanceIds::starting_at(config.engine.instance_id);
    let id = ids.allocate();

    if simulate {
        let sim = SimulatedDisplay::side_by_side(&[(640, 480), (640, 600)]);
        let mut engine = TimingEngine::new(sim, &config.engine.device_name, id);
        engine.init()?;
        return run_session(&mut engine, &config);
    }

    open_and_run(&config, id)
}

#[cfg(target_os = "linux")]
fn open_and_run(config: &AppConfig, id: InstanceId) -> anyhow::Result<()> {
    let mut engine =
        vidmode_xrandr::infrastructure::xrandr::open_engine(&config.engine.device_name, id)?;
    run_session(&mut engine, config)
}

#[cfg(not(target_os = "linux"))]
fn open_and_run(_config: &AppConfig, _id: InstanceId) -> anyhow::Result<()> {
    anyhow::bail!("the XRandR backend is only available on Linux; use --simulate")
}

fn run_session<S: DisplayServer>(
    engine: &mut TimingEngine<S>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    for timing in engine.list_timings()? {
        info!(
            handle = ?timing.platform_handle,
            class = timing.classification.0,
            "{}x{}@{:.3} Hz",
            timing.width, timing.height, timing.vfreq
        );
    }

    let Some(mut modeline) = config.modeline.clone() else {
        return Ok(());
    };

    engine.create_mode(&mut modeline).context("registering modeline")?;
    let switched = engine.set_timing(&modeline);
    match &switched {
        Ok(outcome) => {
            info!(?outcome, seconds = config.hold_seconds, "holding mode");
            std::thread::sleep(Duration::from_secs(config.hold_seconds));
        }
        Err(e) => error!("mode switch failed: {e}"),
    }

    let desktop = ModelineRequest {
        classification: ModeClass(ModeClass::DESKTOP),
        ..Default::default()
    };
    if let Err(e) = engine.set_timing(&desktop) {
        warn!("could not restore desktop mode: {e}");
    }
    engine.destroy_mode(&mut modeline).context("removing modeline")?;

    switched.map(|_| ()).context("switching to modeline")
}
