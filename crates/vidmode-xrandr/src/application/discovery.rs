//! Output discovery: picks the output the engine will manage.
//!
//! Screens are scanned in order and, within each screen, outputs in the
//! server's order.  Only outputs that are connected *and* driven by a
//! controller are candidates; the `screenN` ordinal counts those candidates
//! per screen, starting at 0.  The first candidate whose name or ordinal
//! matches the selector wins.

use tracing::{debug, error, info, warn};

use super::display_server::DisplayServer;
use super::engine::{Baseline, ManagedOutput, TimingEngine, TimingError};

/// Parsed form of the device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputSelector {
    /// First candidate.
    Auto,
    /// Connector name, optionally also read as an ordinal.
    Named { name: String, ordinal: Option<usize> },
}

impl OutputSelector {
    pub(crate) fn parse(device_name: &str) -> Self {
        if device_name == "auto" {
            return Self::Auto;
        }
        Self::Named {
            name: device_name.to_string(),
            ordinal: parse_screen_ordinal(device_name),
        }
    }

    fn matches(&self, output_name: &str, ordinal: usize) -> bool {
        match self {
            Self::Auto => true,
            Self::Named { name, ordinal: wanted } => {
                name == output_name || *wanted == Some(ordinal)
            }
        }
    }
}

/// Reads `"screen<digits>"` as an ordinal.
fn parse_screen_ordinal(device_name: &str) -> Option<usize> {
    let digits = device_name.strip_prefix("screen")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl<S: DisplayServer> TimingEngine<S> {
    /// Selects the managed output and records its desktop baseline.
    ///
    /// Calling `init` again after a successful selection is a no-op that
    /// returns the already-managed output.
    ///
    /// # Errors
    ///
    /// [`TimingError::NoOutputDetected`] if no candidate matches.
    pub fn init(&mut self) -> Result<&ManagedOutput, TimingError> {
        if self.output.is_none() {
            self.discover()?;
        }
        self.output.as_ref().ok_or(TimingError::NoOutputDetected)
    }

    fn discover(&mut self) -> Result<(), TimingError> {
        let selector = OutputSelector::parse(&self.device_name);
        let screens = self.server.screen_count();

        for screen in 0..screens {
            debug!(instance = %self.id, screen, "checking screen");
            let Some(resources) = self.server.resources(screen) else {
                error!(instance = %self.id, screen, "could not read screen resources");
                continue;
            };
            let desktop_rotation = self.server.screen_rotation(screen);
            let mut ordinal = 0usize;

            for (index, &output_id) in resources.outputs.iter().enumerate() {
                let Some(output) = self.server.output_info(screen, output_id) else {
                    error!(instance = %self.id, output = %output_id, "could not read output information");
                    continue;
                };
                let candidate = output.connected && output.crtc.is_some();
                let mut selected = false;

                if candidate && self.output.is_none() && selector.matches(&output.name, ordinal) {
                    if let Some(crtc_id) = output.crtc {
                        match self.server.crtc_info(screen, crtc_id) {
                            Some(crtc) => {
                                let desktop_mode =
                                    crtc.mode.and_then(|id| resources.mode(id)).cloned();
                                if desktop_mode.is_none() {
                                    warn!(instance = %self.id, crtc = %crtc_id, "controller has no active mode");
                                }
                                self.baseline = Baseline {
                                    rotated: crtc.rotation.is_rotated(),
                                    desktop_mode,
                                    desktop_rotation,
                                    last_crtc: Some(crtc),
                                };
                                self.output = Some(ManagedOutput {
                                    screen,
                                    index,
                                    id: output_id,
                                    name: output.name.clone(),
                                    crtc: crtc_id,
                                });
                                selected = true;
                            }
                            None => {
                                error!(instance = %self.id, crtc = %crtc_id, "could not read controller information");
                            }
                        }
                    }
                }
                if candidate {
                    ordinal += 1;
                }

                debug!(
                    instance = %self.id,
                    screen,
                    index,
                    name = %output.name,
                    connected = output.connected,
                    crtc = ?output.crtc,
                    selected,
                    "output"
                );
            }

            if self.output.is_some() {
                break;
            }
        }

        match &self.output {
            Some(output) => {
                let desktop = self
                    .baseline
                    .desktop_mode
                    .as_ref()
                    .map(|m| format!("{}x{}@{:.2}", m.width, m.height, m.vfreq()))
                    .unwrap_or_else(|| "none".to_string());
                info!(
                    instance = %self.id,
                    device = %self.device_name,
                    output = %output.name,
                    screen = output.screen,
                    desktop = %desktop,
                    rotation = self.baseline.desktop_rotation.describe(),
                    "managing output"
                );
                Ok(())
            }
            None => {
                error!(instance = %self.id, device = %self.device_name, "no screen detected");
                Err(TimingError::NoOutputDetected)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::display_server::MockDisplayServer;
    use crate::infrastructure::simulated::SimulatedDisplay;
    use vidmode_core::{InstanceId, Rotation};

    #[test]
    fn test_parse_screen_ordinal_accepts_multiple_digits() {
        assert_eq!(parse_screen_ordinal("screen0"), Some(0));
        assert_eq!(parse_screen_ordinal("screen12"), Some(12));
        assert_eq!(parse_screen_ordinal("screen"), None);
        assert_eq!(parse_screen_ordinal("screen1a"), None);
        assert_eq!(parse_screen_ordinal("HDMI-1"), None);
    }

    #[test]
    fn test_selector_auto_matches_anything() {
        assert!(OutputSelector::parse("auto").matches("DP-3", 5));
    }

    #[test]
    fn test_selector_named_matches_name_or_ordinal() {
        let selector = OutputSelector::parse("screen1");
        assert!(selector.matches("screen1", 0));
        assert!(selector.matches("HDMI-2", 1));
        assert!(!selector.matches("HDMI-2", 0));
    }

    #[test]
    fn test_init_auto_picks_first_connected_output_with_controller() {
        // Arrange: A disconnected, B connected without controller, C usable
        let sim = SimulatedDisplay::new();
        let screen = sim.add_screen();
        let mode = sim.add_mode(screen, 1024, 768);
        sim.add_output(screen, "A", false);
        sim.add_output(screen, "B", true);
        let c = sim.add_output(screen, "C", true);
        sim.add_crtc(screen, Some(c), Some(mode), 0, 0);

        // Act
        let mut engine = TimingEngine::new(sim, "auto", InstanceId(0));
        let output = engine.init().expect("init").clone();

        // Assert
        assert_eq!(output.name, "C");
        assert_eq!(output.index, 2);
        let desktop = engine.baseline().desktop_mode.as_ref().expect("desktop mode");
        assert_eq!((desktop.width, desktop.height), (1024, 768));
    }

    #[test]
    fn test_init_screen_ordinal_counts_candidates_only() {
        let sim = SimulatedDisplay::new();
        let screen = sim.add_screen();
        let mode = sim.add_mode(screen, 640, 480);
        let a = sim.add_output(screen, "A", true);
        sim.add_output(screen, "idle", false);
        let b = sim.add_output(screen, "B", true);
        sim.add_crtc(screen, Some(a), Some(mode), 0, 0);
        sim.add_crtc(screen, Some(b), Some(mode), 640, 0);

        let mut engine = TimingEngine::new(sim, "screen1", InstanceId(0));
        assert_eq!(engine.init().expect("init").name, "B");
    }

    #[test]
    fn test_init_exact_name_match() {
        let sim = SimulatedDisplay::new();
        let screen = sim.add_screen();
        let mode = sim.add_mode(screen, 640, 480);
        let a = sim.add_output(screen, "DP-1", true);
        let b = sim.add_output(screen, "HDMI-1", true);
        sim.add_crtc(screen, Some(a), Some(mode), 0, 0);
        sim.add_crtc(screen, Some(b), Some(mode), 640, 0);

        let mut engine = TimingEngine::new(sim, "HDMI-1", InstanceId(0));
        let output = engine.init().expect("init").clone();
        assert_eq!(output.id, b);
    }

    #[test]
    fn test_init_records_rotated_controller() {
        let sim = SimulatedDisplay::new();
        let screen = sim.add_screen();
        let mode = sim.add_mode(screen, 640, 480);
        let a = sim.add_output(screen, "A", true);
        let crtc = sim.add_crtc(screen, Some(a), Some(mode), 0, 0);
        sim.set_crtc_rotation(crtc, Rotation::LEFT);
        sim.set_screen_rotation(screen, Rotation::LEFT);

        let mut engine = TimingEngine::new(sim, "auto", InstanceId(0));
        engine.init().expect("init");

        assert!(engine.baseline().rotated);
        assert_eq!(engine.baseline().desktop_rotation, Rotation::LEFT);
    }

    #[test]
    fn test_init_no_match_is_no_output_detected() {
        let sim = SimulatedDisplay::new();
        let screen = sim.add_screen();
        let mode = sim.add_mode(screen, 640, 480);
        let a = sim.add_output(screen, "A", true);
        sim.add_crtc(screen, Some(a), Some(mode), 0, 0);

        let mut engine = TimingEngine::new(sim, "VGA-9", InstanceId(0));
        assert!(matches!(engine.init(), Err(TimingError::NoOutputDetected)));
        assert!(engine.managed_output().is_none());
    }

    #[test]
    fn test_init_skips_screen_whose_resources_fail() {
        // Arrange: screen 0 fails, screen 1 has nothing
        let mut server = MockDisplayServer::new();
        server.expect_screen_count().return_const(2usize);
        server.expect_resources().times(2).returning(|screen| {
            if screen == 0 {
                None
            } else {
                Some(Default::default())
            }
        });
        server
            .expect_screen_rotation()
            .times(1)
            .return_const(Rotation::NORMAL);

        // Act
        let mut engine = TimingEngine::new(server, "auto", InstanceId(0));

        // Assert
        assert!(matches!(engine.init(), Err(TimingError::NoOutputDetected)));
    }
}
