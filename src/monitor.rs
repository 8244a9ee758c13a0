//! Live playback sink.
//!
//! Captured bytes are injected into an external player process as they
//! arrive so an operator can watch the live stream. The player reads raw TS
//! from stdin; `ffplay` by default.

use std::process::{Child, ChildStdin, Command, Stdio};

use crate::device::{DeviceError, LiveSink, Monitor};

/// Default player command used when none is configured.
pub const DEFAULT_PLAYER: &str = "ffplay";

/// A spawned player process fed through its stdin.
#[derive(Debug)]
pub struct PlayerSink {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl PlayerSink {
    /// Spawn the player reading raw TS from stdin.
    pub fn spawn(command: &str) -> Result<Self, DeviceError> {
        let mut child = Command::new(command)
            .args(["-loglevel", "quiet", "-fflags", "nobuffer", "-i", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DeviceError::SinkFailed(format!(
                        "{} not found. Install it or disable monitoring with --no-monitor.",
                        command
                    ))
                } else {
                    DeviceError::SinkFailed(format!("failed to spawn {}: {}", command, e))
                }
            })?;

        let stdin = child.stdin.take();
        Ok(PlayerSink { child, stdin })
    }
}

impl LiveSink for PlayerSink {
    fn inject(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DeviceError::SinkFailed("player stdin closed".to_string()))?;
        std::io::Write::write_all(stdin, bytes)
            .map_err(|e| DeviceError::SinkFailed(format!("player write failed: {}", e)))
    }

    fn shutdown(&mut self) {
        // Closing stdin lets the player drain and exit; kill if it lingers.
        self.stdin = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for PlayerSink {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            self.shutdown();
        }
    }
}

/// Session monitor selected at startup: a real player or nothing.
pub enum MonitorMode {
    Player { command: String },
    Disabled,
}

/// Sink handed to a session by [`MonitorMode`].
pub enum MonitorSink {
    Player(PlayerSink),
    Disabled,
}

impl Monitor for MonitorMode {
    type Sink = MonitorSink;

    fn open(&mut self) -> Result<MonitorSink, DeviceError> {
        match self {
            MonitorMode::Player { command } => {
                Ok(MonitorSink::Player(PlayerSink::spawn(command)?))
            }
            MonitorMode::Disabled => Ok(MonitorSink::Disabled),
        }
    }
}

impl LiveSink for MonitorSink {
    fn inject(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        match self {
            MonitorSink::Player(sink) => sink.inject(bytes),
            MonitorSink::Disabled => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        if let MonitorSink::Player(sink) = self {
            sink.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LiveSink;

    #[test]
    fn test_disabled_sink_accepts_bytes() {
        let mut mode = MonitorMode::Disabled;
        let mut sink = mode.open().unwrap();
        assert!(sink.inject(b"anything").is_ok());
        sink.shutdown();
    }

    #[test]
    fn test_missing_player_reports_sink_error() {
        let err = PlayerSink::spawn("definitely-not-a-real-player-binary").unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains("not found"));
        assert!(msg.contains("--no-monitor"));
    }

    #[test]
    fn test_inject_into_real_process() {
        // `cat` stands in for a player: anything that drains stdin works.
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .expect("cat should spawn");
        let stdin = child.stdin.take();
        let mut sink = PlayerSink { child, stdin };

        assert!(sink.inject(b"ts bytes").is_ok());
        sink.shutdown();
    }
}
