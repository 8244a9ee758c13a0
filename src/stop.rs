//! Graceful-stop capability.
//!
//! A sticky flag set by either a `q` keystroke on stdin or Ctrl+C. The
//! scheduler polls it with zero wait at the top of every read-loop
//! iteration, so stop latency is bounded by one iteration plus teardown.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop-request flag. Cloning hands out another view of the same
/// flag; once requested it stays set.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        StopFlag::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Non-blocking check.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wire Ctrl+C to the stop flag.
pub fn install_ctrlc(stop: &StopFlag) -> Result<(), ctrlc::Error> {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
        stop.request();
        eprintln!("\nReceived Ctrl+C, stopping...");
    })
}

/// Spawn the keystroke listener: `q` requests a stop, any other input is
/// ignored. Returns the raw-mode guard; dropping it restores the terminal.
///
/// Fails when stdin is not a terminal; the caller can continue without
/// keystroke control (Ctrl+C still works).
pub fn spawn_key_listener(stop: &StopFlag) -> std::io::Result<RawModeGuard> {
    let guard = RawModeGuard::enable()?;
    let stop = stop.clone();

    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut byte = [0u8; 1];
        loop {
            match stdin.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if byte[0] == b'q' {
                        stop.request();
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });

    Ok(guard)
}

/// Puts the terminal into non-canonical, no-echo mode so single keystrokes
/// arrive without Enter; restores the original settings on drop.
pub struct RawModeGuard {
    #[cfg(unix)]
    original: libc::termios,
}

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        // Safety: plain termios calls on the process's own stdin.
        #[cfg(unix)]
        unsafe {
            let mut original: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(libc::STDIN_FILENO, &mut original) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let mut raw = original;
            raw.c_lflag &= !(libc::ICANON | libc::ECHO);
            if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            return Ok(RawModeGuard { original });
        }
        #[cfg(not(unix))]
        {
            return Ok(RawModeGuard {});
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            let _ = libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.original);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_flag_starts_clear() {
        let stop = StopFlag::new();
        assert!(!stop.is_requested());
    }

    #[test]
    fn test_stop_flag_is_sticky() {
        let stop = StopFlag::new();
        stop.request();
        assert!(stop.is_requested());
        assert!(stop.is_requested(), "polling never clears the request");
    }

    #[test]
    fn test_clones_share_the_flag() {
        let stop = StopFlag::new();
        let view = stop.clone();
        view.request();
        assert!(stop.is_requested());
    }

    #[test]
    fn test_flag_crosses_threads() {
        let stop = StopFlag::new();
        let remote = stop.clone();
        std::thread::spawn(move || remote.request())
            .join()
            .unwrap();
        assert!(stop.is_requested());
    }
}
