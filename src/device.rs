//! Interfaces to the external capture hardware.
//!
//! The scheduler drives the tuner, capture source, and live sink exclusively
//! through these traits, so the rotation logic can run against the Linux DVB
//! devices in production and against scripted doubles in tests.

use std::path::PathBuf;

/// Outcome of one bounded read from a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadChunk {
    /// `buf[..n]` holds freshly captured bytes.
    Data(usize),
    /// Nothing available this iteration; retry on the next one.
    Empty,
}

/// Acquires and releases the hardware path for one channel.
///
/// Exactly one handle exists at a time: the scheduler releases the previous
/// session's handle before acquiring the next one.
pub trait Tuner {
    type Handle;
    type Capture: CaptureSource;

    /// Lock the receiver onto `frequency_hz` and configure the demultiplex
    /// path. Failure here is fatal to the process.
    fn acquire(&mut self, frequency_hz: u32) -> Result<Self::Handle, DeviceError>;

    /// Open the capture byte stream for a tuned handle.
    fn open_capture(&mut self, handle: &mut Self::Handle) -> Result<Self::Capture, DeviceError>;

    /// Release the hardware path. Best-effort; the caller logs errors and
    /// continues.
    fn release(&mut self, handle: Self::Handle) -> Result<(), DeviceError>;
}

/// A tuned byte stream.
pub trait CaptureSource {
    /// One bounded read into `buf`. Non-blocking: returns `Empty` when no
    /// data is available rather than stalling the loop.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadChunk, DeviceError>;
}

/// Consumes captured bytes for real-time monitoring.
pub trait LiveSink {
    /// Bounded injection of one chunk. The caller logs failures and never
    /// aborts capture because of them.
    fn inject(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Tear the sink down at session end.
    fn shutdown(&mut self) {}
}

/// Opens a live sink for each recording session.
pub trait Monitor {
    type Sink: LiveSink;

    fn open(&mut self) -> Result<Self::Sink, DeviceError>;
}

/// Errors reported by the device layer.
#[derive(Debug)]
pub enum DeviceError {
    /// Failed to open a device node
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The frontend rejected the tune request
    TuneFailed {
        frequency_hz: u32,
        source: std::io::Error,
    },
    /// The demultiplexer rejected its filter setup
    DemuxSetupFailed(std::io::Error),
    /// A capture read failed
    ReadFailed(std::io::Error),
    /// The live sink could not be opened or written
    SinkFailed(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::OpenFailed { path, source } => {
                write!(
                    f,
                    "Failed to open device '{}': {}\n\nMake sure the DVB adapter is present and you have permission to use it.",
                    path.display(),
                    source
                )
            }
            DeviceError::TuneFailed {
                frequency_hz,
                source,
            } => {
                write!(f, "Failed to tune to {} Hz: {}", frequency_hz, source)
            }
            DeviceError::DemuxSetupFailed(e) => {
                write!(f, "Failed to configure the demultiplexer: {}", e)
            }
            DeviceError::ReadFailed(e) => write!(f, "Capture read failed: {}", e),
            DeviceError::SinkFailed(msg) => write!(f, "Live monitor: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::OpenFailed { source, .. } => Some(source),
            DeviceError::TuneFailed { source, .. } => Some(source),
            DeviceError::DemuxSetupFailed(e) => Some(e),
            DeviceError::ReadFailed(e) => Some(e),
            DeviceError::SinkFailed(_) => None,
        }
    }
}
