//! The capture/rotation scheduler.
//!
//! A single-threaded state machine that owns the live recording session:
//! tune, settle, record, rotate, and hand each closed segment off to
//! post-processing. Exactly one session holds hardware handles at any time;
//! the previous session is fully torn down before the next one is acquired.

use std::time::{Duration, Instant};

use crate::channels::{Channel, ChannelCatalog};
use crate::device::{CaptureSource, DeviceError, LiveSink, Monitor, ReadChunk, Tuner};
use crate::postprocess::{JobDispatcher, PendingJob, PostProcess};
use crate::segment::{SegmentError, SegmentWriter};
use crate::stop::StopFlag;

/// Tunables for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Directory where segment files are created.
    pub workdir: std::path::PathBuf,
    /// Fixed wait between tuning and opening the capture path. The lock time
    /// is hardware-determined, so this wait is deliberately not cancellable.
    pub settle: Duration,
    /// Wall-clock recording length of one segment.
    pub rotate_every: Duration,
    /// Size of the bounded read buffer.
    pub read_buffer: usize,
    /// Wait after an empty read, keeps the loop from spinning hot.
    pub idle_wait: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions {
            workdir: std::path::PathBuf::from("tsSaveBackup"),
            settle: Duration::from_millis(5000),
            rotate_every: Duration::from_secs(1800),
            read_buffer: 4096,
            idle_wait: Duration::from_millis(2),
        }
    }
}

/// Why the scheduler stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The operator asked for a graceful stop.
    Requested,
    /// The session hit an unrecoverable I/O error; flushed data was
    /// preserved and handed to post-processing.
    SessionIo,
}

/// Final accounting returned by [`Scheduler::run`].
#[derive(Debug)]
pub struct RunSummary {
    pub cause: StopCause,
    pub segments: u64,
    pub rotations: u64,
    pub bytes_captured: u64,
}

/// Errors that end the process: acquisition failures the scheduler cannot
/// repair without operator intervention.
#[derive(Debug)]
pub enum SchedulerError {
    Acquire(DeviceError),
    Segment(SegmentError),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::Acquire(e) => write!(f, "{}", e),
            SchedulerError::Segment(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::Acquire(e) => Some(e),
            SchedulerError::Segment(e) => Some(e),
        }
    }
}

impl From<DeviceError> for SchedulerError {
    fn from(e: DeviceError) -> Self {
        SchedulerError::Acquire(e)
    }
}

impl From<SegmentError> for SchedulerError {
    fn from(e: SegmentError) -> Self {
        SchedulerError::Segment(e)
    }
}

/// How one recording ended.
enum RecordingEnd {
    /// The rotation interval elapsed; switch to the next channel.
    RotationDue,
    /// The operator requested a graceful stop.
    StopRequested,
    /// A session-fatal I/O error; shut down preserving flushed data.
    Aborted,
}

/// The live recording session. Holds the only hardware handles in the
/// process; torn down as one unit at rotation or shutdown.
struct Session<H, C, S> {
    channel: Channel,
    tuner: H,
    capture: C,
    sink: Option<S>,
    segment: SegmentWriter,
    started_at: Instant,
}

/// Drives the tune → settle → record → rotate cycle.
pub struct Scheduler<T, M, P>
where
    T: Tuner,
    M: Monitor,
    P: PostProcess + Send + Sync + 'static,
{
    catalog: ChannelCatalog,
    tuner: T,
    monitor: M,
    jobs: JobDispatcher<P>,
    stop: StopFlag,
    opts: SchedulerOptions,
}

impl<T, M, P> Scheduler<T, M, P>
where
    T: Tuner,
    M: Monitor,
    P: PostProcess + Send + Sync + 'static,
{
    pub fn new(
        catalog: ChannelCatalog,
        tuner: T,
        monitor: M,
        jobs: JobDispatcher<P>,
        stop: StopFlag,
        opts: SchedulerOptions,
    ) -> Self {
        Scheduler {
            catalog,
            tuner,
            monitor,
            jobs,
            stop,
            opts,
        }
    }

    /// Run the state machine until a stop request or a session-fatal error.
    ///
    /// Acquisition failures (tune, demux, capture or segment open) are
    /// returned as errors; everything else ends in a graceful shutdown with
    /// the final segment handed off synchronously.
    pub fn run(mut self) -> Result<RunSummary, SchedulerError> {
        let mut summary = RunSummary {
            cause: StopCause::Requested,
            segments: 0,
            rotations: 0,
            bytes_captured: 0,
        };

        loop {
            // Honor a stop that arrived between rotations before touching
            // the hardware again.
            if self.stop.is_requested() {
                self.jobs.drain();
                return Ok(summary);
            }

            let mut session = self.begin_session()?;
            let end = self.record(&mut session, &mut summary);
            let job = self.teardown(session);
            summary.segments += 1;

            match end {
                RecordingEnd::RotationDue => {
                    self.jobs.dispatch(job);
                    summary.rotations += 1;
                    let next = self.catalog.advance();
                    log::info!("rotating to channel '{}'", next.name);
                }
                RecordingEnd::StopRequested => {
                    self.jobs.run_blocking(&job);
                    self.jobs.drain();
                    summary.cause = StopCause::Requested;
                    return Ok(summary);
                }
                RecordingEnd::Aborted => {
                    self.jobs.run_blocking(&job);
                    self.jobs.drain();
                    summary.cause = StopCause::SessionIo;
                    return Ok(summary);
                }
            }
        }
    }

    /// TUNING and SETTLING, then open the capture path and segment file.
    fn begin_session(&mut self) -> Result<Session<T::Handle, T::Capture, M::Sink>, SchedulerError> {
        let channel = self.catalog.current().clone();
        log::info!("tuning '{}' at {} Hz", channel.name, channel.frequency);

        let mut tuner = self.tuner.acquire(channel.frequency)?;
        std::thread::sleep(self.opts.settle);

        let capture = self.tuner.open_capture(&mut tuner)?;
        let segment = SegmentWriter::create(&self.opts.workdir)?;
        let sink = Some(self.monitor.open()?);

        log::info!(
            "recording '{}' to {}",
            channel.name,
            segment.path().display()
        );

        Ok(Session {
            channel,
            tuner,
            capture,
            sink,
            segment,
            started_at: Instant::now(),
        })
    }

    /// The RECORDING read loop. Each iteration: poll the stop request, check
    /// the rotation due-time, then perform one bounded read.
    fn record(
        &mut self,
        session: &mut Session<T::Handle, T::Capture, M::Sink>,
        summary: &mut RunSummary,
    ) -> RecordingEnd {
        let mut buf = vec![0u8; self.opts.read_buffer];

        loop {
            if self.stop.is_requested() {
                return RecordingEnd::StopRequested;
            }
            if session.started_at.elapsed() >= self.opts.rotate_every {
                return RecordingEnd::RotationDue;
            }

            match session.capture.read_chunk(&mut buf) {
                Ok(ReadChunk::Data(n)) => {
                    let bytes = &buf[..n];

                    // Monitoring first, then the durable copy; a sink failure
                    // only costs monitoring for the rest of the session.
                    let mut sink_failed = false;
                    if let Some(sink) = session.sink.as_mut() {
                        if let Err(e) = sink.inject(bytes) {
                            log::warn!(
                                "live sink failed, monitoring disabled for this session: {}",
                                e
                            );
                            sink_failed = true;
                        }
                    }
                    if sink_failed {
                        if let Some(mut sink) = session.sink.take() {
                            sink.shutdown();
                        }
                    }

                    if let Err(e) = session.segment.append(bytes) {
                        log::error!("segment write failed: {}", e);
                        return RecordingEnd::Aborted;
                    }
                    summary.bytes_captured += n as u64;
                }
                Ok(ReadChunk::Empty) => {
                    log::debug!("no bytes available from '{}'", session.channel.name);
                    std::thread::sleep(self.opts.idle_wait);
                }
                Err(e) => {
                    log::error!("capture read failed: {}", e);
                    return RecordingEnd::Aborted;
                }
            }
        }
    }

    /// Shared teardown for ROTATING and SHUTTING_DOWN: close the segment,
    /// release every handle (best-effort), and produce the pending job.
    fn teardown(&mut self, session: Session<T::Handle, T::Capture, M::Sink>) -> PendingJob {
        let Session {
            channel,
            tuner,
            capture,
            sink,
            segment,
            ..
        } = session;

        let closed = segment.finish();

        if let Some(mut sink) = sink {
            sink.shutdown();
        }
        // The capture path must be closed before the tuner is released.
        drop(capture);
        if let Err(e) = self.tuner.release(tuner) {
            log::warn!("failed to release tuner for '{}': {}", channel.name, e);
        }

        log::info!(
            "closed segment {} ({} bytes)",
            closed.path.display(),
            closed.bytes
        );

        PendingJob::from_segment(closed.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = SchedulerOptions::default();
        assert_eq!(opts.settle, Duration::from_millis(5000));
        assert_eq!(opts.rotate_every, Duration::from_secs(1800));
        assert_eq!(opts.read_buffer, 4096);
    }

    #[test]
    fn test_stop_cause_equality() {
        assert_eq!(StopCause::Requested, StopCause::Requested);
        assert_ne!(StopCause::Requested, StopCause::SessionIo);
    }
}
