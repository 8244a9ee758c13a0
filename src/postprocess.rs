//! Segment post-processing: convert, compress, upload, clean up.
//!
//! The scheduler hands a finished segment over as a [`PendingJob`] and never
//! touches its files again. Jobs dispatched at rotation run on a detached
//! worker thread so the next session's tuning is never delayed; the final
//! job at shutdown runs synchronously on the scheduler thread.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A finished segment awaiting post-processing. Owns its paths: once
/// dispatched, nothing else in the process may touch them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub ts_path: PathBuf,
    pub aac_path: PathBuf,
}

impl PendingJob {
    /// Derive the job from a closed segment path (`.ts` → `.aac`).
    pub fn from_segment(ts_path: PathBuf) -> Self {
        let aac_path = ts_path.with_extension("aac");
        PendingJob { ts_path, aac_path }
    }
}

/// `path` with `.gz` appended, matching what `gzip` produces.
fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

/// Remote upload destinations for a job's two artifacts.
#[derive(Debug, Clone)]
pub struct RemoteTargets {
    /// rclone remote name.
    pub remote: String,
    /// Subpath for the compressed raw segment.
    pub raw_path: String,
    /// Subpath for the compressed audio derivative.
    pub audio_path: String,
}

impl Default for RemoteTargets {
    fn default() -> Self {
        RemoteTargets {
            remote: "tsSaver".to_string(),
            raw_path: "tsSaveBackup".to_string(),
            audio_path: "tsSaveBackup/Audio".to_string(),
        }
    }
}

/// One external operation per pipeline step. Each is pass/fail; failures are
/// logged by the runner and never reach the scheduler.
pub trait PostProcess {
    /// Extract the audio track of `ts` into `aac`.
    fn convert(&self, ts: &Path, aac: &Path) -> Result<(), StepError>;

    /// Compress `path` in place, producing `path.gz` and consuming the input.
    fn compress(&self, path: &Path) -> Result<(), StepError>;

    /// Copy `path` to `remote:subpath/`.
    fn upload(&self, path: &Path, remote: &str, subpath: &str) -> Result<(), StepError>;

    /// Delete a local artifact. Already-missing files are not an error.
    fn remove(&self, path: &Path) -> Result<(), StepError>;
}

/// Errors from individual post-processing steps.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("failed to run {command}: {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with {status}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("failed to remove '{path}': {source}")]
    RemoveFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Shell-utility implementation: ffmpeg, gzip, and rclone.
pub struct ShellSteps {
    /// AAC bitrate passed to ffmpeg, e.g. "192k".
    pub aac_bitrate: String,
}

impl Default for ShellSteps {
    fn default() -> Self {
        ShellSteps {
            aac_bitrate: "192k".to_string(),
        }
    }
}

fn run_command(program: &str, args: &[&str]) -> Result<(), StepError> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .map_err(|e| StepError::SpawnFailed {
            command: program.to_string(),
            source: e,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(StepError::CommandFailed {
            command: program.to_string(),
            status,
        })
    }
}

impl PostProcess for ShellSteps {
    fn convert(&self, ts: &Path, aac: &Path) -> Result<(), StepError> {
        let ts = ts.to_string_lossy();
        let aac = aac.to_string_lossy();
        run_command(
            "ffmpeg",
            &[
                "-i",
                &ts,
                "-vn",
                "-c:a",
                "aac",
                "-b:a",
                self.aac_bitrate.as_str(),
                &aac,
            ],
        )
    }

    fn compress(&self, path: &Path) -> Result<(), StepError> {
        let path = path.to_string_lossy();
        run_command("gzip", &[&path])
    }

    fn upload(&self, path: &Path, remote: &str, subpath: &str) -> Result<(), StepError> {
        let path = path.to_string_lossy();
        let destination = format!("{}:{}/", remote, subpath);
        run_command(
            "rclone",
            &[
                "copy",
                &path,
                destination.as_str(),
                "-v",
                "--progress",
                "--stats",
                "1s",
                "--transfers=4",
                "--checksum",
            ],
        )
    }

    fn remove(&self, path: &Path) -> Result<(), StepError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StepError::RemoveFailed {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

/// Run one job to completion: convert, compress, upload, and always reclaim
/// local disk. Step failures are logged and never propagated.
pub fn run_job<P: PostProcess>(steps: &P, job: &PendingJob, targets: &RemoteTargets) {
    log::info!("post-processing {}", job.ts_path.display());

    let converted = match steps.convert(&job.ts_path, &job.aac_path) {
        Ok(()) => true,
        Err(e) => {
            log::error!("audio conversion failed: {}", e);
            false
        }
    };

    let ts_gz = gz_path(&job.ts_path);
    let aac_gz = gz_path(&job.aac_path);

    let ts_compressed = match steps.compress(&job.ts_path) {
        Ok(()) => true,
        Err(e) => {
            log::error!("compression of {} failed: {}", job.ts_path.display(), e);
            false
        }
    };
    let aac_compressed = converted
        && match steps.compress(&job.aac_path) {
            Ok(()) => true,
            Err(e) => {
                log::error!("compression of {} failed: {}", job.aac_path.display(), e);
                false
            }
        };

    if ts_compressed {
        if let Err(e) = steps.upload(&ts_gz, &targets.remote, &targets.raw_path) {
            log::error!("upload of {} failed: {}", ts_gz.display(), e);
        }
    }
    if aac_compressed {
        if let Err(e) = steps.upload(&aac_gz, &targets.remote, &targets.audio_path) {
            log::error!("upload of {} failed: {}", aac_gz.display(), e);
        }
    }

    // Local disk is always reclaimed, upload outcome notwithstanding.
    for path in [&job.ts_path, &job.aac_path, &ts_gz, &aac_gz] {
        if let Err(e) = steps.remove(path) {
            log::warn!("cleanup of {} failed: {}", path.display(), e);
        }
    }

    log::info!("post-processing of {} finished", job.ts_path.display());
}

/// Runs jobs without blocking the scheduler.
pub struct JobDispatcher<P> {
    steps: Arc<P>,
    targets: RemoteTargets,
    workers: Vec<JoinHandle<()>>,
}

impl<P: PostProcess + Send + Sync + 'static> JobDispatcher<P> {
    pub fn new(steps: P, targets: RemoteTargets) -> Self {
        JobDispatcher {
            steps: Arc::new(steps),
            targets,
            workers: Vec::new(),
        }
    }

    /// Fire-and-forget: the job runs on a worker thread while the scheduler
    /// re-acquires the tuner for the next channel.
    pub fn dispatch(&mut self, job: PendingJob) {
        let steps = Arc::clone(&self.steps);
        let targets = self.targets.clone();
        self.workers.push(std::thread::spawn(move || {
            run_job(steps.as_ref(), &job, &targets);
        }));
        self.workers.retain(|handle| !handle.is_finished());
    }

    /// Run a job on the calling thread (the final hand-off at shutdown).
    pub fn run_blocking(&self, job: &PendingJob) {
        run_job(self.steps.as_ref(), job, &self.targets);
    }

    /// Wait for workers still in flight so no dispatched job is cut short
    /// by process exit.
    pub fn drain(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("a post-processing worker panicked");
            }
        }
    }

    pub fn pending_workers(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every step invocation; individual steps can be failed.
    struct RecordingSteps {
        ops: Mutex<Vec<String>>,
        fail_convert: bool,
        fail_upload: bool,
    }

    impl RecordingSteps {
        fn new() -> Self {
            RecordingSteps {
                ops: Mutex::new(Vec::new()),
                fail_convert: false,
                fail_upload: false,
            }
        }

        fn record(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    fn fail(command: &str) -> StepError {
        StepError::SpawnFailed {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "simulated"),
        }
    }

    impl PostProcess for RecordingSteps {
        fn convert(&self, ts: &Path, aac: &Path) -> Result<(), StepError> {
            self.record(format!("convert {} {}", ts.display(), aac.display()));
            if self.fail_convert {
                Err(fail("ffmpeg"))
            } else {
                Ok(())
            }
        }

        fn compress(&self, path: &Path) -> Result<(), StepError> {
            self.record(format!("compress {}", path.display()));
            Ok(())
        }

        fn upload(&self, path: &Path, remote: &str, subpath: &str) -> Result<(), StepError> {
            self.record(format!("upload {} {}:{}", path.display(), remote, subpath));
            if self.fail_upload {
                Err(fail("rclone"))
            } else {
                Ok(())
            }
        }

        fn remove(&self, path: &Path) -> Result<(), StepError> {
            self.record(format!("remove {}", path.display()));
            Ok(())
        }
    }

    fn job() -> PendingJob {
        PendingJob::from_segment(PathBuf::from("/work/output_20240101_101010.ts"))
    }

    #[test]
    fn test_pending_job_derives_aac_path() {
        let job = job();
        assert_eq!(job.aac_path, PathBuf::from("/work/output_20240101_101010.aac"));
    }

    #[test]
    fn test_gz_path_appends_extension() {
        assert_eq!(
            gz_path(Path::new("/work/output.ts")),
            PathBuf::from("/work/output.ts.gz")
        );
        assert_eq!(
            gz_path(Path::new("/work/output.aac")),
            PathBuf::from("/work/output.aac.gz")
        );
    }

    #[test]
    fn test_run_job_step_order() {
        let steps = RecordingSteps::new();
        run_job(&steps, &job(), &RemoteTargets::default());

        let ops = steps.ops();
        assert_eq!(
            ops,
            vec![
                "convert /work/output_20240101_101010.ts /work/output_20240101_101010.aac",
                "compress /work/output_20240101_101010.ts",
                "compress /work/output_20240101_101010.aac",
                "upload /work/output_20240101_101010.ts.gz tsSaver:tsSaveBackup",
                "upload /work/output_20240101_101010.aac.gz tsSaver:tsSaveBackup/Audio",
                "remove /work/output_20240101_101010.ts",
                "remove /work/output_20240101_101010.aac",
                "remove /work/output_20240101_101010.ts.gz",
                "remove /work/output_20240101_101010.aac.gz",
            ]
        );
    }

    #[test]
    fn test_failed_upload_still_cleans_up_all_artifacts() {
        let steps = RecordingSteps {
            fail_upload: true,
            ..RecordingSteps::new()
        };
        run_job(&steps, &job(), &RemoteTargets::default());

        let removes: Vec<String> = steps
            .ops()
            .into_iter()
            .filter(|op| op.starts_with("remove"))
            .collect();
        assert_eq!(removes.len(), 4, "all four local artifacts are removed");
    }

    #[test]
    fn test_failed_convert_skips_audio_upload_but_cleans_up() {
        let steps = RecordingSteps {
            fail_convert: true,
            ..RecordingSteps::new()
        };
        run_job(&steps, &job(), &RemoteTargets::default());

        let ops = steps.ops();
        assert!(!ops.iter().any(|op| op.contains("compress") && op.contains(".aac")));
        assert!(!ops.iter().any(|op| op.contains("upload") && op.contains(".aac.gz")));
        // Cleanup is unconditional.
        assert_eq!(ops.iter().filter(|op| op.starts_with("remove")).count(), 4);
    }

    #[test]
    fn test_dispatcher_runs_job_on_worker() {
        let steps = RecordingSteps::new();
        let mut dispatcher = JobDispatcher::new(steps, RemoteTargets::default());
        dispatcher.dispatch(job());
        dispatcher.drain();
        assert_eq!(dispatcher.pending_workers(), 0);
    }

    #[test]
    fn test_shell_remove_ignores_missing_file() {
        let steps = ShellSteps::default();
        assert!(steps.remove(Path::new("/nonexistent/file.ts")).is_ok());
    }
}
