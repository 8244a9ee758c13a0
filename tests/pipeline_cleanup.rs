//! Integration tests for post-processing cleanup over real files.
//!
//! A filesystem-backed stand-in for the shell utilities lets the full job
//! run against a temp directory: conversion writes the derivative, the
//! compressor consumes its input like gzip does, and uploads can be forced
//! to fail. Whatever happens, local disk must end up reclaimed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use channel_rotator::postprocess::{run_job, PendingJob, PostProcess, RemoteTargets, StepError};

/// Shell-utility stand-in operating on real files.
struct FakeShell {
    fail_upload: bool,
    uploads: Arc<Mutex<Vec<String>>>,
}

impl FakeShell {
    fn new(fail_upload: bool) -> Self {
        FakeShell {
            fail_upload,
            uploads: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn step_failure(command: &str) -> StepError {
    StepError::SpawnFailed {
        command: command.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, "simulated failure"),
    }
}

impl PostProcess for FakeShell {
    fn convert(&self, ts: &Path, aac: &Path) -> Result<(), StepError> {
        let data = std::fs::read(ts).map_err(|_| step_failure("ffmpeg"))?;
        std::fs::write(aac, format!("aac:{}", data.len())).map_err(|_| step_failure("ffmpeg"))?;
        Ok(())
    }

    fn compress(&self, path: &Path) -> Result<(), StepError> {
        // gzip semantics: produce `path.gz`, consume the input.
        let data = std::fs::read(path).map_err(|_| step_failure("gzip"))?;
        let mut gz = path.as_os_str().to_os_string();
        gz.push(".gz");
        std::fs::write(PathBuf::from(gz), data).map_err(|_| step_failure("gzip"))?;
        std::fs::remove_file(path).map_err(|_| step_failure("gzip"))?;
        Ok(())
    }

    fn upload(&self, path: &Path, remote: &str, subpath: &str) -> Result<(), StepError> {
        if self.fail_upload {
            return Err(step_failure("rclone"));
        }
        self.uploads
            .lock()
            .unwrap()
            .push(format!("{} -> {}:{}", path.display(), remote, subpath));
        Ok(())
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

fn segment_in(dir: &Path) -> PendingJob {
    let ts = dir.join("output_20240101_101010.ts");
    std::fs::write(&ts, b"raw transport stream bytes").unwrap();
    PendingJob::from_segment(ts)
}

fn remaining_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .collect()
}

#[test]
fn test_successful_job_uploads_both_artifacts_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let job = segment_in(dir.path());
    let shell = FakeShell::new(false);
    let uploads = Arc::clone(&shell.uploads);

    run_job(&shell, &job, &RemoteTargets::default());

    let uploaded = uploads.lock().unwrap().clone();
    assert_eq!(uploaded.len(), 2);
    assert!(uploaded[0].ends_with(".ts.gz -> tsSaver:tsSaveBackup"));
    assert!(uploaded[1].ends_with(".aac.gz -> tsSaver:tsSaveBackup/Audio"));

    assert!(
        remaining_files(dir.path()).is_empty(),
        "all local artifacts are removed"
    );
}

#[test]
fn test_failed_upload_still_reclaims_local_disk() {
    let dir = tempfile::tempdir().unwrap();
    let job = segment_in(dir.path());
    let shell = FakeShell::new(true);

    run_job(&shell, &job, &RemoteTargets::default());

    // Raw, derived, and both compressed forms are all gone.
    assert!(
        remaining_files(dir.path()).is_empty(),
        "cleanup proceeds regardless of upload outcome"
    );
}

#[test]
fn test_job_paths_share_the_segment_stem() {
    let job = PendingJob::from_segment(PathBuf::from("/work/output_20240101_101010.ts"));
    assert_eq!(
        job.aac_path.file_name().unwrap(),
        "output_20240101_101010.aac"
    );
}
