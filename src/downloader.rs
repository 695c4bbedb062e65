//! The per-record download state machine.
//!
//! Records are processed strictly one after another: validate, skip when a
//! previous run already produced the record's artifact, fetch with bounded
//! retries, classify by content type, then tag directly or hand the bundle to
//! [`ArchiveHandler`]. Only fetch-stage outcomes count as failures; anything
//! that goes wrong after the bytes are on disk is a warning.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::ArchiveHandler;
use crate::compositor::OverlayCompositor;
use crate::domain::{BaseName, MediaExtension, Record};
use crate::error::MemorError;
use crate::fetch::{FetchFailure, MediaSource, classify_read_error};
use crate::layout::OutputLayout;
use crate::metadata::MetadataWriter;

const CANCEL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    /// Total attempts per record, including the first.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub chunk_size: usize,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            chunk_size: 8 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub succeeded: usize,
    /// Part of `succeeded`: records whose artifact already existed.
    pub skipped: usize,
    pub warnings: usize,
    pub failures: Vec<BatchFailure>,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failures.len()
    }
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { total: usize },
    Record { index: usize, total: usize, name: String },
    Skipped { index: usize, path: String },
    Retry { index: usize, attempt: u32, max_attempts: u32, reason: String },
    Warning { index: usize, message: String },
    Failed { index: usize, reason: String },
    Finished,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug)]
enum RecordStatus {
    Downloaded,
    AlreadyPresent,
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
enum AttemptError {
    Transient(String),
    Permanent(String),
}

impl From<FetchFailure> for AttemptError {
    fn from(failure: FetchFailure) -> Self {
        if failure.is_transient() {
            AttemptError::Transient(failure.to_string())
        } else {
            AttemptError::Permanent(failure.to_string())
        }
    }
}

/// What a run would do, computed without touching the network.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DryRunReport {
    pub total: usize,
    pub to_fetch: usize,
    pub present: Vec<String>,
    pub invalid: Vec<BatchFailure>,
}

pub fn plan(layout: &OutputLayout, records: &[Record]) -> DryRunReport {
    let mut report = DryRunReport {
        total: records.len(),
        ..DryRunReport::default()
    };
    for (index, record) in records.iter().enumerate() {
        match validate(record) {
            Err(reason) => report.invalid.push(BatchFailure { index, reason }),
            Ok((_, name)) => match layout.existing_artifact(&name) {
                Some(existing) => report.present.push(existing.to_string()),
                None => report.to_fetch += 1,
            },
        }
    }
    report
}

fn validate(record: &Record) -> Result<(&str, BaseName), String> {
    let url = record.download_url().ok_or_else(|| "No URL".to_string())?;
    let date = record.date().ok_or_else(|| "No date".to_string())?;
    let name = BaseName::from_date(date).map_err(|_| format!("Invalid date: {date}"))?;
    Ok((url, name))
}

pub struct BatchDownloader<S: MediaSource, W: MetadataWriter, C: OverlayCompositor> {
    layout: OutputLayout,
    source: S,
    writer: W,
    compositor: C,
    policy: DownloadPolicy,
    cancel: Arc<AtomicBool>,
}

impl<S: MediaSource, W: MetadataWriter, C: OverlayCompositor> BatchDownloader<S, W, C> {
    pub fn new(
        layout: OutputLayout,
        source: S,
        writer: W,
        compositor: C,
        policy: DownloadPolicy,
    ) -> Self {
        Self {
            layout,
            source,
            writer,
            compositor,
            policy,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares an interrupt flag; once set, the batch stops before the next record or attempt.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(
        &self,
        records: &[Record],
        sink: &dyn ProgressSink,
    ) -> Result<BatchOutcome, MemorError> {
        let total = records.len();
        let mut outcome = BatchOutcome {
            total,
            ..BatchOutcome::default()
        };
        if records.is_empty() {
            info!("no memories to download");
            return Ok(outcome);
        }

        self.layout.ensure_root()?;
        info!(total, dir = %self.layout.root(), "starting download");
        sink.event(ProgressEvent::Started { total });

        for (index, record) in records.iter().enumerate() {
            if self.cancelled() {
                outcome.cancelled = true;
                break;
            }
            match self.process(index, record, sink, &mut outcome) {
                RecordStatus::Downloaded => outcome.succeeded += 1,
                RecordStatus::AlreadyPresent => {
                    outcome.succeeded += 1;
                    outcome.skipped += 1;
                }
                RecordStatus::Failed(reason) => {
                    warn!(index, "memory failed: {reason}");
                    sink.event(ProgressEvent::Failed {
                        index,
                        reason: reason.clone(),
                    });
                    outcome.failures.push(BatchFailure { index, reason });
                }
                RecordStatus::Cancelled => {
                    outcome.cancelled = true;
                    break;
                }
            }
        }

        sink.event(ProgressEvent::Finished);
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failures.len(),
            cancelled = outcome.cancelled,
            "download finished"
        );
        Ok(outcome)
    }

    fn process(
        &self,
        index: usize,
        record: &Record,
        sink: &dyn ProgressSink,
        outcome: &mut BatchOutcome,
    ) -> RecordStatus {
        let (url, name) = match validate(record) {
            Ok(valid) => valid,
            Err(reason) => return RecordStatus::Failed(reason),
        };

        if let Some(existing) = self.layout.existing_artifact(&name) {
            debug!(index, path = %existing, "already downloaded");
            sink.event(ProgressEvent::Skipped {
                index,
                path: existing.to_string(),
            });
            return RecordStatus::AlreadyPresent;
        }

        sink.event(ProgressEvent::Record {
            index,
            total: outcome.total,
            name: name.to_string(),
        });

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        let (path, ext) = loop {
            if self.cancelled() {
                return RecordStatus::Cancelled;
            }
            match self.attempt(url, &name) {
                Ok(fetched) => break fetched,
                Err(AttemptError::Transient(reason)) if attempt < max_attempts => {
                    debug!(index, attempt, "transient failure: {reason}");
                    sink.event(ProgressEvent::Retry {
                        index,
                        attempt,
                        max_attempts,
                        reason,
                    });
                    attempt += 1;
                    if !self.pause() {
                        return RecordStatus::Cancelled;
                    }
                }
                Err(AttemptError::Transient(reason)) | Err(AttemptError::Permanent(reason)) => {
                    return RecordStatus::Failed(reason);
                }
            }
        };

        for message in self.finish(&path, ext, &name, record) {
            outcome.warnings += 1;
            sink.event(ProgressEvent::Warning { index, message });
        }
        RecordStatus::Downloaded
    }

    /// One GET, streamed to a temporary file and moved to its final name once complete.
    fn attempt(
        &self,
        url: &str,
        name: &BaseName,
    ) -> Result<(PathBuf, MediaExtension), AttemptError> {
        let response = self.source.get(url)?;
        match response.status {
            200..=299 => {}
            status @ 500..=599 => return Err(AttemptError::Transient(format!("HTTP {status}"))),
            status => return Err(AttemptError::Permanent(format!("HTTP {status}"))),
        }

        let ext = MediaExtension::from_content_type(&response.content_type).ok_or_else(|| {
            AttemptError::Permanent(format!("Unknown type: {}", response.content_type))
        })?;

        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{name}-"))
            .suffix(".part")
            .tempfile_in(self.layout.root().as_std_path())
            .map_err(|err| AttemptError::Permanent(format!("Failed to create file: {err}")))?;

        let mut body = response.body;
        let mut buf = vec![0u8; self.policy.chunk_size.max(1)];
        let mut written = 0u64;
        loop {
            let read = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(classify_read_error(&err).into()),
            };
            temp.write_all(&buf[..read])
                .map_err(|err| AttemptError::Permanent(format!("Failed to write file: {err}")))?;
            written += read as u64;
        }
        temp.flush()
            .map_err(|err| AttemptError::Permanent(format!("Failed to write file: {err}")))?;

        if written == 0 {
            return Err(AttemptError::Transient("Empty download".to_string()));
        }

        let target = self.layout.direct_path(name, ext).into_std_path_buf();
        temp.persist(&target)
            .map_err(|err| AttemptError::Permanent(format!("Failed to write file: {err}")))?;
        let on_disk = std::fs::metadata(&target).map(|meta| meta.len()).unwrap_or(0);
        if on_disk == 0 {
            let _ = std::fs::remove_file(&target);
            return Err(AttemptError::Transient("Empty download".to_string()));
        }
        debug!(path = %target.display(), bytes = written, "downloaded");
        Ok((target, ext))
    }

    /// Tags a direct download or unpacks a bundle. Returns the warnings raised on the way.
    fn finish(
        &self,
        path: &std::path::Path,
        ext: MediaExtension,
        name: &BaseName,
        record: &Record,
    ) -> Vec<String> {
        if ext == MediaExtension::Zip {
            let handler = ArchiveHandler::new(&self.layout, &self.writer, &self.compositor);
            return match handler.handle(path, name, record) {
                Ok(outcome) => outcome.warnings,
                Err(err) => {
                    let message = format!("post-processing failed: {err}");
                    warn!("{message}");
                    vec![message]
                }
            };
        }

        let result = record
            .capture_time()
            .and_then(|time| self.writer.write_tags(path, time, record.coordinates()));
        match result {
            Ok(()) => Vec::new(),
            Err(err) => {
                let message = format!("post-processing failed: {err}");
                warn!(path = %path.display(), "{message}");
                vec![message]
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Waits out the retry delay; `false` when interrupted meanwhile.
    fn pause(&self) -> bool {
        let mut remaining = self.policy.retry_delay;
        while !remaining.is_zero() {
            if self.cancelled() {
                return false;
            }
            let step = remaining.min(CANCEL_POLL);
            thread::sleep(step);
            remaining -= step;
        }
        !self.cancelled()
    }
}
