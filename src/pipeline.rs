//! The download-and-relocate pipeline.
//!
//! For each message under the configured labels: read its metadata, plan its
//! month directory, and for each attachment not yet in the ledger fetch,
//! stage, relocate, then record. Per-item failures are logged and counted;
//! only fatal errors (see [`HarvestError::is_fatal`]) leave [`Pipeline::run`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{HarvestError, LedgerError, Result};
use crate::fetch::Fetcher;
use crate::ledger::Ledger;
use crate::model::attachment::AttachmentTask;
use crate::model::message::MessageMeta;
use crate::planner;
use crate::stage::{RetryPolicy, Stager};

/// Inputs the pipeline needs from the configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Label ids to scan, in order.
    pub labels: Vec<String>,
    /// Root of the destination tree.
    pub storage_root: PathBuf,
    /// Relocation retry policy.
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            labels: config.gmail.labels.clone(),
            storage_root: config.storage.storage_root.clone(),
            retry: config.retry_policy(),
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunReport {
    /// Distinct messages listed across all labels.
    pub messages_listed: usize,
    /// Messages skipped because metadata, date or directory failed.
    pub messages_failed: usize,
    /// Attachments moved into place and recorded.
    pub attachments_recorded: usize,
    /// Attachments skipped because the ledger already had them.
    pub attachments_already_recorded: usize,
    /// Filename-bearing parts without an attachment id.
    pub attachments_unaddressable: usize,
    /// Attachments that failed and will be retried next run.
    pub attachments_failed: usize,
    /// Bytes written to their final destination.
    pub bytes_downloaded: u64,
}

/// Terminal state of one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentOutcome {
    /// Moved into place and recorded.
    Recorded { bytes: u64 },
    /// Already in the ledger.
    AlreadyRecorded,
}

/// Drives one run over borrowed collaborators.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    fetcher: &'a mut dyn Fetcher,
    ledger: &'a Ledger,
    stager: &'a Stager,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        fetcher: &'a mut dyn Fetcher,
        ledger: &'a Ledger,
        stager: &'a Stager,
    ) -> Self {
        Self {
            config,
            fetcher,
            ledger,
            stager,
        }
    }

    /// Run once over every configured label.
    ///
    /// The progress callback receives `(current, total)` in messages.
    pub fn run(&mut self, progress: Option<&dyn Fn(usize, usize)>) -> Result<RunReport> {
        let mut report = RunReport::default();

        let ids = self.list_all()?;
        report.messages_listed = ids.len();
        if ids.is_empty() {
            info!(labels = ?self.config.labels, "No messages found");
            return Ok(report);
        }
        info!(count = ids.len(), "Processing messages");

        let total = ids.len();
        for (i, message_id) in ids.iter().enumerate() {
            if let Some(cb) = progress {
                cb(i, total);
            }
            match self.process_message(message_id, &mut report) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(message_id = %message_id, error = %e, "Skipping message");
                    report.messages_failed += 1;
                }
            }
        }
        if let Some(cb) = progress {
            cb(total, total);
        }

        info!(
            recorded = report.attachments_recorded,
            already_recorded = report.attachments_already_recorded,
            failed = report.attachments_failed,
            messages_failed = report.messages_failed,
            "Run complete"
        );
        Ok(report)
    }

    /// Message ids across labels, first occurrence wins.
    fn list_all(&mut self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for label in &self.config.labels {
            let listed = self.fetcher.list_messages(label).map_err(|source| {
                if source.is_auth() {
                    HarvestError::Fetch(source)
                } else {
                    HarvestError::Listing {
                        label: label.clone(),
                        source,
                    }
                }
            })?;
            debug!(label = %label, count = listed.len(), "Listed label");
            for id in listed {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn process_message(&mut self, message_id: &str, report: &mut RunReport) -> Result<()> {
        let meta = self.fetcher.get_message(message_id)?;
        if !meta.has_attachments() {
            debug!(message_id, "No attachments");
            return Ok(());
        }

        let sent_at = meta.sent_at()?;
        let dir = planner::plan(&self.config.storage_root, &sent_at);
        planner::ensure(&dir)?;

        for task in tasks(&meta, sent_at, report) {
            match self.process_attachment(&task, &dir) {
                Ok(AttachmentOutcome::Recorded { bytes, .. }) => {
                    report.attachments_recorded += 1;
                    report.bytes_downloaded += bytes;
                }
                Ok(AttachmentOutcome::AlreadyRecorded) => {
                    report.attachments_already_recorded += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(HarvestError::Relocate(_)) => {
                    // Already reported by the stager.
                    report.attachments_failed += 1;
                }
                Err(e) => {
                    warn!(
                        message_id = %task.message_id,
                        attachment_id = %task.attachment_id,
                        filename = %task.filename,
                        error = %e,
                        "Failed to download attachment"
                    );
                    report.attachments_failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Checked → Fetched → Staged → Relocated → Recorded.
    pub fn process_attachment(
        &mut self,
        task: &AttachmentTask,
        dir: &Path,
    ) -> Result<AttachmentOutcome> {
        if self.ledger.has(&task.message_id, &task.attachment_id)? {
            info!(
                message_id = %task.message_id,
                filename = %task.filename,
                "Skipped already downloaded attachment"
            );
            return Ok(AttachmentOutcome::AlreadyRecorded);
        }

        let bytes = self
            .fetcher
            .get_attachment_bytes(&task.message_id, &task.attachment_id)?;
        let staged = self.stager.write_staged(&task.filename, &bytes)?;
        let destination = dir.join(&task.filename);
        self.stager
            .relocate(&staged, &destination, &self.config.retry)?;
        debug!(
            message_id = %task.message_id,
            attachment_id = %task.attachment_id,
            bytes = bytes.len(),
            "Downloaded attachment"
        );

        match self
            .ledger
            .record(&task.message_id, &task.attachment_id, &destination)
        {
            Ok(()) => Ok(AttachmentOutcome::Recorded {
                bytes: bytes.len() as u64,
            }),
            Err(LedgerError::DuplicateEntry { .. }) => {
                info!(
                    message_id = %task.message_id,
                    attachment_id = %task.attachment_id,
                    "Attachment was recorded concurrently"
                );
                Ok(AttachmentOutcome::AlreadyRecorded)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Work items for the addressable parts of a message.
fn tasks(
    meta: &MessageMeta,
    sent_at: chrono::DateTime<chrono::FixedOffset>,
    report: &mut RunReport,
) -> Vec<AttachmentTask> {
    let mut out = Vec::with_capacity(meta.parts.len());
    for part in meta.parts.iter().filter(|p| !p.filename.is_empty()) {
        let Some(attachment_id) = part.attachment_id.clone() else {
            warn!(
                message_id = %meta.id,
                filename = %part.filename,
                "Attachment part has no attachment id; skipping"
            );
            report.attachments_unaddressable += 1;
            continue;
        };
        out.push(AttachmentTask {
            message_id: meta.id.clone(),
            attachment_id,
            filename: planner::safe_filename(&part.filename),
            source_timestamp: sent_at,
        });
    }
    out
}
