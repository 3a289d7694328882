//! Sequential upload coordinator
//!
//! Owns the single in-flight upload invariant: one batch is posted at a
//! time, and the next is not taken from the parser until the server has
//! answered. There are no retries; any transport or server error halts
//! the import permanently. A quota-exhausted answer is a soft stop: the
//! parser is cancelled and the import finishes as completed.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::import::parser::{ParseStats, ParsedBatch};
use crate::import::progress::{ImportPhase, ImportProgress, ProgressCallback};
use crate::models::import::{BatchImportRequest, BatchImportResponse};

/// Transport seam between the coordinator and the ingestion endpoint.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    async fn send_batch(&self, batch: &ParsedBatch) -> Result<BatchImportResponse>;
}

/// Posts batches to `/api/batch-import-events/{site_id}/{import_id}`.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpTransport {
    pub fn new(server_url: &str, site_id: i64, import_id: &str, token: &str) -> Self {
        let endpoint = format!(
            "{}/api/batch-import-events/{}/{}",
            server_url.trim_end_matches('/'),
            site_id,
            import_id
        );
        Self {
            client: reqwest::Client::new(),
            endpoint,
            token: token.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn send_batch(&self, batch: &ParsedBatch) -> Result<BatchImportResponse> {
        let body = BatchImportRequest {
            events: batch.events.clone(),
            is_last_batch: batch.is_last_batch,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            let detail = body.message.unwrap_or(body.error);
            return Err(anyhow!("batch upload rejected ({status}): {detail}"));
        }

        Ok(response.json().await?)
    }
}

/// Final client-side result of an import run.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    /// `Completed` or `Failed`
    pub status: ImportPhase,
    pub stats: ParseStats,
    pub imported_events: u64,
    pub quota_exceeded: bool,
    pub message: Option<String>,
}

pub struct UploadCoordinator<T: BatchTransport> {
    transport: T,
    cancel: CancellationToken,
    on_progress: Option<ProgressCallback>,
}

impl<T: BatchTransport> UploadCoordinator<T> {
    pub fn new(transport: T, cancel: CancellationToken) -> Self {
        Self {
            transport,
            cancel,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    fn report(&self, status: ImportPhase, stats: ParseStats, imported: u64, message: Option<String>) {
        if let Some(callback) = &self.on_progress {
            callback(ImportProgress {
                status,
                parsed_rows: stats.parsed,
                skipped_rows: stats.skipped,
                imported_events: imported,
                errors: stats.errors,
                message,
            });
        }
    }

    /// Drain batches from the parser and upload them strictly one at a
    /// time until the last batch is acknowledged, an error halts the
    /// import, or the server reports its quota exhausted.
    pub async fn run(&self, mut rx: mpsc::Receiver<ParsedBatch>) -> ImportOutcome {
        let mut stats = ParseStats::default();
        let mut imported: u64 = 0;

        self.report(ImportPhase::Idle, stats, imported, None);
        self.report(ImportPhase::Parsing, stats, imported, None);

        while let Some(batch) = rx.recv().await {
            if self.cancel.is_cancelled() {
                break;
            }

            stats = batch.stats;
            let is_last = batch.is_last_batch;
            self.report(ImportPhase::Uploading, stats, imported, None);

            // The next batch is not taken from the channel until this
            // await resolves, so at most one upload is ever in flight.
            match self.transport.send_batch(&batch).await {
                Ok(response) => {
                    imported += response.imported_count.max(0) as u64;

                    if response.quota_exceeded {
                        // Soft stop: further rows can only be rejected
                        self.cancel.cancel();
                        info!(imported, "import quota exhausted, stopping uploads");
                        let outcome = ImportOutcome {
                            status: ImportPhase::Completed,
                            stats,
                            imported_events: imported,
                            quota_exceeded: true,
                            message: response
                                .message
                                .or_else(|| Some("event quota exhausted".to_string())),
                        };
                        self.report(ImportPhase::Completed, stats, imported, outcome.message.clone());
                        return outcome;
                    }

                    self.report(ImportPhase::Uploading, stats, imported, None);

                    if is_last {
                        info!(imported, "import completed");
                        let outcome = ImportOutcome {
                            status: ImportPhase::Completed,
                            stats,
                            imported_events: imported,
                            quota_exceeded: false,
                            message: response.message,
                        };
                        self.report(ImportPhase::Completed, stats, imported, outcome.message.clone());
                        return outcome;
                    }
                }
                Err(e) => {
                    // Fail fast, no retries: a retried batch could be
                    // double-inserted since batches carry no
                    // idempotency key.
                    self.cancel.cancel();
                    warn!("batch upload failed: {e:#}");
                    let message = Some(e.to_string());
                    self.report(ImportPhase::Failed, stats, imported, message.clone());
                    return ImportOutcome {
                        status: ImportPhase::Failed,
                        stats,
                        imported_events: imported,
                        quota_exceeded: false,
                        message,
                    };
                }
            }
        }

        // The channel closed before a last batch was acknowledged:
        // either a cancel request or the parser stopped early.
        let message = if self.cancel.is_cancelled() {
            Some("import cancelled before completion".to_string())
        } else {
            Some("parsing stopped before the final batch".to_string())
        };
        self.report(ImportPhase::Failed, stats, imported, message.clone());
        ImportOutcome {
            status: ImportPhase::Failed,
            stats,
            imported_events: imported,
            quota_exceeded: false,
            message,
        }
    }
}
