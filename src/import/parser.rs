//! Streaming CSV parser/batcher
//!
//! Reads the source file incrementally, decodes each row through the
//! positional column table, applies the mapper and the date filter, and
//! hands off fixed-size batches over a bounded channel. The bounded
//! channel is the back-pressure seam: `blocking_send` parks the parser
//! until the upload side has taken the previous batch.
//!
//! Counters live in an explicit [`ParseStats`] accumulator owned by the
//! parse run, so concurrent imports in one process never share state.

use std::io::Read;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::import::date_filter::DateWindow;
use crate::import::mapper;
use crate::models::event::RawEvent;

/// Rows per client-originated batch.
pub const BATCH_SIZE: usize = 5_000;

/// One unit of upload, in source order.
#[derive(Debug, Clone)]
pub struct ParsedBatch {
    pub events: Vec<RawEvent>,
    pub is_last_batch: bool,
    /// Running counters as of this batch's emission
    pub stats: ParseStats,
}

/// Running parse counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Rows accepted into a batch
    pub parsed: u64,
    /// Rows rejected by the mapper (no timestamp) or the date filter
    pub skipped: u64,
    /// Malformed CSV rows
    pub errors: u64,
}

pub struct CsvParser {
    batch_size: usize,
    window: DateWindow,
    cancel: CancellationToken,
}

impl CsvParser {
    pub fn new(window: DateWindow, cancel: CancellationToken) -> Self {
        Self {
            batch_size: BATCH_SIZE,
            window,
            cancel,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Parse `input` to completion, emitting batches on `tx`.
    ///
    /// Blocking; run it on `tokio::task::spawn_blocking`. On
    /// end-of-input a final batch is always emitted, even when empty,
    /// flagged `is_last_batch` so the server can observe termination.
    /// Cancellation stops row processing promptly and suppresses all
    /// further emissions, including the final batch.
    ///
    /// A structurally unreadable file is a terminal error; individual
    /// malformed rows only increment the error counter.
    pub fn run<R: Read>(&self, input: R, tx: &mpsc::Sender<ParsedBatch>) -> Result<ParseStats> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(input);

        let mut stats = ParseStats::default();
        let mut batch: Vec<RawEvent> = Vec::with_capacity(self.batch_size);

        for result in reader.records() {
            if self.cancel.is_cancelled() {
                debug!("parse cancelled after {} accepted rows", stats.parsed);
                return Ok(stats);
            }

            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_io_error() => {
                    return Err(e).context("failed to read source file");
                }
                Err(_) => {
                    stats.errors += 1;
                    continue;
                }
            };

            let raw = mapper::map_umami_row(&record);
            let created_at = mapper::field_str(&raw, "created_at");
            if created_at.is_empty() || !self.window.accepts(&created_at) {
                stats.skipped += 1;
                continue;
            }

            batch.push(raw);
            stats.parsed += 1;

            if batch.len() >= self.batch_size {
                let events = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                if !self.emit(tx, events, false, stats) {
                    // Receiver gone: uploads have stopped, so do we
                    return Ok(stats);
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(stats);
        }

        self.emit(tx, batch, true, stats);
        Ok(stats)
    }

    fn emit(
        &self,
        tx: &mpsc::Sender<ParsedBatch>,
        events: Vec<RawEvent>,
        is_last_batch: bool,
        stats: ParseStats,
    ) -> bool {
        tx.blocking_send(ParsedBatch {
            events,
            is_last_batch,
            stats,
        })
        .is_ok()
    }
}
