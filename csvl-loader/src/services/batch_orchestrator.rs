//! Batch orchestrator
//!
//! Walks an immutable resource list with an index cursor, one chunk of
//! `concurrency` resources at a time. Every resource in a chunk is applied
//! concurrently and the whole chunk settles before the next is dispatched, so
//! no more than `concurrency` executor calls are ever outstanding.
//!
//! The cancellation token is only consulted at chunk barriers: an in-flight
//! chunk always runs to completion and its outcomes are recorded.

use crate::error::{LoaderError, LoaderResult};
use crate::models::{Ledger, OutcomeLedger, ResourceDocument};
use crate::services::progress::{ProgressSink, APPLY_LABEL};
use crate::services::upsert_executor::UpsertExecutor;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives an [`UpsertExecutor`] over a resource list
pub struct BatchOrchestrator {
    concurrency: usize,
    progress: Arc<dyn ProgressSink>,
    cancel_token: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(concurrency: usize, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            concurrency,
            progress,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Use an externally owned token (e.g. one cancelled on Ctrl-C)
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Apply `resources[resume_from..]` and return the run's ledger
    ///
    /// Per-resource failures are recorded in the ledger. The only errors
    /// returned are invalid run parameters.
    pub async fn run(
        &self,
        executor: &UpsertExecutor<'_>,
        resources: &[ResourceDocument],
        resume_from: usize,
    ) -> LoaderResult<Ledger> {
        if self.concurrency == 0 {
            return Err(LoaderError::Config(
                "batch concurrency must be at least 1".to_string(),
            ));
        }

        let total = resources.len();
        if resume_from > total {
            return Err(LoaderError::Config(format!(
                "resume_from {} is beyond the last resource ({} queued)",
                resume_from, total
            )));
        }

        let start_time = Instant::now();
        let ledger = OutcomeLedger::new();
        let mut cursor = resume_from;
        let mut cancelled = false;

        self.progress.started(total, self.concurrency);
        info!(
            total,
            resume_from,
            concurrency = self.concurrency,
            "Applying resources"
        );

        if cursor == total {
            self.progress.progress(APPLY_LABEL, total, total);
        }

        while cursor < total {
            if self.cancel_token.is_cancelled() {
                warn!(
                    next_index = cursor,
                    remaining = total - cursor,
                    "Run cancelled at chunk barrier"
                );
                cancelled = true;
                break;
            }

            let end = (cursor + self.concurrency).min(total);
            let chunk = &resources[cursor..end];
            debug!(start = cursor, end, "Dispatching chunk");

            join_all(chunk.iter().map(|document| {
                let ledger = &ledger;
                async move {
                    let outcome = executor.apply(document).await;
                    if !outcome.is_success() {
                        self.progress.failed(&outcome);
                    }
                    ledger.record(outcome);
                }
            }))
            .await;

            cursor = end;
            self.progress.progress(APPLY_LABEL, cursor, total);
        }

        let result = ledger.finish(cursor, cancelled);

        info!(
            success = result.success_count,
            failed = result.failure_count,
            next_index = result.next_index,
            cancelled = result.cancelled,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Batch application finished"
        );
        self.progress.finished(&result);

        Ok(result)
    }
}
