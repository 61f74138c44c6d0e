/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::metrics::MetricsPublisher;
use crate::operation::TransferState;
use crate::types::PartFinishResponse;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::{self, WeakUnboundedSender};
use tokio::sync::Semaphore;

/// A multipart transfer whose parts the processor schedules.
#[async_trait]
pub(crate) trait PartTransfer: Send + Sync {
    /// Total number of parts in the transfer.
    fn num_parts(&self) -> u32;

    /// Whether the transfer has already reached a terminal outcome.
    fn is_finished(&self) -> bool;

    /// Process one part. `Retry` re-enqueues the part.
    async fn process_part(&self, transfer: &TransferState) -> PartFinishResponse;

    /// A part used up its whole retry budget; the transfer is over.
    fn retries_exhausted(&self, transfer: &TransferState);
}

struct PartWorkItem {
    state: Arc<dyn PartTransfer>,
    part_index: u32,
    attempts: u32,
}

/// Bounded processor for per-part work items.
///
/// Runs at most `max_streams` part streams concurrently across every transfer
/// pushed into it. A part that reports [`PartFinishResponse::Retry`] is
/// re-enqueued until `max_part_retries` re-enqueues have been spent (or
/// forever when unset).
pub(crate) struct PartProcessor {
    tx: mpsc::UnboundedSender<PartWorkItem>,
}

impl PartProcessor {
    pub(crate) fn new(
        max_streams: usize,
        max_part_retries: Option<u32>,
        metrics: Arc<dyn MetricsPublisher>,
    ) -> PartProcessor {
        let (tx, mut rx) = mpsc::unbounded_channel::<PartWorkItem>();
        // Re-enqueues go through a weak sender so the dispatcher exits once
        // every strong sender is gone.
        let retry_tx = tx.downgrade();
        let streams = Arc::new(Semaphore::new(max_streams));

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let permit = match Arc::clone(&streams).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let retry_tx = retry_tx.clone();
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    let _permit = permit;
                    process_item(item, max_part_retries, retry_tx, metrics).await;
                });
            }
        });

        PartProcessor { tx }
    }

    /// Schedule every part of `state`.
    pub(crate) fn push_queue(&self, state: Arc<dyn PartTransfer>) {
        for part_index in 0..state.num_parts() {
            let _ = self.tx.send(PartWorkItem {
                state: Arc::clone(&state),
                part_index,
                attempts: 0,
            });
        }
    }
}

async fn process_item(
    item: PartWorkItem,
    max_part_retries: Option<u32>,
    retry_tx: WeakUnboundedSender<PartWorkItem>,
    metrics: Arc<dyn MetricsPublisher>,
) {
    if item.state.is_finished() {
        return;
    }

    let transfer = TransferState::new(item.part_index, metrics);
    match item.state.process_part(&transfer).await {
        PartFinishResponse::Done => {}
        PartFinishResponse::Retry => {
            if max_part_retries.is_some_and(|cap| item.attempts >= cap) {
                item.state.retries_exhausted(&transfer);
            } else if let Some(tx) = retry_tx.upgrade() {
                let _ = tx.send(PartWorkItem {
                    state: item.state,
                    part_index: item.part_index,
                    attempts: item.attempts + 1,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::LogMetricsPublisher;
    use crate::operation::FinishLatch;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransfer {
        num_parts: u32,
        // per-part count of failures left to inject
        failures: Vec<AtomicU32>,
        completed: AtomicU32,
        exhausted: AtomicU32,
        latch: FinishLatch,
    }

    impl FlakyTransfer {
        fn new(num_parts: u32, failures_per_part: u32) -> FlakyTransfer {
            FlakyTransfer {
                num_parts,
                failures: (0..num_parts)
                    .map(|_| AtomicU32::new(failures_per_part))
                    .collect(),
                completed: AtomicU32::new(0),
                exhausted: AtomicU32::new(0),
                latch: FinishLatch::new(),
            }
        }
    }

    #[async_trait]
    impl PartTransfer for FlakyTransfer {
        fn num_parts(&self) -> u32 {
            self.num_parts
        }

        fn is_finished(&self) -> bool {
            self.latch.is_finished()
        }

        async fn process_part(&self, transfer: &TransferState) -> PartFinishResponse {
            let left = &self.failures[transfer.part_index() as usize];
            if left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok()
            {
                return PartFinishResponse::Retry;
            }

            let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            if completed == self.num_parts {
                self.latch.set(None);
            }
            PartFinishResponse::Done
        }

        fn retries_exhausted(&self, transfer: &TransferState) {
            self.exhausted.fetch_add(1, Ordering::SeqCst);
            self.latch
                .set(Some(crate::error::part_failed(transfer.part_number())));
        }
    }

    #[tokio::test]
    async fn test_all_parts_complete_after_retries() {
        let processor = PartProcessor::new(4, None, Arc::new(LogMetricsPublisher));
        let state = Arc::new(FlakyTransfer::new(3, 2));
        processor.push_queue(Arc::clone(&state) as Arc<dyn PartTransfer>);

        let outcome = state.latch.wait().await;
        assert!(outcome.is_none());
        assert_eq!(state.completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_cap_exhausts_part() {
        let processor = PartProcessor::new(4, Some(2), Arc::new(LogMetricsPublisher));
        // 5 failures per part with only 2 re-enqueues allowed
        let state = Arc::new(FlakyTransfer::new(1, 5));
        processor.push_queue(Arc::clone(&state) as Arc<dyn PartTransfer>);

        let outcome = state.latch.wait().await;
        assert!(outcome.is_some());
        assert_eq!(state.exhausted.load(Ordering::SeqCst), 1);
        assert_eq!(state.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_finished_transfer_skips_scheduling() {
        let processor = PartProcessor::new(4, None, Arc::new(LogMetricsPublisher));
        let state = Arc::new(FlakyTransfer::new(2, 0));
        state.latch.set(Some(crate::error::part_failed(1)));
        processor.push_queue(Arc::clone(&state) as Arc<dyn PartTransfer>);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(state.completed.load(Ordering::SeqCst), 0);
    }
}
