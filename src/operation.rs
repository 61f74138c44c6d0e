/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Single-shot object operations
pub mod object;

/// Multipart upload state machine
pub mod upload;

/// Multipart download state machine
pub mod download;

use crate::error::Error;
use crate::metrics::{Metric, MetricName, MetricUnit, MetricsPublisher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Per-part transfer bookkeeping.
///
/// Created when the part processor schedules a part and destroyed once the
/// part completes. Byte counters accumulate during the transfer and are
/// flushed to the metrics publisher on part completion.
pub struct TransferState {
    part_index: u32,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    metrics: Arc<dyn MetricsPublisher>,
}

impl TransferState {
    pub(crate) fn new(part_index: u32, metrics: Arc<dyn MetricsPublisher>) -> TransferState {
        TransferState {
            part_index,
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            metrics,
        }
    }

    /// Zero-based index of the part within its transfer.
    pub fn part_index(&self) -> u32 {
        self.part_index
    }

    /// One-based part number as it appears on the wire.
    pub fn part_number(&self) -> u32 {
        self.part_index + 1
    }

    pub(crate) fn add_data_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_data_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn flush_data_up_metrics(&self) {
        let bytes = self.bytes_up.swap(0, Ordering::Relaxed);
        self.metrics.add_data_point(Metric::new(
            MetricName::BytesUp,
            MetricUnit::Bytes,
            bytes as f64,
        ));
    }

    pub(crate) fn flush_data_down_metrics(&self) {
        let bytes = self.bytes_down.swap(0, Ordering::Relaxed);
        self.metrics.add_data_point(Metric::new(
            MetricName::BytesDown,
            MetricUnit::Bytes,
            bytes as f64,
        ));
    }
}

impl std::fmt::Debug for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferState")
            .field("part_index", &self.part_index)
            .finish_non_exhaustive()
    }
}

enum LatchState {
    Pending,
    Finished(Option<Error>),
    Taken,
}

/// First-write-wins completion latch for a multipart transfer.
///
/// Any part completion may finish the transfer; only the first outcome is
/// kept, and the orchestrating future takes it exactly once.
pub(crate) struct FinishLatch {
    state: Mutex<LatchState>,
    notify: Notify,
}

impl FinishLatch {
    pub(crate) fn new() -> FinishLatch {
        FinishLatch {
            state: Mutex::new(LatchState::Pending),
            notify: Notify::new(),
        }
    }

    /// Latch the transfer outcome. Later writes are ignored.
    pub(crate) fn set(&self, error: Option<Error>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, LatchState::Pending) {
            *state = LatchState::Finished(error);
            self.notify.notify_waiters();
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        !matches!(*state, LatchState::Pending)
    }

    /// Wait for the latch and take the outcome.
    pub(crate) async fn wait(&self) -> Option<Error> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if let LatchState::Finished(_) = *state {
                    if let LatchState::Finished(err) =
                        std::mem::replace(&mut *state, LatchState::Taken)
                    {
                        return err;
                    }
                }
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for FinishLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinishLatch")
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
