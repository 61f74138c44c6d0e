/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::error::{self, Error};
use crate::operation::{FinishLatch, TransferState};
use crate::runtime::processor::PartTransfer;
use crate::types::PartFinishResponse;
use crate::ObjectTransport;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Consumer of part data for a multipart download.
///
/// Invoked for every body chunk of every part, in chunk order within a part.
pub type ReceivePart = Arc<dyn Fn(&TransferState, &Bytes) + Send + Sync>;

struct MultipartDownloadState {
    transport: ObjectTransport,
    key: String,
    num_parts: u32,
    num_parts_completed: AtomicU32,
    finished: FinishLatch,
    receive_part: ReceivePart,
}

#[async_trait]
impl PartTransfer for MultipartDownloadState {
    fn num_parts(&self) -> u32 {
        self.num_parts
    }

    fn is_finished(&self) -> bool {
        self.finished.is_finished()
    }

    async fn process_part(&self, transfer: &TransferState) -> PartFinishResponse {
        if self.finished.is_finished() {
            return PartFinishResponse::Done;
        }

        let receive_part = &self.receive_part;
        let result = self
            .transport
            .get_object(&self.key, transfer.part_number(), |data| {
                transfer.add_data_down(data.len() as u64);
                receive_part(transfer, data);
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!("received part #{} for {}", transfer.part_number(), self.key);

                let completed = self.num_parts_completed.fetch_add(1, Ordering::SeqCst) + 1;
                if completed == self.num_parts {
                    tracing::debug!("finished trying to get all parts for {}", self.key);
                    self.finished.set(None);
                }

                transfer.flush_data_down_metrics();
                PartFinishResponse::Done
            }
            Err(err) => {
                tracing::error!(
                    "did not receive part #{} for {}: '{err}'",
                    transfer.part_number(),
                    self.key
                );

                transfer.flush_data_down_metrics();
                PartFinishResponse::Retry
            }
        }
    }

    fn retries_exhausted(&self, transfer: &TransferState) {
        self.finished
            .set(Some(error::part_failed(transfer.part_number())));
    }
}

impl ObjectTransport {
    /// Download the object at `key` in `num_parts` parts.
    ///
    /// Each part is fetched with a `partNumber` GET; chunks are forwarded to
    /// `receive_part` as they arrive. Failed parts are retried within the
    /// configured budget.
    pub async fn get_object_multipart<R>(
        &self,
        key: &str,
        num_parts: u32,
        receive_part: R,
    ) -> Result<(), Error>
    where
        R: Fn(&TransferState, &Bytes) + Send + Sync + 'static,
    {
        if num_parts == 0 {
            return Err(error::invalid_input("num_parts must be at least 1"));
        }

        let state = Arc::new(MultipartDownloadState {
            transport: self.clone(),
            key: key.to_owned(),
            num_parts,
            num_parts_completed: AtomicU32::new(0),
            finished: FinishLatch::new(),
            receive_part: Arc::new(receive_part),
        });

        self.handle
            .download_processor
            .push_queue(Arc::clone(&state) as Arc<dyn PartTransfer>);

        match state.finished.wait().await {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
