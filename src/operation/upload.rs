/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::error::{self, Error};
use crate::operation::{FinishLatch, TransferState};
use crate::runtime::processor::PartTransfer;
use crate::types::{PartFinishResponse, PutObjectFlags};
use crate::ObjectTransport;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::Method;
use http_body_util::Full;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Producer of part bodies for a multipart upload.
///
/// Invoked once per scheduled part (including retries); the returned bytes
/// are the full body of that part.
pub type SendPart = Arc<dyn Fn(&TransferState) -> Bytes + Send + Sync>;

struct MultipartUploadState {
    transport: ObjectTransport,
    key: String,
    object_size: u64,
    num_parts: u32,
    upload_id: OnceLock<String>,
    etags: Mutex<Vec<Option<String>>>,
    num_parts_completed: AtomicU32,
    finished: FinishLatch,
    send_part: SendPart,
}

impl MultipartUploadState {
    fn set_etag(&self, part_index: u32, etag: String) {
        let mut etags = self.etags.lock().unwrap_or_else(PoisonError::into_inner);
        etags[part_index as usize] = Some(etag);
    }

    fn etags(&self) -> Vec<String> {
        let etags = self.etags.lock().unwrap_or_else(PoisonError::into_inner);
        etags
            .iter()
            .map(|etag| etag.clone().unwrap_or_default())
            .collect()
    }

    /// Returns true for exactly the completion that accounts for the final
    /// part.
    fn inc_num_parts_completed(&self) -> bool {
        completed_all(&self.num_parts_completed, self.num_parts)
    }
}

fn completed_all(counter: &AtomicU32, num_parts: u32) -> bool {
    counter.fetch_add(1, Ordering::SeqCst) + 1 == num_parts
}

#[async_trait]
impl PartTransfer for MultipartUploadState {
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

        let body = (self.send_part)(transfer);
        self.transport.upload_part(self, transfer, body).await
    }

    fn retries_exhausted(&self, transfer: &TransferState) {
        self.finished
            .set(Some(error::part_failed(transfer.part_number())));
    }
}

impl ObjectTransport {
    /// Upload an object of `object_size` bytes in `num_parts` parts.
    ///
    /// `send_part` produces the body for each scheduled part. Failed parts
    /// are retried within the configured budget; a terminal failure after a
    /// multipart upload was created aborts it best-effort and surfaces the
    /// original error. Returns the number of parts uploaded.
    pub async fn put_object_multipart<S>(
        &self,
        key: &str,
        object_size: u64,
        num_parts: u32,
        send_part: S,
    ) -> Result<u32, Error>
    where
        S: Fn(&TransferState) -> Bytes + Send + Sync + 'static,
    {
        if num_parts == 0 {
            return Err(error::invalid_input("num_parts must be at least 1"));
        }

        let state = Arc::new(MultipartUploadState {
            transport: self.clone(),
            key: key.to_owned(),
            object_size,
            num_parts,
            upload_id: OnceLock::new(),
            etags: Mutex::new(vec![None; num_parts as usize]),
            num_parts_completed: AtomicU32::new(0),
            finished: FinishLatch::new(),
            send_part: Arc::new(send_part),
        });

        tracing::info!(
            "put object multipart {} with object size {} and {} parts",
            state.key,
            state.object_size,
            state.num_parts,
        );

        match self.create_multipart_upload(key).await {
            Ok(upload_id) => {
                let _ = state.upload_id.set(upload_id);
                self.handle
                    .upload_processor
                    .push_queue(Arc::clone(&state) as Arc<dyn PartTransfer>);
            }
            Err(err) => state.finished.set(Some(err)),
        }

        match state.finished.wait().await {
            None => Ok(num_parts),
            Some(err) => {
                // best-effort; the original error is the one reported
                if let Some(upload_id) = state.upload_id.get() {
                    if let Err(abort_err) = self.abort_multipart_upload(key, upload_id).await {
                        tracing::error!(
                            "abort multipart upload for {key} failed with error '{abort_err}'"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn upload_part(
        &self,
        state: &MultipartUploadState,
        transfer: &TransferState,
        body: Bytes,
    ) -> PartFinishResponse {
        let upload_id = match state.upload_id.get() {
            Some(id) => id,
            None => {
                tracing::error!("upload part scheduled without an upload id");
                return PartFinishResponse::Retry;
            }
        };

        let key_path = format!(
            "{}?partNumber={}&uploadId={}",
            state.key,
            transfer.part_number(),
            upload_id
        );
        let body_len = body.len() as u64;

        match self
            .put_object(&key_path, body, PutObjectFlags::RETRIEVE_ETAG)
            .await
        {
            Ok(etag) => {
                transfer.add_data_up(body_len);
                state.set_etag(transfer.part_index(), etag.unwrap_or_default());

                if state.inc_num_parts_completed() {
                    let etags = state.etags();
                    let result = self
                        .complete_multipart_upload(&state.key, upload_id, &etags)
                        .await;
                    state.finished.set(result.err());
                }

                self.handle.metrics.add_transfer_status(true);
                transfer.flush_data_up_metrics();

                tracing::info!(
                    "UploadPart for path {} and part #{} ({}/{}) succeeded",
                    state.key,
                    transfer.part_number(),
                    state.num_parts_completed.load(Ordering::SeqCst),
                    state.num_parts,
                );

                PartFinishResponse::Done
            }
            Err(err) => {
                tracing::error!(
                    "upload part #{} failed with error '{err}'",
                    transfer.part_number()
                );

                self.handle.metrics.add_transfer_status(false);
                transfer.flush_data_up_metrics();

                PartFinishResponse::Retry
            }
        }
    }

    /// Start a multipart upload for `key` and return the new upload id.
    pub async fn create_multipart_upload(&self, key: &str) -> Result<String, Error> {
        let key_path = format!("/{key}?uploads");

        let request = self
            .request_builder(Method::POST, &key_path)
            .header(CONTENT_TYPE, "text/plain")
            .body(Full::new(Bytes::new()))
            .map_err(error::invalid_input)?;

        tracing::debug!("creating multipart upload for {key_path}...");

        let mut stream = self.make_signed_request(request).await?;

        // The id may straddle chunk boundaries, so the scan runs over the
        // fully buffered body.
        let body = stream.collect_body().await.inspect_err(|err| {
            tracing::error!("create multipart upload for path {key_path} failed with error '{err}'");
        })?;

        let status = stream.status();
        if status.as_u16() != 200 {
            tracing::error!(
                "created multipart upload for path {key_path} with response status {status}"
            );
            return Err(error::bad_status(status.as_u16()));
        }

        let upload_id = parse_upload_id(&body).ok_or_else(|| {
            tracing::error!("CreateMultipartUpload response does not have a usable UploadId");
            error::parse_failed("response body missing a non-empty <UploadId>")
        })?;

        tracing::debug!("created multipart upload for path {key_path} with response status {status}");
        Ok(upload_id)
    }

    /// Complete the multipart upload `upload_id` from its per-part ETags,
    /// given in part order.
    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        etags: &[String],
    ) -> Result<(), Error> {
        tracing::debug!("completing multipart upload for {key}...");

        let body = Bytes::from(complete_multipart_upload_body(etags));
        let key_path = format!("/{key}?uploadId={upload_id}");

        let request = self
            .request_builder(Method::POST, &key_path)
            .header(CONTENT_LENGTH, body.len())
            .body(Full::new(body))
            .map_err(error::invalid_input)?;

        let mut stream = self.make_signed_request(request).await?;
        stream.consume().await.inspect_err(|err| {
            tracing::error!("finished multipart upload for path {key_path} with error '{err}'");
        })?;

        let status = stream.status();
        if status.as_u16() != 200 {
            tracing::error!(
                "finished multipart upload for path {key_path} with response status {status}"
            );
            return Err(error::bad_status(status.as_u16()));
        }

        tracing::debug!("finished multipart upload for path {key_path} with response status {status}");
        Ok(())
    }

    /// Abort the multipart upload `upload_id`, deleting any uploaded parts.
    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), Error> {
        tracing::debug!("aborting multipart upload for {key}...");

        let key_path = format!("/{key}?uploadId={upload_id}");
        let request = self
            .request_builder(Method::DELETE, &key_path)
            .body(Full::new(Bytes::new()))
            .map_err(error::invalid_input)?;

        let mut stream = self.make_signed_request(request).await?;
        stream.consume().await.inspect_err(|err| {
            tracing::error!("abort multipart upload for path {key_path} failed with error '{err}'");
        })?;

        let status = stream.status();
        if status.as_u16() != 204 {
            tracing::error!(
                "abort multipart upload for path {key_path} finished with response status {status}"
            );
            return Err(error::bad_status(status.as_u16()));
        }

        tracing::debug!(
            "abort multipart upload for path {key_path} finished with response status {status}"
        );
        Ok(())
    }
}

/// Scan `body` for the first `<UploadId>…</UploadId>` pair.
fn parse_upload_id(body: &[u8]) -> Option<String> {
    const OPEN_TAG: &str = "<UploadId>";
    const CLOSE_TAG: &str = "</UploadId>";

    let body = std::str::from_utf8(body).ok()?;
    let start = body.find(OPEN_TAG)? + OPEN_TAG.len();
    let end = body[start..].find(CLOSE_TAG)? + start;
    let upload_id = &body[start..end];
    (!upload_id.is_empty()).then(|| upload_id.to_owned())
}

fn complete_multipart_upload_body(etags: &[String]) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" ?>\n");
    xml.push_str("<CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\n");

    for (i, etag) in etags.iter().enumerate() {
        let part_number = i + 1;
        xml.push_str("   <Part>\n");
        let _ = write!(xml, "       <ETag>{etag}</ETag>\n");
        let _ = write!(xml, "       <PartNumber>{part_number}</PartNumber>\n");
        xml.push_str("   </Part>\n");
    }

    xml.push_str("</CompleteMultipartUpload>");
    xml
}
