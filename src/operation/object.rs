/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::error::{self, Error};
use crate::types::PutObjectFlags;
use crate::ObjectTransport;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::Method;
use http_body_util::Full;

const PARTIAL_CONTENT: u16 = 206;

impl ObjectTransport {
    /// Upload `body` as the object at `key` with a single `PutObject` request.
    ///
    /// `key` may carry a query string; multipart part uploads reuse this
    /// operation with `?partNumber=N&uploadId=U` appended. When
    /// [`PutObjectFlags::RETRIEVE_ETAG`] is set, the `ETag` response header is
    /// captured and returned.
    pub async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        flags: PutObjectFlags,
    ) -> Result<Option<String>, Error> {
        let key_path = format!("/{key}");

        let request = self
            .request_builder(Method::PUT, &key_path)
            .header(CONTENT_TYPE, "text/plain")
            .header(CONTENT_LENGTH, body.len())
            .body(Full::new(body))
            .map_err(error::invalid_input)?;

        tracing::info!("PutObject initiated for path {key_path}...");

        let mut stream = self.make_signed_request(request).await?;

        let etag = flags.retrieve_etag.then(|| {
            stream
                .headers()
                .get("ETag")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned()
        });

        stream.consume().await.inspect_err(|err| {
            tracing::debug!("PutObject finished for path {key_path} with error '{err}'");
        })?;

        let status = stream.status();
        if status.as_u16() != 200 {
            tracing::error!("PutObject finished for path {key_path} with response status {status}");
            return Err(error::bad_status(status.as_u16()));
        }

        tracing::info!("PutObject finished for path {key_path} with response status {status}");
        Ok(etag)
    }

    /// Download the object at `key`, forwarding each body chunk to `on_body`.
    ///
    /// When `part_number` is greater than zero the request addresses that one
    /// part of the object and the expected response status is 206 instead of
    /// 200.
    pub async fn get_object<F>(
        &self,
        key: &str,
        part_number: u32,
        mut on_body: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&Bytes) + Send,
    {
        let key_path = if part_number > 0 {
            format!("/{key}?partNumber={part_number}")
        } else {
            format!("/{key}")
        };

        let request = self
            .request_builder(Method::GET, &key_path)
            .body(Full::new(Bytes::new()))
            .map_err(error::invalid_input)?;

        let mut stream = self.make_signed_request(request).await?;

        stream.for_each_data_chunk(&mut on_body).await.inspect_err(|err| {
            tracing::error!("GetObject finished for path {key_path} with error '{err}'");
        })?;

        let expected = if part_number > 0 { PARTIAL_CONTENT } else { 200 };
        let status = stream.status();
        if status.as_u16() != expected {
            tracing::error!("GetObject finished for path {key_path} with response status {status}");
            return Err(error::bad_status(status.as_u16()));
        }

        tracing::debug!("GetObject finished for path {key_path} with response status {status}");
        Ok(())
    }
}
