/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::error::{self, Error};
use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{
    sign, PayloadChecksumKind, SignableBody, SignableRequest, SigningSettings,
    UriPathNormalizationMode,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use bytes::Bytes;
use http::header::HOST;
use http_body_util::Full;
use std::fmt;
use std::time::SystemTime;

/// The service name every request is signed for.
const SIGNING_SERVICE: &str = "s3";

/// Per-request signing inputs supplied by the transport.
#[derive(Debug)]
pub struct SigningContext<'a> {
    /// Signing region
    pub region: &'a str,
    /// URI scheme of the endpoint (`https` or `http`)
    pub scheme: &'a str,
    /// Timepoint the signature is computed at
    pub time: SystemTime,
}

/// Request signing contract.
///
/// The transport hands an assembled request to the signer and sends whatever
/// comes back; a signer error means the request is never sent.
#[async_trait]
pub trait SignRequest: Send + Sync + fmt::Debug {
    /// Sign `request` at `ctx.time` and return it with authentication
    /// headers applied.
    async fn sign(
        &self,
        request: http::Request<Full<Bytes>>,
        ctx: &SigningContext<'_>,
    ) -> Result<http::Request<Full<Bytes>>, Error>;
}

/// SigV4 header signer with unsigned payload.
///
/// Bodies are never hashed; requests carry
/// `x-amz-content-sha256: UNSIGNED-PAYLOAD` instead.
pub struct Sigv4RequestSigner {
    credentials: SharedCredentialsProvider,
}

impl Sigv4RequestSigner {
    /// Create a signer drawing credentials from `provider`.
    pub fn new(provider: SharedCredentialsProvider) -> Sigv4RequestSigner {
        Sigv4RequestSigner {
            credentials: provider,
        }
    }
}

impl fmt::Debug for Sigv4RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sigv4RequestSigner").finish_non_exhaustive()
    }
}

#[async_trait]
impl SignRequest for Sigv4RequestSigner {
    async fn sign(
        &self,
        request: http::Request<Full<Bytes>>,
        ctx: &SigningContext<'_>,
    ) -> Result<http::Request<Full<Bytes>>, Error> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .map_err(error::sign_failed)?;
        let identity: Identity = credentials.into();

        let mut settings = SigningSettings::default();
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(ctx.region)
            .name(SIGNING_SERVICE)
            .time(ctx.time)
            .settings(settings)
            .build()
            .map_err(error::sign_failed)?
            .into();

        // The request URI is origin-form; the canonical request needs the
        // absolute form with the logical host.
        let host = request
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| error::sign_failed("request is missing a Host header"))?;
        let uri = format!("{}://{}{}", ctx.scheme, host, request.uri());

        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("")));
        let signable =
            SignableRequest::new(request.method().as_str(), &uri, headers, SignableBody::UnsignedPayload)
                .map_err(error::sign_failed)?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(error::sign_failed)?
            .into_parts();

        let mut request = request;
        instructions.apply_to_request_http1x(&mut request);
        Ok(request)
    }
}
