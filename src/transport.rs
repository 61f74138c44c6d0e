/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::config::Config;
use crate::dns::CachingResolver;
use crate::error::{self, Error};
use crate::fabric::{Fabric, PooledConnection};
use crate::metrics::LogMetricsPublisher;
use crate::runtime::processor::PartProcessor;
use crate::sign::{SignRequest, Sigv4RequestSigner, SigningContext};
use crate::types::Endpoint;
use crate::MAX_STREAMS;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Transport client for a single bucket endpoint.
///
/// The transport is internally reference-counted; clone it freely and share
/// it across tasks. All operations are driven by the surrounding tokio
/// runtime, so construct it from within one.
#[derive(Clone)]
pub struct ObjectTransport {
    pub(crate) handle: Arc<Handle>,
}

/// Shared state common to all clones of a transport.
pub(crate) struct Handle {
    pub(crate) config: Config,
    pub(crate) endpoint: Endpoint,
    pub(crate) signer: Arc<dyn SignRequest>,
    pub(crate) metrics: Arc<dyn crate::metrics::MetricsPublisher>,
    pub(crate) fabric: Fabric,
    pub(crate) active_requests: Arc<AtomicUsize>,
    pub(crate) upload_processor: PartProcessor,
    pub(crate) download_processor: PartProcessor,
}

impl ObjectTransport {
    /// Create a new transport from `config`.
    ///
    /// Fails when the configuration yields an invalid endpoint host or names
    /// neither a credentials provider nor an explicit signer.
    pub fn new(config: Config) -> Result<ObjectTransport, Error> {
        let endpoint = Endpoint::new(
            &config.bucket,
            &config.region,
            config.send_encrypted,
            config.port_override,
        );

        let signer: Arc<dyn SignRequest> = match (&config.signer, &config.credentials) {
            (Some(signer), _) => Arc::clone(signer),
            (None, Some(credentials)) => Arc::new(Sigv4RequestSigner::new(credentials.clone())),
            (None, None) => {
                return Err(error::invalid_input(
                    "either a credentials provider or a signer is required",
                ))
            }
        };

        let resolver = config
            .resolver
            .clone()
            .unwrap_or_else(|| Arc::new(CachingResolver::new()));
        let metrics = config
            .metrics
            .clone()
            .unwrap_or_else(|| Arc::new(LogMetricsPublisher));

        let fabric = Fabric::new(endpoint.clone(), resolver, Arc::clone(&metrics))?;
        let max_part_retries = config.max_part_retries;

        Ok(ObjectTransport {
            handle: Arc::new(Handle {
                config,
                endpoint,
                signer,
                metrics: Arc::clone(&metrics),
                fabric,
                active_requests: Arc::new(AtomicUsize::new(0)),
                upload_processor: PartProcessor::new(
                    MAX_STREAMS,
                    max_part_retries,
                    Arc::clone(&metrics),
                ),
                download_processor: PartProcessor::new(
                    MAX_STREAMS,
                    max_part_retries,
                    Arc::clone(&metrics),
                ),
            }),
        })
    }

    /// The endpoint this transport addresses.
    pub fn endpoint(&self) -> &Endpoint {
        &self.handle.endpoint
    }

    /// Number of requests currently in flight.
    ///
    /// Monitoring hook only; reads are racy by design.
    pub fn open_connection_count(&self) -> usize {
        self.handle.active_requests.load(Ordering::Relaxed)
    }

    /// Drive the DNS cache until it holds enough distinct addresses for
    /// `num_transfers` transfers, then fill the address book from it.
    ///
    /// Blocks (asynchronously) without an upper time bound; drop the future
    /// to cancel a stuck warm-up.
    pub async fn warm_dns_cache(&self, num_transfers: u32) -> Result<(), Error> {
        self.handle.fabric.warm_dns_cache(num_transfers).await
    }

    /// Replace the address book with a single caller-supplied address.
    ///
    /// For tests and forced-IP scenarios.
    pub fn seed_address_cache(&self, address: &str) {
        self.handle.fabric.seed_address_cache(address);
    }

    /// The address the placement function pins transfer `index` to, if the
    /// address book is populated.
    pub fn address_for_transfer(&self, index: u32) -> Option<String> {
        self.handle.fabric.address_for_transfer(index)
    }

    /// Create one connection manager per cached address, discarding any
    /// existing managers and resetting the placement counter.
    pub fn spawn_connection_managers(&self) {
        self.handle.fabric.spawn_connection_managers();
    }

    /// Discard all connection managers and reset the placement counter.
    pub fn purge_connection_managers(&self) {
        self.handle.fabric.purge_connection_managers();
    }

    /// Sign `request`, place it on the next connection manager, and activate
    /// the stream.
    ///
    /// The returned stream owns the connection and the in-flight accounting
    /// for its full lifetime. No retries happen at this layer.
    pub(crate) async fn make_signed_request(
        &self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<HttpStream, Error> {
        let ctx = SigningContext {
            region: &self.handle.config.region,
            scheme: self.handle.endpoint.scheme,
            time: SystemTime::now(),
        };
        let signed = self.handle.signer.sign(request, &ctx).await?;

        let manager = self.handle.fabric.next_connection_manager().await?;
        let mut conn = manager.acquire().await?;
        if !conn.is_open() {
            return Err(error::acquire_failed("acquired connection is not open"));
        }

        let in_flight = InFlightGuard::new(Arc::clone(&self.handle.active_requests));
        let response = conn.send_request(signed).await?;
        let (parts, body) = response.into_parts();

        Ok(HttpStream {
            status: parts.status,
            headers: parts.headers,
            body,
            conn,
            _in_flight: in_flight,
        })
    }

    pub(crate) fn request_builder(
        &self,
        method: Method,
        path_and_query: &str,
    ) -> http::request::Builder {
        http::Request::builder()
            .method(method)
            .uri(path_and_query)
            .header(http::header::HOST, self.handle.endpoint.logical_host.as_str())
    }
}

impl fmt::Debug for ObjectTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTransport")
            .field("endpoint", &self.handle.endpoint)
            .finish_non_exhaustive()
    }
}

/// An activated HTTP stream.
///
/// Holds the connection it runs on until completion; the in-flight counter
/// is decremented when the stream is dropped, success or error.
pub(crate) struct HttpStream {
    status: StatusCode,
    headers: HeaderMap,
    body: Incoming,
    conn: PooledConnection,
    _in_flight: InFlightGuard,
}

impl HttpStream {
    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Read the response body to the end, handing each data chunk to `f`.
    pub(crate) async fn for_each_data_chunk<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(&Bytes),
    {
        while let Some(frame) = self.body.frame().await {
            let frame = frame.map_err(error::stream_failed)?;
            if let Ok(data) = frame.into_data() {
                f(&data);
            }
        }
        self.conn.mark_reusable();
        Ok(())
    }

    /// Read the response body to the end, discarding it.
    pub(crate) async fn consume(&mut self) -> Result<(), Error> {
        self.for_each_data_chunk(|_| {}).await
    }

    /// Buffer the whole response body.
    pub(crate) async fn collect_body(&mut self) -> Result<Bytes, Error> {
        let mut buf = Vec::new();
        self.for_each_data_chunk(|chunk| buf.extend_from_slice(chunk))
            .await?;
        Ok(Bytes::from(buf))
    }
}

impl fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStream")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Increments the in-flight request counter on creation and decrements it on
/// drop.
pub(crate) struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    pub(crate) fn new(counter: Arc<AtomicUsize>) -> InFlightGuard {
        counter.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { counter }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
