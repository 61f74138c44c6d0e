/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::dns::ResolveHost;
use crate::metrics::MetricsPublisher;
use crate::sign::SignRequest;
use aws_credential_types::provider::SharedCredentialsProvider;
use std::sync::Arc;

/// Configuration for an [`ObjectTransport`](crate::ObjectTransport)
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) bucket: String,
    pub(crate) region: String,
    pub(crate) send_encrypted: bool,
    pub(crate) port_override: Option<u16>,
    pub(crate) max_part_retries: Option<u32>,
    pub(crate) credentials: Option<SharedCredentialsProvider>,
    pub(crate) signer: Option<Arc<dyn SignRequest>>,
    pub(crate) resolver: Option<Arc<dyn ResolveHost>>,
    pub(crate) metrics: Option<Arc<dyn MetricsPublisher>>,
}

impl Config {
    /// Create a new `Config` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The target bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The signing and endpoint region
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Whether transfers use TLS
    pub fn send_encrypted(&self) -> bool {
        self.send_encrypted
    }

    /// Retry budget for a single part, `None` meaning unbounded
    pub fn max_part_retries(&self) -> Option<u32> {
        self.max_part_retries
    }
}

/// Fluent style builder for [Config]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    bucket: Option<String>,
    region: Option<String>,
    send_encrypted: Option<bool>,
    port_override: Option<u16>,
    max_part_retries: Option<u32>,
    credentials: Option<SharedCredentialsProvider>,
    signer: Option<Arc<dyn SignRequest>>,
    resolver: Option<Arc<dyn ResolveHost>>,
    metrics: Option<Arc<dyn MetricsPublisher>>,
}

impl Builder {
    /// Set the bucket all operations address. Required.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the region used for the endpoint host name and request signing. Required.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Use TLS for all connections. Default is `true`.
    pub fn send_encrypted(mut self, send_encrypted: bool) -> Self {
        self.send_encrypted = Some(send_encrypted);
        self
    }

    /// Override the port connections dial.
    ///
    /// The default follows the scheme (443 for TLS, 80 otherwise). Intended
    /// for forced-endpoint scenarios alongside
    /// [`seed_address_cache`](crate::ObjectTransport::seed_address_cache).
    pub fn port(mut self, port: u16) -> Self {
        self.port_override = Some(port);
        self
    }

    /// Cap the number of times a failed part is re-enqueued.
    ///
    /// Unset, a part retries until it succeeds.
    pub fn max_part_retries(mut self, max: u32) -> Self {
        self.max_part_retries = Some(max);
        self
    }

    /// Set the credentials provider backing the default SigV4 signer.
    ///
    /// Required unless an explicit [`signer`](Self::signer) is configured.
    pub fn credentials_provider(mut self, provider: SharedCredentialsProvider) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Replace the default SigV4 signer.
    pub fn signer(mut self, signer: Arc<dyn SignRequest>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replace the default caching DNS resolver.
    pub fn host_resolver(mut self, resolver: Arc<dyn ResolveHost>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the metrics publisher data points are recorded to.
    ///
    /// Defaults to [`LogMetricsPublisher`](crate::metrics::LogMetricsPublisher).
    pub fn metrics_publisher(mut self, metrics: Arc<dyn MetricsPublisher>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Consumes the builder and constructs a [`Config`](crate::config::Config)
    pub fn build(self) -> Config {
        Config {
            bucket: self.bucket.expect("bucket set"),
            region: self.region.expect("region set"),
            send_encrypted: self.send_encrypted.unwrap_or(true),
            port_override: self.port_override,
            max_part_retries: self.max_part_retries,
            credentials: self.credentials,
            signer: self.signer,
            resolver: self.resolver,
            metrics: self.metrics,
        }
    }
}
