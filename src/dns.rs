/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::error::{self, Error};
use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};

/// DNS record type of a resolved address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// IPv4 A record
    A,
    /// IPv6 AAAA record
    Aaaa,
}

/// A single resolved address for a host.
#[derive(Debug, Clone)]
pub struct HostAddress {
    /// The address in its textual form
    pub address: String,
    /// The record type the address came from
    pub record_type: RecordType,
}

/// Host resolution contract consumed by the connection fabric.
///
/// `cached_address_count` reads whatever cache the resolver maintains without
/// touching the network; the DNS warm-up polls it while firing resolves in the
/// background until the cache holds enough distinct addresses.
#[async_trait]
pub trait ResolveHost: Send + Sync + fmt::Debug {
    /// Resolve `host`, returning every address delivered by this query.
    async fn resolve_host(&self, host: &str) -> Result<Vec<HostAddress>, Error>;

    /// Number of distinct addresses of `record_type` cached for `host`.
    fn cached_address_count(&self, host: &str, record_type: RecordType) -> usize;
}

/// Resolver backed by `hickory-resolver` that remembers every distinct address
/// a host has resolved to.
///
/// S3 endpoints rotate A records between queries, so repeated resolves grow
/// the cached set; that is what the warm-up loop relies on.
pub struct CachingResolver {
    inner: TokioResolver,
    seen: Mutex<HashMap<String, HashSet<IpAddr>>>,
}

impl CachingResolver {
    /// Create a resolver with the default upstream configuration.
    pub fn new() -> CachingResolver {
        let inner = Resolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build();

        CachingResolver {
            inner,
            seen: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for CachingResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CachingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl ResolveHost for CachingResolver {
    async fn resolve_host(&self, host: &str) -> Result<Vec<HostAddress>, Error> {
        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(error::dns_failed)?;

        let addresses: Vec<HostAddress> = lookup
            .iter()
            .map(|ip| HostAddress {
                address: ip.to_string(),
                record_type: if ip.is_ipv4() {
                    RecordType::A
                } else {
                    RecordType::Aaaa
                },
            })
            .collect();

        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = seen.entry(host.to_owned()).or_default();
        for ip in lookup.iter() {
            entry.insert(ip);
        }

        Ok(addresses)
    }

    fn cached_address_count(&self, host: &str, record_type: RecordType) -> usize {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.get(host)
            .map(|addrs| {
                addrs
                    .iter()
                    .filter(|ip| match record_type {
                        RecordType::A => ip.is_ipv4(),
                        RecordType::Aaaa => ip.is_ipv6(),
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}
