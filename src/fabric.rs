/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Address book and connection fabric.
//!
//! The fabric owns the cached list of resolved addresses for the bucket
//! endpoint and one connection manager per address. Request placement pins
//! [`TRANSFERS_PER_ADDRESS`] consecutive requests to one manager before
//! advancing round-robin to the next.

mod manager;

pub(crate) use manager::{ConnectionManager, PooledConnection};

use crate::dns::{RecordType, ResolveHost};
use crate::error::{self, Error};
use crate::metrics::{Metric, MetricName, MetricUnit, MetricsPublisher};
use crate::types::Endpoint;
use crate::TRANSFERS_PER_ADDRESS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

const ADDRESS_COUNT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of addresses the warm-up drives the cache toward for a given
/// transfer count.
pub(crate) fn address_target(num_transfers: u32) -> u32 {
    num_transfers.div_ceil(TRANSFERS_PER_ADDRESS)
}

/// Manager index chosen for the `use_count`-th request.
pub(crate) fn manager_index(use_count: u64, num_managers: usize) -> usize {
    (((use_count + 1) / TRANSFERS_PER_ADDRESS as u64) % num_managers as u64) as usize
}

pub(crate) struct Fabric {
    endpoint: Endpoint,
    server_name: ServerName<'static>,
    tls: Option<TlsConnector>,
    resolver: Arc<dyn ResolveHost>,
    metrics: Arc<dyn MetricsPublisher>,
    address_book: RwLock<Vec<String>>,
    managers: RwLock<Arc<Vec<Arc<ConnectionManager>>>>,
    use_count: AtomicU64,
}

impl Fabric {
    pub(crate) fn new(
        endpoint: Endpoint,
        resolver: Arc<dyn ResolveHost>,
        metrics: Arc<dyn MetricsPublisher>,
    ) -> Result<Fabric, Error> {
        let server_name = ServerName::try_from(endpoint.logical_host.clone())
            .map_err(error::invalid_input)?;
        let tls = (endpoint.scheme == "https").then(tls_connector);

        Ok(Fabric {
            endpoint,
            server_name,
            tls,
            resolver,
            metrics,
            address_book: RwLock::new(Vec::new()),
            managers: RwLock::new(Arc::new(Vec::new())),
            use_count: AtomicU64::new(0),
        })
    }

    /// Drive the resolver's cache until it holds enough distinct A records
    /// for `num_transfers` transfers, then fill the address book from it.
    ///
    /// There is no upper time bound; cancellation is cooperative by dropping
    /// the returned future.
    pub(crate) async fn warm_dns_cache(&self, num_transfers: u32) -> Result<(), Error> {
        let target = address_target(num_transfers);
        let host = self.endpoint.logical_host.clone();

        tracing::info!("warming DNS cache: getting {target} addresses for endpoint {host}");

        loop {
            let resolver = Arc::clone(&self.resolver);
            let poll_host = host.clone();
            tokio::spawn(async move {
                let _ = resolver.resolve_host(&poll_host).await;
            });

            let count = self.resolver.cached_address_count(&host, RecordType::A);
            self.emit_address_count(count);

            if count as u32 >= target {
                break;
            }
            tokio::time::sleep(ADDRESS_COUNT_POLL_INTERVAL).await;
        }

        let mut collected: Vec<String> = Vec::new();
        while (collected.len() as u32) < target {
            let addresses = self.resolver.resolve_host(&host).await?;
            for addr in addresses {
                if addr.record_type == RecordType::A {
                    collected.push(addr.address);
                }
            }
        }

        *self
            .address_book
            .write()
            .unwrap_or_else(PoisonError::into_inner) = collected;

        tracing::info!("DNS cache warmed");
        Ok(())
    }

    /// Replace the address book with a single caller-supplied address.
    pub(crate) fn seed_address_cache(&self, address: &str) {
        let mut book = self
            .address_book
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        book.clear();
        book.push(address.to_owned());
    }

    /// The address the placement function pins transfer `index` to.
    pub(crate) fn address_for_transfer(&self, index: u32) -> Option<String> {
        let book = self
            .address_book
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if book.is_empty() {
            return None;
        }
        let index = (index / TRANSFERS_PER_ADDRESS) as usize % book.len();
        Some(book[index].clone())
    }

    pub(crate) fn address_book_snapshot(&self) -> Vec<String> {
        self.address_book
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Discard all connection managers and reset the placement counter.
    pub(crate) fn purge_connection_managers(&self) {
        *self
            .managers
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(Vec::new());
        self.use_count.store(0, Ordering::Relaxed);
    }

    /// Create one connection manager per cached address, discarding any
    /// existing managers first.
    pub(crate) fn spawn_connection_managers(&self) {
        self.purge_connection_managers();

        let book = self.address_book_snapshot();
        let mut managers = Vec::with_capacity(book.len());

        for address in book {
            tracing::info!("spawning connection manager for address {address}");
            managers.push(Arc::new(ConnectionManager::new(
                address,
                self.endpoint.port,
                self.server_name.clone(),
                self.tls.clone(),
            )));
        }

        *self
            .managers
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(managers);
    }

    /// Select the manager the next request is placed on.
    ///
    /// Lazily warms the DNS cache and spawns managers when none exist yet.
    pub(crate) async fn next_connection_manager(&self) -> Result<Arc<ConnectionManager>, Error> {
        if self.managers_snapshot().is_empty() {
            tracing::warn!(
                "no connection managers currently available; warming DNS cache and spawning connection managers"
            );
            self.warm_dns_cache(1).await?;
            self.spawn_connection_managers();
        }

        let managers = self.managers_snapshot();
        if managers.is_empty() {
            return Err(error::acquire_failed("no connection managers available"));
        }

        let use_count = self.use_count.fetch_add(1, Ordering::Relaxed);
        let index = manager_index(use_count, managers.len());
        Ok(Arc::clone(&managers[index]))
    }

    pub(crate) fn manager_count(&self) -> usize {
        self.managers_snapshot().len()
    }

    fn managers_snapshot(&self) -> Arc<Vec<Arc<ConnectionManager>>> {
        Arc::clone(
            &self
                .managers
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn emit_address_count(&self, count: usize) {
        tracing::info!("emitting S3 address count metric: {count}");
        self.metrics.add_data_point(Metric::new(
            MetricName::S3AddressCount,
            MetricUnit::Count,
            count as f64,
        ));
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("endpoint", &self.endpoint)
            .field("use_count", &self.use_count)
            .finish_non_exhaustive()
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::HostAddress;
    use crate::metrics::LogMetricsPublisher;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct StaticResolver {
        addresses: Vec<&'static str>,
    }

    #[async_trait]
    impl ResolveHost for StaticResolver {
        async fn resolve_host(&self, _host: &str) -> Result<Vec<HostAddress>, Error> {
            Ok(self
                .addresses
                .iter()
                .map(|a| HostAddress {
                    address: (*a).to_owned(),
                    record_type: RecordType::A,
                })
                .collect())
        }

        fn cached_address_count(&self, _host: &str, record_type: RecordType) -> usize {
            match record_type {
                RecordType::A => self.addresses.len(),
                RecordType::Aaaa => 0,
            }
        }
    }

    fn test_fabric(addresses: Vec<&'static str>) -> Fabric {
        let endpoint = Endpoint::new("test-bucket", "us-east-1", false, None);
        Fabric::new(
            endpoint,
            Arc::new(StaticResolver { addresses }),
            Arc::new(LogMetricsPublisher),
        )
        .unwrap()
    }

    #[test]
    fn test_address_target() {
        assert_eq!(1, address_target(1));
        assert_eq!(1, address_target(10));
        assert_eq!(2, address_target(11));
        assert_eq!(10, address_target(100));
    }

    #[test]
    fn test_manager_index_pins_windows() {
        let num_managers = 3;
        // use_count 0..=8 lands on manager 0, then windows of 10 advance by one
        let indices: Vec<usize> = (0..40).map(|u| manager_index(u, num_managers)).collect();
        assert_eq!(&indices[0..9], &[0; 9]);
        assert_eq!(&indices[9..19], &[1; 10]);
        assert_eq!(&indices[19..29], &[2; 10]);
        assert_eq!(&indices[29..39], &[0; 10]);
    }

    #[test]
    fn test_manager_index_single_manager() {
        for u in 0..50 {
            assert_eq!(0, manager_index(u, 1));
        }
    }

    #[tokio::test]
    async fn test_warm_dns_cache_fills_book() {
        let fabric = test_fabric(vec!["10.0.0.1", "10.0.0.2"]);
        fabric.warm_dns_cache(11).await.unwrap();
        assert_eq!(fabric.address_book_snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_warm_dns_cache_drops_aaaa() {
        #[derive(Debug)]
        struct MixedResolver;

        #[async_trait]
        impl ResolveHost for MixedResolver {
            async fn resolve_host(&self, _host: &str) -> Result<Vec<HostAddress>, Error> {
                Ok(vec![
                    HostAddress {
                        address: "2600:9000::1".to_owned(),
                        record_type: RecordType::Aaaa,
                    },
                    HostAddress {
                        address: "10.1.1.1".to_owned(),
                        record_type: RecordType::A,
                    },
                ])
            }

            fn cached_address_count(&self, _host: &str, record_type: RecordType) -> usize {
                match record_type {
                    RecordType::A => 1,
                    RecordType::Aaaa => 1,
                }
            }
        }

        let endpoint = Endpoint::new("test-bucket", "us-east-1", false, None);
        let fabric = Fabric::new(
            endpoint,
            Arc::new(MixedResolver),
            Arc::new(LogMetricsPublisher),
        )
        .unwrap();

        fabric.warm_dns_cache(5).await.unwrap();
        assert_eq!(fabric.address_book_snapshot(), vec!["10.1.1.1".to_owned()]);
    }

    #[test]
    fn test_seed_replaces_book() {
        let fabric = test_fabric(vec![]);
        fabric.seed_address_cache("127.0.0.1");
        fabric.seed_address_cache("10.9.9.9");
        assert_eq!(fabric.address_book_snapshot(), vec!["10.9.9.9".to_owned()]);
    }

    #[tokio::test]
    async fn test_address_for_transfer() {
        let fabric = test_fabric(vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(fabric.address_for_transfer(0), None);

        fabric.warm_dns_cache(20).await.unwrap();
        assert_eq!(fabric.address_for_transfer(0).as_deref(), Some("10.0.0.1"));
        assert_eq!(fabric.address_for_transfer(9).as_deref(), Some("10.0.0.1"));
        assert_eq!(fabric.address_for_transfer(10).as_deref(), Some("10.0.0.2"));
        assert_eq!(fabric.address_for_transfer(20).as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_purge_then_spawn_matches_book() {
        let fabric = test_fabric(vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        fabric.warm_dns_cache(30).await.unwrap();

        fabric.spawn_connection_managers();
        assert_eq!(fabric.manager_count(), 3);

        // advance the placement counter, then verify respawn resets it
        for _ in 0..7 {
            let _ = fabric.next_connection_manager().await.unwrap();
        }
        assert_ne!(fabric.use_count.load(Ordering::Relaxed), 0);

        fabric.purge_connection_managers();
        assert_eq!(fabric.manager_count(), 0);
        assert_eq!(fabric.use_count.load(Ordering::Relaxed), 0);

        fabric.spawn_connection_managers();
        assert_eq!(fabric.manager_count(), 3);
        assert_eq!(fabric.use_count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_next_manager_placement_windows() {
        let fabric = test_fabric(vec!["10.0.0.1", "10.0.0.2"]);
        fabric.warm_dns_cache(20).await.unwrap();
        fabric.spawn_connection_managers();

        let mut picked = Vec::new();
        for _ in 0..20 {
            picked.push(
                fabric
                    .next_connection_manager()
                    .await
                    .unwrap()
                    .address()
                    .to_owned(),
            );
        }

        // first window is one short (placement starts at use_count + 1)
        assert!(picked[0..9].iter().all(|a| a == "10.0.0.1"));
        assert!(picked[9..19].iter().all(|a| a == "10.0.0.2"));
        assert_eq!(picked[19], "10.0.0.1");
    }
}
