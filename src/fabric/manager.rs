/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::error::{self, Error};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

/// Maximum concurrent connections a single manager hands out.
const MAX_CONNECTIONS: usize = 5000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

type Http1Sender = http1::SendRequest<Full<Bytes>>;

/// A bounded pool of keep-alive HTTP/1.1 connections to one resolved address.
///
/// Connections dial the pinned address directly; when TLS is enabled the
/// handshake's server name is the bucket's logical host, not the address.
pub(crate) struct ConnectionManager {
    address: String,
    port: u16,
    server_name: ServerName<'static>,
    tls: Option<TlsConnector>,
    idle: Mutex<Vec<Http1Sender>>,
    permits: Arc<Semaphore>,
}

impl ConnectionManager {
    pub(crate) fn new(
        address: String,
        port: u16,
        server_name: ServerName<'static>,
        tls: Option<TlsConnector>,
    ) -> ConnectionManager {
        ConnectionManager {
            address,
            port,
            server_name,
            tls,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        }
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    /// Acquire a connection, reusing an idle keep-alive connection when one
    /// is still open and dialing otherwise.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, Error> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(error::acquire_failed)?;

        let reused = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                match idle.pop() {
                    Some(sender) if !sender.is_closed() && sender.is_ready() => {
                        break Some(sender)
                    }
                    Some(_) => continue,
                    None => break None,
                }
            }
        };

        let sender = match reused {
            Some(sender) => sender,
            None => self.connect().await?,
        };

        Ok(PooledConnection {
            sender: Some(sender),
            manager: Arc::clone(self),
            reusable: false,
            _permit: permit,
        })
    }

    async fn connect(&self) -> Result<Http1Sender, Error> {
        let connect = TcpStream::connect((self.address.as_str(), self.port));
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| {
                error::acquire_failed(format!("connect to {} timed out", self.address))
            })?
            .map_err(error::acquire_failed)?;
        stream.set_nodelay(true).map_err(error::acquire_failed)?;

        let sender = match &self.tls {
            Some(connector) => {
                let tls = connector
                    .connect(self.server_name.clone(), stream)
                    .await
                    .map_err(error::acquire_failed)?;
                let (sender, conn) = http1::handshake(TokioIo::new(tls))
                    .await
                    .map_err(error::acquire_failed)?;
                tokio::spawn(drive(conn));
                sender
            }
            None => {
                let (sender, conn) = http1::handshake(TokioIo::new(stream))
                    .await
                    .map_err(error::acquire_failed)?;
                tokio::spawn(drive(conn));
                sender
            }
        };

        Ok(sender)
    }

    fn release(&self, sender: Http1Sender) {
        if !sender.is_closed() {
            self.idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(sender);
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.address)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

async fn drive<I>(conn: http1::Connection<I, Full<Bytes>>)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    if let Err(err) = conn.await {
        tracing::debug!(error = %err, "connection closed with error");
    }
}

/// A connection checked out of a [`ConnectionManager`].
///
/// Returned to the manager's idle pool on drop once the stream that owns it
/// has run to completion; dropped connections with unread data are discarded.
pub(crate) struct PooledConnection {
    sender: Option<Http1Sender>,
    manager: Arc<ConnectionManager>,
    reusable: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub(crate) fn is_open(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub(crate) async fn send_request(
        &mut self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<Incoming>, Error> {
        let sender = self
            .sender
            .as_mut()
            .ok_or_else(|| error::stream_failed("connection already released"))?;
        sender.send_request(request).await.map_err(error::stream_failed)
    }

    pub(crate) fn mark_reusable(&mut self) {
        self.reusable = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.reusable {
            if let Some(sender) = self.sender.take() {
                self.manager.release(sender);
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("address", &self.manager.address)
            .field("reusable", &self.reusable)
            .finish_non_exhaustive()
    }
}
