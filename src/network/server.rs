//! Network server: accepts connections, decodes framed JSON transactions,
//! and routes completed results back to the connection that submitted them.
//!
//! One accept task, one dispatch task, one reader task per connection, all
//! cancelled together through a shared token. The transaction-id registry is
//! global: a txn id may be in flight only once across all connections.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StrandError};
use crate::network::codec;
use crate::network::connection::{read_frame, Connection};
use crate::server::DatabaseServer;

/// How long the dispatch loop waits for results per drain cycle.
const DRAIN_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    /// Port 0 binds an ephemeral port; see [`NetworkServer::port`].
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6767,
        }
    }
}

pub struct NetworkServer {
    server: Arc<DatabaseServer>,
    config: NetworkConfig,
    shutdown: CancellationToken,
    connections: DashMap<u64, Arc<Connection>>,
    /// txn id → connection id, for routing results.
    pending_results: DashMap<u64, u64>,
    next_connection_id: AtomicU64,
    bound_port: AtomicU16,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl NetworkServer {
    pub fn new(server: Arc<DatabaseServer>, config: NetworkConfig) -> Arc<Self> {
        Arc::new(Self {
            server,
            config,
            shutdown: CancellationToken::new(),
            connections: DashMap::new(),
            pending_results: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            bound_port: AtomicU16::new(0),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Bind the listener and launch the accept and dispatch tasks. The core
    /// server must already be running. Call on a clone of the handle:
    /// `Arc::clone(&network).start().await`.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if !self.server.running() {
            return Err(StrandError::Network(
                "core server is not running".into(),
            ));
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| StrandError::Network(format!("bind {}: {}", addr, e)))?;
        let bound = listener
            .local_addr()
            .map_err(|e| StrandError::Network(format!("local_addr: {}", e)))?;
        self.bound_port.store(bound.port(), Ordering::SeqCst);
        tracing::info!(%bound, "listening");

        let accept = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.accept_loop(listener).await })
        };
        let dispatch = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.dispatch_loop().await })
        };

        let mut tasks = self.tasks.lock();
        tasks.push(accept);
        tasks.push(dispatch);
        Ok(())
    }

    /// Cancel every task, close every connection, and wait for the loops to
    /// wind down.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        for entry in self.connections.iter() {
            entry.value().deactivate();
        }
        self.connections.clear();
        self.pending_results.clear();
    }

    /// The actually bound port (useful when configured with port 0).
    pub fn port(&self) -> u16 {
        self.bound_port.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
                    let (read_half, write_half) = stream.into_split();
                    let connection = Arc::new(Connection::new(
                        id,
                        peer.to_string(),
                        self.shutdown.child_token(),
                        write_half,
                    ));
                    self.connections.insert(id, Arc::clone(&connection));
                    tracing::debug!(connection = id, peer = %connection.peer, "accepted");

                    let this = Arc::clone(&self);
                    let reader = tokio::spawn(async move {
                        this.reader_loop(connection, read_half).await;
                    });
                    self.tasks.lock().push(reader);
                }
            }
        }
    }

    async fn reader_loop(self: Arc<Self>, connection: Arc<Connection>, mut reader: OwnedReadHalf) {
        loop {
            let frame = tokio::select! {
                _ = connection.token.cancelled() => break,
                frame = read_frame(&mut reader) => frame,
            };

            let payload = match frame {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(
                        connection = connection.id,
                        kind = e.kind(),
                        error = %e,
                        "read failed"
                    );
                    break;
                }
            };

            let Some(request) = codec::decode_request(&payload) else {
                tracing::debug!(connection = connection.id, "undecodable request");
                break;
            };

            // One in-flight transaction per id, across every connection.
            if !self.register_transaction(&connection, request.id) {
                let response = codec::aborted_response_for(&request).to_string();
                if connection.write_frame(response.as_bytes()).await.is_err() {
                    break;
                }
                continue;
            }

            if !self.server.submit_transaction(request.clone()) {
                let response = codec::aborted_response_for(&request).to_string();
                let write_failed = connection.write_frame(response.as_bytes()).await.is_err();
                self.clear_transaction(&connection, request.id);
                if write_failed {
                    break;
                }
            }
        }

        self.cleanup_connection(&connection).await;
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let server = Arc::clone(&self.server);
            let _ = tokio::task::spawn_blocking(move || server.wait_for_results(DRAIN_WAIT)).await;

            let results = self.server.drain_completed();
            if results.is_empty() && !self.server.running() {
                break;
            }

            for result in results {
                let Some((_, connection_id)) = self.pending_results.remove(&result.id) else {
                    continue;
                };
                let Some(connection) = self
                    .connections
                    .get(&connection_id)
                    .map(|entry| Arc::clone(entry.value()))
                else {
                    continue;
                };
                if !connection.is_active() {
                    continue;
                }

                let response = codec::encode_response(&result).to_string();
                if let Err(e) = connection.write_frame(response.as_bytes()).await {
                    tracing::debug!(
                        connection = connection.id,
                        txn_id = result.id,
                        kind = e.kind(),
                        error = %e,
                        "response write failed, closing"
                    );
                    self.cleanup_connection(&connection).await;
                    continue;
                }
                connection.clear_inflight(result.id);
            }
        }
    }

    fn register_transaction(&self, connection: &Arc<Connection>, txn_id: u64) -> bool {
        match self.pending_results.entry(txn_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(connection.id);
                connection.track_inflight(txn_id);
                true
            }
        }
    }

    fn clear_transaction(&self, connection: &Arc<Connection>, txn_id: u64) {
        self.pending_results.remove(&txn_id);
        connection.clear_inflight(txn_id);
    }

    async fn cleanup_connection(&self, connection: &Arc<Connection>) {
        if !connection.deactivate() {
            return;
        }

        connection.token.cancel();
        connection.shutdown_writer().await;
        for txn_id in connection.drain_inflight() {
            self.pending_results.remove(&txn_id);
        }
        self.connections.remove(&connection.id);
        tracing::debug!(connection = connection.id, "closed");
    }
}
