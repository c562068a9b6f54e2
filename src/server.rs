//! distkv TCP server
//!
//! Accepts connections, runs one handler task per connection and, on a
//! leader, hands every committed PUT to the replicator.

use crate::{
    config::{Role, StoreConfig},
    error::{DistKvError, Result},
    protocol::{decode_request, read_frame, write_frame, Operation, Request, Response},
    replication::Replicator,
    store::{Entry, Store, Table},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{
    io::{BufReader, BufWriter},
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tracing::{debug, error, info, warn};

/// distkv TCP server
pub struct KvServer {
    config: StoreConfig,
    table: Arc<Table>,
    replicator: Option<Arc<Replicator>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl KvServer {
    /// Create a new server instance.
    ///
    /// Opens (and restores) the snapshot when persistence is enabled, and
    /// starts replication when this is a leader with followers configured.
    pub async fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let table = Table::open(&config)?;
        info!(
            role = ?config.role,
            persist = config.persist,
            entries = table.len().await,
            "Store opened"
        );

        let replicator = if config.replicates() {
            Some(Arc::new(Replicator::spawn(&config.replica_addrs)))
        } else {
            None
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            table: Arc::new(table),
            replicator,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shared handle to the storage table
    pub fn table(&self) -> Arc<Table> {
        Arc::clone(&self.table)
    }

    /// Bind the configured listen address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, role = ?self.config.role, "distkv server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!(%addr, "New client connected");
                            let table = Arc::clone(&self.table);
                            let replicator = self.replicator.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            // Spawn a task to handle the client
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_client(stream, table, replicator, shutdown_rx).await {
                                    warn!(%addr, error = %e, "Connection abandoned");
                                }
                                debug!(%addr, "Client disconnected");
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }

                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        info!(addr = %local_addr, "Server stopped");
        Ok(())
    }

    /// Handle a single client connection.
    ///
    /// Any read, decode or write failure ends the connection with an error.
    async fn handle_client(
        stream: TcpStream,
        table: Arc<Table>,
        replicator: Option<Arc<Replicator>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        loop {
            let body = tokio::select! {
                frame = read_frame(&mut reader) => match frame? {
                    Some(body) => body,
                    // Client disconnected
                    None => break,
                },

                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received, closing client connection");
                    break;
                }
            };

            let request = decode_request(&body)?;
            let (response, committed) = Self::dispatch(request, &table).await;

            // Hand off before answering so an acknowledged write is never
            // missed by a shutdown drain. The hand-off itself never blocks.
            if let (Some(entry), Some(replicator)) = (committed, replicator.as_ref()) {
                if let Err(e) = replicator.submit(entry).await {
                    warn!(error = %e, "Committed write not queued for replication");
                }
            }

            write_frame(&mut writer, &response.encode()?).await?;
        }

        Ok(())
    }

    /// Execute one request against the table.
    ///
    /// Returns the response and, for a successful PUT, the committed entry.
    async fn dispatch(request: Request, table: &Table) -> (Response, Option<Entry>) {
        match request.op {
            Operation::Get => {
                debug!(key_len = request.key.len(), "Handling GET request");
                match table.get(&request.key).await {
                    Ok(value) => (Response::success(value), None),
                    Err(e) => (Response::failure(&e), None),
                }
            }
            Operation::Put => {
                debug!(key_len = request.key.len(), value_len = request.value.len(), "Handling PUT request");
                match table.put(&request.key, &request.value).await {
                    Ok(()) => (
                        Response::success(Vec::new()),
                        Some(Entry::new(request.key, request.value)),
                    ),
                    Err(e) => {
                        error!(error = %e, "PUT failed");
                        (Response::failure(&e), None)
                    }
                }
            }
            Operation::Unknown(code) => {
                debug!(code, "Rejecting unknown operation");
                (Response::failure(&DistKvError::InvalidOperation), None)
            }
        }
    }

    /// Trigger graceful shutdown of the accept loop and open connections
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send(()).map_err(|_| {
            DistKvError::Server("Failed to send shutdown signal".to_string())
        })?;
        Ok(())
    }

    /// Drain replication: close the intake queue and wait for every replica
    /// worker to signal that it stopped. Returns the number of workers that
    /// stopped; zero for followers and leaders without replicas.
    pub async fn close(&self) -> usize {
        match &self.replicator {
            Some(replicator) => replicator.close().await,
            None => 0,
        }
    }

    pub fn role(&self) -> Role {
        self.config.role
    }
}

/// Bind `addr` and return the listener with its resolved local address
pub async fn bind(addr: &str) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_server_creation() {
        let temp_file = NamedTempFile::new().unwrap();
        let config = StoreConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            snapshot_path: temp_file.path().to_path_buf(),
            ..StoreConfig::default()
        };

        let server = KvServer::new(config).await.unwrap();
        assert!(server.table().is_persistent().await);
        assert_eq!(server.close().await, 0);
        // The shutdown might fail if there are no receivers, which is fine for this test
        let _ = server.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch() {
        let table = Table::in_memory();

        let (response, committed) =
            KvServer::dispatch(Request::put(b"key1", b"val1"), &table).await;
        assert_eq!(response, Response::success(Vec::new()));
        assert_eq!(committed, Some(Entry::new(b"key1".to_vec(), b"val1".to_vec())));

        let (response, committed) = KvServer::dispatch(Request::get(b"key1"), &table).await;
        assert_eq!(response, Response::success(b"val1".to_vec()));
        assert!(committed.is_none());

        let (response, _) = KvServer::dispatch(Request::get(b"missing"), &table).await;
        assert_eq!(response, Response::failure(&DistKvError::KeyNotFound));
        assert_eq!(response.error, "this key does not exist");

        let request = Request {
            key: b"key1".to_vec(),
            value: b"x".to_vec(),
            op: Operation::Unknown(9),
        };
        let (response, committed) = KvServer::dispatch(request, &table).await;
        assert_eq!(response.error, "invalid operation");
        assert!(response.value.is_empty());
        assert!(committed.is_none());
        assert_eq!(table.get(b"key1").await.unwrap(), b"val1");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = StoreConfig::in_memory(Role::Leader, "");
        assert!(matches!(
            KvServer::new(config).await,
            Err(DistKvError::Config(_))
        ));
    }
}
