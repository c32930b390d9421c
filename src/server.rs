//! CheckVault TCP server
//!
//! A single task multiplexes the listening socket and every client socket.
//! Each loop iteration waits for exactly one event, handles it to
//! completion, and goes back to waiting, so the store and the AOF are only
//! ever touched from one place.

use crate::{
    aof::AppendOnlyLog,
    config::ServerConfig,
    connection::{Connection, ConnectionId, ReadOutcome},
    dispatcher::{Dispatcher, Mode},
    error::{CheckVaultError, ProtocolError, Result},
    protocol::Response,
    store::{MemoryStore, Store},
};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tracing::{debug, error, info, warn};

/// What woke the event loop up
enum Event {
    Listener(io::Result<(TcpStream, SocketAddr)>),
    Client(ConnectionId, io::Result<()>),
    Shutdown,
}

enum Flow {
    Continue,
    Close,
}

/// CheckVault TCP server
pub struct CheckpointServer<S: Store = MemoryStore> {
    config: ServerConfig,
    listener: TcpListener,
    dispatcher: Dispatcher<S>,
    connections: HashMap<ConnectionId, Connection>,
    // One pending readiness future per registered connection.
    readiness: FuturesUnordered<BoxFuture<'static, (ConnectionId, io::Result<()>)>>,
    next_id: ConnectionId,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl CheckpointServer<MemoryStore> {
    /// Restore state from the AOF, then bind the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        Self::with_store(config, MemoryStore::new()).await
    }
}

impl<S: Store> CheckpointServer<S> {
    pub async fn with_store(config: ServerConfig, store: S) -> Result<Self> {
        config.validate()?;

        let log = AppendOnlyLog::open(&config.aof_path)?;
        let mut dispatcher = Dispatcher::new(store, log);

        info!(path = %config.aof_path.display(), "restoring state from AOF");
        let stats = dispatcher.restore()?;
        info!(
            applied = stats.applied,
            skipped = stats.skipped,
            pipelines = dispatcher.store().len(),
            "restored checkpoints"
        );

        let listener = TcpListener::bind(&config.bind_addr).await?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            config,
            listener,
            dispatcher,
            connections: HashMap::new(),
            readiness: FuturesUnordered::new(),
            next_id: 0,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Serve clients until a shutdown is requested.
    pub async fn run(mut self) -> Result<()> {
        info!(addr = %self.local_addr()?, "CheckVault server listening");

        loop {
            match self.next_event().await {
                Event::Listener(accepted) => self.on_accept(accepted),
                Event::Client(id, ready) => self.on_client_ready(id, ready),
                Event::Shutdown => {
                    info!("shutdown signal received, stopping server");
                    break;
                }
            }
        }

        info!(
            open_connections = self.connections.len(),
            "server stopped"
        );
        Ok(())
    }

    async fn next_event(&mut self) -> Event {
        tokio::select! {
            _ = self.shutdown_rx.recv() => Event::Shutdown,
            accepted = self.listener.accept() => Event::Listener(accepted),
            Some((id, ready)) = self.readiness.next() => Event::Client(id, ready),
        }
    }

    fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "failed to accept connection");
                return;
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        let mut conn = Connection::new(id, stream, peer);

        // Rejected clients stay registered only until the error line is out.
        let open = self.connections.values().filter(|c| !c.is_closing()).count();
        if open >= self.config.max_connections {
            warn!(%peer, limit = self.config.max_connections, "connection limit reached, rejecting client");
            conn.queue(&Response::error("too many connections"));
            conn.close_after_flush();
        } else {
            info!(connection_id = id, %peer, "accepted connection");
        }

        self.readiness.push(conn.readiness(self.config.write_timeout()));
        self.connections.insert(id, conn);
    }

    fn on_client_ready(&mut self, id: ConnectionId, ready: io::Result<()>) {
        let flow = match self.serve(id, ready) {
            Ok(flow) => flow,
            Err(err) => {
                warn!(connection_id = id, error = %err, "connection error");
                Flow::Close
            }
        };

        match flow {
            Flow::Continue => {
                if let Some(conn) = self.connections.get(&id) {
                    self.readiness.push(conn.readiness(self.config.write_timeout()));
                }
            }
            Flow::Close => self.deregister(id),
        }
    }

    /// Make whatever progress a ready client allows without blocking.
    ///
    /// Queued output is flushed first. Buffered lines are answered one at a
    /// time, and a response the peer has not accepted yet stops both
    /// dispatching and reading for that client until it is writable again.
    fn serve(&mut self, id: ConnectionId, ready: io::Result<()>) -> io::Result<Flow> {
        ready?;

        let Some(conn) = self.connections.get_mut(&id) else {
            return Ok(Flow::Close);
        };

        if !conn.flush()? {
            return Ok(Flow::Continue);
        }
        if conn.is_closing() {
            return Ok(Flow::Close);
        }

        let max_line = self.config.max_line_length;
        if !answer_lines(&mut self.dispatcher, conn, max_line)? {
            return Ok(Flow::Continue);
        }

        match conn.fill()? {
            ReadOutcome::Closed => {
                info!(connection_id = id, peer = %conn.peer, "client disconnected");
                return Ok(Flow::Close);
            }
            ReadOutcome::WouldBlock => return Ok(Flow::Continue),
            ReadOutcome::Data(_) => {}
        }

        if !answer_lines(&mut self.dispatcher, conn, max_line)? {
            return Ok(Flow::Continue);
        }

        if conn.pending() > max_line {
            warn!(
                connection_id = id,
                pending = conn.pending(),
                "unterminated input exceeds line limit, closing connection"
            );
            conn.queue(&Response::error(ProtocolError::LineTooLong(max_line)));
            conn.close_after_flush();
            if conn.flush()? {
                return Ok(Flow::Close);
            }
        }

        Ok(Flow::Continue)
    }

    fn deregister(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.remove(&id) {
            debug!(connection_id = id, peer = %conn.peer, "connection closed");
        }
    }
}

/// Answer complete lines in arrival order. Returns `false` as soon as a
/// response is left queued.
fn answer_lines<S: Store>(
    dispatcher: &mut Dispatcher<S>,
    conn: &mut Connection,
    max_line: usize,
) -> io::Result<bool> {
    while let Some(line) = conn.next_line() {
        let response = if line.len() > max_line {
            Response::error(ProtocolError::LineTooLong(max_line))
        } else {
            match std::str::from_utf8(&line) {
                Ok(text) => dispatcher.dispatch(text, Mode::Live),
                Err(_) => Response::error(ProtocolError::InvalidUtf8),
            }
        };
        debug!(connection_id = conn.id, %response, "sending response");
        conn.queue(&response);
        if !conn.flush()? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Stops a running [`CheckpointServer`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Trigger graceful shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.tx.send(()).map_err(|_| {
            CheckVaultError::Server("Failed to send shutdown signal".to_string())
        })?;
        Ok(())
    }
}
