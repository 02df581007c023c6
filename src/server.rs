//! TCP front end: one request and one response per connection.
//!
//! The accept loop hands every connection to its own thread and never does
//! request work itself. All connections share the directions cache; each
//! fetches its own registry snapshot, so visit counters never cross
//! connections.

use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, DirectionsCache};
use crate::config::ServerConfig;
use crate::model::ProjectionRequest;
use crate::projection::{ProjectionOptions, Projector};
use crate::traits::{DirectionsProvider, GroupRegistry};

/// How long the accept loop sleeps between polls for new connections.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Everything a connection handler needs, shared by all of them.
pub struct ServerState {
    pub cache: DirectionsCache,
    pub provider: Box<dyn DirectionsProvider>,
    pub registry: Box<dyn GroupRegistry>,
    pub options: ProjectionOptions,
    pub idle_timeout: Duration,
    pub max_request_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub connections: usize,
    pub cache_entries: usize,
}

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    cache_path: PathBuf,
}

impl Server {
    /// Loads the cache snapshot, optionally warms it, and binds the listener.
    ///
    /// An unreadable snapshot is logged and replaced by an empty cache.
    pub fn start(
        config: &ServerConfig,
        provider: Box<dyn DirectionsProvider>,
        registry: Box<dyn GroupRegistry>,
    ) -> Result<Self, ServerError> {
        let cache = DirectionsCache::load(&config.cache_path, config.cache_capacity).unwrap_or_else(|err| {
            warn!(error = %err, "discarding cache snapshot");
            DirectionsCache::new(config.cache_capacity)
        });

        let state = ServerState {
            cache,
            provider,
            registry,
            options: config.projection.clone(),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_request_bytes: config.max_request_bytes,
        };

        if config.warm_cache {
            match state.registry.fetch_groups() {
                Ok(groups) => {
                    Projector::new(&state.cache, state.provider.as_ref(), &state.options).warm(&groups);
                }
                Err(err) => warn!(error = %err, "registry unavailable, skipping warm-up"),
            }
        }

        let listener = TcpListener::bind(&config.bind_addr)?;
        info!(addr = %listener.local_addr()?, "listening");

        Ok(Self {
            listener,
            state: Arc::new(state),
            cache_path: config.cache_path.clone(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` is set. Returns the number of
    /// connections accepted.
    pub fn serve(&self, shutdown: &AtomicBool) -> Result<usize, ServerError> {
        self.listener.set_nonblocking(true)?;
        let mut accepted = 0;

        while !shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    accepted += 1;
                    let state = Arc::clone(&self.state);
                    let spawned = thread::Builder::new()
                        .name(format!("conn-{peer}"))
                        .spawn(move || {
                            info!(%peer, "handling connection");
                            match handle_connection(stream, &state) {
                                Ok(()) => debug!(%peer, "connection closed"),
                                Err(ConnectionError::Decode(err)) if err.is_eof() => {
                                    debug!(%peer, "connection closed without a request")
                                }
                                Err(err) => warn!(%peer, error = %err, "connection dropped"),
                            }
                        });
                    if let Err(err) = spawned {
                        warn!(%peer, error = %err, "could not spawn connection handler");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        info!(accepted, "stopped accepting connections");
        Ok(accepted)
    }

    /// Flushes the cache snapshot. Connections still in flight may finish
    /// afterwards; whatever they add is not persisted.
    pub fn finish(self) -> Result<usize, ServerError> {
        Ok(self.state.cache.flush(&self.cache_path)?)
    }
}

/// Load, serve until `shutdown` is set, flush.
pub fn run(
    config: &ServerConfig,
    provider: Box<dyn DirectionsProvider>,
    registry: Box<dyn GroupRegistry>,
    shutdown: &AtomicBool,
) -> Result<RunSummary, ServerError> {
    let server = Server::start(config, provider, registry)?;
    let connections = server.serve(shutdown)?;
    let cache_entries = server.finish()?;
    Ok(RunSummary {
        connections,
        cache_entries,
    })
}

/// Serves exactly one request on `stream`, then closes it.
///
/// A request that fails to decode closes the connection without a response.
pub fn handle_connection(stream: TcpStream, state: &ServerState) -> Result<(), ConnectionError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(state.idle_timeout))?;
    stream.set_write_timeout(Some(state.idle_timeout))?;

    let request = read_request(&stream, state.max_request_bytes).map_err(ConnectionError::Decode)?;
    info!(sightings = request.last_locations.len(), "request decoded");

    let groups = state.registry.fetch_groups().unwrap_or_else(|err| {
        warn!(error = %err, "registry unavailable, projecting without groups");
        Vec::new()
    });

    let result = Projector::new(&state.cache, state.provider.as_ref(), &state.options).project(
        &request.last_locations,
        &groups,
        Utc::now(),
    );
    let body = serde_json::to_vec(&result).map_err(ConnectionError::Encode)?;

    let mut writer = &stream;
    writer.write_all(&body)?;
    writer.flush()?;
    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}

/// Reads exactly one JSON document, at most `limit` bytes, without waiting
/// for the client to close its side.
fn read_request(stream: &TcpStream, limit: u64) -> Result<ProjectionRequest, serde_json::Error> {
    let reader = BufReader::new(stream.take(limit));
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    ProjectionRequest::deserialize(&mut deserializer)
}

#[derive(Debug)]
pub enum ConnectionError {
    Io(io::Error),
    Decode(serde_json::Error),
    Encode(serde_json::Error),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Io(err) => write!(f, "connection I/O failed: {err}"),
            ConnectionError::Decode(err) => write!(f, "malformed request: {err}"),
            ConnectionError::Encode(err) => write!(f, "could not encode response: {err}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(err)
    }
}

#[derive(Debug)]
pub enum ServerError {
    Io(io::Error),
    Cache(CacheError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Io(err) => write!(f, "server I/O failed: {err}"),
            ServerError::Cache(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        ServerError::Io(err)
    }
}

impl From<CacheError> for ServerError {
    fn from(err: CacheError) -> Self {
        ServerError::Cache(err)
    }
}
