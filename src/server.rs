//! TCP server for the WebSocket smoke test.
//!
//! Accepts connections and runs an echo exchange on each. The first
//! exchange to reach an outcome ends the server; clients that fail to
//! upgrade or leave before they are ready do not.

use crate::config::Config;
use crate::exchange::{handle_connection, Outcome};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Listen backlog for the server socket
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    config: Config,
    listener: TcpListener,
}

impl Server {
    /// Bind the listening socket. Must be called from within a Tokio runtime.
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        let addr = resolve(&config.addr)?;
        let listener = create_listener(addr)
            .and_then(TcpListener::from_std)
            .map_err(|e| ServerError::Bind(addr, e))?;

        Ok(Server { config, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until one exchange produces an outcome.
    pub async fn run(self) -> Outcome {
        if let Ok(addr) = self.local_addr() {
            info!(address = %addr, "Server listening");
        }

        // Every handler task holds a sender clone, so recv never yields None
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<Outcome>(1);

        loop {
            tokio::select! {
                Some(outcome) = outcome_rx.recv() => return outcome,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "New connection");

                        let settings = self.config.exchange.clone();
                        let outcome_tx = outcome_tx.clone();

                        tokio::spawn(async move {
                            match handle_connection(stream, peer, settings).await {
                                Ok(outcome) => {
                                    let _ = outcome_tx.send(outcome).await;
                                }
                                Err(e) => warn!(peer = %peer, error = %e, "Exchange aborted"),
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }
    }
}

/// Resolve the configured address, taking the first match.
fn resolve(addr: &str) -> Result<SocketAddr, ServerError> {
    addr.to_socket_addrs()
        .map_err(|e| ServerError::Resolve(addr.to_string(), e))?
        .next()
        .ok_or_else(|| {
            ServerError::Resolve(
                addr.to_string(),
                io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
            )
        })
}

/// Create a TCP listener with SO_REUSEADDR so a rerun can bind right away.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Server startup errors
#[derive(Debug)]
pub enum ServerError {
    Resolve(String, io::Error),
    Bind(SocketAddr, io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Resolve(addr, e) => {
                write!(f, "Failed to resolve address '{addr}': {e}")
            }
            ServerError::Bind(addr, e) => write!(f, "Failed to bind {addr}: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Resolve(_, e) | ServerError::Bind(_, e) => Some(e),
        }
    }
}
