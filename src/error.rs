//! Fatal server construction errors.
//!
//! Per-connection failures (peer EOF, receive or send errors) never show
//! up here: they stay inside the owning worker as `io::Error` values that
//! close exactly one connection.

use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Errors that abort server startup.
#[derive(Debug)]
pub enum ServerError {
    /// Could not bind or listen on an address.
    Bind { addr: SocketAddr, source: io::Error },
    /// The poller rejected a handle.
    Registration(io::Error),
    /// A worker thread failed to initialize its poller.
    PoolStartup { worker: usize, source: io::Error },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind { addr, source } => {
                write!(f, "unable to listen on {addr}: {source}")
            }
            ServerError::Registration(source) => {
                write!(f, "poller registration failed: {source}")
            }
            ServerError::PoolStartup { worker, source } => {
                write!(f, "worker {worker} failed to start: {source}")
            }
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind { source, .. } => Some(source),
            ServerError::Registration(source) => Some(source),
            ServerError::PoolStartup { source, .. } => Some(source),
        }
    }
}
