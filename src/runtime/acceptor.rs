//! One acceptor per listen address.
//!
//! The listener is built through socket2 (reuse-address, optional
//! IPv6-only, non-blocking) and registered for accept readiness on the
//! server's accept-side poller. On each readiness event the acceptor
//! drains the whole burst of pending connections and hands each one to
//! the next worker in round-robin order.

use crate::config::ListenSpec;
use crate::error::ServerError;
use crate::runtime::connection::EchoConn;
use crate::runtime::pool::WorkerPool;
use mio::net::TcpListener;
use mio::{Interest, Registry, Token};
use std::io;
use std::net::SocketAddr;
use tracing::error;

const BACKLOG: i32 = 1024;

#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
    local: SocketAddr,
}

impl Acceptor {
    /// Bind, listen, and register for accept readiness. On failure no
    /// partial registration is left behind: the socket is simply dropped.
    pub fn open(spec: &ListenSpec, registry: &Registry, token: Token) -> Result<Self, ServerError> {
        let listener = bind_listener(spec).map_err(|source| ServerError::Bind {
            addr: spec.addr,
            source,
        })?;
        let local = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: spec.addr,
            source,
        })?;

        let mut listener = TcpListener::from_std(listener);
        registry
            .register(&mut listener, token, Interest::READABLE)
            .map_err(ServerError::Registration)?;

        Ok(Self { listener, local })
    }

    /// Bound address, with any ephemeral port resolved.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Accept until `WouldBlock`: level-triggered readiness can stand for
    /// more than one pending connection. Accept failures are logged and
    /// this attempt ends; the next readiness event tries again.
    pub fn on_acceptable(&mut self, pool: &mut WorkerPool) {
        loop {
            match self.listener.accept() {
                Ok((stream, _peer)) => {
                    let conn = EchoConn::new(stream);
                    conn.on_open();
                    pool.next().submit(conn);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(listen = %self.local, error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Unregister from the poller and close the listening socket.
    pub fn close(mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.listener);
    }
}

fn bind_listener(spec: &ListenSpec) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match spec.addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    if spec.addr.is_ipv6() && spec.ipv6_only {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&spec.addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
