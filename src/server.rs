//! Top-level orchestration: the main-thread accept loop.
//!
//! `Server::bind` starts the worker pool, builds the accept-side poller,
//! and opens one acceptor per listen address. `run` then blocks in the
//! accept loop until a `ServerHandle` asks it to stop, at which point it
//! shuts down in order: stop accepting, signal every worker, join every
//! worker, release the pollers. No connection survives shutdown.

use crate::config::Config;
use crate::error::ServerError;
use crate::runtime::{Acceptor, WorkerPool};
use mio::{Events, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Acceptors take tokens 0..n, so the stop waker can never collide.
const STOP_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 64;

pub struct Server {
    poll: Poll,
    acceptors: Vec<Acceptor>,
    pool: WorkerPool,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

/// Cloneable stop handle for a running server.
#[derive(Clone)]
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ServerHandle {
    /// Ask the accept loop to shut the server down. `Server::run` returns
    /// once every worker has been joined.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }
}

impl Server {
    /// Start the worker pool and bind every listen address. Any failure
    /// tears down whatever already started before the error is returned.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let pool = WorkerPool::open(config.workers)?;

        let poll = Poll::new().map_err(ServerError::Registration)?;
        let waker = Waker::new(poll.registry(), STOP_TOKEN).map_err(ServerError::Registration)?;

        let mut acceptors = Vec::with_capacity(config.listens.len());
        for (i, spec) in config.listens.iter().enumerate() {
            // On error the pool and earlier acceptors are dropped, which
            // stops the workers and closes the listeners.
            let acceptor = Acceptor::open(spec, poll.registry(), Token(i))?;
            info!(listen = %acceptor.local_addr(), "listening");
            acceptors.push(acceptor);
        }

        Ok(Self {
            poll,
            acceptors,
            pool,
            stop: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(waker),
        })
    }

    /// Resolved bound addresses, one per listen spec.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.acceptors.iter().map(Acceptor::local_addr).collect()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: Arc::clone(&self.stop),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Run the accept loop on the calling thread until stopped.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.stop.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.shutdown();
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    // Stop flag is checked at the top of the loop.
                    STOP_TOKEN => {}
                    Token(i) => {
                        if let Some(acceptor) = self.acceptors.get_mut(i) {
                            acceptor.on_acceptable(&mut self.pool);
                        }
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Stop accepting first, then stop and join every worker.
    fn shutdown(&mut self) {
        info!("shutting down");
        for acceptor in self.acceptors.drain(..) {
            acceptor.close(self.poll.registry());
        }
        self.pool.close();
        info!("shutdown complete");
    }
}
