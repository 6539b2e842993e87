//! The concurrency core: acceptor, worker pool, and per-connection state.
//!
//! Layout follows the classic one-acceptor/N-worker reactor:
//! - `acceptor`: non-blocking listener, drains accept bursts, hands each
//!   connection to the pool
//! - `pool`: fixed-size set of workers plus the round-robin cursor
//! - `worker`: one thread + one mio `Poll` per worker, fed through a
//!   registration queue and a `Waker`
//! - `connection`: the echo state machine, owned by exactly one worker

mod acceptor;
mod connection;
mod pool;
mod worker;

pub use acceptor::Acceptor;
pub use connection::EchoConn;
pub use pool::WorkerPool;
pub use worker::Worker;
