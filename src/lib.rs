//! reverb: a multi-threaded TCP echo server.
//!
//! The interesting part is not the echo but the concurrency layout:
//! one non-blocking acceptor on the main thread distributes incoming
//! connections round-robin across a fixed pool of worker threads, each
//! running its own readiness-based event loop (epoll on Linux, kqueue
//! on macOS, via mio). A connection is owned by exactly one worker for
//! its whole life, so connection state needs no locking; the only
//! synchronized structure is each worker's registration queue.

pub mod config;
pub mod error;
pub mod runtime;
pub mod server;
