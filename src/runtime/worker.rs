//! Worker: one thread, one poller, one exclusive set of connections.
//!
//! The worker thread builds its own `Poll` and `Waker`, confirms liveness
//! back to the spawning thread over a capacity-1 handshake channel, then
//! loops: drain the registration queue, check the stop flag, block in
//! `poll`, dispatch readiness events. The registration queue plus the
//! waker is the only cross-thread path into a worker: `submit` never
//! blocks the accept thread, and the waker means a new connection is
//! registered before the next `poll` call blocks.

use crate::runtime::connection::EchoConn;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

/// Slab keys start at 0, so the waker token can never collide.
const WAKE_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 256;

/// Handle to one worker thread.
pub struct Worker {
    id: usize,
    pending: Sender<EchoConn>,
    waker: Arc<Waker>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread and block until its poller is confirmed
    /// live. A poller construction failure on the worker thread is
    /// propagated here, not retried.
    pub fn start(id: usize) -> io::Result<Self> {
        let (pending_tx, pending_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name(format!("echo-worker-{id}"))
            .spawn(move || {
                let (poll, waker) = match init_poller() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let waker = Arc::new(waker);
                if ready_tx.send(Ok(Arc::clone(&waker))).is_err() {
                    return;
                }

                if let Err(e) = event_loop(id, poll, pending_rx, loop_stop) {
                    error!(worker = id, error = %e, "worker event loop failed");
                }
            })?;

        let waker = ready_rx.recv().map_err(|_| {
            io::Error::new(
                io::ErrorKind::Other,
                "worker thread exited before signalling readiness",
            )
        })??;

        Ok(Self {
            id,
            pending: pending_tx,
            waker,
            stop,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Hand a freshly accepted connection to this worker. Ownership moves
    /// to the worker thread; the caller never touches the connection
    /// again. Never blocks.
    pub fn submit(&self, conn: EchoConn) {
        if self.pending.send(conn).is_err() {
            error!(worker = self.id, "worker is gone, dropping connection");
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!(worker = self.id, error = %e, "failed to wake worker");
        }
    }

    /// Ask the event loop to exit. The loop observes the flag on its next
    /// iteration, closes every connection it still owns, and returns.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }

    /// Reap the worker thread. Idempotent.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = self.id, "worker thread panicked");
            }
        }
    }
}

fn init_poller() -> io::Result<(Poll, Waker)> {
    let poll = Poll::new()?;
    let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
    Ok((poll, waker))
}

fn event_loop(
    worker_id: usize,
    mut poll: Poll,
    pending: Receiver<EchoConn>,
    stop: Arc<AtomicBool>,
) -> io::Result<()> {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);
    let mut conns: Slab<EchoConn> = Slab::new();

    loop {
        register_pending(worker_id, &poll, &mut conns, &pending);
        if stop.load(Ordering::Acquire) {
            break;
        }

        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                // Registrations and the stop flag are picked up at the
                // top of the loop.
                WAKE_TOKEN => {}
                Token(conn_id) => {
                    if !conns.contains(conn_id) {
                        continue;
                    }
                    if let Err(e) = dispatch(conn_id, event, &poll, &mut conns) {
                        debug!(worker = worker_id, conn_id, error = %e, "closing connection");
                        close_connection(&poll, &mut conns, conn_id);
                    }
                }
            }
        }
    }

    // Abrupt teardown of everything this worker still owns.
    let live: Vec<usize> = conns.iter().map(|(id, _)| id).collect();
    for conn_id in live {
        close_connection(&poll, &mut conns, conn_id);
    }
    debug!(worker = worker_id, "worker stopped");
    Ok(())
}

/// Register every pending handoff so it is in the poller's set before the
/// next `poll` call blocks. A registration failure drops that connection
/// only.
fn register_pending(
    worker_id: usize,
    poll: &Poll,
    conns: &mut Slab<EchoConn>,
    pending: &Receiver<EchoConn>,
) {
    for mut conn in pending.try_iter() {
        let entry = conns.vacant_entry();
        let token = Token(entry.key());
        match poll
            .registry()
            .register(conn.stream_mut(), token, Interest::READABLE)
        {
            Ok(()) => {
                trace!(worker = worker_id, conn_id = token.0, "connection registered");
                entry.insert(conn);
            }
            Err(e) => {
                warn!(worker = worker_id, error = %e, "failed to register connection, dropping");
            }
        }
    }
}

fn dispatch(
    conn_id: usize,
    event: &mio::event::Event,
    poll: &Poll,
    conns: &mut Slab<EchoConn>,
) -> io::Result<()> {
    if event.is_readable() {
        let conn = &mut conns[conn_id];
        if let Some(interest) = conn.on_readable()? {
            poll.registry()
                .reregister(conn.stream_mut(), Token(conn_id), interest)?;
        }
    }

    if event.is_writable() {
        let conn = &mut conns[conn_id];
        if let Some(interest) = conn.on_writable()? {
            poll.registry()
                .reregister(conn.stream_mut(), Token(conn_id), interest)?;
        }
    }

    Ok(())
}

fn close_connection(poll: &Poll, conns: &mut Slab<EchoConn>, conn_id: usize) {
    if let Some(mut conn) = conns.try_remove(conn_id) {
        let _ = poll.registry().deregister(conn.stream_mut());
        debug!(conn_id, "connection closed");
    }
}
