//! Per-connection echo state machine.
//!
//! Each connection owns one fixed-size scratch buffer and cycles between
//! two states: `Reading` (waiting for the next receive) and `Writing`
//! (flushing the tail of an echo that hit `WouldBlock`). Cycles are
//! strictly sequential: a receive's bytes are echoed back in full before
//! the next receive is attempted on that connection.
//!
//! mio delivers edge-triggered readiness, so a readable event runs
//! receive/echo cycles until the socket is drained; stopping after one
//! receive could strand buffered bytes with no further event.
//!
//! A connection is touched by exactly one worker thread after handoff,
//! so none of this state is synchronized.

use mio::net::TcpStream;
use mio::Interest;
use std::io::{self, Read, Write};
use tracing::debug;

/// Scratch buffer size; each receive reads at most this many bytes.
const SCRATCH_BUF_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy)]
enum ConnState {
    /// Waiting for the next receive.
    Reading,
    /// An echo hit `WouldBlock`; `written` of `total` scratch bytes are out.
    Writing { written: usize, total: usize },
}

/// One accepted connection and its echo state.
pub struct EchoConn {
    stream: TcpStream,
    buf: Box<[u8]>,
    state: ConnState,
}

impl EchoConn {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: vec![0u8; SCRATCH_BUF_SIZE].into_boxed_slice(),
            state: ConnState::Reading,
        }
    }

    /// Called once right after acceptance. The remote-address lookup is
    /// best-effort diagnostics; failure is logged and ignored.
    pub fn on_open(&self) {
        match self.stream.peer_addr() {
            Ok(peer) => debug!(%peer, "connection accepted"),
            Err(e) => debug!(error = %e, "unable to get remote address"),
        }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Handle read readiness.
    ///
    /// `Ok(Some(interest))` asks the owning worker to reregister the
    /// stream; `Ok(None)` leaves the registration alone. Any `Err` means
    /// the connection is done (peer EOF counts) and must be discarded.
    pub fn on_readable(&mut self) -> io::Result<Option<Interest>> {
        if let ConnState::Writing { .. } = self.state {
            // Still flushing a previous echo; the pending bytes go first.
            return Ok(None);
        }
        self.echo_cycles(false)
    }

    /// Handle write readiness: finish the parked echo, then go back to
    /// draining the socket (bytes may have queued up while parked).
    pub fn on_writable(&mut self) -> io::Result<Option<Interest>> {
        match self.state {
            ConnState::Writing { written, total } => {
                if !self.flush(written, total)? {
                    return Ok(None);
                }
                self.echo_cycles(true)
            }
            ConnState::Reading => Ok(None),
        }
    }

    /// Run receive/echo cycles until the socket has nothing left to read
    /// or an echo parks waiting for writability. `was_writing` is the
    /// interest the stream is currently registered with.
    fn echo_cycles(&mut self, was_writing: bool) -> io::Result<Option<Interest>> {
        loop {
            let n = match self.stream.read(&mut self.buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed connection",
                    ))
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(was_writing.then_some(Interest::READABLE))
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if !self.flush(0, n)? {
                // Parked mid-echo; no receive happens until it drains.
                return Ok((!was_writing).then_some(Interest::WRITABLE));
            }
        }
    }

    /// Send `buf[written..total]`, looping until everything is out or the
    /// socket would block. `Ok(true)` means fully flushed; `Ok(false)`
    /// means the tail is parked in `Writing` state. A
    /// partial-send-then-error tears the connection down like any other
    /// send error.
    fn flush(&mut self, mut written: usize, total: usize) -> io::Result<bool> {
        while written < total {
            match self.stream.write(&self.buf[written..total]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "send returned 0"))
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.state = ConnState::Writing { written, total };
                    return Ok(false);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.state = ConnState::Reading;
        Ok(true)
    }
}
