//! One controller link: a socket, its readiness registrations and the
//! buffers around it.
//!
//! Exactly one of three shapes holds at any time, encoded in [`Phase`]:
//! no socket; a socket with a connect registration; or an active socket
//! with a read registration and an optional write registration. WRITABLE
//! interest is armed iff `outbuf` is non-empty.
//!
//! Outbound:
//!   - [`Connection::enqueue_frame`] assembles one frame in `sendbuf`,
//!     appends it to `outbuf` and arms WRITABLE. Nothing else schedules
//!     bytes.
//!   - [`Connection::flush_outbuf`] writes as much as the kernel takes,
//!     keeps the rest, and drops WRITABLE interest once drained.
//!
//! Inbound:
//!   - [`Connection::fill_readbuf`] drains the socket until `WouldBlock`,
//!     growing the scratch buffer whenever a read fills it exactly.
//!   - The owner moves `inbuf` (the undecoded tail of the previous burst)
//!     plus the fresh bytes out with [`Connection::take_input`], decodes,
//!     and parks the remainder with [`Connection::store_tail`].

use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use tracing::{debug, warn};

use crate::record::Record;
use crate::soft_panic;

/// Default read scratch size; also the growth step.
pub(crate) const READ_CHUNK: usize = 4 * 1024;

/// Whether the peer is still there after an I/O pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkState {
    Alive,
    Lost,
}

pub(crate) enum Phase {
    /// No socket.
    Idle,
    /// Non-blocking connect in flight; WRITABLE signals the outcome.
    Connecting { stream: TcpStream },
    /// Handshake complete; READABLE registered.
    Active {
        stream: TcpStream,
        /// Read scratch, decoded after every readiness burst.
        readbuf: Vec<u8>,
        /// Tail of a frame the decoder could not finish.
        inbuf: BytesMut,
        /// Assembly scratch for a single outbound frame.
        sendbuf: BytesMut,
        /// Accumulator for the record currently on the wire.
        record: Record,
        /// WRITABLE interest armed.
        writable: bool,
        /// CLOSING seen or sent; this link takes no new work.
        closing: bool,
    },
}

pub(crate) struct Connection {
    pub host: String,
    pub addr: SocketAddr,
    pub token: Token,
    pub phase: Phase,
    /// Bytes accepted for sending and not yet written to the kernel.
    pub outbuf: BytesMut,
    /// Library-initiated teardown; never cleared once set.
    pub shutdown: bool,
    read_chunk: usize,
}

impl Connection {
    pub fn new(host: String, addr: SocketAddr, token: Token, read_chunk: usize) -> Self {
        Self {
            host,
            addr,
            token,
            phase: Phase::Idle,
            outbuf: BytesMut::new(),
            shutdown: false,
            read_chunk,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.phase, Phase::Connecting { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active { .. })
    }

    pub fn is_closing(&self) -> bool {
        matches!(self.phase, Phase::Active { closing: true, .. })
    }

    pub fn set_closing(&mut self) {
        if let Phase::Active { closing, .. } = &mut self.phase {
            *closing = true;
        }
    }

    pub fn record(&self) -> Option<&Record> {
        match &self.phase {
            Phase::Active { record, .. } => Some(record),
            _ => None,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut Record> {
        match &mut self.phase {
            Phase::Active { record, .. } => Some(record),
            _ => None,
        }
    }

    /// Start a non-blocking connect and register for its completion.
    pub fn connect(&mut self, registry: &Registry) -> io::Result<()> {
        debug_assert!(self.is_idle() && !self.shutdown);
        let mut stream = TcpStream::connect(self.addr)?;
        registry.register(&mut stream, self.token, Interest::WRITABLE)?;
        debug!(host = %self.host, "connect started");
        self.phase = Phase::Connecting { stream };
        Ok(())
    }

    /// Readiness fired while connecting. `Ok(true)` means the link is now
    /// active; `Ok(false)` means the connect is still in flight; `Err`
    /// means it failed and the caller runs the closed path.
    pub fn finish_connect(&mut self, registry: &Registry) -> io::Result<bool> {
        {
            let Phase::Connecting { stream } = &mut self.phase else {
                return Ok(false);
            };
            if let Some(err) = stream.take_error()? {
                return Err(err);
            }
            match stream.peer_addr() {
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return Ok(false),
                Err(e) => return Err(e),
                Ok(_) => {}
            }
        }
        let Phase::Connecting { mut stream } = mem::replace(&mut self.phase, Phase::Idle) else {
            unreachable!()
        };
        let writable = !self.outbuf.is_empty();
        let interest = if writable {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        registry.reregister(&mut stream, self.token, interest)?;
        debug!(host = %self.host, "connected");
        self.phase = Phase::Active {
            stream,
            readbuf: vec![0; self.read_chunk],
            inbuf: BytesMut::new(),
            sendbuf: BytesMut::new(),
            record: Record::default(),
            writable,
            closing: false,
        };
        Ok(true)
    }

    /// Drain the socket until it would block. Returns how many bytes now
    /// sit at the front of the read scratch, and whether the peer is gone
    /// (orderly close or hard error). Bytes read before the close are
    /// still reported and must be decoded.
    pub fn fill_readbuf(&mut self) -> (usize, LinkState) {
        let Phase::Active { stream, readbuf, .. } = &mut self.phase else {
            return (0, LinkState::Alive);
        };
        let mut filled = 0;
        loop {
            if filled == readbuf.len() {
                // an exactly-full scratch means the kernel may have more
                readbuf.resize(filled + self.read_chunk, 0);
            }
            match stream.read(&mut readbuf[filled..]) {
                Ok(0) => {
                    debug!(host = %self.host, "peer closed");
                    return (filled, LinkState::Lost);
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(%err, host = %self.host, "read failed");
                    return (filled, LinkState::Lost);
                }
            }
        }
        (filled, LinkState::Alive)
    }

    /// Move the undecoded tail plus `n` fresh scratch bytes into one owned
    /// buffer for the decoder.
    pub fn take_input(&mut self, n: usize) -> BytesMut {
        let Phase::Active { readbuf, inbuf, .. } = &mut self.phase else {
            return BytesMut::new();
        };
        let mut work = mem::take(inbuf);
        work.extend_from_slice(&readbuf[..n]);
        work
    }

    /// Park what the decoder could not consume until more bytes arrive.
    pub fn store_tail(&mut self, tail: BytesMut) {
        if let Phase::Active { inbuf, .. } = &mut self.phase {
            *inbuf = tail;
        }
    }

    /// Write as much of `outbuf` as the kernel accepts; drop WRITABLE
    /// interest once the buffer is empty.
    pub fn flush_outbuf(&mut self, registry: &Registry) -> LinkState {
        let Phase::Active { stream, writable, .. } = &mut self.phase else {
            return LinkState::Alive;
        };
        while !self.outbuf.is_empty() {
            match stream.write(&self.outbuf) {
                Ok(0) => {
                    debug!(host = %self.host, "write returned zero");
                    return LinkState::Lost;
                }
                Ok(n) => self.outbuf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(%err, host = %self.host, "write failed");
                    return LinkState::Lost;
                }
            }
        }
        if self.outbuf.is_empty() && *writable {
            if let Err(err) = registry.reregister(stream, self.token, Interest::READABLE) {
                debug!(%err, host = %self.host, "drop writable interest");
                return LinkState::Lost;
            }
            *writable = false;
        }
        LinkState::Alive
    }

    /// The only path that schedules outbound bytes: assemble one frame in
    /// `sendbuf`, hand it to `outbuf`, arm WRITABLE if it was not.
    pub fn enqueue_frame(&mut self, registry: &Registry, build: impl FnOnce(&mut BytesMut)) {
        let Phase::Active { stream, sendbuf, writable, .. } = &mut self.phase else {
            soft_panic!("frame queued on an inactive link");
            return;
        };
        sendbuf.clear();
        build(&mut *sendbuf);
        self.outbuf.extend_from_slice(sendbuf);
        if !*writable && !self.outbuf.is_empty() {
            if let Err(err) =
                registry.reregister(stream, self.token, Interest::READABLE | Interest::WRITABLE)
            {
                // the registration is gone with the socket; the next poll
                // surfaces the socket error and the link is torn down
                warn!(%err, host = %self.host, "arm writable interest");
                return;
            }
            *writable = true;
        }
    }

    /// Tear the socket down, if any, and return to idle. The out-buffer
    /// is discarded: unsent requests live in the owner's pending queue and
    /// are re-emitted whole on the next link.
    pub fn close(&mut self, registry: &Registry) {
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::Connecting { mut stream } | Phase::Active { mut stream, .. } => {
                let _ = registry.deregister(&mut stream);
                let _ = stream.shutdown(Shutdown::Both);
                debug!(host = %self.host, "link closed");
            }
        }
        self.outbuf.clear();
    }
}
