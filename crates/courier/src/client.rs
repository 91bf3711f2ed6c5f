//! The client facade: controller pool, command dispatch, failover and the
//! reactor loop.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use bytes::Buf;
use mio::event::Event;
use mio::{Events, Poll, Token};
use risp::Arg;
use tracing::{debug, error, warn};

use crate::addr::parse_host;
use crate::connection::{Connection, LinkState, READ_CHUNK};
use crate::error::Error;
use crate::message::{Delivery, MessageId, MessageTable, MsgState, Outbound, Response};
use crate::record::{Fields, Record};
use crate::subscription::{Consumer, Subscription};
use crate::wire::{self, Command, ProtocolError};
use crate::{soft_assert, soft_panic};

/// Port used when a controller host string leaves it out.
pub const DEFAULT_PORT: u16 = 13700;

const EVENTS_CAPACITY: usize = 128;
const DEFAULT_RECONNECT: Duration = Duration::from_secs(2);

/// A producer/consumer endpoint of a RISP-framed message queue.
///
/// The client keeps an ordered pool of controllers and one live
/// connection: the head of the pool. A failed or closed link moves to the
/// tail and the new head is dialed. Requests issued while no link is live
/// wait in a pending queue and go out right after the consume
/// announcements on the next connect.
///
/// All I/O is non-blocking and single-threaded. Nothing happens between
/// calls to [`Client::poll`]; every callback fires on the thread inside
/// it. Handlers may call [`Client::send`], [`Client::reply`] and
/// [`Client::consume`], but must not call [`Client::shutdown`] or
/// [`Client::cleanup`].
pub struct Client {
    poll: Poll,
    /// Taken out for the duration of each poll pass.
    events: Option<Events>,
    conns: Vec<Connection>,
    subs: Vec<Subscription>,
    msgs: MessageTable,
    /// Outbound messages waiting for a live controller, oldest first.
    pending: VecDeque<MessageId>,
    shutdown: bool,
    next_token: usize,
    default_port: u16,
    read_chunk: usize,
    reconnect_every: Duration,
    last_attempt: Option<Instant>,
}

impl Client {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Some(Events::with_capacity(EVENTS_CAPACITY)),
            conns: Vec::new(),
            subs: Vec::new(),
            msgs: MessageTable::new(),
            pending: VecDeque::new(),
            shutdown: false,
            next_token: 0,
            default_port: DEFAULT_PORT,
            read_chunk: READ_CHUNK,
            reconnect_every: DEFAULT_RECONNECT,
            last_attempt: None,
        })
    }

    /// How long to wait before redialing an idle head connection after a
    /// connect could not even be started.
    pub fn with_reconnect_interval(mut self, every: Duration) -> Self {
        self.reconnect_every = every;
        self
    }

    /// Port applied to controller host strings without one.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Read scratch size and growth step.
    pub fn with_read_chunk(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "read chunk must be non-zero");
        self.read_chunk = bytes;
        self
    }

    /// Append a controller to the pool; the first one is dialed at once.
    pub fn add_controller(&mut self, host: &str) -> Result<(), Error> {
        if self.shutdown {
            return Err(Error::ShuttingDown);
        }
        let mut addr = parse_host(host)?;
        if addr.port() == 0 {
            addr.set_port(self.default_port);
        }
        let token = Token(self.next_token);
        self.next_token += 1;
        self.conns
            .push(Connection::new(host.to_string(), addr, token, self.read_chunk));
        if self.conns.len() == 1 {
            self.connect_head();
        }
        Ok(())
    }

    /// Declare a queue to consume. Consuming the same queue twice is a
    /// no-op. If a controller is live the consume goes out immediately;
    /// either way it is re-announced after every reconnect.
    pub fn consume(&mut self, consumer: Consumer) -> Result<(), Error> {
        if self.shutdown {
            return Err(Error::ShuttingDown);
        }
        let len = consumer.queue.len();
        if len == 0 || len > 255 {
            return Err(Error::QueueName(len));
        }
        if self.subs.iter().any(|s| s.queue == consumer.queue) {
            debug!(queue = %consumer.queue, "already consuming");
            return Ok(());
        }
        self.subs.push(consumer.into());
        if let Some(idx) = self.live_head() {
            self.emit_consume(idx, self.subs.len() - 1);
        }
        Ok(())
    }

    /// Hand a message to the head controller, or queue it until one is
    /// live. The returned id correlates the eventual reply.
    pub fn send(&mut self, out: Outbound) -> Result<MessageId, Error> {
        if self.shutdown {
            return Err(Error::ShuttingDown);
        }
        if out.queue.is_empty() || out.queue.len() > 255 {
            return Err(Error::QueueName(out.queue.len()));
        }
        if out.payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let msg = self.msgs.alloc()?;
        let id = msg.id;
        msg.queue = Some(out.queue);
        msg.data = Some(out.payload);
        msg.broadcast = out.broadcast;
        msg.noreply = out.noreply;
        msg.timeout = out.timeout;
        msg.on_reply = out.on_reply;
        msg.on_fail = out.on_fail;
        match self.live_head() {
            Some(idx) => self.emit_request(idx, id),
            None => {
                debug!(%id, "no live controller; request queued");
                self.pending.push_back(id);
            }
        }
        Ok(id)
    }

    /// Answer an inbound request, inline from its handler or later with
    /// the id kept from [`Delivery::id`].
    pub fn reply(&mut self, id: MessageId, payload: &[u8]) -> Result<(), Error> {
        let (conn, src_id, noreply, state) = {
            let m = self.msgs.get(id).ok_or(Error::UnknownMessage(id))?;
            (m.conn, m.src_id, m.noreply, m.state)
        };
        let Some(token) = conn else {
            return Err(Error::NotInbound(id));
        };
        if noreply {
            return Err(Error::NoReplyExpected(id));
        }
        let src_id = src_id.unwrap_or_default();
        match state {
            // inside the handler: the request path releases the slot
            MsgState::Delivering => {
                self.emit_reply(token, src_id, payload);
                if let Some(m) = self.msgs.get_mut(id) {
                    m.state = MsgState::Replied;
                }
                Ok(())
            }
            MsgState::Delivered => {
                self.emit_reply(token, src_id, payload);
                if let Some(m) = self.msgs.take(id) {
                    self.msgs.recycle(m);
                }
                self.maybe_finish_shutdown();
                Ok(())
            }
            MsgState::Replied => Err(Error::AlreadyReplied(id)),
            MsgState::New => Err(Error::NotInbound(id)),
        }
    }

    /// Begin teardown: fail what can no longer be sent, announce CLOSING
    /// on the live link, and close it once nothing is outstanding and the
    /// farewell has drained. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        self.shutdown = true;
        for c in &mut self.conns {
            c.shutdown = true;
        }
        // requests that never reached a controller cannot go out anymore
        while let Some(id) = self.pending.pop_front() {
            self.fail_message(id);
        }
        if let Some(idx) = self.conns.iter().position(Connection::is_connecting) {
            self.drop_connection(idx);
        }
        if let Some(idx) = self.conns.iter().position(Connection::is_active) {
            if !self.conns[idx].is_closing() {
                self.conns[idx]
                    .enqueue_frame(self.poll.registry(), wire::put_closing);
                self.conns[idx].set_closing();
            }
        }
        self.maybe_finish_shutdown();
    }

    /// Final teardown after a completed shutdown: every container ends up
    /// empty.
    pub fn cleanup(&mut self) {
        soft_assert!(self.shutdown, "cleanup before shutdown");
        soft_assert!(
            self.msgs.used() == 0,
            "cleanup with {} messages in flight",
            self.msgs.used()
        );
        for idx in 0..self.conns.len() {
            self.conns[idx].close(self.poll.registry());
        }
        self.conns.clear();
        self.subs.clear();
        self.pending.clear();
        self.msgs.reset();
    }

    /// Drive the reactor once: redial if due, wait for readiness up to
    /// `timeout`, dispatch. Returns whether any event fired.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        self.maybe_reconnect();
        let mut events = self
            .events
            .take()
            .unwrap_or_else(|| Events::with_capacity(EVENTS_CAPACITY));
        match self.poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                self.events = Some(events);
                return Err(e);
            }
        }
        let mut any = false;
        for ev in events.iter() {
            any = true;
            self.dispatch_event(ev);
        }
        self.events = Some(events);
        Ok(any)
    }

    /// Messages in flight, inbound and outbound together.
    pub fn in_flight(&self) -> usize {
        self.msgs.used()
    }

    pub fn is_connected(&self) -> bool {
        self.conns.iter().any(Connection::is_active)
    }

    /// Controller host strings in pool order; the head comes first.
    pub fn controllers(&self) -> impl Iterator<Item = &str> {
        self.conns.iter().map(|c| c.host.as_str())
    }

    /// Server-assigned id of a consumed queue, once CONSUMING arrived.
    pub fn queue_id(&self, queue: &str) -> Option<u32> {
        self.subs.iter().find(|s| s.queue == queue).and_then(|s| s.qid)
    }

    pub fn shutdown_complete(&self) -> bool {
        self.shutdown && self.msgs.used() == 0 && self.conns.iter().all(Connection::is_idle)
    }

    // ---- reactor plumbing ----------------------------------------------

    fn dispatch_event(&mut self, ev: &Event) {
        let token = ev.token();
        let Some(idx) = self.conns.iter().position(|c| c.token == token) else {
            debug!(?token, "event for a token with no connection");
            return;
        };
        if self.conns[idx].is_connecting() {
            self.on_connect_ready(idx);
            return;
        }
        if !self.conns[idx].is_active() {
            // stale readiness after a close in this same pass
            return;
        }
        if (ev.is_readable() || ev.is_error() || ev.is_read_closed())
            && self.on_readable(idx) == LinkState::Lost
        {
            self.drop_connection(idx);
            return;
        }
        if ev.is_writable() {
            if self.conns[idx].flush_outbuf(self.poll.registry()) == LinkState::Lost {
                self.drop_connection(idx);
                return;
            }
            if self.shutdown {
                self.maybe_finish_shutdown();
            }
        }
    }

    fn on_connect_ready(&mut self, idx: usize) {
        match self.conns[idx].finish_connect(self.poll.registry()) {
            Ok(true) => self.after_connect(idx),
            Ok(false) => {}
            Err(err) => {
                warn!(%err, host = %self.conns[idx].host, "connect failed");
                self.drop_connection(idx);
            }
        }
    }

    /// The link just became active: re-announce every consumed queue, then
    /// flush the requests that were waiting for a controller.
    fn after_connect(&mut self, idx: usize) {
        for s in 0..self.subs.len() {
            self.emit_consume(idx, s);
        }
        while let Some(id) = self.pending.pop_front() {
            self.emit_request(idx, id);
        }
        // some stacks hand bytes over together with connect completion
        if self.on_readable(idx) == LinkState::Lost {
            self.drop_connection(idx);
        }
    }

    /// Drain the socket and feed everything through the decoder. `Lost`
    /// covers transport trouble and protocol violations alike; the caller
    /// runs the closed path.
    fn on_readable(&mut self, idx: usize) -> LinkState {
        let (n, state) = self.conns[idx].fill_readbuf();
        if n > 0 {
            let mut work = self.conns[idx].take_input(n);
            let mut consumed = 0;
            let failure = loop {
                match risp::next(&work[consumed..]) {
                    Ok(Some((cmd, arg, used))) => {
                        let res = self.on_command(idx, cmd, arg);
                        consumed += used;
                        if let Err(e) = res {
                            break Some(e);
                        }
                    }
                    Ok(None) => break None,
                    Err(e) => break Some(ProtocolError::Risp(e)),
                }
            };
            if let Some(err) = failure {
                error!(%err, host = %self.conns[idx].host, "protocol error");
                return LinkState::Lost;
            }
            work.advance(consumed);
            self.conns[idx].store_tail(work);
        }
        state
    }

    /// One decoded command: field setters land in the connection's current
    /// record, terminals consume it.
    fn on_command(&mut self, idx: usize, raw: u8, arg: Arg<'_>) -> Result<(), ProtocolError> {
        let cmd = Command::try_from(raw).map_err(|_| ProtocolError::UnknownCommand(raw))?;
        match (cmd, arg) {
            (Command::Nop, Arg::None) => Ok(()),
            (Command::Clear, Arg::None) => {
                if let Some(rec) = self.conns[idx].record_mut() {
                    rec.clear();
                }
                Ok(())
            }
            (Command::Ping, Arg::None) => {
                self.conns[idx].enqueue_frame(self.poll.registry(), wire::put_pong);
                Ok(())
            }
            (Command::Pong, Arg::None) => Ok(()),
            (Command::Noreply, Arg::None) => {
                if let Some(rec) = self.conns[idx].record_mut() {
                    rec.set_noreply();
                }
                Ok(())
            }
            (
                cmd @ (Command::Id | Command::QueueId | Command::Timeout | Command::Priority),
                Arg::Int(v),
            ) => match self.conns[idx].record_mut() {
                Some(rec) => rec.set_int(cmd, v),
                None => Ok(()),
            },
            (Command::Queue, Arg::Bytes(b)) => {
                if let Some(rec) = self.conns[idx].record_mut() {
                    rec.set_queue(b);
                }
                Ok(())
            }
            (Command::Payload, Arg::Bytes(b)) => match self.conns[idx].record_mut() {
                Some(rec) => rec.set_payload(b),
                None => Ok(()),
            },
            (Command::Consuming, Arg::None) => self.handle_consuming(idx),
            (Command::Request, Arg::None) => self.handle_request(idx),
            (Command::Reply, Arg::None) => self.handle_reply(idx),
            (Command::Delivered, Arg::None) => self.handle_delivered(idx),
            (Command::Undelivered, Arg::None) => self.handle_undelivered(idx),
            (Command::Closing, Arg::None) => {
                self.handle_closing(idx);
                Ok(())
            }
            (cmd, _) => Err(ProtocolError::Unexpected(cmd)),
        }
    }

    // ---- terminal handlers ---------------------------------------------

    /// CONSUMING: the controller accepted a consume and assigned the
    /// queue its id. Ignored for queues we do not consume.
    fn handle_consuming(&mut self, idx: usize) -> Result<(), ProtocolError> {
        let (qid, found) = {
            let rec = self.record(idx, Command::Consuming)?;
            rec.require(Command::Consuming, Fields::QUEUE_ID | Fields::QUEUE)?;
            let found = self
                .subs
                .iter()
                .position(|s| s.queue.as_bytes() == &rec.queue[..]);
            (rec.qid, found)
        };
        let Some(s) = found else {
            debug!("CONSUMING for a queue we do not consume");
            return Ok(());
        };
        self.subs[s].qid = Some(qid);
        debug!(queue = %self.subs[s].queue, qid, "consume accepted");
        if let Some(mut f) = self.subs[s].on_accepted.take() {
            let name = self.subs[s].queue.clone();
            f(self, &name, qid);
            self.subs[s].on_accepted = Some(f);
        }
        Ok(())
    }

    /// REQUEST: a delivery for a queue we consume. Ack it, move the
    /// payload into a table slot, run the handler, then either release the
    /// slot (NOREPLY, or the handler replied inline) or park it until
    /// [`Client::reply`].
    fn handle_request(&mut self, idx: usize) -> Result<(), ProtocolError> {
        let token = self.conns[idx].token;
        let (src_id, noreply, timeout, found) = {
            let rec = self.record(idx, Command::Request)?;
            rec.require(Command::Request, Fields::ID | Fields::PAYLOAD)?;
            if !rec.fields.intersects(Fields::QUEUE_ID | Fields::QUEUE) {
                return Err(ProtocolError::MissingField {
                    terminal: Command::Request,
                    missing: Command::Queue,
                });
            }
            let by_qid = rec
                .fields
                .contains(Fields::QUEUE_ID)
                .then(|| self.subs.iter().position(|s| s.qid == Some(rec.qid)))
                .flatten();
            let found = by_qid.or_else(|| {
                rec.fields
                    .contains(Fields::QUEUE)
                    .then(|| {
                        self.subs
                            .iter()
                            .position(|s| s.queue.as_bytes() == &rec.queue[..])
                    })
                    .flatten()
            });
            let timeout = rec.fields.contains(Fields::TIMEOUT).then_some(rec.timeout);
            (rec.id, rec.noreply(), timeout, found)
        };

        let Some(s) = found else {
            debug!(src_id, "request for an unconsumed queue");
            self.conns[idx]
                .enqueue_frame(self.poll.registry(), |buf| wire::put_undelivered(buf, src_id));
            return Ok(());
        };

        let id = match self.msgs.alloc() {
            Ok(msg) => {
                msg.src_id = Some(src_id);
                msg.conn = Some(token);
                msg.state = MsgState::Delivering;
                msg.noreply = noreply;
                msg.timeout = timeout;
                msg.id
            }
            Err(err) => {
                warn!(%err, src_id, "inbound request refused");
                self.conns[idx]
                    .enqueue_frame(self.poll.registry(), |buf| wire::put_undelivered(buf, src_id));
                return Ok(());
            }
        };
        self.conns[idx]
            .enqueue_frame(self.poll.registry(), |buf| wire::put_delivered(buf, src_id));

        let payload = self.conns[idx]
            .record_mut()
            .and_then(Record::take_payload)
            .unwrap_or_default();
        let delivery = Delivery {
            id,
            queue: self.subs[s].queue.clone(),
            payload,
            noreply,
            timeout,
        };

        let Some(mut handler) = self.subs[s].on_request.take() else {
            soft_panic!("subscription without a request handler");
            if let Some(m) = self.msgs.take(id) {
                self.msgs.recycle(m);
            }
            return Ok(());
        };
        handler(self, delivery);
        self.subs[s].on_request = Some(handler);

        let release = self
            .msgs
            .get(id)
            .is_some_and(|m| m.noreply || m.state == MsgState::Replied);
        if release {
            if let Some(m) = self.msgs.take(id) {
                self.msgs.recycle(m);
            }
            self.maybe_finish_shutdown();
        } else if let Some(m) = self.msgs.get_mut(id) {
            m.state = MsgState::Delivered;
        }
        Ok(())
    }

    /// REPLY: the answer to a request we sent. Releases the slot and hands
    /// the payload to the per-send handler.
    fn handle_reply(&mut self, idx: usize) -> Result<(), ProtocolError> {
        let raw_id = {
            let rec = self.record(idx, Command::Reply)?;
            rec.require(Command::Reply, Fields::ID | Fields::PAYLOAD)?;
            rec.id
        };
        let id = MessageId(raw_id as u16);
        let valid = self.msgs.get(id).is_some_and(|m| {
            m.conn.is_none() && m.src_id.is_none() && m.state == MsgState::Delivered
        });
        if !valid {
            return Err(ProtocolError::BadCorrelation { terminal: Command::Reply, id: raw_id });
        }
        let payload = self.conns[idx]
            .record_mut()
            .and_then(Record::take_payload)
            .unwrap_or_default();
        let Some(mut msg) = self.msgs.take(id) else {
            return Ok(());
        };
        let cb = msg.on_reply.take();
        self.msgs.recycle(msg);
        self.maybe_finish_shutdown();
        if let Some(f) = cb {
            f(self, Response { id, payload });
        }
        Ok(())
    }

    /// DELIVERED: the controller took responsibility for a request we
    /// sent. Fire-and-forget messages are done at this point.
    fn handle_delivered(&mut self, idx: usize) -> Result<(), ProtocolError> {
        let raw_id = {
            let rec = self.record(idx, Command::Delivered)?;
            rec.require(Command::Delivered, Fields::ID)?;
            rec.id
        };
        let id = MessageId(raw_id as u16);
        let valid = self
            .msgs
            .get(id)
            .is_some_and(|m| m.conn.is_none() && m.state == MsgState::New);
        if !valid {
            return Err(ProtocolError::BadCorrelation {
                terminal: Command::Delivered,
                id: raw_id,
            });
        }
        let noreply = self.msgs.get(id).is_some_and(|m| m.noreply);
        if noreply {
            if let Some(m) = self.msgs.take(id) {
                self.msgs.recycle(m);
            }
            self.maybe_finish_shutdown();
        } else if let Some(m) = self.msgs.get_mut(id) {
            m.state = MsgState::Delivered;
        }
        Ok(())
    }

    fn handle_undelivered(&mut self, idx: usize) -> Result<(), ProtocolError> {
        let rec = self.record(idx, Command::Undelivered)?;
        rec.require(Command::Undelivered, Fields::ID)?;
        Err(ProtocolError::Undeliverable(rec.id))
    }

    /// CLOSING: the controller is going away. The link stays up for
    /// in-flight replies but takes no new requests; rotation happens on
    /// the failure that follows.
    fn handle_closing(&mut self, idx: usize) {
        debug!(host = %self.conns[idx].host, "controller closing");
        self.conns[idx].set_closing();
        // a no-op while this link is still the active head
        self.connect_head();
    }

    fn record(&self, idx: usize, terminal: Command) -> Result<&Record, ProtocolError> {
        self.conns[idx]
            .record()
            .ok_or(ProtocolError::Unexpected(terminal))
    }

    // ---- emit helpers --------------------------------------------------

    fn emit_consume(&mut self, idx: usize, s: usize) {
        let sub = &self.subs[s];
        let (max, priority, exclusive) = (sub.max, sub.priority, sub.exclusive);
        let queue = sub.queue.clone();
        self.conns[idx].enqueue_frame(self.poll.registry(), |buf| {
            wire::put_consume(buf, queue.as_bytes(), max, priority, exclusive);
        });
    }

    fn emit_request(&mut self, idx: usize, id: MessageId) {
        let Some(msg) = self.msgs.get_mut(id) else {
            return;
        };
        let data = msg.data.take().unwrap_or_default();
        let queue = msg.queue.clone().unwrap_or_default();
        let (noreply, broadcast, timeout) = (msg.noreply, msg.broadcast, msg.timeout);
        let wire_id = id.as_u32();
        self.conns[idx].enqueue_frame(self.poll.registry(), |buf| {
            wire::put_request(buf, wire_id, queue.as_bytes(), &data, noreply, broadcast, timeout);
        });
        // the payload stays with the message until the reply settles it
        if let Some(msg) = self.msgs.get_mut(id) {
            msg.data = Some(data);
        }
    }

    fn emit_reply(&mut self, token: Token, src_id: u32, payload: &[u8]) {
        let Some(idx) = self.conns.iter().position(|c| c.token == token) else {
            soft_panic!("reply bound for a connection that is gone");
            return;
        };
        self.conns[idx].enqueue_frame(self.poll.registry(), |buf| {
            wire::put_reply(buf, src_id, payload);
        });
    }

    // ---- failover ------------------------------------------------------

    /// The closed path: tear the link down, fail what it carried, tell the
    /// subscriptions, rotate the pool, and dial the new head unless we are
    /// shutting down.
    fn drop_connection(&mut self, idx: usize) {
        let token = self.conns[idx].token;
        self.conns[idx].close(self.poll.registry());
        self.sweep_messages(token);
        self.drop_subscriptions();
        if self.conns.len() > 1 {
            let conn = self.conns.remove(idx);
            self.conns.push(conn);
        }
        if self.shutdown {
            self.maybe_finish_shutdown();
        } else {
            self.connect_head();
        }
    }

    /// Fail every message the dead link strands: inbound requests it
    /// owned, and outbound requests already emitted on it. Requests still
    /// waiting in the pending queue survive for the next controller.
    fn sweep_messages(&mut self, token: Token) {
        for id in self.msgs.ids() {
            let fail = self.msgs.get(id).is_some_and(|m| match m.conn {
                Some(t) => t == token,
                None => !self.pending.contains(&id),
            });
            if fail {
                self.fail_message(id);
            }
        }
        self.maybe_finish_shutdown();
    }

    fn fail_message(&mut self, id: MessageId) {
        let Some(mut msg) = self.msgs.take(id) else {
            return;
        };
        let cb = msg.on_fail.take();
        self.msgs.recycle(msg);
        if let Some(f) = cb {
            f(self, id);
        }
    }

    /// Server queue ids die with the connection that assigned them.
    fn drop_subscriptions(&mut self) {
        for s in 0..self.subs.len() {
            let Some(qid) = self.subs[s].qid.take() else {
                continue;
            };
            if let Some(mut f) = self.subs[s].on_dropped.take() {
                let name = self.subs[s].queue.clone();
                f(self, &name, qid);
                self.subs[s].on_dropped = Some(f);
            }
        }
    }

    fn live_head(&self) -> Option<usize> {
        let head = self.conns.first()?;
        (head.is_active() && !head.is_closing() && !head.shutdown).then_some(0)
    }

    fn connect_head(&mut self) {
        if self.shutdown {
            return;
        }
        let Some(head) = self.conns.first_mut() else {
            return;
        };
        if !head.is_idle() || head.shutdown {
            return;
        }
        self.last_attempt = Some(Instant::now());
        if let Err(err) = head.connect(self.poll.registry()) {
            warn!(%err, host = %head.host, "connect failed to start");
            // move the unreachable head out of the way; poll() dials the
            // next candidate on the reconnect interval
            if self.conns.len() > 1 {
                let conn = self.conns.remove(0);
                self.conns.push(conn);
            }
        }
    }

    fn maybe_reconnect(&mut self) {
        if self.shutdown {
            return;
        }
        let Some(head) = self.conns.first() else {
            return;
        };
        if !head.is_idle() {
            return;
        }
        if self
            .last_attempt
            .is_none_or(|t| t.elapsed() >= self.reconnect_every)
        {
            self.connect_head();
        }
    }

    /// During shutdown: once nothing is in flight, close the live link as
    /// soon as its CLOSING frame has drained.
    fn maybe_finish_shutdown(&mut self) {
        if !self.shutdown || self.msgs.used() != 0 {
            return;
        }
        if let Some(idx) = self.conns.iter().position(Connection::is_active) {
            if self.conns[idx].outbuf.is_empty() {
                self.drop_connection(idx);
            }
            // otherwise the write path re-checks once the farewell drains
        }
    }
}
