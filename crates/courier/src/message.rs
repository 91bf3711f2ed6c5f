//! In-flight messages: the slot table that doubles as the wire id space,
//! the recycle pool, and the owned views handed to application callbacks.

use mio::Token;

use crate::client::Client;
use crate::error::Error;

/// Slot index in the client's message table; also the message's wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub(crate) u16);

impl MessageId {
    pub fn as_u32(self) -> u32 {
        u32::from(self.0)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Called when the correlated REPLY arrives.
pub type ReplyFn = Box<dyn FnOnce(&mut Client, Response)>;
/// Called when an outbound message is abandoned (connection lost before a
/// reply, or shutdown with the message still queued).
pub type FailFn = Box<dyn FnOnce(&mut Client, MessageId)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MsgState {
    New,
    Delivering,
    Delivered,
    Replied,
}

pub(crate) struct Message {
    pub id: MessageId,
    /// The peer's wire id; set only for inbound requests.
    pub src_id: Option<u32>,
    /// Owning connection; set only for inbound requests.
    pub conn: Option<Token>,
    /// Target queue; set only for outbound messages.
    pub queue: Option<String>,
    pub state: MsgState,
    pub broadcast: bool,
    pub noreply: bool,
    pub timeout: Option<u32>,
    pub data: Option<Vec<u8>>,
    pub on_reply: Option<ReplyFn>,
    pub on_fail: Option<FailFn>,
}

impl Message {
    fn blank() -> Self {
        Self {
            id: MessageId(0),
            src_id: None,
            conn: None,
            queue: None,
            state: MsgState::New,
            broadcast: false,
            noreply: false,
            timeout: None,
            data: None,
            on_reply: None,
            on_fail: None,
        }
    }

    fn reset(&mut self, id: MessageId) {
        self.id = id;
        self.src_id = None;
        self.conn = None;
        self.queue = None;
        self.state = MsgState::New;
        self.broadcast = false;
        self.noreply = false;
        self.timeout = None;
        self.data = None;
        self.on_reply = None;
        self.on_fail = None;
    }
}

/// Dense slot table of in-flight messages. A released slot leaves a hint
/// behind for O(1) reuse; otherwise a linear scan finds a hole, and a full
/// table grows by one. Records go through the pool instead of the
/// allocator until teardown.
pub(crate) struct MessageTable {
    slots: Vec<Option<Message>>,
    used: usize,
    next_free: Option<usize>,
    pool: Vec<Message>,
}

impl MessageTable {
    pub fn new() -> Self {
        Self { slots: Vec::new(), used: 0, next_free: None, pool: Vec::new() }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Allocate a fresh message in the lowest available slot.
    pub fn alloc(&mut self) -> Result<&mut Message, Error> {
        let slot = if self.used < self.slots.len() {
            let hint = self.next_free.take().filter(|&i| self.slots[i].is_none());
            match hint.or_else(|| self.slots.iter().position(Option::is_none)) {
                Some(i) => i,
                None => self.grow()?,
            }
        } else {
            self.grow()?
        };
        let mut msg = self.pool.pop().unwrap_or_else(Message::blank);
        msg.reset(MessageId(slot as u16));
        self.used += 1;
        Ok(self.slots[slot].insert(msg))
    }

    fn grow(&mut self) -> Result<usize, Error> {
        // Wire ids are 16-bit, so the table caps at 65536 slots.
        if self.slots.len() > usize::from(u16::MAX) {
            return Err(Error::TableFull);
        }
        self.slots.push(None);
        Ok(self.slots.len() - 1)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.slots.get(usize::from(id.0))?.as_ref()
    }

    pub fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.slots.get_mut(usize::from(id.0))?.as_mut()
    }

    /// Release the slot, leaving the reuse hint behind.
    pub fn take(&mut self, id: MessageId) -> Option<Message> {
        let msg = self.slots.get_mut(usize::from(id.0))?.take()?;
        self.used -= 1;
        self.next_free = Some(usize::from(id.0));
        Some(msg)
    }

    /// Return a released record to the pool.
    pub fn recycle(&mut self, mut msg: Message) {
        msg.reset(MessageId(0));
        self.pool.push(msg);
    }

    /// Snapshot of live ids; safe to iterate while slots change.
    pub fn ids(&self) -> Vec<MessageId> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|m| m.id))
            .collect()
    }

    pub fn reset(&mut self) {
        self.slots.clear();
        self.pool.clear();
        self.used = 0;
        self.next_free = None;
    }
}

/// An outbound message under construction. `queue` and `payload` are
/// mandatory; everything else defaults off.
pub struct Outbound {
    pub(crate) queue: String,
    pub(crate) payload: Vec<u8>,
    pub(crate) broadcast: bool,
    pub(crate) noreply: bool,
    pub(crate) timeout: Option<u32>,
    pub(crate) on_reply: Option<ReplyFn>,
    pub(crate) on_fail: Option<FailFn>,
}

impl Outbound {
    pub fn new(queue: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            queue: queue.into(),
            payload: payload.into(),
            broadcast: false,
            noreply: false,
            timeout: None,
            on_reply: None,
            on_fail: None,
        }
    }

    /// Fan the request out to every consumer of the queue.
    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Fire and forget: no reply path; released once delivery is confirmed.
    pub fn noreply(mut self) -> Self {
        self.noreply = true;
        self
    }

    /// Advisory processing deadline, enforced by the controller.
    pub fn timeout(mut self, seconds: u32) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn on_reply(mut self, f: impl FnOnce(&mut Client, Response) + 'static) -> Self {
        self.on_reply = Some(Box::new(f));
        self
    }

    pub fn on_fail(mut self, f: impl FnOnce(&mut Client, MessageId) + 'static) -> Self {
        self.on_fail = Some(Box::new(f));
        self
    }
}

/// An inbound request handed to a queue's `on_request` handler. Owns the
/// payload; keep what you need before returning, or answer later through
/// [`Client::reply`] with [`Delivery::id`].
pub struct Delivery {
    pub(crate) id: MessageId,
    pub(crate) queue: String,
    pub(crate) payload: Vec<u8>,
    pub(crate) noreply: bool,
    pub(crate) timeout: Option<u32>,
}

impl Delivery {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// The sender does not want an answer; `reply` would be an error.
    pub fn noreply(&self) -> bool {
        self.noreply
    }

    pub fn timeout(&self) -> Option<u32> {
        self.timeout
    }
}

/// The answer to a request this client sent.
pub struct Response {
    pub(crate) id: MessageId,
    pub(crate) payload: Vec<u8>,
}

impl Response {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
