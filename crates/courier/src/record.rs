//! Per-connection parse accumulator: field commands land here until a
//! terminal command consumes the record. The peer must open every record
//! with CLEAR.

use bitflags::bitflags;

use crate::wire::{Command, ProtocolError};

bitflags! {
    /// Fields the current record has seen since the last CLEAR.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct Fields: u8 {
        const ID       = 1 << 0;
        const QUEUE_ID = 1 << 1;
        const TIMEOUT  = 1 << 2;
        const PRIORITY = 1 << 3;
        const QUEUE    = 1 << 4;
        const PAYLOAD  = 1 << 5;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct RecordFlags: u8 {
        const NOREPLY = 1 << 0;
    }
}

#[derive(Debug, Default)]
pub(crate) struct Record {
    pub fields: Fields,
    pub flags: RecordFlags,
    pub id: u32,
    pub qid: u32,
    pub timeout: u32,
    pub priority: u32,
    pub queue: Vec<u8>,
    /// Owned until a terminal moves it into a message.
    payload: Option<Vec<u8>>,
}

impl Record {
    /// CLEAR: reset everything but keep the heap blocks for reuse.
    pub fn clear(&mut self) {
        self.fields = Fields::empty();
        self.flags = RecordFlags::empty();
        self.id = 0;
        self.qid = 0;
        self.timeout = 0;
        self.priority = 0;
        self.queue.clear();
        if let Some(p) = &mut self.payload {
            p.clear();
        }
    }

    /// Store a numeric field. ID admits 0; the rest are `1..=0xffff`.
    pub fn set_int(&mut self, cmd: Command, value: u32) -> Result<(), ProtocolError> {
        let (bit, min) = match cmd {
            Command::Id => (Fields::ID, 0),
            Command::QueueId => (Fields::QUEUE_ID, 1),
            Command::Timeout => (Fields::TIMEOUT, 1),
            Command::Priority => (Fields::PRIORITY, 1),
            _ => return Err(ProtocolError::BadArgument(cmd)),
        };
        if value < min || value > 0xffff {
            return Err(ProtocolError::OutOfRange { cmd, value });
        }
        match cmd {
            Command::Id => self.id = value,
            Command::QueueId => self.qid = value,
            Command::Timeout => self.timeout = value,
            Command::Priority => self.priority = value,
            _ => unreachable!(),
        }
        self.fields |= bit;
        Ok(())
    }

    pub fn set_queue(&mut self, bytes: &[u8]) {
        self.queue.clear();
        self.queue.extend_from_slice(bytes);
        self.fields |= Fields::QUEUE;
    }

    /// At most one payload per record.
    pub fn set_payload(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.fields.contains(Fields::PAYLOAD) {
            return Err(ProtocolError::Duplicate(Command::Payload));
        }
        match &mut self.payload {
            Some(buf) => {
                buf.clear();
                buf.extend_from_slice(bytes);
            }
            None => self.payload = Some(bytes.to_vec()),
        }
        self.fields |= Fields::PAYLOAD;
        Ok(())
    }

    pub fn set_noreply(&mut self) {
        self.flags |= RecordFlags::NOREPLY;
    }

    pub fn noreply(&self) -> bool {
        self.flags.contains(RecordFlags::NOREPLY)
    }

    /// Move the payload out; the field bit stays set until the next CLEAR.
    pub fn take_payload(&mut self) -> Option<Vec<u8>> {
        self.payload.take()
    }

    /// Check the fields a terminal requires, naming the first one missing.
    pub fn require(&self, terminal: Command, needed: Fields) -> Result<(), ProtocolError> {
        let missing = needed - self.fields;
        if missing.is_empty() {
            return Ok(());
        }
        let cmd = [
            (Fields::ID, Command::Id),
            (Fields::QUEUE_ID, Command::QueueId),
            (Fields::TIMEOUT, Command::Timeout),
            (Fields::PRIORITY, Command::Priority),
            (Fields::QUEUE, Command::Queue),
            (Fields::PAYLOAD, Command::Payload),
        ]
        .into_iter()
        .find_map(|(bit, cmd)| missing.contains(bit).then_some(cmd))
        .unwrap_or(Command::Nop);
        Err(ProtocolError::MissingField { terminal, missing: cmd })
    }
}
