//! Protocol command catalog and frame grammar.
//!
//! Every record-bearing frame starts with CLEAR and ends with exactly one
//! terminal command; field commands in between fill named slots of the
//! receiver's current record. PONG is the one frame emitted bare, as a
//! single command byte.

use bytes::BytesMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// Protocol commands. The byte value places each command in a RISP
/// argument class (see [`risp::class_of`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    Nop = 0x00,
    Clear = 0x01,
    Ping = 0x02,
    Pong = 0x03,
    Request = 0x04,
    Reply = 0x05,
    Delivered = 0x06,
    Undelivered = 0x07,
    Broadcast = 0x08,
    Noreply = 0x09,
    Consume = 0x0a,
    Consuming = 0x0b,
    Closing = 0x0c,
    ServerFull = 0x0d,
    Exclusive = 0x0e,
    // short int
    Priority = 0x40,
    Max = 0x41,
    // large int
    Id = 0x60,
    QueueId = 0x61,
    Timeout = 0x62,
    // short string
    Queue = 0x80,
    // large string
    Payload = 0xa0,
}

/// Queue priority carried on CONSUME.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum Priority {
    None = 0,
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
}

/// A peer violated the protocol. Handling is always the same: log it and
/// run the closed path on the offending connection; never panic, never
/// ignore.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error(transparent)]
    Risp(#[from] risp::RispError),
    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),
    #[error("{0:?} is not valid on a client connection")]
    Unexpected(Command),
    #[error("malformed argument for {0:?}")]
    BadArgument(Command),
    #[error("{cmd:?} value {value} out of range")]
    OutOfRange { cmd: Command, value: u32 },
    #[error("duplicate {0:?} in one record")]
    Duplicate(Command),
    #[error("{terminal:?} record is missing {missing:?}")]
    MissingField { terminal: Command, missing: Command },
    #[error("{terminal:?} does not correlate with message {id}")]
    BadCorrelation { terminal: Command, id: u32 },
    #[error("controller could not deliver request {0}")]
    Undeliverable(u32),
}

/// `CLEAR [EXCLUSIVE] QUEUE MAX PRIORITY CONSUME`
pub fn put_consume(buf: &mut BytesMut, queue: &[u8], max: u8, priority: Priority, exclusive: bool) {
    risp::put_cmd(buf, Command::Clear.into());
    if exclusive {
        risp::put_cmd(buf, Command::Exclusive.into());
    }
    risp::put_data(buf, Command::Queue.into(), queue);
    risp::put_int(buf, Command::Max.into(), u32::from(max));
    risp::put_int(buf, Command::Priority.into(), u32::from(u8::from(priority)));
    risp::put_cmd(buf, Command::Consume.into());
}

/// `CLEAR ID QUEUE PAYLOAD [TIMEOUT] [NOREPLY] (BROADCAST|REQUEST)`
pub fn put_request(
    buf: &mut BytesMut,
    id: u32,
    queue: &[u8],
    payload: &[u8],
    noreply: bool,
    broadcast: bool,
    timeout: Option<u32>,
) {
    risp::put_cmd(buf, Command::Clear.into());
    risp::put_int(buf, Command::Id.into(), id);
    risp::put_data(buf, Command::Queue.into(), queue);
    risp::put_data(buf, Command::Payload.into(), payload);
    if let Some(secs) = timeout {
        risp::put_int(buf, Command::Timeout.into(), secs);
    }
    if noreply {
        risp::put_cmd(buf, Command::Noreply.into());
    }
    let terminal = if broadcast { Command::Broadcast } else { Command::Request };
    risp::put_cmd(buf, terminal.into());
}

/// `CLEAR ID PAYLOAD REPLY` — addressed by the peer's id for the request.
/// An empty answer still carries a zero-length PAYLOAD: the receiving side
/// requires the field on every REPLY.
pub fn put_reply(buf: &mut BytesMut, src_id: u32, payload: &[u8]) {
    risp::put_cmd(buf, Command::Clear.into());
    risp::put_int(buf, Command::Id.into(), src_id);
    risp::put_data(buf, Command::Payload.into(), payload);
    risp::put_cmd(buf, Command::Reply.into());
}

/// `CLEAR ID DELIVERED`
pub fn put_delivered(buf: &mut BytesMut, src_id: u32) {
    risp::put_cmd(buf, Command::Clear.into());
    risp::put_int(buf, Command::Id.into(), src_id);
    risp::put_cmd(buf, Command::Delivered.into());
}

/// `CLEAR ID UNDELIVERED`
pub fn put_undelivered(buf: &mut BytesMut, src_id: u32) {
    risp::put_cmd(buf, Command::Clear.into());
    risp::put_int(buf, Command::Id.into(), src_id);
    risp::put_cmd(buf, Command::Undelivered.into());
}

/// `CLEAR CLOSING`
pub fn put_closing(buf: &mut BytesMut) {
    risp::put_cmd(buf, Command::Clear.into());
    risp::put_cmd(buf, Command::Closing.into());
}

/// Bare PONG, the keep-alive answer. The one frame without CLEAR.
pub fn put_pong(buf: &mut BytesMut) {
    risp::put_cmd(buf, Command::Pong.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(mut buf: &[u8]) -> Vec<(u8, Option<Vec<u8>>, Option<u32>)> {
        let mut out = Vec::new();
        while let Some((cmd, arg, used)) = risp::next(buf).unwrap() {
            let (bytes, int) = match arg {
                risp::Arg::None => (None, None),
                risp::Arg::Int(v) => (None, Some(v)),
                risp::Arg::Bytes(b) => (Some(b.to_vec()), None),
            };
            out.push((cmd, bytes, int));
            buf = &buf[used..];
        }
        assert!(buf.is_empty());
        out
    }

    fn assert_clear_first_terminal_last(buf: &[u8], terminal: Command) {
        let cmds = commands(buf);
        assert_eq!(cmds.first().map(|c| c.0), Some(u8::from(Command::Clear)));
        assert_eq!(cmds.last().map(|c| c.0), Some(u8::from(terminal)));
        // exactly one terminal in the frame
        let terminals = cmds.iter().filter(|c| c.0 == u8::from(terminal)).count();
        assert_eq!(terminals, 1);
    }

    #[test]
    fn consume_frame_roundtrip() {
        let mut buf = BytesMut::new();
        put_consume(&mut buf, b"work", 4, Priority::High, true);
        assert_clear_first_terminal_last(&buf, Command::Consume);

        let cmds = commands(&buf);
        assert!(cmds.iter().any(|c| c.0 == u8::from(Command::Exclusive)));
        assert!(
            cmds.iter()
                .any(|c| c.0 == u8::from(Command::Queue) && c.1.as_deref() == Some(b"work"))
        );
        assert!(cmds.iter().any(|c| c.0 == u8::from(Command::Max) && c.2 == Some(4)));
        assert!(
            cmds.iter().any(|c| {
                c.0 == u8::from(Command::Priority) && c.2 == Some(u32::from(u8::from(Priority::High)))
            })
        );
    }

    #[test]
    fn request_frame_grammar() {
        let mut buf = BytesMut::new();
        put_request(&mut buf, 3, b"foo", b"hi", true, false, Some(30));
        assert_clear_first_terminal_last(&buf, Command::Request);
        let cmds = commands(&buf);
        assert!(cmds.iter().any(|c| c.0 == u8::from(Command::Noreply)));
        assert!(cmds.iter().any(|c| c.0 == u8::from(Command::Timeout) && c.2 == Some(30)));

        let mut buf = BytesMut::new();
        put_request(&mut buf, 3, b"foo", b"hi", false, true, None);
        assert_clear_first_terminal_last(&buf, Command::Broadcast);
    }

    #[test]
    fn reply_always_carries_a_payload() {
        let mut buf = BytesMut::new();
        put_reply(&mut buf, 9, b"answer");
        assert_clear_first_terminal_last(&buf, Command::Reply);
        let cmds = commands(&buf);
        assert!(cmds.iter().any(|c| c.0 == u8::from(Command::Id) && c.2 == Some(9)));
        assert!(
            cmds.iter()
                .any(|c| c.0 == u8::from(Command::Payload) && c.1.as_deref() == Some(b"answer"))
        );

        // an empty answer is a zero-length PAYLOAD, never a missing one
        let mut buf = BytesMut::new();
        put_reply(&mut buf, 9, b"");
        assert_clear_first_terminal_last(&buf, Command::Reply);
        assert!(
            commands(&buf)
                .iter()
                .any(|c| c.0 == u8::from(Command::Payload) && c.1.as_deref() == Some(&[][..]))
        );
    }

    #[test]
    fn acks_and_closing() {
        for (frame, terminal) in [
            (
                {
                    let mut b = BytesMut::new();
                    put_delivered(&mut b, 42);
                    b
                },
                Command::Delivered,
            ),
            (
                {
                    let mut b = BytesMut::new();
                    put_undelivered(&mut b, 42);
                    b
                },
                Command::Undelivered,
            ),
            (
                {
                    let mut b = BytesMut::new();
                    put_closing(&mut b);
                    b
                },
                Command::Closing,
            ),
        ] {
            assert_clear_first_terminal_last(&frame, terminal);
        }
    }

    #[test]
    fn pong_is_one_byte() {
        let mut buf = BytesMut::new();
        put_pong(&mut buf);
        assert_eq!(&buf[..], &[u8::from(Command::Pong)]);
    }
}
