use thiserror::Error;

use crate::addr::HostError;
use crate::message::MessageId;

/// Errors surfaced synchronously from facade calls: configuration
/// mistakes and caller misuse. Transport and protocol trouble never
/// appears here; it is absorbed by the failover path and observed
/// through `on_dropped` and `on_fail`.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("queue name must be 1..=255 bytes, got {0}")]
    QueueName(usize),
    #[error("message payload is empty")]
    EmptyPayload,
    #[error("message table is full (wire ids are 16-bit)")]
    TableFull,
    #[error("no message in flight with id {0}")]
    UnknownMessage(MessageId),
    #[error("message {0} is not an inbound request")]
    NotInbound(MessageId),
    #[error("message {0} was already replied to")]
    AlreadyReplied(MessageId),
    #[error("message {0} does not expect a reply")]
    NoReplyExpected(MessageId),
    #[error("client is shutting down")]
    ShuttingDown,
}
