//! Client library for a RISP-framed message queue.
//!
//! An application node uses one [`Client`] to produce and consume
//! messages against a pool of redundant controllers. The head of the
//! pool carries the single live connection; when it fails or announces
//! CLOSING, it rotates to the tail and the next controller is dialed.
//! Consumed queues are re-announced and queued requests flushed on every
//! reconnect.
//!
//! The client is single-threaded and non-blocking: the application calls
//! [`Client::poll`] in its loop, and every handler fires from inside that
//! call.
//!
//! ```no_run
//! use courier::{Client, Consumer, Outbound};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new()?;
//!     client.add_controller("127.0.0.1:13700")?;
//!
//!     // answer requests addressed to "work"
//!     client.consume(Consumer::new("work", |client, delivery| {
//!         let id = delivery.id();
//!         let answer = delivery.payload().to_ascii_uppercase();
//!         let _ = client.reply(id, &answer);
//!     }))?;
//!
//!     // ask another node for something
//!     client.send(
//!         Outbound::new("lookup", "key-17")
//!             .on_reply(|_, resp| println!("got {:?}", resp.payload())),
//!     )?;
//!
//!     loop {
//!         client.poll(Some(std::time::Duration::from_millis(100)))?;
//!     }
//! }
//! ```

mod addr;
mod assert;
mod client;
mod connection;
mod error;
mod message;
mod record;
mod subscription;
pub mod wire;

pub use addr::{HostError, parse_host};
pub use client::{Client, DEFAULT_PORT};
pub use error::Error;
pub use message::{Delivery, FailFn, MessageId, Outbound, ReplyFn, Response};
pub use risp;
pub use subscription::{AcceptFn, Consumer, DroppedFn, RequestFn};
pub use wire::Priority;
