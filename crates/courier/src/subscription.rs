//! Queues this client consumes: the public builder and the registry
//! records behind it.

use crate::client::Client;
use crate::message::Delivery;
use crate::wire::Priority;

/// Handles a request delivered on a consumed queue. May call
/// [`Client::reply`], [`Client::send`] or [`Client::consume`] before
/// returning; must not call `shutdown` or `cleanup`.
pub type RequestFn = Box<dyn FnMut(&mut Client, Delivery)>;
/// The controller accepted the consume; arguments are the queue name and
/// its server-assigned id.
pub type AcceptFn = Box<dyn FnMut(&mut Client, &str, u32)>;
/// The connection carrying the consume went away; the subscription is
/// re-announced on the next controller.
pub type DroppedFn = Box<dyn FnMut(&mut Client, &str, u32)>;

/// Declares a queue to consume. `max` caps concurrent deliveries
/// (0 leaves the cap to the controller).
pub struct Consumer {
    pub(crate) queue: String,
    pub(crate) max: u8,
    pub(crate) priority: Priority,
    pub(crate) exclusive: bool,
    pub(crate) on_request: RequestFn,
    pub(crate) on_accepted: Option<AcceptFn>,
    pub(crate) on_dropped: Option<DroppedFn>,
}

impl Consumer {
    pub fn new(queue: impl Into<String>, on_request: impl FnMut(&mut Client, Delivery) + 'static) -> Self {
        Self {
            queue: queue.into(),
            max: 0,
            priority: Priority::default(),
            exclusive: false,
            on_request: Box::new(on_request),
            on_accepted: None,
            on_dropped: None,
        }
    }

    pub fn max(mut self, n: u8) -> Self {
        self.max = n;
        self
    }

    pub fn priority(mut self, p: Priority) -> Self {
        self.priority = p;
        self
    }

    /// Ask to be the queue's only consumer.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn on_accepted(mut self, f: impl FnMut(&mut Client, &str, u32) + 'static) -> Self {
        self.on_accepted = Some(Box::new(f));
        self
    }

    pub fn on_dropped(mut self, f: impl FnMut(&mut Client, &str, u32) + 'static) -> Self {
        self.on_dropped = Some(Box::new(f));
        self
    }
}

/// Registry record for one consumed queue. Handlers sit in `Option`s so
/// dispatch can lend them out while the client is borrowed.
pub(crate) struct Subscription {
    pub queue: String,
    pub max: u8,
    pub priority: Priority,
    pub exclusive: bool,
    /// Assigned by CONSUMING; cleared when the connection drops.
    pub qid: Option<u32>,
    pub on_request: Option<RequestFn>,
    pub on_accepted: Option<AcceptFn>,
    pub on_dropped: Option<DroppedFn>,
}

impl From<Consumer> for Subscription {
    fn from(c: Consumer) -> Self {
        Self {
            queue: c.queue,
            max: c.max,
            priority: c.priority,
            exclusive: c.exclusive,
            qid: None,
            on_request: Some(c.on_request),
            on_accepted: c.on_accepted,
            on_dropped: c.on_dropped,
        }
    }
}
