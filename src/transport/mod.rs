//! Transport seam: the duplex connection a channel owns.
//!
//! A [`Connector`] opens one [`Connection`] per channel, keyed by
//! `(endpoint, channel name)`. The connection reports what happens to it
//! through the [`ConnectionEvents`] handle it was given: `opened`, `closed`,
//! `failed` and `message`. All of it runs on one thread; nothing here
//! blocks.

pub mod frame;
pub mod ws;

use std::fmt;
use std::rc::{Rc, Weak};

pub use frame::Frame;
pub use ws::WsConnector;

use crate::domain::ChannelName;
use crate::domain::channel::ChannelCore;
use crate::error::{DeliveryError, TransportError};

/// A live, non-blocking duplex connection owned by exactly one channel.
pub trait Connection: fmt::Debug {
    /// Queues a frame for sending.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the connection can no longer accept
    /// frames.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Requests teardown. The remote close may complete later; events the
    /// connection emits afterwards are ignored by the channel.
    fn close(&self);
}

/// Factory for [`Connection`]s.
pub trait Connector: fmt::Debug {
    /// Starts connecting `channel` at `endpoint`.
    ///
    /// Must return immediately. The outcome is reported through `events`,
    /// which may be invoked before this call returns.
    fn connect(&self, endpoint: &str, channel: &ChannelName, events: ConnectionEvents)
    -> Rc<dyn Connection>;
}

/// Identifies one connection attempt of a channel.
///
/// A channel only accepts events carrying the id of its current
/// connection, so a connection that was replaced or closed locally cannot
/// affect it any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw sequence number (starts at 1 per channel).
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback surface a [`Connection`] uses to report transport events back
/// to its channel.
///
/// Holds only a weak reference; once the channel is gone every call is a
/// no-op.
#[derive(Clone)]
pub struct ConnectionEvents {
    channel: Weak<ChannelCore>,
    id: ConnectionId,
}

impl ConnectionEvents {
    pub(crate) const fn new(channel: Weak<ChannelCore>, id: ConnectionId) -> Self {
        Self { channel, id }
    }

    /// Returns the id of the connection these events belong to.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// The connection is established.
    pub fn opened(&self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.on_open(self.id);
        }
    }

    /// The connection was closed.
    pub fn closed(&self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.on_close(self.id);
        }
    }

    /// The connection failed.
    pub fn failed(&self, error: TransportError) {
        if let Some(channel) = self.channel.upgrade() {
            channel.on_error(self.id, &error);
        }
    }

    /// An inbound frame arrived; fans it out to the channel's subscribers.
    ///
    /// # Errors
    ///
    /// Returns the [`DeliveryError`] that aborted delivery. By the time this
    /// returns the channel has already closed this connection and moved to
    /// [`crate::ChannelState::Errored`]; the caller only needs to stop
    /// reading.
    pub fn message(&self, frame: Frame) -> Result<(), DeliveryError> {
        match self.channel.upgrade() {
            Some(channel) => channel.on_message(self.id, &frame),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ConnectionEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEvents")
            .field("id", &self.id)
            .field("attached", &(self.channel.strong_count() > 0))
            .finish()
    }
}
