//! Channel lifecycle states and read-only snapshots.
//!
//! [`ChannelState`] is the state machine every [`super::Channel`] walks
//! through. [`ChannelStatus`] and [`ChannelStats`] are plain snapshots for
//! status displays and diagnostics.

use std::cell::Cell;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ChannelName;

/// Connection state of a channel.
///
/// ```text
/// Idle ──first subscriber──▶ Connecting ──open──▶ Open
///                               ▲   │               │
///                               │   └─error──┐      ├─close / last unsubscribe / fan-out failure
///                               │            ▼      ▼
///                               └──────── Errored  Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No subscriber has ever been added.
    #[default]
    Idle,
    /// A connection has been requested and is not yet established.
    Connecting,
    /// The connection is established.
    Open,
    /// The connection was closed, locally or by the remote end.
    Closed,
    /// The connection failed, or a message could not be delivered.
    Errored,
}

impl ChannelState {
    /// Returns `true` only for [`ChannelState::Open`].
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns the state as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one channel, in registry order.
///
/// `Display` renders the compact indicator label, e.g. `camera (2 clients)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    /// Channel name.
    pub name: ChannelName,
    /// Current connection state.
    pub state: ChannelState,
    /// Number of registered subscribers.
    pub subscribers: usize,
    /// When the channel last changed state (creation time if never).
    pub last_transition: DateTime<Utc>,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.subscribers == 1 {
            "client"
        } else {
            "clients"
        };
        write!(f, "{} ({} {noun})", self.name, self.subscribers)
    }
}

/// Cumulative delivery counters for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Inbound messages accepted from the live connection.
    pub messages: u64,
    /// Payload decodes performed (at most one per message).
    pub decodes: u64,
    /// Successful `on_message` invocations.
    pub deliveries: u64,
    /// Messages whose fan-out was aborted by a decode or handler failure.
    pub failures: u64,
    /// Connections requested from the connector.
    pub connections_opened: u64,
}

/// Live counters behind [`ChannelStats`]; bumped without borrowing the
/// channel, so they stay usable while callbacks re-enter it.
#[derive(Debug, Default)]
pub(crate) struct ChannelCounters {
    messages: Cell<u64>,
    decodes: Cell<u64>,
    deliveries: Cell<u64>,
    failures: Cell<u64>,
    connections_opened: Cell<u64>,
}

fn bump(cell: &Cell<u64>) {
    cell.set(cell.get().saturating_add(1));
}

impl ChannelCounters {
    pub(crate) fn record_message(&self) {
        bump(&self.messages);
    }

    pub(crate) fn record_decode(&self) {
        bump(&self.decodes);
    }

    pub(crate) fn record_delivery(&self) {
        bump(&self.deliveries);
    }

    pub(crate) fn record_failure(&self) {
        bump(&self.failures);
    }

    pub(crate) fn record_connection(&self) {
        bump(&self.connections_opened);
    }

    pub(crate) fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            messages: self.messages.get(),
            decodes: self.decodes.get(),
            deliveries: self.deliveries.get(),
            failures: self.failures.get(),
            connections_opened: self.connections_opened.get(),
        }
    }
}
