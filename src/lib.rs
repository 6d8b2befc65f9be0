//! # feed-mux
//!
//! Client-side multiplexer for named real-time feeds.
//!
//! Many independent consumers subscribe to a feed by channel name; all
//! consumers of one channel share a single underlying connection. The
//! connection is opened when the first consumer arrives and closed when the
//! last one leaves. Each inbound payload is decoded at most once and fanned
//! out to every subscriber, raw or as JSON.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). The WebSocket
//! transport runs its sockets as local tasks, so a [`Registry`] built with
//! [`Registry::from_config`] must live inside a [`tokio::task::LocalSet`].
//!
//! ## Architecture
//!
//! ```text
//! Consumers
//!     │
//!     ├── Subscription / SubscriptionSet (subscription)
//!     │
//!     ├── Registry ── connectivity listeners (domain/)
//!     ├── Channel ── state machine, fan-out (domain/)
//!     │
//!     ├── Connector / Connection (transport/)
//!     └── WsConnector (tokio-tungstenite)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use feed_mux::{MuxConfig, Registry, Subscription, SubscriptionOptions};
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::from_config(&MuxConfig::default());
//! let game = Subscription::new(
//!     &registry,
//!     "game-state",
//!     SubscriptionOptions::json(|value| {
//!         println!("game state: {value}");
//!         Ok(())
//!     }),
//! )?;
//! // ...
//! game.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::MuxConfig;
pub use domain::{
    Channel, ChannelName, ChannelState, ChannelStats, ChannelStatus, DecodeMode, MessageHandler,
    Registry, SubscriberId, SubscriptionOptions, WeakRegistry,
};
pub use error::{DeliveryError, SubscriptionError, TransportError};
pub use subscription::{Subscription, SubscriptionSet};
pub use transport::{Connection, ConnectionEvents, ConnectionId, Connector, Frame, WsConnector};
