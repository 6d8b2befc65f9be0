//! Domain layer: channels, subscribers, fan-out and the registry.
//!
//! This module contains the multiplexing model: validated channel names,
//! the per-channel state machine, subscriber records with their decode
//! preference, the fan-out routines, and the registry that owns every
//! channel.

pub mod channel;
pub mod channel_name;
pub(crate) mod fanout;
pub mod registry;
pub mod state;
pub mod subscriber;
pub mod subscriber_id;

pub use channel::Channel;
pub use channel_name::ChannelName;
pub use registry::{Registry, WeakRegistry};
pub use state::{ChannelState, ChannelStats, ChannelStatus};
pub use subscriber::{
    DecodeMode, ErrorHandler, JsonHandler, MessageHandler, RawHandler, Subscriber,
    SubscriptionOptions,
};
pub use subscriber_id::SubscriberId;
