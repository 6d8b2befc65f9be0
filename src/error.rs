//! Error types for the multiplexing layer.
//!
//! Three families, matching who has to react to them:
//!
//! | Type                  | Raised by                       | Seen by                      |
//! |-----------------------|---------------------------------|------------------------------|
//! | [`TransportError`]    | a [`crate::transport::Connection`] | subscribers' `on_error`   |
//! | [`DeliveryError`]     | the fan-out routine             | the transport's dispatcher   |
//! | [`SubscriptionError`] | [`crate::Subscription`] calls   | the immediate caller         |
//!
//! Transport and delivery failures are absorbed by the channel (state
//! transition plus listener notification). Misuse of a subscription is
//! returned to the caller as a typed error.

use crate::domain::{ChannelName, SubscriberId};

/// Failure of the underlying duplex connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint or channel name could not be turned into a request.
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint {
        /// Endpoint address as configured.
        endpoint: String,
        /// Why the request could not be built.
        reason: String,
    },

    /// The connection could not be established.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect {
        /// Endpoint address as configured.
        endpoint: String,
        /// Underlying failure.
        reason: String,
    },

    /// The connection was not established within the configured timeout.
    #[error("connection attempt timed out after {timeout_ms} ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The established stream failed while reading or writing.
    #[error("stream error: {0}")]
    Stream(String),

    /// The connection has already been closed.
    #[error("connection is closed")]
    Closed,
}

/// Fatal failure while fanning one inbound message out to subscribers.
///
/// Either variant aborts delivery of the current message and closes the
/// channel's connection.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The payload could not be parsed for a JSON subscriber.
    #[error("failed to decode message on channel {channel}: {source}")]
    Decode {
        /// Channel the message arrived on.
        channel: ChannelName,
        /// Parser failure.
        source: serde_json::Error,
    },

    /// A subscriber's message handler returned an error.
    #[error("subscriber {subscriber} on channel {channel} failed: {error:#}")]
    Handler {
        /// Channel the message arrived on.
        channel: ChannelName,
        /// Subscriber whose handler failed.
        subscriber: SubscriberId,
        /// Error returned by the handler.
        error: anyhow::Error,
    },
}

impl DeliveryError {
    /// Returns the channel the failing message arrived on.
    #[must_use]
    pub const fn channel(&self) -> &ChannelName {
        match self {
            Self::Decode { channel, .. } | Self::Handler { channel, .. } => channel,
        }
    }
}

/// Errors returned to callers of the [`crate::Subscription`] API.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The channel name is empty or cannot be used as a sub-protocol token.
    #[error("invalid channel name {0:?}")]
    InvalidChannelName(String),

    /// The subscription has already been closed.
    #[error("subscription is closed")]
    Closed,

    /// The channel currently has no open connection.
    #[error("channel {0} has no open connection")]
    NotConnected(ChannelName),

    /// The connection refused the outbound frame.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SubscriptionError {
    /// Returns `true` for failures expected to clear once the channel
    /// reconnects.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected(_) | Self::Transport(_))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn channel() -> ChannelName {
        let Ok(name) = ChannelName::new("camera") else {
            panic!("valid channel name");
        };
        name
    }

    #[test]
    fn not_connected_is_transient() {
        assert!(SubscriptionError::NotConnected(channel()).is_transient());
        assert!(SubscriptionError::Transport(TransportError::Closed).is_transient());
        assert!(!SubscriptionError::Closed.is_transient());
        assert!(!SubscriptionError::InvalidChannelName(String::new()).is_transient());
    }

    #[test]
    fn handler_error_message_names_channel_and_subscriber() {
        let subscriber = SubscriberId::new();
        let err = DeliveryError::Handler {
            channel: channel(),
            subscriber,
            error: anyhow::anyhow!("boom"),
        };
        let text = err.to_string();
        assert!(text.contains("camera"));
        assert!(text.contains(&subscriber.to_string()));
        assert!(text.contains("boom"));
        assert_eq!(err.channel().as_str(), "camera");
    }

    #[test]
    fn decode_error_exposes_parser_source() {
        let Err(source) = serde_json::from_str::<serde_json::Value>("{") else {
            panic!("expected parse failure");
        };
        let err = DeliveryError::Decode {
            channel: channel(),
            source,
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
