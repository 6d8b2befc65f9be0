//! Subscriber records and the options used to create them.
//!
//! The decode preference is not a flag next to the callback: it is the
//! variant of [`MessageHandler`] itself, so a JSON subscriber can only ever
//! be handed a decoded value and a raw subscriber only the frame.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde::Serialize;
use serde::de::{Deserialize, DeserializeOwned};
use serde_json::Value;

use super::SubscriberId;
use crate::error::TransportError;
use crate::transport::Frame;

/// Callback receiving raw frames.
pub type RawHandler = Rc<dyn Fn(&Frame) -> anyhow::Result<()>>;

/// Callback receiving the shared decoded JSON value.
pub type JsonHandler = Rc<dyn Fn(&Value) -> anyhow::Result<()>>;

/// Callback receiving transport errors.
pub type ErrorHandler = Rc<dyn Fn(&TransportError) -> anyhow::Result<()>>;

/// How a subscriber wants inbound payloads delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// The frame exactly as received.
    Raw,
    /// The payload parsed as JSON, shared across subscribers.
    #[default]
    Json,
}

impl DecodeMode {
    /// Returns the mode as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecodeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown decode mode {other:?} (expected raw or json)")),
        }
    }
}

/// Message callback tagged with the payload shape it accepts.
#[derive(Clone)]
pub enum MessageHandler {
    /// Receives each frame untouched.
    Raw(RawHandler),
    /// Receives the decoded JSON value.
    Json(JsonHandler),
}

impl MessageHandler {
    /// Returns the decode mode implied by this handler.
    #[must_use]
    pub const fn decode_mode(&self) -> DecodeMode {
        match self {
            Self::Raw(_) => DecodeMode::Raw,
            Self::Json(_) => DecodeMode::Json,
        }
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageHandler::{}", self.decode_mode())
    }
}

/// Options for a new [`crate::Subscription`].
///
/// ```rust,ignore
/// let options = SubscriptionOptions::json(|state| {
///     tracing::info!(%state, "game state");
///     Ok(())
/// })
/// .on_error(|err| {
///     tracing::warn!(%err, "feed failed");
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct SubscriptionOptions {
    handler: MessageHandler,
    on_error: Option<ErrorHandler>,
}

impl SubscriptionOptions {
    /// Delivers each frame as received; never triggers a decode.
    #[must_use]
    pub fn raw<F>(on_message: F) -> Self
    where
        F: Fn(&Frame) -> anyhow::Result<()> + 'static,
    {
        Self {
            handler: MessageHandler::Raw(Rc::new(on_message)),
            on_error: None,
        }
    }

    /// Delivers the payload parsed as JSON.
    #[must_use]
    pub fn json<F>(on_message: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + 'static,
    {
        Self {
            handler: MessageHandler::Json(Rc::new(on_message)),
            on_error: None,
        }
    }

    /// Delivers the payload deserialized into `T`.
    ///
    /// The JSON parse is still shared with every other JSON subscriber of
    /// the channel; only the conversion into `T` is per subscriber. A value
    /// that does not fit `T` counts as a handler failure.
    #[must_use]
    pub fn typed<T, F>(on_message: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) -> anyhow::Result<()> + 'static,
    {
        Self::json(move |value: &Value| {
            let data = <T as Deserialize>::deserialize(value)?;
            on_message(data)
        })
    }

    /// Sets the transport error callback.
    #[must_use]
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&TransportError) -> anyhow::Result<()> + 'static,
    {
        self.on_error = Some(Rc::new(on_error));
        self
    }

    /// Returns the decode mode these options request.
    #[must_use]
    pub const fn decode_mode(&self) -> DecodeMode {
        self.handler.decode_mode()
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("decode_mode", &self.decode_mode())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// One registration against a channel.
///
/// Lives exactly as long as its [`crate::Subscription`] is open; once
/// deactivated it receives nothing, even from a fan-out already in progress.
pub struct Subscriber {
    id: SubscriberId,
    handler: MessageHandler,
    on_error: Option<ErrorHandler>,
    active: Cell<bool>,
}

impl Subscriber {
    pub(crate) fn new(options: SubscriptionOptions) -> Self {
        Self {
            id: SubscriberId::new(),
            handler: options.handler,
            on_error: options.on_error,
            active: Cell::new(true),
        }
    }

    /// Returns the subscriber id.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Returns the requested decode mode.
    #[must_use]
    pub const fn decode_mode(&self) -> DecodeMode {
        self.handler.decode_mode()
    }

    /// Returns `false` once the subscriber has been removed from its channel.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn deactivate(&self) {
        self.active.set(false);
    }

    pub(crate) const fn handler(&self) -> &MessageHandler {
        &self.handler
    }

    /// Reports a transport error; subscribers without `on_error` ignore it.
    pub(crate) fn notify_error(&self, error: &TransportError) -> anyhow::Result<()> {
        match &self.on_error {
            Some(on_error) => on_error(error),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("decode_mode", &self.decode_mode())
            .field("active", &self.is_active())
            .finish()
    }
}
