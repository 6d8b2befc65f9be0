//! Validated channel names.
//!
//! A channel name is the routing discriminator sent to the endpoint as the
//! WebSocket sub-protocol, so it has to be a valid HTTP token: non-empty,
//! visible ASCII, no separators.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::SubscriptionError;

/// Characters HTTP reserves as token separators (RFC 7230 §3.2.6).
const SEPARATORS: &[char] = &[
    '(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?', '=', '{', '}',
];

/// Name of a streaming feed, e.g. `"camera-protocol"`.
///
/// Unique key of a [`super::Channel`] inside a [`super::Registry`]; stable
/// for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Validates and wraps a channel name.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidChannelName`] if `name` is empty
    /// or contains whitespace, control characters, non-ASCII characters or
    /// HTTP separators.
    pub fn new(name: &str) -> Result<Self, SubscriptionError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_graphic() && !SEPARATORS.contains(&c));
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(SubscriptionError::InvalidChannelName(name.to_string()))
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelName {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}
