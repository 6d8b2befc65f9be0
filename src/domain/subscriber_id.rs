//! Type-safe subscriber identifier.
//!
//! [`SubscriberId`] wraps a [`uuid::Uuid`] (v4) so that subscriber handles
//! can be told apart in logs and errors without relying on pointer identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for one registered subscriber.
///
/// Generated when a [`crate::Subscription`] is constructed and immutable
/// thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(uuid::Uuid);

impl SubscriberId {
    /// Creates a new random `SubscriberId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for SubscriberId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}
