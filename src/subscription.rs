//! Public subscription handles.
//!
//! A [`Subscription`] is the only thing consumer code holds on to: it
//! registers one subscriber on a channel when created and unregisters it
//! when closed or dropped. [`SubscriptionSet`] closes a group of them
//! together, e.g. when a view is torn down.

use std::rc::Rc;

use crate::domain::{Channel, ChannelName, Registry, Subscriber, SubscriberId, SubscriptionOptions};
use crate::error::SubscriptionError;
use crate::transport::Frame;

/// Handle to one subscriber on one channel.
///
/// Closing is idempotent and also happens on drop. Once [`close`] returns,
/// no further callbacks reach this subscription, even from a delivery that
/// is already running; the connection itself may finish closing later.
///
/// [`close`]: Subscription::close
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    subscriber: Rc<Subscriber>,
}

impl Subscription {
    /// Subscribes to `channel_name`, opening its connection if this is the
    /// first subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidChannelName`] if the name is not
    /// a valid channel name.
    pub fn new(
        registry: &Registry,
        channel_name: &str,
        options: SubscriptionOptions,
    ) -> Result<Self, SubscriptionError> {
        let name = ChannelName::new(channel_name)?;
        Ok(Self::with_name(registry, &name, options))
    }

    /// Subscribes to an already validated channel name.
    #[must_use]
    pub fn with_name(registry: &Registry, name: &ChannelName, options: SubscriptionOptions) -> Self {
        let channel = registry.channel(name);
        let subscriber = Rc::new(Subscriber::new(options));
        tracing::debug!(
            channel = %name,
            subscriber = %subscriber.id(),
            decode = %subscriber.decode_mode(),
            "subscribing"
        );
        channel.add_subscriber(Rc::clone(&subscriber));
        Self {
            channel,
            subscriber,
        }
    }

    /// Returns the subscriber id.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.subscriber.id()
    }

    /// Returns the channel this subscription belongs to.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Returns `true` once [`Subscription::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.subscriber.is_active()
    }

    /// Sends a frame over the channel's connection.
    ///
    /// # Errors
    ///
    /// - [`SubscriptionError::Closed`] if this subscription was closed.
    /// - [`SubscriptionError::NotConnected`] if the channel has no open
    ///   connection right now.
    /// - [`SubscriptionError::Transport`] if the connection rejects the frame.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), SubscriptionError> {
        if self.is_closed() {
            return Err(SubscriptionError::Closed);
        }
        self.channel.send(frame.into())
    }

    /// Unsubscribes. Calling it again is a no-op.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        tracing::debug!(
            channel = %self.channel.name(),
            subscriber = %self.subscriber.id(),
            "unsubscribing"
        );
        self.channel.remove_subscriber(&self.subscriber);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Subscriptions owned and closed together.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `subscription`.
    pub fn add(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Subscribes and adds the result to the set.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidChannelName`] if the name is not
    /// a valid channel name; the set is left unchanged.
    pub fn subscribe(
        &mut self,
        registry: &Registry,
        channel_name: &str,
        options: SubscriptionOptions,
    ) -> Result<SubscriberId, SubscriptionError> {
        let subscription = Subscription::new(registry, channel_name, options)?;
        let id = subscription.id();
        self.add(subscription);
        Ok(id)
    }

    /// Returns the number of subscriptions held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns `true` if the set holds no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Closes every subscription, in the order they were added, and empties
    /// the set.
    pub fn close_all(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.close();
        }
    }
}

impl Extend<Subscription> for SubscriptionSet {
    fn extend<I: IntoIterator<Item = Subscription>>(&mut self, iter: I) {
        self.subscriptions.extend(iter);
    }
}
