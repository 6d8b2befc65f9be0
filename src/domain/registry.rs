//! Directory of channels with bulk connectivity control.
//!
//! [`Registry`] maps channel names to [`Channel`]s and remembers the order
//! in which they were created. Channels are created on first use and never
//! removed; only their connections come and go.
//!
//! One registry is built at startup and handed to whoever needs it. It is
//! single-threaded (`!Send`): all channels, subscriptions and connection
//! callbacks run on the same thread, typically inside a
//! [`tokio::task::LocalSet`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::{Channel, ChannelName, ChannelStatus};
use crate::config::MuxConfig;
use crate::transport::{Connector, WsConnector};

type Listener = Rc<dyn Fn()>;

/// State shared by a [`Registry`] and, weakly, by its channels.
pub(crate) struct RegistryShared {
    endpoint: String,
    connector: Rc<dyn Connector>,
    channels: RefCell<HashMap<ChannelName, Channel>>,
    ordered: RefCell<Vec<Channel>>,
    listeners: RefCell<Vec<Listener>>,
}

impl RegistryShared {
    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn connector(&self) -> &dyn Connector {
        &*self.connector
    }

    /// Runs every connectivity listener in registration order.
    pub(crate) fn notify_connectivity_changed(&self) {
        let listeners = self.listeners.borrow().clone();
        for listener in listeners {
            listener();
        }
    }
}

/// Process-wide directory of channels.
///
/// Cheap to clone; clones share the same channels.
#[derive(Clone)]
pub struct Registry {
    shared: Rc<RegistryShared>,
}

impl Registry {
    /// Creates an empty registry whose channels connect to `endpoint`
    /// through `connector`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, connector: Rc<dyn Connector>) -> Self {
        Self {
            shared: Rc::new(RegistryShared {
                endpoint: endpoint.into(),
                connector,
                channels: RefCell::new(HashMap::new()),
                ordered: RefCell::new(Vec::new()),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Creates a registry that connects over WebSocket as configured.
    #[must_use]
    pub fn from_config(config: &MuxConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            Rc::new(WsConnector::new(config.connect_timeout())),
        )
    }

    /// Returns the endpoint every channel connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Returns the channel called `name`, creating it if needed.
    ///
    /// A new channel starts [`super::ChannelState::Idle`] with no
    /// connection.
    #[must_use]
    pub fn channel(&self, name: &ChannelName) -> Channel {
        if let Some(channel) = self.shared.channels.borrow().get(name.as_str()) {
            return channel.clone();
        }

        let channel = Channel::new(name.clone(), Rc::downgrade(&self.shared));
        self.shared
            .channels
            .borrow_mut()
            .insert(name.clone(), channel.clone());
        self.shared.ordered.borrow_mut().push(channel.clone());
        tracing::debug!(channel = %name, "channel created");
        channel
    }

    /// Returns the channel called `name` if it has been created.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Channel> {
        self.shared.channels.borrow().get(name).cloned()
    }

    /// Returns every channel in creation order.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.shared.ordered.borrow().clone()
    }

    /// Returns the number of channels ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.ordered.borrow().len()
    }

    /// Returns `true` if no channel has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.ordered.borrow().is_empty()
    }

    /// Returns the status of every channel in creation order.
    #[must_use]
    pub fn statuses(&self) -> Vec<ChannelStatus> {
        self.channels().iter().map(Channel::status).collect()
    }

    /// Closes every live connection. Subscribers stay registered.
    pub fn disconnect_all(&self) {
        tracing::info!(channels = self.len(), "disconnecting all channels");
        for channel in self.channels() {
            channel.disconnect();
        }
    }

    /// Reopens every channel that has subscribers but no connection.
    pub fn reconnect_all(&self) {
        tracing::info!(channels = self.len(), "reconnecting all channels");
        for channel in self.channels() {
            channel.reconnect();
        }
    }

    /// Returns `true` if no channel is [`super::ChannelState::Open`].
    #[must_use]
    pub fn is_all_disconnected(&self) -> bool {
        self.channels().iter().all(|channel| !channel.is_connected())
    }

    /// Reconnects if everything is disconnected, otherwise disconnects.
    ///
    /// Returns `true` if it reconnected.
    pub fn toggle_connectivity(&self) -> bool {
        if self.is_all_disconnected() {
            self.reconnect_all();
            true
        } else {
            self.disconnect_all();
            false
        }
    }

    /// Registers a listener run after any channel changes state.
    ///
    /// Listeners run synchronously, in registration order, on the call
    /// stack of the transition. They may call back into the registry.
    pub fn on_connectivity_changed<F>(&self, listener: F)
    where
        F: Fn() + 'static,
    {
        self.shared.listeners.borrow_mut().push(Rc::new(listener));
    }

    /// Returns a handle that does not keep the registry alive, for use in
    /// listeners and callbacks owned by the registry itself.
    #[must_use]
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            shared: Rc::downgrade(&self.shared),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("endpoint", &self.shared.endpoint)
            .field("connector", &self.shared.connector)
            .field("channels", &self.len())
            .finish_non_exhaustive()
    }
}

/// Non-owning [`Registry`] handle.
#[derive(Clone)]
pub struct WeakRegistry {
    shared: Weak<RegistryShared>,
}

impl WeakRegistry {
    /// Returns the registry if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Registry> {
        self.shared.upgrade().map(|shared| Registry { shared })
    }
}

impl fmt::Debug for WeakRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRegistry")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}
