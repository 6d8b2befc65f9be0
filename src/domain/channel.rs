//! One named feed: its subscribers and the connection they share.
//!
//! A [`Channel`] opens its connection when the first subscriber arrives and
//! closes it when the last one leaves. Inbound messages and transport
//! errors are fanned out to a snapshot of the subscriber list.
//!
//! # Re-entrancy
//!
//! Subscriber callbacks, connectivity listeners and connections may call
//! straight back into the channel. The interior `RefCell` is therefore
//! never borrowed across a call into foreign code: connections are cloned
//! out, subscriber lists are snapshotted, and state changes are committed
//! before listeners run.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};

use super::fanout;
use super::registry::RegistryShared;
use super::state::ChannelCounters;
use super::{ChannelName, ChannelState, ChannelStats, ChannelStatus, Subscriber};
use crate::error::{DeliveryError, SubscriptionError, TransportError};
use crate::transport::{Connection, ConnectionEvents, ConnectionId, Frame};

/// The connection slot of a channel.
///
/// `connection` is `None` between requesting a connection and the connector
/// handing it back; events for `id` are already accepted in that window.
struct LiveConnection {
    id: ConnectionId,
    connection: Option<Rc<dyn Connection>>,
}

impl LiveConnection {
    fn close(self) {
        if let Some(connection) = self.connection {
            connection.close();
        }
    }
}

struct ChannelInner {
    state: ChannelState,
    live: Option<LiveConnection>,
    subscribers: Vec<Rc<Subscriber>>,
    last_connection: u64,
    last_transition: DateTime<Utc>,
}

impl ChannelInner {
    fn is_current(&self, id: ConnectionId) -> bool {
        self.live.as_ref().is_some_and(|live| live.id == id)
    }

    fn take_if_current(&mut self, id: ConnectionId) -> Option<LiveConnection> {
        if self.is_current(id) {
            self.live.take()
        } else {
            None
        }
    }
}

/// Shared state behind a [`Channel`] handle.
pub(crate) struct ChannelCore {
    name: ChannelName,
    registry: Weak<RegistryShared>,
    inner: RefCell<ChannelInner>,
    counters: ChannelCounters,
}

impl ChannelCore {
    /// Commits a state change and notifies connectivity listeners.
    ///
    /// No-op if the channel is already in `next`.
    fn transition(&self, next: ChannelState) {
        let previous = {
            let mut inner = self.inner.borrow_mut();
            let previous = inner.state;
            if previous == next {
                return;
            }
            inner.state = next;
            inner.last_transition = Utc::now();
            previous
        };
        tracing::debug!(channel = %self.name, from = %previous, to = %next, "channel state changed");
        if let Some(registry) = self.registry.upgrade() {
            registry.notify_connectivity_changed();
        }
    }

    fn snapshot_subscribers(&self) -> Vec<Rc<Subscriber>> {
        self.inner.borrow().subscribers.clone()
    }

    /// Requests a fresh connection, discarding any previous one first.
    fn open_connection(self: &Rc<Self>) {
        let Some(registry) = self.registry.upgrade() else {
            tracing::warn!(channel = %self.name, "registry dropped; cannot open connection");
            return;
        };

        let (stale, id) = {
            let mut inner = self.inner.borrow_mut();
            let stale = inner.live.take();
            inner.last_connection = inner.last_connection.saturating_add(1);
            let id = ConnectionId::new(inner.last_connection);
            inner.live = Some(LiveConnection {
                id,
                connection: None,
            });
            (stale, id)
        };
        if let Some(stale) = stale {
            tracing::debug!(channel = %self.name, connection = %stale.id, "discarding previous connection");
            stale.close();
        }

        self.counters.record_connection();
        self.transition(ChannelState::Connecting);
        tracing::debug!(channel = %self.name, connection = %id, endpoint = registry.endpoint(), "opening connection");

        let events = ConnectionEvents::new(Rc::downgrade(self), id);
        let connection = registry.connector().connect(registry.endpoint(), &self.name, events);

        let orphan = {
            let mut inner = self.inner.borrow_mut();
            match inner.live.as_mut() {
                Some(live) if live.id == id => {
                    live.connection = Some(connection);
                    None
                }
                _ => Some(connection),
            }
        };
        // Closed, failed or replaced while the connector was still running.
        if let Some(orphan) = orphan {
            orphan.close();
        }
    }

    /// Closes the current connection, if any, and moves to `next`.
    fn drop_connection(&self, next: ChannelState) -> bool {
        let live = self.inner.borrow_mut().live.take();
        match live {
            Some(live) => {
                tracing::debug!(channel = %self.name, connection = %live.id, "closing connection");
                live.close();
                self.transition(next);
                true
            }
            None => false,
        }
    }

    pub(crate) fn on_open(&self, id: ConnectionId) {
        let accepted = {
            let inner = self.inner.borrow();
            inner.is_current(id) && inner.state == ChannelState::Connecting
        };
        if accepted {
            self.transition(ChannelState::Open);
        } else {
            tracing::trace!(channel = %self.name, connection = %id, "ignoring open from stale connection");
        }
    }

    pub(crate) fn on_close(&self, id: ConnectionId) {
        let live = self.inner.borrow_mut().take_if_current(id);
        if live.is_some() {
            tracing::debug!(channel = %self.name, connection = %id, "connection closed by transport");
            self.transition(ChannelState::Closed);
        } else {
            tracing::trace!(channel = %self.name, connection = %id, "ignoring close from stale connection");
        }
    }

    pub(crate) fn on_error(&self, id: ConnectionId, error: &TransportError) {
        let live = self.inner.borrow_mut().take_if_current(id);
        let Some(live) = live else {
            tracing::trace!(channel = %self.name, connection = %id, %error, "ignoring error from stale connection");
            return;
        };
        tracing::warn!(channel = %self.name, connection = %id, %error, "connection failed");
        live.close();
        self.transition(ChannelState::Errored);

        let subscribers = self.snapshot_subscribers();
        fanout::deliver_error(&self.name, &subscribers, error);
    }

    pub(crate) fn on_message(&self, id: ConnectionId, frame: &Frame) -> Result<(), DeliveryError> {
        if !self.inner.borrow().is_current(id) {
            tracing::trace!(channel = %self.name, connection = %id, "ignoring message from stale connection");
            return Ok(());
        }

        let subscribers = self.snapshot_subscribers();
        let result = fanout::deliver_message(&self.name, &subscribers, frame, &self.counters);

        if let Err(err) = &result {
            self.counters.record_failure();
            match err {
                DeliveryError::Decode { .. } => {
                    tracing::error!(channel = %self.name, error = %err, "error parsing message; closing connection");
                }
                DeliveryError::Handler { .. } => {
                    tracing::error!(channel = %self.name, error = %err, "subscription handler failed; closing connection");
                }
            }
            let live = self.inner.borrow_mut().take_if_current(id);
            if let Some(live) = live {
                live.close();
                self.transition(ChannelState::Errored);
            }
        }
        result
    }
}

/// Handle to one named feed.
///
/// Cheap to clone; all clones refer to the same channel. Channels are
/// created by [`super::Registry::channel`] and live as long as the registry.
#[derive(Clone)]
pub struct Channel {
    core: Rc<ChannelCore>,
}

impl Channel {
    pub(crate) fn new(name: ChannelName, registry: Weak<RegistryShared>) -> Self {
        Self {
            core: Rc::new(ChannelCore {
                name,
                registry,
                inner: RefCell::new(ChannelInner {
                    state: ChannelState::Idle,
                    live: None,
                    subscribers: Vec::new(),
                    last_connection: 0,
                    last_transition: Utc::now(),
                }),
                counters: ChannelCounters::default(),
            }),
        }
    }

    /// Returns the channel name.
    #[must_use]
    pub fn name(&self) -> &ChannelName {
        &self.core.name
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.core.inner.borrow().state
    }

    /// Returns `true` if the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Returns `true` while a connection is held, whether or not it has
    /// finished opening.
    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.core.inner.borrow().live.is_some()
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.inner.borrow().subscribers.len()
    }

    /// Returns the cumulative delivery counters.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        self.core.counters.snapshot()
    }

    /// Returns a point-in-time status of this channel.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        let inner = self.core.inner.borrow();
        ChannelStatus {
            name: self.core.name.clone(),
            state: inner.state,
            subscribers: inner.subscribers.len(),
            last_transition: inner.last_transition,
        }
    }

    /// Appends a subscriber; the first one opens the connection.
    pub(crate) fn add_subscriber(&self, subscriber: Rc<Subscriber>) {
        let first = {
            let mut inner = self.core.inner.borrow_mut();
            inner.subscribers.push(subscriber);
            inner.subscribers.len() == 1
        };
        if first {
            self.core.open_connection();
        }
    }

    /// Removes `subscriber`; the last one out closes the connection.
    ///
    /// Returns `false` if the subscriber was not registered.
    pub(crate) fn remove_subscriber(&self, subscriber: &Rc<Subscriber>) -> bool {
        let drained = {
            let mut inner = self.core.inner.borrow_mut();
            let Some(index) = inner
                .subscribers
                .iter()
                .position(|s| Rc::ptr_eq(s, subscriber))
            else {
                return false;
            };
            inner.subscribers.remove(index);
            inner.subscribers.is_empty()
        };
        subscriber.deactivate();

        if drained && !self.core.drop_connection(ChannelState::Closed) {
            // Already errored or closed; an errored feed with no subscribers
            // left is simply closed.
            self.core.transition(ChannelState::Closed);
        }
        true
    }

    /// Forwards a frame to the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::NotConnected`] unless the channel is
    /// [`ChannelState::Open`], or [`SubscriptionError::Transport`] if the
    /// connection refuses the frame.
    pub fn send(&self, frame: Frame) -> Result<(), SubscriptionError> {
        let connection = {
            let inner = self.core.inner.borrow();
            match (&inner.state, &inner.live) {
                (
                    ChannelState::Open,
                    Some(LiveConnection {
                        connection: Some(connection),
                        ..
                    }),
                ) => Some(Rc::clone(connection)),
                _ => None,
            }
        };
        let Some(connection) = connection else {
            return Err(SubscriptionError::NotConnected(self.core.name.clone()));
        };
        connection.send(frame)?;
        Ok(())
    }

    /// Closes the connection but keeps every subscriber registered.
    ///
    /// Returns `true` if a connection was closed.
    pub fn disconnect(&self) -> bool {
        self.core.drop_connection(ChannelState::Closed)
    }

    /// Opens a new connection if there are subscribers and none is held.
    ///
    /// Returns `true` if a connection was requested.
    pub fn reconnect(&self) -> bool {
        let wanted = {
            let inner = self.core.inner.borrow();
            !inner.subscribers.is_empty() && inner.live.is_none()
        };
        if wanted {
            self.core.open_connection();
        }
        wanted
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Channel");
        out.field("name", &self.core.name);
        if let Ok(inner) = self.core.inner.try_borrow() {
            out.field("state", &inner.state)
                .field("subscribers", &inner.subscribers.len())
                .field("connection", &inner.live.as_ref().map(|live| live.id));
        }
        out.finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::domain::{Registry, SubscriptionOptions};
    use crate::testing::RecordingConnector;

    fn setup() -> (Rc<RecordingConnector>, Registry, Channel) {
        let connector = Rc::new(RecordingConnector::default());
        let registry = Registry::new(
            "ws://feeds.test:8080",
            Rc::<RecordingConnector>::clone(&connector),
        );
        let Ok(name) = ChannelName::new("camera") else {
            panic!("valid channel name");
        };
        let channel = registry.channel(&name);
        (connector, registry, channel)
    }

    fn raw(counter: &Rc<Cell<usize>>) -> Rc<Subscriber> {
        let counter = Rc::clone(counter);
        Rc::new(Subscriber::new(SubscriptionOptions::raw(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        })))
    }

    #[test]
    fn new_channel_is_idle_without_connection() {
        let (connector, _registry, channel) = setup();
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(!channel.has_connection());
        assert_eq!(connector.connection_count(), 0);
    }

    #[test]
    fn first_subscriber_opens_connection() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));

        channel.add_subscriber(raw(&hits));

        assert_eq!(channel.state(), ChannelState::Connecting);
        assert_eq!(connector.connection_count(), 1);
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        assert_eq!(connection.channel().as_str(), "camera");
        assert_eq!(connection.endpoint(), "ws://feeds.test:8080");

        connection.open();
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[test]
    fn subscribers_share_one_connection() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));
        for _ in 0..5 {
            channel.add_subscriber(raw(&hits));
        }
        assert_eq!(connector.connection_count(), 1);
        assert_eq!(channel.subscriber_count(), 5);
    }

    #[test]
    fn last_subscriber_closes_connection_once() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));
        let a = raw(&hits);
        let b = raw(&hits);
        let c = raw(&hits);
        channel.add_subscriber(Rc::clone(&a));
        channel.add_subscriber(Rc::clone(&b));
        channel.add_subscriber(Rc::clone(&c));
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        connection.open();

        assert!(channel.remove_subscriber(&b));
        assert!(channel.remove_subscriber(&c));
        assert_eq!(connection.close_calls(), 0);
        assert!(channel.remove_subscriber(&a));

        assert_eq!(connection.close_calls(), 1);
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!channel.has_connection());
        assert_eq!(connector.connection_count(), 1);
    }

    #[test]
    fn removing_twice_is_a_no_op() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));
        let a = raw(&hits);
        channel.add_subscriber(Rc::clone(&a));

        assert!(channel.remove_subscriber(&a));
        assert!(!channel.remove_subscriber(&a));
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        assert_eq!(connection.close_calls(), 1);
    }

    #[test]
    fn partial_teardown_keeps_delivering() {
        let (connector, _registry, channel) = setup();
        let a_hits = Rc::new(Cell::new(0));
        let b_hits = Rc::new(Cell::new(0));
        let a = raw(&a_hits);
        let b = raw(&b_hits);
        channel.add_subscriber(Rc::clone(&a));
        channel.add_subscriber(Rc::clone(&b));
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        connection.open();

        channel.remove_subscriber(&a);
        assert!(channel.is_connected());
        assert!(connection.deliver(Frame::from("tick")).is_ok());
        assert_eq!(a_hits.get(), 0);
        assert_eq!(b_hits.get(), 1);

        channel.remove_subscriber(&b);
        assert_eq!(connection.close_calls(), 1);
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn resubscribe_discards_pending_close_and_opens_fresh_connection() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));
        let a = raw(&hits);
        channel.add_subscriber(Rc::clone(&a));
        let Some(first) = connector.last() else {
            panic!("connection requested");
        };
        first.open();
        channel.remove_subscriber(&a);

        channel.add_subscriber(raw(&hits));
        assert_eq!(connector.connection_count(), 2);
        assert_eq!(channel.state(), ChannelState::Connecting);

        // The first connection finishes closing only now.
        first.remote_close();
        assert_eq!(channel.state(), ChannelState::Connecting);
        assert!(first.deliver(Frame::from("late")).is_ok());
        assert_eq!(hits.get(), 0);

        let Some(second) = connector.last() else {
            panic!("second connection requested");
        };
        second.open();
        assert!(second.deliver(Frame::from("fresh")).is_ok());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn remote_close_keeps_subscribers() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));
        channel.add_subscriber(raw(&hits));
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        connection.open();
        connection.remote_close();

        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.subscriber_count(), 1);
        assert!(!channel.has_connection());
    }

    #[test]
    fn transport_error_reaches_every_on_error() {
        let (connector, _registry, channel) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Rc::clone(&seen);
            channel.add_subscriber(Rc::new(Subscriber::new(
                SubscriptionOptions::raw(|_| Ok(())).on_error(move |err| {
                    seen.borrow_mut().push(format!("{tag}:{err}"));
                    Ok(())
                }),
            )));
        }
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        connection.open();
        connection.fail(TransportError::Stream("reset by peer".to_string()));

        assert_eq!(channel.state(), ChannelState::Errored);
        assert!(!channel.has_connection());
        assert_eq!(connection.close_calls(), 1);
        assert_eq!(
            *seen.borrow(),
            vec!["a:stream error: reset by peer", "b:stream error: reset by peer"]
        );
    }

    #[test]
    fn handler_failure_closes_connection_and_errors_channel() {
        let (connector, _registry, channel) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for (tag, fail) in [("a", false), ("b", true), ("c", false)] {
            let seen = Rc::clone(&seen);
            channel.add_subscriber(Rc::new(Subscriber::new(SubscriptionOptions::raw(
                move |_| {
                    seen.borrow_mut().push(tag);
                    if fail {
                        anyhow::bail!("{tag} cannot handle this");
                    }
                    Ok(())
                },
            ))));
        }
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        connection.open();

        let result = connection.deliver(Frame::from("frame"));

        assert!(matches!(result, Err(DeliveryError::Handler { .. })));
        assert_eq!(*seen.borrow(), vec!["a", "b"]);
        assert_eq!(channel.state(), ChannelState::Errored);
        assert_eq!(connection.close_calls(), 1);
        assert_eq!(channel.subscriber_count(), 3);
        assert_eq!(channel.stats().failures, 1);
    }

    #[test]
    fn decode_failure_closes_connection_and_errors_channel() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        channel.add_subscriber(Rc::new(Subscriber::new(SubscriptionOptions::json(
            move |_| {
                counter.set(counter.get() + 1);
                Ok(())
            },
        ))));
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        connection.open();

        let result = connection.deliver(Frame::from("{bad"));

        assert!(matches!(result, Err(DeliveryError::Decode { .. })));
        assert_eq!(channel.state(), ChannelState::Errored);
        assert_eq!(connection.close_calls(), 1);
        assert!(!channel.has_connection());
        assert_eq!(hits.get(), 0);

        assert!(connection.deliver(Frame::from("{}")).is_ok());
        assert_eq!(hits.get(), 0);
        assert_eq!(channel.stats().failures, 1);
    }

    #[test]
    fn send_requires_open_connection() {
        let (connector, _registry, channel) = setup();
        assert!(matches!(
            channel.send(Frame::from("x")),
            Err(SubscriptionError::NotConnected(_))
        ));

        let hits = Rc::new(Cell::new(0));
        channel.add_subscriber(raw(&hits));
        assert!(matches!(
            channel.send(Frame::from("x")),
            Err(SubscriptionError::NotConnected(_))
        ));

        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        connection.open();
        assert!(channel.send(Frame::from("hello")).is_ok());
        assert_eq!(connection.sent(), vec![Frame::from("hello")]);
    }

    #[test]
    fn send_surfaces_transport_rejection() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));
        channel.add_subscriber(raw(&hits));
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        connection.open();
        connection.reject_sends();

        assert!(matches!(
            channel.send(Frame::from("x")),
            Err(SubscriptionError::Transport(TransportError::Closed))
        ));
    }

    #[test]
    fn connection_failing_during_connect_is_not_kept() {
        let connector = Rc::new(RecordingConnector::failing_on_connect());
        let registry = Registry::new(
            "ws://feeds.test:8080",
            Rc::<RecordingConnector>::clone(&connector),
        );
        let Ok(name) = ChannelName::new("camera") else {
            panic!("valid channel name");
        };
        let channel = registry.channel(&name);
        let hits = Rc::new(Cell::new(0));

        channel.add_subscriber(raw(&hits));

        assert_eq!(channel.state(), ChannelState::Errored);
        assert!(!channel.has_connection());
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        assert!(connection.close_calls() >= 1);
    }

    #[test]
    fn disconnect_then_reconnect_keeps_subscribers() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));
        channel.add_subscriber(raw(&hits));
        let Some(first) = connector.last() else {
            panic!("connection requested");
        };
        first.open();

        assert!(channel.disconnect());
        assert!(!channel.disconnect());
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.subscriber_count(), 1);

        assert!(channel.reconnect());
        assert!(!channel.reconnect());
        assert_eq!(connector.connection_count(), 2);
        assert_eq!(channel.stats().connections_opened, 2);
    }

    #[test]
    fn last_subscriber_leaving_errored_channel_closes_it() {
        let (connector, _registry, channel) = setup();
        let hits = Rc::new(Cell::new(0));
        let a = raw(&hits);
        channel.add_subscriber(Rc::clone(&a));
        let Some(connection) = connector.last() else {
            panic!("connection requested");
        };
        connection.fail(TransportError::Stream("refused".to_string()));
        assert_eq!(channel.state(), ChannelState::Errored);

        assert!(channel.remove_subscriber(&a));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(connection.close_calls(), 1);
    }

    #[test]
    fn reconnect_without_subscribers_does_nothing() {
        let (connector, _registry, channel) = setup();
        assert!(!channel.reconnect());
        assert_eq!(connector.connection_count(), 0);
        assert_eq!(channel.state(), ChannelState::Idle);
    }
}
