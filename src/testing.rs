//! In-memory connector for unit tests.
//!
//! Records every connection it is asked for and lets a test drive the
//! transport side by hand: open, close, fail, deliver.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::domain::ChannelName;
use crate::error::{DeliveryError, TransportError};
use crate::transport::{Connection, ConnectionEvents, Connector, Frame};

#[derive(Debug, Default)]
pub(crate) struct RecordingConnector {
    connections: RefCell<Vec<Rc<FakeConnection>>>,
    fail_on_connect: bool,
}

impl RecordingConnector {
    /// A connector whose connections fail before `connect` returns.
    pub(crate) fn failing_on_connect() -> Self {
        Self {
            fail_on_connect: true,
            ..Self::default()
        }
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.borrow().len()
    }

    pub(crate) fn last(&self) -> Option<Rc<FakeConnection>> {
        self.connections.borrow().last().map(Rc::clone)
    }

    pub(crate) fn connections_for(&self, channel: &str) -> Vec<Rc<FakeConnection>> {
        self.connections
            .borrow()
            .iter()
            .filter(|c| c.channel.as_str() == channel)
            .map(Rc::clone)
            .collect()
    }
}

impl Connector for RecordingConnector {
    fn connect(
        &self,
        endpoint: &str,
        channel: &ChannelName,
        events: ConnectionEvents,
    ) -> Rc<dyn Connection> {
        let connection = Rc::new(FakeConnection {
            endpoint: endpoint.to_string(),
            channel: channel.clone(),
            events,
            sent: RefCell::default(),
            close_calls: Cell::new(0),
            reject: Cell::new(false),
        });
        self.connections.borrow_mut().push(Rc::clone(&connection));
        if self.fail_on_connect {
            connection.fail(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        connection
    }
}

#[derive(Debug)]
pub(crate) struct FakeConnection {
    endpoint: String,
    channel: ChannelName,
    events: ConnectionEvents,
    sent: RefCell<Vec<Frame>>,
    close_calls: Cell<usize>,
    reject: Cell<bool>,
}

impl FakeConnection {
    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub(crate) fn open(&self) {
        self.events.opened();
    }

    pub(crate) fn remote_close(&self) {
        self.events.closed();
    }

    pub(crate) fn fail(&self, error: TransportError) {
        self.events.failed(error);
    }

    pub(crate) fn deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.events.message(frame)
    }

    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.sent.borrow().clone()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.get()
    }

    pub(crate) fn reject_sends(&self) {
        self.reject.set(true);
    }
}

impl Connection for FakeConnection {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.reject.get() {
            return Err(TransportError::Closed);
        }
        self.sent.borrow_mut().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.set(self.close_calls.get() + 1);
    }
}
