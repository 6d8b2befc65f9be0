//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Each connection runs as a local task (`tokio::task::spawn_local`) on the
//! same thread as the registry, so it can report events straight into the
//! channel. The channel name travels as the `Sec-WebSocket-Protocol`
//! header, which lets one endpoint serve many feeds.
//!
//! [`WsConnector::connect`] must be called from inside a
//! [`tokio::task::LocalSet`].

use std::rc::Rc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::{Connection, ConnectionEvents, Connector, Frame};
use crate::domain::ChannelName;
use crate::error::TransportError;

/// Header carrying the channel name.
const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// Opens one WebSocket per channel.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector that gives up on connection attempts after
    /// `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        endpoint: &str,
        channel: &ChannelName,
        events: ConnectionEvents,
    ) -> Rc<dyn Connection> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let request = build_request(endpoint, channel);
        tokio::task::spawn_local(run_socket(
            request,
            self.connect_timeout,
            outbound_rx,
            events,
        ));
        Rc::new(WsConnection {
            channel: channel.clone(),
            outbound: outbound_tx,
        })
    }
}

/// Commands from the channel to its socket task.
#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Close,
}

/// Channel-side handle of a socket task.
#[derive(Debug)]
struct WsConnection {
    channel: ChannelName,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection for WsConnection {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.outbound.send(Outbound::Close).is_err() {
            tracing::trace!(channel = %self.channel, "socket task already finished");
        }
    }
}

/// Builds the upgrade request with the channel as sub-protocol.
fn build_request(endpoint: &str, channel: &ChannelName) -> Result<Request, TransportError> {
    let invalid = |reason: String| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;
    let protocol = HeaderValue::from_str(channel.as_str()).map_err(|e| invalid(e.to_string()))?;
    request.headers_mut().insert(SUBPROTOCOL_HEADER, protocol);
    Ok(request)
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::text(text),
            Frame::Binary(bytes) => Self::binary(bytes),
        }
    }
}

/// Connects, then pumps frames both ways until either side closes.
async fn run_socket(
    request: Result<Request, TransportError>,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: ConnectionEvents,
) {
    let request = match request {
        Ok(request) => request,
        Err(err) => {
            events.failed(err);
            return;
        }
    };
    let endpoint = request.uri().to_string();

    let attempt = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request));
    let stream = match attempt.await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(err)) => {
            events.failed(TransportError::Connect {
                endpoint,
                reason: err.to_string(),
            });
            return;
        }
        Err(_) => {
            events.failed(TransportError::Timeout {
                timeout_ms: u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
            });
            return;
        }
    };

    tracing::debug!(%endpoint, connection = %events.connection_id(), "websocket connected");
    events.opened();
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(frame)) => {
                    if let Err(err) = sink.send(Message::from(frame)).await {
                        events.failed(TransportError::Stream(err.to_string()));
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(err) = sink.close().await {
                        tracing::debug!(%endpoint, error = %err, "websocket close handshake failed");
                    }
                    events.closed();
                    return;
                }
            },
            inbound = source.next() => match inbound {
                // A delivery failure has already closed this connection on the
                // channel side; the queued close ends the loop.
                Some(Ok(Message::Text(text))) => {
                    if let Err(err) = events.message(Frame::Text(text.as_str().to_string())) {
                        tracing::warn!(%endpoint, error = %err, "inbound text frame rejected");
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if let Err(err) = events.message(Frame::Binary(bytes.to_vec())) {
                        tracing::warn!(%endpoint, error = %err, "inbound binary frame rejected");
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    events.closed();
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    events.failed(TransportError::Stream(err.to_string()));
                    return;
                }
            },
        }
    }
}
