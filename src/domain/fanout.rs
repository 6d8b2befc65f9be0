//! Delivery of one inbound event to every subscriber of a channel.
//!
//! Both routines iterate over a snapshot the channel took before calling
//! them, so handlers are free to subscribe or unsubscribe (themselves or
//! others) while a delivery is in progress. Subscribers removed mid-delivery
//! are skipped; everyone else in the snapshot is visited exactly once, in
//! subscription order.

use std::rc::Rc;

use serde_json::Value;

use super::state::ChannelCounters;
use super::subscriber::{MessageHandler, Subscriber};
use super::ChannelName;
use crate::error::{DeliveryError, TransportError};
use crate::transport::Frame;

/// JSON value decoded on first demand and shared by the rest of the
/// fan-out.
struct SharedDecode<'a> {
    frame: &'a Frame,
    value: Option<Value>,
}

impl<'a> SharedDecode<'a> {
    const fn new(frame: &'a Frame) -> Self {
        Self { frame, value: None }
    }

    fn get(&mut self, counters: &ChannelCounters) -> Result<&Value, serde_json::Error> {
        let value = match self.value.take() {
            Some(value) => value,
            None => {
                counters.record_decode();
                self.frame.decode_json()?
            }
        };
        Ok(self.value.insert(value))
    }
}

/// Delivers `frame` to `subscribers` in order.
///
/// The payload is parsed at most once, on the first JSON subscriber. The
/// first decode failure or handler error stops the fan-out: subscribers
/// after the failing one get nothing for this message.
pub(crate) fn deliver_message(
    channel: &ChannelName,
    subscribers: &[Rc<Subscriber>],
    frame: &Frame,
    counters: &ChannelCounters,
) -> Result<(), DeliveryError> {
    counters.record_message();
    let mut shared = SharedDecode::new(frame);

    for subscriber in subscribers {
        if !subscriber.is_active() {
            continue;
        }

        let outcome = match subscriber.handler() {
            MessageHandler::Raw(on_message) => on_message(frame),
            MessageHandler::Json(on_message) => {
                let value = shared
                    .get(counters)
                    .map_err(|source| DeliveryError::Decode {
                        channel: channel.clone(),
                        source,
                    })?;
                on_message(value)
            }
        };

        if let Err(error) = outcome {
            return Err(DeliveryError::Handler {
                channel: channel.clone(),
                subscriber: subscriber.id(),
                error,
            });
        }
        counters.record_delivery();
    }

    Ok(())
}

/// Reports a transport error to every subscriber that registered an
/// `on_error` callback.
///
/// Best effort: a failing callback is logged and the next one still runs.
/// Returns the number of callbacks that failed.
pub(crate) fn deliver_error(
    channel: &ChannelName,
    subscribers: &[Rc<Subscriber>],
    error: &TransportError,
) -> usize {
    let mut failed = 0usize;
    for subscriber in subscribers.iter().filter(|s| s.is_active()) {
        if let Err(err) = subscriber.notify_error(error) {
            failed = failed.saturating_add(1);
            tracing::warn!(
                channel = %channel,
                subscriber = %subscriber.id(),
                error = %err,
                "error callback failed"
            );
        }
    }
    failed
}
