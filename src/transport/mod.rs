//! Object-level messaging on top of a client's outbound frame queue

pub mod dispatch;

pub use dispatch::{decode_packet, HandlerId, PacketDispatcher};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::PlayerId;

/// Frames queued per connection before the peer counts as not draining
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Invoked with the client id and a reason when a send fails
pub type SendErrorCallback = Box<dyn FnMut(PlayerId, &str) + Send>;

/// Sending half of one client connection
pub struct ClientTransport {
    client_id: PlayerId,
    outbound: mpsc::Sender<String>,
    on_send_error: Option<SendErrorCallback>,
    broken: bool,
}

impl ClientTransport {
    pub fn new(client_id: PlayerId, outbound: mpsc::Sender<String>) -> Self {
        Self {
            client_id,
            outbound,
            on_send_error: None,
            broken: false,
        }
    }

    pub fn client_id(&self) -> PlayerId {
        self.client_id
    }

    /// Failures are reported here instead of returned once a callback is set
    pub fn set_send_error_callback(&mut self, callback: SendErrorCallback) {
        self.on_send_error = Some(callback);
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Serialize `obj` to JSON and queue it
    pub fn send_object<T: Serialize>(&mut self, obj: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(obj).map_err(TransportError::Encode)?;
        self.send_text(text)
    }

    /// Queue an already serialized frame
    pub fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.broken {
            // Already reported; the owner is removing this client
            return match self.on_send_error {
                Some(_) => Ok(()),
                None => Err(TransportError::SendFailed {
                    client_id: self.client_id,
                    reason: "connection already failed",
                }),
            };
        }
        let reason = match self.outbound.try_send(text) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => "outbound queue full",
            Err(TrySendError::Closed(_)) => "connection closed",
        };
        self.broken = true;

        match self.on_send_error.as_mut() {
            Some(callback) => {
                callback(self.client_id, reason);
                Ok(())
            }
            None => Err(TransportError::SendFailed {
                client_id: self.client_id,
                reason,
            }),
        }
    }
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to encode packet: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Malformed packet: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Send to client {client_id} failed: {reason}")]
    SendFailed {
        client_id: PlayerId,
        reason: &'static str,
    },

    #[error("Packet handler {0} not found")]
    HandlerNotFound(HandlerId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Packet;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn queued_objects_arrive_as_json_text() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut transport = ClientTransport::new(1, tx);

        assert_ok!(transport.send_object(&Packet::game_over()));
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"GAME_OVER"}"#);
    }

    #[test]
    fn closed_peer_without_callback_is_an_error() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let mut transport = ClientTransport::new(3, tx);

        let err = assert_err!(transport.send_object(&Packet::start()));
        assert!(matches!(err, TransportError::SendFailed { client_id: 3, .. }));
        assert!(transport.is_broken());
    }

    #[test]
    fn closed_peer_with_callback_reports_reason() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();

        let mut transport = ClientTransport::new(9, tx);
        transport.set_send_error_callback(Box::new(move |id, reason| {
            sink.lock().push((id, reason.to_string()));
        }));

        assert_ok!(transport.send_object(&Packet::start()));
        assert_eq!(*reports.lock(), vec![(9, "connection closed".to_string())]);
    }

    #[test]
    fn send_error_callback_fires_once_per_connection() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let reports = Arc::new(Mutex::new(0));
        let sink = reports.clone();

        let mut transport = ClientTransport::new(5, tx);
        transport.set_send_error_callback(Box::new(move |_, _| *sink.lock() += 1));

        assert_ok!(transport.send_object(&Packet::start()));
        assert_ok!(transport.send_object(&Packet::game_over()));
        assert_ok!(transport.send_text("later".to_string()));
        assert_eq!(*reports.lock(), 1);
        assert!(transport.is_broken());
    }

    #[test]
    fn full_queue_counts_as_failure() {
        let (tx, _rx) = mpsc::channel(1);
        let mut transport = ClientTransport::new(4, tx);

        assert_ok!(transport.send_text("a".to_string()));
        let err = assert_err!(transport.send_text("b".to_string()));
        assert!(matches!(err, TransportError::SendFailed { reason: "outbound queue full", .. }));
    }
}
