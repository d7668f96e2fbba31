//! Per-connection send path with serialized frame delivery
//!
//! Packets can be sent to one peer from several tasks at once (its session's
//! reader, a game driver, another session acting through the game). To keep
//! frames from interleaving, every connection funnels outbound messages
//! through a channel drained by a single writer task that owns the sink half
//! of the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt};
use log::{debug, warn};
use shared::Packet;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;

/// The send half of one remote peer.
///
/// An open flag gates sends: once the peer is gone every `send` becomes a
/// no-op, so broadcasts during teardown never error out.
pub struct Connection {
    tx: UnboundedSender<Message>,
    open: AtomicBool,
}

impl Connection {
    /// Creates a connection and the receiver its writer task drains.
    pub fn new() -> (Arc<Connection>, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection {
            tx,
            open: AtomicBool::new(true),
        });
        (conn, rx)
    }

    /// Serializes the packet envelope and queues it for transmission.
    ///
    /// Failures are logged and swallowed; the reader loop observes the broken
    /// socket on its next read and runs session cleanup.
    pub fn send(&self, packet: &Packet) {
        if !self.is_open() {
            return;
        }
        let text = match serde_json::to_string(packet) {
            Ok(text) => text,
            Err(err) => {
                warn!("Failed to encode packet {:#04x}: {}", packet.id, err);
                return;
            }
        };
        if self.tx.send(Message::Text(text)).is_err() {
            debug!("Dropped packet {:#04x} for a closed connection", packet.id);
        }
    }

    /// Marks the connection closed; subsequent sends are no-ops.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Spawns the task that owns the sink and writes queued messages in order.
/// A write error closes the connection and ends the task.
pub fn spawn_writer<S>(conn: Arc<Connection>, mut rx: UnboundedReceiver<Message>, mut sink: S)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::fmt::Display,
{
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(err) = sink.send(message).await {
                warn!("Failed to write to connection: {}", err);
                conn.close();
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{server_id, ErrorData};

    #[test]
    fn test_send_queues_serialized_packet() {
        let (conn, mut rx) = Connection::new();
        conn.send(&shared::error_packet("nope"));

        let message = rx.try_recv().expect("expected a queued frame");
        let Message::Text(text) = message else {
            panic!("expected a text frame");
        };
        let packet: Packet = serde_json::from_str(&text).unwrap();
        assert_eq!(packet.id, server_id::ERROR);
        assert_eq!(packet.decode::<ErrorData>().unwrap().cause, "nope");
    }

    #[test]
    fn test_sends_preserve_order() {
        let (conn, mut rx) = Connection::new();
        conn.send(&shared::error_packet("first"));
        conn.send(&shared::error_packet("second"));

        for expected in ["first", "second"] {
            let Message::Text(text) = rx.try_recv().unwrap() else {
                panic!("expected a text frame");
            };
            let packet: Packet = serde_json::from_str(&text).unwrap();
            assert_eq!(packet.decode::<ErrorData>().unwrap().cause, expected);
        }
    }

    #[test]
    fn test_send_after_close_is_noop() {
        let (conn, mut rx) = Connection::new();
        assert!(conn.is_open());

        conn.close();
        assert!(!conn.is_open());

        conn.send(&shared::error_packet("late"));
        assert!(rx.try_recv().is_err());
    }
}
