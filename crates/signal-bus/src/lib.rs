use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// One signaling envelope: a destination topic plus an opaque JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub destination: String,
    pub msg: Value,
}

/// Connection-level events delivered to the single consumer of a connection.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Connected,
    Disconnected,
    Message(BusMessage),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// A single pub/sub connection to a signaling fabric. Each connection has one
/// consumer; events are handed out once via `take_events`.
pub trait BusConnection: Send + Sync {
    fn join_topic(&self, topic: &str) -> BusResult<()>;
    fn publish(&self, message: BusMessage) -> BusResult<()>;
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BusEvent>>;
    fn close(&self);
}

/// In-memory hub for tests and single-process multi-client setups. Every
/// connection joined to a topic receives every message published to it,
/// including its own: loop suppression is the subscriber's job.
#[derive(Debug, Default)]
pub struct LocalHub {
    topics: parking_lot::RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }

    pub fn connect(self: &Arc<Self>) -> Arc<LocalConnection> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(BusEvent::Connected);
        Arc::new(LocalConnection {
            hub: self.clone(),
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            tasks: parking_lot::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct LocalConnection {
    hub: Arc<LocalHub>,
    events_tx: mpsc::UnboundedSender<BusEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<BusEvent>>>,
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    closed: AtomicBool,
}

impl BusConnection for LocalConnection {
    fn join_topic(&self, topic: &str) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let mut rx = self.hub.sender_for(topic).subscribe();
        let events_tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if events_tx.send(BusEvent::Message(message)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    fn publish(&self, message: BusMessage) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        // A topic with no subscribers swallows the message, like any pub/sub.
        let _ = self.hub.sender_for(&message.destination).send(message);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BusEvent>> {
        self.events_rx.lock().take()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let _ = self.events_tx.send(BusEvent::Disconnected);
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<BusEvent>) -> BusMessage {
        loop {
            match rx.recv().await.expect("event") {
                BusEvent::Message(message) => return message,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn hub_round_trip() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let mut events = b.take_events().expect("events");
        b.join_topic("room").expect("join");
        a.publish(BusMessage {
            destination: "room".into(),
            msg: json!({"m": "doPing"}),
        })
        .expect("publish");
        let message = next_message(&mut events).await;
        assert_eq!(message.destination, "room");
        assert_eq!(message.msg["m"], "doPing");
    }

    #[tokio::test]
    async fn sender_receives_its_own_messages() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let mut events = a.take_events().expect("events");
        a.join_topic("room").expect("join");
        a.publish(BusMessage {
            destination: "room".into(),
            msg: json!({"m": "doPing"}),
        })
        .expect("publish");
        let message = next_message(&mut events).await;
        assert_eq!(message.msg["m"], "doPing");
    }

    #[tokio::test]
    async fn closed_connection_rejects_publish() {
        let hub = LocalHub::new();
        let a = hub.connect();
        a.close();
        let err = a
            .publish(BusMessage {
                destination: "room".into(),
                msg: json!({}),
            })
            .unwrap_err();
        assert!(matches!(err, BusError::Closed));
    }

    #[tokio::test]
    async fn events_are_taken_once() {
        let hub = LocalHub::new();
        let a = hub.connect();
        assert!(a.take_events().is_some());
        assert!(a.take_events().is_none());
    }
}
