//! WebSocket signaling backend. Envelopes travel as JSON text frames; a
//! writer task drains the outbound queue and a reader task maps inbound
//! frames to bus events. Closing drops the queue's sender so the writer
//! drains everything already enqueued (the leave notice in particular) and
//! emits a Close frame before the socket goes away; only the reader is cut
//! off immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use signal_bus::{BusConnection, BusError, BusEvent, BusMessage, BusResult};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::SignalingConnector;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    Join { topic: String },
    Message { destination: String, msg: Value },
}

pub struct WsConnector;

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn BusConnection>, BusError> {
        let conn = WsConnection::connect(address).await?;
        Ok(conn)
    }
}

pub struct WsConnection {
    out_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<WireFrame>>>,
    events_tx: mpsc::UnboundedSender<BusEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<BusEvent>>>,
    reader: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WsConnection {
    pub async fn connect(address: &str) -> Result<Arc<Self>, BusError> {
        let url = Url::parse(address)
            .map_err(|err| BusError::Transport(format!("invalid signaling address: {err}")))?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| BusError::Transport(format!("websocket connect failed: {err}")))?;
        tracing::debug!(address, "signaling websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireFrame>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<BusEvent>();
        let _ = events_tx.send(BusEvent::Connected);

        // Detached on purpose: once the sender is dropped the loop drains the
        // remaining frames and says goodbye cleanly.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let Ok(text) = serde_json::to_string(&frame) else {
                    continue;
                };
                if ws_write.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        let reader_events = events_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<WireFrame>(&text) {
                            Ok(WireFrame::Message { destination, msg }) => {
                                let event = BusEvent::Message(BusMessage { destination, msg });
                                if reader_events.send(event).is_err() {
                                    break;
                                }
                            }
                            Ok(WireFrame::Join { .. }) => {}
                            Err(err) => {
                                tracing::debug!(error = %err, "ignoring malformed frame");
                            }
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = reader_events.send(BusEvent::Disconnected);
        });

        Ok(Arc::new(Self {
            out_tx: parking_lot::Mutex::new(Some(out_tx)),
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            reader: parking_lot::Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        }))
    }

    fn send_frame(&self, frame: WireFrame) -> BusResult<()> {
        let guard = self.out_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(BusError::Closed);
        };
        tx.send(frame).map_err(|_| BusError::Closed)
    }
}

impl BusConnection for WsConnection {
    fn join_topic(&self, topic: &str) -> BusResult<()> {
        self.send_frame(WireFrame::Join {
            topic: topic.to_string(),
        })
    }

    fn publish(&self, message: BusMessage) -> BusResult<()> {
        self.send_frame(WireFrame::Message {
            destination: message.destination,
            msg: message.msg,
        })
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<BusEvent>> {
        self.events_rx.lock().take()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.out_tx.lock().take();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let _ = self.events_tx.send(BusEvent::Disconnected);
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_serialize_with_snake_case_tags() {
        let frame = WireFrame::Message {
            destination: "aa-vch-1".into(),
            msg: json!({"m": "doPing"}),
        };
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(value["type"], "message");
        assert_eq!(value["destination"], "aa-vch-1");
        let join = serde_json::to_value(WireFrame::Join {
            topic: "aa-vch-1".into(),
        })
        .expect("serialize");
        assert_eq!(join["type"], "join");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_flushes_queued_frames_before_the_socket_drops() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake");
            let mut texts = Vec::new();
            while let Some(frame) = ws.next().await {
                match frame {
                    Ok(Message::Text(text)) => texts.push(text.to_string()),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            texts
        });

        let conn = WsConnection::connect(&format!("ws://{addr}"))
            .await
            .expect("connect");
        conn.publish(BusMessage {
            destination: "aa-vch-1".into(),
            msg: json!({"m": "disconnectng", "c": "client-a", "u": "alice"}),
        })
        .expect("publish");
        conn.close();
        assert!(conn
            .publish(BusMessage {
                destination: "aa-vch-1".into(),
                msg: json!({"m": "doPing"}),
            })
            .is_err());

        let texts = server.await.expect("server task");
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("disconnectng"));
    }
}
