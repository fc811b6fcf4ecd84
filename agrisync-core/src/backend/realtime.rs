//! WebSocket change feed against the backend's realtime endpoint.
//!
//! Each channel gets its own socket: join the topic for the resource filter,
//! then pump `postgres_changes` frames into the consumer's queue until either
//! side goes away.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::protocol::{Frame, FrameKind};
use super::{FeedMessage, FeedTransport};
use crate::error::SyncError;
use crate::models::ResourceKey;

/// Timeout for the join reply.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSender = SplitSink<WsStream, Message>;
type WsReceiver = SplitStream<WsStream>;

#[derive(Debug)]
pub struct RealtimeTransport {
    base_url: String,
    api_key: String,
    heartbeat_interval: Duration,
}

impl RealtimeTransport {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Builds the WebSocket URL for the realtime endpoint.
    fn build_ws_url(&self) -> String {
        let base_url = if self.base_url.starts_with("http://") {
            self.base_url.replace("http://", "ws://")
        } else if self.base_url.starts_with("https://") {
            self.base_url.replace("https://", "wss://")
        } else if !self.base_url.starts_with("ws://") && !self.base_url.starts_with("wss://") {
            format!("wss://{}", self.base_url)
        } else {
            self.base_url.clone()
        };

        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            base_url.trim_end_matches('/'),
            urlencoding::encode(&self.api_key)
        )
    }

    async fn join(&self, key: &ResourceKey, tx: mpsc::Sender<FeedMessage>) -> Result<(), SyncError> {
        let failed = |reason: String| SyncError::SubscribeFailed {
            resource: key.resource.clone(),
            reason,
        };

        let (ws_stream, _) = connect_async(self.build_ws_url())
            .await
            .map_err(|e| failed(e.to_string()))?;
        let (mut sender, mut receiver) = ws_stream.split();

        let join_ref = uuid::Uuid::new_v4().to_string();
        send_frame(&mut sender, &Frame::join(key, &self.api_key, &join_ref))
            .await
            .map_err(|e| failed(e.to_string()))?;

        let topic = key.topic();
        let reply = timeout(JOIN_TIMEOUT, async {
            while let Some(msg_result) = receiver.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let frame = match Frame::decode(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(%topic, "Undecodable frame during join: {}", e);
                                continue;
                            }
                        };
                        if frame.topic != topic || frame.msg_ref.as_deref() != Some(join_ref.as_str())
                        {
                            continue;
                        }
                        match frame.kind() {
                            FrameKind::Reply { ok: true, .. } => return Ok(()),
                            FrameKind::Reply { ok: false, response } => {
                                return Err(failed(format!("join rejected: {}", response)));
                            }
                            FrameKind::Closed(reason) => return Err(failed(reason)),
                            _ => {}
                        }
                    }
                    Ok(Message::Close(_)) => {
                        return Err(failed("server closed connection during join".to_string()));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(failed(e.to_string())),
                }
            }
            Err(failed("connection closed before join completed".to_string()))
        })
        .await;

        match reply {
            Ok(result) => result?,
            Err(_) => return Err(failed("join timed out".to_string())),
        }

        tracing::debug!(%key, "Joined realtime channel");
        let pump = ChannelPump {
            key: key.clone(),
            heartbeat_interval: self.heartbeat_interval,
            next_ref: 1,
        };
        tokio::spawn(pump.run(sender, receiver, tx));
        Ok(())
    }
}

impl FeedTransport for RealtimeTransport {
    fn open<'a>(
        &'a self,
        key: &'a ResourceKey,
        tx: mpsc::Sender<FeedMessage>,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        Box::pin(self.join(key, tx))
    }
}

async fn send_frame(sender: &mut WsSender, frame: &Frame) -> Result<(), SyncError> {
    let text = frame
        .encode()
        .map_err(|e| SyncError::WebSocket(e.to_string()))?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| SyncError::WebSocket(e.to_string()))
}

/// Moves frames of one joined channel into its consumer queue.
struct ChannelPump {
    key: ResourceKey,
    heartbeat_interval: Duration,
    next_ref: u64,
}

impl ChannelPump {
    fn msg_ref(&mut self) -> String {
        let r = self.next_ref;
        self.next_ref += 1;
        r.to_string()
    }

    async fn run(mut self, mut sender: WsSender, mut receiver: WsReceiver, tx: mpsc::Sender<FeedMessage>) {
        let topic = self.key.topic();
        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let reason = loop {
            tokio::select! {
                _ = tx.closed() => {
                    self.leave(&mut sender).await;
                    return;
                }
                _ = heartbeat.tick() => {
                    let frame = Frame::heartbeat(&self.msg_ref());
                    if let Err(e) = send_frame(&mut sender, &frame).await {
                        break e.to_string();
                    }
                }
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match Frame::decode(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(key = %self.key, "Undecodable frame: {}", e);
                                continue;
                            }
                        };
                        if frame.topic != topic {
                            continue;
                        }
                        match frame.kind() {
                            FrameKind::Change(change) => {
                                if tx.send(FeedMessage::Change(change)).await.is_err() {
                                    self.leave(&mut sender).await;
                                    return;
                                }
                            }
                            FrameKind::Closed(reason) => break reason,
                            FrameKind::Reply { .. } | FrameKind::Other => {}
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break "socket closed".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                }
            }
        };

        tracing::debug!(key = %self.key, "Realtime channel ended: {}", reason);
        let _ = tx.send(FeedMessage::Dropped(reason)).await;
    }

    async fn leave(&mut self, sender: &mut WsSender) {
        let msg_ref = self.msg_ref();
        let frame = Frame::leave(&self.key, &msg_ref);
        let _ = send_frame(sender, &frame).await;
        let _ = sender.send(Message::Close(None)).await;
        tracing::debug!(key = %self.key, "Left realtime channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawChange, Scope};
    use serde_json::json;

    fn transport(url: &str) -> RealtimeTransport {
        RealtimeTransport::new(url.to_string(), "anon key".to_string())
    }

    #[test]
    fn test_build_ws_url() {
        assert_eq!(
            transport("https://abc.example.co").build_ws_url(),
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon%20key&vsn=1.0.0"
        );
        assert_eq!(
            transport("http://localhost:54321/").build_ws_url(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=anon%20key&vsn=1.0.0"
        );
        assert_eq!(
            transport("ws://localhost:54321").build_ws_url(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=anon%20key&vsn=1.0.0"
        );
        assert_eq!(
            transport("abc.example.co").build_ws_url(),
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon%20key&vsn=1.0.0"
        );
    }

    /// Accepts one socket, acknowledges the join, pushes one change and
    /// returns the events the client sent until it left.
    async fn serve_one_channel(listener: tokio::net::TcpListener) -> Vec<String> {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut events = Vec::new();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let frame = Frame::decode(text.as_str()).unwrap();
            events.push(frame.event.clone());

            match frame.event.as_str() {
                "phx_join" => {
                    let reply = Frame {
                        topic: frame.topic.clone(),
                        event: "phx_reply".to_string(),
                        payload: json!({"status": "ok", "response": {}}),
                        msg_ref: frame.msg_ref.clone(),
                    };
                    ws.send(Message::Text(reply.encode().unwrap().into()))
                        .await
                        .unwrap();

                    let change = RawChange::insert(
                        "farms",
                        json!({"id": "f1", "owner_id": "U1", "name": "Plot A"}),
                    );
                    let push = Frame {
                        topic: frame.topic,
                        event: "postgres_changes".to_string(),
                        payload: json!({ "data": change }),
                        msg_ref: None,
                    };
                    ws.send(Message::Text(push.encode().unwrap().into()))
                        .await
                        .unwrap();
                }
                "phx_leave" => break,
                _ => {}
            }
        }
        events
    }

    #[tokio::test]
    async fn test_forwards_changes_then_leaves_when_queue_closes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_one_channel(listener));

        let transport = transport(&format!("ws://{}", addr));
        let key = ResourceKey::new("farms", Scope::owner("U1"));
        let (tx, mut rx) = mpsc::channel(4);
        transport.open(&key, tx).await.unwrap();

        match rx.recv().await {
            Some(FeedMessage::Change(change)) => assert_eq!(change.resource, "farms"),
            other => panic!("Expected a change, got {:?}", other),
        }

        drop(rx);
        let events = timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(events, vec!["phx_join", "phx_leave"]);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_subscribe() {
        let transport = transport("ws://127.0.0.1:1");
        let key = ResourceKey::new("farms", Scope::owner("U1"));
        let (tx, _rx) = mpsc::channel(1);

        let err = transport.open(&key, tx).await.unwrap_err();
        assert!(matches!(err, SyncError::SubscribeFailed { .. }));
    }
}
