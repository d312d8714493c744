//! WebSocket push channel with fixed-interval reconnect and heartbeat.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use cemai_protocol::{
    PushEvent, PushFrame, ProtocolError, WS_HEARTBEAT_INTERVAL_MS, WS_MAX_RECONNECT_ATTEMPTS,
    WS_RECONNECT_INTERVAL_MS,
};

use crate::{GatewayError, GatewayResult};

/// Derive `<ws|wss>://host/ws` from the REST base url.
pub fn ws_url_from_base(base_url: &str) -> GatewayResult<String> {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(GatewayError::InvalidUrl(base_url.to_string()));
    };
    Ok(format!("{ws}/ws"))
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl PushConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_interval: Duration::from_millis(WS_RECONNECT_INTERVAL_MS),
            max_reconnect_attempts: WS_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: Duration::from_millis(WS_HEARTBEAT_INTERVAL_MS),
        }
    }
}

/// What the push task reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum PushSignal {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted; the task has stopped.
    GaveUp,
    Event(PushEvent),
}

enum SessionEnd {
    Shutdown,
    Lost,
}

pub struct PushClient {
    config: PushConfig,
    signals: mpsc::Sender<PushSignal>,
}

impl PushClient {
    pub fn new(config: PushConfig, signals: mpsc::Sender<PushSignal>) -> Self {
        Self { config, signals }
    }

    async fn emit(&self, signal: PushSignal) -> bool {
        self.signals.send(signal).await.is_ok()
    }

    /// Connect and pump frames until shutdown, the consumer goes away, or
    /// reconnect attempts are exhausted. Flipping `shutdown` to `true` is a
    /// manual disconnect and stops reconnection.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempts: u32 = 0;
        if !self.emit(PushSignal::Connecting).await {
            return;
        }

        loop {
            if *shutdown.borrow() {
                return;
            }

            match tokio_tungstenite::connect_async(self.config.url.as_str()).await {
                Ok((stream, _response)) => {
                    attempts = 0;
                    tracing::info!(url = %self.config.url, "push channel connected");
                    if !self.emit(PushSignal::Connected).await {
                        return;
                    }
                    match self.pump(stream, &mut shutdown).await {
                        SessionEnd::Shutdown => return,
                        SessionEnd::Lost => {
                            tracing::warn!(url = %self.config.url, "push channel lost");
                            if !self.emit(PushSignal::Disconnected).await {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.config.url, error = %e, "push connect failed");
                }
            }

            attempts += 1;
            if attempts > self.config.max_reconnect_attempts {
                tracing::error!(
                    attempts = self.config.max_reconnect_attempts,
                    "push channel giving up"
                );
                self.emit(PushSignal::GaveUp).await;
                return;
            }
            if !self.emit(PushSignal::Reconnecting { attempt: attempts }).await {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn pump<S>(&self, stream: S, shutdown: &mut watch::Receiver<bool>) -> SessionEnd
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = stream.split();
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                }
                _ = heartbeat.tick() => {
                    let ping = match serde_json::to_string(&PushFrame::ping()) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode heartbeat");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(ping)).await {
                        tracing::warn!(error = %e, "heartbeat failed");
                        return SessionEnd::Lost;
                    }
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = decode_text(&text) {
                                if !self.emit(PushSignal::Event(event)).await {
                                    return SessionEnd::Shutdown;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "push read error");
                            return SessionEnd::Lost;
                        }
                    }
                }
            }
        }
    }
}

/// Decode one text frame. Heartbeats, unknown types and malformed frames
/// yield `None`.
pub fn decode_text(text: &str) -> Option<PushEvent> {
    let frame = match PushFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "malformed push frame");
            return None;
        }
    };
    if frame.is_heartbeat() {
        return None;
    }
    match frame.decode() {
        Ok(event) => Some(event),
        Err(ProtocolError::UnknownPushType(kind)) => {
            tracing::debug!(%kind, "skipping unknown push message");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "undecodable push message");
            None
        }
    }
}
