//! Discord gateway websocket: turns `MESSAGE_CREATE` events into
//! [`InboundMessage`]s.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::traits::InboundMessage;
use crate::sheet::fields::AttachmentRef;

const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Why a gateway session ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Reconnect(String),
}

pub struct DiscordGateway {
    token: String,
    url: String,
}

impl DiscordGateway {
    pub fn new(token: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: url.into(),
        }
    }

    /// Forward inbound messages to `tx` until `shutdown` fires or the
    /// receiver is dropped, reconnecting with backoff on failures.
    pub async fn run(&self, tx: mpsc::Sender<InboundMessage>, shutdown: CancellationToken) {
        let mut backoff = RECONNECT_MIN;
        loop {
            match self.session(&tx, &shutdown).await {
                Ok(SessionEnd::Shutdown) => return,
                Ok(SessionEnd::Reconnect(reason)) => {
                    tracing::info!(reason = %reason, "Gateway asked to reconnect");
                    backoff = RECONNECT_MIN;
                }
                Err(e) => {
                    tracing::warn!(error = %e, backoff_secs = backoff.as_secs(), "Gateway session failed");
                }
            }
            if tx.is_closed() {
                return;
            }
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(RECONNECT_MAX);
        }
    }

    async fn session(
        &self,
        tx: &mpsc::Sender<InboundMessage>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<SessionEnd> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to gateway: {e}"))?;
        tracing::info!("Connected to Discord gateway");

        let mut seq: Option<u64> = None;
        let mut heartbeat: Option<tokio::time::Interval> = None;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    let _ = ws.send(WsMessage::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                () = next_beat(&mut heartbeat) => {
                    let payload = json!({ "op": OP_HEARTBEAT, "d": seq });
                    ws.send(WsMessage::Text(payload.to_string().into())).await?;
                }
                frame = ws.next() => {
                    let text = match frame {
                        None => return Ok(SessionEnd::Reconnect("stream ended".into())),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            return Ok(SessionEnd::Reconnect(format!("closed: {reason}")));
                        }
                        Some(Ok(_)) => continue,
                    };
                    let event: Value = match serde_json::from_str(text.as_str()) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::debug!(error = %e, "Ignoring undecodable gateway frame");
                            continue;
                        }
                    };
                    if let Some(s) = event.get("s").and_then(Value::as_u64) {
                        seq = Some(s);
                    }
                    match event.get("op").and_then(Value::as_u64) {
                        Some(OP_HELLO) => {
                            let interval_ms = event
                                .pointer("/d/heartbeat_interval")
                                .and_then(Value::as_u64)
                                .unwrap_or(41_250);
                            let period = Duration::from_millis(interval_ms);
                            heartbeat = Some(tokio::time::interval_at(
                                tokio::time::Instant::now() + period,
                                period,
                            ));
                            ws.send(WsMessage::Text(self.identify().to_string().into())).await?;
                        }
                        Some(OP_DISPATCH) => {
                            if event.get("t").and_then(Value::as_str) == Some("MESSAGE_CREATE") {
                                if let Some(msg) = event.get("d").and_then(parse_message_create) {
                                    if tx.send(msg).await.is_err() {
                                        return Ok(SessionEnd::Shutdown);
                                    }
                                }
                            }
                        }
                        Some(OP_HEARTBEAT) => {
                            let payload = json!({ "op": OP_HEARTBEAT, "d": seq });
                            ws.send(WsMessage::Text(payload.to_string().into())).await?;
                        }
                        Some(OP_RECONNECT) => return Ok(SessionEnd::Reconnect("op 7".into())),
                        Some(OP_INVALID_SESSION) => {
                            return Ok(SessionEnd::Reconnect("invalid session".into()))
                        }
                        Some(OP_HEARTBEAT_ACK) => tracing::trace!("Heartbeat acknowledged"),
                        _ => {}
                    }
                }
            }
        }
    }

    fn identify(&self) -> Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "charsheet",
                    "device": "charsheet",
                },
            },
        })
    }
}

/// Resolves on the next heartbeat tick; never before HELLO.
async fn next_beat(heartbeat: &mut Option<tokio::time::Interval>) {
    match heartbeat.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Convert a `MESSAGE_CREATE` payload. Returns `None` when required ids
/// are missing.
pub fn parse_message_create(d: &Value) -> Option<InboundMessage> {
    let str_field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);

    let channel_id = str_field(d, "channel_id")?;
    let message_id = str_field(d, "id")?;
    let author = d.get("author")?;
    let author_id = str_field(author, "id")?;
    let author_is_bot = author.get("bot").and_then(Value::as_bool).unwrap_or(false);

    let attachments = d
        .get("attachments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|a| {
                    Some(AttachmentRef {
                        url: str_field(a, "url")?,
                        filename: str_field(a, "filename").unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(InboundMessage {
        guild_id: str_field(d, "guild_id"),
        channel_id,
        message_id,
        author_id,
        author_is_bot,
        content: str_field(d, "content").unwrap_or_default(),
        attachments,
    })
}
