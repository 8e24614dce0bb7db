use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use backoff::{backoff::Backoff, ExponentialBackoff};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use relay_core::types::UpstreamEvent;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::cache::GuildCache;

pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | GUILD_MESSAGE_TYPING | MESSAGE_CONTENT
pub const INTENTS: u64 = (1 << 0) | (1 << 1) | (1 << 9) | (1 << 11) | (1 << 15);

mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Deserialize)]
struct Frame {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Default)]
struct Resume {
    session_id: Option<String>,
    resume_url: Option<String>,
    seq: Option<u64>,
}

enum Exit {
    Reconnect,
    Fatal(u16),
}

pub(crate) struct GatewayContext {
    pub url: String,
    pub token: String,
    pub cache: Arc<GuildCache>,
    pub events: broadcast::Sender<UpstreamEvent>,
    pub ready: watch::Sender<bool>,
}

/// Close codes after which reconnecting cannot succeed (bad token, bad intents).
fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

/// Close codes that invalidate the session and require a fresh IDENTIFY.
fn forgets_session(code: u16) -> bool {
    matches!(code, 4007 | 4009)
}

fn identify_payload(token: &str) -> Value {
    json!({
        "token": token,
        "intents": INTENTS,
        "properties": {
            "os": std::env::consts::OS,
            "browser": "relay",
            "device": "relay",
        },
    })
}

/// Keeps one gateway session alive until the task is aborted or Discord
/// closes with a fatal code.
pub(crate) async fn run(ctx: GatewayContext) {
    let mut backoff = ExponentialBackoff {
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut resume = Resume::default();

    loop {
        match connect_and_run(&ctx, &mut resume).await {
            Ok(Exit::Reconnect) => {
                info!("gateway session ended");
                backoff.reset();
            }
            Ok(Exit::Fatal(code)) => {
                error!(code, "gateway closed with a fatal code, giving up");
                return;
            }
            Err(err) => {
                error!(error = %err, "gateway error");
            }
        }

        let delay = backoff
            .next_backoff()
            .unwrap_or_else(|| Duration::from_secs(60));
        info!(?delay, "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

async fn send(write: &mut WsSink, op: u8, d: Value) -> anyhow::Result<()> {
    write
        .send(Message::Text(json!({ "op": op, "d": d }).to_string()))
        .await?;
    Ok(())
}

async fn connect_and_run(ctx: &GatewayContext, resume: &mut Resume) -> anyhow::Result<Exit> {
    let url = match (&resume.session_id, &resume.resume_url) {
        (Some(_), Some(resume_url)) => format!("{resume_url}/?v=10&encoding=json"),
        _ => ctx.url.clone(),
    };
    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let hello: Frame = match read.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str(&text)?,
        Some(Ok(other)) => bail!("unexpected first gateway frame: {other:?}"),
        Some(Err(err)) => return Err(err.into()),
        None => return Ok(Exit::Reconnect),
    };
    if hello.op != op::HELLO {
        bail!("expected HELLO, got op {}", hello.op);
    }
    let interval = hello
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("HELLO without heartbeat_interval"))?;

    match (&resume.session_id, resume.seq) {
        (Some(session_id), Some(seq)) => {
            debug!(%session_id, seq, "resuming gateway session");
            let payload = json!({ "token": ctx.token, "session_id": session_id, "seq": seq });
            send(&mut write, op::RESUME, payload).await?;
        }
        _ => send(&mut write, op::IDENTIFY, identify_payload(&ctx.token)).await?,
    }

    let mut heartbeat = tokio::time::interval(Duration::from_millis(interval));
    heartbeat.tick().await;
    let mut acked = true;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if !acked {
                    warn!("heartbeat not acknowledged");
                    return Ok(Exit::Reconnect);
                }
                acked = false;
                send(&mut write, op::HEARTBEAT, json!(resume.seq)).await?;
            }
            message = read.next() => {
                let Some(message) = message else {
                    return Ok(Exit::Reconnect);
                };
                match message? {
                    Message::Text(text) => {
                        let frame: Frame = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!(error = %err, "invalid gateway frame");
                                continue;
                            }
                        };
                        match frame.op {
                            op::DISPATCH => {
                                if frame.s.is_some() {
                                    resume.seq = frame.s;
                                }
                                if let Some(event) = frame.t {
                                    dispatch(ctx, resume, &event, frame.d).await;
                                }
                            }
                            op::HEARTBEAT => send(&mut write, op::HEARTBEAT, json!(resume.seq)).await?,
                            op::HEARTBEAT_ACK => acked = true,
                            op::RECONNECT => {
                                info!("gateway requested reconnect");
                                return Ok(Exit::Reconnect);
                            }
                            op::INVALID_SESSION => {
                                if !frame.d.as_bool().unwrap_or(false) {
                                    *resume = Resume::default();
                                }
                                warn!("gateway session invalidated");
                                tokio::time::sleep(Duration::from_secs(2)).await;
                                return Ok(Exit::Reconnect);
                            }
                            other => debug!(op = other, "unhandled gateway op"),
                        }
                    }
                    Message::Close(frame) => {
                        let code = frame.map(|frame| u16::from(frame.code));
                        if let Some(code) = code {
                            if is_fatal_close(code) {
                                return Ok(Exit::Fatal(code));
                            }
                            if forgets_session(code) {
                                *resume = Resume::default();
                            }
                        }
                        info!(?code, "gateway closed");
                        return Ok(Exit::Reconnect);
                    }
                    Message::Ping(payload) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn dispatch(ctx: &GatewayContext, resume: &mut Resume, event: &str, data: Value) {
    if event == "READY" {
        resume.session_id = data
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        resume.resume_url = data
            .get("resume_gateway_url")
            .and_then(Value::as_str)
            .map(str::to_string);
        info!(session_id = ?resume.session_id, "gateway ready");
    }

    if let Some(mapped) = ctx.cache.apply(event, data).await {
        // no subscribers is fine
        let _ = ctx.events.send(mapped);
    }

    if !*ctx.ready.borrow() && ctx.cache.is_settled().await {
        ctx.ready.send_replace(true);
    }
}
