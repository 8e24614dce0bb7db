//! Subscriber-side operations of the real-time gateway: room membership,
//! sends and typing. Transport framing lives in the api crate.

use std::sync::Arc;
use std::time::Duration;

use nanoid::nanoid;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::delivery::DeliveryQueue;
use crate::endpoint::EndpointManager;
use crate::error::{RelayError, RelayResult};
use crate::permissions::{can_send, can_view};
use crate::protocol::{SendRequest, ServerEvent, TypingNotice, MAX_FILES, MAX_UPLOAD_BYTES};
use crate::rate_limit::{SlidingWindow, SEND_LIMIT, SEND_WINDOW};
use crate::registry::ConnectionRegistry;
use crate::rooms::{Outbound, RoomHub};
use crate::types::{Channel, Guild, Member, SessionUser, WebhookPayload};
use crate::upstream::Upstream;

pub const REPLY_CONTEXT_TIMEOUT: Duration = Duration::from_secs(2);
const REPLY_EXCERPT_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub send_limit: u32,
    pub send_window: Duration,
    pub reply_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            send_limit: SEND_LIMIT,
            send_window: SEND_WINDOW,
            reply_timeout: REPLY_CONTEXT_TIMEOUT,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

/// One authenticated subscriber connection.
pub struct Session {
    pub connection_id: String,
    pub user: SessionUser,
    outbound: Outbound,
    room: Option<String>,
    limiter: SlidingWindow,
    sends: mpsc::Sender<QueuedSend>,
}

impl Session {
    pub fn current_room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Counts a send against the connection's rolling limit.
    fn admit_send(&mut self) -> RelayResult<()> {
        if self.limiter.allow() {
            Ok(())
        } else {
            Err(RelayError::RateLimited)
        }
    }
}

struct QueuedSend {
    request: SendRequest,
    reply: oneshot::Sender<RelayResult<String>>,
}

/// Resolves once a submitted send has been posted or rejected.
pub struct PendingSend(oneshot::Receiver<RelayResult<String>>);

impl PendingSend {
    /// The posted message id.
    pub async fn outcome(self) -> RelayResult<String> {
        self.0
            .await
            .unwrap_or_else(|_| Err(RelayError::UpstreamUnavailable("send abandoned".to_string())))
    }
}

struct ChannelAccess {
    upstream: Arc<dyn Upstream>,
    guild: Guild,
    channel: Channel,
    member: Member,
}

pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    endpoints: Arc<EndpointManager>,
    delivery: DeliveryQueue,
    rooms: RoomHub,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        endpoints: Arc<EndpointManager>,
        delivery: DeliveryQueue,
        rooms: RoomHub,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            endpoints,
            delivery,
            rooms,
            config,
        }
    }

    /// Starts the session's send lane; sends from one session post in the
    /// order they were submitted.
    pub fn open_session(self: &Arc<Self>, user: SessionUser, outbound: Outbound) -> Session {
        let (sends, queue) = mpsc::channel(self.config.send_limit.max(1) as usize);
        tokio::spawn(self.clone().run_send_lane(user.clone(), queue));

        let session = Session {
            connection_id: nanoid!(),
            user,
            outbound,
            room: None,
            limiter: SlidingWindow::new(self.config.send_limit, self.config.send_window),
            sends,
        };
        info!(connection_id = %session.connection_id, user_id = %session.user.id, "subscriber connected");
        session
    }

    pub fn close_session(&self, session: Session) {
        if let Some(room) = session.room.as_deref() {
            self.rooms.leave(room, &session.connection_id);
        }
        info!(connection_id = %session.connection_id, user_id = %session.user.id, "subscriber disconnected");
    }

    /// Joins the channel's room, leaving any other room first.
    pub async fn join(&self, session: &mut Session, channel_id: &str) -> RelayResult<()> {
        let access = self.resolve(&session.user, channel_id).await?;
        if !can_view(&access.guild, &access.channel, Some(&access.member)) {
            return Err(RelayError::Forbidden("No access".to_string()));
        }
        if access.channel.nsfw && !session.user.age_verified {
            return Err(RelayError::RestrictedContentGate);
        }

        if let Some(previous) = session.room.take() {
            if previous != channel_id {
                self.rooms.leave(&previous, &session.connection_id);
            }
        }
        self.rooms
            .join(channel_id, &session.connection_id, session.outbound.clone());
        session.room = Some(channel_id.to_string());

        debug!(connection_id = %session.connection_id, %channel_id, "joined channel");
        Ok(())
    }

    pub fn leave(&self, session: &mut Session, channel_id: &str) {
        self.rooms.leave(channel_id, &session.connection_id);
        if session.room.as_deref() == Some(channel_id) {
            session.room = None;
        }
    }

    /// Rebroadcasts a typing indicator to the sender's current room.
    pub fn typing(&self, session: &Session, channel_id: &str) -> RelayResult<()> {
        if session.room.as_deref() != Some(channel_id) {
            return Err(RelayError::Forbidden("Not in channel".to_string()));
        }
        let event = ServerEvent::TypingStart(TypingNotice {
            channel_id: channel_id.to_string(),
            user_id: session.user.id.clone(),
            username: session.user.username.clone(),
            avatar: session.user.avatar.clone(),
        });
        match event.encode() {
            Ok(frame) => {
                self.rooms
                    .broadcast(channel_id, &frame, Some(&session.connection_id));
            }
            Err(err) => warn!(error = %err, "failed to encode typing event"),
        }
        Ok(())
    }

    /// Rate-limits and queues a send on the session's lane.
    pub fn submit(&self, session: &mut Session, request: SendRequest) -> RelayResult<PendingSend> {
        session.admit_send()?;
        let (reply, outcome) = oneshot::channel();
        session
            .sends
            .try_send(QueuedSend { request, reply })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => RelayError::RateLimited,
                mpsc::error::TrySendError::Closed(_) => {
                    RelayError::UpstreamUnavailable("session closed".to_string())
                }
            })?;
        Ok(PendingSend(outcome))
    }

    async fn run_send_lane(
        self: Arc<Self>,
        user: SessionUser,
        mut queue: mpsc::Receiver<QueuedSend>,
    ) {
        while let Some(QueuedSend { request, reply }) = queue.recv().await {
            let _ = reply.send(self.send(&user, request).await);
        }
        debug!(user_id = %user.id, "send lane drained");
    }

    /// Posts as `user` through the channel's proxy endpoint. Permissions are
    /// checked here regardless of room membership.
    async fn send(&self, user: &SessionUser, request: SendRequest) -> RelayResult<String> {
        if request.content.trim().is_empty() && request.files.is_empty() {
            return Err(RelayError::InvalidRequest("Message is empty".to_string()));
        }
        if request.files.len() > MAX_FILES {
            return Err(RelayError::InvalidRequest(format!(
                "At most {MAX_FILES} files per message"
            )));
        }
        let files = request
            .files
            .iter()
            .map(|file| file.decode(self.config.max_upload_bytes))
            .collect::<RelayResult<Vec<_>>>()?;

        let access = self.resolve(user, &request.channel_id).await?;
        if !can_send(&access.guild, &access.channel, Some(&access.member)) {
            return Err(RelayError::Forbidden("No access".to_string()));
        }
        if access.channel.nsfw && !user.age_verified {
            return Err(RelayError::RestrictedContentGate);
        }

        let mut content = request.content;
        if let Some(reply_to) = request.reply_to.as_deref() {
            if let Some(quote) = self
                .reply_context(access.upstream.as_ref(), &request.channel_id, reply_to)
                .await
            {
                content = format!("{quote}\n{content}");
            }
        }

        let payload = WebhookPayload {
            content: (!content.is_empty()).then_some(content),
            username: user.display_name().to_string(),
            avatar_url: user.avatar_url(),
            files,
        };

        let endpoints = self.endpoints.clone();
        let upstream = access.upstream;
        let channel = access.channel;
        let message = self
            .delivery
            .enqueue(&request.channel_id, move || async move {
                let webhook = endpoints.get_or_create(upstream.as_ref(), &channel).await?;
                upstream.execute_webhook(&webhook, payload).await
            })
            .await?;

        debug!(user_id = %user.id, channel_id = %message.channel_id, message_id = %message.id, "message relayed");
        Ok(message.id)
    }

    async fn resolve(&self, user: &SessionUser, channel_id: &str) -> RelayResult<ChannelAccess> {
        let (upstream, channel) = self
            .registry
            .find_channel(channel_id)
            .await
            .ok_or_else(|| RelayError::NotFound("Channel".to_string()))?;
        let guild = upstream
            .guild(&channel.guild_id)
            .await
            .ok_or_else(|| RelayError::NotFound("Guild".to_string()))?;

        let bot_member = upstream.self_member(&guild.id).await;
        if !can_view(&guild, &channel, bot_member.as_ref()) {
            return Err(RelayError::Forbidden("No access".to_string()));
        }

        let member = self
            .registry
            .member_cache()
            .fetch(upstream.as_ref(), &guild.id, &user.id)
            .await
            .ok_or_else(|| RelayError::Forbidden("Not a member of this server".to_string()))?;

        Ok(ChannelAccess {
            upstream,
            guild,
            channel,
            member,
        })
    }

    /// Quote line for a reply, or `None` when the referenced message can't be
    /// fetched in time.
    async fn reply_context(
        &self,
        upstream: &dyn Upstream,
        channel_id: &str,
        message_id: &str,
    ) -> Option<String> {
        let lookup = upstream.fetch_message(channel_id, message_id);
        match tokio::time::timeout(self.config.reply_timeout, lookup).await {
            Ok(Ok(message)) => {
                let author = message
                    .author
                    .as_ref()
                    .map(|a| a.global_name.clone().unwrap_or_else(|| a.username.clone()))
                    .unwrap_or_else(|| "unknown".to_string());
                Some(quote_reply(&author, &message.content))
            }
            Ok(Err(err)) => {
                debug!(%channel_id, %message_id, error = %err, "reply context unavailable");
                None
            }
            Err(_) => {
                warn!(%channel_id, %message_id, "reply context lookup timed out");
                None
            }
        }
    }
}

fn quote_reply(author: &str, content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default().trim();
    let excerpt = if first_line.is_empty() {
        "[attachment]".to_string()
    } else if first_line.chars().count() > REPLY_EXCERPT_CHARS {
        let cut: String = first_line.chars().take(REPLY_EXCERPT_CHARS).collect();
        format!("{cut}…")
    } else {
        first_line.to_string()
    };
    format!("> **{author}**: {excerpt}")
}
