use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::member_cache::MemberCache;
use crate::protocol::{RelayMessage, ServerEvent, TypingNotice};
use crate::rooms::RoomHub;
use crate::types::{color_hex, UpstreamEvent, UpstreamMessage};
use crate::upstream::Upstream;

/// Shapes an upstream message into the wire format. Returns `None` for
/// messages outside a guild or missing the fields a client needs.
pub fn shape_message(msg: &UpstreamMessage) -> Option<RelayMessage> {
    let guild_id = msg.guild_id.clone()?;
    let author = msg.author.as_ref()?;
    let created_at = msg.created_at?;

    Some(RelayMessage {
        id: msg.id.clone(),
        channel_id: msg.channel_id.clone(),
        guild_id,
        author_id: author.id.clone(),
        author_username: author.username.clone(),
        author_avatar: author.avatar.clone(),
        author_bot: author.bot,
        author_color: msg.author_color.and_then(color_hex),
        global_name: author.global_name.clone().filter(|name| !name.is_empty()),
        content: msg.content.clone(),
        attachments: msg.attachments.clone(),
        embeds: msg.embeds.clone(),
        reference_id: msg.reference_id.clone(),
        edited_at: msg.edited_at.map(|t| t.timestamp_millis()),
        created_at: created_at.timestamp_millis(),
        is_webhook: msg.webhook_id.is_some(),
    })
}

/// Maps an upstream event to the room it belongs to and the event to push.
pub fn route(event: &UpstreamEvent) -> Option<(String, ServerEvent)> {
    match event {
        UpstreamEvent::MessageCreate(msg) => {
            shape_message(msg).map(|m| (m.channel_id.clone(), ServerEvent::MessageCreate(m)))
        }
        UpstreamEvent::MessageUpdate(msg) => {
            shape_message(msg).map(|m| (m.channel_id.clone(), ServerEvent::MessageUpdate(m)))
        }
        UpstreamEvent::MessageDelete {
            id,
            channel_id,
            guild_id,
        } => {
            guild_id.as_ref()?;
            Some((
                channel_id.clone(),
                ServerEvent::MessageDelete {
                    id: id.clone(),
                    channel_id: channel_id.clone(),
                },
            ))
        }
        UpstreamEvent::TypingStart {
            channel_id,
            guild_id,
            user,
        } => {
            guild_id.as_ref()?;
            let user = user.as_ref()?;
            Some((
                channel_id.clone(),
                ServerEvent::TypingStart(TypingNotice {
                    channel_id: channel_id.clone(),
                    user_id: user.id.clone(),
                    username: user.username.clone(),
                    avatar: user.avatar.clone(),
                }),
            ))
        }
        UpstreamEvent::MemberChanged { .. } => None,
    }
}

/// Republishes each connection's upstream events to the matching room.
pub struct EventRelay {
    rooms: RoomHub,
    cache: Arc<MemberCache>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl EventRelay {
    pub fn new(rooms: RoomHub, cache: Arc<MemberCache>) -> Self {
        Self {
            rooms,
            cache,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn attach(&self, connection_id: &str, upstream: &Arc<dyn Upstream>) {
        let mut events = upstream.subscribe();
        let rooms = self.rooms.clone();
        let cache = self.cache.clone();
        let id = connection_id.to_string();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => forward(&rooms, &cache, &event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(connection_id = %id, skipped, "relay lagging, events skipped");
                    }
                    Err(RecvError::Closed) => {
                        debug!(connection_id = %id, "upstream event stream closed");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.tasks().insert(connection_id.to_string(), task) {
            previous.abort();
        }
        info!(%connection_id, "event relay attached");
    }

    pub fn detach(&self, connection_id: &str) {
        if let Some(task) = self.tasks().remove(connection_id) {
            task.abort();
            info!(%connection_id, "event relay detached");
        }
    }

    pub fn attached(&self) -> usize {
        self.tasks().len()
    }
}

impl Drop for EventRelay {
    fn drop(&mut self) {
        for (_, task) in self.tasks().drain() {
            task.abort();
        }
    }
}

fn forward(rooms: &RoomHub, cache: &MemberCache, event: &UpstreamEvent) {
    if let UpstreamEvent::MemberChanged { guild_id, user_id } = event {
        cache.invalidate(guild_id, user_id);
        return;
    }

    let Some((room, server_event)) = route(event) else {
        debug!(?event, "dropping event");
        return;
    };

    match server_event.encode() {
        Ok(frame) => {
            rooms.broadcast(&room, &frame, None);
        }
        Err(err) => warn!(error = %err, "failed to encode relay event"),
    }
}
