use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::{RelayError, RelayResult};
use crate::member_cache::MemberCache;
use crate::types::{Channel, Guild, Member};
use crate::upstream::{Connector, Upstream};

pub struct RegisteredConnection {
    pub connection_id: String,
    pub upstream: Arc<dyn Upstream>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub connection_id: String,
    pub name: String,
    pub guild_count: usize,
}

/// Owns every upstream bot connection.
///
/// Lookups scan connections in registration order and return the first match.
/// When two bots share a guild the earlier registration owns it; this is a
/// known limitation, not a resolution policy.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    cache: Arc<MemberCache>,
    connections: RwLock<Vec<Arc<RegisteredConnection>>>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn Connector>, cache: Arc<MemberCache>) -> Self {
        Self {
            connector,
            cache,
            connections: RwLock::new(Vec::new()),
        }
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn member_cache(&self) -> &Arc<MemberCache> {
        &self.cache
    }

    pub async fn add(&self, connection_id: &str, credential: &str) -> RelayResult<Arc<dyn Upstream>> {
        if self.contains(connection_id).await {
            return Err(RelayError::DuplicateRegistration(connection_id.to_string()));
        }

        let upstream = self.connector.connect(credential).await?;

        let mut connections = self.connections.write().await;
        // another add may have won while we were logging in
        if connections.iter().any(|c| c.connection_id == connection_id) {
            drop(connections);
            upstream.shutdown().await;
            return Err(RelayError::DuplicateRegistration(connection_id.to_string()));
        }

        let guild_count = upstream.guilds().await.len();
        connections.push(Arc::new(RegisteredConnection {
            connection_id: connection_id.to_string(),
            upstream: upstream.clone(),
        }));

        info!(
            %connection_id,
            bot = %upstream.identity().username,
            guild_count,
            "connection registered"
        );
        Ok(upstream)
    }

    pub async fn remove(&self, connection_id: &str) {
        let removed = {
            let mut connections = self.connections.write().await;
            let index = connections
                .iter()
                .position(|c| c.connection_id == connection_id);
            index.map(|i| connections.remove(i))
        };

        if let Some(conn) = removed {
            info!(%connection_id, bot = %conn.upstream.identity().username, "removing connection");
            conn.upstream.shutdown().await;
        }
    }

    pub async fn contains(&self, connection_id: &str) -> bool {
        self.connections
            .read()
            .await
            .iter()
            .any(|c| c.connection_id == connection_id)
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<dyn Upstream>> {
        self.connections
            .read()
            .await
            .iter()
            .find(|c| c.connection_id == connection_id)
            .map(|c| c.upstream.clone())
    }

    pub async fn all(&self) -> Vec<Arc<RegisteredConnection>> {
        self.connections.read().await.clone()
    }

    pub async fn list(&self) -> Vec<ConnectionSummary> {
        let connections = self.all().await;
        let mut summaries = Vec::with_capacity(connections.len());
        for conn in connections {
            summaries.push(ConnectionSummary {
                connection_id: conn.connection_id.clone(),
                name: conn.upstream.identity().username.clone(),
                guild_count: conn.upstream.guilds().await.len(),
            });
        }
        summaries
    }

    pub async fn find_guild(&self, guild_id: &str) -> Option<(Arc<dyn Upstream>, Guild)> {
        for conn in self.all().await {
            if let Some(guild) = conn.upstream.guild(guild_id).await {
                return Some((conn.upstream.clone(), guild));
            }
        }
        None
    }

    pub async fn find_channel(&self, channel_id: &str) -> Option<(Arc<dyn Upstream>, Channel)> {
        for conn in self.all().await {
            if let Some(channel) = conn.upstream.channel(channel_id).await {
                return Some((conn.upstream.clone(), channel));
            }
        }
        None
    }

    pub async fn fetch_member(&self, guild_id: &str, user_id: &str) -> Option<Member> {
        let (upstream, _) = self.find_guild(guild_id).await?;
        self.cache.fetch(upstream.as_ref(), guild_id, user_id).await
    }

    pub fn invalidate_member(&self, guild_id: &str, user_id: &str) {
        self.cache.invalidate(guild_id, user_id);
    }
}
