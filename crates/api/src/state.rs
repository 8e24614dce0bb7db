use std::sync::Arc;

use relay_core::config::Settings;
use relay_core::gateway::Gateway;
use relay_core::registry::ConnectionRegistry;
use relay_core::relay::EventRelay;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub relay: Arc<EventRelay>,
    pub gateway: Arc<Gateway>,
    /// Connection id of the bot configured through `DISCORD_TOKEN`.
    pub primary_bot_id: String,
}

#[derive(Debug, Clone)]
pub struct RequestId(pub String);
