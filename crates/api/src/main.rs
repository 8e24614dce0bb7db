use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use clap::Parser;
use relay_core::config::Settings;
use relay_core::delivery::DeliveryQueue;
use relay_core::endpoint::EndpointManager;
use relay_core::gateway::{Gateway, GatewayConfig};
use relay_core::member_cache::MemberCache;
use relay_core::registry::ConnectionRegistry;
use relay_core::relay::EventRelay;
use relay_core::rooms::RoomHub;
use relay_db::PgEndpointStore;
use relay_discord::DiscordConnector;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod error;
mod middleware;
mod routes;
mod socket;
mod state;

use crate::middleware::auth::session_auth;
use crate::middleware::rate_limit::{replenish_period, SessionUserKeyExtractor};
use crate::middleware::request_id::request_id;
use crate::state::AppState;

const MEMBER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "relay-api")]
#[command(about = "Discord webhook relay server", version)]
struct Args {
    /// Overrides RELAY_API_BIND.
    #[arg(long)]
    bind: Option<String>,
    /// Extra dotenv file loaded before the environment is read.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

/// Registers the primary bot, then every bot stored through the admin API.
async fn register_bots(
    registry: &ConnectionRegistry,
    db: &sqlx::PgPool,
    primary_token: &str,
) -> anyhow::Result<String> {
    let identity = registry.connector().identify(primary_token).await?;
    registry.add(&identity.id, primary_token).await?;
    info!(bot_id = %identity.id, bot_name = %identity.username, "primary bot connected");

    for bot in relay_db::queries::bots::list(db).await? {
        if bot.bot_id == identity.id {
            continue;
        }
        match registry.add(&bot.bot_id, &bot.bot_token).await {
            Ok(_) => info!(bot_id = %bot.bot_id, "stored bot connected"),
            Err(err) => error!(bot_id = %bot.bot_id, error = %err, "stored bot failed to connect"),
        }
    }

    Ok(identity.id)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match &args.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let mut settings = Settings::from_env()?;
    if let Some(bind) = args.bind {
        settings.api_bind = bind;
    }
    if settings.admin_user_id.is_none() {
        warn!("ADMIN_USER_ID not set, bot administration disabled");
    }

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await?;
    relay_db::init_schema(&db).await?;

    let member_cache = Arc::new(MemberCache::new(
        settings.member_ttl,
        settings.member_fail_ttl,
    ));
    let _sweeper = member_cache.start_sweeper(MEMBER_SWEEP_INTERVAL);

    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(DiscordConnector::new()),
        member_cache.clone(),
    ));
    let primary_bot_id = register_bots(&registry, &db, &settings.discord_token).await?;

    let rooms = RoomHub::new();
    let relay = Arc::new(EventRelay::new(rooms.clone(), member_cache));
    for connection in registry.all().await {
        relay.attach(&connection.connection_id, &connection.upstream);
    }

    let endpoints = Arc::new(EndpointManager::new(Arc::new(PgEndpointStore::new(
        db.clone(),
    ))));
    let delivery = DeliveryQueue::new(settings.send_spacing, settings.queue_idle_grace);
    let gateway = Arc::new(Gateway::new(
        registry.clone(),
        endpoints,
        delivery,
        rooms,
        GatewayConfig {
            send_limit: settings.send_limit,
            send_window: settings.send_window,
            reply_timeout: settings.reply_timeout,
            max_upload_bytes: settings.max_upload_bytes,
        },
    ));

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(replenish_period(settings.api_rate_limit))
            .burst_size(settings.api_rate_limit.max(1))
            .key_extractor(SessionUserKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid api rate limit configuration"))?,
    );

    let addr: SocketAddr = settings.api_bind.parse()?;
    let state = AppState {
        db,
        settings: Arc::new(settings),
        registry,
        relay,
        gateway,
        primary_bot_id,
    };

    // session_auth runs first so the limiter can key on the user
    let api = routes::api_router(state.clone())
        .layer(GovernorLayer::new(governor_config))
        .layer(from_fn_with_state(state.clone(), session_auth));

    let ws = Router::new()
        .route("/ws", get(socket::subscribe_ws))
        .with_state(state.clone());

    let app = Router::new()
        .merge(routes::health_router(state))
        .merge(api)
        .merge(ws)
        .layer(from_fn(request_id));

    info!(%addr, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["relay-api"]).unwrap();
        assert!(args.bind.is_none());
        assert!(args.env_file.is_none());
    }

    #[test]
    fn test_args_with_all_options() {
        let args = Args::try_parse_from([
            "relay-api",
            "--bind",
            "127.0.0.1:4000",
            "--env-file",
            "/etc/relay.env",
        ])
        .unwrap();

        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:4000"));
        assert_eq!(args.env_file, Some(PathBuf::from("/etc/relay.env")));
    }
}
