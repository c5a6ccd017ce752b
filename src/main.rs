//! SpamGuard bot entry point.
//!
//! Thin bootstrap shell (spec §6): loads config, builds the per-tenant
//! runtime lazily on first reference, and routes gateway events into the
//! core. Grounded in the teacher's `main.rs` (`tracing_subscriber` init,
//! `dotenvy::dotenv`, `#[tokio::main]`) and `AppState`/`EventHandler` shape.

use std::collections::HashMap;
use std::sync::Arc;

use serenity::model::channel::Message;
use serenity::model::gateway::GatewayIntents;
use serenity::model::guild::Member;
use serenity::prelude::*;
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spamguard::config::{BootConfig, ConfigStore};
use spamguard::detector::{MessageSnapshot, SpamDetector};
use spamguard::discord::DiscordAdapter;
use spamguard::error::Result;
use spamguard::runtime::{IncomingMessage, SecurityRuntime};
use spamguard::verification::VerificationManager;

/// Per-tenant runtime bundle, built lazily the first time a guild is seen
/// (spec §3 "Lifecycle": a tenant's detector/verification state exists only
/// once referenced).
struct TenantRuntime {
    runtime: Arc<SecurityRuntime<DiscordAdapter>>,
    detector: Arc<SpamDetector>,
}

struct AppState {
    config_store: Arc<ConfigStore>,
    adapter: Arc<DiscordAdapter>,
    verification: Arc<VerificationManager<DiscordAdapter>>,
    tenants: RwLock<HashMap<u64, Arc<TenantRuntime>>>,
}

impl AppState {
    async fn tenant(&self, guild_id: u64) -> Arc<TenantRuntime> {
        if let Some(tenant) = self.tenants.read().await.get(&guild_id) {
            return tenant.clone();
        }
        let cfg = self.config_store.get_tenant_config(guild_id).await;
        let detector = Arc::new(SpamDetector::new(cfg));
        let runtime = Arc::new(SecurityRuntime::new(self.adapter.clone(), detector.clone()));
        let tenant = Arc::new(TenantRuntime { runtime, detector });
        self.tenants.write().await.insert(guild_id, tenant.clone());
        tenant
    }
}

struct SpamGuardHandler {
    state: Arc<AppState>,
}

#[serenity::async_trait]
impl EventHandler for SpamGuardHandler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else { return };
        let tenant = self.state.tenant(guild_id.get()).await;

        // Route pending-verification members through the code parser before
        // the spam path (spec §5 "Subsequent messages by pending users are
        // routed by a verify-code parser before the spam path").
        let cfg = tenant.detector.config().clone();
        if cfg.verify_enabled {
            let outcome = self.state.verification.verify_code(guild_id, msg.author.id, &msg.content, &cfg).await;
            match outcome {
                Err(spamguard::error::VerifyError::SessionMissing) => {}
                Ok((_, reply)) => {
                    let _ = msg.channel_id.say(&ctx.http, reply).await;
                    return;
                }
                Err(_) => return,
            }
        }

        let member_roles = msg
            .member
            .as_ref()
            .map(|m| m.roles.clone())
            .unwrap_or_default();
        let snapshot = MessageSnapshot {
            user_id: msg.author.id,
            content: msg.content.clone(),
            mention_count: msg.mentions.len() as u64,
            created_at: chrono::Utc::now(),
            account_created_at: msg.author.id.created_at().with_timezone(&chrono::Utc),
            joined_at: msg
                .member
                .as_ref()
                .and_then(|m| m.joined_at)
                .map(|t| t.with_timezone(&chrono::Utc)),
        };

        let incoming = IncomingMessage {
            guild_id,
            channel_id: msg.channel_id,
            message_id: msg.id.get(),
            author_roles: member_roles,
            snapshot,
        };
        let outcome = tenant.runtime.handle_message(incoming).await;
        if outcome.enforced {
            tracing::info!(guild_id = guild_id.get(), action = outcome.action.as_str(), score = outcome.score, "message enforced");
        }
    }

    async fn guild_member_addition(&self, ctx: Context, member: Member) {
        let guild_id = member.guild_id;
        let tenant = self.state.tenant(guild_id.get()).await;
        let cfg = tenant.detector.config().clone();
        let is_admin = member.permissions(&ctx.cache).map(|p| p.administrator()).unwrap_or(false);
        self.state
            .verification
            .clone()
            .handle_join(guild_id, member.user.id, member.user.bot, is_admin, &cfg)
            .await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("SpamGuard starting...");

    let boot_config = BootConfig::from_env()?;
    let config_store = Arc::new(ConfigStore::load(boot_config.config_path.clone()).await?);
    tracing::info!("Configuration loaded");

    let http = Arc::new(serenity::http::Http::new(&boot_config.discord_token));
    let adapter = Arc::new(DiscordAdapter::new(http));

    let verification = Arc::new(VerificationManager::new(adapter.clone()));

    let state = Arc::new(AppState {
        config_store,
        adapter,
        verification,
        tenants: RwLock::new(HashMap::new()),
    });

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::DIRECT_MESSAGES;

    let handler = SpamGuardHandler { state };

    let mut client = Client::builder(&boot_config.discord_token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| spamguard::error::SpamGuardError::DiscordApi(Box::new(e)))?;

    tracing::info!("Starting Discord client...");
    client.start().await.map_err(|e| spamguard::error::SpamGuardError::DiscordApi(Box::new(e)))?;

    Ok(())
}
