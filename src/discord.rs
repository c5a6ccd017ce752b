//! Concrete `PlatformAdapter` over `serenity::http::Http` (spec §6).
//!
//! Thin by design: each method is a single Discord REST call translated into
//! a `PlatformError`. No retry/backoff lives here — that's `verification.rs`'s
//! job for the calls that need it. Grounded in the teacher's `DiscordClient`
//! (`execute_action`) for the HTTP-call-to-error-mapping shape.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::channel::{ChannelType, PermissionOverwrite, PermissionOverwriteType};
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serenity::model::permissions::Permissions;
use serenity::model::Timestamp;

use crate::error::PlatformError;
use crate::runtime::PlatformAdapter;

fn map_err(e: serenity::Error) -> PlatformError {
    match &e {
        serenity::Error::Http(http_err) => match http_err.status_code() {
            Some(code) if code.as_u16() == 403 => PlatformError::Forbidden,
            _ => PlatformError::Http(http_err.to_string()),
        },
        other => PlatformError::Http(other.to_string()),
    }
}

/// Live Discord adapter. One instance is shared across every tenant guild.
pub struct DiscordAdapter {
    http: Arc<Http>,
}

impl DiscordAdapter {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PlatformAdapter for DiscordAdapter {
    async fn delete_message(&self, channel_id: ChannelId, message_id: u64) -> Result<(), PlatformError> {
        self.http
            .delete_message(channel_id, MessageId::new(message_id), Some("automated moderation"))
            .await
            .map_err(map_err)
    }

    async fn timeout_user(&self, guild_id: GuildId, user_id: UserId, minutes: u64) -> Result<(), PlatformError> {
        let until = Timestamp::from_unix_timestamp(chrono::Utc::now().timestamp() + (minutes as i64) * 60)
            .map_err(|e| PlatformError::Http(e.to_string()))?;
        let edit = serenity::builder::EditMember::new()
            .disable_communication_until(until.to_string())
            .audit_log_reason("automated moderation timeout");
        self.http.edit_member(guild_id, user_id, &edit, Some("automated moderation timeout")).await.map_err(map_err)?;
        Ok(())
    }

    async fn kick_user(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<(), PlatformError> {
        self.http.kick_member(guild_id, user_id, Some(reason)).await.map_err(map_err)
    }

    async fn ban_user(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<(), PlatformError> {
        self.http.ban_user(guild_id, user_id, 0, Some(reason)).await.map_err(map_err)
    }

    async fn send_channel_message(&self, channel_id: ChannelId, content: &str) -> Result<(), PlatformError> {
        self.http.send_message(channel_id, vec![], &serde_json::json!({ "content": content })).await.map_err(map_err)?;
        Ok(())
    }

    async fn send_direct_message(&self, user_id: UserId, content: &str) -> Result<(), PlatformError> {
        let dm_channel = self
            .http
            .create_private_channel(&serde_json::json!({ "recipient_id": user_id }))
            .await
            .map_err(map_err)?;
        self.http
            .send_message(dm_channel.id, vec![], &serde_json::json!({ "content": content }))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn add_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<(), PlatformError> {
        self.http.add_member_role(guild_id, user_id, role_id, Some("automated verification")).await.map_err(map_err)
    }

    async fn remove_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<(), PlatformError> {
        self.http.remove_member_role(guild_id, user_id, role_id, Some("automated verification")).await.map_err(map_err)
    }

    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> Result<Vec<RoleId>, PlatformError> {
        let member = self.http.get_member(guild_id, user_id).await.map_err(map_err)?;
        Ok(member.roles.into_iter().collect())
    }

    async fn find_or_create_role(&self, guild_id: GuildId, name: &str) -> Result<RoleId, PlatformError> {
        let roles = self.http.get_guild_roles(guild_id).await.map_err(map_err)?;
        if let Some(role) = roles.iter().find(|r| r.name == name) {
            return Ok(role.id);
        }
        let edit = serenity::builder::EditRole::new().name(name);
        let role = self.http.create_role(guild_id, &edit, Some("spamguard verification setup")).await.map_err(map_err)?;
        Ok(role.id)
    }

    async fn find_or_create_text_channel(&self, guild_id: GuildId, name: &str) -> Result<ChannelId, PlatformError> {
        let channels = self.http.get_channels(guild_id).await.map_err(map_err)?;
        if let Some(channel) = channels.iter().find(|c| c.name == name && c.kind == ChannelType::Text) {
            return Ok(channel.id);
        }
        let create = serenity::builder::CreateChannel::new(name).kind(ChannelType::Text);
        let channel = self.http.create_channel(guild_id, &create, Some("spamguard verification setup")).await.map_err(map_err)?;
        Ok(channel.id)
    }

    async fn list_text_channels(&self, guild_id: GuildId) -> Result<Vec<ChannelId>, PlatformError> {
        let channels = self.http.get_channels(guild_id).await.map_err(map_err)?;
        Ok(channels.into_iter().filter(|c| c.kind == ChannelType::Text).map(|c| c.id).collect())
    }

    async fn set_role_channel_overwrite(
        &self,
        channel_id: ChannelId,
        role_id: RoleId,
        view: bool,
        send: bool,
    ) -> Result<(), PlatformError> {
        let (allow, deny) = view_send_permissions(view, send);
        let overwrite = PermissionOverwrite { allow, deny, kind: PermissionOverwriteType::Role(role_id) };
        channel_id.create_permission(&self.http, overwrite).await.map_err(map_err)
    }

    async fn set_member_channel_overwrite(&self, channel_id: ChannelId, user_id: UserId, view: bool) -> Result<(), PlatformError> {
        let (allow, deny) = view_send_permissions(view, view);
        let overwrite = PermissionOverwrite { allow, deny, kind: PermissionOverwriteType::Member(user_id) };
        channel_id.create_permission(&self.http, overwrite).await.map_err(map_err)
    }

    async fn clear_member_channel_overwrite(&self, channel_id: ChannelId, user_id: UserId) -> Result<(), PlatformError> {
        channel_id
            .delete_permission(&self.http, PermissionOverwriteType::Member(user_id))
            .await
            .map_err(map_err)
    }
}

/// Two admin commands wired end-to-end, sketching how the full surface
/// (spec §6's `status`, `set key value`, `setting ...`, `security ...`)
/// would dispatch into `ConfigStore`. Registration and the rest of the
/// command tree are the platform shell's concern and are not built out here.
pub enum AdminCommand {
    Status,
    SetValue { key: String, value: String },
}

/// Handles one admin command, returning the ephemeral reply text (spec §6
/// "admin refusals and... outcomes are ephemeral, short, localized strings").
pub async fn handle_admin_command(
    store: &crate::config::ConfigStore,
    tenant_id: u64,
    command: AdminCommand,
) -> String {
    match command {
        AdminCommand::Status => {
            let cfg = store.get_tenant_config(tenant_id).await;
            format!(
                "verify: {} | score threshold: {} | ban: {}",
                cfg.verify_enabled, cfg.score_threshold, cfg.ban_enabled
            )
        }
        AdminCommand::SetValue { key, value } => match store.set_tenant_value(tenant_id, &key, &value).await {
            Ok(()) => format!("{key} updated"),
            Err(e) => format!("could not set {key}: {e}"),
        },
    }
}

fn view_send_permissions(view: bool, send: bool) -> (Permissions, Permissions) {
    let mut allow = Permissions::empty();
    let mut deny = Permissions::empty();
    if view {
        allow |= Permissions::VIEW_CHANNEL;
    } else {
        deny |= Permissions::VIEW_CHANNEL;
    }
    if send {
        allow |= Permissions::SEND_MESSAGES;
    } else {
        deny |= Permissions::SEND_MESSAGES;
    }
    (allow, deny)
}
