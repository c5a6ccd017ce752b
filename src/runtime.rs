//! SecurityRuntime: the message-handling orchestrator (spec §4.5).
//!
//! Generalizes the teacher's concrete `DiscordClient` action queue
//! (`discord.rs`) into a `PlatformAdapter` trait so the orchestration logic
//! is testable against an in-memory fake, without a live `serenity::http::Http`.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};

use crate::detector::{MessageSnapshot, SpamDetector};
use crate::error::{PlatformError, StepOutcome};
use crate::events::EventLogger;
use crate::ledger::EnforcementAction;
use crate::reasons::ReasonTag;

/// Capabilities the core needs from the chat platform (spec §6). One method
/// per listed capability; errors are always converted to `StepOutcome` by
/// the caller, never propagated further (spec §7).
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn delete_message(&self, channel_id: ChannelId, message_id: u64) -> Result<(), PlatformError>;
    async fn timeout_user(&self, guild_id: GuildId, user_id: UserId, minutes: u64) -> Result<(), PlatformError>;
    async fn kick_user(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<(), PlatformError>;
    async fn ban_user(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<(), PlatformError>;
    async fn send_channel_message(&self, channel_id: ChannelId, content: &str) -> Result<(), PlatformError>;
    async fn send_direct_message(&self, user_id: UserId, content: &str) -> Result<(), PlatformError>;
    async fn add_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<(), PlatformError>;
    async fn remove_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<(), PlatformError>;
    /// Returns the member's current role IDs, used for exemption checks.
    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> Result<Vec<RoleId>, PlatformError>;

    /// Finds a role by name, creating it if absent (spec §6 "create/find role").
    async fn find_or_create_role(&self, guild_id: GuildId, name: &str) -> Result<RoleId, PlatformError>;
    /// Finds a text channel by name, creating it if absent (spec §6 "create/find text channel").
    async fn find_or_create_text_channel(&self, guild_id: GuildId, name: &str) -> Result<ChannelId, PlatformError>;
    /// Lists every text channel in the guild, used for the isolation fan-out.
    async fn list_text_channels(&self, guild_id: GuildId) -> Result<Vec<ChannelId>, PlatformError>;
    /// Sets a channel-level permission overwrite for a role (spec §6).
    async fn set_role_channel_overwrite(
        &self,
        channel_id: ChannelId,
        role_id: RoleId,
        view: bool,
        send: bool,
    ) -> Result<(), PlatformError>;
    /// Sets a channel-level permission overwrite for a specific member.
    async fn set_member_channel_overwrite(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        view: bool,
    ) -> Result<(), PlatformError>;
    /// Clears a member-scoped overwrite, reverting to role-based permissions.
    async fn clear_member_channel_overwrite(&self, channel_id: ChannelId, user_id: UserId) -> Result<(), PlatformError>;
}

fn outcome_of(result: &Result<(), PlatformError>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Ok,
        Err(e) => StepOutcome::from(e),
    }
}

/// Per-incoming-message context the adapter shell collects before handing
/// off to the core (spec §3 MessageSnapshot plus routing metadata not owned
/// by the scoring engine).
pub struct IncomingMessage {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: u64,
    pub author_roles: Vec<RoleId>,
    pub snapshot: MessageSnapshot,
}

/// Outcome of one `handle_message` call, useful for tests and logging.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleOutcome {
    pub exempt: bool,
    pub score: i64,
    pub reasons: Vec<ReasonTag>,
    pub enforced: bool,
    pub action: EnforcementAction,
    pub delete_outcome: StepOutcome,
    pub action_outcome: StepOutcome,
}

impl HandleOutcome {
    fn exempted() -> Self {
        Self {
            exempt: true,
            score: 0,
            reasons: Vec::new(),
            enforced: false,
            action: EnforcementAction::None,
            delete_outcome: StepOutcome::NotAttempted,
            action_outcome: StepOutcome::NotAttempted,
        }
    }
}

/// Orchestrates exemption checks, scoring, escalation, enforcement, and
/// event logging for one tenant's message stream (spec §4.5). Holds the same
/// `SpamDetector` (and therefore the same `GuildConfig` snapshot) used for
/// scoring, so the enforcement gate always compares against the config that
/// actually produced the score (spec §5: detector rebuilt on config reload).
pub struct SecurityRuntime<A: PlatformAdapter> {
    adapter: Arc<A>,
    detector: Arc<SpamDetector>,
    events: EventLogger,
}

impl<A: PlatformAdapter> SecurityRuntime<A> {
    pub fn new(adapter: Arc<A>, detector: Arc<SpamDetector>) -> Self {
        Self { adapter, detector, events: EventLogger::new() }
    }

    /// Spec §4.5 `handleMessage`.
    pub async fn handle_message(&self, msg: IncomingMessage) -> HandleOutcome {
        let tenant_id = msg.guild_id.get();
        let cfg = self.detector.config().clone();

        // Step 1: exemption check.
        if cfg.ignore_channel_ids.contains(&msg.channel_id.get())
            || cfg.whitelist_user_ids.contains(&msg.snapshot.user_id.get())
            || msg.author_roles.iter().any(|r| {
                cfg.ignore_role_ids.contains(&r.get()) || cfg.whitelist_role_ids.contains(&r.get())
            })
        {
            return HandleOutcome::exempted();
        }

        // Step 2: score.
        let result = self.detector.score(&msg.snapshot).await;

        // Step 3: enforcement gate.
        let forced = result.reasons.iter().any(ReasonTag::forces_enforcement);
        let should_enforce = result.score >= cfg.score_threshold || forced;

        if !should_enforce {
            return HandleOutcome {
                exempt: false,
                score: result.score,
                reasons: result.reasons,
                enforced: false,
                action: EnforcementAction::None,
                delete_outcome: StepOutcome::NotAttempted,
                action_outcome: StepOutcome::NotAttempted,
            };
        }

        // Step 4: escalation decision.
        let now = msg.snapshot.created_at;
        let decision = self.detector.decide(msg.snapshot.user_id, now).await;

        // Step 5: delete the offending message.
        let delete_result = self.adapter.delete_message(msg.channel_id, msg.message_id).await;
        let delete_outcome = outcome_of(&delete_result);

        // Step 6: perform the enforcement action.
        let action_result = self.apply_action(&msg, &cfg, decision.action).await;
        let action_outcome = outcome_of(&action_result);

        // Step 7: emit a SEC event.
        let event = self.events.build_sec_event(
            now,
            tenant_id,
            msg.snapshot.user_id,
            result.score,
            decision.offense_count,
            result.reasons.clone(),
            decision.action,
            delete_outcome,
            action_outcome,
            msg.channel_id,
            &msg.snapshot.content,
        );
        if let Some(log_channel) = cfg.log_channel_id.map(ChannelId::new) {
            let _ = self.adapter.send_channel_message(log_channel, &render_sec_event(&event)).await;
        }

        HandleOutcome {
            exempt: false,
            score: result.score,
            reasons: result.reasons,
            enforced: true,
            action: decision.action,
            delete_outcome,
            action_outcome,
        }
    }

    async fn apply_action(
        &self,
        msg: &IncomingMessage,
        cfg: &crate::config::GuildConfig,
        action: EnforcementAction,
    ) -> Result<(), PlatformError> {
        match action {
            EnforcementAction::None => Ok(()),
            EnforcementAction::Warn => {
                let mention = format!("<@{}> please review the server rules.", msg.snapshot.user_id.get());
                self.adapter.send_channel_message(msg.channel_id, &mention).await
            }
            EnforcementAction::Timeout => {
                self.adapter.timeout_user(msg.guild_id, msg.snapshot.user_id, cfg.timeout_minutes).await
            }
            EnforcementAction::Ban => {
                self.adapter.ban_user(msg.guild_id, msg.snapshot.user_id, "automated enforcement").await
            }
        }
    }
}

fn render_sec_event(event: &crate::events::SecEvent) -> String {
    let reasons: Vec<&str> = event.reasons.iter().map(|r| r.localized()).collect();
    format!(
        "[{}] user {} score={} offenses={} action={} reasons=[{}]",
        event.event_id,
        event.user_id,
        event.score,
        event.offense_count,
        event.action.as_str(),
        reasons.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuildConfig;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAdapter {
        deleted: Mutex<Vec<(ChannelId, u64)>>,
        sent: Mutex<Vec<(ChannelId, String)>>,
        timeouts: Mutex<Vec<(UserId, u64)>>,
        bans: Mutex<Vec<UserId>>,
    }

    #[async_trait]
    impl PlatformAdapter for FakeAdapter {
        async fn delete_message(&self, channel_id: ChannelId, message_id: u64) -> Result<(), PlatformError> {
            self.deleted.lock().unwrap().push((channel_id, message_id));
            Ok(())
        }
        async fn timeout_user(&self, _guild_id: GuildId, user_id: UserId, minutes: u64) -> Result<(), PlatformError> {
            self.timeouts.lock().unwrap().push((user_id, minutes));
            Ok(())
        }
        async fn kick_user(&self, _guild_id: GuildId, _user_id: UserId, _reason: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn ban_user(&self, _guild_id: GuildId, user_id: UserId, _reason: &str) -> Result<(), PlatformError> {
            self.bans.lock().unwrap().push(user_id);
            Ok(())
        }
        async fn send_channel_message(&self, channel_id: ChannelId, content: &str) -> Result<(), PlatformError> {
            self.sent.lock().unwrap().push((channel_id, content.to_string()));
            Ok(())
        }
        async fn send_direct_message(&self, _user_id: UserId, _content: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn add_role(&self, _guild_id: GuildId, _user_id: UserId, _role_id: RoleId) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn remove_role(&self, _guild_id: GuildId, _user_id: UserId, _role_id: RoleId) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn member_roles(&self, _guild_id: GuildId, _user_id: UserId) -> Result<Vec<RoleId>, PlatformError> {
            Ok(Vec::new())
        }
        async fn find_or_create_role(&self, _guild_id: GuildId, _name: &str) -> Result<RoleId, PlatformError> {
            Ok(RoleId::new(1))
        }
        async fn find_or_create_text_channel(&self, _guild_id: GuildId, _name: &str) -> Result<ChannelId, PlatformError> {
            Ok(ChannelId::new(1))
        }
        async fn list_text_channels(&self, _guild_id: GuildId) -> Result<Vec<ChannelId>, PlatformError> {
            Ok(Vec::new())
        }
        async fn set_role_channel_overwrite(
            &self,
            _channel_id: ChannelId,
            _role_id: RoleId,
            _view: bool,
            _send: bool,
        ) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn set_member_channel_overwrite(
            &self,
            _channel_id: ChannelId,
            _user_id: UserId,
            _view: bool,
        ) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn clear_member_channel_overwrite(&self, _channel_id: ChannelId, _user_id: UserId) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    fn snapshot(content: &str) -> MessageSnapshot {
        MessageSnapshot {
            user_id: UserId::new(7),
            content: content.to_string(),
            mention_count: 0,
            created_at: Utc::now(),
            account_created_at: Utc::now() - ChronoDuration::days(365),
            joined_at: None,
        }
    }

    #[tokio::test]
    async fn exempt_channel_short_circuits() {
        let mut cfg = GuildConfig::default();
        cfg.ignore_channel_ids = vec![55];
        let detector = Arc::new(SpamDetector::new(cfg.clone()));
        let adapter = Arc::new(FakeAdapter::default());
        let runtime = SecurityRuntime::new(adapter.clone(), detector);

        let msg = IncomingMessage {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(55),
            message_id: 1,
            author_roles: vec![],
            snapshot: snapshot("spam spam spam"),
        };
        let outcome = runtime.handle_message(msg).await;
        assert!(outcome.exempt);
        assert!(adapter.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn below_threshold_does_not_enforce() {
        let mut cfg = GuildConfig::default();
        cfg.score_threshold = 1000;
        let detector = Arc::new(SpamDetector::new(cfg));
        let adapter = Arc::new(FakeAdapter::default());
        let runtime = SecurityRuntime::new(adapter.clone(), detector);

        let msg = IncomingMessage {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(2),
            message_id: 1,
            author_roles: vec![],
            snapshot: snapshot("hello"),
        };
        let outcome = runtime.handle_message(msg).await;
        assert!(!outcome.enforced);
        assert!(adapter.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn phishing_enforces_regardless_of_threshold() {
        let mut cfg = GuildConfig::default();
        cfg.score_threshold = 1000;
        cfg.phishing_domains = vec!["bad.example".to_string()];
        cfg.warning_threshold = 1;
        let detector = Arc::new(SpamDetector::new(cfg));
        let adapter = Arc::new(FakeAdapter::default());
        let runtime = SecurityRuntime::new(adapter.clone(), detector);

        let msg = IncomingMessage {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(2),
            message_id: 9,
            author_roles: vec![],
            snapshot: snapshot("visit https://bad.example now"),
        };
        let outcome = runtime.handle_message(msg).await;
        assert!(outcome.enforced);
        assert_eq!(outcome.action, EnforcementAction::Warn);
        assert_eq!(adapter.deleted.lock().unwrap().len(), 1);
    }
}
