//! Per-member admission-verification state machine (spec §4.6).
//!
//! Session storage mirrors the teacher's `Arc<RwLock<HashMap<..>>>` pattern in
//! `raid.rs`/`rules.rs`; the expiry timer is a single cancellable
//! `tokio::task::JoinHandle` per session (spec §9: "favor cancellable
//! single-shot tasks"), generalized from the teacher's polling
//! `spawn_background_tasks` intervals in `main.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::{GuildConfig, VerifyFailAction};
use crate::error::{PlatformError, StepOutcome, VerifyError};
use crate::events::{EventLogger, VerPhase};
use crate::runtime::PlatformAdapter;

const TRANSIENT_RETRY_BACKOFF: StdDuration = StdDuration::from_secs(120);
const UNVERIFIED_ROLE_NAME: &str = "Unverified";
const VERIFIED_ROLE_NAME: &str = "Verified";
const VERIFY_CHANNEL_NAME: &str = "verify";

/// A member's in-flight code challenge (spec §3 VerificationSession).
#[derive(Debug, Clone)]
pub struct VerificationSession {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: u64,
}

struct SessionEntry {
    session: VerificationSession,
    timer: JoinHandle<()>,
}

fn draw_code() -> String {
    let n: u32 = rand::rngs::OsRng.gen_range(0..=999_999);
    format!("{n:06}")
}

/// Retries a fallible platform call once after a transient-error back-off
/// (spec §9: "one retry after a 120-second back-off on transient platform
/// errors"). Only `PlatformError::Http` is treated as transient.
async fn apply_with_retry<F, Fut>(backoff: StdDuration, op: F) -> Result<(), PlatformError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), PlatformError>>,
{
    match op().await {
        Ok(()) => Ok(()),
        Err(PlatformError::Http(_)) => {
            tokio::time::sleep(backoff).await;
            op().await
        }
        Err(e) => Err(e),
    }
}

/// Drives join-time isolation, code challenge, and timeout/kick escalation
/// for unverified members (spec §4.6). One instance serves every tenant;
/// sessions are keyed by `(GuildId, UserId)`.
pub struct VerificationManager<A: PlatformAdapter + 'static> {
    adapter: Arc<A>,
    sessions: RwLock<HashMap<(GuildId, UserId), SessionEntry>>,
    events: EventLogger,
    backoff: StdDuration,
}

impl<A: PlatformAdapter + 'static> VerificationManager<A> {
    pub fn new(adapter: Arc<A>) -> Self {
        Self {
            adapter,
            sessions: RwLock::new(HashMap::new()),
            events: EventLogger::new(),
            backoff: TRANSIENT_RETRY_BACKOFF,
        }
    }

    /// Overrides the transient-retry back-off; production code always uses
    /// the spec's 120 seconds, tests use a short duration.
    pub fn with_backoff(mut self, backoff: StdDuration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Spec §4.6 `handleJoin`.
    pub async fn handle_join(
        self: Arc<Self>,
        guild_id: GuildId,
        user_id: UserId,
        is_bot: bool,
        is_admin: bool,
        cfg: &GuildConfig,
    ) -> Option<crate::events::VerEvent> {
        if !cfg.verify_enabled || is_bot || is_admin || cfg.whitelist_user_ids.contains(&user_id.get()) {
            return None;
        }

        let unverified_role = match self.adapter.find_or_create_role(guild_id, UNVERIFIED_ROLE_NAME).await {
            Ok(r) => r,
            Err(_) => return None,
        };
        let verified_role = match self.adapter.find_or_create_role(guild_id, VERIFIED_ROLE_NAME).await {
            Ok(r) => r,
            Err(_) => return None,
        };
        let verify_channel = match cfg.verify_channel_id {
            Some(id) => ChannelId::new(id),
            None => match self.adapter.find_or_create_text_channel(guild_id, VERIFY_CHANNEL_NAME).await {
                Ok(c) => c,
                Err(_) => return None,
            },
        };

        self.apply_isolation_overlay(guild_id, unverified_role, verified_role, verify_channel).await;

        let _ = self.adapter.remove_role(guild_id, user_id, verified_role).await;
        let _ = self.adapter.add_role(guild_id, user_id, unverified_role).await;

        let code = draw_code();
        let now = Utc::now();
        let expires_at = now + ChronoDuration::minutes(cfg.verify_timeout_minutes as i64);
        self.clone().open_session(guild_id, user_id, code.clone(), expires_at, cfg.clone()).await;

        let dm = format!("Your verification code is {code}. It expires in {} minutes.", cfg.verify_timeout_minutes);
        let _ = self.adapter.send_direct_message(user_id, &dm).await;
        let notice = format!("<@{}> please check your DMs for a verification code, or ask a moderator.", user_id.get());
        let _ = self.adapter.send_channel_message(verify_channel, &notice).await;

        Some(self.events.build_ver_event(now, guild_id.get(), user_id, VerPhase::Join, "session_opened", ""))
    }

    /// Applies the per-channel isolation overlay (spec §4.6 "Isolation").
    /// Unverified cannot view any channel except the verify channel;
    /// Unverified can view and send there; Verified retains view of public
    /// channels.
    async fn apply_isolation_overlay(
        &self,
        guild_id: GuildId,
        unverified_role: RoleId,
        verified_role: RoleId,
        verify_channel: ChannelId,
    ) {
        let channels = self.adapter.list_text_channels(guild_id).await.unwrap_or_default();
        for channel in channels {
            if channel == verify_channel {
                let _ = apply_with_retry(self.backoff, || {
                    self.adapter.set_role_channel_overwrite(channel, unverified_role, true, true)
                })
                .await;
            } else {
                let _ = apply_with_retry(self.backoff, || {
                    self.adapter.set_role_channel_overwrite(channel, unverified_role, false, false)
                })
                .await;
                let _ = apply_with_retry(self.backoff, || {
                    self.adapter.set_role_channel_overwrite(channel, verified_role, true, true)
                })
                .await;
            }
        }
    }

    /// Spec §4.6 `verifyCode`.
    pub async fn verify_code(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        code_input: &str,
        cfg: &GuildConfig,
    ) -> Result<(bool, String), VerifyError> {
        if !cfg.verify_enabled {
            return Ok((true, "disabled".to_string()));
        }

        let key = (guild_id, user_id);
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&key) else {
            return Err(VerifyError::SessionMissing);
        };

        let now = Utc::now();
        if now > entry.session.expires_at {
            let entry = sessions.remove(&key).unwrap();
            entry.timer.abort();
            return Err(VerifyError::SessionExpired);
        }

        if code_input.trim() != entry.session.code {
            entry.session.attempts += 1;
            let max_attempts = cfg.verify_max_attempts.max(1);
            if entry.session.attempts >= max_attempts {
                let entry = sessions.remove(&key).unwrap();
                entry.timer.abort();
                drop(sessions);
                self.apply_fail_action(guild_id, user_id, cfg, "attempts_exhausted").await;
                return Err(VerifyError::AttemptsExhausted);
            }
            let remaining = max_attempts - entry.session.attempts;
            return Ok((false, format!("incorrect code, {remaining} attempt(s) remaining")));
        }

        let entry = sessions.remove(&key).unwrap();
        entry.timer.abort();
        drop(sessions);

        self.finish_success(guild_id, user_id, cfg).await;
        Ok((true, "verified".to_string()))
    }

    async fn finish_success(&self, guild_id: GuildId, user_id: UserId, cfg: &GuildConfig) {
        if let Some(unverified) = self.find_role_id(guild_id, UNVERIFIED_ROLE_NAME).await {
            let _ = self.adapter.remove_role(guild_id, user_id, unverified).await;
        }
        if let Some(verified) = self.find_role_id(guild_id, VERIFIED_ROLE_NAME).await {
            let _ = self.adapter.add_role(guild_id, user_id, verified).await;
        }

        for channel in self.adapter.list_text_channels(guild_id).await.unwrap_or_default() {
            if Some(channel.get()) == cfg.log_channel_id {
                continue;
            }
            let _ = self.adapter.set_member_channel_overwrite(channel, user_id, true).await;
        }
        if let Some(verify_channel_id) = cfg.verify_channel_id {
            let _ = self.adapter.clear_member_channel_overwrite(ChannelId::new(verify_channel_id), user_id).await;
        }

        self.events.build_ver_event(Utc::now(), guild_id.get(), user_id, VerPhase::Verify, "success", "");
    }

    async fn find_role_id(&self, guild_id: GuildId, name: &str) -> Option<RoleId> {
        self.adapter.find_or_create_role(guild_id, name).await.ok()
    }

    /// Spec §4.6 `sendNewCode`.
    pub async fn send_new_code(self: Arc<Self>, guild_id: GuildId, user_id: UserId, cfg: &GuildConfig) {
        let code = draw_code();
        let now = Utc::now();
        let expires_at = now + ChronoDuration::minutes(cfg.verify_timeout_minutes as i64);
        self.clone().open_session(guild_id, user_id, code.clone(), expires_at, cfg.clone()).await;

        let dm = format!("Your new verification code is {code}.");
        let _ = self.adapter.send_direct_message(user_id, &dm).await;
        self.events.build_ver_event(now, guild_id.get(), user_id, VerPhase::Resend, "resent", "");
    }

    /// Replaces (or creates) the session for `(guild_id, user_id)`, aborting
    /// any prior timer, and schedules a fresh expiry timer.
    async fn open_session(
        self: Arc<Self>,
        guild_id: GuildId,
        user_id: UserId,
        code: String,
        expires_at: DateTime<Utc>,
        cfg: GuildConfig,
    ) {
        let key = (guild_id, user_id);
        {
            let mut sessions = self.sessions.write().await;
            if let Some(old) = sessions.remove(&key) {
                old.timer.abort();
            }
        }

        let manager = Arc::clone(&self);
        let sleep_for = (expires_at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(sleep_for).await;
            manager.timeout_job(guild_id, user_id, &cfg).await;
        });

        let mut sessions = self.sessions.write().await;
        sessions.insert(key, SessionEntry { session: VerificationSession { code, expires_at, attempts: 0 }, timer });
    }

    /// Spec §4.6 `timeoutJob`: fires once the expiry elapses, unless
    /// cancelled by replacement or completion first.
    async fn timeout_job(self: Arc<Self>, guild_id: GuildId, user_id: UserId, cfg: &GuildConfig) {
        let key = (guild_id, user_id);
        let existed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&key).is_some()
        };
        if !existed {
            return;
        }
        self.apply_fail_action(guild_id, user_id, cfg, "timeout").await;
        self.events.build_ver_event(Utc::now(), guild_id.get(), user_id, VerPhase::Timeout, "timed_out", "");
    }

    async fn apply_fail_action(&self, guild_id: GuildId, user_id: UserId, cfg: &GuildConfig, _reason: &str) -> StepOutcome {
        let result = match cfg.verify_fail_action {
            VerifyFailAction::Kick => self.adapter.kick_user(guild_id, user_id, "verification failed").await,
            VerifyFailAction::Timeout => self.adapter.timeout_user(guild_id, user_id, cfg.verify_timeout_minutes).await,
            VerifyFailAction::None => Ok(()),
        };
        match result {
            Ok(()) => StepOutcome::Ok,
            Err(e) => StepOutcome::from(&e),
        }
    }

    #[cfg(test)]
    async fn has_session(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.sessions.read().await.contains_key(&(guild_id, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAdapter {
        kicked: Mutex<Vec<UserId>>,
        timed_out: Mutex<Vec<UserId>>,
        added_roles: Mutex<Vec<(UserId, RoleId)>>,
        removed_roles: Mutex<Vec<(UserId, RoleId)>>,
    }

    #[async_trait::async_trait]
    impl PlatformAdapter for FakeAdapter {
        async fn delete_message(&self, _c: ChannelId, _m: u64) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn timeout_user(&self, _g: GuildId, user_id: UserId, _m: u64) -> Result<(), PlatformError> {
            self.timed_out.lock().unwrap().push(user_id);
            Ok(())
        }
        async fn kick_user(&self, _g: GuildId, user_id: UserId, _r: &str) -> Result<(), PlatformError> {
            self.kicked.lock().unwrap().push(user_id);
            Ok(())
        }
        async fn ban_user(&self, _g: GuildId, _u: UserId, _r: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn send_channel_message(&self, _c: ChannelId, _content: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn send_direct_message(&self, _u: UserId, _content: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn add_role(&self, _g: GuildId, user_id: UserId, role_id: RoleId) -> Result<(), PlatformError> {
            self.added_roles.lock().unwrap().push((user_id, role_id));
            Ok(())
        }
        async fn remove_role(&self, _g: GuildId, user_id: UserId, role_id: RoleId) -> Result<(), PlatformError> {
            self.removed_roles.lock().unwrap().push((user_id, role_id));
            Ok(())
        }
        async fn member_roles(&self, _g: GuildId, _u: UserId) -> Result<Vec<RoleId>, PlatformError> {
            Ok(Vec::new())
        }
        async fn find_or_create_role(&self, _g: GuildId, name: &str) -> Result<RoleId, PlatformError> {
            Ok(RoleId::new(if name == UNVERIFIED_ROLE_NAME { 10 } else { 20 }))
        }
        async fn find_or_create_text_channel(&self, _g: GuildId, _name: &str) -> Result<ChannelId, PlatformError> {
            Ok(ChannelId::new(30))
        }
        async fn list_text_channels(&self, _g: GuildId) -> Result<Vec<ChannelId>, PlatformError> {
            Ok(vec![ChannelId::new(30), ChannelId::new(31)])
        }
        async fn set_role_channel_overwrite(
            &self,
            _c: ChannelId,
            _r: RoleId,
            _view: bool,
            _send: bool,
        ) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn set_member_channel_overwrite(&self, _c: ChannelId, _u: UserId, _view: bool) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn clear_member_channel_overwrite(&self, _c: ChannelId, _u: UserId) -> Result<(), PlatformError> {
            Ok(())
        }
    }

    fn guild() -> GuildId {
        GuildId::new(1)
    }
    fn user() -> UserId {
        UserId::new(2)
    }

    #[tokio::test]
    async fn verification_success_clears_session_and_swaps_roles() {
        let adapter = Arc::new(FakeAdapter::default());
        let manager = Arc::new(VerificationManager::new(adapter.clone()));
        let mut cfg = GuildConfig::default();
        cfg.verify_enabled = true;

        manager.clone().handle_join(guild(), user(), false, false, &cfg).await;
        let code = manager.sessions.read().await.get(&(guild(), user())).unwrap().session.code.clone();

        let (ok, _msg) = manager.verify_code(guild(), user(), &code, &cfg).await.unwrap();
        assert!(ok);
        assert!(!manager.has_session(guild(), user()).await);
        assert!(adapter.added_roles.lock().unwrap().iter().any(|(_, r)| r.get() == 20));
    }

    #[tokio::test]
    async fn verification_exhaustion_applies_fail_action_and_clears_session() {
        let adapter = Arc::new(FakeAdapter::default());
        let manager = Arc::new(VerificationManager::new(adapter.clone()));
        let mut cfg = GuildConfig::default();
        cfg.verify_enabled = true;
        cfg.verify_max_attempts = 3;
        cfg.verify_fail_action = VerifyFailAction::Kick;

        manager.clone().handle_join(guild(), user(), false, false, &cfg).await;

        for _ in 0..2 {
            let (ok, _) = manager.verify_code(guild(), user(), "000000", &cfg).await.unwrap();
            assert!(!ok);
        }
        let third = manager.verify_code(guild(), user(), "000000", &cfg).await;
        assert_eq!(third, Err(VerifyError::AttemptsExhausted));
        assert!(!manager.has_session(guild(), user()).await);
        assert_eq!(adapter.kicked.lock().unwrap().len(), 1);

        let fourth = manager.verify_code(guild(), user(), "000000", &cfg).await;
        assert_eq!(fourth, Err(VerifyError::SessionMissing));
    }

    #[tokio::test]
    async fn timeout_job_fires_once_and_clears_session() {
        let adapter = Arc::new(FakeAdapter::default());
        let manager = Arc::new(VerificationManager::new(adapter.clone()));
        let mut cfg = GuildConfig::default();
        cfg.verify_enabled = true;
        cfg.verify_timeout_minutes = 0;
        cfg.verify_fail_action = VerifyFailAction::Timeout;

        manager.clone().handle_join(guild(), user(), false, false, &cfg).await;
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        assert!(!manager.has_session(guild(), user()).await);
        assert_eq!(adapter.timed_out.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_verification_skips_join_handling() {
        let adapter = Arc::new(FakeAdapter::default());
        let manager = Arc::new(VerificationManager::new(adapter));
        let cfg = GuildConfig::default();

        let event = manager.clone().handle_join(guild(), user(), false, false, &cfg).await;
        assert!(event.is_none());
        assert!(!manager.has_session(guild(), user()).await);
    }

    #[tokio::test]
    async fn bots_and_admins_are_skipped() {
        let adapter = Arc::new(FakeAdapter::default());
        let manager = Arc::new(VerificationManager::new(adapter));
        let mut cfg = GuildConfig::default();
        cfg.verify_enabled = true;

        assert!(manager.clone().handle_join(guild(), user(), true, false, &cfg).await.is_none());
        assert!(manager.clone().handle_join(guild(), user(), false, true, &cfg).await.is_none());
    }
}
