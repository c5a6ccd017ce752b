//! Per-tenant sliding-window spam scoring plus the raid-detection overlay
//! (spec §3 MessageSnapshot/PerUserHistory/TenantRaidState, §4.3 SpamDetector).
//!
//! Grounded in the teacher's `raid.rs`: front-prune-by-cutoff `VecDeque`s
//! guarded by `tokio::sync::RwLock`, one map per tenant, `drop(lock)` before
//! any follow-on work that might re-acquire it.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serenity::model::id::UserId;
use tokio::sync::RwLock;

use crate::config::GuildConfig;
use crate::reasons::{push_unique, ReasonTag};
use crate::url_analysis::{canonical_host_and_path, classify, extract_urls};

/// Immutable record of one incoming message (spec §3 MessageSnapshot).
#[derive(Debug, Clone)]
pub struct MessageSnapshot {
    pub user_id: UserId,
    pub content: String,
    pub mention_count: u64,
    pub created_at: DateTime<Utc>,
    pub account_created_at: DateTime<Utc>,
    pub joined_at: Option<DateTime<Utc>>,
}

/// Per-tenant, per-user sliding-window state (spec §3 PerUserHistory). All
/// sequences are kept in non-decreasing time order; pruning runs before
/// every read.
#[derive(Debug, Default)]
struct PerUserHistory {
    message_timestamps: VecDeque<DateTime<Utc>>,
    duplicate_entries: VecDeque<(DateTime<Utc>, String)>,
    url_posts: VecDeque<(DateTime<Utc>, String)>,
    offense_timestamps: VecDeque<DateTime<Utc>>,
}

/// Per-tenant cross-user raid signals (spec §3 TenantRaidState).
#[derive(Debug, Default)]
struct TenantRaidState {
    recent_joins: VecDeque<(DateTime<Utc>, UserId)>,
    recent_new_user_messages: VecDeque<DateTime<Utc>>,
}

/// Outcome of `SpamDetector::score`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub score: i64,
    pub reasons: Vec<ReasonTag>,
}

fn prune_front<T>(deque: &mut VecDeque<T>, cutoff: DateTime<Utc>, ts_of: impl Fn(&T) -> DateTime<Utc>) {
    while deque.front().is_some_and(|entry| ts_of(entry) < cutoff) {
        deque.pop_front();
    }
}

/// Trim, lower-case, and collapse whitespace runs (spec §3 content normalization).
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// One instance per tenant (spec §5: "each tenant owns its own detector
/// instance and raid state"). Rebuilt by the caller whenever the tenant's
/// `GuildConfig` identity changes.
pub struct SpamDetector {
    config: GuildConfig,
    histories: RwLock<HashMap<UserId, PerUserHistory>>,
    raid_state: RwLock<TenantRaidState>,
}

impl SpamDetector {
    pub fn new(config: GuildConfig) -> Self {
        Self {
            config,
            histories: RwLock::new(HashMap::new()),
            raid_state: RwLock::new(TenantRaidState::default()),
        }
    }

    pub fn config(&self) -> &GuildConfig {
        &self.config
    }

    /// Scores one message against this tenant's sliding-window state
    /// (spec §4.3 steps 1-11).
    pub async fn score(&self, snapshot: &MessageSnapshot) -> ScoreResult {
        let cfg = &self.config;
        let mut score: i64 = 0;
        let mut reasons = Vec::new();
        let now = snapshot.created_at;

        let mut histories = self.histories.write().await;
        let history = histories.entry(snapshot.user_id).or_default();

        // Step 1: prune against current time.
        prune_front(&mut history.message_timestamps, now - window(cfg.window_sec), |t| *t);
        prune_front(&mut history.duplicate_entries, now - window(cfg.duplicate_window_sec), |(t, _)| *t);
        prune_front(&mut history.url_posts, now - window(cfg.url_repeat_window_sec), |(t, _)| *t);

        // Step 2: append this message.
        history.message_timestamps.push_back(now);
        let normalized = normalize_content(&snapshot.content);
        history.duplicate_entries.push_back((now, normalized.clone()));

        // Step 3: rapid posting.
        if history.message_timestamps.len() as u64 >= cfg.max_msg_in_window {
            score += 2;
            push_unique(&mut reasons, ReasonTag::RapidPosting);
        }

        // Step 4: duplicates.
        if !normalized.is_empty() {
            let k = history.duplicate_entries.iter().filter(|(_, text)| *text == normalized).count() as u64;
            if k >= cfg.dup_threshold {
                score += 3;
                push_unique(&mut reasons, ReasonTag::DuplicateMessages);
            }
        }

        // Step 5: URL count.
        let urls = extract_urls(&snapshot.content);
        if urls.len() as u64 >= cfg.url_threshold {
            score += 3;
            push_unique(&mut reasons, ReasonTag::UrlSpam);
        }
        let canonical_keys: Vec<String> =
            urls.iter().filter_map(|u| canonical_host_and_path(u)).collect();
        for key in &canonical_keys {
            history.url_posts.push_back((now, key.clone()));
        }

        // Step 6: URL repeat, once regardless of how many distinct URLs qualify.
        let distinct_keys: HashSet<&String> = canonical_keys.iter().collect();
        let repeated = distinct_keys.iter().any(|key| {
            history.url_posts.iter().filter(|(_, posted)| posted == *key).count() as u64
                >= cfg.url_repeat_threshold
        });
        if repeated {
            score += 3;
            push_unique(&mut reasons, ReasonTag::RepeatedUrlPosts);
        }

        // Step 7: URL reputation.
        let (extra, url_reasons) = classify(&urls, &cfg.allow_domains, &cfg.phishing_domains, &cfg.suspicious_tlds);
        score += extra;
        for tag in url_reasons {
            push_unique(&mut reasons, tag);
        }

        // Step 8: mention spam.
        if snapshot.mention_count >= cfg.mention_threshold {
            score += 3;
            push_unique(&mut reasons, ReasonTag::MentionSpam);
        }

        // Step 9: new account.
        if now - snapshot.account_created_at < ChronoDuration::hours(24) {
            score += 1;
            push_unique(&mut reasons, ReasonTag::NewAccount);
        }

        // Step 10: raid overlay.
        drop(histories);
        let mut raid = self.raid_state.write().await;
        if let Some(joined_at) = snapshot.joined_at {
            if now - joined_at <= window(cfg.new_member_window_sec) {
                raid.recent_new_user_messages.push_back(now);
            }
        }
        prune_front(&mut raid.recent_joins, now - window(cfg.raid_join_window_sec), |(t, _)| *t);
        prune_front(&mut raid.recent_new_user_messages, now - window(cfg.raid_message_window_sec), |t| *t);

        if raid.recent_joins.len() as u64 >= cfg.raid_join_threshold {
            score += 2;
            push_unique(&mut reasons, ReasonTag::RaidJoinSurge);
            if raid.recent_new_user_messages.len() as u64 >= cfg.raid_new_user_message_threshold {
                score += 5;
                push_unique(&mut reasons, ReasonTag::RaidActivity);
            }
        }

        ScoreResult { score, reasons }
    }

    /// Records a member join for raid-burst tracking (spec §4.3 `registerJoin`).
    pub async fn register_join(&self, user_id: UserId, joined_at: DateTime<Utc>) {
        let mut raid = self.raid_state.write().await;
        raid.recent_joins.push_back((joined_at, user_id));
        prune_front(&mut raid.recent_joins, joined_at - window(self.config.raid_join_window_sec), |(t, _)| *t);
    }

    /// Offense-ledger escalation for `user_id` (spec §4.4), sharing this
    /// detector's per-user offense timestamps.
    pub async fn decide(&self, user_id: UserId, now: DateTime<Utc>) -> crate::ledger::DecideOutcome {
        let mut histories = self.histories.write().await;
        let history = histories.entry(user_id).or_default();
        crate::ledger::decide(
            &mut history.offense_timestamps,
            now,
            self.config.offense_window_sec,
            self.config.warning_threshold,
            self.config.timeout_threshold,
            self.config.ban_threshold,
            self.config.ban_enabled,
        )
    }
}

fn window(seconds: u64) -> ChronoDuration {
    ChronoDuration::seconds(seconds as i64)
}
