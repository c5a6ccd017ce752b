//! Guild configuration documents and the on-disk config store (spec §3 GuildConfig,
//! §4.1 ConfigStore, §6 on-disk layout). Grounded in the teacher's `config.rs`
//! env-loading pattern (`from_env`, `load_patterns_from_file`) generalized from a
//! flat document to a `{defaults, guilds}` shape, and in `rules.rs`'s
//! `Arc<RwLock<HashMap>>` cache-then-persist pattern.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Result, SpamGuardError};

/// Action taken when a member exhausts verification attempts or times out
/// (spec §3 `verifyFailAction`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyFailAction {
    Kick,
    Timeout,
    None,
}

impl Default for VerifyFailAction {
    fn default() -> Self {
        Self::Timeout
    }
}

/// Per-tenant configuration document (spec §3 GuildConfig). Unknown JSON keys
/// are silently dropped on load and missing keys take these defaults, because
/// every field carries `#[serde(default)]` and the struct never sets
/// `deny_unknown_fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuildConfig {
    // Scoring thresholds
    pub window_sec: u64,
    pub max_msg_in_window: u64,
    pub duplicate_window_sec: u64,
    pub dup_threshold: u64,
    pub url_threshold: u64,
    pub url_repeat_window_sec: u64,
    pub url_repeat_threshold: u64,
    pub mention_threshold: u64,
    pub score_threshold: i64,

    // Escalation
    pub warning_threshold: u64,
    pub timeout_threshold: u64,
    pub ban_threshold: u64,
    pub ban_enabled: bool,
    pub offense_window_sec: u64,
    pub timeout_minutes: u64,

    // Raid
    pub raid_join_window_sec: u64,
    pub raid_join_threshold: u64,
    pub raid_message_window_sec: u64,
    pub raid_new_user_message_threshold: u64,
    pub new_member_window_sec: u64,

    // Verification
    pub verify_enabled: bool,
    pub verify_channel_id: Option<u64>,
    pub verify_unverified_role_id: Option<u64>,
    pub verify_member_role_id: Option<u64>,
    pub verify_timeout_minutes: u64,
    pub verify_max_attempts: u64,
    pub verify_fail_action: VerifyFailAction,

    // Lists
    pub ignore_role_ids: Vec<u64>,
    pub ignore_channel_ids: Vec<u64>,
    pub whitelist_user_ids: Vec<u64>,
    pub whitelist_role_ids: Vec<u64>,
    pub allow_domains: Vec<String>,
    pub phishing_domains: Vec<String>,
    pub suspicious_tlds: Vec<String>,

    // Logging
    pub log_channel_id: Option<u64>,
    pub log_viewer_role_id: Option<u64>,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            window_sec: 10,
            max_msg_in_window: 5,
            duplicate_window_sec: 120,
            dup_threshold: 3,
            url_threshold: 3,
            url_repeat_window_sec: 300,
            url_repeat_threshold: 3,
            mention_threshold: 5,
            score_threshold: 6,

            warning_threshold: 1,
            timeout_threshold: 2,
            ban_threshold: 3,
            ban_enabled: true,
            offense_window_sec: 3600,
            timeout_minutes: 10,

            raid_join_window_sec: 60,
            raid_join_threshold: 5,
            raid_message_window_sec: 60,
            raid_new_user_message_threshold: 3,
            new_member_window_sec: 600,

            verify_enabled: false,
            verify_channel_id: None,
            verify_unverified_role_id: None,
            verify_member_role_id: None,
            verify_timeout_minutes: 10,
            verify_max_attempts: 3,
            verify_fail_action: VerifyFailAction::Timeout,

            ignore_role_ids: Vec::new(),
            ignore_channel_ids: Vec::new(),
            whitelist_user_ids: Vec::new(),
            whitelist_role_ids: Vec::new(),
            allow_domains: Vec::new(),
            phishing_domains: Vec::new(),
            suspicious_tlds: Vec::new(),

            log_channel_id: None,
            log_viewer_role_id: None,
        }
    }
}

impl GuildConfig {
    /// Applies a string value to a single field by its camelCase key name,
    /// coercing it under that field's declared kind (spec §4.1). Returns
    /// `Err(UnknownKey)` for an undefined key, `Err(CoercionFailed)` if the
    /// value cannot be parsed under that kind.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        macro_rules! set_u64 {
            ($field:expr) => {{
                $field = parse_u64(key, value)?;
                Ok(())
            }};
        }
        macro_rules! set_i64 {
            ($field:expr) => {{
                $field = parse_i64(key, value)?;
                Ok(())
            }};
        }
        macro_rules! set_bool {
            ($field:expr) => {{
                $field = parse_bool(value);
                Ok(())
            }};
        }
        macro_rules! set_opt_u64 {
            ($field:expr) => {{
                $field = parse_opt_u64(key, value)?;
                Ok(())
            }};
        }

        match key {
            "windowSec" => set_u64!(self.window_sec),
            "maxMsgInWindow" => set_u64!(self.max_msg_in_window),
            "duplicateWindowSec" => set_u64!(self.duplicate_window_sec),
            "dupThreshold" => set_u64!(self.dup_threshold),
            "urlThreshold" => set_u64!(self.url_threshold),
            "urlRepeatWindowSec" => set_u64!(self.url_repeat_window_sec),
            "urlRepeatThreshold" => set_u64!(self.url_repeat_threshold),
            "mentionThreshold" => set_u64!(self.mention_threshold),
            "scoreThreshold" => set_i64!(self.score_threshold),

            "warningThreshold" => set_u64!(self.warning_threshold),
            "timeoutThreshold" => set_u64!(self.timeout_threshold),
            "banThreshold" => set_u64!(self.ban_threshold),
            "banEnabled" => set_bool!(self.ban_enabled),
            "offenseWindowSec" => set_u64!(self.offense_window_sec),
            "timeoutMinutes" => set_u64!(self.timeout_minutes),

            "raidJoinWindowSec" => set_u64!(self.raid_join_window_sec),
            "raidJoinThreshold" => set_u64!(self.raid_join_threshold),
            "raidMessageWindowSec" => set_u64!(self.raid_message_window_sec),
            "raidNewUserMessageThreshold" => set_u64!(self.raid_new_user_message_threshold),
            "newMemberWindowSec" => set_u64!(self.new_member_window_sec),

            "verifyEnabled" => set_bool!(self.verify_enabled),
            "verifyChannelId" => set_opt_u64!(self.verify_channel_id),
            "verifyUnverifiedRoleId" => set_opt_u64!(self.verify_unverified_role_id),
            "verifyMemberRoleId" => set_opt_u64!(self.verify_member_role_id),
            "verifyTimeoutMinutes" => set_u64!(self.verify_timeout_minutes),
            "verifyMaxAttempts" => set_u64!(self.verify_max_attempts),
            "verifyFailAction" => {
                self.verify_fail_action = match value.trim().to_ascii_lowercase().as_str() {
                    "kick" => VerifyFailAction::Kick,
                    "timeout" => VerifyFailAction::Timeout,
                    "none" => VerifyFailAction::None,
                    other => {
                        return Err(SpamGuardError::CoercionFailed {
                            key: key.to_string(),
                            reason: format!("expected kick|timeout|none, got {other}"),
                        })
                    }
                };
                Ok(())
            }

            "logChannelId" => set_opt_u64!(self.log_channel_id),
            "logViewerRoleId" => set_opt_u64!(self.log_viewer_role_id),

            other => Err(SpamGuardError::UnknownKey(other.to_string())),
        }
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|e| SpamGuardError::CoercionFailed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64> {
    value.trim().parse::<i64>().map_err(|e| SpamGuardError::CoercionFailed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_opt_u64(key: &str, value: &str) -> Result<Option<u64>> {
    let trimmed = value.trim();
    if trimmed.is_empty() || matches!(trimmed.to_ascii_lowercase().as_str(), "none" | "null") {
        return Ok(None);
    }
    Ok(Some(parse_u64(key, trimmed)?))
}

/// On-disk document shape (spec §6): one default document, plus per-tenant
/// overrides keyed by tenant ID. `BTreeMap` (not `HashMap`) gives stable key
/// order when serialized, satisfying the "stable key order by tenant ID"
/// requirement for free.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub defaults: GuildConfig,
    #[serde(default)]
    pub guilds: BTreeMap<u64, GuildConfig>,
}

/// Persistent, per-process config store. A single `RwLock` serializes
/// load/save/mutation, matching the teacher's `rules.rs` cache-then-persist
/// discipline, generalized here to own the data directly instead of caching
/// reads from a database.
pub struct ConfigStore {
    path: PathBuf,
    doc: RwLock<ConfigDocument>,
}

impl ConfigStore {
    /// Resolves `SPAMGUARD_CONFIG_PATH`, defaulting to `config.json`
    /// (spec §6 env vars).
    pub fn default_path() -> PathBuf {
        env::var("SPAMGUARD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.json"))
    }

    /// Loads (or initializes) the config document at `path` (spec §4.1 `load`).
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => parse_document(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigDocument::default(),
            Err(e) => return Err(SpamGuardError::Io(e)),
        };
        let store = Self { path, doc: RwLock::new(doc) };
        store.save().await?;
        Ok(store)
    }

    /// Persists the current document, writing to a temp file and renaming
    /// into place to avoid partial writes on crash (spec §4.1 concurrency note).
    pub async fn save(&self) -> Result<()> {
        let doc = self.doc.read().await;
        let rendered = serde_json::to_string_pretty(&*doc)?;
        drop(doc);

        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, rendered).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Returns tenant `tenant_id`'s config, lazily copying the default
    /// document and persisting on first reference (spec §3 "Lifecycle").
    pub async fn get_tenant_config(&self, tenant_id: u64) -> GuildConfig {
        {
            let doc = self.doc.read().await;
            if let Some(cfg) = doc.guilds.get(&tenant_id) {
                return cfg.clone();
            }
        }
        let mut doc = self.doc.write().await;
        let default_cfg = doc.defaults.clone();
        let cfg = doc.guilds.entry(tenant_id).or_insert(default_cfg).clone();
        drop(doc);
        let _ = self.save().await;
        cfg
    }

    /// Sets a single field on tenant `tenant_id`'s config, persisting on
    /// success (spec §4.1 `setTenantValue`). Returns `false` only for an
    /// unknown key or a coercion failure that the caller should report
    /// rather than escalate.
    pub async fn set_tenant_value(&self, tenant_id: u64, key: &str, value: &str) -> Result<()> {
        let mut doc = self.doc.write().await;
        let defaults = doc.defaults.clone();
        let cfg = doc.guilds.entry(tenant_id).or_insert(defaults);
        cfg.set_value(key, value)?;
        drop(doc);
        self.save().await
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Parses a config document, accepting the legacy flat shape once and
/// treating it as `defaults` with no tenant overrides (spec §4.1 shape b).
fn parse_document(raw: &str) -> Result<ConfigDocument> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| SpamGuardError::ConfigInvalid(e.to_string()))?;

    let looks_current = value.get("defaults").is_some() || value.get("guilds").is_some();
    if looks_current {
        serde_json::from_value(value).map_err(|e| SpamGuardError::ConfigInvalid(e.to_string()))
    } else {
        let defaults: GuildConfig =
            serde_json::from_value(value).map_err(|e| SpamGuardError::ConfigInvalid(e.to_string()))?;
        Ok(ConfigDocument { defaults, guilds: BTreeMap::new() })
    }
}

/// Bootstrap-level process configuration (spec §6 env vars), distinct from
/// per-tenant `GuildConfig`. Grounded in the teacher's `MurdochConfig::from_env`.
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub discord_token: String,
    pub config_path: PathBuf,
}

impl BootConfig {
    pub fn from_env() -> Result<Self> {
        let discord_token = env::var("DISCORD_TOKEN")
            .map_err(|_| SpamGuardError::Config("DISCORD_TOKEN not set".to_string()))?;
        Ok(Self { discord_token, config_path: ConfigStore::default_path() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_guild_config_has_sane_escalation_order() {
        let cfg = GuildConfig::default();
        assert!(cfg.warning_threshold <= cfg.timeout_threshold);
        assert!(cfg.timeout_threshold <= cfg.ban_threshold);
    }

    #[test]
    fn set_value_unknown_key_is_rejected() {
        let mut cfg = GuildConfig::default();
        let err = cfg.set_value("notAField", "1").unwrap_err();
        assert!(matches!(err, SpamGuardError::UnknownKey(k) if k == "notAField"));
    }

    #[test]
    fn set_value_bool_accepts_truthy_aliases() {
        let mut cfg = GuildConfig::default();
        cfg.set_value("banEnabled", "yes").unwrap();
        assert!(cfg.ban_enabled);
        cfg.set_value("banEnabled", "0").unwrap();
        assert!(!cfg.ban_enabled);
    }

    #[test]
    fn set_value_nullable_int_accepts_none_and_null() {
        let mut cfg = GuildConfig::default();
        cfg.set_value("logChannelId", "12345").unwrap();
        assert_eq!(cfg.log_channel_id, Some(12345));
        cfg.set_value("logChannelId", "none").unwrap();
        assert_eq!(cfg.log_channel_id, None);
    }

    #[test]
    fn set_value_int_coercion_failure_is_reported() {
        let mut cfg = GuildConfig::default();
        let err = cfg.set_value("scoreThreshold", "not-a-number").unwrap_err();
        assert!(matches!(err, SpamGuardError::CoercionFailed { .. }));
    }

    #[test]
    fn legacy_shape_is_treated_as_defaults() {
        let raw = r#"{"windowSec":12,"scoreThreshold":7,"logChannelId":12345}"#;
        let doc = parse_document(raw).unwrap();
        assert_eq!(doc.defaults.window_sec, 12);
        assert_eq!(doc.defaults.score_threshold, 7);
        assert_eq!(doc.defaults.log_channel_id, Some(12345));
        assert!(doc.guilds.is_empty());
    }

    #[test]
    fn unknown_keys_are_dropped_on_parse() {
        let raw = r#"{"defaults":{"windowSec":5,"somethingMadeUp":true},"guilds":{}}"#;
        let doc = parse_document(raw).unwrap();
        assert_eq!(doc.defaults.window_sec, 5);
    }

    #[tokio::test]
    async fn tenant_configs_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(&path).await.unwrap();

        store.set_tenant_value(1, "logChannelId", "99999").await.unwrap();
        let a = store.get_tenant_config(1).await;
        let b = store.get_tenant_config(2).await;

        assert_eq!(a.log_channel_id, Some(99999));
        assert_eq!(b.log_channel_id, None);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_every_tenant_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        {
            let store = ConfigStore::load(&path).await.unwrap();
            store.set_tenant_value(42, "scoreThreshold", "9").await.unwrap();
            store.set_tenant_value(42, "verifyEnabled", "true").await.unwrap();
        }

        let reloaded = ConfigStore::load(&path).await.unwrap();
        let cfg = reloaded.get_tenant_config(42).await;
        assert_eq!(cfg.score_threshold, 9);
        assert!(cfg.verify_enabled);
    }

    #[tokio::test]
    async fn missing_file_initializes_default_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let store = ConfigStore::load(&path).await.unwrap();
        assert!(tokio::fs::try_exists(&path).await.unwrap());
        let cfg = store.get_tenant_config(1).await;
        assert_eq!(cfg, GuildConfig::default());
    }
}
