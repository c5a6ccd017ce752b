//! Error types for SpamGuard core.
//!
//! All errors are explicitly typed using thiserror. No panics in production code.

use thiserror::Error;

/// Central error type for ConfigStore and bootstrap operations.
#[derive(Debug, Error)]
pub enum SpamGuardError {
    /// On-disk config document is syntactically broken (JSON parse failure).
    #[error("config document is invalid: {0}")]
    ConfigInvalid(String),

    /// Admin `set key value` against a field that does not exist on `GuildConfig`.
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    /// Admin value could not be parsed under the field's declared kind.
    #[error("could not parse value for {key}: {reason}")]
    CoercionFailed { key: String, reason: String },

    /// Discord API error from serenity, surfaced only at bootstrap.
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error while loading or persisting configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed environment variable at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SpamGuardError {
    /// Log error with full context using tracing.
    pub fn log_with_context(&self, context: &ErrorContext) {
        match self {
            Self::ConfigInvalid(_) | Self::Io(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "fatal configuration error"
                );
            }
            Self::DiscordApi(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "platform API error"
                );
            }
            Self::UnknownKey(_) | Self::CoercionFailed { .. } => {
                tracing::warn!(
                    error = %self,
                    request_id = %context.request_id,
                    guild_id = ?context.guild_id,
                    operation = %context.operation,
                    "rejected admin input"
                );
            }
            Self::Json(_) | Self::Config(_) => {
                tracing::error!(
                    error = %self,
                    request_id = %context.request_id,
                    operation = %context.operation,
                    "configuration error"
                );
            }
        }
    }

    /// True if this error should abort startup rather than be reported and continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigInvalid(_) | Self::Io(_) | Self::Config(_))
    }
}

/// Structured context attached to an error log line.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub guild_id: Option<u64>,
    pub operation: String,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            guild_id: None,
            operation: operation.into(),
        }
    }

    pub fn with_guild_id(mut self, guild_id: u64) -> Self {
        self.guild_id = Some(guild_id);
        self
    }
}

/// Result type alias for SpamGuard core operations.
pub type Result<T> = std::result::Result<T, SpamGuardError>;

/// Per-step outcome alphabet shared by enforcement actions (spec §4.5) and
/// verification failure actions (spec §4.6). Closed set; exhaustive matching
/// is part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Forbidden,
    HttpError,
    NotSupported,
    NotAttempted,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Forbidden => "forbidden",
            Self::HttpError => "http_error",
            Self::NotSupported => "not_supported",
            Self::NotAttempted => "not_attempted",
        }
    }
}

/// Failure of a single `PlatformAdapter` call. Never propagated past
/// `SecurityRuntime`/`VerificationManager` — always converted to a `StepOutcome`.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("forbidden")]
    Forbidden,
    #[error("http error: {0}")]
    Http(String),
    #[error("capability not supported by this platform adapter")]
    NotSupported,
}

impl From<&PlatformError> for StepOutcome {
    fn from(e: &PlatformError) -> Self {
        match e {
            PlatformError::Forbidden => StepOutcome::Forbidden,
            PlatformError::Http(_) => StepOutcome::HttpError,
            PlatformError::NotSupported => StepOutcome::NotSupported,
        }
    }
}

/// Verification-domain failures. Returned as values alongside the operation
/// result (spec §7), not propagated as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("no verification session for this member")]
    SessionMissing,
    #[error("verification session has expired")]
    SessionExpired,
    #[error("submitted code does not match")]
    CodeMismatch,
    #[error("maximum verification attempts exhausted")]
    AttemptsExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_config_invalid() {
        let err = SpamGuardError::ConfigInvalid("unexpected EOF".to_string());
        assert_eq!(err.to_string(), "config document is invalid: unexpected EOF");
    }

    #[test]
    fn error_display_coercion_failed() {
        let err = SpamGuardError::CoercionFailed {
            key: "scoreThreshold".to_string(),
            reason: "not an integer".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "could not parse value for scoreThreshold: not an integer"
        );
    }

    #[test]
    fn error_is_fatal() {
        assert!(SpamGuardError::ConfigInvalid("x".to_string()).is_fatal());
        assert!(!SpamGuardError::UnknownKey("x".to_string()).is_fatal());
    }

    #[test]
    fn step_outcome_as_str_covers_all_variants() {
        assert_eq!(StepOutcome::Ok.as_str(), "ok");
        assert_eq!(StepOutcome::Forbidden.as_str(), "forbidden");
        assert_eq!(StepOutcome::HttpError.as_str(), "http_error");
        assert_eq!(StepOutcome::NotSupported.as_str(), "not_supported");
        assert_eq!(StepOutcome::NotAttempted.as_str(), "not_attempted");
    }

    #[test]
    fn platform_error_converts_to_step_outcome() {
        assert_eq!(StepOutcome::from(&PlatformError::Forbidden), StepOutcome::Forbidden);
        assert_eq!(
            StepOutcome::from(&PlatformError::Http("timeout".to_string())),
            StepOutcome::HttpError
        );
        assert_eq!(StepOutcome::from(&PlatformError::NotSupported), StepOutcome::NotSupported);
    }

    #[test]
    fn error_context_builder() {
        let ctx = ErrorContext::new("test_operation", "req-123").with_guild_id(67890);
        assert_eq!(ctx.operation, "test_operation");
        assert_eq!(ctx.guild_id, Some(67890));
        assert_eq!(ctx.request_id, "req-123");
    }
}
