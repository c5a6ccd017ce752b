//! Closed set of spam/raid reason tags. Localization happens only at
//! emission (`EventLogger`), never at scoring time.

use std::fmt;

/// A single scoring signal that fired. The set is closed; exhaustive
/// matching is part of the contract (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonTag {
    RapidPosting,
    DuplicateMessages,
    UrlSpam,
    RepeatedUrlPosts,
    PhishingDomain,
    SuspiciousDomainTld,
    MentionSpam,
    NewAccount,
    RaidJoinSurge,
    RaidActivity,
}

impl ReasonTag {
    /// Stable wire/log identifier, matching spec.md's literal tag names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RapidPosting => "rapid_posting",
            Self::DuplicateMessages => "duplicate_messages",
            Self::UrlSpam => "url_spam",
            Self::RepeatedUrlPosts => "repeated_url_posts",
            Self::PhishingDomain => "phishing_domain",
            Self::SuspiciousDomainTld => "suspicious_domain_tld",
            Self::MentionSpam => "mention_spam",
            Self::NewAccount => "new_account",
            Self::RaidJoinSurge => "raid_join_surge",
            Self::RaidActivity => "raid_activity",
        }
    }

    /// Human-readable label for event-log records (§4.7 "localized from a
    /// fixed map"). A single fixed map is all spec.md asks for; no i18n.
    pub fn localized(&self) -> &'static str {
        match self {
            Self::RapidPosting => "rapid posting",
            Self::DuplicateMessages => "duplicate messages",
            Self::UrlSpam => "excessive links",
            Self::RepeatedUrlPosts => "repeated link posting",
            Self::PhishingDomain => "known phishing domain",
            Self::SuspiciousDomainTld => "suspicious domain TLD",
            Self::MentionSpam => "mass mentions",
            Self::NewAccount => "new account",
            Self::RaidJoinSurge => "join-burst raid signal",
            Self::RaidActivity => "raid activity confirmed",
        }
    }

    /// Reasons that escalate enforcement regardless of `scoreThreshold`
    /// (spec §4.5 step 3).
    pub fn forces_enforcement(&self) -> bool {
        matches!(self, Self::PhishingDomain | Self::RaidActivity)
    }
}

impl fmt::Display for ReasonTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appends `tag` to `reasons` unless already present, preserving first-seen
/// order (spec §4.3 step 11, §8 "reasons contains no duplicates").
pub fn push_unique(reasons: &mut Vec<ReasonTag>, tag: ReasonTag) {
    if !reasons.contains(&tag) {
        reasons.push(tag);
    }
}
