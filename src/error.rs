use chrono::{DateTime, Utc};

/// Business rule failures. These are caller-input errors and are never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    #[error("Room does not match the envelope's room")]
    RoomMismatch,
    #[error("Envelope window closed at {deadline}")]
    Expired { deadline: DateTime<Utc> },
    #[error("The creator cannot claim their own envelope")]
    SelfClaimForbidden,
    #[error("Claimant has already received a share of this envelope")]
    DuplicateClaim,
    #[error("Only the creator may look up an envelope")]
    Forbidden,
}

#[derive(thiserror::Error, Debug)]
pub enum LuckyError {
    #[error("No envelope found for token {0}")]
    NotFound(String),
    #[error(transparent)]
    Rule(#[from] RuleViolation),
    #[error("No shares remaining in this envelope")]
    NoSharesRemaining,
    #[error("Cannot split {total} into {share_count} shares")]
    InvalidSplit { total: u64, share_count: u32 },
    #[error("{share_count} shares exceed the limit of {max}")]
    TooManyShares { share_count: u32, max: u32 },
    #[error("Invalid envelope configuration: {0}")]
    InvalidConfig(String),
    #[error("Claim gave up after {attempts} conflicting attempts")]
    ClaimContention { attempts: u32 },
    #[error("Ledger is inconsistent: {0}")]
    Corrupted(String),
    #[error("Failed to encode or decode a record: {0}")]
    Codec(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to generate a token: {0}")]
    TokenGeneration(#[from] anyhow::Error),
}

impl LuckyError {
    pub fn is_rule_violation(&self) -> bool {
        matches!(self, LuckyError::Rule(_))
    }

    /// The request was valid but every share was already taken.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, LuckyError::NoSharesRemaining)
    }

    pub fn rule(&self) -> Option<&RuleViolation> {
        match self {
            LuckyError::Rule(rule) => Some(rule),
            _ => None,
        }
    }
}
