//! Envelope windows and claim tuning
use super::error::LuckyError;
use chrono::TimeDelta;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeConfig {
    /// How long after creation participants may claim.
    pub claim_window: TimeDelta,
    /// How long after creation the owner may look the envelope up.
    pub audit_window: TimeDelta,
    /// Compare-and-set attempts before a claim gives up.
    pub max_claim_retries: u32,
    /// Largest number of shares one envelope may be split into.
    pub max_share_count: u32,
    /// bech32 human readable part used for envelope tokens.
    pub token_prefix: String,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            claim_window: TimeDelta::minutes(10),
            audit_window: TimeDelta::days(7),
            max_claim_retries: 8,
            max_share_count: 1_000,
            token_prefix: "lucky".into(),
        }
    }
}

impl EnvelopeConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_claim_window(mut self, window: TimeDelta) -> Self {
        self.claim_window = window;
        self
    }
    pub fn with_audit_window(mut self, window: TimeDelta) -> Self {
        self.audit_window = window;
        self
    }
    pub fn with_max_claim_retries(mut self, retries: u32) -> Self {
        self.max_claim_retries = retries;
        self
    }
    pub fn with_max_share_count(mut self, max: u32) -> Self {
        self.max_share_count = max;
        self
    }
    pub fn with_token_prefix(mut self, prefix: &str) -> Self {
        self.token_prefix = prefix.to_owned();
        self
    }

    pub fn validate(&self) -> Result<(), LuckyError> {
        if self.claim_window <= TimeDelta::zero() {
            return Err(LuckyError::InvalidConfig(
                "claim window must be positive".into(),
            ));
        }
        // claims must close before audits do
        if self.claim_window >= self.audit_window {
            return Err(LuckyError::InvalidConfig(format!(
                "claim window {} must be shorter than audit window {}",
                self.claim_window, self.audit_window
            )));
        }
        if self.max_claim_retries == 0 {
            return Err(LuckyError::InvalidConfig(
                "at least one claim attempt is required".into(),
            ));
        }
        if self.max_share_count == 0 {
            return Err(LuckyError::InvalidConfig(
                "envelopes need room for at least one share".into(),
            ));
        }
        if bech32::Hrp::parse(&self.token_prefix).is_err() {
            return Err(LuckyError::InvalidConfig(format!(
                "token prefix {:?} is not a valid bech32 prefix",
                self.token_prefix
            )));
        }
        Ok(())
    }
}
