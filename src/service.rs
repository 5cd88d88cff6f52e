//! Service layer API for envelope operations
use super::claim::EnvelopeLocks;
use super::clock::{Clock, SystemClock};
use super::config::EnvelopeConfig;
use super::envelope::{Envelope, Share, TimeStamp, split_amount};
use super::error::LuckyError;
use super::store::{LedgerStore, SledLedger};
use super::utils::{Bech32Tokens, TokenGenerator};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReceipt {
    pub token: String,
    pub owner_id: String,
    pub created_at: TimeStamp<Utc>,
}

pub struct LuckyService<S = SledLedger> {
    pub(crate) store: S,
    pub(crate) config: EnvelopeConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) tokens: Arc<dyn TokenGenerator>,
    // set by `with_tokens`; `with_config` then leaves the generator alone
    pub(crate) custom_tokens: bool,
    pub(crate) locks: EnvelopeLocks,
}

impl LuckyService<SledLedger> {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self::with_store(SledLedger::new(instance))
    }
}

impl<S: LedgerStore> LuckyService<S> {
    pub fn with_store(store: S) -> Self {
        let config = EnvelopeConfig::default();
        Self {
            store,
            tokens: Arc::new(Bech32Tokens::new(&config.token_prefix)),
            config,
            clock: Arc::new(SystemClock),
            custom_tokens: false,
            locks: EnvelopeLocks::default(),
        }
    }

    /// Replace the configuration. The built-in generator switches to the new
    /// token prefix; a generator installed with `with_tokens` is kept.
    pub fn with_config(mut self, config: EnvelopeConfig) -> Result<Self, LuckyError> {
        config.validate()?;
        if !self.custom_tokens {
            self.tokens = Arc::new(Bech32Tokens::new(&config.token_prefix));
        }
        self.config = config;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenGenerator>) -> Self {
        self.tokens = tokens;
        self.custom_tokens = true;
        self
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    pub fn envelope(&self, token: &str) -> Result<Envelope, LuckyError> {
        self.store
            .envelope(token)?
            .ok_or_else(|| LuckyError::NotFound(token.to_owned()))
    }

    /// Create an envelope stamped with the service clock.
    pub fn create(
        &self,
        owner_id: &str,
        room_id: &str,
        total: u64,
        share_count: u32,
    ) -> Result<CreateReceipt, LuckyError> {
        self.create_at(owner_id, room_id, total, share_count, self.clock.now())
    }

    /// Deposit `total` and split it into `share_count` equal standby shares.
    /// The envelope, its deposit record and the standby shares are written
    /// as one batch.
    pub fn create_at(
        &self,
        owner_id: &str,
        room_id: &str,
        total: u64,
        share_count: u32,
        now: TimeStamp<Utc>,
    ) -> Result<CreateReceipt, LuckyError> {
        if share_count > self.config.max_share_count {
            return Err(LuckyError::TooManyShares {
                share_count,
                max: self.config.max_share_count,
            });
        }
        let amount = split_amount(total, share_count)?;
        let token = self.tokens.new_token()?;

        let envelope = Envelope::new(
            token,
            owner_id.to_owned(),
            room_id.to_owned(),
            now,
            self.config.claim_window,
            self.config.audit_window,
        )?;

        // deposit first so it carries the lowest id
        let mut shares = Vec::with_capacity(share_count as usize + 1);
        shares.push(Share::deposit(self.store.next_share_id()?, &envelope, total));
        for _ in 0..share_count {
            shares.push(Share::standby(self.store.next_share_id()?, &envelope, amount));
        }

        self.store.save_envelope_with_shares(&envelope, &shares)?;

        info!(
            token = %envelope.token,
            owner = %envelope.owner_id,
            room = %envelope.room_id,
            total,
            share_count,
            share_amount = amount,
            "envelope created"
        );

        Ok(CreateReceipt {
            token: envelope.token,
            owner_id: envelope.owner_id,
            created_at: envelope.created_at,
        })
    }

    /// Standby shares still waiting for a claimant.
    pub fn remaining_shares(&self, token: &str) -> Result<usize, LuckyError> {
        self.envelope(token)?;
        Ok(self
            .store
            .shares(token)?
            .iter()
            .filter(|share| share.is_standby())
            .count())
    }
}
