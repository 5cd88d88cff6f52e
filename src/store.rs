//! Envelope and share persistence
//!
//! All records live in one sled tree so an envelope and its shares can be
//! written with a single atomic batch:
//!
//! - `envelope/{token}` holds the CBOR encoded [`Envelope`]
//! - `share/` + token length (u32, big endian) + token + id (u64, big endian)
//!   holds a CBOR encoded [`Share`]. The length keeps one token's prefix from
//!   matching a longer token, the id order makes a prefix scan return shares
//!   in creation order
use super::envelope::{Envelope, Share, ShareStatus, TimeStamp};
use super::error::LuckyError;
use chrono::Utc;
use parking_lot::RwLock;
use sled::Batch;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage capability the envelope service runs against.
pub trait LedgerStore: Send + Sync {
    /// Next share id. Ids increase monotonically.
    fn next_share_id(&self) -> Result<u64, LuckyError>;

    fn envelope(&self, token: &str) -> Result<Option<Envelope>, LuckyError>;

    /// Persist an envelope together with its shares. Either everything is
    /// visible afterwards or nothing is.
    fn save_envelope_with_shares(
        &self,
        envelope: &Envelope,
        shares: &[Share],
    ) -> Result<(), LuckyError>;

    /// Every share of the envelope ordered by id.
    fn shares(&self, token: &str) -> Result<Vec<Share>, LuckyError>;

    /// Move a share from `expected` to `new`, recording the claimant. Returns
    /// `false` when the share was not in `expected` at the time of the swap.
    fn compare_and_set_share_status(
        &self,
        token: &str,
        share_id: u64,
        expected: ShareStatus,
        new: ShareStatus,
        claimant_id: &str,
        modified_at: &TimeStamp<Utc>,
    ) -> Result<bool, LuckyError>;
}

fn envelope_key(token: &str) -> Vec<u8> {
    format!("envelope/{token}").into_bytes()
}

fn share_prefix(token: &str) -> Vec<u8> {
    let token = token.as_bytes();
    let mut prefix = Vec::with_capacity(6 + 4 + token.len());
    prefix.extend_from_slice(b"share/");
    prefix.extend_from_slice(&(token.len() as u32).to_be_bytes());
    prefix.extend_from_slice(token);
    prefix
}

fn share_key(token: &str, share_id: u64) -> Vec<u8> {
    let mut key = share_prefix(token);
    key.extend_from_slice(&share_id.to_be_bytes());
    key
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, LuckyError> {
    minicbor::to_vec(value).map_err(|e| LuckyError::Codec(e.to_string()))
}

fn decode<'b, T: minicbor::Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T, LuckyError> {
    minicbor::decode(bytes).map_err(|e| LuckyError::Codec(e.to_string()))
}

fn transitioned(
    share: &Share,
    expected: ShareStatus,
    new: ShareStatus,
    claimant_id: &str,
    modified_at: &TimeStamp<Utc>,
) -> Option<Share> {
    if share.status != expected {
        return None;
    }
    let mut next = share.clone();
    next.status = new;
    next.claimant_id = Some(claimant_id.to_owned());
    next.modified_at = modified_at.clone();
    Some(next)
}

pub struct SledLedger {
    instance: Arc<sled::Db>,
}

impl SledLedger {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }
}

impl LedgerStore for SledLedger {
    fn next_share_id(&self) -> Result<u64, LuckyError> {
        Ok(self.instance.generate_id()?)
    }

    fn envelope(&self, token: &str) -> Result<Option<Envelope>, LuckyError> {
        match self.instance.get(envelope_key(token))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_envelope_with_shares(
        &self,
        envelope: &Envelope,
        shares: &[Share],
    ) -> Result<(), LuckyError> {
        let mut batch = Batch::default();
        batch.insert(envelope_key(&envelope.token), encode(envelope)?);
        for share in shares {
            batch.insert(share_key(&share.envelope_token, share.id), encode(share)?);
        }
        self.instance.apply_batch(batch)?;
        Ok(())
    }

    fn shares(&self, token: &str) -> Result<Vec<Share>, LuckyError> {
        self.instance
            .scan_prefix(share_prefix(token))
            .map(|entry| {
                let (_, bytes) = entry?;
                decode::<Share>(&bytes)
            })
            .filter(|share| {
                share
                    .as_ref()
                    .map_or(true, |share| share.envelope_token == token)
            })
            .collect()
    }

    fn compare_and_set_share_status(
        &self,
        token: &str,
        share_id: u64,
        expected: ShareStatus,
        new: ShareStatus,
        claimant_id: &str,
        modified_at: &TimeStamp<Utc>,
    ) -> Result<bool, LuckyError> {
        let key = share_key(token, share_id);
        let Some(current) = self.instance.get(&key)? else {
            return Err(LuckyError::Corrupted(format!(
                "share {share_id} of envelope {token} is missing"
            )));
        };
        let share: Share = decode(&current)?;
        let Some(next) = transitioned(&share, expected, new, claimant_id, modified_at) else {
            return Ok(false);
        };

        // the swap only lands if nobody rewrote the share since we read it
        let swapped = self
            .instance
            .compare_and_swap(&key, Some(current), Some(encode(&next)?))?;
        Ok(swapped.is_ok())
    }
}

#[derive(Default)]
struct MemoryTables {
    envelopes: BTreeMap<String, Envelope>,
    shares: BTreeMap<(String, u64), Share>,
}

/// In-process ledger. Nothing survives the process.
#[derive(Default)]
pub struct MemoryLedger {
    tables: RwLock<MemoryTables>,
    next_id: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedger {
    fn next_share_id(&self) -> Result<u64, LuckyError> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn envelope(&self, token: &str) -> Result<Option<Envelope>, LuckyError> {
        Ok(self.tables.read().envelopes.get(token).cloned())
    }

    fn save_envelope_with_shares(
        &self,
        envelope: &Envelope,
        shares: &[Share],
    ) -> Result<(), LuckyError> {
        let mut tables = self.tables.write();
        tables
            .envelopes
            .insert(envelope.token.clone(), envelope.clone());
        for share in shares {
            tables
                .shares
                .insert((share.envelope_token.clone(), share.id), share.clone());
        }
        Ok(())
    }

    fn shares(&self, token: &str) -> Result<Vec<Share>, LuckyError> {
        let tables = self.tables.read();
        Ok(tables
            .shares
            .range((token.to_owned(), 0)..=(token.to_owned(), u64::MAX))
            .map(|(_, share)| share.clone())
            .collect())
    }

    fn compare_and_set_share_status(
        &self,
        token: &str,
        share_id: u64,
        expected: ShareStatus,
        new: ShareStatus,
        claimant_id: &str,
        modified_at: &TimeStamp<Utc>,
    ) -> Result<bool, LuckyError> {
        let mut tables = self.tables.write();
        let Some(share) = tables.shares.get_mut(&(token.to_owned(), share_id)) else {
            return Err(LuckyError::Corrupted(format!(
                "share {share_id} of envelope {token} is missing"
            )));
        };
        match transitioned(share, expected, new, claimant_id, modified_at) {
            Some(next) => {
                *share = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
