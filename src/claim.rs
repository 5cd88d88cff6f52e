//! Claiming standby shares
//!
//! Every claim on one envelope runs inside that envelope's lock: the rule
//! checks, the search for a standby share and the status swap all see the
//! same share set. Claims on different envelopes take different locks.
use super::envelope::{ShareStatus, TimeStamp};
use super::error::{LuckyError, RuleViolation};
use super::service::LuckyService;
use super::store::LedgerStore;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub share_id: u64,
    pub status: ShareStatus,
    pub amount: u64,
    pub created_at: TimeStamp<Utc>,
    pub modified_at: TimeStamp<Utc>,
}

/// One mutex per envelope token while a claim on it is in flight.
#[derive(Default)]
pub(crate) struct EnvelopeLocks {
    scopes: DashMap<String, Arc<Mutex<()>>>,
}

impl EnvelopeLocks {
    pub(crate) fn scope(&self, token: &str) -> Arc<Mutex<()>> {
        // clone out of the map so the shard guard is released before locking
        self.scopes.entry(token.to_owned()).or_default().clone()
    }

    /// Drop the token's mutex once no claim holds a handle to it. Callers
    /// must have dropped their own handle first.
    pub(crate) fn release(&self, token: &str) {
        self.scopes
            .remove_if(token, |_, scope| Arc::strong_count(scope) == 1);
    }

    pub(crate) fn len(&self) -> usize {
        self.scopes.len()
    }
}

impl<S: LedgerStore> LuckyService<S> {
    /// Claim a share at the service clock's current time.
    pub fn claim(
        &self,
        token: &str,
        claimant_id: &str,
        room_id: &str,
    ) -> Result<ClaimReceipt, LuckyError> {
        self.claim_at(token, claimant_id, room_id, self.clock.now())
    }

    /// Assign the earliest created standby share of the envelope to `claimant_id`.
    ///
    /// Checks run in this order, the first failure is returned:
    /// envelope exists, room matches, claim window still open, claimant is not
    /// the owner, claimant holds no share yet, a standby share is left.
    pub fn claim_at(
        &self,
        token: &str,
        claimant_id: &str,
        room_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<ClaimReceipt, LuckyError> {
        // unknown tokens never get a lock entry
        if self.store.envelope(token)?.is_none() {
            return Err(LuckyError::NotFound(token.to_owned()));
        }

        let scope = self.locks.scope(token);
        let claimed = {
            let _guard = scope.lock();
            self.claim_locked(token, claimant_id, room_id, now)
        };
        drop(scope);
        self.locks.release(token);
        claimed
    }

    fn claim_locked(
        &self,
        token: &str,
        claimant_id: &str,
        room_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<ClaimReceipt, LuckyError> {
        let attempts = self.config.max_claim_retries;
        for attempt in 1..=attempts {
            let envelope = self
                .store
                .envelope(token)?
                .ok_or_else(|| LuckyError::NotFound(token.to_owned()))?;

            if let Err(rule) = envelope.check_claim(claimant_id, room_id, &now) {
                debug!(token, claimant = claimant_id, %rule, "claim rejected");
                return Err(rule.into());
            }

            let shares = self.store.shares(token)?;
            if shares.iter().any(|share| share.is_held_by(claimant_id)) {
                debug!(token, claimant = claimant_id, "duplicate claim rejected");
                return Err(RuleViolation::DuplicateClaim.into());
            }

            // shares come back in id order
            let Some(share) = shares.iter().find(|share| share.is_standby()) else {
                debug!(token, claimant = claimant_id, "no shares remaining");
                return Err(LuckyError::NoSharesRemaining);
            };

            let swapped = self.store.compare_and_set_share_status(
                token,
                share.id,
                ShareStatus::WithdrawStandby,
                ShareStatus::WithdrawCompleted,
                claimant_id,
                &now,
            )?;
            if swapped {
                info!(
                    token,
                    claimant = claimant_id,
                    share_id = share.id,
                    amount = share.amount,
                    "share claimed"
                );
                return Ok(ClaimReceipt {
                    share_id: share.id,
                    status: ShareStatus::WithdrawCompleted,
                    amount: share.amount,
                    created_at: share.created_at.clone(),
                    modified_at: now,
                });
            }

            warn!(
                token,
                share_id = share.id,
                attempt,
                "share changed underneath the claim, retrying"
            );
        }

        Err(LuckyError::ClaimContention { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Envelope, Share};
    use crate::store::MemoryLedger;
    use chrono::TimeDelta;

    /// Loses the first `misses` swaps, as if another writer got there first.
    struct FlakyLedger {
        inner: MemoryLedger,
        misses: Mutex<u32>,
    }

    impl LedgerStore for FlakyLedger {
        fn next_share_id(&self) -> Result<u64, LuckyError> {
            self.inner.next_share_id()
        }
        fn envelope(&self, token: &str) -> Result<Option<Envelope>, LuckyError> {
            self.inner.envelope(token)
        }
        fn save_envelope_with_shares(
            &self,
            envelope: &Envelope,
            shares: &[Share],
        ) -> Result<(), LuckyError> {
            self.inner.save_envelope_with_shares(envelope, shares)
        }
        fn shares(&self, token: &str) -> Result<Vec<Share>, LuckyError> {
            self.inner.shares(token)
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
            let mut misses = self.misses.lock();
            if *misses > 0 {
                *misses -= 1;
                return Ok(false);
            }
            self.inner.compare_and_set_share_status(
                token,
                share_id,
                expected,
                new,
                claimant_id,
                modified_at,
            )
        }
    }

    fn flaky_service(misses: u32) -> LuckyService<FlakyLedger> {
        LuckyService::with_store(FlakyLedger {
            inner: MemoryLedger::new(),
            misses: Mutex::new(misses),
        })
    }

    #[test]
    fn lost_swaps_are_retried() {
        let service = flaky_service(3);
        let now = TimeStamp::new();
        let receipt = service.create_at("user_owner", "room_a", 100, 2, now.clone()).unwrap();

        let claimed = service
            .claim_at(&receipt.token, "user_a", "room_a", now)
            .unwrap();
        assert_eq!(claimed.amount, 50);
        assert_eq!(service.remaining_shares(&receipt.token).unwrap(), 1);
    }

    #[test]
    fn retries_are_bounded() {
        let service = flaky_service(u32::MAX);
        let now = TimeStamp::new();
        let receipt = service.create_at("user_owner", "room_a", 100, 2, now.clone()).unwrap();

        let err = service
            .claim_at(&receipt.token, "user_a", "room_a", now)
            .unwrap_err();
        assert!(matches!(err, LuckyError::ClaimContention { attempts: 8 }));
        assert_eq!(service.remaining_shares(&receipt.token).unwrap(), 2);
    }

    #[test]
    fn claim_on_the_deadline_succeeds() {
        let service = LuckyService::with_store(MemoryLedger::new());
        let created = TimeStamp::new_with(2024, 6, 15, 10, 30, 0).unwrap();
        let receipt = service.create_at("user_owner", "room_a", 100, 2, created.clone()).unwrap();

        let deadline = created.checked_add(TimeDelta::minutes(10)).unwrap();
        assert!(
            service
                .claim_at(&receipt.token, "user_a", "room_a", deadline.clone())
                .is_ok()
        );

        let late = deadline.checked_add(TimeDelta::nanoseconds(1)).unwrap();
        let err = service
            .claim_at(&receipt.token, "user_b", "room_a", late)
            .unwrap_err();
        assert!(matches!(err.rule(), Some(RuleViolation::Expired { .. })));
    }

    #[test]
    fn locks_are_released_after_claims() {
        let service = LuckyService::with_store(MemoryLedger::new());
        let receipt = service.create("user_owner", "room_a", 100, 2).unwrap();

        for i in 0..100 {
            let err = service
                .claim(&format!("missing{i}"), "user_a", "room_a")
                .unwrap_err();
            assert!(matches!(err, LuckyError::NotFound(_)));
        }
        assert_eq!(service.locks.len(), 0);

        service.claim(&receipt.token, "user_a", "room_a").unwrap();
        assert!(service.claim(&receipt.token, "user_a", "room_a").is_err());
        assert_eq!(service.locks.len(), 0);
    }

    #[test]
    fn held_lock_survives_release() {
        let locks = EnvelopeLocks::default();
        let held = locks.scope("a");
        locks.release("a");
        assert_eq!(locks.len(), 1);
        assert!(Arc::ptr_eq(&held, &locks.scope("a")));

        drop(held);
        locks.release("a");
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn same_token_shares_one_lock() {
        let locks = EnvelopeLocks::default();
        assert!(Arc::ptr_eq(&locks.scope("a"), &locks.scope("a")));
        assert!(!Arc::ptr_eq(&locks.scope("a"), &locks.scope("b")));
    }
}
