//! Owner-only lookup of an envelope's deposit and claims
use super::envelope::{ShareStatus, TimeStamp};
use super::error::LuckyError;
use super::service::LuckyService;
use super::store::LedgerStore;
use chrono::Utc;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub claimant_id: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditView {
    pub created_at: TimeStamp<Utc>,
    pub deposited_amount: u64,
    pub withdraw_amount: u64,
    pub withdrawals: Vec<Withdrawal>, // in claim-share id order
}

impl AuditView {
    /// Whatever was deposited but has not been claimed, forfeited remainder included.
    pub fn unclaimed_amount(&self) -> u64 {
        self.deposited_amount.saturating_sub(self.withdraw_amount)
    }
}

impl fmt::Display for AuditView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "deposited {} at {}, withdrawn {}",
            self.deposited_amount,
            self.created_at.to_datetime_utc(),
            self.withdraw_amount
        )?;
        for withdrawal in &self.withdrawals {
            writeln!(f, "  {} <- {}", withdrawal.claimant_id, withdrawal.amount)?;
        }
        Ok(())
    }
}

impl<S: LedgerStore> LuckyService<S> {
    pub fn lookup(&self, token: &str, requester_id: &str) -> Result<AuditView, LuckyError> {
        self.lookup_at(token, requester_id, self.clock.now())
    }

    /// Read-only. Takes no envelope lock; claims are single swaps so any
    /// share set read here is a state some serial order of claims produced.
    pub fn lookup_at(
        &self,
        token: &str,
        requester_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<AuditView, LuckyError> {
        let envelope = self.envelope(token)?;
        envelope.check_audit(requester_id, &now)?;

        let shares = self.store.shares(token)?;
        let deposit = shares
            .iter()
            .find(|share| share.status == ShareStatus::DepositCompleted)
            .ok_or_else(|| {
                LuckyError::Corrupted(format!("envelope {token} has no deposit record"))
            })?;

        let withdrawals = shares
            .iter()
            .filter(|share| share.status == ShareStatus::WithdrawCompleted)
            .map(|share| {
                let claimant_id = share.claimant_id.clone().ok_or_else(|| {
                    LuckyError::Corrupted(format!("claimed share {} has no claimant", share.id))
                })?;
                Ok(Withdrawal {
                    claimant_id,
                    amount: share.amount,
                })
            })
            .collect::<Result<Vec<_>, LuckyError>>()?;
        let withdraw_amount: u64 = withdrawals.iter().map(|w| w.amount).sum();

        debug!(
            token,
            claims = withdrawals.len(),
            withdraw_amount,
            "envelope looked up"
        );

        Ok(AuditView {
            created_at: deposit.created_at.clone(),
            deposited_amount: deposit.amount,
            withdraw_amount,
            withdrawals,
        })
    }
}
