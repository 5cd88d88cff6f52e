//! Lucky money envelopes: an owner deposits an amount into a room-scoped
//! envelope, other room members each claim one equal share within the claim
//! window, and the owner can audit the outcome until the audit window closes.

pub mod audit;
pub mod claim;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod service;
pub mod store;
pub mod utils;

pub use audit::{AuditView, Withdrawal};
pub use claim::ClaimReceipt;
pub use error::{LuckyError, RuleViolation};
pub use service::{CreateReceipt, LuckyService};
