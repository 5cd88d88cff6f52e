//! Envelope and share records
use super::error::{LuckyError, RuleViolation};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn checked_add(&self, delta: TimeDelta) -> Option<Self> {
        self.0.checked_add_signed(delta).map(Self)
    }
    pub fn is_after(&self, other: &TimeStamp<Utc>) -> bool {
        self.0 > other.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareStatus {
    #[n(0)]
    DepositCompleted,
    #[n(1)]
    WithdrawStandby,
    #[n(2)]
    WithdrawCompleted,
}

// key is the token, see `store`
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    #[n(0)]
    pub token: String,
    #[n(1)]
    pub owner_id: String,
    #[n(2)]
    pub room_id: String,
    #[n(3)]
    pub created_at: TimeStamp<Utc>,
    #[n(4)]
    pub claim_expires_at: TimeStamp<Utc>,
    #[n(5)]
    pub audit_expires_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Share {
    #[n(0)]
    pub id: u64, // monotonic, lower ids were created first
    #[n(1)]
    pub envelope_token: String,
    #[n(2)]
    pub amount: u64,
    #[n(3)]
    pub claimant_id: Option<String>,
    #[n(4)]
    pub status: ShareStatus,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub modified_at: TimeStamp<Utc>,
}

impl Envelope {
    pub fn new(
        token: String,
        owner_id: String,
        room_id: String,
        created_at: TimeStamp<Utc>,
        claim_window: TimeDelta,
        audit_window: TimeDelta,
    ) -> Result<Self, LuckyError> {
        let claim_expires_at = created_at
            .checked_add(claim_window)
            .ok_or_else(|| LuckyError::InvalidConfig("claim deadline overflows".into()))?;
        let audit_expires_at = created_at
            .checked_add(audit_window)
            .ok_or_else(|| LuckyError::InvalidConfig("audit deadline overflows".into()))?;

        Ok(Self {
            token,
            owner_id,
            room_id,
            created_at,
            claim_expires_at,
            audit_expires_at,
        })
    }

    /// Room, claim window and owner checks, in that order. Share-dependent
    /// checks happen in the claim engine under the envelope lock.
    pub fn check_claim(
        &self,
        claimant_id: &str,
        room_id: &str,
        now: &TimeStamp<Utc>,
    ) -> Result<(), RuleViolation> {
        if self.room_id != room_id {
            return Err(RuleViolation::RoomMismatch);
        }
        if now.is_after(&self.claim_expires_at) {
            return Err(RuleViolation::Expired {
                deadline: self.claim_expires_at.to_datetime_utc(),
            });
        }
        if self.owner_id == claimant_id {
            return Err(RuleViolation::SelfClaimForbidden);
        }
        Ok(())
    }

    pub fn check_audit(&self, requester_id: &str, now: &TimeStamp<Utc>) -> Result<(), RuleViolation> {
        if self.owner_id != requester_id {
            return Err(RuleViolation::Forbidden);
        }
        if now.is_after(&self.audit_expires_at) {
            return Err(RuleViolation::Expired {
                deadline: self.audit_expires_at.to_datetime_utc(),
            });
        }
        Ok(())
    }
}

impl Share {
    pub fn deposit(id: u64, envelope: &Envelope, total: u64) -> Self {
        Self {
            id,
            envelope_token: envelope.token.clone(),
            amount: total,
            claimant_id: Some(envelope.owner_id.clone()),
            status: ShareStatus::DepositCompleted,
            created_at: envelope.created_at.clone(),
            modified_at: envelope.created_at.clone(),
        }
    }
    pub fn standby(id: u64, envelope: &Envelope, amount: u64) -> Self {
        Self {
            id,
            envelope_token: envelope.token.clone(),
            amount,
            claimant_id: None,
            status: ShareStatus::WithdrawStandby,
            created_at: envelope.created_at.clone(),
            modified_at: envelope.created_at.clone(),
        }
    }
    pub fn is_standby(&self) -> bool {
        self.status == ShareStatus::WithdrawStandby
    }
    pub fn is_held_by(&self, user_id: &str) -> bool {
        self.claimant_id.as_deref() == Some(user_id)
    }
}

/// Equal split. The remainder of the division is not handed out to anyone.
pub fn split_amount(total: u64, share_count: u32) -> Result<u64, LuckyError> {
    if share_count == 0 || total < u64::from(share_count) {
        return Err(LuckyError::InvalidSplit { total, share_count });
    }
    Ok(total / u64::from(share_count))
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}
impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_at(ts: TimeStamp<Utc>) -> Envelope {
        Envelope::new(
            "lucky1token".into(),
            "user_owner".into(),
            "room_a".into(),
            ts,
            TimeDelta::minutes(10),
            TimeDelta::days(7),
        )
        .unwrap()
    }

    #[test]
    fn deadlines_follow_creation_time() {
        let created = TimeStamp::new_with(2024, 6, 15, 10, 30, 0).unwrap();
        let envelope = envelope_at(created.clone());

        assert_eq!(
            envelope.claim_expires_at,
            TimeStamp::new_with(2024, 6, 15, 10, 40, 0).unwrap()
        );
        assert_eq!(
            envelope.audit_expires_at,
            TimeStamp::new_with(2024, 6, 22, 10, 30, 0).unwrap()
        );
        assert!(envelope.audit_expires_at.is_after(&envelope.claim_expires_at));
    }

    #[test]
    fn claim_checks_run_in_order() {
        let created = TimeStamp::new_with(2024, 6, 15, 10, 30, 0).unwrap();
        let envelope = envelope_at(created);
        let late = TimeStamp::new_with(2024, 6, 15, 11, 0, 0).unwrap();

        // wrong room wins over expiry and self claim
        assert_eq!(
            envelope.check_claim("user_owner", "room_b", &late),
            Err(RuleViolation::RoomMismatch)
        );
        // expiry wins over self claim
        assert!(matches!(
            envelope.check_claim("user_owner", "room_a", &late),
            Err(RuleViolation::Expired { .. })
        ));
    }

    #[test]
    fn split_drops_remainder() {
        assert_eq!(split_amount(1000, 3).unwrap(), 333);
        assert_eq!(split_amount(5, 5).unwrap(), 1);
        assert!(split_amount(4, 5).is_err());
        assert!(split_amount(100, 0).is_err());
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn share_encoding_keeps_claimant() {
        let envelope = envelope_at(TimeStamp::new());
        let share = Share::deposit(1, &envelope, 1000);

        let encoding = minicbor::to_vec(&share).unwrap();
        let decode: Share = minicbor::decode(&encoding).unwrap();

        assert_eq!(decode.claimant_id.as_deref(), Some("user_owner"));
        assert_eq!(decode.status, ShareStatus::DepositCompleted);
    }
}
