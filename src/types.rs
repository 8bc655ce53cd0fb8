//! Shared value types: timestamps, approval status and the acting user
use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// derived ordering would require `Utc: Ord`
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// `None` when the fields do not name a valid instant.
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Whole calendar days between this stamp and `now`, never negative.
    pub fn days_until(&self, now: DateTime<Utc>) -> i64 {
        (now.date_naive() - self.0.date_naive()).num_days().max(0)
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

impl serde::Serialize for TimeStamp<Utc> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Approval status of a stock entry, derived from its audit trail.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Pending(#[n(0)] u8),
    #[n(2)]
    FullyApproved,
    #[n(3)]
    Rejected,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FullyApproved | Self::Rejected)
    }
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
    pub fn pending_level(&self) -> Option<u8> {
        match self {
            Self::Pending(level) => Some(*level),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "Draft"),
            Self::Pending(level) => write!(f, "Pending Level {level}"),
            Self::FullyApproved => write!(f, "Fully Approved"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}

impl serde::Serialize for ApprovalStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Document lifecycle, independent of approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DocStatus {
    Draft,
    Submitted,
    Cancelled,
}

// roles checked in order when picking the role recorded on audit entries
const PRIORITY_ROLES: [&str; 6] = [
    "System Manager",
    "Warehouse Manager",
    "Warehouse Supervisor",
    "Production Manager",
    "Stock Manager",
    "Stock User",
];

/// The user performing an action, with the roles they hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user: String,
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(user: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            user: user.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|r| self.has_role(r.as_ref()))
    }
    pub fn primary_role(&self) -> Option<String> {
        PRIORITY_ROLES
            .iter()
            .find(|role| self.has_role(role))
            .map(|role| role.to_string())
            .or_else(|| self.roles.first().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let mut stamps = vec![
            TimeStamp::new_with(2025, 3, 2, 0, 0, 0).unwrap(),
            TimeStamp::new_with(2024, 12, 31, 23, 59, 59).unwrap(),
            TimeStamp::new_with(2025, 3, 1, 12, 0, 0).unwrap(),
        ];
        stamps.sort();
        let days: Vec<_> = stamps.iter().map(|s| s.to_datetime_utc().format("%Y-%m-%d").to_string()).collect();
        assert_eq!(days, vec!["2024-12-31", "2025-03-01", "2025-03-02"]);
        assert_eq!(stamps.iter().max(), stamps.last());
        assert!(Some(stamps[0].clone()) < Some(stamps[1].clone()));
    }

    #[test]
    fn invalid_dates_are_rejected() {
        assert!(TimeStamp::new_with(2025, 2, 30, 0, 0, 0).is_none());
        assert!(TimeStamp::new_with(2025, 1, 1, 24, 0, 0).is_none());
    }

    #[test]
    fn days_until_counts_calendar_days() {
        let requested = TimeStamp::new_with(2025, 3, 1, 23, 0, 0).unwrap();
        let now = TimeStamp::new_with(2025, 3, 3, 1, 0, 0).unwrap().to_datetime_utc();
        assert_eq!(requested.days_until(now), 2);

        let earlier = TimeStamp::new_with(2025, 2, 1, 0, 0, 0).unwrap().to_datetime_utc();
        assert_eq!(requested.days_until(earlier), 0);
    }

    #[test]
    fn status_labels() {
        assert_eq!(ApprovalStatus::Draft.to_string(), "Draft");
        assert_eq!(ApprovalStatus::Pending(2).to_string(), "Pending Level 2");
        assert_eq!(ApprovalStatus::FullyApproved.to_string(), "Fully Approved");
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert_eq!(ApprovalStatus::Pending(3).pending_level(), Some(3));
    }

    #[test]
    fn primary_role_prefers_warehouse_roles() {
        let actor = Actor::new("kim", &["Kitting Supervisor", "Warehouse Supervisor"]);
        assert_eq!(actor.primary_role().as_deref(), Some("Warehouse Supervisor"));

        let actor = Actor::new("lee", &["Kitting Supervisor"]);
        assert_eq!(actor.primary_role().as_deref(), Some("Kitting Supervisor"));

        let actor = Actor::new("nobody", &[]);
        assert_eq!(actor.primary_role(), None);
    }
}
