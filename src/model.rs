use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

/// Minutes since midnight. Every time-of-day computation runs on these.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

pub fn minute_of(time: NaiveTime) -> Minute {
    time.hour() * 60 + time.minute()
}

/// Inverse of [`minute_of`] for minutes inside the day.
pub fn time_of(minute: Minute) -> NaiveTime {
    debug_assert!(minute < MINUTES_PER_DAY, "minute {minute} is past midnight");
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap_or(NaiveTime::MIN)
}

/// Half-open interval `[start, end)` in minutes of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn len(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_minute(&self, m: Minute) -> bool {
        self.start <= m && m < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Approved,
    Completed,
    Cancelled,
    Declined,
}

impl Status {
    /// Only `pending` and `approved` occupy quota and capacity.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Pending | Status::Approved)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Approved => "approved",
            Status::Completed => "completed",
            Status::Cancelled => "cancelled",
            Status::Declined => "declined",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staff or owner action that moves an appointment through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Approve,
    Decline,
    Complete,
    Cancel,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Approve, Action::Decline, Action::Complete, Action::Cancel];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::Decline => "decline",
            Action::Complete => "complete",
            Action::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Action> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Action::Approve),
            "decline" => Some(Action::Decline),
            "complete" => Some(Action::Complete),
            "cancel" => Some(Action::Cancel),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Staff,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub id: Ulid,
    pub user_id: Ulid,
    pub staff_id: Option<Ulid>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: Status,
    /// Decline or cancel reason.
    pub reason: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl AppointmentRecord {
    pub fn minute(&self) -> Minute {
        minute_of(self.time)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

// ── Rules ────────────────────────────────────────────────────────

/// Set of weekdays packed into a bitmask (bit 0 = Monday).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Weekdays(u8);

impl Weekdays {
    pub const EMPTY: Weekdays = Weekdays(0);

    pub fn with(self, day: Weekday) -> Self {
        Weekdays(self.0 | (1 << day.num_days_from_monday()))
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        (0..7u8)
            .filter(move |bit| self.0 & (1 << bit) != 0)
            .filter_map(|bit| Weekday::try_from(bit).ok())
    }

    /// Parse a comma-separated list such as `"mon,fri"`.
    pub fn parse(s: &str) -> Option<Weekdays> {
        let mut set = Weekdays::EMPTY;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            set = set.with(part.parse::<Weekday>().ok()?);
        }
        Some(set)
    }
}

impl FromIterator<Weekday> for Weekdays {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        iter.into_iter().fold(Weekdays::EMPTY, Weekdays::with)
    }
}

impl fmt::Display for Weekdays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|d| d.to_string().to_lowercase()).collect();
        f.write_str(&names.join(","))
    }
}

/// Caps concurrent admitted appointments over a time range, optionally only on one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCapacityRule {
    pub id: Ulid,
    /// `None` applies every day.
    pub weekday: Option<Weekday>,
    pub span: Span,
    pub max_concurrent: u32,
    pub active: bool,
}

impl SlotCapacityRule {
    pub fn matches(&self, weekday: Weekday, minute: Minute) -> bool {
        self.active
            && self.span.contains_minute(minute)
            && self.weekday.is_none_or(|d| d == weekday)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlackoutScope {
    Date(NaiveDate),
    Recurring(Weekdays),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutRule {
    pub id: Ulid,
    pub scope: BlackoutScope,
    /// `None` blocks the whole day.
    pub window: Option<Span>,
    pub reason: String,
}

impl BlackoutRule {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match &self.scope {
            BlackoutScope::Date(d) => *d == date,
            BlackoutScope::Recurring(days) => days.contains(date.weekday()),
        }
    }

    pub fn is_whole_day(&self) -> bool {
        self.window.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuotaPolicy {
    pub max_per_day: u32,
    pub active: bool,
    pub note: Option<String>,
    pub modified_by: Option<Ulid>,
    pub modified_at: Ms,
}

impl DailyQuotaPolicy {
    /// The policy in force before an administrator has ever set one.
    pub fn initial(max_per_day: u32) -> Self {
        Self {
            max_per_day,
            active: true,
            note: None,
            modified_by: None,
            modified_at: 0,
        }
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types, flat. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentAdmitted {
        record: AppointmentRecord,
    },
    AppointmentTransitioned {
        id: Ulid,
        date: NaiveDate,
        status: Status,
        staff_id: Option<Ulid>,
        reason: Option<String>,
        at: Ms,
    },
    CapacityRuleSaved {
        rule: SlotCapacityRule,
    },
    CapacityRuleRemoved {
        id: Ulid,
    },
    BlackoutRuleSaved {
        rule: BlackoutRule,
    },
    BlackoutRuleRemoved {
        id: Ulid,
    },
    QuotaPolicySet {
        policy: DailyQuotaPolicy,
    },
}

impl Event {
    /// The ledger day an appointment event belongs to; `None` for rule events.
    pub fn ledger_date(&self) -> Option<NaiveDate> {
        match self {
            Event::AppointmentAdmitted { record } => Some(record.date),
            Event::AppointmentTransitioned { date, .. } => Some(*date),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub time: NaiveTime,
    pub booked: u32,
    pub capacity: u32,
    pub remaining: u32,
}

impl SlotAvailability {
    pub fn is_available(&self) -> bool {
        self.booked < self.capacity
    }
}

/// A day's slots. `closed` carries the reason when the whole day is blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySlots {
    pub date: NaiveDate,
    pub closed: Option<String>,
    pub slots: Vec<SlotAvailability>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyLimitStatus {
    pub user_id: Ulid,
    pub date: NaiveDate,
    /// `None` while the quota policy is switched off.
    pub limit: Option<u32>,
    pub used: u32,
    pub remaining: Option<u32>,
    pub reached: bool,
    pub next_available: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Blackout,
    QuotaExceeded,
    CapacityExceeded,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Blackout => "blackout",
            RejectReason::QuotaExceeded => "quota_exceeded",
            RejectReason::CapacityExceeded => "capacity_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
    pub retry_at: Option<NaiveDateTime>,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            retry_at: None,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason.as_str(), self.message)?;
        if let Some(at) = self.retry_at {
            write!(f, " (retry at {})", at.format("%Y-%m-%d %H:%M"))?;
        }
        Ok(())
    }
}

/// Outcome of an admission attempt. A rejection is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(AppointmentRecord),
    Rejected(Rejection),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Admission::Rejected(r) => Some(r),
            Admission::Admitted(_) => None,
        }
    }
}
