//! The rule store: capacity rules, blackout rules and the daily quota policy.
//!
//! A `RuleSet` is an immutable snapshot once published. Writers clone it,
//! apply one event and publish the result under a bumped `revision`, so a
//! reader never sees a half-applied edit.

use chrono::{Datelike, NaiveDate, Weekday};
use ulid::Ulid;

use crate::calendar::BusinessCalendar;
use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;

/// Why (or whether) a date is closed before any slot is considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    Weekend,
    Blackout(String),
    /// Open, minus these time-bounded blackout windows (unsorted, may overlap).
    Open { blocked: Vec<Span> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub revision: u64,
    /// Sorted by id, which is creation order.
    capacity_rules: Vec<SlotCapacityRule>,
    blackout_rules: Vec<BlackoutRule>,
    /// Newest last.
    quota_history: Vec<DailyQuotaPolicy>,
    initial_quota: DailyQuotaPolicy,
}

impl RuleSet {
    pub fn new(initial_quota: DailyQuotaPolicy) -> Self {
        Self {
            revision: 0,
            capacity_rules: Vec::new(),
            blackout_rules: Vec::new(),
            quota_history: Vec::new(),
            initial_quota,
        }
    }

    pub fn capacity_rules(&self) -> &[SlotCapacityRule] {
        &self.capacity_rules
    }

    pub fn blackout_rules(&self) -> &[BlackoutRule] {
        &self.blackout_rules
    }

    pub fn quota_history(&self) -> &[DailyQuotaPolicy] {
        &self.quota_history
    }

    pub fn quota(&self) -> &DailyQuotaPolicy {
        self.quota_history.last().unwrap_or(&self.initial_quota)
    }

    pub fn capacity_rule(&self, id: &Ulid) -> Option<&SlotCapacityRule> {
        self.capacity_rules.iter().find(|r| r.id == *id)
    }

    pub fn blackout_rule(&self, id: &Ulid) -> Option<&BlackoutRule> {
        self.blackout_rules.iter().find(|r| r.id == *id)
    }

    /// Weekday-scoped beats default; within a class the newest rule wins.
    pub fn effective_rule(&self, weekday: Weekday, minute: Minute) -> Option<&SlotCapacityRule> {
        let mut scoped = None;
        let mut default = None;
        for rule in self.capacity_rules.iter().filter(|r| r.matches(weekday, minute)) {
            if rule.weekday.is_some() {
                scoped = Some(rule);
            } else {
                default = Some(rule);
            }
        }
        scoped.or(default)
    }

    pub fn effective_capacity(&self, weekday: Weekday, minute: Minute, calendar: &BusinessCalendar) -> u32 {
        self.effective_rule(weekday, minute)
            .map_or(calendar.fallback_capacity(), |r| r.max_concurrent)
    }

    pub fn closure(&self, date: NaiveDate) -> Closure {
        if BusinessCalendar::is_weekend(date) {
            return Closure::Weekend;
        }
        let mut blocked = Vec::new();
        for rule in self.blackout_rules.iter().filter(|r| r.applies_on(date)) {
            match rule.window {
                None => return Closure::Blackout(rule.reason.clone()),
                Some(window) => blocked.push(window),
            }
        }
        Closure::Open { blocked }
    }

    /// Apply a rule event in place. Appointment events are ignored.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::CapacityRuleSaved { rule } => {
                match self.capacity_rules.binary_search_by_key(&rule.id, |r| r.id) {
                    Ok(pos) => self.capacity_rules[pos] = rule.clone(),
                    Err(pos) => self.capacity_rules.insert(pos, rule.clone()),
                }
            }
            Event::CapacityRuleRemoved { id } => self.capacity_rules.retain(|r| r.id != *id),
            Event::BlackoutRuleSaved { rule } => {
                match self.blackout_rules.iter_mut().find(|r| r.id == rule.id) {
                    Some(existing) => *existing = rule.clone(),
                    None => self.blackout_rules.push(rule.clone()),
                }
            }
            Event::BlackoutRuleRemoved { id } => self.blackout_rules.retain(|r| r.id != *id),
            Event::QuotaPolicySet { policy } => {
                self.quota_history.push(policy.clone());
                if self.quota_history.len() > MAX_QUOTA_HISTORY {
                    let excess = self.quota_history.len() - MAX_QUOTA_HISTORY;
                    self.quota_history.drain(..excess);
                }
            }
            Event::AppointmentAdmitted { .. } | Event::AppointmentTransitioned { .. } => return,
        }
        self.revision += 1;
    }
}

// ── Validation ───────────────────────────────────────────────────

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}

pub fn validate_window(span: &Span) -> Result<(), EngineError> {
    if span.end <= span.start {
        return Err(invalid(format!(
            "end time must be after start time ({}-{})",
            span.start, span.end
        )));
    }
    if span.end > MINUTES_PER_DAY {
        return Err(invalid("end time past midnight"));
    }
    Ok(())
}

pub fn validate_capacity_rule(rule: &SlotCapacityRule) -> Result<(), EngineError> {
    validate_window(&rule.span)?;
    if rule.max_concurrent == 0 || rule.max_concurrent > MAX_SLOT_CAPACITY {
        return Err(invalid(format!(
            "max_concurrent must be between 1 and {MAX_SLOT_CAPACITY}"
        )));
    }
    Ok(())
}

pub fn validate_blackout_rule(rule: &BlackoutRule) -> Result<(), EngineError> {
    if let BlackoutScope::Recurring(days) = &rule.scope
        && days.is_empty()
    {
        return Err(invalid("recurring blackout needs at least one weekday"));
    }
    if let BlackoutScope::Date(d) = &rule.scope {
        validate_date(*d)?;
    }
    if let Some(window) = &rule.window {
        validate_window(window)?;
    }
    if rule.reason.len() > MAX_REASON_LEN {
        return Err(EngineError::LimitExceeded("blackout reason too long"));
    }
    Ok(())
}

pub fn validate_daily_limit(limit: u32) -> Result<(), EngineError> {
    if !(MIN_DAILY_LIMIT..=MAX_DAILY_LIMIT).contains(&limit) {
        return Err(invalid(format!(
            "daily limit must be between {MIN_DAILY_LIMIT} and {MAX_DAILY_LIMIT}, got {limit}"
        )));
    }
    Ok(())
}

pub fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if !(MIN_BOOKABLE_YEAR..=MAX_BOOKABLE_YEAR).contains(&date.year()) {
        return Err(invalid(format!("date {date} out of range")));
    }
    Ok(())
}
