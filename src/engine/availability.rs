use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};

use crate::calendar::BusinessCalendar;
use crate::limits::NEXT_AVAILABLE_LOOKAHEAD_DAYS;
use crate::model::*;
use crate::observability::{AVAILABILITY_CACHE_HITS_TOTAL, AVAILABILITY_CACHE_MISSES_TOTAL};
use crate::rules::{Closure, RuleSet, validate_date};

use super::ledger::DayLedger;
use super::{Engine, EngineError};

// ── Availability Algorithm ────────────────────────────────────────

/// Slot starts left open on `date` once weekend, blackout and lunch rules are
/// applied, or the reason the whole day is closed.
///
/// A slot survives only if its full `[start, start + slot)` span lies inside
/// business hours minus lunch minus every time-bounded blackout window.
pub fn open_slots(date: NaiveDate, rules: &RuleSet, calendar: &BusinessCalendar) -> Result<Vec<Minute>, String> {
    let windows = match rules.closure(date) {
        Closure::Weekend => return Err("weekend".into()),
        Closure::Blackout(reason) if reason.is_empty() => return Err("blackout".into()),
        Closure::Blackout(reason) => return Err(reason),
        Closure::Open { blocked } => blocked,
    };

    let mut blocked: Vec<Span> = windows.into_iter().chain(calendar.lunch()).collect();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);
    let open = subtract_intervals(&[calendar.hours()], &blocked);

    Ok(calendar
        .grid()
        .filter(|&m| {
            let slot = calendar.slot_span(m);
            open.iter().any(|o| o.contains_span(&slot))
        })
        .collect())
}

/// Annotate each open slot with occupancy against its effective capacity.
pub fn day_slots(
    date: NaiveDate,
    rules: &RuleSet,
    calendar: &BusinessCalendar,
    ledger: Option<&DayLedger>,
) -> DaySlots {
    let minutes = match open_slots(date, rules, calendar) {
        Ok(minutes) => minutes,
        Err(reason) => {
            return DaySlots {
                date,
                closed: Some(reason),
                slots: Vec::new(),
            };
        }
    };
    let weekday = date.weekday();
    let slots = minutes
        .into_iter()
        .map(|m| {
            let booked = ledger.map_or(0, |l| l.occupancy(m));
            let capacity = rules.effective_capacity(weekday, m, calendar);
            SlotAvailability {
                time: time_of(m),
                booked,
                capacity,
                remaining: capacity.saturating_sub(booked),
            }
        })
        .collect();
    DaySlots {
        date,
        closed: None,
        slots,
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

// ── Cached reads ─────────────────────────────────────────────────

/// A computed day, valid while both revisions still match.
pub(super) struct CachedDay {
    rules_revision: u64,
    day_revision: u64,
    slots: Arc<DaySlots>,
}

impl Engine {
    /// Cache hits share the computed day instead of copying it.
    pub async fn available_slots(&self, date: NaiveDate) -> Result<Arc<DaySlots>, EngineError> {
        validate_date(date)?;
        let rules = self.rules.load_full();
        let day = self.get_day(&date);
        let guard = match &day {
            Some(d) => Some(d.read().await),
            None => None,
        };
        let day_revision = guard.as_ref().map_or(0, |g| g.revision);

        if let Some(hit) = self.slot_cache.get(&date)
            && hit.rules_revision == rules.revision
            && hit.day_revision == day_revision
        {
            metrics::counter!(AVAILABILITY_CACHE_HITS_TOTAL).increment(1);
            return Ok(hit.slots.clone());
        }

        let slots = Arc::new(day_slots(date, &rules, &self.calendar, guard.as_deref()));
        drop(guard);
        metrics::counter!(AVAILABILITY_CACHE_MISSES_TOTAL).increment(1);
        self.slot_cache.insert(
            date,
            CachedDay {
                rules_revision: rules.revision,
                day_revision,
                slots: slots.clone(),
            },
        );
        Ok(slots)
    }

    /// First slot with room on a day after `date`, within the lookahead window.
    pub(super) async fn next_open_slot_after(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        for offset in 1..=NEXT_AVAILABLE_LOOKAHEAD_DAYS {
            let day = date.checked_add_days(Days::new(offset))?;
            let Ok(slots) = self.available_slots(day).await else {
                return None;
            };
            if let Some(slot) = slots.slots.iter().find(|s| s.is_available()) {
                return Some(day.and_time(slot.time));
            }
        }
        None
    }

    /// Drop cached days before `today`. Returns how many were evicted.
    pub fn sweep_slot_cache(&self, today: NaiveDate) -> usize {
        let before = self.slot_cache.len();
        self.slot_cache.retain(|date, _| *date >= today);
        before - self.slot_cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};
    use ulid::Ulid;

    const MON: (i32, u32, u32) = (2026, 10, 19);

    fn date((y, m, d): (i32, u32, u32)) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rules(events: Vec<Event>) -> RuleSet {
        let mut rs = RuleSet::new(DailyQuotaPolicy::initial(2));
        for e in &events {
            rs.apply(e);
        }
        rs
    }

    fn blackout(scope: BlackoutScope, window: Option<Span>) -> Event {
        Event::BlackoutRuleSaved {
            rule: BlackoutRule {
                id: Ulid::new(),
                scope,
                window,
                reason: "closed".into(),
            },
        }
    }

    #[test]
    fn merge_adjacent_and_overlapping() {
        let merged = merge_overlapping(&[Span::new(0, 30), Span::new(30, 60), Span::new(50, 90), Span::new(120, 150)]);
        assert_eq!(merged, vec![Span::new(0, 90), Span::new(120, 150)]);
    }

    #[test]
    fn subtract_splits_base() {
        let base = [Span::new(540, 1080)];
        let out = subtract_intervals(&base, &[Span::new(720, 780), Span::new(900, 960)]);
        assert_eq!(out, vec![Span::new(540, 720), Span::new(780, 900), Span::new(960, 1080)]);
    }

    #[test]
    fn subtract_covering_removal_leaves_nothing() {
        let out = subtract_intervals(&[Span::new(600, 660)], &[Span::new(0, 1440)]);
        assert!(out.is_empty());
    }

    #[test]
    fn open_slots_skip_lunch() {
        let slots = open_slots(date(MON), &rules(vec![]), &BusinessCalendar::default()).unwrap();
        assert_eq!(slots.len(), 16);
        assert!(!slots.contains(&720)); // 12:00
        assert!(!slots.contains(&750)); // 12:30
        assert!(slots.contains(&780)); // 13:00
    }

    #[test]
    fn weekend_is_always_closed() {
        let cal = BusinessCalendar::default();
        assert_eq!(open_slots(date((2026, 10, 24)), &rules(vec![]), &cal), Err("weekend".to_string()));
        assert_eq!(open_slots(date((2026, 10, 25)), &rules(vec![]), &cal), Err("weekend".to_string()));
    }

    #[test]
    fn partial_blackout_removes_overlapping_slots_only() {
        // 14:15-15:00 touches the 14:00 and 14:30 slots.
        let rs = rules(vec![blackout(BlackoutScope::Date(date(MON)), Some(Span::new(855, 900)))]);
        let slots = open_slots(date(MON), &rs, &BusinessCalendar::default()).unwrap();
        assert!(slots.contains(&810)); // 13:30
        assert!(!slots.contains(&840)); // 14:00
        assert!(!slots.contains(&870)); // 14:30
        assert!(slots.contains(&900)); // 15:00
        assert_eq!(slots.len(), 14);
    }

    #[test]
    fn whole_day_recurring_blackout() {
        let fridays = Weekdays::EMPTY.with(Weekday::Fri);
        let rs = rules(vec![blackout(BlackoutScope::Recurring(fridays), None)]);
        let cal = BusinessCalendar::default();
        assert_eq!(open_slots(date((2026, 10, 23)), &rs, &cal), Err("closed".to_string()));
        assert_eq!(open_slots(date((2026, 10, 22)), &rs, &cal).unwrap().len(), 16);
    }

    #[test]
    fn day_slots_annotates_occupancy() {
        let rule = SlotCapacityRule {
            id: Ulid::new(),
            weekday: None,
            span: Span::new(540, 600),
            max_concurrent: 3,
            active: true,
        };
        let rs = rules(vec![Event::CapacityRuleSaved { rule }]);
        let mut ledger = DayLedger::new(date(MON));
        for _ in 0..2 {
            ledger.apply(&Event::AppointmentAdmitted {
                record: AppointmentRecord {
                    id: Ulid::new(),
                    user_id: Ulid::new(),
                    staff_id: None,
                    date: date(MON),
                    time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    status: Status::Pending,
                    reason: None,
                    created_at: 0,
                    updated_at: 0,
                },
            });
        }

        let day = day_slots(date(MON), &rs, &BusinessCalendar::default(), Some(&ledger));
        assert_eq!(day.closed, None);
        let nine = day.slots[0];
        assert_eq!((nine.booked, nine.capacity, nine.remaining), (2, 3, 1));
        assert!(nine.is_available());
        let ten = day.slots[2];
        assert_eq!((ten.booked, ten.capacity, ten.remaining), (0, 1, 1));
    }

    #[test]
    fn day_slots_closed_carries_reason() {
        let day = day_slots(date((2026, 10, 24)), &rules(vec![]), &BusinessCalendar::default(), None);
        assert_eq!(day.closed.as_deref(), Some("weekend"));
        assert!(day.slots.is_empty());
    }
}
