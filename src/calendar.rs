use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Minute, Span, minute_of, MINUTES_PER_DAY};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("business hours must open before they close ({0})")]
    EmptyHours(String),
    #[error("lunch break {lunch} must lie inside business hours {hours}")]
    LunchOutsideHours { lunch: Span, hours: Span },
    #[error("slot length must be between 5 and 240 minutes, got {0}")]
    SlotLength(Minute),
    #[error("fallback capacity must be at least 1")]
    ZeroFallbackCapacity,
}

/// The fixed business calendar: opening hours, lunch break, slot grid and the
/// capacity used when no capacity rule matches. Weekends are always closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessCalendar {
    hours: Span,
    lunch: Option<Span>,
    slot_minutes: Minute,
    fallback_capacity: u32,
}

impl Default for BusinessCalendar {
    /// 09:00-18:00, lunch 12:00-13:00, 30 minute slots, one booking per slot.
    fn default() -> Self {
        Self {
            hours: Span::new(9 * 60, 18 * 60),
            lunch: Some(Span::new(12 * 60, 13 * 60)),
            slot_minutes: 30,
            fallback_capacity: 1,
        }
    }
}

impl BusinessCalendar {
    pub fn new(
        opens: NaiveTime,
        closes: NaiveTime,
        lunch: Option<(NaiveTime, NaiveTime)>,
        slot_minutes: Minute,
        fallback_capacity: u32,
    ) -> Result<Self, CalendarError> {
        let (open, close) = (minute_of(opens), minute_of(closes));
        if open >= close {
            return Err(CalendarError::EmptyHours(format!("{opens}-{closes}")));
        }
        let hours = Span::new(open, close);
        let lunch = match lunch {
            Some((start, end)) => {
                let (s, e) = (minute_of(start), minute_of(end));
                if s >= e || !hours.contains_span(&Span { start: s, end: e }) {
                    return Err(CalendarError::LunchOutsideHours {
                        lunch: Span { start: s, end: e },
                        hours,
                    });
                }
                Some(Span::new(s, e))
            }
            None => None,
        };
        if !(5..=240).contains(&slot_minutes) {
            return Err(CalendarError::SlotLength(slot_minutes));
        }
        if fallback_capacity == 0 {
            return Err(CalendarError::ZeroFallbackCapacity);
        }
        Ok(Self {
            hours,
            lunch,
            slot_minutes,
            fallback_capacity,
        })
    }

    pub fn hours(&self) -> Span {
        self.hours
    }

    pub fn lunch(&self) -> Option<Span> {
        self.lunch
    }

    pub fn slot_minutes(&self) -> Minute {
        self.slot_minutes
    }

    pub fn fallback_capacity(&self) -> u32 {
        self.fallback_capacity
    }

    pub fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// The span a slot starting at `minute` occupies.
    pub fn slot_span(&self, minute: Minute) -> Span {
        Span::new(minute, (minute + self.slot_minutes).min(MINUTES_PER_DAY))
    }

    /// Every slot start inside business hours, before lunch or blackouts are applied.
    pub fn grid(&self) -> impl Iterator<Item = Minute> + '_ {
        (self.hours.start..self.hours.end)
            .step_by(self.slot_minutes as usize)
            .filter(|m| m + self.slot_minutes <= self.hours.end)
    }

    /// Whether `time` is exactly a slot start inside business hours.
    pub fn is_on_grid(&self, time: NaiveTime) -> bool {
        if time.second() != 0 || time.nanosecond() != 0 {
            return false;
        }
        let m = minute_of(time);
        m >= self.hours.start
            && m + self.slot_minutes <= self.hours.end
            && (m - self.hours.start) % self.slot_minutes == 0
    }
}
