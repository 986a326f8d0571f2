use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use dashmap::mapref::entry::Entry;
use serde_json::json;
use tracing::{debug, info};
use ulid::Ulid;

use crate::audit::AuditEntry;
use crate::calendar::BusinessCalendar;
use crate::limits::MAX_APPOINTMENTS_PER_DAY;
use crate::model::*;
use crate::notify::Notification;
use crate::observability::ADMISSIONS_TOTAL;
use crate::rules::{RuleSet, validate_date};

use super::availability::open_slots;
use super::ledger::DayLedger;
use super::{Engine, EngineError, now_ms};

/// Decide whether `user_id` may take the slot at `time` on the ledger's day.
///
/// Checks run in a fixed order and the first failure wins: blackout, then
/// slot occupancy, then the daily quota. The caller must hold the day's
/// exclusive lock from this call until the commit, so the counts read here
/// are the counts the commit sees.
pub fn evaluate(
    user_id: &Ulid,
    time: NaiveTime,
    ledger: &DayLedger,
    rules: &RuleSet,
    policy: &DailyQuotaPolicy,
    calendar: &BusinessCalendar,
) -> Result<(), Rejection> {
    let date = ledger.date;
    let minute = minute_of(time);
    let hhmm = time.format("%H:%M");

    let open = match open_slots(date, rules, calendar) {
        Ok(open) => open,
        Err(reason) => {
            return Err(Rejection::new(
                RejectReason::Blackout,
                format!("{date} is unavailable: {reason}"),
            ));
        }
    };
    if !open.contains(&minute) {
        return Err(Rejection::new(
            RejectReason::Blackout,
            format!("{date} {hhmm} is unavailable"),
        ));
    }

    if ledger.user_holds_slot(user_id, minute) {
        return Err(Rejection::new(
            RejectReason::CapacityExceeded,
            format!("you already hold {date} {hhmm}"),
        ));
    }
    let weekday = date.weekday();
    let capacity = rules.effective_capacity(weekday, minute, calendar);
    if ledger.occupancy(minute) >= capacity {
        let retry_at = open
            .iter()
            .copied()
            .filter(|&m| m > minute)
            .find(|&m| ledger.occupancy(m) < rules.effective_capacity(weekday, m, calendar))
            .map(|m| date.and_time(time_of(m)));
        return Err(Rejection {
            reason: RejectReason::CapacityExceeded,
            message: format!("{date} {hhmm} is fully booked"),
            retry_at,
        });
    }

    if policy.active && ledger.user_active_count(user_id) >= policy.max_per_day {
        return Err(Rejection::new(
            RejectReason::QuotaExceeded,
            format!("daily booking limit reached ({} per day)", policy.max_per_day),
        ));
    }

    Ok(())
}

impl Engine {
    /// Admit or reject a booking for `user_id`. A rejection leaves no trace in
    /// the ledger; the same request may be retried freely.
    pub async fn try_admit(
        &self,
        id: Ulid,
        user_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Admission, EngineError> {
        validate_date(date)?;
        if !self.calendar.is_on_grid(time) {
            return Err(EngineError::Validation(format!(
                "{} is not a slot start",
                time.format("%H:%M:%S")
            )));
        }
        self.role_of(user_id).await?;

        match self.appointment_dates.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(date);
            }
        }
        let outcome = self.admit_locked(id, user_id, date, time).await;
        if !matches!(outcome, Ok(Admission::Admitted(_))) {
            self.appointment_dates.remove(&id);
        }

        match outcome? {
            Admission::Admitted(record) => {
                metrics::counter!(ADMISSIONS_TOTAL, "outcome" => "admitted", "reason" => "").increment(1);
                info!(id = %record.id, user = %user_id, %date, time = %record.time, "appointment admitted");
                self.notify(Notification::for_record(&record));
                self.audit(AuditEntry {
                    at: record.created_at,
                    actor: user_id,
                    action: "admit",
                    target: Some(record.id),
                    detail: json!({ "date": date, "time": record.time }),
                })
                .await;
                Ok(Admission::Admitted(record))
            }
            Admission::Rejected(mut rejection) => {
                if rejection.reason == RejectReason::QuotaExceeded {
                    rejection.retry_at = self.next_open_slot_after(date).await;
                }
                metrics::counter!(
                    ADMISSIONS_TOTAL,
                    "outcome" => "rejected",
                    "reason" => rejection.reason.as_str()
                )
                .increment(1);
                debug!(user = %user_id, %date, %time, %rejection, "admission rejected");
                Ok(Admission::Rejected(rejection))
            }
        }
    }

    /// [`Engine::try_admit`] on behalf of `actor`. Clients may only book for
    /// themselves; staff and admins may book for anyone.
    pub async fn book_for(
        &self,
        actor: Ulid,
        id: Ulid,
        user_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Admission, EngineError> {
        if actor != user_id && self.role_of(actor).await? == Role::Client {
            return Err(EngineError::Forbidden {
                actor,
                action: "book for another user",
            });
        }
        self.try_admit(id, user_id, date, time).await
    }

    async fn admit_locked(
        &self,
        id: Ulid,
        user_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Admission, EngineError> {
        let (_gate, mut day) = self.lock_day(date).await;
        if day.len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments on this day"));
        }
        let rules = self.rules.load_full();
        if let Err(rejection) = evaluate(&user_id, time, &day, &rules, rules.quota(), &self.calendar) {
            return Ok(Admission::Rejected(rejection));
        }

        let now = now_ms();
        let record = AppointmentRecord {
            id,
            user_id,
            staff_id: None,
            date,
            time,
            status: Status::Pending,
            reason: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::AppointmentAdmitted { record: record.clone() };
        self.persist_and_apply(&mut day, &event).await?;
        Ok(Admission::Admitted(record))
    }

    pub async fn daily_limit_status(&self, user_id: Ulid, date: NaiveDate) -> Result<DailyLimitStatus, EngineError> {
        validate_date(date)?;
        self.role_of(user_id).await?;
        let policy = self.rules.load().quota().clone();
        let used = match self.get_day(&date) {
            Some(day) => day.read().await.user_active_count(&user_id),
            None => 0,
        };

        let (limit, remaining, reached) = if policy.active {
            let max = policy.max_per_day;
            (Some(max), Some(max.saturating_sub(used)), used >= max)
        } else {
            (None, None, false)
        };
        let next_available: Option<NaiveDateTime> = if reached {
            self.next_open_slot_after(date).await
        } else {
            None
        };

        Ok(DailyLimitStatus {
            user_id,
            date,
            limit,
            used,
            remaining,
            reached,
            next_available,
        })
    }
}
