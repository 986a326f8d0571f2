use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_appointment(&self, id: Ulid) -> Result<AppointmentRecord, EngineError> {
        let date = self
            .appointment_dates
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let day = self.get_day(&date).ok_or(EngineError::NotFound(id))?;
        let guard = day.read().await;
        guard.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Every appointment on `date`, any status, in slot order.
    pub async fn appointments_on(&self, date: NaiveDate) -> Vec<AppointmentRecord> {
        match self.get_day(&date) {
            Some(day) => day.read().await.records().to_vec(),
            None => Vec::new(),
        }
    }

    /// A user's appointments across all days, oldest day first.
    pub async fn appointments_for_user(&self, user_id: Ulid) -> Vec<AppointmentRecord> {
        let mut days: Vec<(NaiveDate, super::SharedDay)> =
            self.days.iter().map(|e| (*e.key(), e.value().clone())).collect();
        days.sort_by_key(|(date, _)| *date);

        let mut out = Vec::new();
        for (_, day) in days {
            let guard = day.read().await;
            out.extend(guard.records().iter().filter(|r| r.user_id == user_id).cloned());
        }
        out
    }

    pub fn capacity_rules(&self) -> Vec<SlotCapacityRule> {
        self.rules.load().capacity_rules().to_vec()
    }

    pub fn blackout_rules(&self) -> Vec<BlackoutRule> {
        self.rules.load().blackout_rules().to_vec()
    }

    pub fn quota_policy(&self) -> DailyQuotaPolicy {
        self.rules.load().quota().clone()
    }

    /// Every recorded policy change, newest last.
    pub fn quota_history(&self) -> Vec<DailyQuotaPolicy> {
        self.rules.load().quota_history().to_vec()
    }
}
