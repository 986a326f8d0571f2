use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// Every appointment booked on one calendar date.
///
/// The day is the engine's lock unit: admission holds the day's write lock
/// while it counts and commits, which serializes both the (date, time) slot
/// key and the (user, date) quota key.
#[derive(Debug, Clone)]
pub struct DayLedger {
    pub date: NaiveDate,
    /// Bumped on every applied event; availability caches key on it.
    pub revision: u64,
    /// Sorted by slot time; insertion order within a slot.
    records: Vec<AppointmentRecord>,
}

impl DayLedger {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            revision: 0,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AppointmentRecord] {
        &self.records
    }

    pub fn get(&self, id: &Ulid) -> Option<&AppointmentRecord> {
        self.records.iter().find(|r| r.id == *id)
    }

    /// Insert keeping the slot-time order.
    fn insert(&mut self, record: AppointmentRecord) {
        let pos = self.records.partition_point(|r| r.time <= record.time);
        self.records.insert(pos, record);
    }

    /// Records booked at exactly `minute`, any status.
    pub fn at(&self, minute: Minute) -> &[AppointmentRecord] {
        let lo = self.records.partition_point(|r| r.minute() < minute);
        let hi = self.records.partition_point(|r| r.minute() <= minute);
        &self.records[lo..hi]
    }

    /// Pending + approved records at `minute`.
    pub fn occupancy(&self, minute: Minute) -> u32 {
        self.at(minute).iter().filter(|r| r.is_active()).count() as u32
    }

    /// The user's pending + approved records on this day, across all slots.
    pub fn user_active_count(&self, user_id: &Ulid) -> u32 {
        self.records
            .iter()
            .filter(|r| r.user_id == *user_id && r.is_active())
            .count() as u32
    }

    pub fn user_holds_slot(&self, user_id: &Ulid, minute: Minute) -> bool {
        self.at(minute)
            .iter()
            .any(|r| r.user_id == *user_id && r.is_active())
    }

    /// Apply an appointment event for this day. Returns false if it did not apply.
    pub fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::AppointmentAdmitted { record } if record.date == self.date => {
                self.insert(record.clone());
            }
            Event::AppointmentTransitioned {
                id,
                date,
                status,
                staff_id,
                reason,
                at,
            } if *date == self.date => {
                let Some(record) = self.records.iter_mut().find(|r| r.id == *id) else {
                    return false;
                };
                record.status = *status;
                record.staff_id = *staff_id;
                record.reason = reason.clone();
                record.updated_at = *at;
            }
            _ => return false,
        }
        self.revision += 1;
        true
    }
}
