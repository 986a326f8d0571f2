use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{AppointmentRecord, Status};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification could not be encoded: {0}")]
    Encode(String),
    /// Raised by notifiers backed by an external transport.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Booked,
    Approved,
    Declined,
    Completed,
    Cancelled,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Booked => "booked",
            NotificationKind::Approved => "approved",
            NotificationKind::Declined => "declined",
            NotificationKind::Completed => "completed",
            NotificationKind::Cancelled => "cancelled",
        }
    }

    pub fn for_status(status: Status) -> Self {
        match status {
            Status::Pending => NotificationKind::Booked,
            Status::Approved => NotificationKind::Approved,
            Status::Declined => NotificationKind::Declined,
            Status::Completed => NotificationKind::Completed,
            Status::Cancelled => NotificationKind::Cancelled,
        }
    }
}

/// A message to an appointment's owner about a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub user_id: Ulid,
    pub appointment_id: Ulid,
    pub kind: NotificationKind,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub reason: Option<String>,
}

impl Notification {
    pub fn for_record(record: &AppointmentRecord) -> Self {
        Self {
            user_id: record.user_id,
            appointment_id: record.id,
            kind: NotificationKind::for_status(record.status),
            date: record.date,
            time: record.time,
            reason: record.reason.clone(),
        }
    }
}

/// Fire-and-forget delivery. Engine callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes each notification as JSON on the `slotgate::notify` tracing target,
/// for a mail or push relay tailing the log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        let json = serde_json::to_string(notification).map_err(|e| NotifyError::Encode(e.to_string()))?;
        tracing::info!(
            target: "slotgate::notify",
            user = %notification.user_id,
            kind = notification.kind.as_str(),
            "{json}"
        );
        Ok(())
    }
}
