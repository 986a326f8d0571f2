use serde_json::json;
use tracing::info;
use ulid::Ulid;

use crate::audit::AuditEntry;
use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::notify::Notification;
use crate::observability::TRANSITIONS_TOTAL;

use super::{Engine, EngineError, now_ms};

/// The status an action leads to, or `None` if the action is not allowed from `from`.
///
/// ```text
/// pending  --approve-->  approved  --complete-->  completed
/// pending | approved  --cancel-->   cancelled
/// pending | approved  --decline-->  declined
/// ```
pub fn next_status(from: Status, action: Action) -> Option<Status> {
    use Action::*;
    use Status::*;
    match (from, action) {
        (Pending, Approve) => Some(Approved),
        (Approved, Complete) => Some(Completed),
        (Pending | Approved, Cancel) => Some(Cancelled),
        (Pending | Approved, Decline) => Some(Declined),
        _ => None,
    }
}

/// Staff decide; owners and admins cancel.
pub fn authorize(action: Action, role: Role, is_owner: bool) -> bool {
    match action {
        Action::Approve | Action::Decline | Action::Complete => matches!(role, Role::Staff | Role::Admin),
        Action::Cancel => is_owner || role == Role::Admin,
    }
}

/// Actions this actor could take on a record in `status` right now.
pub fn allowed_actions(status: Status, role: Role, is_owner: bool) -> Vec<Action> {
    Action::ALL
        .into_iter()
        .filter(|&a| next_status(status, a).is_some() && authorize(a, role, is_owner))
        .collect()
}

impl Engine {
    pub async fn transition(
        &self,
        id: Ulid,
        action: Action,
        actor: Ulid,
        reason: Option<String>,
    ) -> Result<AppointmentRecord, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let role = self.role_of(actor).await?;
        let date = self
            .appointment_dates
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;

        let (gate, mut day) = self.lock_day(date).await;
        let record = day.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        if !authorize(action, role, record.user_id == actor) {
            return Err(EngineError::Forbidden {
                actor,
                action: action.as_str(),
            });
        }
        let status = next_status(record.status, action).ok_or(EngineError::InvalidTransition {
            from: record.status,
            action,
        })?;

        let staff_id = match action {
            Action::Approve => record.staff_id.or(Some(actor)),
            _ => record.staff_id,
        };
        let reason = match action {
            Action::Decline | Action::Cancel => reason,
            Action::Approve | Action::Complete => record.reason.clone(),
        };
        let at = now_ms();
        let event = Event::AppointmentTransitioned {
            id,
            date,
            status,
            staff_id,
            reason: reason.clone(),
            at,
        };
        self.persist_and_apply(&mut day, &event).await?;
        drop(day);
        drop(gate);

        let updated = AppointmentRecord {
            status,
            staff_id,
            reason,
            updated_at: at,
            ..record
        };
        metrics::counter!(TRANSITIONS_TOTAL, "action" => action.as_str()).increment(1);
        info!(%id, %actor, %action, status = %updated.status, "appointment transitioned");
        self.notify(Notification::for_record(&updated));
        self.audit(AuditEntry {
            at,
            actor,
            action: action.as_str(),
            target: Some(id),
            detail: json!({ "from": record.status.as_str(), "to": status.as_str(), "reason": updated.reason }),
        })
        .await;
        Ok(updated)
    }
}
