use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

use crate::model::Ms;

/// One administrative or booking action, as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub at: Ms,
    pub actor: Ulid,
    pub action: &'static str,
    pub target: Option<Ulid>,
    pub detail: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Writes each entry as JSON on the `slotgate::audit` tracing target.
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let json = serde_json::to_string(entry).map_err(|e| AuditError::Unavailable(e.to_string()))?;
        tracing::info!(target: "slotgate::audit", "{json}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracing_audit_accepts_entries() {
        let entry = AuditEntry {
            at: 0,
            actor: Ulid::new(),
            action: "admit",
            target: Some(Ulid::new()),
            detail: serde_json::json!({ "date": "2026-10-19" }),
        };
        assert!(TracingAudit.record(&entry).await.is_ok());
    }

    #[test]
    fn entry_serializes_as_json() {
        let entry = AuditEntry {
            at: 42,
            actor: Ulid::nil(),
            action: "set_quota",
            target: None,
            detail: serde_json::json!({ "max_per_day": 3 }),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "set_quota");
        assert_eq!(json["detail"]["max_per_day"], 3);
        assert!(json["target"].is_null());
    }
}
