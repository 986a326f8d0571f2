use serde_json::json;
use tracing::info;
use ulid::Ulid;

use crate::audit::AuditEntry;
use crate::limits::*;
use crate::model::*;
use crate::rules::{validate_blackout_rule, validate_capacity_rule, validate_daily_limit};

use super::{Engine, EngineError, now_ms};

impl Engine {
    async fn require_admin(&self, actor: Ulid, action: &'static str) -> Result<(), EngineError> {
        match self.role_of(actor).await? {
            Role::Admin => Ok(()),
            _ => Err(EngineError::Forbidden { actor, action }),
        }
    }

    async fn audit_rule(&self, actor: Ulid, action: &'static str, target: Option<Ulid>, detail: serde_json::Value) {
        self.audit(AuditEntry {
            at: now_ms(),
            actor,
            action,
            target,
            detail,
        })
        .await;
    }

    /// Create or replace a capacity rule.
    pub async fn save_capacity_rule(&self, actor: Ulid, rule: SlotCapacityRule) -> Result<(), EngineError> {
        self.require_admin(actor, "edit capacity rules").await?;
        validate_capacity_rule(&rule)?;

        let _write = self.rules_write.lock().await;
        {
            let current = self.rules.load();
            if current.capacity_rule(&rule.id).is_none() && current.capacity_rules().len() >= MAX_CAPACITY_RULES {
                return Err(EngineError::LimitExceeded("too many capacity rules"));
            }
        }
        let id = rule.id;
        let detail = json!({
            "weekday": rule.weekday.map(|d| d.to_string()),
            "window": rule.span.to_string(),
            "max_concurrent": rule.max_concurrent,
            "active": rule.active,
        });
        self.persist_rule_change(&Event::CapacityRuleSaved { rule }).await?;
        info!(%id, "capacity rule saved");
        self.audit_rule(actor, "save_capacity_rule", Some(id), detail).await;
        Ok(())
    }

    pub async fn set_capacity_rule_active(
        &self,
        actor: Ulid,
        id: Ulid,
        active: bool,
    ) -> Result<SlotCapacityRule, EngineError> {
        self.require_admin(actor, "edit capacity rules").await?;
        let _write = self.rules_write.lock().await;
        let rule = SlotCapacityRule {
            active,
            ..self.rules.load().capacity_rule(&id).cloned().ok_or(EngineError::NotFound(id))?
        };
        self.persist_rule_change(&Event::CapacityRuleSaved { rule: rule.clone() })
            .await?;
        info!(%id, active, "capacity rule toggled");
        self.audit_rule(actor, "toggle_capacity_rule", Some(id), json!({ "active": active }))
            .await;
        Ok(rule)
    }

    pub async fn remove_capacity_rule(&self, actor: Ulid, id: Ulid) -> Result<(), EngineError> {
        self.require_admin(actor, "edit capacity rules").await?;
        let _write = self.rules_write.lock().await;
        if self.rules.load().capacity_rule(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.persist_rule_change(&Event::CapacityRuleRemoved { id }).await?;
        info!(%id, "capacity rule removed");
        self.audit_rule(actor, "remove_capacity_rule", Some(id), json!({})).await;
        Ok(())
    }

    /// Create or replace a blackout rule.
    pub async fn save_blackout_rule(&self, actor: Ulid, rule: BlackoutRule) -> Result<(), EngineError> {
        self.require_admin(actor, "edit blackout rules").await?;
        validate_blackout_rule(&rule)?;

        let _write = self.rules_write.lock().await;
        {
            let current = self.rules.load();
            if current.blackout_rule(&rule.id).is_none() && current.blackout_rules().len() >= MAX_BLACKOUT_RULES {
                return Err(EngineError::LimitExceeded("too many blackout rules"));
            }
        }
        let id = rule.id;
        let detail = json!({
            "scope": match &rule.scope {
                BlackoutScope::Date(d) => d.to_string(),
                BlackoutScope::Recurring(days) => days.to_string(),
            },
            "window": rule.window.map(|w| w.to_string()),
            "reason": rule.reason,
        });
        self.persist_rule_change(&Event::BlackoutRuleSaved { rule }).await?;
        info!(%id, "blackout rule saved");
        self.audit_rule(actor, "save_blackout_rule", Some(id), detail).await;
        Ok(())
    }

    pub async fn remove_blackout_rule(&self, actor: Ulid, id: Ulid) -> Result<(), EngineError> {
        self.require_admin(actor, "edit blackout rules").await?;
        let _write = self.rules_write.lock().await;
        if self.rules.load().blackout_rule(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.persist_rule_change(&Event::BlackoutRuleRemoved { id }).await?;
        info!(%id, "blackout rule removed");
        self.audit_rule(actor, "remove_blackout_rule", Some(id), json!({})).await;
        Ok(())
    }

    /// Replace the daily quota policy. Applies to admissions decided after this returns.
    pub async fn set_quota_policy(
        &self,
        actor: Ulid,
        max_per_day: u32,
        active: bool,
        note: Option<String>,
    ) -> Result<DailyQuotaPolicy, EngineError> {
        self.require_admin(actor, "set the quota policy").await?;
        validate_daily_limit(max_per_day)?;
        if note.as_ref().is_some_and(|n| n.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("note too long"));
        }

        let _write = self.rules_write.lock().await;
        let policy = DailyQuotaPolicy {
            max_per_day,
            active,
            note,
            modified_by: Some(actor),
            modified_at: now_ms(),
        };
        self.persist_rule_change(&Event::QuotaPolicySet { policy: policy.clone() })
            .await?;
        info!(max_per_day, active, "quota policy set");
        self.audit_rule(
            actor,
            "set_quota_policy",
            None,
            json!({ "max_per_day": max_per_day, "active": active, "note": policy.note }),
        )
        .await;
        Ok(policy)
    }
}
