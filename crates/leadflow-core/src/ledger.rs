//! Append-only lead event ledger
//!
//! The ledger is both the audit trail and the source of truth for rotation
//! fairness: round robin resumes after the salesman named by the latest
//! ASSIGNED event of the tenant.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::heat::HeatSource;
use crate::store::EventLedgerStore;
use crate::types::{HeatLevel, LeadEvent, LeadEventType, Strategy};

pub const TRIGGER_AUTO_ASSIGN: &str = "auto_assignment";
pub const TRIGGER_REASSIGN: &str = "reassignment";
pub const TRIGGER_HEAT_SCORER: &str = "heat_scorer";

/// Selection path that deviated from the strategy's primary rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionFallback {
    /// Round robin found every candidate at capacity and ignored capacity
    CapacityExhausted,
    /// Geographic found no zone match and rotated instead
    GeographicNoMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedPayload {
    pub salesman_id: String,
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<SelectionFallback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignedPayload {
    pub old_salesman_id: Option<String>,
    pub new_salesman_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatChangedPayload {
    pub old_heat: HeatLevel,
    pub new_heat: HeatLevel,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub source: HeatSource,
}

#[derive(Clone)]
pub struct EventLedger {
    store: Arc<dyn EventLedgerStore>,
}

impl EventLedger {
    pub fn new(store: Arc<dyn EventLedgerStore>) -> Self {
        Self { store }
    }

    async fn append<P: Serialize>(
        &self,
        tenant_id: &str,
        event_type: LeadEventType,
        conversation_id: &str,
        triggered_by: &str,
        payload: &P,
    ) -> Result<LeadEvent> {
        let payload = serde_json::to_value(payload).context("Failed to encode event payload")?;
        let event = LeadEvent::new(tenant_id, event_type, conversation_id, triggered_by, payload);
        self.store.append(event.clone()).await?;
        debug!(
            "Ledger: {} for conversation {} (tenant {})",
            event_type, conversation_id, tenant_id
        );
        Ok(event)
    }

    pub async fn record_assigned(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        payload: AssignedPayload,
    ) -> Result<LeadEvent> {
        self.append(
            tenant_id,
            LeadEventType::Assigned,
            conversation_id,
            TRIGGER_AUTO_ASSIGN,
            &payload,
        )
        .await
    }

    pub async fn record_reassigned(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        payload: ReassignedPayload,
    ) -> Result<LeadEvent> {
        self.append(
            tenant_id,
            LeadEventType::Reassigned,
            conversation_id,
            TRIGGER_REASSIGN,
            &payload,
        )
        .await
    }

    pub async fn record_heat_changed(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        payload: HeatChangedPayload,
    ) -> Result<LeadEvent> {
        self.append(
            tenant_id,
            LeadEventType::HeatChanged,
            conversation_id,
            TRIGGER_HEAT_SCORER,
            &payload,
        )
        .await
    }

    /// Salesman named by the tenant's latest ASSIGNED event
    pub async fn last_assigned_salesman(&self, tenant_id: &str) -> Result<Option<String>> {
        let Some(event) = self
            .store
            .find_last(tenant_id, LeadEventType::Assigned)
            .await?
        else {
            return Ok(None);
        };
        match serde_json::from_value::<AssignedPayload>(event.payload) {
            Ok(payload) => Ok(Some(payload.salesman_id)),
            Err(e) => {
                warn!(
                    "Ignoring unreadable ASSIGNED payload {} for tenant {}: {}",
                    event.id, tenant_id, e
                );
                Ok(None)
            }
        }
    }

    pub async fn history(
        &self,
        tenant_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Vec<LeadEvent>> {
        self.store.list_events(tenant_id, conversation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn assigned(salesman: &str) -> AssignedPayload {
        AssignedPayload {
            salesman_id: salesman.to_string(),
            strategy: Strategy::RoundRobin,
            fallbacks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_last_assigned_follows_latest_event() {
        let ledger = EventLedger::new(Arc::new(MemoryStore::new()));
        assert!(ledger.last_assigned_salesman("t1").await.unwrap().is_none());

        ledger.record_assigned("t1", "c1", assigned("a")).await.unwrap();
        ledger.record_assigned("t1", "c2", assigned("b")).await.unwrap();
        ledger
            .record_reassigned(
                "t1",
                "c2",
                ReassignedPayload {
                    old_salesman_id: Some("b".to_string()),
                    new_salesman_id: "c".to_string(),
                    reason: "vacation".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            ledger.last_assigned_salesman("t1").await.unwrap().as_deref(),
            Some("b")
        );
        assert_eq!(ledger.history("t1", None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_assigned_payload_wire_shape() {
        let ledger = EventLedger::new(Arc::new(MemoryStore::new()));
        let event = ledger.record_assigned("t1", "c1", assigned("a")).await.unwrap();
        assert_eq!(event.event_type, LeadEventType::Assigned);
        assert_eq!(event.triggered_by, TRIGGER_AUTO_ASSIGN);
        assert_eq!(event.payload["salesmanId"], "a");
        assert_eq!(event.payload["strategy"], "ROUND_ROBIN");
        assert!(event.payload.get("fallbacks").is_none());
    }

    #[tokio::test]
    async fn test_heat_changed_payload_wire_shape() {
        let ledger = EventLedger::new(Arc::new(MemoryStore::new()));
        let event = ledger
            .record_heat_changed(
                "t1",
                "c1",
                HeatChangedPayload {
                    old_heat: HeatLevel::Cold,
                    new_heat: HeatLevel::OnFire,
                    confidence: 0.9,
                    reasons: vec!["immediate urgency: asap".to_string()],
                    source: HeatSource::Keywords,
                },
            )
            .await
            .unwrap();
        assert_eq!(event.payload["oldHeat"], "COLD");
        assert_eq!(event.payload["newHeat"], "ON_FIRE");
        assert_eq!(event.payload["source"], "keywords");
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store
            .append(LeadEvent::new(
                "t1",
                LeadEventType::Assigned,
                "c1",
                "import",
                serde_json::json!({"legacy": true}),
            ))
            .await
            .unwrap();
        let ledger = EventLedger::new(store);
        assert!(ledger.last_assigned_salesman("t1").await.unwrap().is_none());
    }
}
