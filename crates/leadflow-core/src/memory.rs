//! In-memory implementation of every store trait
//!
//! Used by tests and by embedders that keep state elsewhere. All mutation
//! happens under a single mutex per table, which makes the conditional
//! conversation update a true compare-and-swap.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::config::RoutingDefaults;
use crate::store::{
    AssignmentGuard, ConfigStore, ConversationPatch, ConversationStore, EventLedgerStore,
    SalesmanDirectory, TriageQueueStore,
};
use crate::types::{
    AssignmentConfig, Conversation, LeadEvent, LeadEventType, Salesman, TriageEntry, TriageStatus,
};

#[derive(Default)]
struct Ledger {
    events: Vec<LeadEvent>,
    /// (tenant, event type) → index of the latest matching event
    cursors: HashMap<(String, LeadEventType), usize>,
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    configs: Mutex<HashMap<String, AssignmentConfig>>,
    salesmen: Mutex<HashMap<String, Salesman>>,
    conversations: Mutex<HashMap<String, Conversation>>,
    ledger: Mutex<Ledger>,
    triage: Mutex<Vec<TriageEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("In-memory store mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(lock(&self.conversations).get(id).cloned())
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: ConversationPatch,
        guard: AssignmentGuard,
    ) -> Result<bool> {
        let mut conversations = lock(&self.conversations);
        let Some(conversation) = conversations.get_mut(id) else {
            return Ok(false);
        };
        if !guard.admits(conversation.assigned_to.as_deref()) {
            debug!(
                "Conditional update rejected for conversation {} (owner {:?}, guard {:?})",
                id, conversation.assigned_to, guard
            );
            return Ok(false);
        }
        if !patch.admits_heat(conversation.heat) {
            debug!(
                "Conditional update rejected for conversation {} (heat {}, expected {:?})",
                id, conversation.heat, patch.expected_heat
            );
            return Ok(false);
        }
        if patch.release_owner {
            conversation.assigned_to = None;
        } else if let Some(owner) = patch.assigned_to {
            conversation.assigned_to = Some(owner);
        }
        if let Some(heat) = patch.heat {
            conversation.heat = heat;
        }
        if let Some(confidence) = patch.heat_confidence {
            conversation.heat_confidence = confidence;
        }
        if let Some(status) = patch.status {
            conversation.status = status;
        }
        conversation.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_open(&self, tenant_id: &str, assigned_to: &str) -> Result<Vec<Conversation>> {
        let conversations = lock(&self.conversations);
        let mut open: Vec<Conversation> = conversations
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id
                    && c.is_open()
                    && c.assigned_to.as_deref() == Some(assigned_to)
            })
            .cloned()
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(open)
    }

    async fn insert_conversation(&self, conversation: Conversation) -> Result<()> {
        lock(&self.conversations).insert(conversation.id.clone(), conversation);
        Ok(())
    }
}

#[async_trait]
impl SalesmanDirectory for MemoryStore {
    async fn list_active(&self, tenant_id: &str) -> Result<Vec<Salesman>> {
        let salesmen = lock(&self.salesmen);
        let mut roster: Vec<Salesman> = salesmen
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.active)
            .cloned()
            .collect();
        roster.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(roster)
    }

    async fn get_salesman(&self, id: &str) -> Result<Option<Salesman>> {
        Ok(lock(&self.salesmen).get(id).cloned())
    }

    async fn upsert_salesman(&self, salesman: Salesman) -> Result<()> {
        lock(&self.salesmen).insert(salesman.id.clone(), salesman);
        Ok(())
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let mut salesmen = lock(&self.salesmen);
        match salesmen.get_mut(id) {
            Some(salesman) => {
                salesman.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl EventLedgerStore for MemoryStore {
    async fn append(&self, event: LeadEvent) -> Result<()> {
        let mut ledger = lock(&self.ledger);
        let index = ledger.events.len();
        ledger
            .cursors
            .insert((event.tenant_id.clone(), event.event_type), index);
        ledger.events.push(event);
        Ok(())
    }

    async fn find_last(
        &self,
        tenant_id: &str,
        event_type: LeadEventType,
    ) -> Result<Option<LeadEvent>> {
        let ledger = lock(&self.ledger);
        Ok(ledger
            .cursors
            .get(&(tenant_id.to_string(), event_type))
            .and_then(|&index| ledger.events.get(index))
            .cloned())
    }

    async fn list_events(
        &self,
        tenant_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Vec<LeadEvent>> {
        let ledger = lock(&self.ledger);
        Ok(ledger
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| conversation_id.is_none_or(|id| e.conversation_id == id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TriageQueueStore for MemoryStore {
    async fn find_open(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> Result<Option<TriageEntry>> {
        Ok(lock(&self.triage)
            .iter()
            .find(|e| {
                e.tenant_id == tenant_id
                    && e.conversation_id == conversation_id
                    && e.status == TriageStatus::Open
            })
            .cloned())
    }

    async fn insert(&self, entry: TriageEntry) -> Result<bool> {
        let mut triage = lock(&self.triage);
        let duplicate = entry.status == TriageStatus::Open
            && triage.iter().any(|e| {
                e.tenant_id == entry.tenant_id
                    && e.conversation_id == entry.conversation_id
                    && e.status == TriageStatus::Open
            });
        if duplicate {
            return Ok(false);
        }
        triage.push(entry);
        Ok(true)
    }

    async fn list_open_entries(&self, tenant_id: &str) -> Result<Vec<TriageEntry>> {
        Ok(lock(&self.triage)
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.status == TriageStatus::Open)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get_or_create(
        &self,
        tenant_id: &str,
        defaults: &RoutingDefaults,
    ) -> Result<AssignmentConfig> {
        let mut configs = lock(&self.configs);
        let config = configs.entry(tenant_id.to_string()).or_insert_with(|| {
            debug!("Creating default assignment config for tenant {}", tenant_id);
            AssignmentConfig::with_defaults(tenant_id, defaults)
        });
        Ok(config.clone())
    }

    async fn save_config(&self, config: AssignmentConfig) -> Result<()> {
        lock(&self.configs).insert(config.tenant_id.clone(), config);
        Ok(())
    }
}
