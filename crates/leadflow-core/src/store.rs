//! Collaborator contracts consumed by the routing core
//!
//! Every trait is object-safe so the engine can hold `Arc<dyn ...>` handles to
//! either the in-memory stores or the SQLite stores in `leadflow-store`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::RoutingDefaults;
use crate::types::{
    AssignmentConfig, Conversation, ConversationStatus, HeatLevel, LeadEvent, LeadEventType,
    Salesman, TriageEntry,
};

/// Fields the core may change on a conversation. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPatch {
    pub assigned_to: Option<String>,
    /// Clear `assigned_to`. Takes precedence over `assigned_to`.
    pub release_owner: bool,
    pub heat: Option<HeatLevel>,
    pub heat_confidence: Option<f64>,
    pub status: Option<ConversationStatus>,
    /// Reject the whole patch unless the stored heat equals this level
    pub expected_heat: Option<HeatLevel>,
}

impl ConversationPatch {
    pub fn assign(salesman_id: &str) -> Self {
        Self {
            assigned_to: Some(salesman_id.to_string()),
            ..Default::default()
        }
    }

    pub fn heat(heat: HeatLevel, confidence: f64) -> Self {
        Self {
            heat: Some(heat),
            heat_confidence: Some(confidence),
            ..Default::default()
        }
    }

    /// Heat transition that only lands if nobody moved the heat off `from` first
    pub fn heat_change(from: HeatLevel, to: HeatLevel, confidence: f64) -> Self {
        Self {
            expected_heat: Some(from),
            ..Self::heat(to, confidence)
        }
    }

    pub fn release() -> Self {
        Self {
            release_owner: true,
            ..Default::default()
        }
    }

    pub fn admits_heat(&self, current: HeatLevel) -> bool {
        self.expected_heat.is_none_or(|expected| expected == current)
    }

    pub fn confidence(confidence: f64) -> Self {
        Self {
            heat_confidence: Some(confidence),
            ..Default::default()
        }
    }

    pub fn close() -> Self {
        Self {
            status: Some(ConversationStatus::Closed),
            ..Default::default()
        }
    }
}

/// Precondition on the current owner for a conditional update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentGuard {
    /// Apply unconditionally
    Any,
    /// Apply only while `assigned_to` is still null
    Unassigned,
    /// Apply only while `assigned_to` equals this salesman
    AssignedTo(String),
}

impl AssignmentGuard {
    pub fn admits(&self, current: Option<&str>) -> bool {
        match self {
            Self::Any => true,
            Self::Unassigned => current.is_none(),
            Self::AssignedTo(expected) => current == Some(expected.as_str()),
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Apply `patch` atomically if `guard` admits the current owner and the
    /// patch's `expected_heat` (if any) matches. Returns `false` when either
    /// precondition rejected the write or the row is missing.
    async fn update_conversation(
        &self,
        id: &str,
        patch: ConversationPatch,
        guard: AssignmentGuard,
    ) -> Result<bool>;

    /// Open conversations of `tenant_id` owned by `assigned_to`
    async fn list_open(&self, tenant_id: &str, assigned_to: &str) -> Result<Vec<Conversation>>;

    async fn insert_conversation(&self, conversation: Conversation) -> Result<()>;
}

#[async_trait]
pub trait SalesmanDirectory: Send + Sync {
    /// Active roster of a tenant ordered by id
    async fn list_active(&self, tenant_id: &str) -> Result<Vec<Salesman>>;

    async fn get_salesman(&self, id: &str) -> Result<Option<Salesman>>;

    async fn upsert_salesman(&self, salesman: Salesman) -> Result<()>;

    /// Soft (de)activation. Returns `false` if the salesman does not exist.
    async fn set_active(&self, id: &str, active: bool) -> Result<bool>;
}

#[async_trait]
pub trait EventLedgerStore: Send + Sync {
    /// Append-only. Implementations advance the per-tenant cursor for the
    /// event's type in the same step.
    async fn append(&self, event: LeadEvent) -> Result<()>;

    async fn find_last(
        &self,
        tenant_id: &str,
        event_type: LeadEventType,
    ) -> Result<Option<LeadEvent>>;

    /// Events in append order, optionally narrowed to one conversation
    async fn list_events(
        &self,
        tenant_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Vec<LeadEvent>>;
}

#[async_trait]
pub trait TriageQueueStore: Send + Sync {
    async fn find_open(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> Result<Option<TriageEntry>>;

    /// Insert unless an open entry already exists for the same conversation.
    /// Returns whether a row was created.
    async fn insert(&self, entry: TriageEntry) -> Result<bool>;

    async fn list_open_entries(&self, tenant_id: &str) -> Result<Vec<TriageEntry>>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the tenant's config, creating it from `defaults` on first access
    async fn get_or_create(
        &self,
        tenant_id: &str,
        defaults: &RoutingDefaults,
    ) -> Result<AssignmentConfig>;

    async fn save_config(&self, config: AssignmentConfig) -> Result<()>;
}

/// Bundle of store handles shared by the engine components
#[derive(Clone)]
pub struct StoreHandles {
    pub configs: Arc<dyn ConfigStore>,
    pub salesmen: Arc<dyn SalesmanDirectory>,
    pub conversations: Arc<dyn ConversationStore>,
    pub events: Arc<dyn EventLedgerStore>,
    pub triage: Arc<dyn TriageQueueStore>,
}

impl StoreHandles {
    /// Use one backend for every store
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: ConfigStore
            + SalesmanDirectory
            + ConversationStore
            + EventLedgerStore
            + TriageQueueStore
            + 'static,
    {
        Self {
            configs: store.clone(),
            salesmen: store.clone(),
            conversations: store.clone(),
            events: store.clone(),
            triage: store,
        }
    }
}
