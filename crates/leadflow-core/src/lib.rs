//! leadflow-core - lead routing and heat classification
//!
//! This crate provides:
//! - Assignment engine with round robin, least active, skills based and geographic strategies
//! - Keyword heat scorer with an optional, time-bounded AI classifier
//! - Append-only event ledger and derived salesman workload
//! - Triage escalation for VERY_HOT and ON_FIRE conversations
//! - Store traits with an in-memory implementation

pub mod assignment;
pub mod config;
pub mod error;
pub mod heat;
pub mod ledger;
pub mod memory;
pub mod pipeline;
pub mod providers;
pub mod store;
pub mod triage;
pub mod types;
pub mod workload;

// Re-export main types for convenience
pub use assignment::{AssignmentEngine, AssignmentResult, AssignmentSuccess};
pub use config::{HeatScorerConfig, RoutingDefaults};
pub use error::{AssignmentFailure, ClassifierError, RoutingError, RoutingResult};
pub use heat::{ConversationTurn, HeatClassifier, HeatResult, HeatScorer, HeatSource, LlmHeatClassifier};
pub use ledger::{EventLedger, SelectionFallback};
pub use memory::MemoryStore;
pub use pipeline::{LeadPipeline, MessageOutcome};
pub use store::{
    AssignmentGuard, ConfigStore, ConversationPatch, ConversationStore, EventLedgerStore,
    SalesmanDirectory, StoreHandles, TriageQueueStore,
};
pub use triage::TriageEscalator;
pub use types::{
    AssignmentConfig, Conversation, ConversationStatus, EndUserContext, HeatLevel, LanguageCode,
    LeadEvent, LeadEventType, ProductSkill, Salesman, Strategy, TriageEntry, TriageStatus,
};
pub use workload::WorkloadTracker;
