//! Lead assignment engine
//!
//! Picks a salesman for a conversation with the tenant's configured strategy
//! and commits the choice with a conditional "set only if still unset" write.
//! A writer that loses the race re-runs selection once against fresh state;
//! the conversation's owner is the only shared mutable resource.

pub mod strategies;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RoutingDefaults;
use crate::error::{AssignmentFailure, RoutingError, RoutingResult, require_id};
use crate::ledger::{AssignedPayload, EventLedger, ReassignedPayload, SelectionFallback};
use crate::store::{
    AssignmentGuard, ConfigStore, ConversationPatch, ConversationStore, SalesmanDirectory,
    StoreHandles,
};
use crate::types::{AssignmentConfig, Conversation, Salesman, Strategy};
use crate::workload::WorkloadTracker;

use strategies::SelectionInput;

/// Selection is attempted at most this many times per `assign` call
const MAX_ASSIGN_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentSuccess {
    pub salesman: Salesman,
    pub strategy: Strategy,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<SelectionFallback>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentResult {
    Assigned(AssignmentSuccess),
    NotAssigned { reason: AssignmentFailure },
}

impl AssignmentResult {
    fn failed(reason: AssignmentFailure) -> Self {
        Self::NotAssigned { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Assigned(_))
    }

    pub fn salesman(&self) -> Option<&Salesman> {
        match self {
            Self::Assigned(success) => Some(&success.salesman),
            Self::NotAssigned { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<AssignmentFailure> {
        match self {
            Self::Assigned(_) => None,
            Self::NotAssigned { reason } => Some(*reason),
        }
    }
}

#[derive(Clone)]
pub struct AssignmentEngine {
    configs: Arc<dyn ConfigStore>,
    salesmen: Arc<dyn SalesmanDirectory>,
    conversations: Arc<dyn ConversationStore>,
    workload: WorkloadTracker,
    ledger: EventLedger,
    defaults: RoutingDefaults,
}

impl AssignmentEngine {
    pub fn new(stores: &StoreHandles, defaults: RoutingDefaults) -> Self {
        Self {
            configs: stores.configs.clone(),
            salesmen: stores.salesmen.clone(),
            conversations: stores.conversations.clone(),
            workload: WorkloadTracker::new(stores.conversations.clone()),
            ledger: EventLedger::new(stores.events.clone()),
            defaults,
        }
    }

    pub fn defaults(&self) -> &RoutingDefaults {
        &self.defaults
    }

    /// Assign an unowned conversation to a salesman.
    ///
    /// Routing misses come back as [`AssignmentResult::NotAssigned`]; only bad
    /// input or store failures are errors.
    pub async fn assign(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        strategy_override: Option<Strategy>,
    ) -> RoutingResult<AssignmentResult> {
        require_id("tenant_id", tenant_id)?;
        require_id("conversation_id", conversation_id)?;

        for attempt in 1..=MAX_ASSIGN_ATTEMPTS {
            let conversation = self.load_conversation(tenant_id, conversation_id).await?;
            if let Some(owner) = &conversation.assigned_to {
                debug!("Conversation {} already assigned to {}", conversation_id, owner);
                return Ok(AssignmentResult::failed(AssignmentFailure::AlreadyAssigned));
            }

            let config = self.configs.get_or_create(tenant_id, &self.defaults).await?;
            if !config.accepts_auto_assignment() {
                debug!("Auto-assignment disabled for tenant {}", tenant_id);
                return Ok(AssignmentResult::failed(AssignmentFailure::ConfigDisabled));
            }

            let strategy = strategy_override.unwrap_or(config.strategy);
            let Some((salesman, fallbacks)) =
                self.select(strategy, &conversation, &config).await?
            else {
                info!("No eligible salesman for conversation {} (tenant {})", conversation_id, tenant_id);
                return Ok(AssignmentResult::failed(AssignmentFailure::NoEligibleSalesman));
            };

            let won = self
                .conversations
                .update_conversation(
                    conversation_id,
                    ConversationPatch::assign(&salesman.id),
                    AssignmentGuard::Unassigned,
                )
                .await?;

            if !won {
                warn!(
                    "Lost assignment race for conversation {} (attempt {}/{})",
                    conversation_id, attempt, MAX_ASSIGN_ATTEMPTS
                );
                continue;
            }

            let recorded = self
                .ledger
                .record_assigned(
                    tenant_id,
                    conversation_id,
                    AssignedPayload {
                        salesman_id: salesman.id.clone(),
                        strategy,
                        fallbacks: fallbacks.clone(),
                    },
                )
                .await;
            if let Err(e) = recorded {
                self.undo_owner_change(conversation_id, &salesman.id, None).await;
                return Err(e.into());
            }

            info!(
                "Assigned conversation {} to {} via {}{}",
                conversation_id,
                salesman.id,
                strategy,
                if fallbacks.is_empty() {
                    String::new()
                } else {
                    format!(" (fallbacks: {:?})", fallbacks)
                }
            );
            return Ok(AssignmentResult::Assigned(AssignmentSuccess {
                salesman,
                strategy,
                fallbacks,
            }));
        }

        Ok(AssignmentResult::failed(AssignmentFailure::AlreadyAssigned))
    }

    /// Move a conversation to `new_salesman_id`, bypassing the already-assigned
    /// guard. Reassigning to the current owner is a no-op.
    pub async fn reassign(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        new_salesman_id: &str,
        reason: &str,
    ) -> RoutingResult<()> {
        require_id("tenant_id", tenant_id)?;
        require_id("conversation_id", conversation_id)?;
        require_id("new_salesman_id", new_salesman_id)?;

        let salesman = self
            .salesmen
            .get_salesman(new_salesman_id)
            .await?
            .filter(|s| s.tenant_id == tenant_id)
            .ok_or_else(|| RoutingError::SalesmanNotFound(new_salesman_id.to_string()))?;
        if !salesman.active {
            return Err(RoutingError::SalesmanInactive(salesman.id));
        }

        for _ in 0..MAX_ASSIGN_ATTEMPTS {
            let conversation = self.load_conversation(tenant_id, conversation_id).await?;
            let old_owner = conversation.assigned_to;
            if old_owner.as_deref() == Some(new_salesman_id) {
                debug!(
                    "Conversation {} already owned by {}, nothing to reassign",
                    conversation_id, new_salesman_id
                );
                return Ok(());
            }

            let guard = match &old_owner {
                Some(owner) => AssignmentGuard::AssignedTo(owner.clone()),
                None => AssignmentGuard::Unassigned,
            };
            let updated = self
                .conversations
                .update_conversation(conversation_id, ConversationPatch::assign(new_salesman_id), guard)
                .await?;
            if !updated {
                warn!("Owner of conversation {} changed during reassignment, retrying", conversation_id);
                continue;
            }

            let recorded = self
                .ledger
                .record_reassigned(
                    tenant_id,
                    conversation_id,
                    ReassignedPayload {
                        old_salesman_id: old_owner.clone(),
                        new_salesman_id: new_salesman_id.to_string(),
                        reason: reason.to_string(),
                    },
                )
                .await;
            if let Err(e) = recorded {
                self.undo_owner_change(conversation_id, new_salesman_id, old_owner.as_deref())
                    .await;
                return Err(e.into());
            }
            info!(
                "Reassigned conversation {} from {:?} to {} ({})",
                conversation_id, old_owner, new_salesman_id, reason
            );
            return Ok(());
        }

        Err(RoutingError::ConcurrentModification(conversation_id.to_string()))
    }

    /// Put back the owner a failed ledger write left behind. Only applies while
    /// `written` still owns the conversation, so a later winner is never undone.
    async fn undo_owner_change(&self, conversation_id: &str, written: &str, restore: Option<&str>) {
        let patch = match restore {
            Some(owner) => ConversationPatch::assign(owner),
            None => ConversationPatch::release(),
        };
        let guard = AssignmentGuard::AssignedTo(written.to_string());
        match self.conversations.update_conversation(conversation_id, patch, guard).await {
            Ok(true) => warn!(
                "Ledger write failed, conversation {} owner restored to {:?}",
                conversation_id, restore
            ),
            Ok(false) => warn!(
                "Ledger write failed and conversation {} moved on before rollback",
                conversation_id
            ),
            Err(e) => warn!(
                "Ledger write failed and rollback of conversation {} failed: {}",
                conversation_id, e
            ),
        }
    }

    async fn load_conversation(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> RoutingResult<Conversation> {
        let conversation = self
            .conversations
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| RoutingError::ConversationNotFound(conversation_id.to_string()))?;
        if conversation.tenant_id != tenant_id {
            return Err(RoutingError::TenantMismatch {
                tenant_id: tenant_id.to_string(),
                conversation_id: conversation_id.to_string(),
            });
        }
        Ok(conversation)
    }

    /// One selection pass over fresh roster, workload and rotation state
    async fn select(
        &self,
        strategy: Strategy,
        conversation: &Conversation,
        config: &AssignmentConfig,
    ) -> RoutingResult<Option<(Salesman, Vec<SelectionFallback>)>> {
        let tenant_id = &conversation.tenant_id;
        let mut roster: Vec<Salesman> = self
            .salesmen
            .list_active(tenant_id)
            .await?
            .into_iter()
            .filter(|s| s.active)
            .collect();
        roster.sort_by(|a, b| a.id.cmp(&b.id));
        if roster.is_empty() {
            return Ok(None);
        }

        let uses_rotation = matches!(strategy, Strategy::RoundRobin | Strategy::Geographic);
        let workloads = if strategy == Strategy::SkillsBased {
            HashMap::new()
        } else {
            self.workload.snapshot(tenant_id, &roster).await?
        };
        let last_assigned = if uses_rotation {
            self.ledger.last_assigned_salesman(tenant_id).await?
        } else {
            None
        };

        debug!(
            "Selecting via {} among {} salesmen (last assigned: {:?})",
            strategy,
            roster.len(),
            last_assigned
        );

        let input = SelectionInput {
            roster: &roster,
            conversation,
            config,
            workloads: &workloads,
            last_assigned: last_assigned.as_deref(),
        };
        Ok(strategies::select(strategy, &input).map(|s| (s.salesman.clone(), s.fallbacks)))
    }
}
