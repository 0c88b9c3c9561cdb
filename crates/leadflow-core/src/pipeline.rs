//! Per-message lead processing
//!
//! score → persist heat (+ HEAT_CHANGED on a change) → triage → auto-assign.
//! Heat changes are compare-and-swap writes against the last heat read, so
//! concurrent messages on one conversation record each transition once.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::assignment::{AssignmentEngine, AssignmentResult};
use crate::config::RoutingDefaults;
use crate::error::{RoutingError, RoutingResult, require_id};
use crate::heat::{ConversationTurn, HeatResult, HeatScorer};
use crate::ledger::{EventLedger, HeatChangedPayload};
use crate::store::{AssignmentGuard, ConfigStore, ConversationPatch, ConversationStore, StoreHandles};
use crate::triage::TriageEscalator;
use crate::types::{HeatLevel, TriageEntry};

/// Conditional heat writes attempted per message before giving up
const MAX_HEAT_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct MessageOutcome {
    /// Heat stored before this message was applied
    pub previous_heat: HeatLevel,
    pub heat: HeatResult,
    /// Whether this message moved the stored heat (and recorded HEAT_CHANGED)
    pub changed: bool,
    pub escalated: Option<TriageEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<AssignmentResult>,
}

impl MessageOutcome {
    pub fn heat_changed(&self) -> bool {
        self.changed
    }
}

#[derive(Clone)]
pub struct LeadPipeline {
    conversations: Arc<dyn ConversationStore>,
    configs: Arc<dyn ConfigStore>,
    scorer: HeatScorer,
    ledger: EventLedger,
    triage: TriageEscalator,
    engine: AssignmentEngine,
}

impl LeadPipeline {
    pub fn new(stores: &StoreHandles, defaults: RoutingDefaults, scorer: HeatScorer) -> Self {
        Self {
            conversations: stores.conversations.clone(),
            configs: stores.configs.clone(),
            scorer,
            ledger: EventLedger::new(stores.events.clone()),
            triage: TriageEscalator::new(stores.triage.clone()),
            engine: AssignmentEngine::new(stores, defaults),
        }
    }

    pub fn engine(&self) -> &AssignmentEngine {
        &self.engine
    }

    pub fn scorer(&self) -> &HeatScorer {
        &self.scorer
    }

    pub fn triage(&self) -> &TriageEscalator {
        &self.triage
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    /// Handle one inbound customer message for a conversation
    pub async fn process_message(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        message: &str,
        history: Option<&[ConversationTurn]>,
    ) -> RoutingResult<MessageOutcome> {
        require_id("tenant_id", tenant_id)?;
        require_id("conversation_id", conversation_id)?;

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

        let result = self.scorer.score(message, history).await;
        let (previous_heat, changed) = self
            .persist_heat(conversation_id, conversation.heat, &result)
            .await?;

        let mut escalated = None;
        if changed {
            self.ledger
                .record_heat_changed(
                    tenant_id,
                    conversation_id,
                    HeatChangedPayload {
                        old_heat: previous_heat,
                        new_heat: result.heat,
                        confidence: result.confidence,
                        reasons: result.reasons.clone(),
                        source: result.source,
                    },
                )
                .await?;
            info!(
                "Conversation {} heat {} -> {} ({:?})",
                conversation_id, previous_heat, result.heat, result.source
            );
            escalated = self
                .triage
                .on_heat_changed(tenant_id, conversation_id, result.heat)
                .await?;
        }

        let assignment = if conversation.assigned_to.is_none() && conversation.is_open() {
            let config = self
                .configs
                .get_or_create(tenant_id, self.engine.defaults())
                .await?;
            if config.accepts_auto_assignment() {
                Some(self.engine.assign(tenant_id, conversation_id, None).await?)
            } else {
                debug!("Tenant {} does not auto-assign, leaving {} unowned", tenant_id, conversation_id);
                None
            }
        } else {
            None
        };

        Ok(MessageOutcome {
            previous_heat,
            heat: result,
            changed,
            escalated,
            assignment,
        })
    }

    /// Store the scored heat. A level change is written only if the stored
    /// heat is still the one last read, so each transition is won by exactly
    /// one writer. Returns the heat the write replaced and whether it changed.
    async fn persist_heat(
        &self,
        conversation_id: &str,
        observed: HeatLevel,
        result: &HeatResult,
    ) -> RoutingResult<(HeatLevel, bool)> {
        let mut current = observed;
        for attempt in 1..=MAX_HEAT_WRITE_ATTEMPTS {
            if result.heat == current {
                self.conversations
                    .update_conversation(
                        conversation_id,
                        ConversationPatch::confidence(result.confidence),
                        AssignmentGuard::Any,
                    )
                    .await?;
                return Ok((current, false));
            }

            let won = self
                .conversations
                .update_conversation(
                    conversation_id,
                    ConversationPatch::heat_change(current, result.heat, result.confidence),
                    AssignmentGuard::Any,
                )
                .await?;
            if won {
                return Ok((current, true));
            }

            current = self
                .conversations
                .get_conversation(conversation_id)
                .await?
                .ok_or_else(|| RoutingError::ConversationNotFound(conversation_id.to_string()))?
                .heat;
            debug!(
                "Heat of conversation {} moved to {} concurrently (attempt {}/{})",
                conversation_id, current, attempt, MAX_HEAT_WRITE_ATTEMPTS
            );
        }

        Err(RoutingError::ConcurrentModification(conversation_id.to_string()))
    }
}
