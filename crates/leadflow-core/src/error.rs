//! Error taxonomy for lead routing
//!
//! Routing "misses" are business outcomes and live in [`AssignmentFailure`],
//! returned inside an `AssignmentResult`. Only malformed input and collaborator
//! failures surface as [`RoutingError`]. [`ClassifierError`] never leaves the
//! heat scorer: it is logged and the keyword result is used instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard errors raised by the routing core
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("unknown assignment strategy '{0}'")]
    InvalidStrategy(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conversation '{0}' not found")]
    ConversationNotFound(String),

    #[error("conversation '{conversation_id}' does not belong to tenant '{tenant_id}'")]
    TenantMismatch {
        tenant_id: String,
        conversation_id: String,
    },

    #[error("salesman '{0}' not found")]
    SalesmanNotFound(String),

    #[error("salesman '{0}' is inactive")]
    SalesmanInactive(String),

    #[error("conversation '{0}' was modified concurrently, giving up")]
    ConcurrentModification(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type RoutingResult<T> = std::result::Result<T, RoutingError>;

/// Expected reasons an assignment did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentFailure {
    #[error("conversation already has an owner")]
    AlreadyAssigned,

    #[error("auto-assignment is disabled for this tenant")]
    ConfigDisabled,

    #[error("no active salesman available")]
    NoEligibleSalesman,
}

/// Why the AI classifier result was discarded
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier call failed: {0}")]
    Provider(String),

    #[error("classifier returned malformed output: {0}")]
    Malformed(String),

    #[error("classifier returned unknown heat level '{0}'")]
    UnknownHeat(String),
}

/// Reject empty or whitespace-only identifiers
pub(crate) fn require_id(field: &str, value: &str) -> RoutingResult<()> {
    if value.trim().is_empty() {
        return Err(RoutingError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}
