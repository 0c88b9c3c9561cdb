//! In-library settings with safe defaults
//!
//! The CLI maps its TOML sections onto these; library users can construct
//! them directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Strategy;

/// Values used when a tenant's `AssignmentConfig` is created lazily
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDefaults {
    pub strategy: Strategy,
    pub auto_assign_enabled: bool,
    pub consider_capacity: bool,
    pub consider_score: bool,
}

impl Default for RoutingDefaults {
    fn default() -> Self {
        Self {
            strategy: Strategy::RoundRobin,
            auto_assign_enabled: true,
            consider_capacity: true,
            consider_score: false,
        }
    }
}

/// Maximum conversation turns forwarded to the classifier
pub const MAX_HISTORY_TURNS: usize = 5;

/// Configuration for the heat scorer
#[derive(Debug, Clone)]
pub struct HeatScorerConfig {
    /// Whether the AI classifier is consulted at all
    pub classifier_enabled: bool,
    /// Upper bound on a single classifier call
    pub classifier_timeout: Duration,
    /// Recent turns sent along with the message, capped at [`MAX_HISTORY_TURNS`]
    pub history_turns: usize,
}

impl Default for HeatScorerConfig {
    fn default() -> Self {
        Self {
            classifier_enabled: true,
            classifier_timeout: Duration::from_millis(5000),
            history_turns: MAX_HISTORY_TURNS,
        }
    }
}

impl HeatScorerConfig {
    pub fn effective_history_turns(&self) -> usize {
        self.history_turns.min(MAX_HISTORY_TURNS)
    }
}
