//! Heat scoring
//!
//! The keyword scorer always runs. When a classifier is configured it is
//! consulted under a deadline and its verdict replaces the keyword result;
//! any timeout, provider failure or invalid verdict is logged as a degraded
//! classification and the keyword result is returned instead. Scoring never
//! fails.

pub mod classifier;
pub mod keywords;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::HeatScorerConfig;
use crate::error::ClassifierError;
use crate::types::HeatLevel;

pub use classifier::{ClassifierVerdict, HeatClassifier, LlmHeatClassifier};
pub use keywords::{KeywordScore, score_keywords};

/// Confidence ceiling for keyword-derived results
const MAX_KEYWORD_CONFIDENCE: f64 = 0.9;
const BASE_KEYWORD_CONFIDENCE: f64 = 0.5;
const CONFIDENCE_PER_MATCH: f64 = 0.1;

/// Which path produced a [`HeatResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatSource {
    Keywords,
    Classifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Customer,
    Agent,
}

/// One prior message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn customer(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Customer,
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatResult {
    pub heat: HeatLevel,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub source: HeatSource,
    /// Response priority suggested by the classifier, when it gave one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Clone)]
pub struct HeatScorer {
    classifier: Option<Arc<dyn HeatClassifier>>,
    config: HeatScorerConfig,
}

impl HeatScorer {
    pub fn new(config: HeatScorerConfig) -> Self {
        Self {
            classifier: None,
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn HeatClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn has_classifier(&self) -> bool {
        self.config.classifier_enabled && self.classifier.is_some()
    }

    /// Keyword-only classification
    pub fn score_deterministic(&self, message: &str) -> HeatResult {
        let KeywordScore { score, matches } = score_keywords(message);
        let confidence = (BASE_KEYWORD_CONFIDENCE + CONFIDENCE_PER_MATCH * matches.len() as f64)
            .min(MAX_KEYWORD_CONFIDENCE);
        HeatResult {
            heat: HeatLevel::from_score(score),
            confidence,
            reasons: matches.iter().map(|m| m.reason()).collect(),
            source: HeatSource::Keywords,
            priority: None,
        }
    }

    pub async fn score(&self, message: &str, history: Option<&[ConversationTurn]>) -> HeatResult {
        let deterministic = self.score_deterministic(message);

        let Some(classifier) = self.classifier.as_ref().filter(|_| self.config.classifier_enabled)
        else {
            return deterministic;
        };

        let history = history.unwrap_or_default();
        let keep = self.config.effective_history_turns();
        let recent = &history[history.len().saturating_sub(keep)..];

        match self.classify(classifier.as_ref(), message, recent).await {
            Ok(verdict) => {
                debug!(
                    "Classifier heat {} ({:.2}), keywords said {}",
                    verdict.heat, verdict.confidence, deterministic.heat
                );
                HeatResult {
                    heat: verdict.heat,
                    confidence: verdict.confidence,
                    reasons: verdict.reasons,
                    source: HeatSource::Classifier,
                    priority: verdict.priority,
                }
            }
            Err(e) => {
                warn!("Heat classifier degraded, using keyword score: {}", e);
                deterministic
            }
        }
    }

    async fn classify(
        &self,
        classifier: &dyn HeatClassifier,
        message: &str,
        history: &[ConversationTurn],
    ) -> Result<ClassifierVerdict, ClassifierError> {
        let deadline = self.config.classifier_timeout;
        let value = match tokio::time::timeout(deadline, classifier.classify(message, history)).await
        {
            Err(_) => return Err(ClassifierError::Timeout(deadline)),
            Ok(Err(e)) => {
                return Err(match e.downcast::<ClassifierError>() {
                    Ok(typed) => typed,
                    Err(e) => ClassifierError::Provider(format!("{:#}", e)),
                });
            }
            Ok(Ok(value)) => value,
        };
        classifier::parse_verdict(&value)
    }
}

impl Default for HeatScorer {
    fn default() -> Self {
        Self::new(HeatScorerConfig::default())
    }
}
