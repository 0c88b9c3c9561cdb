//! AI-assisted heat classification
//!
//! A [`HeatClassifier`] returns the raw JSON verdict; [`parse_verdict`]
//! validates it. Anything short of a known heat level is a
//! [`ClassifierError`] and the scorer falls back to keywords.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ConversationTurn, TurnRole};
use crate::error::ClassifierError;
use crate::providers::ModelRouter;
use crate::types::HeatLevel;

/// Used when a verdict names a heat but omits its confidence
const DEFAULT_VERDICT_CONFIDENCE: f64 = 0.5;

/// Injectable text-classification capability
#[async_trait]
pub trait HeatClassifier: Send + Sync {
    /// Classify `message` given up to a handful of preceding turns.
    ///
    /// Expected shape: `{heat, confidence, reasoning, urgency_indicators,
    /// suggested_response_priority}`.
    async fn classify(&self, message: &str, history: &[ConversationTurn]) -> Result<Value>;
}

/// A validated classifier answer
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierVerdict {
    pub heat: HeatLevel,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub priority: Option<String>,
}

pub fn parse_verdict(value: &Value) -> std::result::Result<ClassifierVerdict, ClassifierError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ClassifierError::Malformed("verdict is not a JSON object".to_string()))?;

    let raw_heat = obj
        .get("heat")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ClassifierError::Malformed("missing string field 'heat'".to_string()))?;
    let heat =
        HeatLevel::parse(raw_heat).ok_or_else(|| ClassifierError::UnknownHeat(raw_heat.to_string()))?;

    let confidence = match obj.get("confidence") {
        None | Some(Value::Null) => DEFAULT_VERDICT_CONFIDENCE,
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ClassifierError::Malformed(format!("confidence is not a number: {}", v)))?
            .clamp(0.0, 1.0),
    };

    let mut reasons = Vec::new();
    if let Some(reasoning) = obj.get("reasoning").and_then(|v| v.as_str()) {
        let reasoning = reasoning.trim();
        if !reasoning.is_empty() {
            reasons.push(reasoning.to_string());
        }
    }
    if let Some(indicators) = obj.get("urgency_indicators").and_then(|v| v.as_array()) {
        reasons.extend(
            indicators
                .iter()
                .filter_map(|i| i.as_str())
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty()),
        );
    }

    let priority = obj
        .get("suggested_response_priority")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(ClassifierVerdict {
        heat,
        confidence,
        reasons,
        priority,
    })
}

/// Pull the JSON object out of a model reply that may carry preamble or fences
pub fn extract_json(text: &str) -> std::result::Result<Value, ClassifierError> {
    let start = text
        .find('{')
        .ok_or_else(|| ClassifierError::Malformed("no JSON object in reply".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| ClassifierError::Malformed("no closing brace in reply".to_string()))?;
    serde_json::from_str(&text[start..=end]).map_err(|e| ClassifierError::Malformed(e.to_string()))
}

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You classify the purchase urgency ("heat") of sales conversations.
Respond with ONLY a JSON object, no explanation:
{
  "heat": "<one of: COLD, WARM, HOT, VERY_HOT, ON_FIRE>",
  "confidence": <number between 0 and 1>,
  "reasoning": "<one sentence>",
  "urgency_indicators": ["<short phrase from the message>", "..."],
  "suggested_response_priority": "<one of: low, normal, high, immediate>"
}"#;

/// Classifier backed by the configured LLM providers
pub struct LlmHeatClassifier {
    router: ModelRouter,
}

impl LlmHeatClassifier {
    pub fn new(router: ModelRouter) -> Self {
        Self { router }
    }

    fn build_prompt(message: &str, history: &[ConversationTurn]) -> String {
        let mut prompt = String::new();
        if !history.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for turn in history {
                let speaker = match turn.role {
                    TurnRole::Customer => "Customer",
                    TurnRole::Agent => "Agent",
                };
                prompt.push_str(&format!("{}: {}\n", speaker, turn.content));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("Latest customer message: {}", message));
        prompt
    }
}

#[async_trait]
impl HeatClassifier for LlmHeatClassifier {
    async fn classify(&self, message: &str, history: &[ConversationTurn]) -> Result<Value> {
        let prompt = Self::build_prompt(message, history);
        let response = self.router.complete(CLASSIFIER_SYSTEM_PROMPT, &prompt).await?;
        debug!(
            "Heat classifier reply via {} ({:?} output tokens)",
            self.router.provider_name(),
            response.output_tokens
        );
        if response.text.trim().is_empty() {
            return Err(anyhow!(ClassifierError::Malformed("empty reply".to_string())));
        }
        Ok(extract_json(&response.text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Completion, LlmProvider};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_verdict_full() {
        let verdict = parse_verdict(&json!({
            "heat": "VERY_HOT",
            "confidence": 0.82,
            "reasoning": "Customer has a deadline",
            "urgency_indicators": ["deadline friday", " "],
            "suggested_response_priority": "high"
        }))
        .unwrap();
        assert_eq!(verdict.heat, HeatLevel::VeryHot);
        assert_eq!(verdict.confidence, 0.82);
        assert_eq!(
            verdict.reasons,
            vec!["Customer has a deadline", "deadline friday"]
        );
        assert_eq!(verdict.priority.as_deref(), Some("high"));
    }

    #[test]
    fn test_parse_verdict_lenient_heat_and_clamped_confidence() {
        let verdict = parse_verdict(&json!({"heat": "on fire", "confidence": 3.0})).unwrap();
        assert_eq!(verdict.heat, HeatLevel::OnFire);
        assert_eq!(verdict.confidence, 1.0);

        let verdict = parse_verdict(&json!({"heat": "warm"})).unwrap();
        assert_eq!(verdict.confidence, DEFAULT_VERDICT_CONFIDENCE);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn test_parse_verdict_rejects_bad_shapes() {
        assert!(matches!(
            parse_verdict(&json!({"heat": "BOGUS"})),
            Err(ClassifierError::UnknownHeat(h)) if h == "BOGUS"
        ));
        assert!(matches!(
            parse_verdict(&json!({"confidence": 0.9})),
            Err(ClassifierError::Malformed(_))
        ));
        assert!(matches!(
            parse_verdict(&json!({"heat": 3})),
            Err(ClassifierError::Malformed(_))
        ));
        assert!(matches!(
            parse_verdict(&json!({"heat": "HOT", "confidence": "high"})),
            Err(ClassifierError::Malformed(_))
        ));
        assert!(matches!(
            parse_verdict(&json!(["HOT"])),
            Err(ClassifierError::Malformed(_))
        ));
    }

    #[test]
    fn test_extract_json_with_preamble() {
        let value = extract_json("Sure! Here you go:\n```json\n{\"heat\": \"HOT\"}\n```").unwrap();
        assert_eq!(value["heat"], "HOT");
        assert!(extract_json("no json here").is_err());
        assert!(extract_json("} backwards {").is_err());
    }

    #[test]
    fn test_build_prompt_includes_history() {
        let history = vec![
            ConversationTurn::customer("Do you ship to Lisbon?"),
            ConversationTurn::agent("Yes, within a week."),
        ];
        let prompt = LlmHeatClassifier::build_prompt("Ok I want two", &history);
        assert!(prompt.contains("Customer: Do you ship to Lisbon?"));
        assert!(prompt.contains("Agent: Yes, within a week."));
        assert!(prompt.ends_with("Latest customer message: Ok I want two"));

        let prompt = LlmHeatClassifier::build_prompt("hi", &[]);
        assert_eq!(prompt, "Latest customer message: hi");
    }

    struct RecordingProvider {
        reply: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        fn provider_name(&self) -> &str {
            "recording"
        }
        fn model(&self) -> &str {
            "test"
        }
        async fn complete(&self, system: &str, prompt: &str) -> Result<Completion> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(system.to_string());
            seen.push(prompt.to_string());
            Ok(Completion {
                text: self.reply.clone(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_llm_classifier_round_trip() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let classifier = LlmHeatClassifier::new(ModelRouter::single(Box::new(RecordingProvider {
            reply: "Result: {\"heat\": \"HOT\", \"confidence\": 0.7}".to_string(),
            seen: seen.clone(),
        })));
        let value = classifier.classify("need it soon", &[]).await.unwrap();
        assert_eq!(parse_verdict(&value).unwrap().heat, HeatLevel::Hot);

        let seen = seen.lock().unwrap();
        assert!(seen[0].contains("suggested_response_priority"));
        assert!(seen[1].contains("need it soon"));
    }

    #[tokio::test]
    async fn test_llm_classifier_malformed_reply_is_typed() {
        let classifier = LlmHeatClassifier::new(ModelRouter::single(Box::new(RecordingProvider {
            reply: "I think it is hot".to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
        })));
        let err = classifier.classify("hi", &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClassifierError>(),
            Some(ClassifierError::Malformed(_))
        ));
    }
}
