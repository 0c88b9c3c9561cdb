//! Shared types for leadflow-core

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RoutingDefaults;
use crate::error::RoutingError;

/// Purchase urgency of a conversation, ordered coldest to hottest
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeatLevel {
    #[default]
    Cold,
    Warm,
    Hot,
    VeryHot,
    OnFire,
}

impl HeatLevel {
    /// Map an accumulated keyword score onto a level
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 50 => Self::OnFire,
            s if s >= 30 => Self::VeryHot,
            s if s >= 15 => Self::Hot,
            s if s >= 5 => Self::Warm,
            _ => Self::Cold,
        }
    }

    /// VERY_HOT and above: eligible for triage and capacity override
    pub fn is_high(self) -> bool {
        self >= Self::VeryHot
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cold => "COLD",
            Self::Warm => "WARM",
            Self::Hot => "HOT",
            Self::VeryHot => "VERY_HOT",
            Self::OnFire => "ON_FIRE",
        }
    }

    /// Lenient parse: accepts `ON_FIRE`, `on_fire`, `on-fire` and `on fire`
    pub fn parse(s: &str) -> Option<Self> {
        match normalize_enum_name(s).as_str() {
            "COLD" => Some(Self::Cold),
            "WARM" => Some(Self::Warm),
            "HOT" => Some(Self::Hot),
            "VERY_HOT" => Some(Self::VeryHot),
            "ON_FIRE" => Some(Self::OnFire),
            _ => None,
        }
    }
}

impl fmt::Display for HeatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent selection algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastActive,
    SkillsBased,
    Geographic,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "ROUND_ROBIN",
            Self::LeastActive => "LEAST_ACTIVE",
            Self::SkillsBased => "SKILLS_BASED",
            Self::Geographic => "GEOGRAPHIC",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_enum_name(s).as_str() {
            "ROUND_ROBIN" => Ok(Self::RoundRobin),
            "LEAST_ACTIVE" => Ok(Self::LeastActive),
            "SKILLS_BASED" => Ok(Self::SkillsBased),
            "GEOGRAPHIC" => Ok(Self::Geographic),
            _ => Err(RoutingError::InvalidStrategy(s.to_string())),
        }
    }
}

fn normalize_enum_name(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Product keyword a salesman can handle, stored trimmed and lowercased
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductSkill(String);

impl ProductSkill {
    pub fn new(keyword: &str) -> Self {
        Self(keyword.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the skill keyword and the mentioned product overlap as substrings
    pub fn matches(&self, mention: &str) -> bool {
        let mention = mention.trim().to_lowercase();
        if self.0.is_empty() || mention.is_empty() {
            return false;
        }
        mention.contains(&self.0) || self.0.contains(&mention)
    }
}

/// Language reduced to its primary subtag (`en-US` → `en`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(tag: &str) -> Self {
        let primary = tag
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_lowercase();
        Self(primary)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &LanguageCode) -> bool {
        !self.0.is_empty() && self.0 == other.0
    }
}

pub const DEFAULT_MAX_LEADS_PER_MONTH: u32 = 50;

/// Sales agent in a tenant's roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Salesman {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub active: bool,
    pub max_leads_per_month: u32,
    pub capacity_override_for_high_heat: bool,
    #[serde(default)]
    pub product_skills: BTreeSet<ProductSkill>,
    #[serde(default)]
    pub language_skills: BTreeSet<LanguageCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geographic_zone: Option<String>,
    #[serde(default)]
    pub performance_score: f64,
}

impl Salesman {
    pub fn new(id: &str, tenant_id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            active: true,
            max_leads_per_month: DEFAULT_MAX_LEADS_PER_MONTH,
            capacity_override_for_high_heat: false,
            product_skills: BTreeSet::new(),
            language_skills: BTreeSet::new(),
            geographic_zone: None,
            performance_score: 0.0,
        }
    }

    pub fn with_capacity(mut self, max_leads_per_month: u32) -> Self {
        self.max_leads_per_month = max_leads_per_month;
        self
    }

    pub fn with_high_heat_override(mut self, enabled: bool) -> Self {
        self.capacity_override_for_high_heat = enabled;
        self
    }

    pub fn with_products<'a>(mut self, skills: impl IntoIterator<Item = &'a str>) -> Self {
        self.product_skills
            .extend(skills.into_iter().map(ProductSkill::new));
        self
    }

    pub fn with_languages<'a>(mut self, languages: impl IntoIterator<Item = &'a str>) -> Self {
        self.language_skills
            .extend(languages.into_iter().map(LanguageCode::new));
        self
    }

    pub fn with_zone(mut self, zone: &str) -> Self {
        self.geographic_zone = Some(zone.to_string());
        self
    }

    pub fn with_performance(mut self, score: f64) -> Self {
        self.performance_score = score;
        self
    }

    pub fn is_at_capacity(&self, workload: usize) -> bool {
        workload >= self.max_leads_per_month as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    #[default]
    Open,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match normalize_enum_name(s).as_str() {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// What we know about the customer on the other end
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndUserContext {
    #[serde(default)]
    pub product_mentions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<LanguageCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Customer conversation ("lead"), owned by the surrounding product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub assigned_to: Option<String>,
    pub heat: HeatLevel,
    pub heat_confidence: f64,
    pub status: ConversationStatus,
    #[serde(default)]
    pub end_user_context: EndUserContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: &str, tenant_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            assigned_to: None,
            heat: HeatLevel::Cold,
            heat_confidence: 0.0,
            status: ConversationStatus::Open,
            end_user_context: EndUserContext::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_context(mut self, context: EndUserContext) -> Self {
        self.end_user_context = context;
        self
    }

    pub fn with_heat(mut self, heat: HeatLevel) -> Self {
        self.heat = heat;
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == ConversationStatus::Open
    }
}

/// Per-tenant routing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentConfig {
    pub tenant_id: String,
    pub strategy: Strategy,
    pub auto_assign_enabled: bool,
    pub consider_capacity: bool,
    pub consider_score: bool,
    pub active: bool,
}

impl AssignmentConfig {
    pub fn with_defaults(tenant_id: &str, defaults: &RoutingDefaults) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            strategy: defaults.strategy,
            auto_assign_enabled: defaults.auto_assign_enabled,
            consider_capacity: defaults.consider_capacity,
            consider_score: defaults.consider_score,
            active: true,
        }
    }

    pub fn accepts_auto_assignment(&self) -> bool {
        self.active && self.auto_assign_enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadEventType {
    Assigned,
    Reassigned,
    HeatChanged,
}

impl LeadEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "ASSIGNED",
            Self::Reassigned => "REASSIGNED",
            Self::HeatChanged => "HEAT_CHANGED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match normalize_enum_name(s).as_str() {
            "ASSIGNED" => Some(Self::Assigned),
            "REASSIGNED" => Some(Self::Reassigned),
            "HEAT_CHANGED" => Some(Self::HeatChanged),
            _ => None,
        }
    }
}

impl fmt::Display for LeadEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of a routing or heat decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadEvent {
    pub id: String,
    pub tenant_id: String,
    pub event_type: LeadEventType,
    pub conversation_id: String,
    pub triggered_by: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LeadEvent {
    pub fn new(
        tenant_id: &str,
        event_type: LeadEventType,
        conversation_id: &str,
        triggered_by: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            event_type,
            conversation_id: conversation_id.to_string(),
            triggered_by: triggered_by.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}

pub const TRIAGE_TYPE_HIGH_VALUE: &str = "high_value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageStatus {
    Open,
    Closed,
}

impl TriageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Entry in the priority follow-up queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageEntry {
    pub id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub entry_type: String,
    pub status: TriageStatus,
    pub created_at: DateTime<Utc>,
}

impl TriageEntry {
    pub fn open(tenant_id: &str, conversation_id: &str, entry_type: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            conversation_id: conversation_id.to_string(),
            entry_type: entry_type.to_string(),
            status: TriageStatus::Open,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heat_from_score_boundaries() {
        let cases = [
            (50, HeatLevel::OnFire),
            (49, HeatLevel::VeryHot),
            (30, HeatLevel::VeryHot),
            (29, HeatLevel::Hot),
            (15, HeatLevel::Hot),
            (14, HeatLevel::Warm),
            (5, HeatLevel::Warm),
            (4, HeatLevel::Cold),
            (-40, HeatLevel::Cold),
        ];
        for (score, expected) in cases {
            assert_eq!(HeatLevel::from_score(score), expected, "score {}", score);
        }
    }

    #[test]
    fn test_heat_ordering() {
        assert!(HeatLevel::Cold < HeatLevel::Warm);
        assert!(HeatLevel::Warm < HeatLevel::Hot);
        assert!(HeatLevel::Hot < HeatLevel::VeryHot);
        assert!(HeatLevel::VeryHot < HeatLevel::OnFire);
        assert!(!HeatLevel::Hot.is_high());
        assert!(HeatLevel::VeryHot.is_high());
        assert!(HeatLevel::OnFire.is_high());
    }

    #[test]
    fn test_heat_parse_lenient() {
        assert_eq!(HeatLevel::parse("ON_FIRE"), Some(HeatLevel::OnFire));
        assert_eq!(HeatLevel::parse("very hot"), Some(HeatLevel::VeryHot));
        assert_eq!(HeatLevel::parse(" warm "), Some(HeatLevel::Warm));
        assert_eq!(HeatLevel::parse("BOGUS"), None);
    }

    #[test]
    fn test_heat_serde_uses_screaming_case() {
        assert_eq!(
            serde_json::to_string(&HeatLevel::VeryHot).unwrap(),
            "\"VERY_HOT\""
        );
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("round_robin".parse::<Strategy>().unwrap(), Strategy::RoundRobin);
        assert_eq!("LEAST-ACTIVE".parse::<Strategy>().unwrap(), Strategy::LeastActive);
        assert_eq!("skills based".parse::<Strategy>().unwrap(), Strategy::SkillsBased);
        assert_eq!("GEOGRAPHIC".parse::<Strategy>().unwrap(), Strategy::Geographic);
        assert!(matches!(
            "random".parse::<Strategy>(),
            Err(RoutingError::InvalidStrategy(s)) if s == "random"
        ));
    }

    #[test]
    fn test_product_skill_matching() {
        let skill = ProductSkill::new(" Solar Panel ");
        assert_eq!(skill.as_str(), "solar panel");
        assert!(skill.matches("solar panels"));
        assert!(skill.matches("SOLAR"));
        assert!(!skill.matches("battery"));
        assert!(!skill.matches("  "));
    }

    #[test]
    fn test_language_code_primary_subtag() {
        assert_eq!(LanguageCode::new("en-US").as_str(), "en");
        assert_eq!(LanguageCode::new("PT_br").as_str(), "pt");
        assert!(LanguageCode::new("en").matches(&LanguageCode::new("EN-gb")));
        assert!(!LanguageCode::new("").matches(&LanguageCode::new("")));
    }

    #[test]
    fn test_salesman_capacity() {
        let s = Salesman::new("s1", "t1", "Ana").with_capacity(2);
        assert!(!s.is_at_capacity(1));
        assert!(s.is_at_capacity(2));
        assert!(s.is_at_capacity(3));
    }

    #[test]
    fn test_config_defaults() {
        let config = AssignmentConfig::with_defaults("t1", &RoutingDefaults::default());
        assert_eq!(config.strategy, Strategy::RoundRobin);
        assert!(config.accepts_auto_assignment());
        assert!(config.consider_capacity);
        assert!(!config.consider_score);
    }
}
