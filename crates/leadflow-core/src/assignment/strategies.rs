//! Pure selection functions, one per strategy
//!
//! Every function receives the same [`SelectionInput`] and returns the chosen
//! salesman (or `None` for an empty roster). The roster must be sorted by id;
//! that order is the rotation order and the tie-break order for all strategies.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ledger::SelectionFallback;
use crate::types::{AssignmentConfig, Conversation, EndUserContext, Salesman, Strategy};

pub const PRODUCT_MATCH_POINTS: f64 = 10.0;
pub const LANGUAGE_MATCH_POINTS: f64 = 20.0;
pub const PERFORMANCE_WEIGHT: f64 = 0.5;

/// Inputs shared by all strategies for one selection pass
pub struct SelectionInput<'a> {
    /// Active salesmen sorted by id
    pub roster: &'a [Salesman],
    pub conversation: &'a Conversation,
    pub config: &'a AssignmentConfig,
    /// Open-lead counts computed for this pass only
    pub workloads: &'a HashMap<String, usize>,
    /// Salesman of the tenant's latest ASSIGNED event
    pub last_assigned: Option<&'a str>,
}

impl SelectionInput<'_> {
    fn workload(&self, salesman: &Salesman) -> usize {
        self.workloads.get(&salesman.id).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    pub salesman: &'a Salesman,
    /// Deviations from the primary rule, outermost first
    pub fallbacks: Vec<SelectionFallback>,
}

impl<'a> Selection<'a> {
    fn direct(salesman: &'a Salesman) -> Self {
        Self {
            salesman,
            fallbacks: Vec::new(),
        }
    }
}

pub fn select<'a>(strategy: Strategy, input: &SelectionInput<'a>) -> Option<Selection<'a>> {
    match strategy {
        Strategy::RoundRobin => round_robin(input),
        Strategy::LeastActive => least_active(input),
        Strategy::SkillsBased => skills_based(input),
        Strategy::Geographic => geographic(input),
    }
}

/// Index where rotation resumes: the first salesman whose id sorts after the
/// last assignee. Wraps to 0 when the last assignee was the final id or when
/// there is no prior assignment.
pub fn rotation_start(roster: &[Salesman], last_assigned: Option<&str>) -> usize {
    match last_assigned {
        Some(last) => roster
            .iter()
            .position(|s| s.id.as_str() > last)
            .unwrap_or(0),
        None => 0,
    }
}

fn has_capacity(salesman: &Salesman, input: &SelectionInput<'_>) -> bool {
    if !input.config.consider_capacity {
        return true;
    }
    if !salesman.is_at_capacity(input.workload(salesman)) {
        return true;
    }
    input.conversation.heat.is_high() && salesman.capacity_override_for_high_heat
}

pub fn round_robin<'a>(input: &SelectionInput<'a>) -> Option<Selection<'a>> {
    let roster = input.roster;
    if roster.is_empty() {
        return None;
    }
    let start = rotation_start(roster, input.last_assigned);
    let mut rotation = roster[start..].iter().chain(roster[..start].iter());

    if let Some(salesman) = rotation.find(|s| has_capacity(s, input)) {
        return Some(Selection::direct(salesman));
    }

    let salesman = &roster[start];
    warn!(
        "Round robin: every salesman of tenant {} is at capacity, assigning {} anyway",
        input.config.tenant_id, salesman.id
    );
    Some(Selection {
        salesman,
        fallbacks: vec![SelectionFallback::CapacityExhausted],
    })
}

pub fn least_active<'a>(input: &SelectionInput<'a>) -> Option<Selection<'a>> {
    input
        .roster
        .iter()
        .min_by_key(|s| input.workload(s))
        .map(Selection::direct)
}

/// Skill affinity of one salesman for a customer context
pub fn skill_score(salesman: &Salesman, context: &EndUserContext, consider_score: bool) -> f64 {
    let product_hits = salesman
        .product_skills
        .iter()
        .filter(|skill| context.product_mentions.iter().any(|m| skill.matches(m)))
        .count();
    let mut score = product_hits as f64 * PRODUCT_MATCH_POINTS;

    if let Some(language) = &context.language {
        if salesman.language_skills.iter().any(|l| l.matches(language)) {
            score += LANGUAGE_MATCH_POINTS;
        }
    }
    if consider_score {
        score += PERFORMANCE_WEIGHT * salesman.performance_score;
    }
    score
}

pub fn skills_based<'a>(input: &SelectionInput<'a>) -> Option<Selection<'a>> {
    let context = &input.conversation.end_user_context;
    let mut best: Option<(&Salesman, f64)> = None;
    for salesman in input.roster {
        let score = skill_score(salesman, context, input.config.consider_score);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((salesman, score));
        }
    }
    best.map(|(salesman, score)| {
        if score <= 0.0 {
            debug!("Skills based: no skill match, falling back to best available {}", salesman.id);
        }
        Selection::direct(salesman)
    })
}

/// Bidirectional, case-insensitive substring containment
pub fn zone_matches(zone: &str, address: &str) -> bool {
    let zone = zone.trim().to_lowercase();
    let address = address.trim().to_lowercase();
    if zone.is_empty() || address.is_empty() {
        return false;
    }
    address.contains(&zone) || zone.contains(&address)
}

pub fn geographic<'a>(input: &SelectionInput<'a>) -> Option<Selection<'a>> {
    let address = input
        .conversation
        .end_user_context
        .address
        .as_deref()
        .filter(|a| !a.trim().is_empty());

    if let Some(address) = address {
        let matched = input.roster.iter().find(|s| {
            s.geographic_zone
                .as_deref()
                .is_some_and(|zone| zone_matches(zone, address))
        });
        if let Some(salesman) = matched {
            return Some(Selection::direct(salesman));
        }
        debug!("Geographic: no zone matches '{}', rotating", address);
    } else {
        debug!("Geographic: customer location unknown, rotating");
    }

    round_robin(input).map(|mut selection| {
        selection
            .fallbacks
            .insert(0, SelectionFallback::GeographicNoMatch);
        selection
    })
}
