//! Deterministic keyword-weighted heat scoring
//!
//! Messages and keyword phrases go through the same tokenizer, and a phrase
//! matches when its tokens appear contiguously in the message. Each phrase
//! counts at most once per message, and longer phrases claim their tokens
//! first so "as soon as possible" does not also count as "soon".

/// A group of phrases sharing one weight
#[derive(Debug, Clone, Copy)]
pub struct IndicatorCategory {
    pub label: &'static str,
    pub weight: i32,
    pub phrases: &'static [&'static str],
}

pub const IMMEDIATE_URGENCY: IndicatorCategory = IndicatorCategory {
    label: "immediate urgency",
    weight: 30,
    phrases: &[
        "urgent",
        "urgently",
        "asap",
        "right now",
        "immediately",
        "today",
        "emergency",
        "as soon as possible",
        "right away",
    ],
};

pub const TIME_SENSITIVE: IndicatorCategory = IndicatorCategory {
    label: "time sensitive",
    weight: 15,
    phrases: &[
        "this week",
        "tomorrow",
        "deadline",
        "soon",
        "quickly",
        "limited time",
        "end of month",
        "this month",
    ],
};

pub const BUDGET_CONFIRMED: IndicatorCategory = IndicatorCategory {
    label: "budget confirmed",
    weight: 25,
    phrases: &[
        "budget approved",
        "approved budget",
        "ready to pay",
        "have the budget",
        "funds available",
        "purchase order",
        "credit card",
    ],
};

pub const BUYING_SIGNAL: IndicatorCategory = IndicatorCategory {
    label: "buying signal",
    weight: 20,
    phrases: &[
        "buy",
        "buying",
        "purchase",
        "quote",
        "sign up",
        "subscribe",
        "place an order",
        "pricing for",
    ],
};

pub const DECISION_READY: IndicatorCategory = IndicatorCategory {
    label: "decision ready",
    weight: 20,
    phrases: &[
        "let's do it",
        "lets do it",
        "go ahead",
        "send the contract",
        "sign the contract",
        "where do i sign",
        "decided",
    ],
};

pub const EXPLORATORY: IndicatorCategory = IndicatorCategory {
    label: "exploratory",
    weight: -15,
    phrases: &[
        "just looking",
        "just browsing",
        "curious",
        "researching",
        "maybe",
        "thinking about",
        "exploring",
    ],
};

pub const PRICE_SHOPPING: IndicatorCategory = IndicatorCategory {
    label: "price shopping",
    weight: -10,
    phrases: &[
        "cheaper",
        "discount",
        "compare prices",
        "best price",
        "too expensive",
        "competitor",
    ],
};

pub const NOT_READY: IndicatorCategory = IndicatorCategory {
    label: "not ready",
    weight: -20,
    phrases: &[
        "not ready",
        "not now",
        "next year",
        "later",
        "no budget",
        "not interested",
    ],
};

pub const CATEGORIES: [IndicatorCategory; 8] = [
    IMMEDIATE_URGENCY,
    TIME_SENSITIVE,
    BUDGET_CONFIRMED,
    BUYING_SIGNAL,
    DECISION_READY,
    EXPLORATORY,
    PRICE_SHOPPING,
    NOT_READY,
];

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMatch {
    pub category: &'static str,
    pub phrase: &'static str,
    pub weight: i32,
}

impl KeywordMatch {
    pub fn reason(&self) -> String {
        format!("{}: {}", self.category, self.phrase)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordScore {
    pub score: i32,
    pub matches: Vec<KeywordMatch>,
}

/// Lowercased word tokens. Apostrophes inside words are kept so "let's" stays
/// one token.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// First window of `tokens` equal to `phrase` that touches no claimed token
fn find_unclaimed(tokens: &[String], claimed: &[bool], phrase: &[String]) -> Option<usize> {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return None;
    }
    (0..=tokens.len() - phrase.len()).find(|&start| {
        let span = start..start + phrase.len();
        tokens[span.clone()] == *phrase && claimed[span].iter().all(|taken| !taken)
    })
}

pub fn score_keywords(message: &str) -> KeywordScore {
    let tokens = tokenize(message);
    let mut claimed = vec![false; tokens.len()];

    // (category index, phrase index, phrase tokens), longest phrase first
    let mut candidates: Vec<(usize, usize, Vec<String>)> = CATEGORIES
        .iter()
        .enumerate()
        .flat_map(|(c, category)| {
            category
                .phrases
                .iter()
                .enumerate()
                .map(move |(p, phrase)| (c, p, tokenize(phrase)))
        })
        .collect();
    candidates.sort_by(|a, b| b.2.len().cmp(&a.2.len()).then((a.0, a.1).cmp(&(b.0, b.1))));

    let mut hits: Vec<(usize, usize)> = Vec::new();
    for (c, p, phrase) in &candidates {
        if let Some(start) = find_unclaimed(&tokens, &claimed, phrase) {
            claimed[start..start + phrase.len()].fill(true);
            hits.push((*c, *p));
        }
    }
    hits.sort_unstable();

    let mut result = KeywordScore::default();
    for (c, p) in hits {
        let category = &CATEGORIES[c];
        result.score += category.weight;
        result.matches.push(KeywordMatch {
            category: category.label,
            phrase: category.phrases[p],
            weight: category.weight,
        });
    }
    result
}
