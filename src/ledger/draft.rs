//! Free-text purchase message → ledger draft.
//!
//! The heuristics are deliberately shallow. The only hard guarantee is
//! determinism: the same text always yields the same draft, so a retried
//! message is parsed identically.

use crate::error::DraftError;
use crate::ledger::config::ExtractorConfig;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftField {
    Item,
    Amount,
    Currency,
    Category,
    ProjectCode,
}

impl DraftField {
    pub fn as_str(self) -> &'static str {
        match self {
            DraftField::Item => "item",
            DraftField::Amount => "amount",
            DraftField::Currency => "currency",
            DraftField::Category => "category",
            DraftField::ProjectCode => "project_code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub raw_text: String,
    pub item: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub category: Option<String>,
    pub project_code: Option<String>,
    pub confidence: f64,
    pub missing_fields: BTreeSet<DraftField>,
    pub needs_clarification: bool,
}

/// A draft with every field the ledger row needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteDraft {
    pub item: String,
    pub amount: f64,
    pub currency: String,
    pub category: String,
    pub project_code: String,
}

impl Draft {
    pub fn new(
        raw_text: &str,
        item: Option<String>,
        amount: Option<f64>,
        currency: Option<String>,
        category: Option<String>,
        project_code: Option<String>,
        confidence: f64,
    ) -> Self {
        let mut missing_fields = BTreeSet::new();
        if item.is_none() {
            missing_fields.insert(DraftField::Item);
        }
        if amount.is_none() {
            missing_fields.insert(DraftField::Amount);
        } else if currency.is_none() {
            missing_fields.insert(DraftField::Currency);
        }
        if category.is_none() {
            missing_fields.insert(DraftField::Category);
        }
        if project_code.is_none() {
            missing_fields.insert(DraftField::ProjectCode);
        }
        let needs_clarification = !missing_fields.is_empty();
        Self {
            raw_text: raw_text.trim().to_string(),
            item,
            amount,
            currency,
            category,
            project_code,
            confidence: (confidence.clamp(0.0, 1.0) * 100.0).round() / 100.0,
            missing_fields,
            needs_clarification,
        }
    }

    /// `None` exactly when clarification is needed.
    pub fn complete(&self) -> Option<CompleteDraft> {
        if self.needs_clarification {
            return None;
        }
        Some(CompleteDraft {
            item: self.item.clone()?,
            amount: self.amount?,
            currency: self.currency.clone()?,
            category: self.category.clone()?,
            project_code: self.project_code.clone()?,
        })
    }
}

const ITEM_EDGE_CHARS: &[char] = &[' ', '-', '–', '—', ':', ',', '&', '\t'];

pub trait DraftExtractor {
    fn extract(&self, raw_text: &str) -> Result<Draft, DraftError>;
}

const CATEGORY_KEYWORDS: [(&str, &[&str]); 3] = [
    (
        "Lab consumables",
        &[
            "gloves", "tips", "pipette", "tube", "tubes", "falcon", "filter", "filters", "vial",
            "vials", "kimwipe", "kimwipes",
        ],
    ),
    (
        "Equipment",
        &["pump", "balance", "instrument", "power supply", "meter"],
    ),
    (
        "Chemicals & gases",
        &[
            "co2",
            "n2",
            "argon",
            "ar",
            "hcl",
            "naoh",
            "electrolyte",
            "solvent",
            "salt",
            "gas",
            "cylinder",
            "refill",
        ],
    ),
];

static EXPLICIT_CURRENCY_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(AUD|USD|GBP|EUR|NZD)\b\s*([0-9]+(?:\.[0-9]{1,2})?)")
        .expect("hard-coded regular expression to be valid")
});
static SYMBOL_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([$£€])\s*([0-9]+(?:\.[0-9]{1,2})?)")
        .expect("hard-coded regular expression to be valid")
});
static SUFFIX_CURRENCY_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([0-9]+(?:\.[0-9]{1,2})?)\s*(AUD|USD|GBP|EUR|NZD)\b")
        .expect("hard-coded regular expression to be valid")
});
static CURRENCY_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(AUD|USD|GBP|EUR|NZD)\b").expect("hard-coded regular expression to be valid")
});
static EXPLICIT_CONSUMABLES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bconsumables?\b").expect("hard-coded regular expression to be valid")
});
static EXPLICIT_EQUIPMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(equipment|equip)\b").expect("hard-coded regular expression to be valid")
});
static EXPLICIT_CHEMICALS_AND_GASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bchemicals?\s*(&|and)\s*gases\b")
        .expect("hard-coded regular expression to be valid")
});
static EXPLICIT_CHEMICALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bchemicals?\b").expect("hard-coded regular expression to be valid")
});
static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\w+").expect("hard-coded regular expression to be valid"));
static CONTROL_VERBS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(buy|bought|ordered|order|paid|spent)\b")
        .expect("hard-coded regular expression to be valid")
});
static CATEGORY_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(consumables?|equipment|chemicals?|gas|gases)\b")
        .expect("hard-coded regular expression to be valid")
});
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("hard-coded regular expression to be valid"));

fn bounded_pattern(literal: &str) -> String {
    let escaped = regex::escape(literal);
    let starts_word = literal.chars().next().is_some_and(|c| c.is_alphanumeric());
    let ends_word = literal.chars().last().is_some_and(|c| c.is_alphanumeric());
    format!(
        "(?i){}{}{}",
        if starts_word { r"\b" } else { "" },
        escaped,
        if ends_word { r"\b" } else { "" }
    )
}

/// Regex/keyword extractor for short lab purchase messages such as
/// `Bunnings nitrile gloves $28.50 DE`.
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    projects: Vec<(String, Regex)>,
    keyword_categories: Vec<(&'static str, Regex)>,
    dollar_currency: String,
}

impl HeuristicExtractor {
    pub fn new(cfg: &ExtractorConfig) -> Result<Self> {
        let mut codes = cfg
            .project_codes
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>();
        // Longest first, so `DE Est` wins over `DE`.
        codes.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut projects = Vec::with_capacity(codes.len());
        for code in codes {
            let re = Regex::new(&bounded_pattern(&code))
                .with_context(|| format!("invalid project code pattern for `{code}`"))?;
            projects.push((code, re));
        }

        let mut keyword_categories = Vec::with_capacity(CATEGORY_KEYWORDS.len());
        for (category, keywords) in CATEGORY_KEYWORDS {
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            let re = Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
                .with_context(|| format!("invalid keyword pattern for `{category}`"))?;
            keyword_categories.push((category, re));
        }

        Ok(Self {
            projects,
            keyword_categories,
            dollar_currency: cfg.dollar_currency.trim().to_ascii_uppercase(),
        })
    }

    fn find_project(&self, text: &str) -> (Option<String>, f64) {
        for (code, re) in &self.projects {
            if re.is_match(text) {
                return (Some(code.clone()), 0.95);
            }
        }
        (None, 0.0)
    }

    fn symbol_currency(&self, symbol: &str) -> Option<String> {
        match symbol {
            "$" => Some(self.dollar_currency.clone()),
            "£" => Some("GBP".to_string()),
            "€" => Some("EUR".to_string()),
            _ => None,
        }
    }

    fn find_currency_and_amount(&self, text: &str) -> (Option<String>, Option<f64>, f64) {
        if let Some(caps) = EXPLICIT_CURRENCY_AMOUNT.captures(text)
            && let Ok(amount) = caps[2].parse::<f64>()
        {
            return (Some(caps[1].to_ascii_uppercase()), Some(amount), 0.9);
        }

        if let Some(caps) = SYMBOL_AMOUNT.captures(text)
            && let Ok(amount) = caps[2].parse::<f64>()
        {
            return (self.symbol_currency(&caps[1]), Some(amount), 0.7);
        }

        if let Some(caps) = SUFFIX_CURRENCY_AMOUNT.captures(text)
            && let Ok(amount) = caps[1].parse::<f64>()
        {
            return (Some(caps[2].to_ascii_uppercase()), Some(amount), 0.85);
        }

        (None, None, 0.0)
    }

    fn find_category(&self, text: &str) -> (Option<String>, f64) {
        if EXPLICIT_CONSUMABLES.is_match(text) {
            return (Some("Lab consumables".to_string()), 0.95);
        }
        if EXPLICIT_EQUIPMENT.is_match(text) {
            return (Some("Equipment".to_string()), 0.95);
        }
        if EXPLICIT_CHEMICALS_AND_GASES.is_match(text) {
            return (Some("Chemicals & gases".to_string()), 0.95);
        }
        let lower = text.to_lowercase();
        if EXPLICIT_CHEMICALS.is_match(text) && (lower.contains("gas") || lower.contains('&')) {
            return (Some("Chemicals & gases".to_string()), 0.9);
        }

        for (category, re) in &self.keyword_categories {
            if re.is_match(text) {
                return (Some((*category).to_string()), 0.7);
            }
        }

        (None, 0.0)
    }

    fn guess_item(&self, text: &str) -> (Option<String>, f64) {
        let mut cleaned = MENTION.replace_all(text, "").into_owned();
        cleaned = CONTROL_VERBS.replace_all(&cleaned, "").into_owned();
        cleaned = CATEGORY_TOKENS.replace_all(&cleaned, "").into_owned();
        for (_, re) in &self.projects {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
        cleaned = EXPLICIT_CURRENCY_AMOUNT.replace_all(&cleaned, "").into_owned();
        cleaned = SYMBOL_AMOUNT.replace_all(&cleaned, "").into_owned();
        cleaned = SUFFIX_CURRENCY_AMOUNT.replace_all(&cleaned, "").into_owned();
        cleaned = CURRENCY_TOKEN.replace_all(&cleaned, "").into_owned();
        cleaned = WHITESPACE.replace_all(&cleaned, " ").into_owned();

        let trimmed = cleaned.trim_matches(ITEM_EDGE_CHARS);
        if trimmed.is_empty() {
            return (None, 0.0);
        }
        (Some(trimmed.to_string()), 0.4)
    }
}

impl DraftExtractor for HeuristicExtractor {
    fn extract(&self, raw_text: &str) -> Result<Draft, DraftError> {
        let text = raw_text.trim();
        if text.is_empty() {
            return Err(DraftError::EmptyInput);
        }

        let (project_code, p_conf) = self.find_project(text);
        let (currency, amount, a_conf) = self.find_currency_and_amount(text);
        if let Some(amount) = amount
            && !amount.is_finite()
        {
            return Err(DraftError::Malformed(format!("amount out of range in `{text}`")));
        }
        let (category, c_conf) = self.find_category(text);
        let (item, i_conf) = self.guess_item(text);
        let confidence = p_conf.max(a_conf).max(c_conf).max(i_conf);

        Ok(Draft::new(
            text,
            item,
            amount,
            currency,
            category,
            project_code,
            confidence,
        ))
    }
}
