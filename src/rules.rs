//! Named extraction rules and validated rule sets.
//!
//! A [`RuleSet`] can only be built through [`RuleSet::new`], which compiles
//! every pattern and checks its capture groups, so a malformed rule is caught
//! when the set is loaded and never in the middle of a batch.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RuleError;

/// Serialized form of a single rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleConfig {
    /// Field label the captured value is stored under (e.g. "Invoice Number").
    pub name: String,
    /// Pattern with exactly one capture group for the value.
    pub pattern: String,
}

impl RuleConfig {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Serialized form of a rule set, as stored in `rules/*.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSetConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rules: Vec<RuleConfig>,
}

/// A compiled rule. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    name: String,
    pattern: String,
    regex: Regex,
}

impl ExtractionRule {
    /// Compile a rule, rejecting patterns without exactly one capture group.
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self, RuleError> {
        let name = name.into();
        let pattern = pattern.into();

        if name.trim().is_empty() {
            return Err(RuleError::EmptyName);
        }

        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| RuleError::InvalidPattern {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        // captures_len counts the implicit whole-match group
        let groups = regex.captures_len() - 1;
        if groups != 1 {
            return Err(RuleError::CaptureGroups {
                name,
                found: groups,
            });
        }

        Ok(Self {
            name,
            pattern,
            regex,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Text of the capture group in the leftmost match, if any.
    pub fn capture<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex
            .captures(text)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str())
    }
}

/// An ordered, validated set of extraction rules with unique names.
#[derive(Debug, Clone)]
pub struct RuleSet {
    name: String,
    description: Option<String>,
    rules: Vec<ExtractionRule>,
}

impl RuleSet {
    /// Compile and validate a rule set from its serialized form.
    pub fn new(config: RuleSetConfig) -> Result<Self, RuleError> {
        if config.rules.is_empty() {
            return Err(RuleError::EmptySet(config.name));
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in config.rules {
            if !seen.insert(rule.name.clone()) {
                return Err(RuleError::DuplicateName(rule.name));
            }
            rules.push(ExtractionRule::new(rule.name, rule.pattern)?);
        }

        debug!("Compiled rule set '{}' with {} rules", config.name, rules.len());

        Ok(Self {
            name: config.name,
            description: config.description,
            rules,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Serialized form, for listing over HTTP.
    pub fn to_config(&self) -> RuleSetConfig {
        RuleSetConfig {
            name: self.name.clone(),
            description: self.description.clone(),
            rules: self
                .rules
                .iter()
                .map(|r| RuleConfig::new(r.name(), r.pattern()))
                .collect(),
        }
    }
}

const INVOICE_RULES: &str = include_str!("../rules/invoice.json");
const PURCHASE_REQUEST_RULES: &str = include_str!("../rules/purchase_request.json");

/// Rule sets compiled into the binary, used when no rules directory exists.
pub fn builtin_rule_sets() -> anyhow::Result<Vec<RuleSet>> {
    [INVOICE_RULES, PURCHASE_REQUEST_RULES]
        .iter()
        .map(|raw| -> anyhow::Result<RuleSet> {
            let config: RuleSetConfig = serde_json::from_str(raw)?;
            Ok(RuleSet::new(config)?)
        })
        .collect()
}
