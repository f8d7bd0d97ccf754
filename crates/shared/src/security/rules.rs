use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid detection pattern for {category}: {source}")]
    InvalidPattern {
        category: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// Declarative form of a detection rule; compiled into a [`RuleSet`].
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    pub category: &'static str,
    pub pattern: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub category: &'static str,
    pub fragment: String,
}

#[derive(Debug, Clone)]
struct DetectionRule {
    category: &'static str,
    regex: Regex,
}

/// Ordered, case-insensitive detection rules. Evaluation order is the order
/// the specs were supplied in.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<DetectionRule>,
}

impl RuleSet {
    pub fn compile(specs: &[RuleSpec]) -> Result<Self, RuleError> {
        let rules = specs
            .iter()
            .map(|spec| {
                RegexBuilder::new(spec.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| DetectionRule {
                        category: spec.category,
                        regex,
                    })
                    .map_err(|source| RuleError::InvalidPattern {
                        category: spec.category,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    pub fn first_match(&self, text: &str) -> Option<RuleMatch> {
        self.rules.iter().find_map(|rule| {
            rule.regex.find(text).map(|found| RuleMatch {
                category: rule.category,
                fragment: found.as_str().to_string(),
            })
        })
    }

    /// Every rule that fires, one entry per rule, in rule order.
    pub fn all_matches(&self, text: &str) -> Vec<RuleMatch> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.regex.find(text).map(|found| RuleMatch {
                    category: rule.category,
                    fragment: found.as_str().to_string(),
                })
            })
            .collect()
    }
}
