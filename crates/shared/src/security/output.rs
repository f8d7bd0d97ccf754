use super::rules::{RuleError, RuleSet, RuleSpec};

pub const OUTPUT_REFUSAL_MESSAGE: &str =
    "I apologize, but I cannot provide that response. Please rephrase your question.";

pub const SYSTEM_PROMPT_LEAKAGE: &str = "system_prompt_leakage";

const MIN_LEAKAGE_CLAUSE_WORDS: usize = 5;
const DEFAULT_SCREEN_WINDOW_CHARS: usize = 256;

pub const OUTPUT_RULES: &[RuleSpec] = &[
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"(my|the)\s+(system\s+)?(prompt|instruction|directive|guideline|rule)s?\s+(is|are|says?|states?|tells?)",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"according\s+to\s+(my\s+)?(system\s+)?(prompt|instruction|directive)",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"I\s+(was|am|have\s+been)\s+(programmed|instructed|configured|designed|told)\s+to",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"(here\s+(is|are)|these\s+are)\s+(my\s+)?(internal\s+)?(instruction|directive|rule|guideline|system\s+prompt)",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"as\s+an\s+AI\s+(language\s+)?model\s+(created|developed|built|made)\s+by",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"I'?m\s+(running|using|based\s+on|powered\s+by)\s+(GPT|Claude|LLaMA|Mistral|OpenAI)",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"\bmy\s+underlying\s+(model|architecture|system)",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"that\s+(would\s+)?violates?\s+my\s+(programming|guidelines|instructions)",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"ignore\s+(previous|all|prior)\s+(instruction|directive|prompt)",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"(let\s+me\s+)?show\s+you\s+(my\s+)?(internal|system|hidden)\s+(prompt|instructions?|rules?|configuration)",
    },
    RuleSpec {
        category: "system_prompt_revelation",
        pattern: r"(here'?s|this\s+is)\s+(what|how)\s+I'?m\s+(actually\s+)?(programmed|configured|set\s+up)",
    },
    RuleSpec {
        category: "character_break",
        pattern: r"I\s+(will\s+now|am\s+now)\s+(stop|exit|leave|break|end)\s+(the\s+)?(role|character|persona|act)",
    },
    RuleSpec {
        category: "character_break",
        pattern: r"dropping\s+(the\s+)?(act|character|role|persona)",
    },
    RuleSpec {
        category: "character_break",
        pattern: r"speaking\s+as\s+(my\s+)?real\s+self",
    },
    RuleSpec {
        category: "character_break",
        pattern: r"\[\s*system\s*(message|response|output)\s*\]",
    },
    RuleSpec {
        category: "character_break",
        pattern: r"\[\s*(DEBUG|INTERNAL)\s*\]",
    },
    RuleSpec {
        category: "character_break",
        pattern: r"new\s+(instruction|directive|rule|mode)\s+(activated|enabled|received)",
    },
    RuleSpec {
        category: "jailbreak_success",
        pattern: r"developer\s+mode\s+(activated|enabled|on)",
    },
    RuleSpec {
        category: "jailbreak_success",
        pattern: r"(?-i:\bDAN\b)\s+mode",
    },
    RuleSpec {
        category: "jailbreak_success",
        pattern: r"jailbreak\s+(successful|complete|activated)",
    },
    RuleSpec {
        category: "jailbreak_success",
        pattern: r"restrictions?\s+(removed|disabled|bypassed|lifted)",
    },
    RuleSpec {
        category: "jailbreak_success",
        pattern: r"safety\s+(features?\s+)?(disabled|off|removed|bypassed)",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputVerdict {
    Safe(String),
    Blocked {
        replacement: String,
        violations: Vec<String>,
    },
}

impl OutputVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe(_))
    }
}

/// Classifier seam for model-generated text.
pub trait OutputScreen: Send + Sync {
    fn screen(&self, output: &str) -> OutputVerdict;

    /// Trailing characters of already-screened text that incremental
    /// screening must re-examine alongside each new fragment.
    fn window_chars(&self) -> usize {
        DEFAULT_SCREEN_WINDOW_CHARS
    }
}

pub struct OutputValidator {
    rules: RuleSet,
    prompt_clauses: Vec<String>,
}

impl OutputValidator {
    /// `system_prompt` is the prompt currently in force, if any; its longer
    /// clauses are checked for verbatim reproduction.
    pub fn with_default_rules(system_prompt: Option<&str>) -> Result<Self, RuleError> {
        Self::with_rules(OUTPUT_RULES, system_prompt)
    }

    pub fn with_rules(specs: &[RuleSpec], system_prompt: Option<&str>) -> Result<Self, RuleError> {
        Ok(Self {
            rules: RuleSet::compile(specs)?,
            prompt_clauses: system_prompt.map(leakage_clauses).unwrap_or_default(),
        })
    }

    fn leaks_system_prompt(&self, output: &str) -> bool {
        if self.prompt_clauses.is_empty() {
            return false;
        }
        let lowered = output.to_lowercase();
        self.prompt_clauses
            .iter()
            .any(|clause| lowered.contains(clause.as_str()))
    }
}

impl OutputScreen for OutputValidator {
    fn window_chars(&self) -> usize {
        let longest_clause = self
            .prompt_clauses
            .iter()
            .map(|clause| clause.chars().count())
            .max()
            .unwrap_or(0);
        DEFAULT_SCREEN_WINDOW_CHARS.max(longest_clause)
    }

    fn screen(&self, output: &str) -> OutputVerdict {
        if output.trim().is_empty() {
            return OutputVerdict::Safe(output.to_string());
        }

        let mut violations = Vec::new();
        for found in self.rules.all_matches(output) {
            if !violations.iter().any(|seen| seen == found.category) {
                violations.push(found.category.to_string());
            }
        }
        if self.leaks_system_prompt(output) {
            violations.push(SYSTEM_PROMPT_LEAKAGE.to_string());
        }

        if violations.is_empty() {
            OutputVerdict::Safe(output.to_string())
        } else {
            OutputVerdict::Blocked {
                replacement: OUTPUT_REFUSAL_MESSAGE.to_string(),
                violations,
            }
        }
    }
}

fn leakage_clauses(system_prompt: &str) -> Vec<String> {
    system_prompt
        .to_lowercase()
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|clause| clause.split_whitespace().count() >= MIN_LEAKAGE_CLAUSE_WORDS)
        .map(ToString::to_string)
        .collect()
}
