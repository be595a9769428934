//! Missing-information detection
//!
//! Heurístico por diseño: una tabla fija de pares (trigger, required). Si
//! el trigger aparece y el required no, falta esa categoría de información.
//! Lives behind [`MissingInfoDetector`] so a classifier can replace it.

use super::response::ClarificationQuestion;
use crate::cases::SimilarCase;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Words below which a query counts as short
pub const SHORT_QUERY_WORDS: usize = 10;

/// Average component count above which similar cases count as complex
pub const COMPLEX_CASE_COMPONENTS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoCategory {
    DataSource,
    OutputFormat,
    IntegrationTarget,
    Schedule,
    Requirements,
}

impl InfoCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoCategory::DataSource => "data_source",
            InfoCategory::OutputFormat => "output_format",
            InfoCategory::IntegrationTarget => "integration_target",
            InfoCategory::Schedule => "schedule",
            InfoCategory::Requirements => "requirements",
        }
    }

    pub fn question(&self) -> ClarificationQuestion {
        let (question, examples): (&str, &[&str]) = match self {
            InfoCategory::DataSource => (
                "Where does the data come from?",
                &["PDF or CSV files", "a SQL database", "a website or API"],
            ),
            InfoCategory::OutputFormat => (
                "What format should the result have?",
                &["JSON", "a markdown report", "a chart"],
            ),
            InfoCategory::IntegrationTarget => (
                "Which system should receive the result?",
                &["Slack", "email", "a webhook"],
            ),
            InfoCategory::Schedule => (
                "How often should this run?",
                &["every hour", "daily at 9am", "weekly on Monday"],
            ),
            InfoCategory::Requirements => (
                "Can you describe the requirements in more detail?",
                &["inputs and expected outputs", "tools it may use", "quality or cost limits"],
            ),
        };
        ClarificationQuestion {
            category: *self,
            question: question.to_string(),
            examples: examples.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl fmt::Display for InfoCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait MissingInfoDetector: Send + Sync {
    /// Categories of information the query lacks, without duplicates
    fn detect(&self, query: &str, similar: &[SimilarCase]) -> anyhow::Result<Vec<InfoCategory>>;
}

struct Rule {
    category: InfoCategory,
    trigger: Regex,
    required: Regex,
}

const BUILTIN_RULES: &[(InfoCategory, &str, &str)] = &[
    (
        InfoCategory::DataSource,
        r"(?i)\b(analy[sz]\w*|extract\w*|summari[sz]\w*|process\w*|pars\w+|classif\w*|aggregat\w*)\b",
        r"(?i)\b(files?|pdfs?|csvs?|excel|spreadsheets?|databases?|db|sql|tables?|documents?|docs|urls?|websites?|web|apis?|json|e-?mails?|inbox|folders?|datasets?|s3|buckets?|logs?|feeds?)\b",
    ),
    (
        InfoCategory::OutputFormat,
        r"(?i)\b(reports?|export\w*|dashboards?)\b",
        r"(?i)\b(json|csv|pdf|markdown|html|tables?|charts?|excel|slides|text)\b",
    ),
    (
        InfoCategory::IntegrationTarget,
        r"(?i)\b(send\w*|notif\w*|publish\w*|sync\w*|upload\w*|alert\w*)\b",
        r"(?i)\b(slack|e-?mail|teams|discord|webhooks?|api|crm|jira|github|sms|telegram|channel)\b",
    ),
    (
        InfoCategory::Schedule,
        r"(?i)\b(schedul\w*|recurring|periodic\w*|regularly|automat\w*|monitor\w*)\b",
        r"(?i)\b(hourly|daily|weekly|monthly|every|each|cron|nightly|(at|on) \w+)\b",
    ),
];

pub struct RegexMissingInfoDetector {
    rules: Vec<Rule>,
}

impl RegexMissingInfoDetector {
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_rules(BUILTIN_RULES)
    }

    pub fn with_rules(rules: &[(InfoCategory, &str, &str)]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(category, trigger, required)| {
                Ok(Rule {
                    category: *category,
                    trigger: Regex::new(trigger)?,
                    required: Regex::new(required)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    fn needs_requirements(query: &str, similar: &[SimilarCase]) -> bool {
        if similar.is_empty() || query.split_whitespace().count() >= SHORT_QUERY_WORDS {
            return false;
        }
        let total: usize = similar.iter().map(|c| c.use_case.components.len()).sum();
        let average = total as f64 / similar.len() as f64;
        average > COMPLEX_CASE_COMPONENTS
    }
}

impl MissingInfoDetector for RegexMissingInfoDetector {
    fn detect(&self, query: &str, similar: &[SimilarCase]) -> anyhow::Result<Vec<InfoCategory>> {
        let mut missing: Vec<InfoCategory> = Vec::new();
        for rule in &self.rules {
            if rule.trigger.is_match(query)
                && !rule.required.is_match(query)
                && !missing.contains(&rule.category)
            {
                missing.push(rule.category);
            }
        }

        if Self::needs_requirements(query, similar) && !missing.contains(&InfoCategory::Requirements) {
            missing.push(InfoCategory::Requirements);
        }
        Ok(missing)
    }
}
