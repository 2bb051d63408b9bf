use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::policy::{evaluate_condition, PolicyContext};
use super::variables::Variables;
use crate::error::Result;

/// When a job runs, as decided by the rule that matched it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleWhen {
    #[default]
    OnSuccess,
    OnFailure,
    Always,
    Manual,
    Delayed,
    Never,
}

impl RuleWhen {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnSuccess => "on_success",
            Self::OnFailure => "on_failure",
            Self::Always => "always",
            Self::Manual => "manual",
            Self::Delayed => "delayed",
            Self::Never => "never",
        }
    }
}

/// One entry of a job's `rules:`.
///
/// A rule matches when every clause it declares holds; a rule without
/// clauses always matches. `changes:` has no diff to compare against here,
/// so it always holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    #[serde(rename = "if", default)]
    pub if_: Option<String>,
    #[serde(default)]
    pub changes: Option<Value>,
    #[serde(default)]
    pub when: Option<RuleWhen>,
    #[serde(default)]
    pub start_in: Option<String>,
    #[serde(default)]
    pub allow_failure: Option<bool>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl Rule {
    fn matches(&self, context: &PolicyContext<'_>) -> Result<bool> {
        if let Some(condition) = &self.if_ {
            if !evaluate_condition(condition, context)? {
                return Ok(false);
            }
        }
        if self.changes.is_some() {
            debug!("No changeset for '{}', treating changes as matched", context.job_name);
        }
        Ok(true)
    }
}

/// What the first matching rule contributes to a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub when: RuleWhen,
    pub start_in: Option<String>,
    pub allow_failure: Option<bool>,
    pub variables: Variables,
}

impl RuleOutcome {
    fn excluded() -> Self {
        Self {
            when: RuleWhen::Never,
            ..Self::default()
        }
    }

    pub fn included(&self) -> bool {
        self.when != RuleWhen::Never
    }
}

/// Picks the first matching rule. No match excludes the build.
pub fn evaluate_rules(rules: &[Rule], context: &PolicyContext<'_>) -> Result<RuleOutcome> {
    for rule in rules {
        if !rule.matches(context)? {
            continue;
        }
        return Ok(RuleOutcome {
            when: rule.when.unwrap_or_default(),
            start_in: rule.start_in.clone(),
            allow_failure: rule.allow_failure,
            variables: rule
                .variables
                .iter()
                .map(|(key, value)| (key.clone(), value_text(value)))
                .collect(),
        });
    }
    Ok(RuleOutcome::excluded())
}

pub(super) fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
