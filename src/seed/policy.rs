use std::fmt::Debug;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::context::PipelineContext;
use super::variables::Variables;
use crate::error::{CiDagError, Result};

/// What a policy is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub pipeline: &'a PipelineContext,
    pub job_name: &'a str,
    pub variables: &'a Variables,
}

/// One `only`/`except` predicate.
pub trait Policy: Debug {
    /// # Errors
    ///
    /// Returns [`CiDagError::Policy`] when the policy cannot be evaluated,
    /// for example because a ref pattern is not a valid regular expression.
    fn satisfied_by(&self, context: &PolicyContext<'_>) -> Result<bool>;
}

/// An `only:` or `except:` block as written in the job configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    #[serde(default)]
    pub refs: Option<Vec<String>>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
}

impl PolicySpec {
    /// The built-in policies this block describes.
    pub fn policies(&self) -> Vec<Box<dyn Policy>> {
        let mut policies: Vec<Box<dyn Policy>> = Vec::new();
        if let Some(refs) = &self.refs {
            policies.push(Box::new(RefsPolicy::new(refs.clone())));
        }
        if let Some(expressions) = &self.variables {
            policies.push(Box::new(VariablesPolicy::new(expressions.clone())));
        }
        policies
    }
}

/// Matches the pipeline ref, ref kind or source against a list of patterns.
///
/// Each pattern is one of: an exact ref name, a `/regex/flags` literal, the
/// keywords `branches` and `tags`, or a source keyword such as `schedules` or
/// `web`. A trailing `@group/project` restricts the pattern to that project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefsPolicy {
    patterns: Vec<String>,
}

impl RefsPolicy {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    fn matches(&self, entry: &str, context: &PolicyContext<'_>) -> Result<bool> {
        let (pattern, path) = match entry.split_once('@') {
            Some((pattern, path)) => (pattern, Some(path)),
            None => (entry, None),
        };

        if path.is_some_and(|path| path != context.pipeline.project_path) {
            return Ok(false);
        }

        let pipeline = context.pipeline;
        if pipeline.tag && pattern == "tags" {
            return Ok(true);
        }
        if pipeline.is_branch() && pattern == "branches" {
            return Ok(true);
        }

        let source = pipeline.source.keyword();
        if pattern == source || pattern == pluralize(source) {
            return Ok(true);
        }

        if !(pipeline.is_branch() || pipeline.tag) {
            return Ok(false);
        }

        match parse_regex_literal(pattern) {
            Some(literal) => {
                let regex = compile(literal, context.job_name)?;
                Ok(regex.is_match(&pipeline.ref_))
            }
            None => Ok(pattern == pipeline.ref_),
        }
    }
}

impl Policy for RefsPolicy {
    fn satisfied_by(&self, context: &PolicyContext<'_>) -> Result<bool> {
        for pattern in &self.patterns {
            if self.matches(pattern, context)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Satisfied when any of its variable expressions holds.
///
/// Supported forms: `$VAR` (defined and non-empty), `$VAR == "value"`,
/// `$VAR != "value"`, `$VAR == null`, `$VAR != null` and `$VAR =~ /regex/`.
/// Forms can be joined with `&&` and `||`; `&&` binds tighter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariablesPolicy {
    expressions: Vec<String>,
}

impl VariablesPolicy {
    pub fn new(expressions: Vec<String>) -> Self {
        Self { expressions }
    }
}

impl Policy for VariablesPolicy {
    fn satisfied_by(&self, context: &PolicyContext<'_>) -> Result<bool> {
        for expression in &self.expressions {
            if evaluate_condition(expression, context)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Evaluates a variables condition, shared by `only:variables` and `rules:if`.
pub(super) fn evaluate_condition(condition: &str, context: &PolicyContext<'_>) -> Result<bool> {
    for alternative in condition.split("||") {
        let mut holds = true;
        for clause in alternative.split("&&") {
            if !evaluate_expression(clause, context)? {
                holds = false;
                break;
            }
        }
        if holds {
            return Ok(true);
        }
    }
    Ok(false)
}

fn evaluate_expression(expression: &str, context: &PolicyContext<'_>) -> Result<bool> {
    let invalid = || CiDagError::Policy {
        job: context.job_name.to_string(),
        reason: format!("unsupported variables expression `{expression}`"),
    };

    let expression = expression.trim();
    let (variable, rest) = match expression.find(|c: char| c.is_whitespace() || c == '=' || c == '!') {
        Some(position) => (&expression[..position], expression[position..].trim()),
        None => (expression, ""),
    };
    let name = variable.strip_prefix('$').ok_or_else(invalid)?;
    let value = context.variables.get(name);

    if rest.is_empty() {
        return Ok(value.is_some_and(|value| !value.is_empty()));
    }

    let (operator, operand) = ["==", "!=", "=~"]
        .iter()
        .find_map(|operator| rest.strip_prefix(operator).map(|operand| (*operator, operand.trim())))
        .ok_or_else(invalid)?;

    match operator {
        "=~" => {
            let literal = parse_regex_literal(operand).ok_or_else(invalid)?;
            let regex = compile(literal, context.job_name)?;
            Ok(value.is_some_and(|value| regex.is_match(value)))
        }
        _ => {
            let expected = if operand == "null" {
                None
            } else {
                Some(unquote(operand).ok_or_else(invalid)?)
            };
            let equal = value == expected;
            Ok(if operator == "==" { equal } else { !equal })
        }
    }
}

fn unquote(operand: &str) -> Option<&str> {
    operand
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| operand.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')))
}

/// A `/body/flags` literal split into its parts.
struct RegexLiteral<'a> {
    body: &'a str,
    flags: &'a str,
}

fn parse_regex_literal(pattern: &str) -> Option<RegexLiteral<'_>> {
    let inner = pattern.strip_prefix('/')?;
    let end = inner.rfind('/')?;
    Some(RegexLiteral {
        body: &inner[..end],
        flags: &inner[end + 1..],
    })
}

fn compile(literal: RegexLiteral<'_>, job_name: &str) -> Result<Regex> {
    let mut builder = RegexBuilder::new(literal.body);
    for flag in literal.flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(CiDagError::Policy {
                    job: job_name.to_string(),
                    reason: format!("unknown regular expression flag `{other}` in /{}/", literal.body),
                })
            }
        };
    }

    builder.build().map_err(|err| CiDagError::Policy {
        job: job_name.to_string(),
        reason: format!("invalid regular expression /{}/: {err}", literal.body),
    })
}

fn pluralize(word: &str) -> String {
    if ["s", "x", "sh", "ch"].iter().any(|suffix| word.ends_with(suffix)) {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::context::PipelineSource;

    fn evaluate(policy: &dyn Policy, pipeline: &PipelineContext) -> Result<bool> {
        let variables = pipeline.variables();
        policy.satisfied_by(&PolicyContext {
            pipeline,
            job_name: "rspec",
            variables: &variables,
        })
    }

    fn refs(patterns: &[&str]) -> RefsPolicy {
        RefsPolicy::new(patterns.iter().map(ToString::to_string).collect())
    }

    fn branch(ref_: &str) -> PipelineContext {
        PipelineContext::new(ref_, "group/project")
    }

    #[test]
    fn test_exact_ref_names() {
        assert!(evaluate(&refs(&["deploy", "master"]), &branch("master")).unwrap());
        assert!(!evaluate(&refs(&["deploy"]), &branch("master")).unwrap());
    }

    #[test]
    fn test_regex_refs() {
        assert!(evaluate(&refs(&["/^feature-.*$/"]), &branch("feature-login")).unwrap());
        assert!(!evaluate(&refs(&["/^deploy$/"]), &branch("master")).unwrap());
        assert!(evaluate(&refs(&["/^MASTER$/i"]), &branch("master")).unwrap());
    }

    #[test]
    fn test_invalid_regex_is_a_policy_error() {
        let err = evaluate(&refs(&["/^(unclosed$/"]), &branch("master")).unwrap_err();

        assert!(matches!(err, CiDagError::Policy { ref job, .. } if job == "rspec"));
    }

    #[test]
    fn test_branch_and_tag_keywords() {
        let mut tag = branch("v1.0");
        tag.tag = true;

        assert!(evaluate(&refs(&["branches"]), &branch("master")).unwrap());
        assert!(!evaluate(&refs(&["tags"]), &branch("master")).unwrap());
        assert!(evaluate(&refs(&["tags"]), &tag).unwrap());
        assert!(!evaluate(&refs(&["branches"]), &tag).unwrap());
    }

    #[test]
    fn test_source_keywords() {
        let cases = [
            ("pushes", PipelineSource::Push),
            ("web", PipelineSource::Web),
            ("triggers", PipelineSource::Trigger),
            ("schedules", PipelineSource::Schedule),
            ("api", PipelineSource::Api),
            ("external", PipelineSource::External),
            ("merge_requests", PipelineSource::MergeRequestEvent),
        ];

        for (keyword, source) in cases {
            let mut pipeline = branch("deploy");
            pipeline.source = source;
            assert!(evaluate(&refs(&[keyword]), &pipeline).unwrap(), "{keyword}");

            pipeline.source = if source == PipelineSource::Web {
                PipelineSource::Api
            } else {
                PipelineSource::Web
            };
            assert!(!evaluate(&refs(&[keyword]), &pipeline).unwrap(), "{keyword}");
        }
    }

    #[test]
    fn test_project_path_suffix() {
        assert!(evaluate(&refs(&["branches@group/project"]), &branch("master")).unwrap());
        assert!(!evaluate(&refs(&["branches@fork"]), &branch("master")).unwrap());
    }

    #[test]
    fn test_merge_request_pipelines_skip_ref_patterns() {
        let mut pipeline = branch("feature");
        pipeline.source = PipelineSource::MergeRequestEvent;

        assert!(!evaluate(&refs(&["feature"]), &pipeline).unwrap());
    }

    #[test]
    fn test_variables_expressions() {
        let mut pipeline = branch("master");
        pipeline
            .variables
            .insert("DEPLOY".to_string(), "production".to_string());

        let holds = |expression: &str| {
            evaluate(&VariablesPolicy::new(vec![expression.to_string()]), &pipeline).unwrap()
        };

        assert!(holds("$DEPLOY"));
        assert!(!holds("$MISSING"));
        assert!(holds("$DEPLOY == \"production\""));
        assert!(holds("$DEPLOY != 'staging'"));
        assert!(holds("$MISSING == null"));
        assert!(holds("$DEPLOY =~ /^prod/"));
        assert!(holds("$CI_COMMIT_REF_NAME == \"master\""));
    }

    #[test]
    fn test_joined_expressions() {
        let mut pipeline = branch("master");
        pipeline
            .variables
            .insert("DEPLOY".to_string(), "production".to_string());

        let holds = |expression: &str| {
            evaluate(&VariablesPolicy::new(vec![expression.to_string()]), &pipeline).unwrap()
        };

        assert!(holds("$DEPLOY == \"production\" && $MISSING == null"));
        assert!(!holds("$DEPLOY == \"production\" && $MISSING"));
        assert!(holds("$MISSING || $DEPLOY =~ /^prod/"));
        assert!(!holds("$MISSING || $DEPLOY == \"staging\""));
    }

    #[test]
    fn test_unsupported_expression_is_an_error() {
        let policy = VariablesPolicy::new(vec!["DEPLOY == 1".to_string()]);

        assert!(evaluate(&policy, &branch("master")).is_err());
    }

    #[test]
    fn test_policy_spec_builds_policies() {
        let spec: PolicySpec = serde_json::from_value(serde_json::json!({
            "refs": ["main"],
            "variables": ["$DEPLOY"]
        }))
        .unwrap();

        assert_eq!(spec.policies().len(), 2);
        assert!(PolicySpec::default().policies().is_empty());
    }
}
