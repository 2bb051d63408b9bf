use std::cell::OnceCell;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::context::SeedContext;
use super::environment::{resolve_environment, DeploymentSeed, EnvironmentSeed, EnvironmentSpec};
use super::policy::{Policy, PolicyContext, PolicySpec};
use super::rules::{evaluate_rules, value_text, Rule, RuleOutcome};
use super::variables::Variables;
use crate::error::{CiDagError, Result};

/// One entry of a job's `needs_attributes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedAttributes {
    pub name: String,
    #[serde(default)]
    pub optional: bool,
}

/// A build ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildResource {
    pub name: String,
    pub stage: String,
    pub stage_idx: usize,
    pub attributes: Map<String, Value>,
    /// Triggers a downstream pipeline instead of running a script.
    pub bridge: bool,
    pub resource_group: Option<String>,
    pub environment: Option<EnvironmentSeed>,
    pub deployment: Option<DeploymentSeed>,
}

/// A prospective job whose inclusion has not been decided yet.
///
/// Inclusion, merged attributes, variables and the resource are computed on
/// first use and cached for the life of the seed.
#[derive(Debug)]
pub struct BuildSeed<'a> {
    context: &'a SeedContext,
    name: String,
    stage: String,
    stage_idx: usize,
    attributes: Map<String, Value>,
    needs: Option<Vec<NeedAttributes>>,
    rules: Option<Vec<Rule>>,
    only: Vec<Box<dyn Policy>>,
    except: Vec<Box<dyn Policy>>,
    outcome: OnceCell<Option<RuleOutcome>>,
    merged: OnceCell<Map<String, Value>>,
    variables: OnceCell<Variables>,
    included: OnceCell<bool>,
    resource: OnceCell<BuildResource>,
}

impl<'a> BuildSeed<'a> {
    /// Creates a seed from raw job attributes.
    ///
    /// `only`, `except`, `rules` and `needs_attributes` are taken out of the
    /// attributes; everything else is carried through to the resource untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CiDagError::Policy`] when any of those keys has an
    /// unexpected shape.
    pub fn new(
        context: &'a SeedContext,
        mut attributes: Map<String, Value>,
        stage: &str,
        stage_idx: usize,
    ) -> Result<Self> {
        let name = attributes
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let only = take_policy(&mut attributes, "only", &name)?;
        let except = take_policy(&mut attributes, "except", &name)?;
        let needs = attributes
            .remove("needs_attributes")
            .map(serde_json::from_value::<Vec<NeedAttributes>>)
            .transpose()
            .map_err(|err| CiDagError::Policy {
                job: name.clone(),
                reason: format!("malformed needs: {err}"),
            })?;
        let rules = attributes
            .remove("rules")
            .map(serde_json::from_value::<Vec<Rule>>)
            .transpose()
            .map_err(|err| CiDagError::Policy {
                job: name.clone(),
                reason: format!("malformed rules: {err}"),
            })?;

        Ok(Self {
            context,
            name,
            stage: stage.to_string(),
            stage_idx,
            attributes,
            needs,
            rules,
            only: only.map(|spec| spec.policies()).unwrap_or_default(),
            except: except.map(|spec| spec.policies()).unwrap_or_default(),
            outcome: OnceCell::new(),
            merged: OnceCell::new(),
            variables: OnceCell::new(),
            included: OnceCell::new(),
            resource: OnceCell::new(),
        })
    }

    /// Adds an `only` policy that must be satisfied for inclusion.
    #[must_use]
    pub fn with_only_policy(mut self, policy: Box<dyn Policy>) -> Self {
        self.only.push(policy);
        self
    }

    /// Adds an `except` policy that excludes the build when satisfied.
    #[must_use]
    pub fn with_except_policy(mut self, policy: Box<dyn Policy>) -> Self {
        self.except.push(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn needs(&self) -> &[NeedAttributes] {
        self.needs.as_deref().unwrap_or_default()
    }

    /// Own attributes merged with pipeline-derived fields and, when the job
    /// has `rules`, with what the matching rule decided.
    pub fn attributes(&self) -> Result<&Map<String, Value>> {
        if let Some(merged) = self.merged.get() {
            return Ok(merged);
        }
        let outcome = self.rule_outcome()?;
        Ok(self.merged.get_or_init(|| self.merge_attributes(outcome)))
    }

    fn merge_attributes(&self, outcome: Option<&RuleOutcome>) -> Map<String, Value> {
        let pipeline = &self.context.pipeline;
        let mut merged = self.attributes.clone();

        merged.insert("name".to_string(), Value::from(self.name.clone()));
        merged.insert("stage".to_string(), Value::from(self.stage.clone()));
        merged.insert("stage_idx".to_string(), Value::from(self.stage_idx));
        merged.insert("ref".to_string(), Value::from(pipeline.ref_.clone()));
        merged.insert("tag".to_string(), Value::from(pipeline.tag));
        merged.insert("protected".to_string(), Value::from(pipeline.protected));
        merged.insert(
            "project".to_string(),
            Value::from(pipeline.project_path.clone()),
        );
        merged.insert(
            "pipeline".to_string(),
            serde_json::json!({
                "ref": pipeline.ref_,
                "sha": pipeline.sha,
                "source": pipeline.source.as_str(),
            }),
        );
        if let Some(outcome) = outcome {
            apply_rule_outcome(&mut merged, outcome, &self.attributes);
        }
        merged
            .entry("when")
            .or_insert_with(|| Value::from("on_success"));
        let scheduling_type = if self.needs.is_some() { "dag" } else { "stage" };
        merged
            .entry("scheduling_type")
            .or_insert_with(|| Value::from(scheduling_type));

        merged
    }

    /// Pipeline variables, then job variables, then `CI_JOB_NAME`/`CI_JOB_STAGE`.
    pub fn variables(&self) -> &Variables {
        self.variables.get_or_init(|| {
            let mut variables = self.context.pipeline.variables();
            variables.extend(&job_variables(&self.attributes));
            variables.insert("CI_JOB_NAME", self.name.clone());
            variables.insert("CI_JOB_STAGE", self.stage.clone());
            variables
        })
    }

    /// Whether the build belongs in the pipeline.
    ///
    /// A job with `rules` is decided by its first matching rule alone.
    /// Otherwise all `only` policies must hold and no `except` policy may
    /// hold. The answer is computed once; a failed evaluation is not cached.
    pub fn included(&self) -> Result<bool> {
        if let Some(&included) = self.included.get() {
            return Ok(included);
        }

        let included = self.evaluate_policies()?;
        debug!(
            "Build '{}' is {}",
            self.name,
            if included { "included" } else { "excluded" }
        );
        Ok(*self.included.get_or_init(|| included))
    }

    /// The first matching rule's outcome, or `None` for jobs without `rules`.
    pub fn rule_outcome(&self) -> Result<Option<&RuleOutcome>> {
        if let Some(outcome) = self.outcome.get() {
            return Ok(outcome.as_ref());
        }
        let outcome = match &self.rules {
            Some(rules) => Some(evaluate_rules(rules, &self.policy_context())?),
            None => None,
        };
        Ok(self.outcome.get_or_init(|| outcome).as_ref())
    }

    fn policy_context(&self) -> PolicyContext<'_> {
        PolicyContext {
            pipeline: &self.context.pipeline,
            job_name: &self.name,
            variables: self.variables(),
        }
    }

    fn evaluate_policies(&self) -> Result<bool> {
        if let Some(outcome) = self.rule_outcome()? {
            return Ok(outcome.included());
        }

        let context = self.policy_context();

        for policy in &self.only {
            if !policy.satisfied_by(&context)? {
                return Ok(false);
            }
        }
        for policy in &self.except {
            if policy.satisfied_by(&context)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Configuration errors of an included build.
    ///
    /// `available` holds the names of builds this one may need: included
    /// builds of previous stages, plus those of its own stage when same-stage
    /// needs are enabled. Excluded builds report no errors.
    pub fn errors(&self, available: &[&str]) -> Result<Vec<String>> {
        if !self.included()? {
            return Ok(vec![]);
        }

        let mut errors = self.needs_errors(available);
        if let Some(cycle) = self.variables().reference_cycle() {
            errors.push(format!(
                "{}: circular variable reference detected: {cycle:?}",
                self.name
            ));
        }
        Ok(errors)
    }

    fn needs_errors(&self, available: &[&str]) -> Vec<String> {
        let Some(needs) = &self.needs else {
            return vec![];
        };

        let limit = self.context.config.needs_size_limit;
        if needs.len() > limit {
            return vec![format!(
                "{}: one job can only need {limit} others, but you have listed {}. See needs keyword documentation for more details",
                self.name,
                needs.len()
            )];
        }

        needs
            .iter()
            .filter(|need| !need.optional && !available.contains(&need.name.as_str()))
            .map(|need| {
                format!(
                    "'{}' job needs '{}' job, but '{}' is not in any previous stage",
                    self.name, need.name, need.name
                )
            })
            .collect()
    }

    /// The persistable build. Only valid for included builds.
    ///
    /// A declared environment is expanded and validated; an invalid one is
    /// dropped and the build becomes a plain job. Starting an environment
    /// also yields a deployment.
    ///
    /// # Errors
    ///
    /// Returns [`CiDagError::ExcludedBuild`] for excluded builds and
    /// propagates policy evaluation errors.
    pub fn to_resource(&self) -> Result<&BuildResource> {
        if let Some(resource) = self.resource.get() {
            return Ok(resource);
        }
        if !self.included()? {
            return Err(CiDagError::ExcludedBuild(self.name.clone()));
        }

        let attributes = self.attributes()?.clone();
        let mut variables = self.variables().clone();
        if let Some(outcome) = self.rule_outcome()? {
            variables.extend(&outcome.variables);
        }

        Ok(self
            .resource
            .get_or_init(|| self.build_resource(attributes, &variables)))
    }

    /// Whether the job triggers a downstream pipeline.
    pub fn bridge(&self) -> bool {
        let options = self.attributes.get("options");
        let present = |value: Option<&Value>| match value {
            Some(Value::String(text)) => !text.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            _ => false,
        };

        present(options.and_then(|options| options.get("trigger")))
            || present(
                options
                    .and_then(|options| options.get("bridge_needs"))
                    .and_then(|needs| needs.get("pipeline")),
            )
    }

    fn build_resource(
        &self,
        mut attributes: Map<String, Value>,
        variables: &Variables,
    ) -> BuildResource {
        let pipeline = &self.context.pipeline;

        let environment = EnvironmentSpec::from_attributes(&attributes).and_then(|spec| {
            resolve_environment(&spec, variables, &self.name, &pipeline.project_path)
        });
        let resource_group = attributes
            .get("resource_group_key")
            .and_then(Value::as_str)
            .map(|key| variables.expand(key))
            .filter(|key| !key.is_empty());

        match &environment {
            Some(environment) => {
                attributes.insert(
                    "expanded_environment_name".to_string(),
                    Value::from(environment.name.clone()),
                );
            }
            None => {
                attributes.remove("environment");
            }
        }

        let deployment = environment
            .as_ref()
            .filter(|environment| environment.action.deploys())
            .map(|environment| DeploymentSeed {
                environment: environment.name.clone(),
                deployable: self.name.clone(),
                ref_: pipeline.ref_.clone(),
                sha: pipeline.sha.clone(),
                tag: pipeline.tag,
                status: "created".to_string(),
            });

        BuildResource {
            name: self.name.clone(),
            stage: self.stage.clone(),
            stage_idx: self.stage_idx,
            attributes,
            bridge: self.bridge(),
            resource_group,
            environment,
            deployment,
        }
    }
}

fn take_policy(
    attributes: &mut Map<String, Value>,
    key: &str,
    job: &str,
) -> Result<Option<PolicySpec>> {
    attributes
        .remove(key)
        .map(serde_json::from_value::<PolicySpec>)
        .transpose()
        .map_err(|err| CiDagError::Policy {
            job: job.to_string(),
            reason: format!("malformed {key} policy: {err}"),
        })
}

/// Folds a matched rule into the merged attributes. Rule variables override
/// job variables and are written back as `yaml_variables`.
fn apply_rule_outcome(
    merged: &mut Map<String, Value>,
    outcome: &RuleOutcome,
    own: &Map<String, Value>,
) {
    merged.insert("when".to_string(), Value::from(outcome.when.as_str()));

    if let Some(start_in) = &outcome.start_in {
        insert_option(merged, "start_in", Value::from(start_in.clone()));
    }
    if let Some(allow_failure) = outcome.allow_failure {
        merged.insert("allow_failure".to_string(), Value::from(allow_failure));
        insert_option(merged, "allow_failure_criteria", Value::Null);
    }
    if !outcome.variables.is_empty() {
        let mut variables = job_variables(own);
        variables.extend(&outcome.variables);
        let entries = variables
            .iter()
            .map(|(key, value)| serde_json::json!({ "key": key, "value": value, "public": true }))
            .collect();
        merged.remove("variables");
        merged.insert("yaml_variables".to_string(), Value::Array(entries));
    }
}

fn insert_option(merged: &mut Map<String, Value>, key: &str, value: Value) {
    match merged
        .entry("options")
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(options) => {
            options.insert(key.to_string(), value);
        }
        other => *other = serde_json::json!({ key: value }),
    }
}

/// Job-level `variables`, given either as a map or as `[{ key, value }]`.
fn job_variables(attributes: &Map<String, Value>) -> Variables {
    match attributes.get("variables").or_else(|| attributes.get("yaml_variables")) {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| (key.clone(), value_text(value)))
            .collect(),
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| {
                let key = entry.get("key")?.as_str()?;
                Some((key.to_string(), entry.get("value").map(value_text).unwrap_or_default()))
            })
            .collect(),
        _ => Variables::new(),
    }
}
