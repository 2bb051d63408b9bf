use std::cell::Cell;
use std::rc::Rc;

use serde_json::{json, Map, Value};

use super::*;
use crate::config::SeedConfig;
use crate::error::{CiDagError, Result};

fn context(ref_: &str) -> SeedContext {
    SeedContext::new(PipelineContext::new(ref_, "group/project"), SeedConfig::default())
}

fn stages(value: Value) -> Vec<StageAttributes> {
    serde_json::from_value(value).unwrap()
}

fn attributes(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[derive(Debug)]
struct CountingPolicy {
    calls: Rc<Cell<usize>>,
    result: bool,
}

impl Policy for CountingPolicy {
    fn satisfied_by(&self, _context: &PolicyContext<'_>) -> Result<bool> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.result)
    }
}

mod inclusion_tests {
    use super::*;

    #[test]
    fn test_only_refs_filters_builds() {
        let context = context("main");
        let seed = PipelineSeed::new(
            &context,
            stages(json!([
                { "name": "test", "builds": [
                    { "name": "rspec", "only": { "refs": ["main"] } },
                    { "name": "staging_smoke", "only": { "refs": ["staging"] } }
                ] }
            ])),
        )
        .unwrap();

        let stage = &seed.stage_seeds()[0];
        assert!(stage.included().unwrap());
        assert_eq!(stage.seeds().unwrap().len(), 1);
        assert_eq!(stage.seeds_names().unwrap(), vec!["rspec"]);

        let resources = seed.stages().unwrap();
        assert_eq!(resources.len(), 1);
        let names: Vec<&str> = resources[0].builds.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["rspec"]);
        assert_eq!(seed.size().unwrap(), 1);
        assert_eq!(seed.errors().unwrap(), None);
    }

    #[test]
    fn test_except_refs_excludes_build() {
        let context = context("main");
        let build = BuildSeed::new(
            &context,
            attributes(json!({ "name": "deploy", "except": { "refs": ["main"] } })),
            "deploy",
            0,
        )
        .unwrap();

        assert!(!build.included().unwrap());
        assert!(matches!(
            build.to_resource(),
            Err(CiDagError::ExcludedBuild(ref name)) if name == "deploy"
        ));
    }

    #[test]
    fn test_all_only_policies_must_hold() {
        let mut pipeline = PipelineContext::new("main", "group/project");
        pipeline.variables.insert("DEPLOY".to_string(), "no".to_string());
        let context = SeedContext::new(pipeline, SeedConfig::default());

        let build = BuildSeed::new(
            &context,
            attributes(json!({
                "name": "deploy",
                "only": { "refs": ["main"], "variables": ["$DEPLOY == \"yes\""] }
            })),
            "deploy",
            0,
        )
        .unwrap();

        assert!(!build.included().unwrap());
    }

    #[test]
    fn test_inclusion_is_evaluated_once() {
        let context = context("main");
        let calls = Rc::new(Cell::new(0));
        let build = BuildSeed::new(&context, attributes(json!({ "name": "rspec" })), "test", 0)
            .unwrap()
            .with_only_policy(Box::new(CountingPolicy {
                calls: Rc::clone(&calls),
                result: true,
            }));

        assert!(build.included().unwrap());
        assert!(build.included().unwrap());
        assert!(build.to_resource().is_ok());
        assert!(build.errors(&[]).unwrap().is_empty());

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_excluded_decision_is_also_cached() {
        let context = context("main");
        let calls = Rc::new(Cell::new(0));
        let build = BuildSeed::new(&context, attributes(json!({ "name": "rspec" })), "test", 0)
            .unwrap()
            .with_except_policy(Box::new(CountingPolicy {
                calls: Rc::clone(&calls),
                result: true,
            }));
        let stage = StageSeed::from_builds("test", 0, vec![build]);

        assert!(!stage.included().unwrap());
        assert!(!stage.included().unwrap());
        assert_eq!(stage.size().unwrap(), 0);

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_stage_without_included_builds_is_skipped() {
        let context = context("main");
        let seed = PipelineSeed::new(
            &context,
            stages(json!([
                { "name": "build", "builds": [{ "name": "compile" }] },
                { "name": "review", "builds": [{ "name": "review_app", "only": { "refs": ["tags"] } }] },
                { "name": "test", "builds": [{ "name": "rspec" }, { "name": "lint" }] }
            ])),
        )
        .unwrap();

        let resources = seed.stages().unwrap();

        let names: Vec<&str> = resources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["build", "test"]);
        assert_eq!(resources[1].position, 2);
        assert_eq!(seed.stage_seeds().len(), 3);
        assert_eq!(seed.size().unwrap(), 3);
    }

    #[test]
    fn test_invalid_regex_propagates() {
        let context = context("main");
        let seed = PipelineSeed::new(
            &context,
            stages(json!([
                { "name": "test", "builds": [{ "name": "rspec", "only": { "refs": ["/(unclosed/"] } }] }
            ])),
        )
        .unwrap();

        assert!(matches!(seed.stages(), Err(CiDagError::Policy { .. })));
        assert!(seed.size().is_err());
    }

    #[test]
    fn test_malformed_policy_is_rejected() {
        let context = context("main");
        let err = PipelineSeed::new(
            &context,
            stages(json!([
                { "name": "test", "builds": [{ "name": "rspec", "only": "main" }] }
            ])),
        )
        .unwrap_err();

        assert!(matches!(err, CiDagError::Policy { ref job, .. } if job == "rspec"));
    }
}

mod attributes_tests {
    use super::*;

    #[test]
    fn test_pipeline_fields_are_merged() {
        let mut pipeline = PipelineContext::new("main", "group/project");
        pipeline.protected = true;
        pipeline.sha = Some("abc123".to_string());
        let context = SeedContext::new(pipeline, SeedConfig::default());

        let build = BuildSeed::new(
            &context,
            attributes(json!({ "name": "rspec", "script": ["bundle exec rspec"] })),
            "test",
            1,
        )
        .unwrap();
        let merged = build.attributes().unwrap();

        assert_eq!(merged["ref"], json!("main"));
        assert_eq!(merged["tag"], json!(false));
        assert_eq!(merged["protected"], json!(true));
        assert_eq!(merged["project"], json!("group/project"));
        assert_eq!(merged["stage"], json!("test"));
        assert_eq!(merged["stage_idx"], json!(1));
        assert_eq!(merged["when"], json!("on_success"));
        assert_eq!(merged["scheduling_type"], json!("stage"));
        assert_eq!(merged["pipeline"]["sha"], json!("abc123"));
        assert_eq!(merged["script"], json!(["bundle exec rspec"]));
    }

    #[test]
    fn test_own_attributes_win_over_defaults() {
        let context = context("main");
        let build = BuildSeed::new(
            &context,
            attributes(json!({
                "name": "deploy",
                "when": "manual",
                "needs_attributes": [{ "name": "rspec" }]
            })),
            "deploy",
            2,
        )
        .unwrap();

        let merged = build.attributes().unwrap();
        assert_eq!(merged["when"], json!("manual"));
        assert_eq!(merged["scheduling_type"], json!("dag"));
        assert!(!merged.contains_key("needs_attributes"));
        assert_eq!(build.needs().len(), 1);
    }

    #[test]
    fn test_job_variables_override_pipeline_variables() {
        let mut pipeline = PipelineContext::new("main", "group/project");
        pipeline.variables.insert("APP".to_string(), "api".to_string());
        let context = SeedContext::new(pipeline, SeedConfig::default());

        let build = BuildSeed::new(
            &context,
            attributes(json!({
                "name": "deploy",
                "variables": [{ "key": "APP", "value": "web" }]
            })),
            "deploy",
            0,
        )
        .unwrap();

        assert_eq!(build.variables().get("APP"), Some("web"));
        assert_eq!(build.variables().get("CI_JOB_NAME"), Some("deploy"));
        assert_eq!(build.variables().get("CI_JOB_STAGE"), Some("deploy"));
    }
}

mod errors_tests {
    use super::*;

    fn seed_errors(context: &SeedContext, value: Value) -> Option<Vec<String>> {
        PipelineSeed::new(context, stages(value))
            .unwrap()
            .errors()
            .unwrap()
    }

    #[test]
    fn test_missing_need_is_reported() {
        let errors = seed_errors(
            &context("main"),
            json!([
                { "name": "build", "builds": [{ "name": "compile" }] },
                { "name": "test", "builds": [{
                    "name": "rspec",
                    "needs_attributes": [
                        { "name": "compile" },
                        { "name": "lint" },
                        { "name": "docs", "optional": true }
                    ]
                }] }
            ]),
        );

        assert_eq!(
            errors,
            Some(vec![
                "'rspec' job needs 'lint' job, but 'lint' is not in any previous stage".to_string()
            ])
        );
    }

    #[test]
    fn test_need_on_excluded_build_is_reported() {
        let errors = seed_errors(
            &context("main"),
            json!([
                { "name": "build", "builds": [{ "name": "compile", "only": { "refs": ["staging"] } }] },
                { "name": "test", "builds": [{ "name": "rspec", "needs_attributes": [{ "name": "compile" }] }] }
            ]),
        );

        assert_eq!(errors.map(|errors| errors.len()), Some(1));
    }

    #[test]
    fn test_excluded_builds_report_nothing() {
        let errors = seed_errors(
            &context("main"),
            json!([
                { "name": "test", "builds": [{
                    "name": "rspec",
                    "only": { "refs": ["staging"] },
                    "needs_attributes": [{ "name": "missing" }]
                }] }
            ]),
        );

        assert_eq!(errors, None);
    }

    #[test]
    fn test_needs_size_limit() {
        let needs: Vec<Value> = (0..51).map(|i| json!({ "name": format!("job_{i}") })).collect();

        let errors = seed_errors(
            &context("main"),
            json!([
                { "name": "test", "builds": [{ "name": "rspec", "needs_attributes": needs }] }
            ]),
        );

        assert_eq!(
            errors,
            Some(vec![
                "rspec: one job can only need 50 others, but you have listed 51. See needs keyword documentation for more details".to_string()
            ])
        );
    }

    #[test]
    fn test_configured_needs_size_limit() {
        let needs: Vec<Value> = (0..3).map(|i| json!({ "name": format!("job_{i}") })).collect();
        let config = SeedConfig {
            needs_size_limit: 2,
            ..SeedConfig::default()
        };
        let context = SeedContext::new(PipelineContext::new("main", "group/project"), config);

        let errors = seed_errors(
            &context,
            json!([
                { "name": "test", "builds": [{ "name": "rspec", "needs_attributes": needs }] }
            ]),
        )
        .unwrap();

        assert!(errors[0].starts_with("rspec: one job can only need 2 others, but you have listed 3."));
    }

    #[test]
    fn test_same_stage_needs() {
        let value = json!([
            { "name": "test", "builds": [
                { "name": "lint" },
                { "name": "rspec", "needs_attributes": [{ "name": "lint" }] }
            ] }
        ]);

        assert_eq!(seed_errors(&context("main"), value.clone()), None);

        let config = SeedConfig {
            same_stage_needs: false,
            ..SeedConfig::default()
        };
        let strict = SeedContext::new(PipelineContext::new("main", "group/project"), config);
        assert_eq!(seed_errors(&strict, value).map(|errors| errors.len()), Some(1));
    }

    #[test]
    fn test_circular_variables_are_reported() {
        let mut pipeline = PipelineContext::new("main", "group/project");
        for (key, value) in [("A", "$B"), ("B", "$C"), ("C", "$A")] {
            pipeline.variables.insert(key.to_string(), value.to_string());
        }
        let context = SeedContext::new(pipeline, SeedConfig::default());

        let errors = seed_errors(
            &context,
            json!([{ "name": "test", "builds": [{ "name": "rspec" }] }]),
        );

        assert_eq!(
            errors,
            Some(vec![
                "rspec: circular variable reference detected: [\"A\", \"B\", \"C\"]".to_string()
            ])
        );
    }

    #[test]
    fn test_self_referencing_variable_is_not_an_error() {
        let errors = seed_errors(
            &context("main"),
            json!([{ "name": "test", "builds": [{
                "name": "rspec",
                "variables": { "PATH": "$PATH:/opt/bin" }
            }] }]),
        );

        assert_eq!(errors, None);
    }

    #[test]
    fn test_zero_needs_size_limit() {
        let config = SeedConfig {
            needs_size_limit: 0,
            ..SeedConfig::default()
        };
        let context = SeedContext::new(PipelineContext::new("main", "group/project"), config);

        let errors = seed_errors(
            &context,
            json!([
                { "name": "build", "builds": [{ "name": "compile" }] },
                { "name": "test", "builds": [
                    { "name": "lint" },
                    { "name": "rspec", "needs_attributes": [{ "name": "compile" }] }
                ] }
            ]),
        );

        assert_eq!(
            errors,
            Some(vec![
                "rspec: one job can only need 0 others, but you have listed 1. See needs keyword documentation for more details".to_string()
            ])
        );
    }
}

mod rules_tests {
    use super::*;

    fn build_with<'a>(context: &'a SeedContext, value: Value) -> BuildSeed<'a> {
        BuildSeed::new(context, attributes(value), "test", 1).unwrap()
    }

    #[test]
    fn test_matching_never_rule_excludes() {
        let context = context("main");
        let build = build_with(
            &context,
            json!({
                "name": "rspec",
                "rules": [{ "if": "$CI_COMMIT_REF_NAME == \"main\"", "when": "never" }]
            }),
        );

        assert!(!build.included().unwrap());
        assert_eq!(build.attributes().unwrap()["when"], json!("never"));
    }

    #[test]
    fn test_first_match_decides_when() {
        let context = context("main");
        let build = build_with(
            &context,
            json!({
                "name": "rspec",
                "when": "manual",
                "rules": [
                    { "if": "$CI_COMMIT_REF_NAME == \"develop\"", "when": "never" },
                    { "if": "$CI_COMMIT_REF_NAME == \"main\"", "when": "always" },
                    { "when": "on_failure" }
                ]
            }),
        );

        assert!(build.included().unwrap());
        assert_eq!(build.attributes().unwrap()["when"], json!("always"));
        assert!(!build.attributes().unwrap().contains_key("rules"));
    }

    #[test]
    fn test_no_matching_rule_excludes() {
        let context = context("main");
        let unmatched = build_with(
            &context,
            json!({ "name": "rspec", "rules": [{ "if": "$DEPLOY", "when": "always" }] }),
        );
        let empty = build_with(&context, json!({ "name": "rspec", "rules": [] }));

        for build in [&unmatched, &empty] {
            assert!(!build.included().unwrap());
            assert_eq!(build.attributes().unwrap()["when"], json!("never"));
        }
    }

    #[test]
    fn test_rules_take_precedence_over_only() {
        let context = context("main");
        let build = build_with(
            &context,
            json!({
                "name": "rspec",
                "only": { "refs": ["staging"] },
                "rules": [{ "if": "$CI_JOB_NAME == \"rspec\" && $VAR == null" }]
            }),
        );

        assert!(build.included().unwrap());
        assert_eq!(build.attributes().unwrap()["when"], json!("on_success"));
    }

    #[test]
    fn test_delayed_rule_sets_start_in() {
        let context = context("main");
        let build = build_with(
            &context,
            json!({
                "name": "rspec",
                "options": { "script": ["rspec"] },
                "rules": [{ "when": "delayed", "start_in": "1 day" }]
            }),
        );

        let merged = build.attributes().unwrap();
        assert_eq!(merged["when"], json!("delayed"));
        assert_eq!(merged["options"]["start_in"], json!("1 day"));
        assert_eq!(merged["options"]["script"], json!(["rspec"]));
    }

    #[test]
    fn test_rule_allow_failure_clears_criteria() {
        let context = context("main");
        let build = build_with(
            &context,
            json!({
                "name": "rspec",
                "allow_failure": false,
                "options": { "allow_failure_criteria": { "exit_codes": [42] } },
                "rules": [{ "if": "$CI_JOB_NAME", "allow_failure": true }]
            }),
        );

        let merged = build.attributes().unwrap();
        assert_eq!(merged["allow_failure"], json!(true));
        assert_eq!(merged["options"]["allow_failure_criteria"], Value::Null);
    }

    #[test]
    fn test_rule_variables_override_job_variables() {
        let context = context("main");
        let build = build_with(
            &context,
            json!({
                "name": "review",
                "environment": "review/$TARGET",
                "variables": { "TARGET": "job", "KEEP": "yes" },
                "rules": [{ "variables": { "TARGET": "rule" } }]
            }),
        );

        assert_eq!(
            build.attributes().unwrap()["yaml_variables"],
            json!([
                { "key": "TARGET", "value": "rule", "public": true },
                { "key": "KEEP", "value": "yes", "public": true }
            ])
        );
        let resource = build.to_resource().unwrap();
        assert_eq!(resource.environment.as_ref().unwrap().name, "review/rule");
    }

    #[test]
    fn test_rules_with_circular_variables() {
        let mut pipeline = PipelineContext::new("main", "group/project");
        for (key, value) in [("A", "$B"), ("B", "$C"), ("C", "$A")] {
            pipeline.variables.insert(key.to_string(), value.to_string());
        }
        let context = SeedContext::new(pipeline, SeedConfig::default());
        let build = build_with(
            &context,
            json!({ "name": "rspec", "rules": [{ "if": "$C != null", "when": "always" }] }),
        );

        assert!(build.included().unwrap());
        assert_eq!(build.errors(&[]).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_rules_are_rejected() {
        let context = context("main");
        let result = BuildSeed::new(
            &context,
            attributes(json!({ "name": "rspec", "rules": [{ "when": "sometimes" }] })),
            "test",
            1,
        );

        assert!(matches!(result, Err(CiDagError::Policy { ref job, .. }) if job == "rspec"));
    }
}

mod resource_tests {
    use super::*;

    fn resource_of(value: Value) -> BuildResource {
        let context = context("main");
        let build = BuildSeed::new(&context, attributes(value), "deploy", 2).unwrap();
        build.to_resource().unwrap().clone()
    }

    #[test]
    fn test_trigger_makes_a_bridge() {
        assert!(resource_of(json!({ "name": "downstream", "options": { "trigger": "group/other" } })).bridge);
        assert!(
            resource_of(json!({
                "name": "downstream",
                "options": { "trigger": { "project": "group/other", "branch": "main" } }
            }))
            .bridge
        );
        assert!(
            resource_of(json!({
                "name": "upstream",
                "options": { "bridge_needs": { "pipeline": "group/upstream" } }
            }))
            .bridge
        );
    }

    #[test]
    fn test_plain_job_is_not_a_bridge() {
        assert!(!resource_of(json!({ "name": "rspec", "options": { "script": ["rspec"] } })).bridge);
        assert!(!resource_of(json!({ "name": "rspec", "options": { "trigger": "" } })).bridge);
        assert!(!resource_of(json!({ "name": "rspec", "options": { "trigger": {} } })).bridge);
    }

    #[test]
    fn test_resource_group_is_passed_through() {
        let resource = resource_of(json!({ "name": "deploy", "resource_group_key": "iOS" }));
        assert_eq!(resource.resource_group.as_deref(), Some("iOS"));

        let expanded = resource_of(json!({ "name": "deploy", "resource_group_key": "deploy-$CI_COMMIT_REF_NAME" }));
        assert_eq!(expanded.resource_group.as_deref(), Some("deploy-main"));

        assert_eq!(resource_of(json!({ "name": "deploy" })).resource_group, None);
    }
}

mod environment_tests {
    use super::*;

    #[test]
    fn test_environment_creates_deployment() {
        let context = context("Feature/Login");
        let build = BuildSeed::new(
            &context,
            attributes(json!({ "name": "review", "environment": "review/$CI_COMMIT_REF_SLUG" })),
            "review",
            0,
        )
        .unwrap();

        let resource = build.to_resource().unwrap();

        let environment = resource.environment.as_ref().unwrap();
        assert_eq!(environment.name, "review/feature-login");
        assert_eq!(environment.action, EnvironmentAction::Start);
        assert_eq!(
            resource.attributes["expanded_environment_name"],
            json!("review/feature-login")
        );

        let deployment = resource.deployment.as_ref().unwrap();
        assert_eq!(deployment.environment, "review/feature-login");
        assert_eq!(deployment.deployable, "review");
        assert_eq!(deployment.ref_, "Feature/Login");
        assert_eq!(deployment.status, "created");
    }

    #[test]
    fn test_stop_action_has_no_deployment() {
        let context = context("main");
        let build = BuildSeed::new(
            &context,
            attributes(json!({
                "name": "stop_review",
                "environment": { "name": "review/main", "action": "stop" }
            })),
            "review",
            0,
        )
        .unwrap();

        let resource = build.to_resource().unwrap();

        assert_eq!(
            resource.environment.as_ref().map(|e| e.action),
            Some(EnvironmentAction::Stop)
        );
        assert!(resource.deployment.is_none());
    }

    #[test]
    fn test_invalid_environment_becomes_plain_job() {
        let context = context("main");
        let build = BuildSeed::new(
            &context,
            attributes(json!({ "name": "deploy", "environment": "production!" })),
            "deploy",
            0,
        )
        .unwrap();

        let resource = build.to_resource().unwrap();

        assert!(resource.environment.is_none());
        assert!(resource.deployment.is_none());
        assert!(!resource.attributes.contains_key("environment"));
    }

    #[test]
    fn test_resource_is_memoized() {
        let context = context("main");
        let build = BuildSeed::new(
            &context,
            attributes(json!({ "name": "deploy", "environment": "production" })),
            "deploy",
            0,
        )
        .unwrap();

        let first = build.to_resource().unwrap();
        let second = build.to_resource().unwrap();

        assert!(std::ptr::eq(first, second));
    }
}

mod report_tests {
    use super::*;

    #[test]
    fn test_report_collects_stages_errors_and_size() {
        let context = context("main");
        let seed = PipelineSeed::new(
            &context,
            stages(json!([
                { "name": "build", "builds": [{ "name": "compile" }] },
                { "name": "test", "builds": [
                    { "name": "rspec", "needs_attributes": [{ "name": "compile" }, { "name": "lint" }] }
                ] }
            ])),
        )
        .unwrap();

        let report = seed.report().unwrap();

        assert_eq!(report.ref_, "main");
        assert_eq!(report.size, 2);
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.errors.map(|errors| errors.len()), Some(1));

        let json = serde_json::to_value(seed.report().unwrap()).unwrap();
        assert_eq!(json["ref"], json!("main"));
        assert_eq!(json["stages"][1]["builds"][0]["attributes"]["scheduling_type"], json!("dag"));
    }
}
