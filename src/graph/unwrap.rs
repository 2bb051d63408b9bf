use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};

use super::types::{
    Group, Job, PipelineData, RawGroup, RawJob, RawPipeline, RawStage, Stage, StageLookup,
};

/// Normalizes raw stages into flat stage/group/job records.
///
/// Connection wrappers are unwrapped, every job gets flat `needs` and
/// `previous_stage_jobs_union_needs` lists, the stage name is copied onto each
/// group and job, and a group name → position lookup is built for column
/// generation.
///
/// A job that declares no `needs` falls back to every job of the closest
/// preceding stage that had jobs. A job declaring `needs: []` has no
/// dependencies at all.
pub fn unwrap_stages_with_needs(stages: Vec<RawStage>) -> PipelineData {
    let mut previous_stage_jobs: Vec<String> = Vec::new();
    let mut normalized = Vec::with_capacity(stages.len());
    let mut stages_lookup = IndexMap::new();

    for (stage_idx, raw_stage) in stages.into_iter().enumerate() {
        let RawStage { name, groups } = raw_stage;
        let raw_groups = groups.into_vec();
        if raw_groups.is_empty() {
            warn!("Stage '{name}' has no job groups");
        }

        let groups: Vec<Group> = raw_groups
            .into_iter()
            .map(|group| unwrap_group(group, &name, &previous_stage_jobs))
            .collect();

        for (group_idx, group) in groups.iter().enumerate() {
            if stages_lookup
                .insert(
                    group.name.clone(),
                    StageLookup {
                        stage_idx,
                        group_idx,
                    },
                )
                .is_some()
            {
                debug!("Group name '{}' appears more than once, last one wins", group.name);
            }
        }

        let stage_jobs: Vec<String> = groups
            .iter()
            .flat_map(|group| group.jobs.iter().map(|job| job.name.clone()))
            .collect();
        if !stage_jobs.is_empty() {
            previous_stage_jobs = stage_jobs;
        }

        normalized.push(Stage { name, groups });
    }

    debug!(
        "Unwrapped {} stages with {} groups",
        normalized.len(),
        stages_lookup.len()
    );

    PipelineData {
        stages: normalized,
        stages_lookup,
    }
}

/// Convenience wrapper over [`unwrap_stages_with_needs`] for a whole document.
pub fn unwrap_pipeline(pipeline: RawPipeline) -> PipelineData {
    unwrap_stages_with_needs(pipeline.stages.into_vec())
}

fn unwrap_group(group: RawGroup, stage_name: &str, previous_stage_jobs: &[String]) -> Group {
    let RawGroup {
        name,
        size,
        jobs,
        extra,
    } = group;

    let jobs = unwrap_jobs(jobs.into_vec(), &name, stage_name, previous_stage_jobs);

    Group {
        size: size.unwrap_or(jobs.len()),
        name,
        stage_name: stage_name.to_string(),
        jobs,
        extra,
    }
}

fn unwrap_jobs(
    jobs: Vec<RawJob>,
    group_name: &str,
    stage_name: &str,
    previous_stage_jobs: &[String],
) -> Vec<Job> {
    if jobs.is_empty() {
        warn!("Job group '{group_name}' in stage '{stage_name}' has an empty job array");
        return vec![];
    }

    jobs.into_iter()
        .map(|job| unwrap_job(job, stage_name, previous_stage_jobs))
        .collect()
}

fn unwrap_job(job: RawJob, stage_name: &str, previous_stage_jobs: &[String]) -> Job {
    let RawJob {
        name,
        needs,
        previous_stage_jobs_union_needs,
        extra,
    } = job;

    let declared = needs.map(|needs| unique(needs.into_names()));

    let mut union: IndexSet<String> = match &declared {
        Some(needs) => needs.iter().cloned().collect(),
        None => previous_stage_jobs.iter().cloned().collect(),
    };
    if let Some(provided) = previous_stage_jobs_union_needs {
        union.extend(provided.into_names());
    }

    Job {
        name,
        stage_name: stage_name.to_string(),
        needs: declared.unwrap_or_default(),
        previous_stage_jobs_union_needs: union.into_iter().collect(),
        extra,
    }
}

fn unique(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}
