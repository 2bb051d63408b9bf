use std::collections::HashMap;

use log::debug;

use super::types::{Group, NeedsKind};

/// A graph node: one job group and the combined needs of its jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictNode<'a> {
    pub name: &'a str,
    pub needs: Vec<&'a str>,
}

/// Lookup from job or group name to its graph node.
///
/// Group names always resolve. Job names of groups with more than one job
/// (parallel jobs such as `rspec 1/2`) resolve to the same group node, so a
/// need on a single parallel job links to the whole group. When a name occurs
/// twice the last occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct NodeDictionary<'a> {
    nodes: Vec<DictNode<'a>>,
    index: HashMap<&'a str, usize>,
}

impl<'a> NodeDictionary<'a> {
    pub fn build(groups: &[&'a Group], kind: NeedsKind) -> Self {
        let mut nodes = Vec::with_capacity(groups.len());
        let mut index = HashMap::with_capacity(groups.len());

        for group in groups {
            let needs = group
                .jobs
                .iter()
                .flat_map(|job| job.needs_for(kind).iter().map(String::as_str))
                .collect();

            let position = nodes.len();
            nodes.push(DictNode {
                name: group.name.as_str(),
                needs,
            });

            if group.size > 1 {
                for job in &group.jobs {
                    insert_key(&mut index, job.name.as_str(), position);
                }
            }
            insert_key(&mut index, group.name.as_str(), position);
        }

        Self { nodes, index }
    }

    pub fn get(&self, name: &str) -> Option<&DictNode<'a>> {
        self.index.get(name).map(|&position| &self.nodes[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Needs of the node registered under `name`, empty when unknown.
    pub fn needs_of(&self, name: &str) -> &[&'a str] {
        match self.get(name) {
            Some(node) => &node.needs,
            None => &[],
        }
    }

    /// Distinct nodes in insertion order.
    pub fn nodes(&self) -> &[DictNode<'a>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn insert_key<'a>(index: &mut HashMap<&'a str, usize>, key: &'a str, position: usize) {
    if let Some(previous) = index.insert(key, position) {
        if previous != position {
            debug!("Node name '{key}' registered twice, keeping the last occurrence");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::Job;

    fn job(name: &str, needs: &[&str]) -> Job {
        Job {
            name: name.to_string(),
            stage_name: "test".to_string(),
            needs: needs.iter().map(ToString::to_string).collect(),
            previous_stage_jobs_union_needs: vec!["fallback".to_string()],
            extra: serde_json::Map::new(),
        }
    }

    fn group(name: &str, jobs: Vec<Job>) -> Group {
        Group {
            name: name.to_string(),
            stage_name: "test".to_string(),
            size: jobs.len(),
            jobs,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_group_needs_are_combined_from_jobs() {
        let rspec = group(
            "rspec",
            vec![job("rspec 1/2", &["build"]), job("rspec 2/2", &["lint"])],
        );
        let groups = vec![&rspec];

        let dict = NodeDictionary::build(&groups, NeedsKind::Explicit);

        assert_eq!(dict.needs_of("rspec"), &["build", "lint"]);
        assert_eq!(dict.get("rspec 1/2").map(|node| node.name), Some("rspec"));
        assert_eq!(dict.nodes().len(), 1);
        assert_eq!(dict.len(), 3);
    }

    #[test]
    fn test_single_job_group_registers_group_name_only() {
        let lint = group("lint", vec![job("lint-job", &[])]);
        let groups = vec![&lint];

        let dict = NodeDictionary::build(&groups, NeedsKind::Explicit);

        assert!(dict.contains("lint"));
        assert!(!dict.contains("lint-job"));
    }

    #[test]
    fn test_needs_kind_selects_field() {
        let deploy = group("deploy", vec![job("deploy", &[])]);
        let groups = vec![&deploy];

        let explicit = NodeDictionary::build(&groups, NeedsKind::Explicit);
        let fallback = NodeDictionary::build(&groups, NeedsKind::PreviousStageFallback);

        assert!(explicit.needs_of("deploy").is_empty());
        assert_eq!(fallback.needs_of("deploy"), &["fallback"]);
    }

    #[test]
    fn test_duplicate_names_last_write_wins() {
        let first = group("dup", vec![job("dup", &["a"])]);
        let second = group("dup", vec![job("dup", &["b"])]);
        let groups = vec![&first, &second];

        let dict = NodeDictionary::build(&groups, NeedsKind::Explicit);

        assert_eq!(dict.needs_of("dup"), &["b"]);
    }

    #[test]
    fn test_unknown_name_has_no_needs() {
        let dict = NodeDictionary::build(&[], NeedsKind::Explicit);
        assert!(dict.is_empty());
        assert!(dict.needs_of("missing").is_empty());
    }
}
