//! Cross-project identity: `projectId::nodeId` namespacing and grouping.

use serde::Serialize;

use super::candidate::SearchCandidate;

pub const NAMESPACE_SEPARATOR: &str = "::";

/// Group key for results that carry no project id.
pub const UNKNOWN_PROJECT: &str = "__unknown__";

/// A parsed `projectId::nodeId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespacedId {
    pub project_id: Option<String>,
    pub node_id: String,
}

pub fn namespace_node_id(project_id: &str, node_id: &str) -> String {
    format!("{project_id}{NAMESPACE_SEPARATOR}{node_id}")
}

/// Split at the first separator. A string without one is a bare node id.
pub fn parse_namespaced_id(id: &str) -> NamespacedId {
    match id.split_once(NAMESPACE_SEPARATOR) {
        Some((project, node)) => NamespacedId {
            project_id: Some(project.to_string()),
            node_id: node.to_string(),
        },
        None => NamespacedId {
            project_id: None,
            node_id: id.to_string(),
        },
    }
}

/// Results of one project, as produced by [`group_by_project`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectGroup {
    pub project_id: String,
    pub results: Vec<SearchCandidate>,
}

/// Partition by project id, groups in first-seen order, members in input order.
pub fn group_by_project(results: Vec<SearchCandidate>) -> Vec<ProjectGroup> {
    let mut groups: Vec<ProjectGroup> = Vec::new();
    for r in results {
        let key = r.project_id.as_deref().unwrap_or(UNKNOWN_PROJECT);
        match groups.iter_mut().find(|g| g.project_id == key) {
            Some(group) => group.results.push(r),
            None => groups.push(ProjectGroup {
                project_id: key.to_string(),
                results: vec![r],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespacing_round_trips() {
        for (p, n) in [("alpha", "node-1"), ("x", "y"), ("proj 7", "a:b")] {
            let parsed = parse_namespaced_id(&namespace_node_id(p, n));
            assert_eq!(parsed.project_id.as_deref(), Some(p));
            assert_eq!(parsed.node_id, n);
        }
    }

    #[test]
    fn parse_is_lenient() {
        let parsed = parse_namespaced_id("just-a-node");
        assert_eq!(parsed.project_id, None);
        assert_eq!(parsed.node_id, "just-a-node");

        let empty = parse_namespaced_id("");
        assert_eq!(empty.project_id, None);
        assert_eq!(empty.node_id, "");
    }

    #[test]
    fn parse_splits_at_first_separator() {
        let parsed = parse_namespaced_id("p::n::extra");
        assert_eq!(parsed.project_id.as_deref(), Some("p"));
        assert_eq!(parsed.node_id, "n::extra");
    }

    #[test]
    fn groups_in_first_seen_order() {
        let mut orphan = SearchCandidate::new("x", "o", 0.0);
        orphan.project_id = None;
        let results = vec![
            SearchCandidate::new("b", "1", 0.0),
            SearchCandidate::new("a", "2", 0.0),
            orphan,
            SearchCandidate::new("b", "3", 0.0),
        ];
        let groups = group_by_project(results);
        let keys: Vec<&str> = groups.iter().map(|g| g.project_id.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", UNKNOWN_PROJECT]);
        let b_ids: Vec<&str> = groups[0].results.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(b_ids, vec!["1", "3"]);
    }
}
