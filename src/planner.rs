//! Shortest upgrade path search over the provider's valid-upgrade-target graph.

use std::collections::{HashSet, VecDeque};

use tracing::warn;

use crate::config::Resource;
use crate::provider::RdsProvider;

/// Find the shortest sequence of upgrade hops from `current` to `target`.
///
/// Breadth-first search over the graph of valid upgrade targets for the
/// resource's engine, fetching the outgoing edges of each version lazily
/// from the provider, which only exposes them one version at a time. Returns
/// the versions to upgrade through, excluding `current` and including
/// `target`; empty when the resource is already at the target or no route
/// exists.
///
/// Among equal-length routes the first one discovered wins, so the result
/// follows the order in which the provider reports upgrade targets for each
/// version. A failed target query makes that version a dead end and the
/// search continues along other queued routes.
///
/// The queue holds full candidate paths, which is fine at the scale of
/// provider version graphs (tens of nodes); parent-pointer reconstruction
/// would be the next step if that ever changed.
pub async fn find_upgrade_path<P: RdsProvider + ?Sized>(
    provider: &P,
    resource: &Resource,
    current: &str,
    target: &str,
) -> Vec<String> {
    if current == target {
        return Vec::new();
    }

    let mut queue: VecDeque<Vec<String>> = VecDeque::from([vec![current.to_string()]]);
    let mut visited: HashSet<String> = HashSet::from([current.to_string()]);

    while let Some(path) = queue.pop_front() {
        let Some(node) = path.last().cloned() else {
            continue;
        };

        let targets = match provider.upgrade_targets(resource, &node).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(
                    engine = %resource.engine,
                    version = %node,
                    error = %e,
                    "Could not fetch upgrade targets, treating version as a dead end"
                );
                continue;
            }
        };

        for next in targets {
            if visited.contains(&next) {
                continue;
            }

            let mut new_path = path.clone();
            new_path.push(next.clone());

            if next == target {
                // Drop the starting version.
                return new_path[1..].to_vec();
            }

            visited.insert(next);
            queue.push_back(new_path);
        }
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{FakeProvider, resource};

    const ENGINE: &str = "aurora-postgresql";

    #[tokio::test]
    async fn test_same_version_returns_empty() {
        let provider = FakeProvider::default();
        let res = resource("edge", ENGINE, "10.4");
        let path = find_upgrade_path(&provider, &res, "10.4", "10.4").await;
        assert!(path.is_empty());
    }

    #[tokio::test]
    async fn test_direct_hop() {
        let provider = FakeProvider::default().with_edge(ENGINE, "10.4", &["10.5", "10.11"]);
        let res = resource("edge", ENGINE, "10.11");
        let path = find_upgrade_path(&provider, &res, "10.4", "10.11").await;
        assert_eq!(path, vec!["10.11"]);
    }

    #[tokio::test]
    async fn test_multi_hop_path() {
        let provider = FakeProvider::default()
            .with_edge(ENGINE, "10.4", &["10.7", "10.11"])
            .with_edge(ENGINE, "10.7", &[])
            .with_edge(ENGINE, "10.11", &["10.18"]);
        let res = resource("edge", ENGINE, "10.18");
        let path = find_upgrade_path(&provider, &res, "10.4", "10.18").await;
        assert_eq!(path, vec!["10.11", "10.18"]);
    }

    #[tokio::test]
    async fn test_minimum_hop_count_wins() {
        // A->B->D and A->C->D are both two hops; A->B->E->D is three.
        let provider = FakeProvider::default()
            .with_edge(ENGINE, "A", &["B", "C"])
            .with_edge(ENGINE, "B", &["E"])
            .with_edge(ENGINE, "C", &["D"])
            .with_edge(ENGINE, "E", &["D"]);
        let res = resource("edge", ENGINE, "D");
        let path = find_upgrade_path(&provider, &res, "A", "D").await;
        assert_eq!(path.len(), 2);
        assert_eq!(path, vec!["C", "D"]);
    }

    #[tokio::test]
    async fn test_no_route_returns_empty() {
        let provider = FakeProvider::default()
            .with_edge(ENGINE, "10.4", &["10.5"])
            .with_edge(ENGINE, "10.5", &[]);
        let res = resource("edge", ENGINE, "10.18");
        let path = find_upgrade_path(&provider, &res, "10.4", "10.18").await;
        assert!(path.is_empty());
    }

    #[tokio::test]
    async fn test_terminates_on_cycles() {
        let provider = FakeProvider::default()
            .with_edge(ENGINE, "10.4", &["10.5"])
            .with_edge(ENGINE, "10.5", &["10.4", "10.5"]);
        let res = resource("edge", ENGINE, "10.18");
        let path = find_upgrade_path(&provider, &res, "10.4", "10.18").await;
        assert!(path.is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_is_a_dead_end_not_an_abort() {
        // The route through B fails at query time; the route through C works.
        let provider = FakeProvider::default()
            .with_edge(ENGINE, "A", &["B", "C"])
            .with_broken_node(ENGINE, "B")
            .with_edge(ENGINE, "C", &["D"]);
        let res = resource("edge", ENGINE, "D");
        let path = find_upgrade_path(&provider, &res, "A", "D").await;
        assert_eq!(path, vec!["C", "D"]);
    }
}
