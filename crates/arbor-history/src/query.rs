//! Reading versions out of a history index.

use arbor_store::{Deferred, ObjectData, ObjectGraph, ObjectRef};
use chrono::{DateTime, Utc};

use crate::node::{HistoryIndexNode, HistoryRef};
use crate::ops::{children, load, Step};

/// All versions, oldest first.
pub fn versions<V: ObjectData>(
    graph: &ObjectGraph,
    index: &HistoryRef<V>,
) -> Step<Vec<ObjectRef<V>>> {
    let graph = graph.clone();
    load(&graph, index.clone())
        .and_then(move |(_, node)| collect(&graph, &node, i64::MIN, i64::MAX))
}

/// All versions, newest first.
pub fn versions_reversed<V: ObjectData>(
    graph: &ObjectGraph,
    index: &HistoryRef<V>,
) -> Step<Vec<ObjectRef<V>>> {
    versions(graph, index).map(|mut all| {
        all.reverse();
        all
    })
}

/// Versions whose time lies in `from..=to`, oldest first.
pub fn versions_between<V: ObjectData>(
    graph: &ObjectGraph,
    index: &HistoryRef<V>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Step<Vec<ObjectRef<V>>> {
    let (from, to) = (from.timestamp(), to.timestamp());
    let graph = graph.clone();
    load(&graph, index.clone()).and_then(move |(_, node)| collect(&graph, &node, from, to))
}

fn collect<V: ObjectData>(
    graph: &ObjectGraph,
    node: &HistoryIndexNode<V>,
    from: i64,
    to: i64,
) -> Step<Vec<ObjectRef<V>>> {
    if node.max_time() < from || node.min_time() > to {
        return Deferred::ready(Vec::new());
    }
    if let HistoryIndexNode::Leaf(leaf) = node {
        return Deferred::ready(leaf.versions.clone());
    }
    let graph = graph.clone();
    children(&graph, node).and_then(move |((_, c1), (_, c2))| {
        collect(&graph, &c1, from, to)
            .zip(collect(&graph, &c2, from, to))
            .map(|(mut older, newer)| {
                older.extend(newer);
                older
            })
    })
}

/// Up to `count` versions after skipping the `skip` newest, newest first.
pub fn range<V: ObjectData>(
    graph: &ObjectGraph,
    index: &HistoryRef<V>,
    skip: u64,
    count: u64,
) -> Step<Vec<ObjectRef<V>>> {
    let graph = graph.clone();
    load(&graph, index.clone()).and_then(move |(_, node)| range_of(&graph, &node, skip, count))
}

fn range_of<V: ObjectData>(
    graph: &ObjectGraph,
    node: &HistoryIndexNode<V>,
    skip: u64,
    count: u64,
) -> Step<Vec<ObjectRef<V>>> {
    if count == 0 || skip >= node.size() {
        return Deferred::ready(Vec::new());
    }
    if let HistoryIndexNode::Leaf(leaf) = node {
        let picked = leaf
            .versions
            .iter()
            .rev()
            .skip(skip as usize)
            .take(count as usize)
            .cloned()
            .collect();
        return Deferred::ready(picked);
    }
    let graph = graph.clone();
    children(&graph, node).and_then(move |((_, older), (_, newer))| {
        let from_newer = if skip < newer.size() {
            count.min(newer.size() - skip)
        } else {
            0
        };
        range_of(&graph, &newer, skip, count)
            .zip(range_of(&graph, &older, skip.saturating_sub(newer.size()), count - from_newer))
            .map(|(mut first, rest)| {
                first.extend(rest);
                first
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::{at, stamp};
    use crate::ops::tests::{build, graph, Index};
    use arbor_store::ObjectHash;

    fn hashes(names: &[&str]) -> Vec<ObjectHash> {
        names.iter().map(|n| stamp(n).hash()).collect()
    }

    fn run(
        graph: &ObjectGraph,
        step: Step<Vec<ObjectRef<crate::node::tests::Stamp>>>,
    ) -> Vec<ObjectHash> {
        graph.execute(step).unwrap().iter().map(ObjectRef::hash).collect()
    }

    fn sample(graph: &ObjectGraph) -> Index {
        let times = [("a", 10), ("b", 20), ("c", 20), ("d", 30), ("e", 40), ("f", 50)];
        let entries: Vec<(String, i64)> = times
            .iter()
            .map(|(n, t)| (n.to_string(), *t))
            .collect();
        build(graph, &entries).unwrap()
    }

    #[test]
    fn all_versions_in_both_directions() {
        let g = graph();
        let index = sample(&g);
        assert_eq!(run(&g, versions(&g, &index)), hashes(&["a", "b", "c", "d", "e", "f"]));
        assert_eq!(run(&g, versions_reversed(&g, &index)), hashes(&["f", "e", "d", "c", "b", "a"]));
    }

    #[test]
    fn versions_within_times() {
        let g = graph();
        let index = sample(&g);
        assert_eq!(run(&g, versions_between(&g, &index, at(20), at(30))), hashes(&["b", "c", "d"]));
        assert_eq!(run(&g, versions_between(&g, &index, at(41), at(49))), hashes(&[]));
        assert_eq!(run(&g, versions_between(&g, &index, at(0), at(10))), hashes(&["a"]));
    }

    #[test]
    fn range_skips_newest() {
        let g = graph();
        let index = sample(&g);
        assert_eq!(run(&g, range(&g, &index, 0, 2)), hashes(&["f", "e"]));
        assert_eq!(run(&g, range(&g, &index, 2, 3)), hashes(&["d", "c", "b"]));
        assert_eq!(run(&g, range(&g, &index, 4, 10)), hashes(&["b", "a"]));
        assert!(run(&g, range(&g, &index, 6, 1)).is_empty());
        assert!(run(&g, range(&g, &index, 0, 0)).is_empty());
    }

    #[test]
    fn queries_after_reopening() {
        let g = graph();
        let index = sample(&g);
        g.write(&index).unwrap();
        let fresh = ObjectGraph::new(g.store().clone());
        let stored: Index = ObjectRef::from_hash(index.hash());
        assert_eq!(run(&fresh, range(&fresh, &stored, 1, 2)), hashes(&["e", "d"]));
        assert_eq!(run(&fresh, versions(&fresh, &stored)).len(), 6);
    }
}
