//! Building and combining history indexes.
//!
//! Indexes are kept height-balanced the way AVL trees are: the children of
//! every range built here differ in height by at most one. [`concat`] only
//! checks its preconditions, [`rebalance`] joins two ordered indexes of any
//! heights, and [`merge`] combines indexes whose time spans may overlap.

use std::collections::BTreeSet;
use std::sync::Arc;

use arbor_store::{Deferred, ObjectData, ObjectGraph, ObjectRef};
use chrono::Duration;
use tracing::debug;

use crate::error::{HistoryError, HistoryResult};
use crate::node::{HistoryIndexNode, HistoryLeaf, HistoryRange, HistoryRef};

pub type Step<T> = Deferred<T, HistoryError>;

/// A reference together with its resolved node.
pub(crate) type Loaded<V> = (HistoryRef<V>, Arc<HistoryIndexNode<V>>);

pub(crate) fn load<V: ObjectData>(
    graph: &ObjectGraph,
    reference: HistoryRef<V>,
) -> Step<Loaded<V>> {
    graph
        .load(&reference)
        .err_into()
        .map(move |node| (reference, node))
}

pub(crate) fn children<V: ObjectData>(
    graph: &ObjectGraph,
    node: &HistoryIndexNode<V>,
) -> Step<(Loaded<V>, Loaded<V>)> {
    match node.children() {
        Some((first, second)) => load(graph, first.clone()).zip(load(graph, second.clone())),
        None => Deferred::failed(HistoryError::InvariantViolation(
            "a leaf has no subranges".into(),
        )),
    }
}

fn created<V: ObjectData>(node: HistoryIndexNode<V>) -> Loaded<V> {
    let node = Arc::new(node);
    (ObjectRef::from_arc(node.clone()), node)
}

/// A range over `a` then `b`.
///
/// `a` must end strictly before `b` starts and their heights may differ by
/// at most two; nothing is rebalanced.
pub fn concat<V: ObjectData>(
    graph: &ObjectGraph,
    a: &HistoryRef<V>,
    b: &HistoryRef<V>,
) -> Step<HistoryRef<V>> {
    load(graph, a.clone())
        .zip(load(graph, b.clone()))
        .try_map(|(a, b)| concat_loaded(&a, &b).map(|(r, _)| r))
}

fn concat_loaded<V: ObjectData>(a: &Loaded<V>, b: &Loaded<V>) -> HistoryResult<Loaded<V>> {
    let (left, right) = (&a.1, &b.1);
    if left.max_time() >= right.min_time() {
        return Err(HistoryError::InvariantViolation(format!(
            "time spans {}..{} and {}..{} are not ordered",
            left.min_time(),
            left.max_time(),
            right.min_time(),
            right.max_time()
        )));
    }
    if left.height().abs_diff(right.height()) > 2 {
        return Err(HistoryError::InvariantViolation(format!(
            "heights {} and {} are too far apart",
            left.height(),
            right.height()
        )));
    }
    let authors: BTreeSet<String> = left.authors().union(right.authors()).cloned().collect();
    Ok(created(HistoryIndexNode::Range(HistoryRange {
        first: left.first().clone(),
        last: right.last().clone(),
        authors,
        size: left.size() + right.size(),
        height: left.height().max(right.height()) + 1,
        min_time: left.min_time(),
        max_time: right.max_time(),
        child1: a.0.clone(),
        child2: b.0.clone(),
    })))
}

/// Join two ordered indexes of any heights into one balanced index.
///
/// `a` must end strictly before `b` starts.
pub fn rebalance<V: ObjectData>(
    graph: &ObjectGraph,
    a: &HistoryRef<V>,
    b: &HistoryRef<V>,
) -> Step<HistoryRef<V>> {
    let graph_ = graph.clone();
    load(graph, a.clone())
        .zip(load(graph, b.clone()))
        .and_then(move |(a, b)| join(&graph_, a, b))
        .map(|(r, _)| r)
}

fn join<V: ObjectData>(graph: &ObjectGraph, a: Loaded<V>, b: Loaded<V>) -> Step<Loaded<V>> {
    let (ha, hb) = (a.1.height(), b.1.height());
    if ha.abs_diff(hb) <= 1 {
        return Deferred::from_result(concat_loaded(&a, &b));
    }
    let graph = graph.clone();
    if ha > hb {
        // Descend along the right spine of `a`.
        children(&graph, &a.1).and_then(move |(l, c)| {
            join(&graph, c, b).and_then(move |t| {
                if t.1.height() <= l.1.height() + 1 {
                    return Deferred::from_result(concat_loaded(&l, &t));
                }
                children(&graph, &t.1).and_then(move |(t1, t2)| {
                    if t2.1.height() >= t1.1.height() {
                        return Deferred::from_result(
                            concat_loaded(&l, &t1).and_then(|left| concat_loaded(&left, &t2)),
                        );
                    }
                    children(&graph, &t1.1).try_map(move |(u1, u2)| {
                        let left = concat_loaded(&l, &u1)?;
                        let right = concat_loaded(&u2, &t2)?;
                        concat_loaded(&left, &right)
                    })
                })
            })
        })
    } else {
        // Descend along the left spine of `b`.
        children(&graph, &b.1).and_then(move |(c, r)| {
            join(&graph, a, c).and_then(move |t| {
                if t.1.height() <= r.1.height() + 1 {
                    return Deferred::from_result(concat_loaded(&t, &r));
                }
                children(&graph, &t.1).and_then(move |(t1, t2)| {
                    if t1.1.height() >= t2.1.height() {
                        return Deferred::from_result(
                            concat_loaded(&t2, &r).and_then(|right| concat_loaded(&t1, &right)),
                        );
                    }
                    children(&graph, &t2.1).try_map(move |(u1, u2)| {
                        let left = concat_loaded(&t1, &u1)?;
                        let right = concat_loaded(&u2, &r)?;
                        concat_loaded(&left, &right)
                    })
                })
            })
        })
    }
}

fn join_opt<V: ObjectData>(
    graph: &ObjectGraph,
    a: Option<Loaded<V>>,
    b: Option<Loaded<V>>,
) -> Step<Option<Loaded<V>>> {
    match (a, b) {
        (Some(a), Some(b)) => join(graph, a, b).map(Some),
        (a, b) => Deferred::ready(a.or(b)),
    }
}

/// Split `node` into the versions at or before `time` and those after it.
fn split<V: ObjectData>(
    graph: &ObjectGraph,
    node: Loaded<V>,
    time: i64,
) -> Step<(Option<Loaded<V>>, Option<Loaded<V>>)> {
    if node.1.max_time() <= time {
        return Deferred::ready((Some(node), None));
    }
    if node.1.min_time() > time {
        return Deferred::ready((None, Some(node)));
    }
    let graph = graph.clone();
    children(&graph, &node.1).and_then(move |(c1, c2)| {
        if c1.1.max_time() <= time {
            split(&graph, c2, time).and_then(move |(lo, hi)| {
                join_opt(&graph, Some(c1), lo).map(move |lo| (lo, hi))
            })
        } else {
            split(&graph, c1, time).and_then(move |(lo, hi)| {
                join_opt(&graph, hi, Some(c2)).map(move |hi| (lo, hi))
            })
        }
    })
}

/// Combine two indexes into one holding the versions of both.
///
/// The spans may overlap. Versions present in both are kept once; within
/// a second, versions of `a` come before those of `b`.
pub fn merge<V: ObjectData>(
    graph: &ObjectGraph,
    a: &HistoryRef<V>,
    b: &HistoryRef<V>,
) -> Step<HistoryRef<V>> {
    let graph_ = graph.clone();
    load(graph, a.clone())
        .zip(load(graph, b.clone()))
        .and_then(move |(a, b)| union(&graph_, a, b))
        .map(|(reference, node)| {
            debug!(size = node.size(), height = node.height(), "merged history index");
            reference
        })
}

fn union<V: ObjectData>(graph: &ObjectGraph, a: Loaded<V>, b: Loaded<V>) -> Step<Loaded<V>> {
    if a.0.hash() == b.0.hash() {
        return Deferred::ready(a);
    }
    if a.1.max_time() < b.1.min_time() {
        return join(graph, a, b);
    }
    if b.1.max_time() < a.1.min_time() {
        return join(graph, b, a);
    }
    match (a.1.is_leaf(), b.1.is_leaf()) {
        (true, true) => Deferred::from_result(merge_leaves(&a.1, &b.1)),
        (false, _) => distribute(graph, a, b, true),
        (true, false) => distribute(graph, b, a, false),
    }
}

/// Union of a range with an overlapping node, split at the boundary
/// between the range's subranges.
fn distribute<V: ObjectData>(
    graph: &ObjectGraph,
    range: Loaded<V>,
    other: Loaded<V>,
    range_first: bool,
) -> Step<Loaded<V>> {
    let graph = graph.clone();
    children(&graph, &range.1).and_then(move |(c1, c2)| {
        let boundary = c1.1.max_time();
        split(&graph, other, boundary).and_then(move |(lo, hi)| {
            let u1 = union_opt(&graph, c1, lo, range_first);
            let u2 = union_opt(&graph, c2, hi, range_first);
            u1.zip(u2).and_then(move |(u1, u2)| join(&graph, u1, u2))
        })
    })
}

fn union_opt<V: ObjectData>(
    graph: &ObjectGraph,
    mine: Loaded<V>,
    other: Option<Loaded<V>>,
    mine_first: bool,
) -> Step<Loaded<V>> {
    match other {
        None => Deferred::ready(mine),
        Some(other) if mine_first => union(graph, mine, other),
        Some(other) => union(graph, other, mine),
    }
}

fn merge_leaves<V: ObjectData>(
    a: &HistoryIndexNode<V>,
    b: &HistoryIndexNode<V>,
) -> HistoryResult<Loaded<V>> {
    let (HistoryIndexNode::Leaf(a), HistoryIndexNode::Leaf(b)) = (a, b) else {
        return Err(HistoryError::InvariantViolation("expected two leaves".into()));
    };
    if a.time != b.time {
        return Err(HistoryError::InvariantViolation(format!(
            "leaves at {} and {} overlap",
            a.time, b.time
        )));
    }
    let mut versions = a.versions.clone();
    for version in &b.versions {
        if !versions.contains(version) {
            versions.push(version.clone());
        }
    }
    Ok(created(HistoryIndexNode::Leaf(HistoryLeaf {
        versions,
        authors: a.authors.union(&b.authors).cloned().collect(),
        time: a.time,
    })))
}

/// Cut the index into pieces that each fall within one interval of length
/// `interval`, newest first.
///
/// Intervals are aligned to the Unix epoch. A leaf on its own cannot be
/// split and is rejected.
pub fn split_at_interval<V: ObjectData>(
    graph: &ObjectGraph,
    node: &HistoryRef<V>,
    interval: Duration,
) -> Step<Vec<HistoryRef<V>>> {
    let seconds = interval.num_seconds();
    if seconds <= 0 {
        return Deferred::failed(HistoryError::InvalidInterval(seconds));
    }
    let graph_ = graph.clone();
    load(graph, node.clone()).and_then(move |node| {
        if node.1.is_leaf() {
            return Deferred::failed(HistoryError::Unsupported(
                "splitting a single leaf at an interval",
            ));
        }
        split_interval(&graph_, node, seconds)
    })
}

fn split_interval<V: ObjectData>(
    graph: &ObjectGraph,
    node: Loaded<V>,
    seconds: i64,
) -> Step<Vec<HistoryRef<V>>> {
    let bucket = |time: i64| time.div_euclid(seconds);
    if node.1.is_leaf() || bucket(node.1.min_time()) == bucket(node.1.max_time()) {
        return Deferred::ready(vec![node.0]);
    }
    let graph = graph.clone();
    children(&graph, &node.1).and_then(move |(c1, c2)| {
        split_interval(&graph, c2, seconds)
            .zip(split_interval(&graph, c1, seconds))
            .map(|(mut newer, older)| {
                newer.extend(older);
                newer
            })
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::node::tests::{at, stamp, Stamp};
    use crate::query::versions;
    use arbor_store::{InMemoryObjectStore, ObjectHash};
    use proptest::prelude::*;

    pub(crate) type Index = HistoryRef<Stamp>;

    pub(crate) fn graph() -> ObjectGraph {
        ObjectGraph::new(Arc::new(InMemoryObjectStore::new()))
    }

    pub(crate) fn leaf(name: &str, author: &str, time: i64) -> Index {
        ObjectRef::new(HistoryIndexNode::of(stamp(name), Some(author), at(time)))
    }

    /// Index of `entries` added one by one, as a repository appends them.
    pub(crate) fn build(graph: &ObjectGraph, entries: &[(String, i64)]) -> Option<Index> {
        let mut index: Option<Index> = None;
        for (name, time) in entries {
            let next = leaf(name, &format!("author{}", time % 3), *time);
            index = Some(match index {
                None => next,
                Some(index) => graph.execute(merge(graph, &index, &next)).unwrap(),
            });
        }
        index
    }

    fn names(graph: &ObjectGraph, index: &Index) -> Vec<String> {
        graph
            .execute(versions(graph, index))
            .unwrap()
            .iter()
            .map(|v| graph.resolve(v).unwrap().0.clone())
            .collect()
    }

    /// Check every structural rule below `index`; returns its versions'
    /// hashes oldest first.
    fn check(graph: &ObjectGraph, index: &Index) -> Vec<ObjectHash> {
        let node = graph.resolve(index).unwrap();
        let Some((c1, c2)) = node.children() else {
            let HistoryIndexNode::Leaf(leaf) = node.as_ref() else { unreachable!() };
            return leaf.versions().iter().map(ObjectRef::hash).collect();
        };
        let (n1, n2) = (graph.resolve(c1).unwrap(), graph.resolve(c2).unwrap());
        assert!(n1.height().abs_diff(n2.height()) <= 2, "unbalanced range");
        assert_eq!(node.height(), n1.height().max(n2.height()) + 1);
        assert_eq!(node.size(), n1.size() + n2.size());
        assert_eq!(node.min_time(), n1.min_time());
        assert_eq!(node.max_time(), n2.max_time());
        assert!(n1.max_time() < n2.min_time());
        assert_ne!(c1.hash(), c2.hash());
        let authors: BTreeSet<String> = n1.authors().union(n2.authors()).cloned().collect();
        assert_eq!(node.authors(), &authors);
        assert_eq!(node.first(), n1.first());
        assert_eq!(node.last(), n2.last());
        let mut all = check(graph, c1);
        all.extend(check(graph, c2));
        all
    }

    /// Stable sort by time: the expected order of versions.
    fn sorted(entries: &[(String, i64)]) -> Vec<String> {
        let mut entries = entries.to_vec();
        entries.sort_by_key(|(_, time)| *time);
        entries.into_iter().map(|(name, _)| name).collect()
    }

    fn entries(times: &[i64]) -> Vec<(String, i64)> {
        times.iter().enumerate().map(|(i, t)| (format!("v{i}"), *t)).collect()
    }

    // ------------------------------------------------------------------------
    // concat / rebalance
    // ------------------------------------------------------------------------

    #[test]
    fn concat_requires_order_and_similar_heights() {
        let g = graph();
        let (a, b) = (leaf("a", "x", 10), leaf("b", "y", 20));
        let ab = g.execute(concat(&g, &a, &b)).unwrap();
        let node = g.resolve(&ab).unwrap();
        assert_eq!((node.size(), node.height(), node.min_time(), node.max_time()), (2, 2, 10, 20));
        assert_eq!(node.authors().len(), 2);

        assert!(matches!(g.execute(concat(&g, &b, &a)), Err(HistoryError::InvariantViolation(_))));
        assert!(matches!(
            g.execute(concat(&g, &a, &leaf("c", "x", 10))),
            Err(HistoryError::InvariantViolation(_))
        ));

        let tall = build(&g, &entries(&(100..116).collect::<Vec<_>>())).unwrap();
        assert!(g.resolve(&tall).unwrap().height() >= 4);
        assert!(matches!(
            g.execute(concat(&g, &a, &tall)),
            Err(HistoryError::InvariantViolation(_))
        ));

        let joined = g.execute(rebalance(&g, &a, &tall)).unwrap();
        assert_eq!(check(&g, &joined).len(), 17);
    }

    // ------------------------------------------------------------------------
    // merge
    // ------------------------------------------------------------------------

    #[test]
    fn appending_keeps_order_and_balance() {
        let g = graph();
        let list = entries(&(0..40).collect::<Vec<_>>());
        let index = build(&g, &list).unwrap();
        check(&g, &index);
        let node = g.resolve(&index).unwrap();
        assert_eq!(node.size(), 40);
        assert!(node.height() <= 8);
        assert_eq!(names(&g, &index), sorted(&list));
    }

    #[test]
    fn same_second_versions_share_a_leaf() {
        let g = graph();
        let list = entries(&[5, 5, 5]);
        let index = build(&g, &list).unwrap();
        let node = g.resolve(&index).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.size(), 3);
        assert_eq!(names(&g, &index), vec!["v0", "v1", "v2"]);
    }

    #[test]
    fn merge_is_idempotent_for_shared_versions() {
        let g = graph();
        let index = build(&g, &entries(&[1, 2, 3])).unwrap();
        let again = g.execute(merge(&g, &index, &index)).unwrap();
        assert_eq!(again.hash(), index.hash());
        let v1 = leaf("v1", "author2", 2);
        let with_dup = g.execute(merge(&g, &index, &v1)).unwrap();
        assert_eq!(g.resolve(&with_dup).unwrap().size(), 3);
    }

    #[test]
    fn merge_after_reload() {
        let g = graph();
        let list = entries(&[3, 1, 4, 1, 5, 9, 2, 6]);
        let index = build(&g, &list).unwrap();
        g.write(&index).unwrap();

        let fresh = ObjectGraph::new(g.store().clone());
        let stored: Index = ObjectRef::from_hash(index.hash());
        let late = leaf("late", "z", 7);
        let merged = fresh.execute(merge(&fresh, &stored, &late)).unwrap();
        let mut expected = list.clone();
        expected.push(("late".into(), 7));
        // Version stand-ins are not stored with the index; compare hashes.
        let want: Vec<ObjectHash> = sorted(&expected).iter().map(|n| stamp(n).hash()).collect();
        assert_eq!(check(&fresh, &merged), want);
    }

    // ------------------------------------------------------------------------
    // split_at_interval
    // ------------------------------------------------------------------------

    #[test]
    fn split_at_interval_newest_first() {
        let g = graph();
        let index = build(&g, &entries(&[0, 10, 20, 100, 110, 250])).unwrap();
        let pieces = g.execute(split_at_interval(&g, &index, Duration::seconds(100))).unwrap();
        let spans: Vec<(i64, i64)> = pieces
            .iter()
            .map(|p| {
                let node = g.resolve(p).unwrap();
                (node.min_time(), node.max_time())
            })
            .collect();
        for (min, max) in &spans {
            assert_eq!(min.div_euclid(100), max.div_euclid(100));
        }
        assert!(spans.windows(2).all(|w| w[0].0 > w[1].1));
        let total: u64 = pieces.iter().map(|p| g.resolve(p).unwrap().size()).sum();
        assert_eq!(total, 6);

        let single = leaf("a", "x", 1);
        assert!(matches!(
            g.execute(split_at_interval(&g, &single, Duration::seconds(10))),
            Err(HistoryError::Unsupported(_))
        ));
        assert!(matches!(
            g.execute(split_at_interval(&g, &index, Duration::zero())),
            Err(HistoryError::InvalidInterval(0))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn appended_index_matches_sorted_list(times in prop::collection::vec(0i64..60, 1..50)) {
            let g = graph();
            let list = entries(&times);
            let index = build(&g, &list).unwrap();
            prop_assert_eq!(check(&g, &index).len(), list.len());
            prop_assert_eq!(names(&g, &index), sorted(&list));
        }

        #[test]
        fn merging_two_indexes_matches_sorted_list(
            first in prop::collection::vec(0i64..40, 1..30),
            second in prop::collection::vec(0i64..40, 1..30),
        ) {
            let g = graph();
            let named = |prefix: &str, times: &[i64]| -> Vec<(String, i64)> {
                times.iter().enumerate().map(|(i, t)| (format!("{prefix}{i}"), *t)).collect()
            };
            let a = named("a", &first);
            let b = named("b", &second);
            let ia = build(&g, &a).unwrap();
            let ib = build(&g, &b).unwrap();
            let merged = g.execute(merge(&g, &ia, &ib)).unwrap();
            let mut all = a.clone();
            all.extend(b);
            prop_assert_eq!(check(&g, &merged).len(), all.len());
            prop_assert_eq!(names(&g, &merged), sorted(&all));
        }
    }
}
