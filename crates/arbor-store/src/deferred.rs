//! Lazy effect values.
//!
//! A [`Deferred`] describes a computation over the object graph without
//! running it. It is either finished, or waiting for a set of hashes plus a
//! continuation to run once they are available. Composing several deferred
//! values with [`Deferred::join_all`] merges everything they wait for into a
//! single batch, so independent lookups (all children of a trie level, all
//! nodes touched by a mutation) cost one store round trip per level.
//!
//! Nothing is read until [`crate::ObjectGraph::execute`] drives the value.
//! Dropping a deferred value before execution performs no I/O.

use arbor_types::ObjectHash;

use crate::error::StoreError;
use crate::graph::ObjectGraph;

type Resume<T, E> = Box<dyn FnOnce(&ObjectGraph) -> Deferred<T, E> + Send>;

/// A lazily evaluated result of type `T` that may fail with `E`.
#[must_use = "deferred values do nothing until executed"]
pub struct Deferred<T, E = StoreError> {
    step: Step<T, E>,
}

enum Step<T, E> {
    Done(Result<T, E>),
    Waiting {
        wants: Vec<ObjectHash>,
        resume: Resume<T, E>,
    },
}

/// Exactly one result.
pub type One<T, E = StoreError> = Deferred<T, E>;
/// Zero or one result.
pub type ZeroOrOne<T, E = StoreError> = Deferred<Option<T>, E>;
/// Any number of results.
pub type Many<T, E = StoreError> = Deferred<Vec<T>, E>;

impl<T: Send + 'static, E: Send + 'static> Deferred<T, E> {
    pub fn ready(value: T) -> Self {
        Self {
            step: Step::Done(Ok(value)),
        }
    }

    pub fn failed(error: E) -> Self {
        Self {
            step: Step::Done(Err(error)),
        }
    }

    pub fn from_result(result: Result<T, E>) -> Self {
        Self {
            step: Step::Done(result),
        }
    }

    /// Wait for `wants` to be fetched, then continue with `resume`.
    pub fn waiting(
        wants: Vec<ObjectHash>,
        resume: impl FnOnce(&ObjectGraph) -> Deferred<T, E> + Send + 'static,
    ) -> Self {
        Self {
            step: Step::Waiting {
                wants,
                resume: Box::new(resume),
            },
        }
    }

    /// Whether the value is available without further I/O.
    pub fn is_ready(&self) -> bool {
        matches!(self.step, Step::Done(_))
    }

    pub fn map<U: Send + 'static>(self, f: impl FnOnce(T) -> U + Send + 'static) -> Deferred<U, E> {
        match self.step {
            Step::Done(result) => Deferred::from_result(result.map(f)),
            Step::Waiting { wants, resume } => {
                Deferred::waiting(wants, move |graph| resume(graph).map(f))
            }
        }
    }

    pub fn try_map<U: Send + 'static>(
        self,
        f: impl FnOnce(T) -> Result<U, E> + Send + 'static,
    ) -> Deferred<U, E> {
        match self.step {
            Step::Done(result) => Deferred::from_result(result.and_then(f)),
            Step::Waiting { wants, resume } => {
                Deferred::waiting(wants, move |graph| resume(graph).try_map(f))
            }
        }
    }

    pub fn and_then<U: Send + 'static>(
        self,
        f: impl FnOnce(T) -> Deferred<U, E> + Send + 'static,
    ) -> Deferred<U, E> {
        match self.step {
            Step::Done(Ok(value)) => f(value),
            Step::Done(Err(error)) => Deferred::failed(error),
            Step::Waiting { wants, resume } => {
                Deferred::waiting(wants, move |graph| resume(graph).and_then(f))
            }
        }
    }

    pub fn map_err<F: Send + 'static>(
        self,
        f: impl FnOnce(E) -> F + Send + 'static,
    ) -> Deferred<T, F> {
        match self.step {
            Step::Done(result) => Deferred::from_result(result.map_err(f)),
            Step::Waiting { wants, resume } => {
                Deferred::waiting(wants, move |graph| resume(graph).map_err(f))
            }
        }
    }

    /// Widen the error type.
    pub fn err_into<F: From<E> + Send + 'static>(self) -> Deferred<T, F> {
        self.map_err(F::from)
    }

    /// Run two computations side by side, batching their loads.
    pub fn zip<U: Send + 'static>(self, other: Deferred<U, E>) -> Deferred<(T, U), E> {
        match (self.step, other.step) {
            (Step::Done(Err(error)), _) | (_, Step::Done(Err(error))) => Deferred::failed(error),
            (Step::Done(Ok(a)), Step::Done(Ok(b))) => Deferred::ready((a, b)),
            (Step::Done(Ok(a)), waiting) => Deferred { step: waiting }.map(move |b| (a, b)),
            (waiting, Step::Done(Ok(b))) => Deferred { step: waiting }.map(move |a| (a, b)),
            (
                Step::Waiting {
                    wants: mut wants_a,
                    resume: resume_a,
                },
                Step::Waiting {
                    wants: wants_b,
                    resume: resume_b,
                },
            ) => {
                wants_a.extend(wants_b);
                Deferred::waiting(wants_a, move |graph| resume_a(graph).zip(resume_b(graph)))
            }
        }
    }

    /// Run many computations side by side; every round fetches the union of
    /// what the still-waiting computations need in one batch.
    ///
    /// Fails with the first error encountered, in input order.
    pub fn join_all(items: Vec<Deferred<T, E>>) -> Deferred<Vec<T>, E> {
        let mut wants = Vec::new();
        let mut slots = Vec::with_capacity(items.len());
        let mut all_done = true;
        for item in items {
            match item.step {
                Step::Done(Ok(value)) => slots.push(Slot::Done(value)),
                Step::Done(Err(error)) => return Deferred::failed(error),
                Step::Waiting {
                    wants: item_wants,
                    resume,
                } => {
                    all_done = false;
                    wants.extend(item_wants);
                    slots.push(Slot::Waiting(resume));
                }
            }
        }
        if all_done {
            let values = slots
                .into_iter()
                .filter_map(|slot| match slot {
                    Slot::Done(value) => Some(value),
                    Slot::Waiting(_) => None,
                })
                .collect();
            return Deferred::ready(values);
        }
        Deferred::waiting(wants, move |graph| {
            let next = slots
                .into_iter()
                .map(|slot| match slot {
                    Slot::Done(value) => Deferred::ready(value),
                    Slot::Waiting(resume) => resume(graph),
                })
                .collect();
            Deferred::join_all(next)
        })
    }

    /// Thread `init` through `f` once per item, in order. Each call sees the
    /// result of the previous one; the first failure stops the chain.
    ///
    /// Ready steps are consumed in a loop and a waiting step resumes the rest
    /// of the chain, so the stack depth does not grow with the item count.
    pub fn fold<I, F>(init: T, items: I, f: F) -> Deferred<T, E>
    where
        I: Iterator + Send + 'static,
        F: FnMut(T, I::Item) -> Deferred<T, E> + Send + 'static,
    {
        let mut items = items;
        let mut f = f;
        let mut acc = init;
        while let Some(item) = items.next() {
            match f(acc, item).step {
                Step::Done(Ok(next)) => acc = next,
                Step::Done(Err(error)) => return Deferred::failed(error),
                Step::Waiting { wants, resume } => {
                    return Deferred::waiting(wants, move |graph| {
                        resume(graph).and_then(move |next| Deferred::fold(next, items, f))
                    });
                }
            }
        }
        Deferred::ready(acc)
    }

    pub(crate) fn into_step(self) -> Result<Result<T, E>, (Vec<ObjectHash>, Resume<T, E>)> {
        match self.step {
            Step::Done(result) => Ok(result),
            Step::Waiting { wants, resume } => Err((wants, resume)),
        }
    }
}

enum Slot<T, E> {
    Done(T),
    Waiting(Resume<T, E>),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::InMemoryObjectStore;
    use crate::object::{ObjectKind, StoredObject};
    use crate::traits::ObjectStore;

    fn graph_with(data: &[&str]) -> (Arc<InMemoryObjectStore>, ObjectGraph, Vec<ObjectHash>) {
        let store = Arc::new(InMemoryObjectStore::new());
        let hashes = data
            .iter()
            .map(|d| store.write(&StoredObject::new(ObjectKind::Node, *d)).unwrap())
            .collect();
        let graph = ObjectGraph::new(store.clone());
        store.reset_stats();
        (store, graph, hashes)
    }

    fn wait_for(hash: ObjectHash) -> Deferred<ObjectHash> {
        Deferred::waiting(vec![hash], move |_| Deferred::ready(hash))
    }

    #[test]
    fn ready_values_need_no_io() {
        let (store, graph, _) = graph_with(&[]);
        let d: Deferred<i32> = Deferred::ready(2).map(|x| x * 21);
        assert!(d.is_ready());
        assert_eq!(graph.execute(d).unwrap(), 42);
        assert_eq!(store.stats().batch_reads, 0);
    }

    #[test]
    fn dropping_before_execution_reads_nothing() {
        let (store, _graph, hashes) = graph_with(&["a"]);
        let d = wait_for(hashes[0]).map(|h| h.short());
        drop(d);
        assert_eq!(store.stats(), Default::default());
    }

    #[test]
    fn join_all_batches_one_round_per_level() {
        let (store, graph, hashes) = graph_with(&["a", "b", "c", "d"]);
        let items: Vec<_> = hashes
            .iter()
            .map(|h| wait_for(*h).and_then(|h| wait_for(h)))
            .collect();
        let result = graph.execute(Deferred::join_all(items)).unwrap();
        assert_eq!(result, hashes);
        assert_eq!(store.stats().batch_reads, 1);
    }

    #[test]
    fn join_all_fails_fast() {
        let (_, graph, _) = graph_with(&[]);
        let items: Vec<Deferred<i32>> = vec![
            Deferred::ready(1),
            Deferred::failed(StoreError::Backend("boom".into())),
        ];
        assert!(graph.execute(Deferred::join_all(items)).is_err());
    }

    #[test]
    fn zip_combines_waiting_sides() {
        let (store, graph, hashes) = graph_with(&["a", "b"]);
        let d = wait_for(hashes[0]).zip(wait_for(hashes[1]));
        assert_eq!(graph.execute(d).unwrap(), (hashes[0], hashes[1]));
        assert_eq!(store.stats().batch_reads, 1);
    }

    #[test]
    fn fold_threads_the_accumulator_in_order() {
        let (store, graph, hashes) = graph_with(&["a", "b"]);
        let d: Deferred<Vec<usize>> = Deferred::fold(Vec::new(), 0..4, move |mut acc, i| {
            acc.push(i);
            if i % 2 == 0 {
                wait_for(hashes[i / 2]).map(move |_| acc)
            } else {
                Deferred::ready(acc)
            }
        });
        assert_eq!(graph.execute(d).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(store.stats().batch_reads, 2);
    }

    #[test]
    fn fold_stops_at_the_first_failure() {
        let (_, graph, _) = graph_with(&[]);
        let d: Deferred<u32> = Deferred::fold(0, 0..10u32, |acc, i| {
            if i == 3 {
                Deferred::failed(StoreError::Backend(format!("at {acc}")))
            } else {
                Deferred::ready(acc + 1)
            }
        });
        assert!(matches!(graph.execute(d), Err(StoreError::Backend(m)) if m == "at 3"));
    }

    #[test]
    fn long_folds_keep_a_flat_stack() {
        let (_, graph, hashes) = graph_with(&["a"]);
        let hash = hashes[0];
        let ready: Deferred<u64> =
            Deferred::fold(0, 0..200_000u64, |acc, i| Deferred::ready(acc + i));
        assert_eq!(graph.execute(ready).unwrap(), 199_999 * 200_000 / 2);

        let waiting: Deferred<u64> =
            Deferred::fold(0, 0..60_000u64, move |acc, _| wait_for(hash).map(move |_| acc + 1));
        assert_eq!(graph.execute(waiting).unwrap(), 60_000);
    }

    #[test]
    fn errors_convert() {
        #[derive(Debug)]
        struct Wrapped(#[allow(dead_code)] StoreError);
        impl From<StoreError> for Wrapped {
            fn from(e: StoreError) -> Self {
                Wrapped(e)
            }
        }
        let (_, graph, _) = graph_with(&[]);
        let d: Deferred<(), Wrapped> =
            Deferred::<(), StoreError>::failed(StoreError::Backend("x".into())).err_into();
        assert!(graph.execute(d).is_err());
    }
}
