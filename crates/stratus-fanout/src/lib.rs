//! stratus-fanout — run one action across many work items.
//!
//! Every batch operation in Stratus goes through [`run`]. The caller picks
//! a [`FailurePolicy`] explicitly:
//!
//! - [`FailurePolicy::ContinueOnError`] dispatches every item at once and
//!   waits for all of them. Failures are collected, never short-circuit.
//! - [`FailurePolicy::AbortEmbedded`] runs items one after another and
//!   stops at the first failure. It is meant for the ordered steps of a
//!   single parent (a node's test cases, its copy steps); [`run_grouped`]
//!   nests a step policy inside a concurrent run across parents.
//!
//! # Architecture
//!
//! ```text
//! run_grouped(groups, policy)
//!   └── run(groups, ContinueOnError)        concurrent across parents
//!         └── run(steps, policy)            AbortEmbedded: sequential within a parent
//! ```
//!
//! Actions are plain futures polled on the calling task via
//! `join_all`; no task or thread is spawned, so actions may borrow from
//! the caller's stack (the gathered topology, host tables, config).

pub mod report;

use std::future::Future;

use futures_util::future::join_all;
use tracing::debug;

pub use report::{BatchReport, ItemFailure};

/// How a batch reacts to a failing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Attempt every item concurrently; report failures afterwards.
    ContinueOnError,
    /// Attempt items in order; skip the rest after the first failure.
    AbortEmbedded,
}

impl FailurePolicy {
    pub fn label(&self) -> &'static str {
        match self {
            FailurePolicy::ContinueOnError => "continue-on-error",
            FailurePolicy::AbortEmbedded => "abort-embedded",
        }
    }
}

/// Run `action` over `items` under `policy`.
///
/// A failing action never escapes: it is recorded in the returned
/// [`BatchReport`] together with the item's position.
pub async fn run<T, E, F, Fut>(
    items: impl IntoIterator<Item = T>,
    policy: FailurePolicy,
    action: F,
) -> BatchReport<E>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let report = match policy {
        FailurePolicy::ContinueOnError => {
            let results = join_all(items.into_iter().map(&action)).await;
            let total = results.len();
            let failures = results
                .into_iter()
                .enumerate()
                .filter_map(|(index, result)| {
                    result.err().map(|error| ItemFailure { index, error })
                })
                .collect();
            BatchReport::new(total, total, failures)
        }
        FailurePolicy::AbortEmbedded => {
            let items: Vec<T> = items.into_iter().collect();
            let total = items.len();
            let mut attempted = 0;
            let mut failures = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                attempted += 1;
                if let Err(error) = action(item).await {
                    failures.push(ItemFailure { index, error });
                    break;
                }
            }
            BatchReport::new(total, attempted, failures)
        }
    };

    debug!(
        policy = policy.label(),
        total = report.total(),
        attempted = report.attempted(),
        failed = report.failures().len(),
        "batch finished"
    );
    report
}

/// Values collected by [`gather`], in item order, plus the batch report
/// for the items that failed to produce one.
#[derive(Debug)]
pub struct Gathered<R, E> {
    pub values: Vec<R>,
    pub report: BatchReport<E>,
}

impl<R, E> Gathered<R, E> {
    /// Fail if any item failed, otherwise hand back the values.
    pub fn into_result(self) -> Result<Vec<R>, E> {
        self.report.into_result()?;
        Ok(self.values)
    }
}

/// Gather phase of a two-phase batch: run `action` over every item
/// concurrently and collect what the successful ones return.
///
/// The result is built only after every item has finished, so the act
/// phase that follows sees a complete, immutable view.
pub async fn gather<T, R, E, F, Fut>(items: impl IntoIterator<Item = T>, action: F) -> Gathered<R, E>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let results = join_all(items.into_iter().map(&action)).await;
    let total = results.len();
    let mut values = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => values.push(value),
            Err(error) => failures.push(ItemFailure { index, error }),
        }
    }

    debug!(total, failed = failures.len(), "gather finished");
    Gathered {
        values,
        report: BatchReport::new(total, total, failures),
    }
}

/// Run ordered step lists for many parents.
///
/// Parents run concurrently with [`FailurePolicy::ContinueOnError`]; the
/// steps of one parent run under `policy`. The returned report has one
/// entry per parent, carrying the parent's first failing step.
pub async fn run_grouped<K, T, E, F, Fut>(
    groups: impl IntoIterator<Item = (K, Vec<T>)>,
    policy: FailurePolicy,
    action: F,
) -> BatchReport<E>
where
    F: Fn(&K, T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let action = &action;
    run(groups, FailurePolicy::ContinueOnError, |(key, steps)| async move {
        run(steps, policy, |step| action(&key, step))
            .await
            .into_result()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn continue_on_error_attempts_every_item() {
        let calls = AtomicUsize::new(0);

        let report = run(1..=5, FailurePolicy::ContinueOnError, |i| {
            let calls = &calls;
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if i == 3 { Err(format!("item {i} failed")) } else { Ok(()) }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(report.attempted(), 5);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.first_failure(), Some(&"item 3 failed".to_string()));
        assert_eq!(report.failures()[0].index, 2);
        assert_eq!(report.into_result(), Err("item 3 failed".to_string()));
    }

    #[tokio::test]
    async fn continue_on_error_first_failure_is_in_item_order() {
        let report = run(1u32..=4, FailurePolicy::ContinueOnError, |i| async move {
            // Later items fail sooner; the report still orders by item.
            tokio::time::sleep(std::time::Duration::from_millis(u64::from(10 * (5 - i)))).await;
            if i >= 2 { Err(i) } else { Ok(()) }
        })
        .await;

        assert_eq!(report.first_failure(), Some(&2));
        assert_eq!(report.failures().len(), 3);
    }

    #[tokio::test]
    async fn continue_on_error_dispatches_items_concurrently() {
        // Every item waits for all the others: a sequential executor
        // would never get past the first one.
        let barrier = tokio::sync::Barrier::new(4);
        let report = run(0..4, FailurePolicy::ContinueOnError, |_| {
            let barrier = &barrier;
            async move {
                barrier.wait().await;
                Ok::<(), String>(())
            }
        })
        .await;

        assert!(report.is_success());
        assert_eq!(report.attempted(), 4);
    }

    #[tokio::test]
    async fn abort_embedded_stops_after_first_failure() {
        let seen = Mutex::new(Vec::new());

        let report = run(1..=5, FailurePolicy::AbortEmbedded, |i| {
            let seen = &seen;
            async move {
                seen.lock().unwrap().push(i);
                if i == 2 { Err("step 2") } else { Ok(()) }
            }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(report.total(), 5);
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.skipped(), 3);
        assert_eq!(report.first_failure(), Some(&"step 2"));
    }

    #[tokio::test]
    async fn empty_batch_is_success() {
        let report = run(Vec::<u32>::new(), FailurePolicy::ContinueOnError, |_| async {
            Err::<(), _>("never")
        })
        .await;
        assert!(report.is_success());
        assert_eq!(report.total(), 0);
    }

    #[tokio::test]
    async fn gather_keeps_item_order_and_reports_failures() {
        let gathered = gather(1u32..=5, |i| async move {
            tokio::time::sleep(std::time::Duration::from_millis(u64::from(6 - i))).await;
            if i == 4 { Err("no answer") } else { Ok(i * 10) }
        })
        .await;

        assert_eq!(gathered.values, vec![10, 20, 30, 50]);
        assert_eq!(gathered.report.attempted(), 5);
        assert_eq!(gathered.report.failures()[0].index, 3);
        assert_eq!(gathered.into_result(), Err("no answer"));
    }

    #[tokio::test]
    async fn grouped_runs_keep_order_within_a_parent() {
        let seen = Mutex::new(Vec::new());
        let groups = vec![
            ("a", vec![1, 2, 3]),
            ("b", vec![1, 2, 3]),
            ("c", vec![1]),
        ];

        let report = run_grouped(groups, FailurePolicy::AbortEmbedded, |key, step| {
            let seen = &seen;
            let key = *key;
            async move {
                seen.lock().unwrap().push((key, step));
                if key == "b" && step == 2 { Err(format!("{key}:{step}")) } else { Ok(()) }
            }
        })
        .await;

        let seen = seen.into_inner().unwrap();
        let a: Vec<_> = seen.iter().filter(|(k, _)| *k == "a").map(|(_, s)| *s).collect();
        let b: Vec<_> = seen.iter().filter(|(k, _)| *k == "b").map(|(_, s)| *s).collect();
        assert_eq!(a, vec![1, 2, 3]);
        assert_eq!(b, vec![1, 2], "b must stop after its failing step");
        assert!(seen.contains(&("c", 1)));

        assert_eq!(report.total(), 3);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].index, 1);
        assert_eq!(report.first_failure(), Some(&"b:2".to_string()));
    }

    #[tokio::test]
    async fn grouped_steps_follow_the_given_policy() {
        let seen = Mutex::new(Vec::new());
        let groups = vec![("a", vec![1, 2, 3])];

        let report = run_grouped(groups, FailurePolicy::ContinueOnError, |_, step| {
            let seen = &seen;
            async move {
                seen.lock().unwrap().push(step);
                if step == 1 { Err("first step") } else { Ok(()) }
            }
        })
        .await;

        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(report.into_result(), Err("first step"));
    }
}
