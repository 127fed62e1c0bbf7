//! The `test` operation: run every node's reachability tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use stratus_core::NodeRecord;
use stratus_core::config::TestCase;
use stratus_fanout::{FailurePolicy, run_grouped};
use stratus_health::{ProbeOutcome, probe};

use crate::context::Cluster;
use crate::error::{OpsError, OpsResult};
use crate::settle;

/// Counts of one `test` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Run the tests of every matched node.
///
/// Nodes are tested concurrently; a node's own tests run under `policy`.
/// A mismatching body or a failed request is a per-test diagnostic: it is
/// logged, counted in the summary and never stops the remaining tests.
pub async fn run_tests(cluster: &Cluster, policy: FailurePolicy) -> OpsResult<TestSummary> {
    let topology = cluster.topology().await?;
    let groups: Vec<(&NodeRecord, Vec<&TestCase>)> = topology
        .nodes()
        .iter()
        .filter(|node| !node.node_type.tests.is_empty())
        .map(|node| (node, node.node_type.tests.iter().collect()))
        .collect();
    let total: usize = groups.iter().map(|(_, tests)| tests.len()).sum();
    info!(nodes = groups.len(), tests = total, "running tests");

    let passed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let report = run_grouped(groups, policy, |node, test| {
        let node = *node;
        let (passed, failed) = (&passed, &failed);
        async move {
            match probe(cluster.http(), &node.address, test).await {
                Ok(ProbeOutcome::Passed { status }) => {
                    passed.fetch_add(1, Ordering::Relaxed);
                    info!(node = %node.name, test = %test.name, status, "test passed");
                }
                Ok(ProbeOutcome::Mismatch { status, excerpt }) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    warn!(node = %node.name, test = %test.name, status, body = %excerpt, "test failed");
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    warn!(node = %node.name, test = %test.name, error = %e, "test in error");
                }
            }
            Ok::<_, OpsError>(())
        }
    })
    .await;
    settle("test", [report])?;

    let summary = TestSummary {
        total,
        passed: passed.into_inner(),
        failed: failed.into_inner(),
    };
    if summary.failed > 0 {
        warn!(failed = summary.failed, total, "tests finished with failures");
    } else {
        info!(passed = summary.passed, "all tests passed");
    }
    Ok(summary)
}
