//! stratus-ops — the batch operations Stratus runs against a cluster.
//!
//! Every operation follows the same shape: gather a live view of the
//! cluster, join it with the declared resources, then fan an action out
//! over the resulting work items.
//!
//! # Architecture
//!
//! ```text
//! Operation::execute(&Cluster)
//!   ├── gather: Cluster::topology()       list_instances + match_nodes
//!   ├── join:   stratus_topology::join_*  node × image/container/volume
//!   ├── expand: expand_rules / HostsTable
//!   └── act:    stratus_fanout::run / run_grouped → provider calls
//! ```
//!
//! Per-item failures are logged where they happen and collected by the
//! fan-out. An operation reports the first of them once every item has
//! finished.

pub mod containers;
pub mod context;
pub mod error;
pub mod nodes;
pub mod operation;
pub mod remote;
pub mod security_groups;
pub mod testing;
pub mod volumes;

use tracing::{info, warn};

use stratus_fanout::BatchReport;

pub use context::{Cluster, Providers};
pub use error::{OpsError, OpsResult};
pub use operation::{Listing, NodeContainer, Operation};
pub use remote::{RemoteShell, SshShell};

/// Close an operation: log totals and surface the first failure.
pub(crate) fn settle(
    operation: &str,
    reports: impl IntoIterator<Item = BatchReport<OpsError>>,
) -> OpsResult<()> {
    let mut attempted = 0;
    let mut failed = 0;
    let mut first = None;
    for report in reports {
        attempted += report.attempted();
        failed += report.failures().len();
        if first.is_none() {
            first = report.into_result().err();
        }
    }

    match first {
        Some(error) => {
            warn!(operation, attempted, failed, "finished with failures");
            Err(error)
        }
        None => {
            info!(operation, attempted, "finished");
            Ok(())
        }
    }
}
