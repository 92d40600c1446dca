//! Active master election.
//!
//! Not a consensus protocol: whichever node runs discovery applies the same
//! order-dependent tie-break locally and caches the winner in its
//! coordination store. An already flagged `master-active` entry is never
//! displaced. Different nodes may record different winners; the flag is
//! advisory unless every node agrees.

use fleet_common::{ClusterError, NodeKind, NodeStatus};

use super::store::Session;

/// Index of the entry to elect, or `None` when a master is already active
/// or no entry is a master.
pub fn pick(nodes: &[NodeStatus]) -> Option<usize> {
    if nodes.iter().any(|n| n.kind == NodeKind::MasterActive) {
        return None;
    }
    nodes.iter().position(|n| n.kind == NodeKind::Master)
}

/// Guarantee one `master-active` entry when any master is present.
/// Returns the newly elected node name, if an election happened.
pub async fn select_active_master(
    nodes: &mut [NodeStatus],
    session: &mut Session<'_>,
) -> Result<Option<String>, ClusterError> {
    let Some(idx) = pick(nodes) else {
        return Ok(None);
    };

    let name = nodes[idx].node.clone();
    session.record_active_master(&name).await?;
    nodes[idx].kind = NodeKind::MasterActive;

    tracing::info!(node = %name, url = %nodes[idx].url, "The new elected master is {}", name);
    Ok(Some(name))
}
