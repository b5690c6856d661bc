//! Network-wide trust aggregation.
//!
//! Runs after every delivery. Each node's trust in a block occurrence is
//! pulled towards the network average, and once the federated view agrees
//! on a fully trusted prefix every node retires it.

use std::collections::BTreeMap;

use blockprop_ledger::{BlockId, BlockKey, Ledger, Result, FULL_TRUST};
use tracing::debug;

use crate::node::{Address, NodeStore};

/// What one aggregation pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrustReport {
    /// Distinct occurrences seen across the network
    pub occurrences: usize,
    /// Block copies whose trust went up
    pub raised: usize,
    /// Trusted prefix of the federated view, empty if nothing was retired
    pub trimmed: Vec<BlockId>,
    /// Blocks each node actually retired
    pub retired: Vec<(Address, Vec<BlockId>)>,
}

/// Average trust per occurrence across the nodes holding it.
pub(crate) fn averages(nodes: &NodeStore) -> BTreeMap<BlockKey, f64> {
    let mut sums: BTreeMap<BlockKey, (f64, u32)> = BTreeMap::new();
    for node in nodes.iter() {
        for (key, trust) in node.ledger.occurrence_trust() {
            let entry = sums.entry(key).or_insert((0.0, 0));
            entry.0 += trust;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(key, (sum, holders))| (key, sum / f64::from(holders)))
        .collect()
}

/// Federate, average, write back and trim.
///
/// Write-back takes the higher of a node's own value and the average, so no
/// block loses trust during a pass.
pub(crate) fn aggregate(nodes: &mut NodeStore) -> Result<TrustReport> {
    let averages = averages(nodes);
    let mut report = TrustReport {
        occurrences: averages.len(),
        ..TrustReport::default()
    };

    for node in nodes.iter_mut() {
        report.raised += node.ledger.raise_trust_from(&averages);
    }

    if !averages.values().any(|&trust| trust >= FULL_TRUST) {
        return Ok(report);
    }

    let mut federated = Ledger::federate(nodes.iter().map(|n| &n.ledger))?;
    federated.assign_trust_from(&averages);
    let prefix = federated.trusted_prefix();
    if prefix.is_empty() {
        return Ok(report);
    }

    for node in nodes.iter_mut() {
        let before = node.ledger.ids();
        if node.ledger.trim_base(&prefix)? > 0 {
            let after = node.ledger.ids();
            report
                .retired
                .push((node.address, before.difference(&after).copied().collect()));
        }
    }
    debug!(
        prefix = prefix.len(),
        nodes = report.retired.len(),
        "retired trusted prefix"
    );
    report.trimmed = prefix;
    Ok(report)
}
