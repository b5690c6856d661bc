//! A node's view of every block it has received.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::block::{Block, BlockId, BlockKey, LocalId};
use crate::chain::BlockChain;
use crate::error::Result;

/// Branching ledger owned by one node.
///
/// Every block ever accepted stays represented in the tree until a fully
/// trusted prefix is retired with [`Ledger::trim_base`]. Clones are deep:
/// two ledgers never share branches.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ledger {
    pub(crate) chain: BlockChain,
    retired: BTreeSet<BlockId>,
    next_local: u64,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical tree.
    pub fn chain(&self) -> &BlockChain {
        &self.chain
    }

    /// True if no block is held.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Number of block occurrences (copies included).
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether a block id has been seen, including retired blocks.
    pub fn contains(&self, id: BlockId) -> bool {
        self.retired.contains(&id) || self.chain.iter().any(|b| b.id == id)
    }

    /// Ids retired by trimming.
    pub fn retired(&self) -> &BTreeSet<BlockId> {
        &self.retired
    }

    /// Distinct block ids in the tree.
    pub fn ids(&self) -> BTreeSet<BlockId> {
        self.chain.iter().map(|b| b.id).collect()
    }

    /// Distinct (id, previous id) occurrences in the tree.
    pub fn occurrences(&self) -> BTreeSet<BlockKey> {
        self.chain.iter().map(Block::key).collect()
    }

    /// Tips of every branch.
    pub fn tips(&self) -> Vec<&Block> {
        self.chain.tips()
    }

    /// Longest path from a root to a tip.
    pub fn longest_chain(&self) -> Vec<&Block> {
        self.chain.longest_path()
    }

    /// Length of the longest path.
    pub fn height(&self) -> usize {
        self.longest_chain().len()
    }

    /// Highest trust held for a block id, if present.
    pub fn trust_of(&self, id: BlockId) -> Option<f64> {
        self.chain
            .iter()
            .filter(|b| b.id == id)
            .map(Block::trust)
            .reduce(f64::max)
    }

    /// Trust per occurrence, taking the highest value among copies.
    pub fn occurrence_trust(&self) -> BTreeMap<BlockKey, f64> {
        let mut trust = BTreeMap::new();
        for block in self.chain.iter() {
            let entry = trust.entry(block.key()).or_insert(0.0_f64);
            *entry = entry.max(block.trust());
        }
        trust
    }

    /// Set trust on every copy of `id`. Returns the number of copies touched.
    pub fn set_trust(&mut self, id: BlockId, trust: f64) -> usize {
        let mut touched = 0;
        self.chain.for_each_mut(&mut |b| {
            if b.id == id {
                b.set_trust(trust);
                touched += 1;
            }
        });
        touched
    }

    /// Raise trust on every copy of one occurrence. Never lowers trust.
    pub fn raise_trust(&mut self, key: BlockKey, trust: f64) -> usize {
        let mut raised = 0;
        self.chain.for_each_mut(&mut |b| {
            if b.key() == key && b.raise_trust(trust) {
                raised += 1;
            }
        });
        raised
    }

    /// Raise every occurrence found in `trust`. Returns the number of copies
    /// whose trust went up.
    pub fn raise_trust_from(&mut self, trust: &BTreeMap<BlockKey, f64>) -> usize {
        let mut raised = 0;
        self.chain.for_each_mut(&mut |b| {
            if let Some(&value) = trust.get(&b.key()) {
                if b.raise_trust(value) {
                    raised += 1;
                }
            }
        });
        raised
    }

    /// Overwrite trust for every occurrence found in `trust`.
    pub fn assign_trust_from(&mut self, trust: &BTreeMap<BlockKey, f64>) {
        self.chain.for_each_mut(&mut |b| {
            if let Some(&value) = trust.get(&b.key()) {
                b.set_trust(value);
            }
        });
    }

    /// Add a block received from anywhere.
    ///
    /// Returns `Ok(false)` when the block id is already known. A block
    /// extending a retired block competes with history that is already
    /// settled, so it is retired on arrival and also reported as `Ok(false)`.
    /// Incoming trust is discarded; the owning node assigns its own.
    pub fn add(&mut self, mut block: Block) -> Result<bool> {
        if self.contains(block.id) {
            return Ok(false);
        }
        if block.prev.is_some_and(|prev| self.retired.contains(&prev)) {
            tracing::trace!(block = %block.id, "retired stale block on arrival");
            self.retired.insert(block.id);
            return Ok(false);
        }
        block.set_trust(0.0);
        self.insert(block);
        self.tidy()?;
        Ok(true)
    }

    /// Place a block without canonicalizing: under the first copy of its
    /// predecessor, or as a new top-level root.
    pub(crate) fn insert(&mut self, block: Block) {
        let block = block.with_local(self.fresh_local());
        let anchor = block
            .prev
            .and_then(|prev| self.chain.locate(prev).into_iter().next());

        match anchor {
            Some(pos) => {
                if let Some(chain) = self.chain.at_mut(&pos.path) {
                    chain.graft(pos.index, BlockChain::from_block(block));
                }
            }
            None => self.attach_top(BlockChain::from_block(block)),
        }
    }

    fn attach_top(&mut self, leaf: BlockChain) {
        if self.chain.is_empty() {
            self.chain = leaf;
        } else if self.chain.blocks.is_empty() {
            self.chain.branches.push(leaf);
        } else {
            let old = std::mem::take(&mut self.chain);
            self.chain.branches = vec![old, leaf];
        }
    }

    pub(crate) fn fresh_local(&mut self) -> LocalId {
        self.next_local += 1;
        LocalId(self.next_local)
    }

    /// Fully trusted path from the root.
    ///
    /// Follows the root spine while blocks are fully trusted. At a branch
    /// point it continues only if exactly one branch starts with a fully
    /// trusted block. Empty unless the tree starts at a true root. The block
    /// where the path ends is left out, so the tree keeps a single base.
    pub fn trusted_prefix(&self) -> Vec<BlockId> {
        let mut prefix = Vec::new();
        let mut chain = &self.chain;
        loop {
            for block in &chain.blocks {
                let rooted = !prefix.is_empty() || block.prev.is_none();
                if !rooted || !block.is_fully_trusted() {
                    return prefix;
                }
                prefix.push(block.id);
            }

            let at_root = prefix.is_empty();
            let mut trusted = chain.branches.iter().filter(|branch| {
                branch
                    .blocks
                    .first()
                    .is_some_and(|head| head.is_fully_trusted() && (!at_root || head.prev.is_none()))
            });
            match (trusted.next(), trusted.next()) {
                (Some(next), None) => chain = next,
                _ => {
                    prefix.pop();
                    return prefix;
                }
            }
        }
    }

    /// Retire a leading run of `prefix` blocks from the root.
    ///
    /// Where the run passes a branch point, the sibling branches it does not
    /// follow compete with settled history and are retired with it. The last
    /// block of the run is kept when the run cannot go further, so the first
    /// remaining block is a single new base. It loses its previous id.
    /// Returns the number of `prefix` blocks retired.
    pub fn trim_base(&mut self, prefix: &[BlockId]) -> Result<usize> {
        let prefix: HashSet<BlockId> = prefix.iter().copied().collect();
        if self.chain.blocks.first().is_some_and(|b| b.prev.is_some()) {
            return Ok(0);
        }

        let mut count = 0;
        let mut stale = Vec::new();
        loop {
            let chain = &mut self.chain;
            let next = chain.branches.iter().position(|branch| {
                branch.blocks.first().is_some_and(|head| prefix.contains(&head.id))
            });
            let mut take = chain
                .blocks
                .iter()
                .take_while(|b| prefix.contains(&b.id))
                .count();
            if take == chain.blocks.len() && next.is_none() {
                take = take.saturating_sub(1);
            }
            self.retired.extend(chain.blocks.drain(..take).map(|b| b.id));
            count += take;

            let (true, Some(next)) = (chain.blocks.is_empty(), next) else {
                break;
            };
            let kept = chain.branches.swap_remove(next);
            for branch in std::mem::take(&mut chain.branches) {
                stale.extend(branch.iter().map(|b| b.id));
            }
            self.chain = kept;
        }

        if count == 0 && stale.is_empty() {
            return Ok(0);
        }

        let live = self.ids();
        self.retired.extend(stale.into_iter().filter(|id| !live.contains(id)));
        if let Some(base) = self.chain.blocks.first_mut() {
            base.prev = None;
        }
        tracing::debug!(count, base = ?self.chain.blocks.first().map(|b| b.id), "trimmed ledger base");

        self.tidy()?;
        Ok(count)
    }

    /// Merge many ledgers into one synthetic view.
    ///
    /// Every live occurrence of every input is represented; trust values are
    /// carried over and the result is canonicalized once at the end. Blocks
    /// retired by any input are left out, and a block whose predecessor was
    /// retired becomes a root, so ledgers that have trimmed and ledgers that
    /// have not still line up.
    pub fn federate<'a>(ledgers: impl IntoIterator<Item = &'a Ledger>) -> Result<Ledger> {
        let ledgers: Vec<&Ledger> = ledgers.into_iter().collect();
        let mut federated = Ledger::new();
        for ledger in &ledgers {
            federated.retired.extend(ledger.retired.iter().copied());
        }

        let mut seen = BTreeSet::new();
        for ledger in ledgers {
            for block in ledger.chain.iter() {
                if federated.retired.contains(&block.id) {
                    continue;
                }
                let mut block = block.clone();
                if block.prev.is_some_and(|prev| federated.retired.contains(&prev)) {
                    block.prev = None;
                }
                if seen.insert(block.key()) {
                    federated.insert(block);
                }
            }
        }
        federated.tidy()?;
        Ok(federated)
    }
}
