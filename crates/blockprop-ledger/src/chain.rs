//! Recursive branching chain.
//!
//! A [`BlockChain`] is a spine of blocks followed by zero or more competing
//! continuations (branches), all attached after the last spine block. The
//! top-level chain of a ledger may have an empty spine when it holds several
//! unrelated roots.

use crate::block::{Block, BlockId, BlockKey};

/// Address of a block inside a tree: branch indices from the top, then the
/// index within that chain's spine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub path: Vec<usize>,
    pub index: usize,
}

/// Spine of blocks plus competing branches.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockChain {
    pub(crate) blocks: Vec<Block>,
    pub(crate) branches: Vec<BlockChain>,
}

impl BlockChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a single-block chain.
    pub fn from_block(block: Block) -> Self {
        Self {
            blocks: vec![block],
            branches: Vec::new(),
        }
    }

    /// The spine.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Continuations after the spine.
    pub fn branches(&self) -> &[BlockChain] {
        &self.branches
    }

    /// True when there are neither blocks nor branches.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.branches.is_empty()
    }

    /// Number of block occurrences in this subtree.
    pub fn len(&self) -> usize {
        self.blocks.len() + self.branches.iter().map(BlockChain::len).sum::<usize>()
    }

    /// All block occurrences, depth first, spine before branches.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            blocks: [].iter(),
            pending: vec![self],
        }
    }

    /// Visit every block mutably, depth first.
    pub(crate) fn for_each_mut(&mut self, f: &mut impl FnMut(&mut Block)) {
        for block in &mut self.blocks {
            f(block);
        }
        for branch in &mut self.branches {
            branch.for_each_mut(f);
        }
    }

    /// First blocks reachable from the start of this chain.
    pub fn heads(&self) -> Vec<&Block> {
        match self.blocks.first() {
            Some(first) => vec![first],
            None => self.branches.iter().flat_map(BlockChain::heads).collect(),
        }
    }

    /// Last block of every leaf chain, depth first.
    pub fn tips(&self) -> Vec<&Block> {
        if self.branches.is_empty() {
            return self.blocks.last().into_iter().collect();
        }
        self.branches.iter().flat_map(BlockChain::tips).collect()
    }

    /// Longest root-to-tip path. Ties go to the lower branch index.
    pub fn longest_path(&self) -> Vec<&Block> {
        let mut best: Vec<&Block> = Vec::new();
        for branch in &self.branches {
            let candidate = branch.longest_path();
            if candidate.len() > best.len() {
                best = candidate;
            }
        }
        self.blocks.iter().chain(best).collect()
    }

    /// Every position holding a block with `id`, depth first.
    pub fn locate(&self, id: BlockId) -> Vec<Position> {
        let mut found = Vec::new();
        self.locate_into(id, &mut Vec::new(), &mut found);
        found
    }

    fn locate_into(&self, id: BlockId, path: &mut Vec<usize>, found: &mut Vec<Position>) {
        for (index, block) in self.blocks.iter().enumerate() {
            if block.id == id {
                found.push(Position {
                    path: path.clone(),
                    index,
                });
            }
        }
        for (i, branch) in self.branches.iter().enumerate() {
            path.push(i);
            branch.locate_into(id, path, found);
            path.pop();
        }
    }

    /// Content keys of the blocks that directly follow spine index `index`.
    pub fn successors(&self, index: usize) -> Vec<BlockKey> {
        if index + 1 < self.blocks.len() {
            return vec![self.blocks[index + 1].key()];
        }
        self.branches
            .iter()
            .flat_map(BlockChain::heads)
            .map(Block::key)
            .collect()
    }

    pub(crate) fn at_mut(&mut self, path: &[usize]) -> Option<&mut BlockChain> {
        match path.split_first() {
            None => Some(self),
            Some((&i, rest)) => self.branches.get_mut(i)?.at_mut(rest),
        }
    }

    /// Attach `branch` as a continuation of spine index `index`, splitting the
    /// spine when the index is not its last block.
    pub(crate) fn graft(&mut self, index: usize, branch: BlockChain) {
        if index + 1 < self.blocks.len() {
            let tail = BlockChain {
                blocks: self.blocks.split_off(index + 1),
                branches: std::mem::take(&mut self.branches),
            };
            self.branches.push(tail);
        }
        self.branches.push(branch);
    }
}

/// Depth-first iterator over the blocks of a [`BlockChain`].
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    blocks: std::slice::Iter<'a, Block>,
    pending: Vec<&'a BlockChain>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Block;

    fn next(&mut self) -> Option<&'a Block> {
        loop {
            if let Some(block) = self.blocks.next() {
                return Some(block);
            }
            let chain = self.pending.pop()?;
            self.blocks = chain.blocks.iter();
            // Reversed so the first branch is popped first.
            self.pending.extend(chain.branches.iter().rev());
        }
    }
}

impl<'a> IntoIterator for &'a BlockChain {
    type Item = &'a Block;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
