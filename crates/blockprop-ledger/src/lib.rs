//! Branching Block Ledger
//!
//! Each simulated node keeps every block it has ever received in a
//! [`Ledger`]: a recursive tree of block sequences where competing
//! continuations hang off the end of a shared spine.
//!
//! # Canonical Shape
//!
//! Blocks can arrive in any order and through several paths, so after every
//! mutation the tree is rewritten until it is canonical:
//! - no empty branches and no branch points with a single child
//! - every known successor visible at every position of its predecessor
//! - orphaned copies removed once the real parent is present
//! - siblings with a common prefix merged
//!
//! # Trust
//!
//! Blocks carry a saturating trust value in [0, 1]. Once a prefix of the root
//! spine is fully trusted it can be retired with [`Ledger::trim_base`],
//! bounding growth over long runs.

mod block;
mod chain;
mod error;
mod ledger;
mod tidy;

pub use block::{Block, BlockId, BlockKey, LocalId, FULL_TRUST};
pub use chain::{BlockChain, Iter, Position};
pub use error::{LedgerError, Result};
pub use ledger::Ledger;
pub use tidy::MAX_TIDY_PASSES;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ledger_is_canonical() {
        let mut ledger = Ledger::new();
        assert_eq!(ledger.tidy(), Ok(0));
        assert!(ledger.is_empty());
        assert!(ledger.trusted_prefix().is_empty());
    }

    #[test]
    fn fork_then_trim() {
        let mut ledger = Ledger::new();
        let ids: Vec<_> = (1..=4).map(BlockId::from_u64).collect();
        ledger.add(Block::root(ids[0])).unwrap();
        ledger.add(Block::new(ids[1], Some(ids[0]))).unwrap();
        ledger.add(Block::new(ids[2], Some(ids[1]))).unwrap();
        ledger.add(Block::new(ids[3], Some(ids[1]))).unwrap();

        ledger.set_trust(ids[0], FULL_TRUST);
        ledger.set_trust(ids[1], FULL_TRUST);
        let prefix = ledger.trusted_prefix();
        assert_eq!(prefix, vec![ids[0]]);

        assert_eq!(ledger.trim_base(&prefix).unwrap(), 1);
        assert_eq!(ledger.chain().blocks()[0].id, ids[1]);
        assert_eq!(ledger.chain().blocks()[0].prev, None);
        assert_eq!(ledger.tips().len(), 2);
    }
}
