//! Block identity and trust.
//!
//! A block is identified by its content id and the id of the block it
//! extends. The same content may occur several times in one tree (once per
//! branch that reaches it), so every stored copy also carries a [`LocalId`]
//! that is only meaningful inside the tree holding it.

/// Trust value of a block that is fully agreed upon.
pub const FULL_TRUST: f64 = 1.0;

/// Random content identifier of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockId(pub [u8; 8]);

impl BlockId {
    /// Create an id from raw bytes.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Create an id from an integer (big-endian).
    pub const fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

/// Tree-local identifier distinguishing copies of the same block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalId(pub u64);

/// Content identity of one block occurrence: the block and what it extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockKey {
    pub id: BlockId,
    pub prev: Option<BlockId>,
}

/// A block as stored in a ledger.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    /// Content id
    pub id: BlockId,
    /// Block this one extends (`None` for a root)
    pub prev: Option<BlockId>,
    trust: f64,
    local: LocalId,
}

impl Block {
    /// Create an untrusted block.
    pub fn new(id: BlockId, prev: Option<BlockId>) -> Self {
        Self {
            id,
            prev,
            trust: 0.0,
            local: LocalId::default(),
        }
    }

    /// Create a root block (no predecessor).
    pub fn root(id: BlockId) -> Self {
        Self::new(id, None)
    }

    /// Content identity of this occurrence.
    pub fn key(&self) -> BlockKey {
        BlockKey {
            id: self.id,
            prev: self.prev,
        }
    }

    /// Current trust in [0, 1].
    pub fn trust(&self) -> f64 {
        self.trust
    }

    /// Whether trust has saturated at [`FULL_TRUST`].
    pub fn is_fully_trusted(&self) -> bool {
        self.trust >= FULL_TRUST
    }

    /// Set trust, clamped into [0, 1]. NaN is treated as zero.
    pub fn set_trust(&mut self, trust: f64) {
        self.trust = if trust.is_nan() { 0.0 } else { trust.clamp(0.0, FULL_TRUST) };
    }

    /// Raise trust to `trust` if it is higher than the current value.
    pub fn raise_trust(&mut self, trust: f64) -> bool {
        let before = self.trust;
        self.set_trust(trust.max(before));
        self.trust > before
    }

    /// Tree-local id of this copy.
    pub fn local(&self) -> LocalId {
        self.local
    }

    pub(crate) fn with_local(mut self, local: LocalId) -> Self {
        self.local = local;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_saturates() {
        let mut block = Block::root(BlockId::from_u64(1));
        block.set_trust(3.5);
        assert_eq!(block.trust(), FULL_TRUST);
        assert!(block.is_fully_trusted());

        block.set_trust(-1.0);
        assert_eq!(block.trust(), 0.0);

        block.set_trust(f64::NAN);
        assert_eq!(block.trust(), 0.0);
    }

    #[test]
    fn raise_trust_never_lowers() {
        let mut block = Block::root(BlockId::from_u64(1));
        assert!(block.raise_trust(0.6));
        assert!(!block.raise_trust(0.2));
        assert_eq!(block.trust(), 0.6);
    }

    #[test]
    fn key_ignores_trust_and_local_id() {
        let a = Block::new(BlockId::from_u64(2), Some(BlockId::from_u64(1)));
        let mut b = a.clone().with_local(LocalId(9));
        b.set_trust(0.5);
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_short_hex() {
        let id = BlockId::from_u64(0xdead_beef_0000_0001);
        assert_eq!(id.to_string(), "deadbeef");
        assert_eq!(id.to_hex().len(), 16);
    }
}
