//! Deterministic randomness keyed by context name.
//!
//! Every aspect of a run that needs randomness (node positions, bootstrap
//! sampling, block ids, ...) draws from its own stream. Stream seeds are
//! derived from the run seed and the context name, so consuming more values
//! from one stream never shifts another.

use std::collections::BTreeMap;

use rand::RngCore;

/// Stream for node positions.
pub const POSITIONS: &str = "positions";
/// Stream for bootstrap peer sampling.
pub const BOOTSTRAP: &str = "bootstrap";
/// Stream choosing which node discovers the next block.
pub const DISCOVERY: &str = "discovery";
/// Stream for block content ids.
pub const BLOCK_IDS: &str = "block-ids";
/// Stream for block display colors.
pub const BLOCK_COLORS: &str = "block-colors";

/// Mulberry32: a 32-bit state generator with multiply/xorshift mixing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    /// Create a generator from a 32-bit seed.
    pub const fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Uniform value in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }
}

impl RngCore for Mulberry32 {
    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    fn next_u64(&mut self) -> u64 {
        let high = u64::from(self.next_u32());
        let low = u64::from(self.next_u32());
        (high << 32) | low
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Derive the seed of a named stream.
pub fn stream_seed(seed: u32, context: &str) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(b":");
    hasher.update(context.as_bytes());
    let hash = hasher.finalize();
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Family of independent generators sharing one run seed.
#[derive(Debug, Clone)]
pub struct RandomStreams {
    seed: u32,
    streams: BTreeMap<String, Mulberry32>,
}

impl RandomStreams {
    /// Create streams for a run seed.
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            streams: BTreeMap::new(),
        }
    }

    /// The run seed.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Generator for a context, created on first use.
    pub fn stream(&mut self, context: &str) -> &mut Mulberry32 {
        let seed = self.seed;
        self.streams
            .entry(context.to_owned())
            .or_insert_with(|| Mulberry32::new(stream_seed(seed, context)))
    }

    /// Uniform value in [0, 1) from a context.
    pub fn next_f64(&mut self, context: &str) -> f64 {
        self.stream(context).next_f64()
    }
}
