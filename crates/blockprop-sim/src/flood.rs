//! Reference protocol: gossip-built mesh, longest-chain mining and block
//! flooding.
//!
//! Deliberately simple. It exists so the engine can be run and visualized
//! without a real consensus implementation plugged in.

use blockprop_ledger::{Block, BlockId, BlockKey, Ledger};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::node::{Address, NodeState, PeerAddress};
use crate::packet::{Packet, Payload};
use crate::protocol::{Collaborator, Outcome, Outgoing, ProtocolError};
use crate::random::RandomStreams;

/// Tuning for [`FloodProtocol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    /// Peers a node connects to on its own initiative
    pub max_peers: usize,
    /// Blocks on top of a block before it is fully trusted
    pub confirmations: usize,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            max_peers: 4,
            confirmations: 6,
        }
    }
}

/// Floods every newly seen block to all peers.
///
/// - Address gossip: connect to listed addresses up to `max_peers`, always
///   accepting the sender of an introduction. Every new connection is
///   greeted with an introduction and the full ledger.
/// - Block transfer: add unseen blocks and forward them to every peer except
///   the sender.
/// - New block signal: mine on the tip of the longest chain and send the
///   block to all peers.
///
/// After each packet, blocks on the longest chain are trusted in proportion
/// to how many blocks sit on top of them.
#[derive(Debug, Clone, Default)]
pub struct FloodProtocol {
    config: FloodConfig,
}

impl FloodProtocol {
    pub fn new(config: FloodConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FloodConfig {
        &self.config
    }

    fn on_gossip(
        &self,
        from: Option<Address>,
        peers: Vec<PeerAddress>,
        state: &mut NodeState,
    ) -> Vec<Outgoing> {
        let mut send = Vec::new();
        for peer in peers {
            let introduced = from == Some(peer.address);
            if !introduced && state.peers.len() >= self.config.max_peers {
                continue;
            }
            if !state.connect(&peer) {
                continue;
            }
            send.push(Outgoing::new(
                peer.address,
                Payload::AddressGossip {
                    peers: vec![state.peer_address()],
                },
            ));
            if !state.ledger.is_empty() {
                send.push(Outgoing::new(
                    peer.address,
                    Payload::BlockTransfer {
                        blocks: state.ledger.chain().iter().cloned().collect(),
                    },
                ));
            }
        }
        send
    }

    fn on_blocks(
        &self,
        from: Option<Address>,
        blocks: Vec<Block>,
        state: &mut NodeState,
    ) -> Result<Vec<Outgoing>, ProtocolError> {
        let mut fresh = Vec::new();
        for block in blocks {
            if add(&mut state.ledger, block.clone())? {
                fresh.push(block);
            }
        }
        if fresh.is_empty() {
            return Ok(Vec::new());
        }
        Ok(state
            .peers
            .keys()
            .filter(|&&peer| Some(peer) != from)
            .map(|&peer| Outgoing::new(peer, Payload::BlockTransfer { blocks: fresh.clone() }))
            .collect())
    }

    fn on_signal(&self, id: BlockId, state: &mut NodeState) -> Result<Vec<Outgoing>, ProtocolError> {
        let prev = state.ledger.longest_chain().last().map(|b| b.id);
        let block = Block::new(id, prev);
        if !add(&mut state.ledger, block.clone())? {
            return Ok(Vec::new());
        }
        trace!(node = %state.address, block = %block.id, "mined");
        Ok(state
            .peers
            .keys()
            .map(|&peer| {
                Outgoing::new(
                    peer,
                    Payload::BlockTransfer {
                        blocks: vec![block.clone()],
                    },
                )
            })
            .collect())
    }

    /// Raise trust along the longest chain by confirmation depth.
    fn confirm(&self, ledger: &mut Ledger) {
        let confirmations = self.config.confirmations.max(1) as f64;
        let chain: Vec<BlockKey> = ledger.longest_chain().iter().map(|b| b.key()).collect();
        let len = chain.len();
        for (i, key) in chain.into_iter().enumerate() {
            let depth = (len - 1 - i) as f64;
            ledger.raise_trust(key, (depth / confirmations).min(1.0));
        }
    }
}

fn add(ledger: &mut Ledger, block: Block) -> Result<bool, ProtocolError> {
    ledger
        .add(block)
        .map_err(|err| ProtocolError::new(err.to_string()))
}

impl Collaborator for FloodProtocol {
    async fn process(
        &self,
        packet: Packet,
        mut state: NodeState,
        _random: &mut RandomStreams,
    ) -> Result<Outcome, ProtocolError> {
        let from = (!packet.is_internal()).then(|| packet.from());
        let send = match packet.into_payload() {
            Payload::AddressGossip { peers } => self.on_gossip(from, peers, &mut state),
            Payload::BlockTransfer { blocks } => self.on_blocks(from, blocks, &mut state)?,
            Payload::NewBlockSignal { block } => self.on_signal(block, &mut state)?,
        };
        self.confirm(&mut state.ledger);
        Ok(Outcome { state, send })
    }
}
