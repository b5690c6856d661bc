//! Self-rescheduling periodic behaviors: node admission and block discovery.

use blockprop_ledger::BlockId;
use rand::seq::SliceRandom;
use rand::RngCore;
use tracing::{debug, info};

use crate::context::SimContext;
use crate::error::Result;
use crate::node::{NodeState, PeerAddress, Position};
use crate::packet::Payload;
use crate::random::{BLOCK_COLORS, BLOCK_IDS, BOOTSTRAP, DISCOVERY, POSITIONS};
use crate::telemetry::TelemetryEvent;

pub const ADMISSION: &str = "admission";
pub const DISCOVERY_CALL: &str = "discovery";

/// Queue the first admission round now and the first discovery one interval
/// later.
pub(crate) fn start(ctx: &mut SimContext) {
    let interval = ctx.settings().discovery_interval;
    ctx.schedule(ctx.now(), ADMISSION, admit);
    ctx.schedule_in(interval, DISCOVERY_CALL, discover);
}

/// Admit one batch of nodes, then reschedule while the network is short of
/// its target size.
///
/// Each new node is placed uniformly in the world square and receives an
/// address gossip signal listing a random sample of the nodes admitted
/// before it.
pub(crate) fn admit(ctx: &mut SimContext) -> Result<()> {
    let settings = ctx.settings();
    let (target, batch, size) = (
        settings.node_count,
        settings.admission_batch,
        settings.world_size,
    );
    let (bootstrap, interval) = (settings.bootstrap_peers, settings.admission_interval);

    for _ in 0..batch {
        if ctx.nodes.len() >= target {
            break;
        }

        let mut peers: Vec<PeerAddress> = ctx.nodes.iter().map(NodeState::peer_address).collect();
        let position = Position::new(
            ctx.random.next_f64(POSITIONS) * size,
            ctx.random.next_f64(POSITIONS) * size,
        );
        let address = ctx.nodes.admit(position);
        info!(node = %address, x = position.x, y = position.y, "node admitted");
        ctx.emit(TelemetryEvent::NodeCreated {
            at: ctx.now(),
            node: address,
            position,
        });

        peers.shuffle(ctx.random.stream(BOOTSTRAP));
        peers.truncate(bootstrap);
        ctx.signal(address, Payload::AddressGossip { peers });
    }

    if ctx.nodes.len() < target {
        ctx.schedule_in(interval, ADMISSION, admit);
    } else {
        debug!(at = ctx.now(), nodes = ctx.nodes.len(), "admission complete");
    }
    Ok(())
}

/// Pick a node to discover a fresh block, then reschedule. Runs for as long
/// as the simulation does.
pub(crate) fn discover(ctx: &mut SimContext) -> Result<()> {
    let interval = ctx.settings().discovery_interval;
    let addresses = ctx.nodes.addresses();

    if let Some(&node) = addresses.choose(ctx.random.stream(DISCOVERY)) {
        let mut bytes = [0u8; 8];
        ctx.random.stream(BLOCK_IDS).fill_bytes(&mut bytes);
        let block = BlockId::from_bytes(bytes);
        let hue = ctx.random.next_f64(BLOCK_COLORS) * 360.0;

        debug!(at = ctx.now(), node = %node, %block, "block discovered");
        ctx.emit(TelemetryEvent::BlockDiscovered {
            at: ctx.now(),
            node,
            block,
            hue,
        });
        ctx.signal(node, Payload::NewBlockSignal { block });
    }

    ctx.schedule_in(interval, DISCOVERY_CALL, discover);
    Ok(())
}
