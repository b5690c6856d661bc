//! End-to-end runs through the public API.

use std::sync::{Arc, Mutex};

use blockprop_ledger::BlockId;
use blockprop_sim::{
    Address, Collaborator, DrainOutcome, Event, FloodConfig, FloodProtocol, NodeState, NullSink,
    Outcome, Packet, Payload, Position, ProtocolError, RandomStreams, Recorder, RunState,
    SimError, Simulation, SimulationSettings, TelemetryEvent,
};
use proptest::prelude::*;

/// Records the block id of every signal it handles.
#[derive(Default)]
struct Witness {
    seen: Mutex<Vec<u64>>,
}

impl Witness {
    fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }
}

impl Collaborator for Witness {
    async fn process(
        &self,
        packet: Packet,
        state: NodeState,
        _random: &mut RandomStreams,
    ) -> Result<Outcome, ProtocolError> {
        if let Payload::NewBlockSignal { block } = packet.payload() {
            self.seen.lock().unwrap().push(u64::from_be_bytes(block.0));
        }
        Ok(Outcome {
            state,
            send: Vec::new(),
        })
    }
}

/// Fails on the first packet for node 1.
struct FaultyAtOne;

impl Collaborator for FaultyAtOne {
    async fn process(
        &self,
        packet: Packet,
        state: NodeState,
        _random: &mut RandomStreams,
    ) -> Result<Outcome, ProtocolError> {
        if state.address == Address(1) {
            return Err(ProtocolError::new(format!("rejected {:?}", packet.kind())));
        }
        Ok(Outcome {
            state,
            send: Vec::new(),
        })
    }
}

fn signal_at(node: Address, at: u64) -> Event {
    Event::deliver(
        at as f64,
        Packet::internal(
            node,
            Payload::NewBlockSignal {
                block: BlockId::from_u64(at),
            },
        ),
    )
}

fn witness_run() -> (Simulation<Witness>, Address) {
    let mut sim = Simulation::new(
        SimulationSettings::default(),
        Witness::default(),
        Arc::new(NullSink),
    )
    .unwrap();
    let node = sim.context_mut().nodes.admit(Position::new(0.0, 0.0));
    (sim, node)
}

#[tokio::test]
async fn deliveries_dispatch_in_time_order() {
    let (mut sim, node) = witness_run();
    let events = [50, 10, 30].map(|at| signal_at(node, at));

    assert_eq!(sim.enqueue(events).await.unwrap(), DrainOutcome::Idle);
    assert_eq!(sim.collaborator().seen(), vec![10, 30, 50]);
    assert_eq!(sim.context().now(), 50.0);
}

proptest! {
    #[test]
    fn dispatch_order_is_chronological(times in prop::collection::vec(0u64..1_000, 1..40)) {
        let (mut sim, node) = witness_run();
        let events: Vec<Event> = times.iter().map(|&at| signal_at(node, at)).collect();
        tokio_test::block_on(sim.enqueue(events)).unwrap();

        let mut expected = times.clone();
        expected.sort();
        prop_assert_eq!(sim.collaborator().seen(), expected);
    }
}

#[tokio::test]
async fn collaborator_fault_stops_the_run() {
    let settings = SimulationSettings {
        node_count: 3,
        ..SimulationSettings::default()
    };
    let mut sim = Simulation::start(settings, FaultyAtOne, Arc::new(NullSink)).unwrap();

    let err = sim.run().await.unwrap_err();
    match &err {
        SimError::Collaborator { node, packet, .. } => {
            assert_eq!(*node, Address(1));
            assert!(packet.contains("AddressGossip"));
        }
        other => panic!("expected collaborator error, got {other}"),
    }
    assert!(err.to_string().contains("rejected AddressGossip"));
    assert_eq!(sim.control().state(), RunState::Failed);
    assert!(matches!(sim.dequeue().await, Err(SimError::Halted { .. })));

    // The failing node is still there to inspect.
    let snapshot = sim.snapshot();
    let addresses: Vec<Address> = snapshot.nodes.iter().map(|n| n.address).collect();
    assert_eq!(addresses, vec![Address(0), Address(1)]);
}

#[tokio::test]
async fn external_pause_and_resume() {
    let (mut sim, node) = witness_run();
    sim.pause();
    assert_eq!(
        sim.enqueue([signal_at(node, 5), signal_at(node, 6)]).await.unwrap(),
        DrainOutcome::Paused
    );
    assert!(sim.collaborator().seen().is_empty());

    assert_eq!(sim.resume().await.unwrap(), DrainOutcome::Idle);
    assert_eq!(sim.collaborator().seen(), vec![5, 6]);
}

#[tokio::test]
async fn run_waits_out_a_pause() {
    let (mut sim, node) = witness_run();
    let control = sim.control().clone();
    control.pause();
    sim.context_mut().queue.push(signal_at(node, 1));

    let resumer = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        control.resume();
    });
    assert_eq!(sim.run().await.unwrap(), DrainOutcome::Idle);
    resumer.await.unwrap();
    assert_eq!(sim.collaborator().seen(), vec![1]);
}

fn flood_run(settings: SimulationSettings, config: FloodConfig) -> (Simulation<FloodProtocol>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::new());
    let sim = Simulation::start(settings, FloodProtocol::new(config), recorder.clone()).unwrap();
    (sim, recorder)
}

fn short_settings(seed: u32, node_count: usize) -> SimulationSettings {
    SimulationSettings {
        node_count,
        seed,
        discovery_interval: 1_000.0,
        stop_at: Some(8_000.0),
        ..SimulationSettings::default()
    }
}

#[tokio::test]
async fn same_seed_same_timeline() {
    let (mut a, rec_a) = flood_run(short_settings(7, 6), FloodConfig::default());
    let (mut b, rec_b) = flood_run(short_settings(7, 6), FloodConfig::default());
    a.run().await.unwrap();
    b.run().await.unwrap();

    assert!(!rec_a.is_empty());
    assert_eq!(rec_a.events(), rec_b.events());
    assert_eq!(a.snapshot(), b.snapshot());
}

#[tokio::test]
async fn different_seed_different_placement() {
    let (mut a, rec_a) = flood_run(short_settings(1, 4), FloodConfig::default());
    let (mut b, rec_b) = flood_run(short_settings(2, 4), FloodConfig::default());
    a.run().await.unwrap();
    b.run().await.unwrap();

    let placements = |events: Vec<TelemetryEvent>| -> Vec<Position> {
        events
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::NodeCreated { position, .. } => Some(position),
                _ => None,
            })
            .collect()
    };
    assert_ne!(placements(rec_a.events()), placements(rec_b.events()));
}

#[tokio::test]
async fn block_ids_do_not_depend_on_network_size() {
    let (mut small, rec_small) = flood_run(short_settings(9, 3), FloodConfig::default());
    let (mut large, rec_large) = flood_run(short_settings(9, 12), FloodConfig::default());
    small.run().await.unwrap();
    large.run().await.unwrap();

    let discovered = |events: Vec<TelemetryEvent>| -> Vec<(BlockId, f64)> {
        events
            .into_iter()
            .filter_map(|e| match e {
                TelemetryEvent::BlockDiscovered { block, hue, .. } => Some((block, hue)),
                _ => None,
            })
            .collect()
    };
    let small = discovered(rec_small.events());
    let large = discovered(rec_large.events());
    assert!(!small.is_empty());
    assert_eq!(small, large);
}

#[tokio::test]
async fn flooding_converges_and_trims() {
    let settings = SimulationSettings {
        node_count: 6,
        discovery_interval: 1_000.0,
        stop_at: Some(20_000.0),
        ..SimulationSettings::default()
    };
    let config = FloodConfig {
        max_peers: 3,
        confirmations: 3,
    };
    let (mut sim, recorder) = flood_run(settings, config);
    assert_eq!(sim.run().await.unwrap(), DrainOutcome::Horizon);

    let snapshot = sim.snapshot();
    assert_eq!(snapshot.nodes.len(), 6);
    assert_eq!(snapshot.state, RunState::Finished);
    assert!(snapshot.at <= 20_000.0);

    // Retired prefixes were announced and every ledger kept a base.
    let events = recorder.events();
    assert!(events.iter().any(|e| matches!(
        e,
        TelemetryEvent::Log { message, .. } if message.starts_with("retired trusted prefix")
    )));
    for node in sim.context().nodes.iter() {
        assert!(!node.ledger.retired().is_empty());
        assert!(node.ledger.height() >= 1);
        assert_eq!(node.ledger.chain().heads().len(), 1);
        assert!(node.ledger.chain().heads()[0].prev.is_none());
    }

    // Telemetry is emitted in logical-time order.
    let times: Vec<f64> = events.iter().map(TelemetryEvent::at).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}
