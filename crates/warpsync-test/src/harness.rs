//! Loopback cluster
//!
//! Wires a `WarpControl` server to client coordinators through in-memory
//! channels. Nothing moves until `pump` is called, so every scenario is
//! deterministic; `pump_interleaved` shuffles which client's traffic the
//! server sees first using a seeded RNG.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::debug;

use warpsync_client::{ClientWarpCoordinator, CoordinatorConfig, InboxSender, InputEdges, SimulatedTimeWarp};
use warpsync_core::{ClockTicks, ConnectionId, WarpMode, TICKS_PER_SECOND};
use warpsync_server::{MemorySubspaceStore, OutboundReceiver, ServerConfig, SubspaceSnapshot, SubspaceStore, WarpControl};
use warpsync_time::{Clock, ManualClock};
use warpsync_wire::WarpEvent;

/// Clock reading every cluster starts at
pub const CLUSTER_EPOCH: ClockTicks = ClockTicks(TICKS_PER_SECOND * 1_000_000);

/// Starting universe time of every simulated game
const GAME_START_TIME: f64 = 100.0;

/// One connected client and both ends of its link
pub struct ClusterClient {
    pub conn: ConnectionId,
    pub coordinator: ClientWarpCoordinator<SimulatedTimeWarp>,
    /// Server → client frames
    downlink: OutboundReceiver,
    /// Client → server frames
    uplink: mpsc::UnboundedReceiver<Bytes>,
    inbox: InboxSender,
}

impl ClusterClient {
    pub fn name(&self) -> &str {
        &self.coordinator.config().player_name
    }
}

pub struct WarpCluster {
    server: Arc<WarpControl>,
    clock: Arc<ManualClock>,
    store: Arc<MemorySubspaceStore>,
    mode: WarpMode,
    clients: Vec<ClusterClient>,
    next_conn: u64,
}

impl WarpCluster {
    pub fn new(mode: WarpMode) -> Self {
        Self::with_store(ServerConfig::with_mode(mode), MemorySubspaceStore::new())
    }

    pub fn with_store(config: ServerConfig, store: MemorySubspaceStore) -> Self {
        Self::with_store_at(config, store, CLUSTER_EPOCH)
    }

    pub fn with_store_at(config: ServerConfig, store: MemorySubspaceStore, start: ClockTicks) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(store);
        let mode = config.warp_mode;
        let server = Arc::new(WarpControl::new(
            config,
            store.clone() as Arc<dyn SubspaceStore>,
            clock.clone() as Arc<dyn Clock>,
        ));
        WarpCluster {
            server,
            clock,
            store,
            mode,
            clients: Vec::new(),
            next_conn: 1,
        }
    }

    /// Start from a persisted record, as after a restart
    pub fn restarted(config: ServerConfig, record: SubspaceSnapshot) -> Self {
        let start = record.epoch.epoch_clock;
        Self::with_store_at(config, MemorySubspaceStore::with_record(record), start)
    }

    pub fn server(&self) -> &Arc<WarpControl> {
        &self.server
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    pub fn store(&self) -> &MemorySubspaceStore {
        &self.store
    }

    pub fn client(&self, index: usize) -> &ClusterClient {
        &self.clients[index]
    }

    pub fn client_mut(&mut self, index: usize) -> &mut ClusterClient {
        &mut self.clients[index]
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Authenticate a new client and deliver its join handshake.
    /// Returns the client's index.
    pub fn connect(&mut self, name: &str) -> usize {
        let conn = ConnectionId::new(self.next_conn);
        self.next_conn += 1;

        let (server_tx, uplink) = mpsc::unbounded_channel();
        let coordinator = ClientWarpCoordinator::new(
            CoordinatorConfig::new(name, self.mode),
            self.clock.clone() as Arc<dyn Clock>,
            SimulatedTimeWarp::new(GAME_START_TIME),
            server_tx,
        );
        let inbox = coordinator.inbox_sender();
        let (down_tx, downlink) = mpsc::unbounded_channel();

        let placed = self.server.on_client_authenticated(conn, name, down_tx);
        debug!(conn = %conn, subspace = %placed, "client connected");
        for other in &mut self.clients {
            other.coordinator.peer_joined(name);
        }
        let mut client = ClusterClient {
            conn,
            coordinator,
            downlink,
            uplink,
            inbox,
        };
        for other in &self.clients {
            client.coordinator.peer_joined(other.name());
        }
        self.clients.push(client);
        let index = self.clients.len() - 1;
        self.tick(index, InputEdges::NONE);
        index
    }

    /// Drop a client's connection
    pub fn disconnect(&mut self, index: usize) -> ClusterClient {
        let client = self.clients.remove(index);
        self.server.on_client_disconnected(client.conn);
        for other in &mut self.clients {
            other.coordinator.remove_player(client.name());
        }
        self.pump();
        client
    }

    /// Move frames both ways until nothing is in flight.
    /// Returns how many frames moved.
    pub fn pump(&mut self) -> usize {
        let mut moved = 0;
        loop {
            let mut round = 0;
            for client in &mut self.clients {
                round += deliver_uplink(&self.server, client);
                round += deliver_downlink(client);
            }
            if round == 0 {
                return moved;
            }
            moved += round;
        }
    }

    /// Like `pump`, but the server receives client frames in a seeded random
    /// interleaving. Each client's own frames stay in order.
    pub fn pump_interleaved(&mut self, seed: u64) -> usize {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut queues: Vec<(ConnectionId, Vec<Bytes>)> = self
            .clients
            .iter_mut()
            .map(|c| {
                let mut frames = Vec::new();
                while let Ok(frame) = c.uplink.try_recv() {
                    frames.push(frame);
                }
                frames.reverse();
                (c.conn, frames)
            })
            .collect();

        let mut moved = 0;
        while queues.iter().any(|(_, q)| !q.is_empty()) {
            let pick = rng.gen_range(0..queues.len());
            let (conn, queue) = &mut queues[pick];
            if let Some(frame) = queue.pop() {
                if let Err(e) = self.server.handle_message(*conn, &frame) {
                    debug!(conn = %conn, error = %e, "server rejected frame");
                }
                moved += 1;
            }
        }
        moved + self.pump()
    }

    /// Queue an extra server event for one client, e.g. a duplicate
    pub fn inject(&self, index: usize, event: &WarpEvent) {
        if self.clients[index].inbox.send(event.encode()).is_err() {
            debug!(index, "inbox closed, injected event dropped");
        }
    }

    /// Tick one client, then pump
    pub fn tick(&mut self, index: usize, input: InputEdges) {
        self.clients[index].coordinator.tick(input);
        self.pump();
    }

    /// Tick every client without input, then pump
    pub fn tick_all(&mut self) {
        for client in &mut self.clients {
            client.coordinator.tick(InputEdges::NONE);
        }
        self.pump();
    }

    /// Let wall time pass for the clock and every game
    pub fn advance(&mut self, d: Duration) {
        self.clock.advance(d);
        for client in &mut self.clients {
            client.coordinator.game_mut().advance(d.as_secs_f64());
        }
    }
}

fn deliver_uplink(server: &WarpControl, client: &mut ClusterClient) -> usize {
    let mut moved = 0;
    while let Ok(frame) = client.uplink.try_recv() {
        if let Err(e) = server.handle_message(client.conn, &frame) {
            debug!(conn = %client.conn, error = %e, "server rejected frame");
        }
        moved += 1;
    }
    moved
}

fn deliver_downlink(client: &mut ClusterClient) -> usize {
    let mut moved = 0;
    while let Ok(frame) = client.downlink.try_recv() {
        if client.inbox.send(frame).is_ok() {
            moved += 1;
        }
    }
    moved
}
