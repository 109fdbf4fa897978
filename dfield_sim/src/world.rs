//! SimWorld - runs every peer of a distributed field on its own thread.
//!
//! ```text
//!   main thread                 peer threads (one per cell)
//!   ───────────                 ───────────────────────────
//!   build + connect all fields
//!   spawn peers ─────────────►  loop steps:
//!                                 run due walkers
//!                                 field.synchro()  ◄──► SimBus
//!   wait (deadline) ◄───────────  done / aborted
//!   force_unblock + close bus
//!   join, collect PeerReports
//! ```

use crate::agent::Walker;
use crate::bus::SimBus;

use dfield_core::{
    Agent, AgentId, CellCoordinate, ContinuousStorage, DistributedField, FieldConfig, FieldStorage,
    StepOutcome, StepSchedule, SyncError, Topology,
};
use dfield_env::BusController;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

type PeerField = DistributedField<Walker, ContinuousStorage<Walker>, SimBus>;

/// Errors that stop a simulation before it produces reports.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Peer setup failed: {0}")]
    Setup(#[from] SyncError),

    #[error("Failed to spawn peer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Peer {0} panicked")]
    PeerPanicked(CellCoordinate),
}

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Global field width
    pub width: u64,

    /// Global field height
    pub height: u64,

    /// Interaction radius
    pub aoi: u64,

    /// Peer layout
    pub topology: Topology,

    /// Walkers seeded on every peer
    pub agents_per_peer: usize,

    /// Steps each peer runs
    pub steps: u64,

    /// Wall-clock budget for the whole run before peers are force-unblocked
    pub timeout: Duration,

    /// Stall warning interval passed to each collector (0 disables)
    pub stall_warning_ms: u64,

    /// Topics whose publishes are dropped for the whole run
    pub blocked_topics: Vec<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            width: 100,
            height: 10,
            aoi: 3,
            topology: Topology::linear(2, false),
            agents_per_peer: 10,
            steps: 50,
            timeout: Duration::from_secs(30),
            stall_warning_ms: 1000,
            blocked_topics: Vec::new(),
        }
    }
}

impl SimConfig {
    /// Field configuration shared by every peer.
    pub fn field_config(&self) -> FieldConfig {
        FieldConfig::new(self.width, self.height, self.aoi, self.topology)
            .with_field_name("walkers")
            .with_stall_warning_ms(self.stall_warning_ms)
    }

    /// Walker stride; always below the aoi.
    pub fn max_shift(&self) -> f64 {
        self.aoi as f64 * 0.9
    }

    pub fn total_agents(&self) -> usize {
        self.topology.peer_count() as usize * self.agents_per_peer
    }
}

/// What one peer observed over the run.
#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub cell: CellCoordinate,

    /// Steps that completed `synchro`
    pub steps_completed: u64,

    /// Owned agent ids after each completed step
    pub owned_per_step: Vec<Vec<AgentId>>,

    /// Agents adopted from neighbours
    pub received: usize,

    /// Agents handed to neighbours
    pub handed_over: usize,

    /// Agents dropped by a classification miss
    pub misclassified: usize,

    pub publish_failures: u64,

    /// Sum over all walker moves of agents seen within the aoi
    pub neighbours_seen: u64,

    /// Step at which shutdown interrupted the peer
    pub aborted_at: Option<u64>,

    /// Fatal error that ended the step loop
    pub error: Option<String>,
}

impl PeerReport {
    fn new(cell: CellCoordinate) -> Self {
        Self {
            cell,
            steps_completed: 0,
            owned_per_step: Vec::new(),
            received: 0,
            handed_over: 0,
            misclassified: 0,
            publish_failures: 0,
            neighbours_seen: 0,
            aborted_at: None,
            error: None,
        }
    }

    pub fn final_owned(&self) -> usize {
        self.owned_per_step.last().map_or(0, Vec::len)
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct WorldReport {
    pub peers: Vec<PeerReport>,
    pub total_agents: usize,
    pub bus_published: u64,
    pub bus_dropped: u64,
    /// True if the deadline passed before every peer finished
    pub timed_out: bool,
}

impl WorldReport {
    /// Steps completed by every peer.
    pub fn common_steps(&self) -> u64 {
        self.peers.iter().map(|p| p.steps_completed).min().unwrap_or(0)
    }
}

/// One peer's state, moved onto its thread.
struct Peer {
    field: PeerField,
    schedule: StepSchedule<Walker>,
    rng: ChaCha8Rng,
}

impl Peer {
    fn run(mut self, steps: u64) -> PeerReport {
        let cell = self.field.cell();
        let aoi = self.field.geometry().aoi() as f64;
        let mut report = PeerReport::new(cell);

        for _ in 0..steps {
            for mut walker in self.schedule.take_due() {
                let Some(from) = self.field.storage().location_of(walker.id()) else {
                    warn!(cell = %cell, agent = %walker.id(), "Scheduled walker missing from storage");
                    continue;
                };
                let seen = self.field.storage().within(from, aoi).len().saturating_sub(1);
                report.neighbours_seen += seen as u64;

                let to = walker.step(from, seen, self.field.geometry(), &mut self.rng);
                if self.field.set_agent_location(walker, to).is_err() {
                    report.misclassified += 1;
                }
            }

            match self.field.synchro(&mut self.schedule) {
                Ok(StepOutcome::Advanced {
                    received, handed_over, ..
                }) => {
                    self.schedule.advance();
                    report.steps_completed += 1;
                    report.received += received;
                    report.handed_over += handed_over;
                    report.owned_per_step.push(self.field.owned_agents().collect());
                }
                Ok(StepOutcome::Aborted { step }) => {
                    report.aborted_at = Some(step);
                    break;
                }
                Err(e) => {
                    error!(cell = %cell, error = %e, "Peer step loop failed");
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }

        report.publish_failures = self.field.publish_failures();
        debug!(cell = %cell, steps = report.steps_completed, owned = report.final_owned(), "Peer finished");
        report
    }
}

/// Derives an independent seed per peer.
fn peer_seed(master: u64, index: usize) -> u64 {
    master.wrapping_mul(0x9e3779b97f4a7c15).wrapping_add(index as u64)
}

/// The multi-peer harness.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Bus shared by all peers
    bus: Arc<SimBus>,
}

impl SimWorld {
    /// Creates a new world with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            bus: Arc::new(SimBus::new()),
        }
    }

    pub fn bus(&self) -> &Arc<SimBus> {
        &self.bus
    }

    /// Builds, connects and seeds one field per cell.
    ///
    /// All peers are connected before any publishes, so no snapshot is lost
    /// to a missing subscriber.
    fn build_peers(&self) -> Result<Vec<Peer>, SimError> {
        let field_config = self.config.field_config();
        let mut peers = Vec::new();

        for (index, cell) in self.config.topology.cells().into_iter().enumerate() {
            let storage = ContinuousStorage::new(self.config.aoi as f64);
            let mut field = DistributedField::new(field_config.clone(), cell, storage, Arc::clone(&self.bus))?;
            field.connect()?;

            let mut schedule = StepSchedule::new(0);
            let mut rng = ChaCha8Rng::seed_from_u64(peer_seed(self.config.seed, index));
            for k in 0..self.config.agents_per_peer {
                let id = (index * self.config.agents_per_peer + k) as u64;
                // Redraw until the location is free
                loop {
                    let location = field.geometry().random_location(&mut rng);
                    let walker = Walker::new(id, self.config.max_shift());
                    if field.seed_agent(walker, location, &mut schedule)? {
                        break;
                    }
                }
            }

            peers.push(Peer { field, schedule, rng });
        }
        Ok(peers)
    }

    /// Runs every peer for `config.steps` steps.
    ///
    /// Peers still blocked when the deadline passes are force-unblocked and
    /// report where they stopped.
    pub fn run(&self) -> Result<WorldReport, SimError> {
        for topic in &self.config.blocked_topics {
            self.bus.block_topic(topic);
        }

        let peers = self.build_peers()?;
        let collectors: Vec<_> = peers.iter().map(|p| p.field.collector()).collect();
        let cells: Vec<CellCoordinate> = peers.iter().map(|p| p.field.cell()).collect();
        info!(
            peers = peers.len(),
            agents = self.config.total_agents(),
            steps = self.config.steps,
            "Starting simulation"
        );

        let (done_tx, done_rx) = mpsc::channel();
        let steps = self.config.steps;
        let mut handles: Vec<JoinHandle<PeerReport>> = Vec::new();
        for peer in peers {
            let done_tx = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("dfield-peer-{}", peer.field.cell()))
                .spawn(move || {
                    let report = peer.run(steps);
                    let _ = done_tx.send(());
                    report
                });
            match handle {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Release the peers already running before bailing out
                    collectors.iter().for_each(|c| c.force_unblock());
                    self.bus.close();
                    return Err(SimError::Spawn(e));
                }
            }
        }
        drop(done_tx);

        let deadline = Instant::now() + self.config.timeout;
        let mut finished = 0;
        let mut timed_out = false;
        while finished < handles.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match done_rx.recv_timeout(remaining) {
                Ok(()) => finished += 1,
                Err(_) => {
                    warn!(
                        finished,
                        peers = handles.len(),
                        "Simulation deadline passed, forcing shutdown"
                    );
                    timed_out = true;
                    break;
                }
            }
        }

        for collector in &collectors {
            collector.force_unblock();
        }
        self.bus.close();

        let mut reports = Vec::with_capacity(handles.len());
        for (handle, cell) in handles.into_iter().zip(cells) {
            reports.push(handle.join().map_err(|_| SimError::PeerPanicked(cell))?);
        }

        Ok(WorldReport {
            peers: reports,
            total_agents: self.config.total_agents(),
            bus_published: self.bus.published(),
            bus_dropped: self.bus.dropped(),
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn owned_sets(report: &WorldReport, step: usize) -> Vec<BTreeSet<AgentId>> {
        report
            .peers
            .iter()
            .map(|p| p.owned_per_step[step].iter().copied().collect())
            .collect()
    }

    #[test]
    fn test_two_peer_strip_conserves_agents() {
        let config = SimConfig {
            seed: 7,
            agents_per_peer: 20,
            steps: 40,
            ..Default::default()
        };
        let report = SimWorld::new(config).run().unwrap();

        assert!(!report.timed_out);
        assert_eq!(report.common_steps(), 40);
        for step in 0..40 {
            let sets = owned_sets(&report, step);
            let total: usize = sets.iter().map(BTreeSet::len).sum();
            let union: BTreeSet<AgentId> = sets.into_iter().flatten().collect();
            assert_eq!(total, 40);
            assert_eq!(union.len(), 40);
        }
        assert!(report.peers.iter().all(|p| p.misclassified == 0));
    }

    #[test]
    fn test_three_by_three_corner_traffic() {
        let config = SimConfig {
            seed: 3,
            width: 60,
            height: 60,
            aoi: 4,
            topology: Topology::square(3, 3, false),
            agents_per_peer: 12,
            steps: 30,
            ..Default::default()
        };
        let report = SimWorld::new(config).run().unwrap();

        assert_eq!(report.common_steps(), 30);
        let final_total: usize = report.peers.iter().map(PeerReport::final_owned).sum();
        assert_eq!(final_total, 108);
        // 8 + 4 * 5 + 4 * 3 snapshots per step
        assert_eq!(report.bus_published, 40 * 30);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let config = SimConfig {
            seed: 99,
            topology: Topology::linear(3, true),
            width: 90,
            agents_per_peer: 8,
            steps: 25,
            ..Default::default()
        };
        let a = SimWorld::new(config.clone()).run().unwrap();
        let b = SimWorld::new(config).run().unwrap();

        for (pa, pb) in a.peers.iter().zip(&b.peers) {
            assert_eq!(pa.owned_per_step, pb.owned_per_step);
            assert_eq!(pa.neighbours_seen, pb.neighbours_seen);
        }
    }

    #[test]
    fn test_blocked_topic_stalls_then_aborts() {
        let config = SimConfig {
            steps: 10,
            timeout: Duration::from_millis(300),
            stall_warning_ms: 50,
            blocked_topics: vec!["0-0R".to_string()],
            ..Default::default()
        };
        let report = SimWorld::new(config).run().unwrap();

        assert!(report.timed_out);
        let east = &report.peers[1];
        assert_eq!(east.steps_completed, 0);
        assert_eq!(east.aborted_at, Some(0));
        assert!(report.peers[0].publish_failures >= 1);
        assert!(report.bus_dropped >= 1);
    }
}
