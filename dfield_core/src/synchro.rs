//! The per-step synchronizer of one distributed field peer.
//!
//! # Step Protocol
//!
//! ```text
//!   Idle
//!    │  set_agent_location() for every agent that ran this step
//!    ▼
//!   Classifying ── retire last step's ghosts, commit owned agents,
//!    │              release agents found in out bands
//!    ▼
//!   Publishing ─── one StepSnapshot per neighbour (fire-and-forget)
//!    ▼
//!   AwaitingNeighbours ── collector.await_step(step, neighbours)
//!    ▼
//!   Merging ────── adopt handed-over agents, install neighbour ghosts
//!    ▼
//!   Advancing ──── clear bands, step += 1
//!    ▼
//!   Idle
//! ```
//!
//! Ghosts are read-only copies kept in storage for exactly one step: the
//! border agents of each neighbour and our own agents that just left. They
//! are never scheduled and are removed at the start of the next `synchro`.

use crate::boundary::{BoundarySet, Placement};
use crate::collector::{PendingUpdateCollector, StepUpdates};
use crate::config::FieldConfig;
use crate::error::SyncError;
use crate::geometry::{CellCoordinate, PartitionGeometry};
use crate::listener::{spawn_listener, Listener};
use crate::region::{Agent, AgentEntry, AgentId, Location, Region};
use crate::scheduler::Scheduler;
use crate::snapshot::StepSnapshot;
use crate::storage::FieldStorage;
use dfield_env::MessageBus;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where the synchronizer is within the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Classifying,
    Publishing,
    AwaitingNeighbours,
    Merging,
    Advancing,
}

/// Result of one `synchro` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step completed and the field moved on to `step + 1`
    Advanced {
        step: u64,
        /// Agents adopted from neighbours
        received: usize,
        /// Agents handed to neighbours
        handed_over: usize,
    },
    /// Shutdown was requested while waiting; the step loop must stop
    Aborted { step: u64 },
}

/// One peer's partition of a distributed field.
pub struct DistributedField<A, S, B>
where
    A: Agent,
    S: FieldStorage<A>,
    B: MessageBus,
{
    config: FieldConfig,

    /// Static ownership and band layout
    geometry: PartitionGeometry,

    /// Agents classified this step
    bands: BoundarySet<A>,

    storage: S,

    bus: Arc<B>,

    /// Filled by listener threads, drained once per step
    collector: Arc<PendingUpdateCollector<StepSnapshot<A>>>,

    /// Agents this peer simulates
    owned: BTreeSet<AgentId>,

    /// Read-only copies to retire next step
    ghosts: Vec<AgentId>,

    listeners: Vec<Listener>,

    phase: SyncPhase,

    step: u64,

    publish_failures: u64,
}

impl<A, S, B> DistributedField<A, S, B>
where
    A: Agent,
    S: FieldStorage<A>,
    B: MessageBus,
{
    /// Sets up the partition for `cell`.
    ///
    /// # Errors
    /// `SyncError::Configuration` if the geometry is invalid.
    pub fn new(config: FieldConfig, cell: CellCoordinate, storage: S, bus: Arc<B>) -> Result<Self, SyncError> {
        let geometry = PartitionGeometry::from_config(&config, cell)?;
        let bands = BoundarySet::from_geometry(&geometry);
        let collector = Arc::new(PendingUpdateCollector::new(config.stall_warning()));

        debug!(
            cell = %cell,
            own = ?geometry.own(),
            neighbours = geometry.expected_neighbours(),
            "Partition ready"
        );

        Ok(Self {
            config,
            geometry,
            bands,
            storage,
            bus,
            collector,
            owned: BTreeSet::new(),
            ghosts: Vec::new(),
            listeners: Vec::new(),
            phase: SyncPhase::Idle,
            step: 0,
            publish_failures: 0,
        })
    }

    /// Creates our topics, subscribes to each neighbour and starts listeners.
    ///
    /// Every peer of a run should be connected before any of them publishes;
    /// snapshots sent to a topic nobody listens on are lost.
    pub fn connect(&mut self) -> Result<(), SyncError> {
        let prefix = self.config.topic_prefix.clone();

        for band in self.geometry.bands() {
            let topic = self.geometry.publish_topic(&prefix, band.direction);
            self.bus.create_topic(&topic, self.config.fields_per_topic)?;
        }

        for band in self.geometry.bands() {
            let Some(topic) = self.geometry.subscription_topic(&prefix, band.direction) else {
                continue;
            };
            let subscription = self.bus.subscribe(&topic)?;
            let listener = spawn_listener(
                subscription,
                self.config.field_name.clone(),
                Arc::clone(&self.collector),
            )?;
            self.listeners.push(listener);
        }

        info!(
            cell = %self.geometry.cell(),
            listeners = self.listeners.len(),
            "Connected to neighbours"
        );
        Ok(())
    }

    /// Places a new agent owned by this peer and schedules it.
    ///
    /// The location must fall inside the owned rectangle. Returns `Ok(false)`
    /// without placing anything if storage already holds an agent there.
    pub fn seed_agent<Sch: Scheduler<A>>(
        &mut self,
        agent: A,
        location: Location,
        scheduler: &mut Sch,
    ) -> Result<bool, SyncError> {
        let location = self.geometry.normalize(location);
        let id = agent.id();
        let owned = self.bands.owned_regions().any(|r| r.is_mine(location.x, location.y));
        if !owned {
            return Err(SyncError::Misclassified {
                agent: id,
                x: location.x,
                y: location.y,
            });
        }
        if !self.storage.lookup(location).is_empty() {
            debug!(agent = %id, x = location.x, y = location.y, "Seed location occupied");
            return Ok(false);
        }

        self.storage.insert(agent.clone(), location);
        self.owned.insert(id);
        scheduler.schedule_once(agent);
        Ok(true)
    }

    /// Reports where an agent ended up this step.
    ///
    /// A location outside the interior, every mine band and every out band
    /// is a geometry inconsistency: the agent is logged and dropped from
    /// this peer.
    pub fn set_agent_location(&mut self, agent: A, location: Location) -> Result<Placement, SyncError> {
        self.phase = SyncPhase::Classifying;
        let location = self.geometry.normalize(location);
        let id = agent.id();

        match self.bands.place(AgentEntry::new(agent, location)) {
            Some(placement) => Ok(placement),
            None => {
                error!(
                    agent = %id,
                    x = location.x,
                    y = location.y,
                    cell = %self.geometry.cell(),
                    "Agent location matches no region, dropping it"
                );
                self.owned.remove(&id);
                self.storage.remove(id);
                Err(SyncError::Misclassified {
                    agent: id,
                    x: location.x,
                    y: location.y,
                })
            }
        }
    }

    /// Runs the end-of-step exchange with every neighbour.
    ///
    /// Blocks until all neighbours reported for the current step, or until
    /// [`PendingUpdateCollector::force_unblock`] is called.
    pub fn synchro<Sch: Scheduler<A>>(&mut self, scheduler: &mut Sch) -> Result<StepOutcome, SyncError> {
        let step = self.step;
        let cell = self.geometry.cell();

        // ====================================================================
        // CLASSIFYING
        // ====================================================================
        self.phase = SyncPhase::Classifying;

        for id in self.ghosts.drain(..) {
            if !self.owned.contains(&id) {
                self.storage.remove(id);
            }
        }

        for entry in self.bands.owned_regions().flat_map(Region::values) {
            self.storage.insert(entry.agent.clone(), entry.location);
            self.owned.insert(entry.id());
            scheduler.schedule_once(entry.agent.clone());
        }

        let mut handed_over = 0;
        for entry in self.bands.out_regions().flat_map(Region::values) {
            // Stays visible at its new location until next step
            self.owned.remove(&entry.id());
            self.storage.insert(entry.agent.clone(), entry.location);
            self.ghosts.push(entry.id());
            handed_over += 1;
        }

        // ====================================================================
        // PUBLISHING
        // ====================================================================
        self.phase = SyncPhase::Publishing;

        for band in self.bands.bands() {
            let snapshot = StepSnapshot {
                mine: band.mine.clone(),
                out: band.out.clone(),
                step,
                sender: cell,
                direction: band.direction,
            };
            let topic = self.geometry.publish_topic(&self.config.topic_prefix, band.direction);
            if let Err(e) = publish_snapshot(self.bus.as_ref(), &self.config.field_name, &topic, &snapshot) {
                warn!(topic = %topic, step, error = %e, "Snapshot publish failed, not retrying");
                self.publish_failures += 1;
            }
        }

        // ====================================================================
        // AWAITING NEIGHBOURS
        // ====================================================================
        self.phase = SyncPhase::AwaitingNeighbours;

        let expected = self.geometry.expected_neighbours();
        let snapshots = match self.collector.await_step(step, expected) {
            Ok(StepUpdates::Complete(snapshots)) => snapshots,
            Ok(StepUpdates::Aborted) => {
                info!(cell = %cell, step, "Step aborted by shutdown");
                self.phase = SyncPhase::Idle;
                return Ok(StepOutcome::Aborted { step });
            }
            Err(e) => {
                error!(cell = %cell, step, error = %e, "Waiting for neighbours failed");
                self.phase = SyncPhase::Idle;
                return Err(e);
            }
        };

        // ====================================================================
        // MERGING
        // ====================================================================
        self.phase = SyncPhase::Merging;

        let mut received = 0;
        let mut neighbour_ghosts = Vec::new();
        for snapshot in snapshots.into_values() {
            for entry in snapshot.out.into_values() {
                self.storage.insert(entry.agent.clone(), entry.location);
                self.owned.insert(entry.id());
                scheduler.schedule_once(entry.agent);
                received += 1;
            }
            neighbour_ghosts.extend(snapshot.mine.into_values());
        }

        for entry in neighbour_ghosts {
            let id = entry.id();
            if self.owned.contains(&id) {
                continue;
            }
            self.storage.insert(entry.agent, entry.location);
            self.ghosts.push(id);
        }

        // ====================================================================
        // ADVANCING
        // ====================================================================
        self.phase = SyncPhase::Advancing;

        self.bands.clear();
        self.step += 1;
        self.phase = SyncPhase::Idle;

        debug!(
            cell = %cell,
            step,
            received,
            handed_over,
            owned = self.owned.len(),
            ghosts = self.ghosts.len(),
            "Step synchronized"
        );

        Ok(StepOutcome::Advanced {
            step,
            received,
            handed_over,
        })
    }

    /// Releases a blocked `synchro` and stops accepting updates.
    pub fn shutdown(&self) {
        self.collector.force_unblock();
    }

    /// Shuts down, ends every subscription and joins the listener threads.
    pub fn disconnect(&mut self) {
        self.collector.force_unblock();

        for listener in self.listeners.drain(..) {
            if let Err(e) = self.bus.unsubscribe(listener.topic(), listener.subscription()) {
                // The thread may still be blocked on the bus; leave it detached
                warn!(topic = %listener.topic(), error = %e, "Unsubscribe failed, detaching listener");
                continue;
            }
            if listener.join().is_err() {
                warn!("Listener thread panicked");
            }
        }
    }

    pub fn geometry(&self) -> &PartitionGeometry {
        &self.geometry
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn cell(&self) -> CellCoordinate {
        self.geometry.cell()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Shared handle, e.g. for unblocking from another thread.
    pub fn collector(&self) -> Arc<PendingUpdateCollector<StepSnapshot<A>>> {
        Arc::clone(&self.collector)
    }

    pub fn bands(&self) -> &BoundarySet<A> {
        &self.bands
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn is_owned(&self, id: AgentId) -> bool {
        self.owned.contains(&id)
    }

    /// Agents this peer currently simulates, ascending.
    pub fn owned_agents(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.owned.iter().copied()
    }

    pub fn owned_count(&self) -> usize {
        self.owned.len()
    }

    pub fn ghost_count(&self) -> usize {
        self.ghosts.len()
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures
    }
}

impl<A, S, B> Drop for DistributedField<A, S, B>
where
    A: Agent,
    S: FieldStorage<A>,
    B: MessageBus,
{
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn publish_snapshot<A: Agent, B: MessageBus>(
    bus: &B,
    sender: &str,
    topic: &str,
    snapshot: &StepSnapshot<A>,
) -> Result<(), SyncError> {
    let payload = snapshot.encode()?;
    bus.publish(topic, sender, payload).map_err(|source| SyncError::Publish {
        topic: topic.to_string(),
        step: snapshot.step,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::BandKind;
    use crate::geometry::{Direction, Topology};
    use crate::region::tests::Dot;
    use crate::scheduler::StepSchedule;
    use crate::snapshot::SenderKey;
    use crate::storage::{ContinuousStorage, SparseGridStorage};
    use dfield_env::{BusMessage, EnvError, Subscription};
    use std::collections::HashMap;
    use std::sync::{mpsc as std_mpsc, Mutex};
    use std::thread;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Delivers publishes to every subscriber of the topic and records them.
    #[derive(Default)]
    struct LoopbackBus {
        topics: Mutex<HashMap<String, Vec<(u64, mpsc::UnboundedSender<BusMessage>)>>>,
        published: Mutex<Vec<BusMessage>>,
        reject: bool,
    }

    impl LoopbackBus {
        fn rejecting() -> Self {
            Self {
                reject: true,
                ..Self::default()
            }
        }

        fn subscriber_count(&self) -> usize {
            self.topics.lock().unwrap().values().map(Vec::len).sum()
        }

        fn published_topics(&self) -> Vec<String> {
            self.published.lock().unwrap().iter().map(|m| m.topic.clone()).collect()
        }
    }

    impl MessageBus for LoopbackBus {
        fn create_topic(&self, topic: &str, _expected_publishers: usize) -> Result<(), EnvError> {
            self.topics.lock().unwrap().entry(topic.to_string()).or_default();
            Ok(())
        }

        fn subscribe(&self, topic: &str) -> Result<Subscription, EnvError> {
            let (tx, rx) = mpsc::unbounded_channel();
            let subscription = Subscription::new(topic, rx);
            self.topics
                .lock()
                .unwrap()
                .entry(topic.to_string())
                .or_default()
                .push((subscription.id(), tx));
            Ok(subscription)
        }

        fn unsubscribe(&self, topic: &str, subscription: u64) -> Result<(), EnvError> {
            if let Some(senders) = self.topics.lock().unwrap().get_mut(topic) {
                senders.retain(|(id, _)| *id != subscription);
            }
            Ok(())
        }

        fn publish(&self, topic: &str, sender: &str, payload: Vec<u8>) -> Result<(), EnvError> {
            if self.reject {
                return Err(EnvError::publish(topic, "rejected"));
            }
            let message = BusMessage::new(topic, sender, payload);
            self.published.lock().unwrap().push(message.clone());
            for (_, tx) in self.topics.lock().unwrap().get(topic).into_iter().flatten() {
                let _ = tx.send(message.clone());
            }
            Ok(())
        }
    }

    type Field = DistributedField<Dot, ContinuousStorage<Dot>, LoopbackBus>;

    fn strip_config() -> FieldConfig {
        FieldConfig::new(100, 10, 3, Topology::linear(2, false)).with_stall_warning_ms(0)
    }

    fn empty_snapshot(field: &Field, step: u64, sender: CellCoordinate, direction: Direction) -> StepSnapshot<Dot> {
        let band = field.bands().bands()[0].clone();
        StepSnapshot {
            mine: band.mine,
            out: band.out,
            step,
            sender,
            direction,
        }
    }

    #[test]
    fn test_two_peer_handover() {
        let bus = Arc::new(LoopbackBus::default());
        let mut peer0: Field =
            DistributedField::new(strip_config(), CellCoordinate::new(0, 0), ContinuousStorage::new(3.0), Arc::clone(&bus))
                .unwrap();
        let mut peer1: Field =
            DistributedField::new(strip_config(), CellCoordinate::new(0, 1), ContinuousStorage::new(3.0), Arc::clone(&bus))
                .unwrap();
        peer0.connect().unwrap();
        peer1.connect().unwrap();

        let mut sched0 = StepSchedule::new(0);
        let mut sched1 = StepSchedule::new(0);
        peer0.seed_agent(Dot::new(1), Location::new(49.0, 5.0), &mut sched0).unwrap();

        // Step 0: the agent crosses from x=49 to x=51
        for agent in sched0.take_due() {
            let placement = peer0.set_agent_location(agent, Location::new(51.0, 5.0)).unwrap();
            assert_eq!(
                placement,
                Placement::Band {
                    direction: Direction::East,
                    kind: BandKind::Out
                }
            );
        }
        let (out0, out1) = thread::scope(|s| {
            let h1 = s.spawn(|| peer1.synchro(&mut sched1));
            let out0 = peer0.synchro(&mut sched0);
            (out0, h1.join().unwrap())
        });
        assert_eq!(
            out0.unwrap(),
            StepOutcome::Advanced {
                step: 0,
                received: 0,
                handed_over: 1
            }
        );
        assert_eq!(
            out1.unwrap(),
            StepOutcome::Advanced {
                step: 0,
                received: 1,
                handed_over: 0
            }
        );
        sched0.advance();
        sched1.advance();

        assert!(peer1.is_owned(AgentId(1)));
        assert!(!peer0.is_owned(AgentId(1)));
        assert!(sched1.is_scheduled(AgentId(1)));
        assert!(sched0.is_empty());
        assert_eq!(peer1.storage().location_of(AgentId(1)), Some(Location::new(51.0, 5.0)));
        // Still visible on the sender for one step
        assert_eq!(peer0.ghost_count(), 1);

        // Step 1: the agent walks into peer 1's interior
        for agent in sched1.take_due() {
            peer1.set_agent_location(agent, Location::new(60.0, 5.0)).unwrap();
        }
        let (out0, out1) = thread::scope(|s| {
            let h1 = s.spawn(|| peer1.synchro(&mut sched1));
            let out0 = peer0.synchro(&mut sched0);
            (out0, h1.join().unwrap())
        });
        assert!(matches!(out0.unwrap(), StepOutcome::Advanced { step: 1, .. }));
        assert!(matches!(out1.unwrap(), StepOutcome::Advanced { step: 1, .. }));

        assert_eq!(peer0.storage().location_of(AgentId(1)), None);
        assert_eq!(peer0.ghost_count(), 0);
        assert_eq!(peer1.owned_count(), 1);
        assert_eq!(peer0.step(), 2);
        assert_eq!(peer1.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_border_agents_become_neighbour_ghosts() {
        let bus = Arc::new(LoopbackBus::default());
        let mut peer0: Field =
            DistributedField::new(strip_config(), CellCoordinate::new(0, 0), ContinuousStorage::new(3.0), Arc::clone(&bus))
                .unwrap();
        let mut peer1: Field =
            DistributedField::new(strip_config(), CellCoordinate::new(0, 1), ContinuousStorage::new(3.0), Arc::clone(&bus))
                .unwrap();
        peer0.connect().unwrap();
        peer1.connect().unwrap();

        let mut sched0 = StepSchedule::new(0);
        let mut sched1 = StepSchedule::new(0);
        peer0.seed_agent(Dot::new(5), Location::new(10.0, 5.0), &mut sched0).unwrap();
        for agent in sched0.take_due() {
            peer0.set_agent_location(agent, Location::new(48.5, 5.0)).unwrap();
        }

        thread::scope(|s| {
            let h1 = s.spawn(|| peer1.synchro(&mut sched1).unwrap());
            peer0.synchro(&mut sched0).unwrap();
            h1.join().unwrap();
        });

        assert!(peer0.is_owned(AgentId(5)));
        assert!(!peer1.is_owned(AgentId(5)));
        assert!(sched1.is_empty());
        assert_eq!(peer1.ghost_count(), 1);
        assert_eq!(peer1.storage().location_of(AgentId(5)), Some(Location::new(48.5, 5.0)));
        assert_eq!(peer1.storage().within(Location::new(50.0, 5.0), 3.0).len(), 1);
    }

    #[test]
    fn test_corner_exchange_waits_for_all_eight() {
        let config = FieldConfig::new(90, 90, 5, Topology::square(3, 3, false)).with_stall_warning_ms(0);
        let bus = Arc::new(LoopbackBus::default());
        let mut field: Field =
            DistributedField::new(config, CellCoordinate::new(1, 1), ContinuousStorage::new(5.0), Arc::clone(&bus)).unwrap();
        assert_eq!(field.geometry().expected_neighbours(), 8);

        let collector = field.collector();
        let neighbours = field.geometry().neighbours();
        let snapshots: Vec<(SenderKey, StepSnapshot<Dot>)> = neighbours
            .iter()
            .map(|&(direction, cell)| {
                let snapshot = empty_snapshot(&field, 0, cell, direction.opposite());
                (snapshot.key(), snapshot)
            })
            .collect();

        let (tx, rx) = std_mpsc::channel();
        let runner = thread::spawn(move || {
            let mut schedule = StepSchedule::new(0);
            let outcome = field.synchro(&mut schedule);
            tx.send(outcome.map_err(|e| e.to_string())).unwrap();
            field
        });

        // Everything but the south-east corner
        for (key, snapshot) in snapshots.iter().take(7).cloned() {
            collector.put(0, key, snapshot).unwrap();
        }
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(collector.received(0), 7);

        let (key, snapshot) = snapshots[7].clone();
        collector.put(0, key, snapshot).unwrap();
        let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("synchro did not finish");
        assert!(matches!(outcome, Ok(StepOutcome::Advanced { step: 0, .. })));

        let field = runner.join().unwrap();
        assert_eq!(field.step(), 1);
        let mut topics = bus.published_topics();
        topics.sort();
        assert_eq!(
            topics,
            vec!["1-1CDDL", "1-1CDDR", "1-1CUDL", "1-1CUDR", "1-1D", "1-1L", "1-1R", "1-1U"]
        );
    }

    #[test]
    fn test_misclassified_agent_is_dropped() {
        let config = FieldConfig::new(90, 90, 5, Topology::square(3, 3, false)).with_stall_warning_ms(0);
        let mut field: Field = DistributedField::new(
            config,
            CellCoordinate::new(1, 1),
            ContinuousStorage::new(5.0),
            Arc::new(LoopbackBus::default()),
        )
        .unwrap();
        let mut schedule = StepSchedule::new(0);
        field.seed_agent(Dot::new(3), Location::new(45.0, 45.0), &mut schedule).unwrap();

        let err = field.set_agent_location(Dot::new(3), Location::new(80.0, 45.0)).unwrap_err();

        assert!(matches!(err, SyncError::Misclassified { agent: AgentId(3), .. }));
        assert!(!field.is_owned(AgentId(3)));
        assert!(field.storage().location_of(AgentId(3)).is_none());
        assert!(field.bands().is_empty());
    }

    #[test]
    fn test_seed_outside_own_rect_is_rejected() {
        let mut field: Field = DistributedField::new(
            strip_config(),
            CellCoordinate::new(0, 0),
            ContinuousStorage::new(3.0),
            Arc::new(LoopbackBus::default()),
        )
        .unwrap();
        let mut schedule = StepSchedule::new(0);

        assert!(field.seed_agent(Dot::new(1), Location::new(50.0, 5.0), &mut schedule).is_err());
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_shutdown_aborts_the_step() {
        let mut field: Field = DistributedField::new(
            strip_config(),
            CellCoordinate::new(0, 0),
            ContinuousStorage::new(3.0),
            Arc::new(LoopbackBus::default()),
        )
        .unwrap();
        let mut schedule = StepSchedule::new(0);
        field.shutdown();

        assert_eq!(field.synchro(&mut schedule).unwrap(), StepOutcome::Aborted { step: 0 });
        assert_eq!(field.step(), 0);
        assert_eq!(field.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_publish_failure_does_not_stop_the_step() {
        let mut field: DistributedField<Dot, SparseGridStorage<Dot>, LoopbackBus> = DistributedField::new(
            strip_config(),
            CellCoordinate::new(0, 0),
            SparseGridStorage::new(),
            Arc::new(LoopbackBus::rejecting()),
        )
        .unwrap();
        let mut schedule = StepSchedule::new(0);
        field.seed_agent(Dot::new(1), Location::new(20.0, 5.0), &mut schedule).unwrap();
        for agent in schedule.take_due() {
            field.set_agent_location(agent, Location::new(21.0, 5.0)).unwrap();
        }

        let band = field.bands().bands()[0].clone();
        let reply = StepSnapshot {
            mine: band.out,
            out: band.mine,
            step: 0,
            sender: CellCoordinate::new(0, 1),
            direction: Direction::West,
        };
        field.collector().put(0, reply.key(), reply).unwrap();

        let outcome = field.synchro(&mut schedule).unwrap();

        assert!(matches!(outcome, StepOutcome::Advanced { step: 0, .. }));
        assert_eq!(field.publish_failures(), 1);
        assert!(schedule.is_scheduled(AgentId(1)));
        assert_eq!(field.storage().lookup(Location::new(21.0, 5.0)).len(), 1);
    }

    #[test]
    fn test_drop_stops_listener_threads() {
        let config = FieldConfig::new(90, 90, 5, Topology::square(3, 3, false)).with_stall_warning_ms(0);
        let bus = Arc::new(LoopbackBus::default());
        let mut field: Field =
            DistributedField::new(config, CellCoordinate::new(1, 1), ContinuousStorage::new(5.0), Arc::clone(&bus)).unwrap();
        field.connect().unwrap();

        let collector = field.collector();
        assert_eq!(bus.subscriber_count(), 8);
        assert_eq!(Arc::strong_count(&collector), 10);

        drop(field);

        // Listeners are joined in drop, so only our handle is left
        assert_eq!(Arc::strong_count(&collector), 1);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(collector.is_closed());
    }

    #[test]
    fn test_interrupted_wait_ends_the_step() {
        let mut field: Field = DistributedField::new(
            strip_config(),
            CellCoordinate::new(0, 0),
            ContinuousStorage::new(3.0),
            Arc::new(LoopbackBus::default()),
        )
        .unwrap();
        let mut schedule = StepSchedule::new(0);
        field.collector().poison();

        let err = field.synchro(&mut schedule).unwrap_err();

        assert!(matches!(err, SyncError::InterruptedWait));
        assert!(err.is_fatal());
        assert_eq!(field.phase(), SyncPhase::Idle);
        assert_eq!(field.step(), 0);

        field.shutdown();
        assert!(field.collector().is_closed());
    }

    #[test]
    fn test_seed_into_occupied_cell_is_skipped() {
        let mut field: DistributedField<Dot, SparseGridStorage<Dot>, LoopbackBus> = DistributedField::new(
            strip_config(),
            CellCoordinate::new(0, 0),
            SparseGridStorage::new(),
            Arc::new(LoopbackBus::default()),
        )
        .unwrap();
        let mut schedule = StepSchedule::new(0);

        assert!(field.seed_agent(Dot::new(1), Location::new(20.0, 5.0), &mut schedule).unwrap());
        assert!(!field.seed_agent(Dot::new(2), Location::new(20.0, 5.0), &mut schedule).unwrap());
        assert!(field.seed_agent(Dot::new(2), Location::new(21.0, 5.0), &mut schedule).unwrap());

        assert_eq!(field.owned_count(), 2);
        assert_eq!(field.storage().lookup(Location::new(20.0, 5.0)).len(), 1);
        assert_eq!(schedule.len(), 2);
    }
}
