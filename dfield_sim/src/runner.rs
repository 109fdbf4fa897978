//! Scenario runner - executes partition scenarios and checks the outcome.

use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld, WorldReport};

use dfield_core::{AgentId, Topology};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    #[serde(serialize_with = "serialize_name")]
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Steps completed by every peer
    pub steps_completed: u64,

    /// Agents owned across all peers at the end
    pub final_agent_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

fn serialize_name<S: serde::Serializer>(id: &ScenarioId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(id.name())
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Agents moved from one peer to another
    pub handovers: u64,

    /// Snapshots accepted by the bus
    pub snapshots_published: u64,

    /// Snapshots dropped by a blocked topic
    pub snapshots_dropped: u64,

    pub publish_failures: u64,

    pub misclassified: u64,

    /// Sum of agents seen within the aoi, over every walker move
    pub neighbours_seen: u64,

    /// Peers released by shutdown instead of finishing
    pub aborted_peers: usize,
}

impl ScenarioMetrics {
    fn from_report(report: &WorldReport) -> Self {
        let mut metrics = ScenarioMetrics {
            snapshots_published: report.bus_published,
            snapshots_dropped: report.bus_dropped,
            ..Default::default()
        };
        for peer in &report.peers {
            metrics.handovers += peer.handed_over as u64;
            metrics.publish_failures += peer.publish_failures;
            metrics.misclassified += peer.misclassified as u64;
            metrics.neighbours_seen += peer.neighbours_seen;
            if peer.aborted_at.is_some() {
                metrics.aborted_peers += 1;
            }
        }
        metrics
    }
}

/// Runs partition scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Walkers seeded per peer
    agents_per_peer: usize,

    /// Steps per run
    steps: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, agents_per_peer: usize) -> Self {
        Self {
            seed,
            agents_per_peer,
            steps: 100,
        }
    }

    /// Sets the number of steps per run.
    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps;
        self
    }

    /// World configuration for a scenario.
    pub fn config(&self, scenario: ScenarioId) -> SimConfig {
        let base = SimConfig {
            seed: self.seed,
            agents_per_peer: self.agents_per_peer,
            steps: self.steps,
            timeout: Duration::from_secs(60),
            ..Default::default()
        };

        match scenario {
            ScenarioId::TwoPeerStrip => SimConfig {
                width: 100,
                height: 10,
                aoi: 3,
                topology: Topology::linear(2, false),
                ..base
            },
            ScenarioId::Ring => SimConfig {
                width: 200,
                height: 20,
                aoi: 4,
                topology: Topology::linear(4, true),
                ..base
            },
            ScenarioId::SquareGrid => SimConfig {
                width: 90,
                height: 90,
                aoi: 5,
                topology: Topology::square(3, 3, false),
                ..base
            },
            ScenarioId::TorusGrid => SimConfig {
                width: 120,
                height: 120,
                aoi: 6,
                // 9 is a perfect square
                topology: Topology::square_from_peers(9, true).unwrap_or(Topology::square(3, 3, true)),
                ..base
            },
            ScenarioId::StalledNeighbour => SimConfig {
                width: 150,
                height: 10,
                aoi: 3,
                topology: Topology::linear(3, false),
                timeout: Duration::from_millis(500),
                stall_warning_ms: 100,
                blocked_topics: vec!["0-1R".to_string()],
                ..base
            },
        }
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("{}", scenario.description());

        let report = match SimWorld::new(self.config(scenario)).run() {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Simulation failed to run");
                return ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    steps_completed: 0,
                    final_agent_count: 0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                };
            }
        };

        let failure_reason = self.check(scenario, &report);
        let final_agent_count = report
            .peers
            .iter()
            .filter(|p| p.steps_completed == report.common_steps())
            .map(|p| p.owned_per_step.get(report.common_steps().saturating_sub(1) as usize).map_or(0, Vec::len))
            .sum();

        info!(
            scenario = scenario.name(),
            steps = report.common_steps(),
            published = report.bus_published,
            dropped = report.bus_dropped,
            "Scenario finished"
        );

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            steps_completed: report.common_steps(),
            final_agent_count,
            failure_reason,
            metrics: ScenarioMetrics::from_report(&report),
        }
    }

    /// Returns the first violated expectation, if any.
    fn check(&self, scenario: ScenarioId, report: &WorldReport) -> Option<String> {
        if let Some(peer) = report.peers.iter().find(|p| p.error.is_some()) {
            return Some(format!(
                "Peer {} failed: {}",
                peer.cell,
                peer.error.as_deref().unwrap_or("unknown")
            ));
        }

        let misclassified: usize = report.peers.iter().map(|p| p.misclassified).sum();
        if misclassified > 0 {
            return Some(format!("{} agents matched no region", misclassified));
        }

        if let Some(reason) = check_ownership(report) {
            return Some(reason);
        }

        if scenario.expects_stall() {
            if !report.timed_out {
                return Some("Peers finished despite a blocked topic".to_string());
            }
            if report.peers.iter().any(|p| p.aborted_at.is_none()) {
                return Some("A stalled peer was not released by shutdown".to_string());
            }
            if report.bus_dropped == 0 {
                return Some("Blocked topic dropped nothing".to_string());
            }
        } else {
            if report.timed_out {
                return Some("Deadline passed before every peer finished".to_string());
            }
            if let Some(peer) = report.peers.iter().find(|p| p.steps_completed != self.steps) {
                return Some(format!(
                    "Peer {} completed {} of {} steps",
                    peer.cell, peer.steps_completed, self.steps
                ));
            }
        }
        None
    }
}

/// Every agent is owned by exactly one peer after each common step.
fn check_ownership(report: &WorldReport) -> Option<String> {
    for step in 0..report.common_steps() as usize {
        let mut seen = BTreeSet::new();
        for peer in &report.peers {
            for id in &peer.owned_per_step[step] {
                if !seen.insert(*id) {
                    return Some(format!("{} owned twice after step {}", id, step));
                }
            }
        }
        if seen.len() != report.total_agents {
            return Some(format!(
                "{} of {} agents owned after step {}",
                seen.len(),
                report.total_agents,
                step
            ));
        }
    }
    None
}

/// Owned ids across all peers after a step, for comparing runs.
pub fn owned_after(report: &WorldReport, step: usize) -> BTreeSet<AgentId> {
    report
        .peers
        .iter()
        .filter_map(|p| p.owned_per_step.get(step))
        .flatten()
        .copied()
        .collect()
}
