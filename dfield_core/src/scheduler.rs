//! Scheduling capability used by the synchronizer, plus a simple
//! next-step queue.

use crate::region::{Agent, AgentId};
use std::collections::BTreeMap;

/// The synchronizer only ever schedules agents for the next step.
pub trait Scheduler<A: Agent> {
    /// Runs `agent` once at the next step.
    fn schedule_once(&mut self, agent: A);

    fn current_step(&self) -> u64;
}

/// One-shot queue: everything scheduled now runs at the next step.
#[derive(Debug, Clone)]
pub struct StepSchedule<A> {
    step: u64,
    queue: BTreeMap<AgentId, A>,
}

impl<A: Agent> Default for StepSchedule<A> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<A: Agent> StepSchedule<A> {
    pub fn new(start_step: u64) -> Self {
        Self {
            step: start_step,
            queue: BTreeMap::new(),
        }
    }

    /// Drains the agents due at the current step, in id order.
    pub fn take_due(&mut self) -> Vec<A> {
        std::mem::take(&mut self.queue).into_values().collect()
    }

    pub fn advance(&mut self) {
        self.step += 1;
    }

    pub fn is_scheduled(&self, id: AgentId) -> bool {
        self.queue.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<A: Agent> Scheduler<A> for StepSchedule<A> {
    fn schedule_once(&mut self, agent: A) {
        self.queue.insert(agent.id(), agent);
    }

    fn current_step(&self) -> u64 {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::tests::Dot;

    #[test]
    fn test_schedule_once_deduplicates() {
        let mut schedule = StepSchedule::new(3);
        schedule.schedule_once(Dot::new(2));
        schedule.schedule_once(Dot::new(1));
        schedule.schedule_once(Dot::new(2));

        assert_eq!(schedule.len(), 2);
        assert!(schedule.is_scheduled(AgentId(1)));

        let due: Vec<u64> = schedule.take_due().into_iter().map(|d| d.id).collect();
        assert_eq!(due, vec![1, 2]);
        assert!(schedule.is_empty());
        assert_eq!(schedule.current_step(), 3);

        schedule.advance();
        assert_eq!(schedule.current_step(), 4);
    }
}
