use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use crate::simulation::id::Id;
use crate::simulation::network::Link;

pub mod route_agent;

/// Type marker for ids of simulated persons.
#[derive(Debug)]
pub struct Person;

/// The driver-like capabilities the network loading needs from an agent. Whatever agent state
/// machine the surrounding simulation uses implements this trait; the network only ever owns agents
/// while they are located on one of its links.
pub trait NetworkAgent: Debug + Send {
    fn id(&self) -> &Id<Person>;

    /// The mode of the current leg. Selects the travel time provider.
    fn mode(&self) -> &Id<String>;

    fn curr_link_id(&self) -> Option<&Id<Link>>;

    fn destination_link_id(&self) -> &Id<Link>;

    /// The link the agent wants to enter after its current link, or None if the current link is
    /// the last link of its route.
    fn choose_next_link_id(&self) -> Option<Id<Link>>;

    /// Called when the agent is moved over a node onto `new_link_id`.
    fn notify_move_over_node(&mut self, new_link_id: &Id<Link>);

    /// Called when the agent has reached its destination link. The agent is handed to the
    /// [AgentStateArranger] right after.
    fn end_leg_and_compute_next_state(&mut self, now: u32);

    /// Called when the agent is removed from the network as stuck or lost.
    fn set_state_to_abort(&mut self, now: u32);
}

/// Receives agents which leave the network, either because their leg ended or because they were
/// aborted.
pub trait AgentStateArranger<A>: Send + Sync {
    fn arrange_next_agent_state(&self, agent: A);
}

/// Collects all agents it receives. Useful if the caller processes arrived agents after a time
/// step, and for tests.
#[derive(Debug)]
pub struct AgentCollector<A> {
    agents: Mutex<Vec<A>>,
}

impl<A> Default for AgentCollector<A> {
    fn default() -> Self {
        AgentCollector {
            agents: Mutex::new(Vec::new()),
        }
    }
}

impl<A> AgentCollector<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<A> {
        std::mem::take(&mut *self.agents.lock())
    }

    pub fn len(&self) -> usize {
        self.agents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.lock().is_empty()
    }
}

impl<A: Send> AgentStateArranger<A> for AgentCollector<A> {
    fn arrange_next_agent_state(&self, agent: A) {
        self.agents.lock().push(agent);
    }
}

/// Global bookkeeping of agents. Living agents are agents which are still part of the
/// simulation, lost agents were removed as stuck.
#[derive(Debug, Default)]
pub struct AgentCounter {
    living: AtomicI64,
    lost: AtomicI64,
}

impl AgentCounter {
    pub fn new(living: i64) -> Self {
        AgentCounter {
            living: AtomicI64::new(living),
            lost: AtomicI64::new(0),
        }
    }

    pub fn dec_living(&self) {
        self.living.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn living(&self) -> i64 {
        self.living.load(Ordering::Relaxed)
    }

    pub fn lost(&self) -> i64 {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn reset(&self, living: i64) {
        self.living.store(living, Ordering::Relaxed);
        self.lost.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use crate::simulation::agents::{AgentCollector, AgentCounter, AgentStateArranger};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counter_concurrent_updates() {
        let counter = Arc::new(AgentCounter::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        counter.inc_lost();
                        counter.dec_living();
                    }
                })
            })
            .collect();
        handles.into_iter().for_each(|h| h.join().unwrap());

        assert_eq!(600, counter.living());
        assert_eq!(400, counter.lost());

        counter.reset(3);
        assert_eq!(3, counter.living());
        assert_eq!(0, counter.lost());
    }

    #[test]
    fn collector_takes_all() {
        let collector = AgentCollector::new();
        collector.arrange_next_agent_state(1);
        collector.arrange_next_agent_state(2);

        assert_eq!(2, collector.len());
        assert_eq!(vec![1, 2], collector.take());
        assert!(collector.is_empty());
    }
}
