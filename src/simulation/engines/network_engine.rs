use std::sync::{Arc, Barrier};
use std::thread;

use nohash_hasher::IntSet;
use tracing::{info, instrument, warn};

use crate::simulation::agents::{AgentCounter, AgentStateArranger, NetworkAgent};
use crate::simulation::config::{self, Config};
use crate::simulation::engines::ComputationalEnvironment;
use crate::simulation::error::{NetworkLoadingError, NetworkLoadingResult, Rejected};
use crate::simulation::events::EventsManager;
use crate::simulation::id::Id;
use crate::simulation::network::sim_network::SimNetwork;
use crate::simulation::network::{Link, Network};
use crate::simulation::travel_time::TravelTimes;

/// What happened during one time step, summed over all partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    pub now: u32,
    pub moved_links: usize,
    pub moved_nodes: usize,
    /// Agents pulled from a link by a node.
    pub moved_agents: usize,
}

impl StepStats {
    fn merge(self, other: StepStats) -> StepStats {
        StepStats {
            now: self.now,
            moved_links: self.moved_links + other.moved_links,
            moved_nodes: self.moved_nodes + other.moved_nodes,
            moved_agents: self.moved_agents + other.moved_agents,
        }
    }
}

/// Returned by the caller of [NetworkEngine::run] before every time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    /// More agents may be added in later time steps.
    Continue,
    /// No more agents will be added. With `stop_when_empty`, the run ends once the network is
    /// empty.
    Exhausted,
    /// Ends the run before the current time step.
    Stop,
}

/// Moves agents over the network, one time step at a time. Only active links and nodes are
/// touched. Each time step, every partition first moves its active links, then all partitions
/// wait for each other, then every partition moves its active nodes.
#[derive(Debug)]
pub struct NetworkEngine<A: NetworkAgent> {
    network: SimNetwork<A>,
    env: ComputationalEnvironment<A>,
    config: config::Simulation,
}

impl<A: NetworkAgent + 'static> NetworkEngine<A> {
    /// Fails if one of the simulated modes has no travel time.
    pub fn new(
        network: &Network,
        config: &Config,
        travel_times: TravelTimes,
        events: Arc<EventsManager>,
        counter: Arc<AgentCounter>,
        arranger: Arc<dyn AgentStateArranger<A>>,
    ) -> NetworkLoadingResult<Self> {
        let modes = config.network_modes();
        if modes.is_empty() {
            travel_times.validate(&Self::link_modes(network))?;
        } else {
            travel_times.validate(&modes)?;
        }

        let num_parts = config.partitioning.num_parts.max(1);
        let sim_network = if network.num_parts() == num_parts {
            SimNetwork::from_network(network, &modes)
        } else {
            info!(
                "Partitioning network into {num_parts} parts with method {:?}.",
                config.partitioning.method
            );
            let mut network = network.clone();
            network.partition(num_parts, config.partitioning.method);
            SimNetwork::from_network(&network, &modes)
        };

        let mut sim_config = config.simulation.clone();
        if sim_config.time_step == 0 {
            warn!("Time step of 0 is not possible. Using 1 instead.");
            sim_config.time_step = 1;
        }

        Ok(NetworkEngine {
            network: sim_network,
            env: ComputationalEnvironment::new(events, travel_times, counter, arranger),
            config: sim_config,
        })
    }

    fn link_modes(network: &Network) -> IntSet<Id<String>> {
        network
            .links()
            .iter()
            .flat_map(|l| l.modes.iter().cloned())
            .collect()
    }

    /// An agent ends an activity on `link_id` and starts a leg. If the link is already the
    /// destination of the leg, the leg ends right away and the agent never enters the network.
    /// Returns whether the agent was put onto the network.
    pub fn handle_departure(
        &self,
        mut agent: A,
        link_id: &Id<Link>,
        now: u32,
    ) -> Result<bool, Rejected<A>> {
        let Some(link) = self.network.try_link(link_id) else {
            return Err(Rejected::new(
                agent,
                NetworkLoadingError::UnknownLink(link_id.clone()),
            ));
        };
        if self.env.travel_times().get(agent.mode()).is_none() {
            let mode = agent.mode().clone();
            return Err(Rejected::new(
                agent,
                NetworkLoadingError::MissingTravelTime(mode),
            ));
        }

        if link_id == agent.destination_link_id() && agent.choose_next_link_id().is_none() {
            agent.end_leg_and_compute_next_state(now);
            self.env.arrange_next_agent_state(agent);
            return Ok(false);
        }

        link.add_departing_agent(agent, now, &self.network, &self.env);
        Ok(true)
    }

    /// Puts an agent which was moved over a node outside of this engine onto `link_id`.
    pub fn add_agent_from_intersection(
        &self,
        agent: A,
        link_id: &Id<Link>,
        now: u32,
    ) -> Result<(), Rejected<A>> {
        match self.network.try_link(link_id) {
            Some(link) => link.add_agent_from_intersection(agent, now, &self.network, &self.env),
            None => Err(Rejected::new(
                agent,
                NetworkLoadingError::UnknownLink(link_id.clone()),
            )),
        }
    }

    /// Moves all active links, then all active nodes. Partitions run on their own threads if
    /// there is more than one.
    pub fn do_sim_step(&self, now: u32) -> NetworkLoadingResult<StepStats> {
        let num_parts = self.network.num_parts();
        let results: Vec<NetworkLoadingResult<StepStats>> = if num_parts == 1 {
            vec![self.move_partition(0, now, None)]
        } else {
            let barrier = Barrier::new(num_parts);
            let dispatch = tracing::dispatcher::get_default(|d| d.clone());
            thread::scope(|s| {
                let handles: Vec<_> = (0..num_parts)
                    .map(|part| {
                        let barrier = &barrier;
                        let dispatch = dispatch.clone();
                        s.spawn(move || {
                            tracing::dispatcher::with_default(&dispatch, || {
                                self.move_partition(part, now, Some(barrier))
                            })
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect()
            })
        };

        results
            .into_iter()
            .try_fold(StepStats { now, ..StepStats::default() }, |acc, r| {
                r.map(|stats| acc.merge(stats))
            })
    }

    fn move_partition(
        &self,
        part: usize,
        now: u32,
        barrier: Option<&Barrier>,
    ) -> NetworkLoadingResult<StepStats> {
        let moved_links = self.network.move_links(part, now, &self.env);

        // nodes pull agents which links of the same time step have released
        if let Some(barrier) = barrier {
            barrier.wait();
        }

        let (moved_nodes, moved_agents) = self.network.move_nodes(part, now, &self.env)?;
        Ok(StepStats {
            now,
            moved_links,
            moved_nodes,
            moved_agents,
        })
    }

    /// Runs from the configured start time to the end time. `control` is called before every time
    /// step. It may add agents to the network and tells the engine whether more agents will
    /// follow. Agents still on the network afterwards are removed as stuck. Returns the time at
    /// which the simulation stopped.
    #[instrument(level = "info", skip_all)]
    pub fn run(
        &self,
        mut control: impl FnMut(&Self, u32) -> RunControl,
    ) -> NetworkLoadingResult<u32> {
        let start = self.config.start_time;
        let end = self.config.end_time;
        info!(
            "Starting network loading from {start} to {end} with {} partitions.",
            self.network.num_parts()
        );

        let mut now = start;
        let mut next_progress = start;
        while now < end {
            let exhausted = match control(self, now) {
                RunControl::Stop => {
                    info!("Stopping network loading at {now}.");
                    break;
                }
                RunControl::Exhausted => true,
                RunControl::Continue => false,
            };

            let stats = self.do_sim_step(now)?;

            if self.config.progress_interval > 0 && now >= next_progress {
                self.log_progress(&stats);
                next_progress = now.saturating_add(self.config.progress_interval);
            }

            now = now.saturating_add(self.config.time_step);

            if self.config.stop_when_empty && exhausted && self.network.agents_on_network() == 0 {
                info!("No agents left on the network at {now}.");
                break;
            }
        }

        self.after_sim(now);
        Ok(now)
    }

    fn log_progress(&self, stats: &StepStats) {
        info!(
            "#{}: links: {} active {} moved, nodes: {} active {} moved, agents: {} on network {} living {} lost",
            stats.now,
            self.network.active_links(),
            stats.moved_links,
            self.network.active_nodes(),
            stats.moved_nodes,
            self.network.agents_on_network(),
            self.env.counter().living(),
            self.env.counter().lost()
        );
    }

    /// Removes all agents which are still on the network as stuck. Returns their number.
    pub fn after_sim(&self, now: u32) -> usize {
        let stuck = self.network.clear_agents(now, &self.env);
        if stuck > 0 {
            warn!("Removed {stuck} stuck agents from the network at {now}.");
        }
        info!(
            "Network loading finished at {now}. Living agents: {}, lost agents: {}.",
            self.env.counter().living(),
            self.env.counter().lost()
        );
        stuck
    }

    /// Prepares the engine for another run. Agents which are still on the network are dropped
    /// without any events.
    pub fn reset(&self) {
        let dropped = self.network.reset();
        if dropped > 0 {
            warn!("Dropped {dropped} agents while resetting the network engine.");
        }
    }

    pub fn active_links(&self) -> usize {
        self.network.active_links()
    }

    pub fn active_nodes(&self) -> usize {
        self.network.active_nodes()
    }

    pub fn agents_on_network(&self) -> usize {
        self.network.agents_on_network()
    }

    pub fn network(&self) -> &SimNetwork<A> {
        &self.network
    }
}
