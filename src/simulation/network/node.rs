use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::simulation::agents::NetworkAgent;
use crate::simulation::engines::ComputationalEnvironment;
use crate::simulation::error::{NetworkLoadingError, NetworkLoadingResult};
use crate::simulation::id::Id;
use crate::simulation::network::link::SimLink;
use crate::simulation::network::sim_network::SimNetwork;
use crate::simulation::network::{Link, Node};

#[derive(Debug)]
pub struct SimNode {
    id: Id<Node>,
    in_links: Vec<Id<Link>>,
    partition: u32,
    active: AtomicBool,
}

impl SimNode {
    pub fn new(id: Id<Node>, in_links: Vec<Id<Link>>, partition: u32) -> Self {
        SimNode {
            id,
            in_links,
            partition,
            active: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &Id<Node> {
        &self.id
    }

    pub fn in_links(&self) -> &[Id<Link>] {
        &self.in_links
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Same protocol as [SimLink::request_activation].
    pub fn request_activation<A: NetworkAgent>(&self, network: &SimNetwork<A>) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            network.enqueue_node(self.partition, self.id.clone());
            true
        } else {
            false
        }
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Moves all agents waiting to leave one of the in links onto their next link. In links are
    /// visited in the order in which they were added to the network. Returns the number of agents
    /// which were moved over the node or removed because of a broken route. The node stays active
    /// as long as this is greater than zero.
    ///
    /// Fails if an agent can't be put onto its next link because of its travel time. Agents with
    /// broken routes are removed from the simulation and don't cause an error.
    pub fn advance<A: NetworkAgent>(
        &self,
        now: u32,
        network: &SimNetwork<A>,
        env: &ComputationalEnvironment<A>,
    ) -> NetworkLoadingResult<usize> {
        let mut moved = 0;
        for in_link_id in &self.in_links {
            let in_link = network.link(in_link_id);
            while let Some(agent) = in_link.get_next_waiting_agent(now, network, env) {
                moved += 1;
                self.move_agent_over_node(agent, in_link, now, network, env)?;
            }
        }
        Ok(moved)
    }

    fn move_agent_over_node<A: NetworkAgent>(
        &self,
        mut agent: A,
        in_link: &SimLink<A>,
        now: u32,
        network: &SimNetwork<A>,
        env: &ComputationalEnvironment<A>,
    ) -> NetworkLoadingResult<()> {
        let next_link = match self.next_link(&agent, in_link, network) {
            Ok(link) => link,
            Err(e) => {
                warn!("Removing agent {} at time {now}: {e}", agent.id());
                env.abort_agent(agent, in_link.id(), now);
                return Ok(());
            }
        };

        agent.notify_move_over_node(next_link.id());
        next_link
            .add_agent_from_intersection(agent, now, network, env)
            .map_err(|rejected| {
                env.abort_agent(rejected.agent, next_link.id(), now);
                rejected.error
            })
    }

    fn next_link<'n, A: NetworkAgent>(
        &self,
        agent: &A,
        in_link: &SimLink<A>,
        network: &'n SimNetwork<A>,
    ) -> NetworkLoadingResult<&'n SimLink<A>> {
        let next_id = agent
            .choose_next_link_id()
            .ok_or_else(|| NetworkLoadingError::NoNextLink {
                agent: agent.id().clone(),
                link: in_link.id().clone(),
            })?;

        let next_link = network
            .try_link(&next_id)
            .ok_or(NetworkLoadingError::UnknownLink(next_id))?;

        if *next_link.from() != self.id {
            return Err(NetworkLoadingError::UnconnectedLinks {
                agent: agent.id().clone(),
                from_link: in_link.id().clone(),
                to_link: next_link.id().clone(),
                node: self.id.clone(),
            });
        }
        Ok(next_link)
    }
}
