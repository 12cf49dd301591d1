use std::sync::atomic::{AtomicUsize, Ordering};

use itertools::Itertools;
use nohash_hasher::{IntMap, IntSet};
use parking_lot::Mutex;
use tracing::info;

use crate::simulation::agents::NetworkAgent;
use crate::simulation::engines::ComputationalEnvironment;
use crate::simulation::error::NetworkLoadingResult;
use crate::simulation::id::serializable_type::StableTypeId;
use crate::simulation::id::Id;
use crate::simulation::network::link::SimLink;
use crate::simulation::network::node::SimNode;
use crate::simulation::network::{Link, Network, Node};

/// Elements of one partition which have to be moved in the next phase. Any thread may insert,
/// the owning partition takes the whole set at the start of each phase.
#[derive(Debug)]
struct ActiveCache<C: StableTypeId> {
    active: Mutex<IntSet<Id<C>>>,
}

impl<C: StableTypeId> Default for ActiveCache<C> {
    fn default() -> Self {
        ActiveCache {
            active: Mutex::new(IntSet::default()),
        }
    }
}

impl<C: StableTypeId + 'static> ActiveCache<C> {
    fn activate(&self, id: Id<C>) -> bool {
        self.active.lock().insert(id)
    }

    /// Empties the cache. The ids are sorted, so that elements are always moved in the same
    /// order, independent of the order of activation.
    fn take_sorted(&self) -> Vec<Id<C>> {
        let taken = std::mem::take(&mut *self.active.lock());
        taken.into_iter().sorted().collect()
    }

    fn len(&self) -> usize {
        self.active.lock().len()
    }

    fn clear(&self) {
        self.active.lock().clear();
    }
}

/// Simulation view of a [Network]. Contains the links usable by at least one of the simulated
/// modes and all nodes connected to them. The maps are fixed after construction, all mutation
/// happens through interior mutability of links, nodes and active caches.
#[derive(Debug)]
pub struct SimNetwork<A> {
    nodes: IntMap<Id<Node>, SimNode>,
    // use int map as hash map variant with stable order
    links: IntMap<Id<Link>, SimLink<A>>,
    active_links: Vec<ActiveCache<Link>>,
    active_nodes: Vec<ActiveCache<Node>>,
    agents_on_network: AtomicUsize,
}

impl<A: NetworkAgent> SimNetwork<A> {
    /// An empty `modes` set keeps all links of the network.
    pub fn from_network(network: &Network, modes: &IntSet<Id<String>>) -> Self {
        let links: IntMap<Id<Link>, SimLink<A>> = network
            .links()
            .iter()
            .filter(|link| modes.is_empty() || modes.iter().any(|m| link.allows_mode(m)))
            .map(|link| (link.id.clone(), SimLink::new(link.clone())))
            .collect();

        let nodes: IntMap<Id<Node>, SimNode> = network
            .nodes()
            .iter()
            .filter(|node| {
                node.in_links
                    .iter()
                    .chain(node.out_links.iter())
                    .any(|l| links.contains_key(l))
            })
            .map(|node| {
                let in_links = node
                    .in_links
                    .iter()
                    .filter(|l| links.contains_key(*l))
                    .cloned()
                    .collect();
                (
                    node.id.clone(),
                    SimNode::new(node.id.clone(), in_links, node.partition),
                )
            })
            .collect();

        let num_parts = nodes
            .values()
            .map(|n| n.partition() + 1)
            .max()
            .unwrap_or(1)
            .max(network.num_parts()) as usize;

        info!(
            "Created simulation network with {} of {} links and {} of {} nodes in {num_parts} partitions.",
            links.len(),
            network.links().len(),
            nodes.len(),
            network.nodes().len()
        );

        SimNetwork {
            nodes,
            links,
            active_links: (0..num_parts).map(|_| ActiveCache::default()).collect(),
            active_nodes: (0..num_parts).map(|_| ActiveCache::default()).collect(),
            agents_on_network: AtomicUsize::new(0),
        }
    }

    pub fn num_parts(&self) -> usize {
        self.active_links.len()
    }

    pub fn link(&self, id: &Id<Link>) -> &SimLink<A> {
        self.try_link(id)
            .unwrap_or_else(|| panic!("Link {id} is not part of the simulation network."))
    }

    pub fn try_link(&self, id: &Id<Link>) -> Option<&SimLink<A>> {
        self.links.get(id)
    }

    pub fn node(&self, id: &Id<Node>) -> &SimNode {
        self.nodes
            .get(id)
            .unwrap_or_else(|| panic!("Node {id} is not part of the simulation network."))
    }

    pub fn links(&self) -> impl Iterator<Item = &SimLink<A>> {
        self.links.values()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.values()
    }

    pub(crate) fn enqueue_link(&self, partition: u32, id: Id<Link>) {
        self.active_links[partition as usize].activate(id);
    }

    pub(crate) fn enqueue_node(&self, partition: u32, id: Id<Node>) {
        self.active_nodes[partition as usize].activate(id);
    }

    pub fn active_links(&self) -> usize {
        self.active_links.iter().map(|c| c.len()).sum()
    }

    pub fn active_nodes(&self) -> usize {
        self.active_nodes.iter().map(|c| c.len()).sum()
    }

    pub(crate) fn agents_entered(&self, count: usize) {
        self.agents_on_network.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn agents_left(&self, count: usize) {
        self.agents_on_network.fetch_sub(count, Ordering::Relaxed);
    }

    /// Number of agents in any of the link containers.
    pub fn agents_on_network(&self) -> usize {
        self.agents_on_network.load(Ordering::Relaxed)
    }

    /// Advances all active links of a partition. Links with agents in transit are activated for
    /// the next time step again. Returns the number of links moved.
    pub fn move_links(
        &self,
        partition: usize,
        now: u32,
        env: &ComputationalEnvironment<A>,
    ) -> usize {
        let active = self.active_links[partition].take_sorted();
        for id in &active {
            let link = self.link(id);
            link.deactivate();
            if link.advance(now, self, env) {
                link.request_activation(self);
            }
        }
        active.len()
    }

    /// Advances all active nodes of a partition. Nodes which moved agents stay active. Returns the
    /// number of nodes and agents moved.
    pub fn move_nodes(
        &self,
        partition: usize,
        now: u32,
        env: &ComputationalEnvironment<A>,
    ) -> NetworkLoadingResult<(usize, usize)> {
        let active = self.active_nodes[partition].take_sorted();
        let mut moved_agents = 0;
        for id in &active {
            let node = self.node(id);
            node.deactivate();
            let moved = node.advance(now, self, env)?;
            if moved > 0 {
                node.request_activation(self);
            }
            moved_agents += moved;
        }
        Ok((active.len(), moved_agents))
    }

    /// Removes all remaining agents as stuck. Must not run concurrently to a time step.
    pub fn clear_agents(&self, now: u32, env: &ComputationalEnvironment<A>) -> usize {
        let ids: Vec<_> = self
            .links
            .values()
            .filter(|l| l.agent_count() > 0)
            .map(|l| l.id().clone())
            .sorted()
            .collect();

        let count = ids
            .iter()
            .map(|id| self.link(id).clear_agents(now, self, env))
            .sum();
        self.clear_active();
        count
    }

    /// Drops all agents, flags and active sets. Returns the number of dropped agents.
    pub fn reset(&self) -> usize {
        let dropped = self.links.values().map(|l| l.reset(self)).sum();
        for node in self.nodes.values() {
            node.deactivate();
        }
        self.clear_active();
        dropped
    }

    fn clear_active(&self) {
        for cache in &self.active_links {
            cache.clear();
        }
        for cache in &self.active_nodes {
            cache.clear();
        }
        for link in self.links.values() {
            link.deactivate();
        }
        for node in self.nodes.values() {
            node.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use macros::integration_test;
    use nohash_hasher::IntSet;

    use crate::simulation::agents::route_agent::RouteAgent;
    use crate::simulation::id::Id;
    use crate::simulation::network::sim_network::SimNetwork;
    use crate::simulation::network::{Link, Network, Node, PartitionMethod};
    use crate::simulation::travel_time::{ConstantTravelTime, TravelTimes};
    use crate::test_utils::{line_network, TestEnvironment};

    #[integration_test]
    fn from_network_filters_modes() {
        let mut network = Network::new();
        network.add_node(Node::new(Id::create("a"), 0., 0.));
        network.add_node(Node::new(Id::create("b"), 1., 0.));
        network.add_node(Node::new(Id::create("c"), 2., 0.));
        network.add_link(
            Link::new(Id::create("ab"), Id::create("a"), Id::create("b"), 1., 1.)
                .with_modes(&["walk", "bike"]),
        );
        network.add_link(
            Link::new(Id::create("bc"), Id::create("b"), Id::create("c"), 1., 1.)
                .with_modes(&["car"]),
        );

        let modes: IntSet<Id<String>> = [Id::create("walk")].into_iter().collect();
        let sim_net: SimNetwork<RouteAgent> = SimNetwork::from_network(&network, &modes);
        assert!(sim_net.try_link(&Id::get_from_ext("ab")).is_some());
        assert!(sim_net.try_link(&Id::get_from_ext("bc")).is_none());
        assert_eq!(2, sim_net.nodes().count());
        assert!(sim_net.node(&Id::get_from_ext("b")).in_links().len() == 1);

        let all: SimNetwork<RouteAgent> = SimNetwork::from_network(&network, &IntSet::default());
        assert_eq!(2, all.links().count());
        assert_eq!(3, all.nodes().count());
    }

    #[integration_test]
    fn active_caches_per_partition() {
        let mut network = line_network(4);
        network.partition(2, PartitionMethod::Blocks);
        let sim_net: SimNetwork<RouteAgent> = SimNetwork::from_network(&network, &IntSet::default());
        assert_eq!(2, sim_net.num_parts());

        for link in sim_net.links() {
            link.request_activation(&sim_net);
        }
        assert_eq!(4, sim_net.active_links());
        assert_eq!(
            sim_net.links().filter(|l| l.partition() == 0).count(),
            sim_net.active_links[0].len()
        );

        let taken = sim_net.active_links[1].take_sorted();
        let mut expected = taken.clone();
        expected.sort();
        assert_eq!(expected, taken);
        assert_eq!(0, sim_net.active_links[1].len());
    }

    #[integration_test]
    fn move_links_and_nodes() {
        let mut travel_times = TravelTimes::new();
        travel_times.add("walk", ConstantTravelTime::new(2.));
        let test_env = TestEnvironment::new(&line_network(3), travel_times, 1);
        let network = &test_env.network;

        let agent = RouteAgent::from_ext("1", "walk", &["link0", "link1", "link2"]);
        network
            .link(&Id::get_from_ext("link0"))
            .add_departing_agent(agent, 0, network, &test_env.env);
        assert_eq!(1, network.agents_on_network());

        // leave link0 and enter link1 in the same time step
        assert_eq!(1, network.move_links(0, 0, &test_env.env));
        assert_eq!((1, 1), network.move_nodes(0, 0, &test_env.env).unwrap());
        assert_eq!(1, network.active_links());

        // the node is dropped once it doesn't find agents anymore
        network.move_links(0, 1, &test_env.env);
        assert_eq!((1, 0), network.move_nodes(0, 1, &test_env.env).unwrap());
        assert_eq!(0, network.active_nodes());

        network.move_links(0, 2, &test_env.env);
        network.move_nodes(0, 2, &test_env.env).unwrap();
        assert_eq!(
            1,
            network
                .link(&Id::get_from_ext("link2"))
                .in_transit_count()
        );

        assert_eq!(1, network.clear_agents(3, &test_env.env));
        assert_eq!(0, network.agents_on_network());
        assert_eq!(0, network.active_links());
    }
}
