use std::sync::Arc;

use nohash_hasher::IntSet;

use crate::simulation::agents::route_agent::RouteAgent;
use crate::simulation::agents::{AgentCollector, AgentCounter};
use crate::simulation::config;
use crate::simulation::engines::ComputationalEnvironment;
use crate::simulation::events::{EventsCollector, EventsManager};
use crate::simulation::id::Id;
use crate::simulation::network::sim_network::SimNetwork;
use crate::simulation::network::{Link, Network, Node};
use crate::simulation::travel_time::TravelTimes;

pub fn add_node(network: &mut Network, id: &str) {
    let x = network.nodes().len() as f64 * 100.;
    network.add_node(Node::new(Id::create(id), x, 0.));
}

/// Adds a link of 100m with a free speed of 10m/s.
pub fn add_link(network: &mut Network, id: &str, from: &str, to: &str) {
    network.add_link(Link::new(
        Id::create(id),
        Id::get_from_ext(from),
        Id::get_from_ext(to),
        100.,
        10.,
    ));
}

/// node0 --link0--> node1 --link1--> ... --link{n-1}--> node{n}
pub fn line_network(num_links: usize) -> Network {
    let mut network = Network::new();
    for i in 0..=num_links {
        add_node(&mut network, &format!("node{i}"));
    }
    for i in 0..num_links {
        add_link(
            &mut network,
            &format!("link{i}"),
            &format!("node{i}"),
            &format!("node{}", i + 1),
        );
    }
    network
}

pub fn config() -> config::Config {
    let mut config = config::Config::default();
    config.simulation.start_time = 0;
    config.simulation.end_time = 3600;
    config.multimodal.modes = vec![String::from("walk")];
    config
}

/// A simulation network together with the collaborators of the network loading, which record
/// everything that happens.
pub struct TestEnvironment {
    pub network: SimNetwork<RouteAgent>,
    pub env: ComputationalEnvironment<RouteAgent>,
    pub events: EventsCollector,
    pub arranger: Arc<AgentCollector<RouteAgent>>,
    pub counter: Arc<AgentCounter>,
}

impl TestEnvironment {
    pub fn new(network: &Network, travel_times: TravelTimes, living: i64) -> Self {
        let mut events = EventsManager::new();
        let collector = EventsCollector::new();
        collector.register(&mut events);

        let arranger = Arc::new(AgentCollector::new());
        let counter = Arc::new(AgentCounter::new(living));
        let env = ComputationalEnvironment::new(
            Arc::new(events),
            travel_times,
            counter.clone(),
            arranger.clone(),
        );

        TestEnvironment {
            network: SimNetwork::from_network(network, &IntSet::default()),
            env,
            events: collector,
            arranger,
            counter,
        }
    }
}
