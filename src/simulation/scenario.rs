use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::simulation::agents::route_agent::RouteAgent;
use crate::simulation::config::{self, Config};
use crate::simulation::id::Id;
use crate::simulation::network::{Link, Network, Node};

/// An agent ending its activity at `time` and starting a network leg.
#[derive(Debug, Clone)]
pub struct Departure {
    pub time: u32,
    pub agent: RouteAgent,
}

impl Departure {
    pub fn link_id(&self) -> &Id<Link> {
        self.agent.start_link_id()
    }
}

/// A generated grid network with a population of agents walking or cycling between random
/// nodes of the grid.
#[derive(Debug)]
pub struct Scenario {
    pub network: Network,
    /// Sorted by departure time.
    pub departures: Vec<Departure>,
    pub config: Arc<Config>,
}

impl Scenario {
    pub fn build(config: Arc<Config>) -> Self {
        let network = create_grid_network(&config.scenario);
        let departures = create_departures(&config);
        info!(
            "Created grid scenario with {} nodes, {} links and {} agents.",
            network.nodes().len(),
            network.links().len(),
            departures.len()
        );
        Scenario {
            network,
            departures,
            config,
        }
    }
}

fn node_id(x: u32, y: u32) -> String {
    format!("{x}_{y}")
}

fn link_id(from: (u32, u32), to: (u32, u32)) -> String {
    format!("{}-{}", node_id(from.0, from.1), node_id(to.0, to.1))
}

/// Square grid with links in both directions between neighboring nodes. Links allow all modes.
pub fn create_grid_network(config: &config::Scenario) -> Network {
    let size = config.grid_size.max(2);
    let mut network = Network::new();

    for y in 0..size {
        for x in 0..size {
            network.add_node(Node::new(
                Id::create(&node_id(x, y)),
                x as f64 * config.link_length,
                y as f64 * config.link_length,
            ));
        }
    }

    let mut add_link = |from: (u32, u32), to: (u32, u32)| {
        network.add_link(Link::new(
            Id::create(&link_id(from, to)),
            Id::get_from_ext(&node_id(from.0, from.1)),
            Id::get_from_ext(&node_id(to.0, to.1)),
            config.link_length,
            config.link_freespeed,
        ));
    };
    for y in 0..size {
        for x in 0..size {
            if x + 1 < size {
                add_link((x, y), (x + 1, y));
                add_link((x + 1, y), (x, y));
            }
            if y + 1 < size {
                add_link((x, y), (x, y + 1));
                add_link((x, y + 1), (x, y));
            }
        }
    }
    network
}

/// Nodes visited when travelling first along the x-axis, then along the y-axis.
fn grid_path(from: (u32, u32), to: (u32, u32)) -> Vec<(u32, u32)> {
    let mut path = vec![from];
    let (mut x, mut y) = from;
    while x != to.0 {
        x = if x < to.0 { x + 1 } else { x - 1 };
        path.push((x, y));
    }
    while y != to.1 {
        y = if y < to.1 { y + 1 } else { y - 1 };
        path.push((x, y));
    }
    path
}

/// Agents with random origin, destination, mode and departure time. Modes are taken from the
/// configured speeds. The result is sorted by departure time.
pub fn create_departures(config: &Config) -> Vec<Departure> {
    let scenario = &config.scenario;
    let size = scenario.grid_size.max(2);
    let modes: Vec<&String> = config.multimodal.speeds.keys().collect();
    if modes.is_empty() {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(scenario.seed);

    let mut departures: Vec<_> = (0..scenario.num_agents)
        .map(|i| {
            let from = (rng.random_range(0..size), rng.random_range(0..size));
            let mut to = (rng.random_range(0..size), rng.random_range(0..size));
            if to == from {
                to = ((from.0 + 1) % size, from.1);
            }
            let route: Vec<Id<Link>> = grid_path(from, to)
                .windows(2)
                .map(|w| Id::create(&link_id(w[0], w[1])))
                .collect();

            let mode = modes[rng.random_range(0..modes.len())];
            let time = config.simulation.start_time
                + rng.random_range(0..scenario.departure_window.max(1));
            Departure {
                time,
                agent: RouteAgent::new(Id::create(&i.to_string()), Id::create(mode), route),
            }
        })
        .collect();

    departures.sort_by_key(|d| d.time);
    departures
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use macros::integration_test;

    use crate::simulation::agents::NetworkAgent;
    use crate::simulation::config::Config;
    use crate::simulation::id::Id;
    use crate::simulation::network::Link;
    use crate::simulation::scenario::{create_grid_network, grid_path, Scenario};

    fn config() -> Config {
        let mut config = Config::default();
        config.scenario.grid_size = 3;
        config.scenario.num_agents = 20;
        config.multimodal.speeds.insert("walk".to_string(), 1.4);
        config.multimodal.speeds.insert("bike".to_string(), 4.);
        config
    }

    #[integration_test]
    fn grid_network() {
        let network = create_grid_network(&config().scenario);
        assert_eq!(9, network.nodes().len());
        // 2 directions * 2 axes * 3 rows * 2 links per row
        assert_eq!(24, network.links().len());

        let link = network.get_link(&Id::get_from_ext("0_0-1_0"));
        assert_eq!("0_0", link.from.external());
        assert_eq!("1_0", link.to.external());
    }

    #[test]
    fn path_x_then_y() {
        assert_eq!(
            vec![(2, 0), (1, 0), (0, 0), (0, 1)],
            grid_path((2, 0), (0, 1))
        );
    }

    #[integration_test]
    fn departures_are_connected_and_sorted() {
        let scenario = Scenario::build(Arc::new(config()));
        assert_eq!(20, scenario.departures.len());
        assert!(scenario
            .departures
            .windows(2)
            .all(|w| w[0].time <= w[1].time));

        for departure in &scenario.departures {
            let route = departure.agent.route();
            assert!(!route.is_empty());
            for pair in route.windows(2) {
                let first: &Link = scenario.network.get_link(&pair[0]);
                let second = scenario.network.get_link(&pair[1]);
                assert_eq!(first.to, second.from);
            }
            let mode = departure.agent.mode().external();
            assert!(mode == "walk" || mode == "bike");
        }
    }
}
