use nohash_hasher::{IntMap, IntSet};
use serde::{Deserialize, Serialize};

use crate::simulation::id::Id;

pub mod link;
pub mod node;
pub mod sim_network;

/// How nodes are assigned to partitions. Links belong to the partition of their to-node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PartitionMethod {
    /// Consecutive nodes (in insertion order) end up in the same partition.
    #[default]
    Blocks,
    RoundRobin,
}

/// The network as supplied by an external loader. It is not mutated during the simulation.
#[derive(Debug, Default, Clone)]
pub struct Network {
    nodes: Vec<Node>,
    links: Vec<Link>,
    node_index: IntMap<Id<Node>, usize>,
    link_index: IntMap<Id<Link>, usize>,
    num_parts: u32,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: Id<Node>,
    pub x: f64,
    pub y: f64,
    pub in_links: Vec<Id<Link>>,
    pub out_links: Vec<Id<Link>>,
    pub partition: u32,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub id: Id<Link>,
    pub from: Id<Node>,
    pub to: Id<Node>,
    pub length: f64,
    pub freespeed: f64,
    /// Allowed modes. An empty set allows all modes.
    pub modes: IntSet<Id<String>>,
    pub partition: u32,
}

impl Network {
    pub fn new() -> Self {
        Network {
            nodes: Vec::new(),
            links: Vec::new(),
            node_index: IntMap::default(),
            link_index: IntMap::default(),
            num_parts: 1,
        }
    }

    pub fn add_node(&mut self, node: Node) {
        assert!(
            !self.node_index.contains_key(&node.id),
            "Node id {} already exists.",
            node.id
        );
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    pub fn add_link(&mut self, mut link: Link) {
        assert!(
            !self.link_index.contains_key(&link.id),
            "Link id {} already exists.",
            link.id
        );

        // wire up in and out links and push link to the links vec
        self.get_node_mut(&link.from).out_links.push(link.id.clone());
        let to_node = self.get_node_mut(&link.to);
        to_node.in_links.push(link.id.clone());
        link.partition = to_node.partition;

        self.link_index.insert(link.id.clone(), self.links.len());
        self.links.push(link);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn get_node(&self, id: &Id<Node>) -> &Node {
        self.try_get_node(id)
            .unwrap_or_else(|| panic!("Node {id} is not part of the network."))
    }

    pub fn try_get_node(&self, id: &Id<Node>) -> Option<&Node> {
        self.node_index.get(id).map(|i| &self.nodes[*i])
    }

    fn get_node_mut(&mut self, id: &Id<Node>) -> &mut Node {
        let index = *self
            .node_index
            .get(id)
            .unwrap_or_else(|| panic!("Node {id} is not part of the network."));
        &mut self.nodes[index]
    }

    pub fn get_link(&self, id: &Id<Link>) -> &Link {
        self.try_get_link(id)
            .unwrap_or_else(|| panic!("Link {id} is not part of the network."))
    }

    pub fn try_get_link(&self, id: &Id<Link>) -> Option<&Link> {
        self.link_index.get(id).map(|i| &self.links[*i])
    }

    pub fn num_parts(&self) -> u32 {
        self.num_parts
    }

    /// Assigns every node to one of `num_parts` partitions and every link to the partition of its
    /// to-node.
    pub fn partition(&mut self, num_parts: u32, method: PartitionMethod) {
        assert!(num_parts > 0, "At least one partition is required.");
        let num_nodes = self.nodes.len().max(1);

        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.partition = match method {
                PartitionMethod::Blocks => (i * num_parts as usize / num_nodes) as u32,
                PartitionMethod::RoundRobin => i as u32 % num_parts,
            };
        }
        self.num_parts = num_parts;
        self.update_link_partitions();
    }

    /// Assigns a node to a partition explicitly. Used by callers with their own partitioning.
    pub fn set_node_partition(&mut self, id: &Id<Node>, partition: u32) {
        self.get_node_mut(id).partition = partition;
        self.num_parts = self.num_parts.max(partition + 1);
        self.update_link_partitions();
    }

    fn update_link_partitions(&mut self) {
        for link in &mut self.links {
            let to_index = self.node_index[&link.to];
            link.partition = self.nodes[to_index].partition;
        }
    }
}

impl Node {
    pub fn new(id: Id<Node>, x: f64, y: f64) -> Self {
        Node {
            id,
            x,
            y,
            in_links: Vec::new(),
            out_links: Vec::new(),
            partition: 0,
        }
    }
}

impl Link {
    pub fn new(id: Id<Link>, from: Id<Node>, to: Id<Node>, length: f64, freespeed: f64) -> Self {
        Link {
            id,
            from,
            to,
            length,
            freespeed,
            modes: IntSet::default(),
            partition: 0,
        }
    }

    pub fn with_modes(mut self, modes: &[&str]) -> Self {
        self.modes = modes.iter().map(|m| Id::create(m)).collect();
        self
    }

    pub fn allows_mode(&self, mode: &Id<String>) -> bool {
        self.modes.is_empty() || self.modes.contains(mode)
    }
}

#[cfg(test)]
mod tests {
    use crate::simulation::id::Id;
    use crate::simulation::network::{Link, Network, Node, PartitionMethod};
    use macros::integration_test;

    fn line_network(num_nodes: usize) -> Network {
        let mut network = Network::new();
        for i in 0..num_nodes {
            network.add_node(Node::new(Id::create(&format!("n{i}")), i as f64, 0.));
        }
        for i in 1..num_nodes {
            network.add_link(Link::new(
                Id::create(&format!("l{i}")),
                Id::get_from_ext(&format!("n{}", i - 1)),
                Id::get_from_ext(&format!("n{i}")),
                100.,
                10.,
            ));
        }
        network
    }

    #[integration_test]
    fn add_link_wires_nodes() {
        let network = line_network(3);

        let n1 = network.get_node(&Id::get_from_ext("n1"));
        assert_eq!(vec![Id::get_from_ext("l1")], n1.in_links);
        assert_eq!(vec![Id::get_from_ext("l2")], n1.out_links);
        assert_eq!(2, network.links().len());
        assert!(network.try_get_link(&Id::create("unknown")).is_none());
    }

    #[integration_test]
    #[should_panic]
    fn add_node_reject_duplicate() {
        let mut network = line_network(2);
        network.add_node(Node::new(Id::get_from_ext("n0"), 0., 0.));
    }

    #[integration_test]
    fn partition_blocks() {
        let mut network = line_network(4);
        network.partition(2, PartitionMethod::Blocks);

        let parts: Vec<u32> = network.nodes().iter().map(|n| n.partition).collect();
        assert_eq!(vec![0, 0, 1, 1], parts);
        // links belong to the partition of their to-node
        let link_parts: Vec<u32> = network.links().iter().map(|l| l.partition).collect();
        assert_eq!(vec![0, 1, 1], link_parts);
        assert_eq!(2, network.num_parts());
    }

    #[integration_test]
    fn partition_round_robin() {
        let mut network = line_network(4);
        network.partition(2, PartitionMethod::RoundRobin);

        let parts: Vec<u32> = network.nodes().iter().map(|n| n.partition).collect();
        assert_eq!(vec![0, 1, 0, 1], parts);

        network.set_node_partition(&Id::get_from_ext("n3"), 2);
        assert_eq!(3, network.num_parts());
        assert_eq!(2, network.get_link(&Id::get_from_ext("l3")).partition);
    }

    #[integration_test]
    fn allowed_modes() {
        let link = Link::new(
            Id::create("l"),
            Id::create("a"),
            Id::create("b"),
            1.,
            1.,
        );
        assert!(link.allows_mode(&Id::create("walk")));

        let link = link.with_modes(&["bike"]);
        assert!(!link.allows_mode(&Id::create("walk")));
        assert!(link.allows_mode(&Id::create("bike")));
    }
}
