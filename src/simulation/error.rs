use thiserror::Error;

use crate::simulation::agents::Person;
use crate::simulation::id::Id;
use crate::simulation::network::{Link, Node};

/// Errors of the network loading. Routing errors concern a single agent, the simulation removes
/// that agent and carries on. Travel time errors are misconfigurations and abort the simulation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetworkLoadingError {
    #[error("link {0} is not part of the network")]
    UnknownLink(Id<Link>),

    #[error("agent {agent} has no or wrong route: no next link after link {link}")]
    NoNextLink { agent: Id<Person>, link: Id<Link> },

    #[error("agent {agent} can't move from link {from_link} to link {to_link}: links are not connected at node {node}")]
    UnconnectedLinks {
        agent: Id<Person>,
        from_link: Id<Link>,
        to_link: Id<Link>,
        node: Id<Node>,
    },

    #[error("no travel time provider registered for mode {0}")]
    MissingTravelTime(Id<String>),

    #[error("travel time {value} for agent {agent} with mode {mode} on link {link} is negative, not finite or ends after the last possible time step")]
    InvalidTravelTime {
        agent: Id<Person>,
        mode: Id<String>,
        link: Id<Link>,
        value: f64,
    },
}

impl NetworkLoadingError {
    /// Routing errors only affect the agent which caused them.
    pub fn is_agent_local(&self) -> bool {
        matches!(
            self,
            NetworkLoadingError::UnknownLink(_)
                | NetworkLoadingError::NoNextLink { .. }
                | NetworkLoadingError::UnconnectedLinks { .. }
        )
    }
}

/// An agent which could not be placed onto a link. The agent is handed back to the caller, so
/// that it is not dropped silently.
#[derive(Debug)]
pub struct Rejected<A> {
    pub agent: A,
    pub error: NetworkLoadingError,
}

impl<A> Rejected<A> {
    pub fn new(agent: A, error: NetworkLoadingError) -> Self {
        Rejected { agent, error }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to write config to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value {value} for config key {key}")]
    InvalidValue { key: String, value: String },

    #[error("unknown config key {0}")]
    UnknownKey(String),
}

pub type NetworkLoadingResult<T> = Result<T, NetworkLoadingError>;
