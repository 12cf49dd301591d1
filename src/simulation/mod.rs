pub mod agents;
pub mod config;
pub mod engines;
pub mod error;
pub mod events;
pub mod id;
pub mod logging;
pub mod network;
pub mod scenario;
pub mod travel_time;
