use std::fmt::Debug;
use std::sync::Arc;

use nohash_hasher::IntMap;
use tracing::info;

use crate::simulation::agents::NetworkAgent;
use crate::simulation::config;
use crate::simulation::error::{NetworkLoadingError, NetworkLoadingResult};
use crate::simulation::id::Id;
use crate::simulation::network::Link;

/// Computes how long an agent needs to traverse a link. Implementations must not have side effects
/// observable by the network loading, since they are called concurrently from all partitions.
pub trait TravelTime: Debug + Send + Sync {
    fn link_travel_time(&self, link: &Link, now: u32, agent: &dyn NetworkAgent) -> f64;
}

/// Travels with a fixed speed per mode. The link's free speed caps the speed.
#[derive(Debug, Clone)]
pub struct FreeSpeedTravelTime {
    speed: f64,
}

impl FreeSpeedTravelTime {
    pub fn new(speed: f64) -> Self {
        FreeSpeedTravelTime { speed }
    }
}

impl TravelTime for FreeSpeedTravelTime {
    fn link_travel_time(&self, link: &Link, _now: u32, _agent: &dyn NetworkAgent) -> f64 {
        link.length / self.speed.min(link.freespeed)
    }
}

#[derive(Debug, Clone)]
pub struct ConstantTravelTime {
    seconds: f64,
}

impl ConstantTravelTime {
    pub fn new(seconds: f64) -> Self {
        ConstantTravelTime { seconds }
    }
}

impl TravelTime for ConstantTravelTime {
    fn link_travel_time(&self, _link: &Link, _now: u32, _agent: &dyn NetworkAgent) -> f64 {
        self.seconds
    }
}

/// Travel time providers by mode.
#[derive(Debug, Default, Clone)]
pub struct TravelTimes {
    providers: IntMap<Id<String>, Arc<dyn TravelTime>>,
}

impl TravelTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a [FreeSpeedTravelTime] for every mode which has a speed configured.
    pub fn from_config(config: &config::Multimodal) -> Self {
        let mut result = TravelTimes::new();
        for (mode, speed) in &config.speeds {
            info!("Using free speed travel time with {speed} m/s for mode {mode}.");
            result.add(mode, FreeSpeedTravelTime::new(*speed));
        }
        result
    }

    pub fn add(&mut self, mode: &str, provider: impl TravelTime + 'static) {
        self.providers.insert(Id::create(mode), Arc::new(provider));
    }

    pub fn get(&self, mode: &Id<String>) -> Option<&dyn TravelTime> {
        self.providers.get(mode).map(|p| p.as_ref())
    }

    pub fn modes(&self) -> Vec<Id<String>> {
        let mut modes: Vec<_> = self.providers.keys().cloned().collect();
        modes.sort();
        modes
    }

    /// Fails for the first mode (in id order) which has no provider.
    pub fn validate<'a>(
        &self,
        modes: impl IntoIterator<Item = &'a Id<String>>,
    ) -> NetworkLoadingResult<()> {
        let mut missing: Vec<_> = modes
            .into_iter()
            .filter(|m| !self.providers.contains_key(*m))
            .collect();
        missing.sort();
        match missing.first() {
            Some(mode) => Err(NetworkLoadingError::MissingTravelTime((*mode).clone())),
            None => Ok(()),
        }
    }

    /// The time step at which `agent` may leave `link` if it enters at `now`. Travel times are
    /// rounded to whole seconds, so that agents entering together with equal travel times leave
    /// together.
    pub fn exit_time(
        &self,
        link: &Link,
        now: u32,
        agent: &dyn NetworkAgent,
    ) -> NetworkLoadingResult<u32> {
        let provider = self
            .get(agent.mode())
            .ok_or_else(|| NetworkLoadingError::MissingTravelTime(agent.mode().clone()))?;

        let travel_time = provider.link_travel_time(link, now, agent);
        let exit_time = (now as f64 + travel_time).round();
        // the exit time must be representable as a time step
        if !travel_time.is_finite() || travel_time < 0. || exit_time > u32::MAX as f64 {
            return Err(NetworkLoadingError::InvalidTravelTime {
                agent: agent.id().clone(),
                mode: agent.mode().clone(),
                link: link.id.clone(),
                value: travel_time,
            });
        }

        Ok(exit_time as u32)
    }
}
