use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::simulation::agents::{AgentCounter, AgentStateArranger, NetworkAgent, Person};
use crate::simulation::events::{EventTrait, EventsManager, PersonStuckEvent};
use crate::simulation::id::Id;
use crate::simulation::network::Link;
use crate::simulation::travel_time::TravelTimes;

pub mod network_engine;

/// Everything links and nodes need from the surrounding simulation while moving agents. All of it
/// is shared between the partitions.
pub struct ComputationalEnvironment<A> {
    events: Arc<EventsManager>,
    travel_times: TravelTimes,
    counter: Arc<AgentCounter>,
    arranger: Arc<dyn AgentStateArranger<A>>,
}

impl<A> Debug for ComputationalEnvironment<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationalEnvironment")
            .field("events", &self.events)
            .field("travel_times", &self.travel_times)
            .field("counter", &self.counter)
            .finish()
    }
}

impl<A: NetworkAgent> ComputationalEnvironment<A> {
    pub fn new(
        events: Arc<EventsManager>,
        travel_times: TravelTimes,
        counter: Arc<AgentCounter>,
        arranger: Arc<dyn AgentStateArranger<A>>,
    ) -> Self {
        ComputationalEnvironment {
            events,
            travel_times,
            counter,
            arranger,
        }
    }

    pub fn publish_event(&self, event: &dyn EventTrait) {
        self.events.publish_event(event);
    }

    pub fn travel_times(&self) -> &TravelTimes {
        &self.travel_times
    }

    pub fn counter(&self) -> &AgentCounter {
        &self.counter
    }

    pub fn arrange_next_agent_state(&self, agent: A) {
        self.arranger.arrange_next_agent_state(agent);
    }

    /// Removes an agent from the simulation: publishes a stuck event on `link`, books the agent
    /// as lost and hands it over in aborted state.
    pub fn abort_agent(&self, mut agent: A, link: &Id<Link>, now: u32) {
        let person: Id<Person> = agent.id().clone();
        self.publish_event(&PersonStuckEvent::new(
            now,
            link.clone(),
            person,
            agent.mode().clone(),
        ));
        self.counter.inc_lost();
        self.counter.dec_living();
        agent.set_state_to_abort(now);
        self.arranger.arrange_next_agent_state(agent);
    }
}
