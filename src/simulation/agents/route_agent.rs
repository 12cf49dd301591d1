use crate::simulation::agents::{NetworkAgent, Person};
use crate::simulation::id::Id;
use crate::simulation::network::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAgentState {
    Leg,
    Arrived(u32),
    Aborted(u32),
}

/// An agent which follows a fixed network route. The first link of the route is the departure
/// link, the last link the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteAgent {
    id: Id<Person>,
    mode: Id<String>,
    route: Vec<Id<Link>>,
    curr_route_element: usize,
    state: RouteAgentState,
}

impl RouteAgent {
    pub fn new(id: Id<Person>, mode: Id<String>, route: Vec<Id<Link>>) -> Self {
        assert!(
            !route.is_empty(),
            "Agent {id} needs at least one link in its route."
        );
        RouteAgent {
            id,
            mode,
            route,
            curr_route_element: 0,
            state: RouteAgentState::Leg,
        }
    }

    pub fn from_ext(id: &str, mode: &str, route: &[&str]) -> Self {
        Self::new(
            Id::create(id),
            Id::create(mode),
            route.iter().map(|l| Id::create(l)).collect(),
        )
    }

    pub fn state(&self) -> RouteAgentState {
        self.state
    }

    pub fn start_link_id(&self) -> &Id<Link> {
        &self.route[0]
    }

    pub fn route(&self) -> &[Id<Link>] {
        &self.route
    }
}

impl NetworkAgent for RouteAgent {
    fn id(&self) -> &Id<Person> {
        &self.id
    }

    fn mode(&self) -> &Id<String> {
        &self.mode
    }

    fn curr_link_id(&self) -> Option<&Id<Link>> {
        self.route.get(self.curr_route_element)
    }

    fn destination_link_id(&self) -> &Id<Link> {
        self.route.last().unwrap()
    }

    fn choose_next_link_id(&self) -> Option<Id<Link>> {
        self.route.get(self.curr_route_element + 1).cloned()
    }

    fn notify_move_over_node(&mut self, new_link_id: &Id<Link>) {
        self.curr_route_element += 1;
        debug_assert_eq!(Some(new_link_id), self.route.get(self.curr_route_element));
    }

    fn end_leg_and_compute_next_state(&mut self, now: u32) {
        self.state = RouteAgentState::Arrived(now);
    }

    fn set_state_to_abort(&mut self, now: u32) {
        self.state = RouteAgentState::Aborted(now);
    }
}
