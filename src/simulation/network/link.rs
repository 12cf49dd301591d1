use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::simulation::agents::NetworkAgent;
use crate::simulation::engines::ComputationalEnvironment;
use crate::simulation::error::Rejected;
use crate::simulation::events::{LinkEnterEvent, LinkLeaveEvent, Wait2LinkEvent};
use crate::simulation::id::Id;
use crate::simulation::network::sim_network::SimNetwork;
use crate::simulation::network::{Link, Node};

/// An agent travelling along a link, keyed by the time step at which it may leave the link.
#[derive(Debug)]
struct InTransitEntry<A> {
    exit_time: u32,
    agent: A,
}

impl<A: NetworkAgent> PartialEq for InTransitEntry<A> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl<A: NetworkAgent> Eq for InTransitEntry<A> {}

impl<A: NetworkAgent> PartialOrd for InTransitEntry<A> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max heap. The greatest entry has the earliest exit time and among equal exit
// times the larger agent id.
impl<A: NetworkAgent> Ord for InTransitEntry<A> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .exit_time
            .cmp(&self.exit_time)
            .then_with(|| self.agent.id().cmp(other.agent.id()))
    }
}

/// Queue model of a link for modes which don't interact with each other. Agents on the link
/// are held in three containers:
///
/// * in transit: agents traversing the link, ordered by exit time
/// * waiting after activity: agents which ended an activity on this link
/// * waiting to leave: agents which may leave the link as soon as the to-node pulls them
///
/// Each agent is in at most one of them. Any thread may append, only the partition owning the
/// link removes agents.
pub struct SimLink<A> {
    link: Link,
    active: AtomicBool,
    in_transit: Mutex<BinaryHeap<InTransitEntry<A>>>,
    waiting_after_activity: Mutex<VecDeque<A>>,
    waiting_to_leave: Mutex<VecDeque<A>>,
}

impl<A> Debug for SimLink<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimLink")
            .field("id", &self.link.id)
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("in_transit", &self.in_transit.lock().len())
            .field(
                "waiting_after_activity",
                &self.waiting_after_activity.lock().len(),
            )
            .field("waiting_to_leave", &self.waiting_to_leave.lock().len())
            .finish()
    }
}

impl<A: NetworkAgent> SimLink<A> {
    pub fn new(link: Link) -> Self {
        SimLink {
            link,
            active: AtomicBool::new(false),
            in_transit: Mutex::new(BinaryHeap::new()),
            waiting_after_activity: Mutex::new(VecDeque::new()),
            waiting_to_leave: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> &Id<Link> {
        &self.link.id
    }

    pub fn from(&self) -> &Id<Node> {
        &self.link.from
    }

    pub fn to(&self) -> &Id<Node> {
        &self.link.to
    }

    pub fn partition(&self) -> u32 {
        self.link.partition
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Only the caller which flips the flag from inactive to active enqueues the link into the
    /// active set of its partition. Returns whether this call enqueued the link.
    pub fn request_activation(&self, network: &SimNetwork<A>) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            network.enqueue_link(self.link.partition, self.link.id.clone());
            true
        } else {
            false
        }
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// An agent is moved onto this link by the from-node. If no valid exit time can be computed
    /// for the agent it is handed back together with the error.
    pub fn add_agent_from_intersection(
        &self,
        agent: A,
        now: u32,
        network: &SimNetwork<A>,
        env: &ComputationalEnvironment<A>,
    ) -> Result<(), Rejected<A>> {
        let exit_time = match env.travel_times().exit_time(&self.link, now, &agent) {
            Ok(t) => t,
            Err(e) => return Err(Rejected::new(agent, e)),
        };

        env.publish_event(&LinkEnterEvent::new(
            now,
            self.link.id.clone(),
            agent.id().clone(),
        ));
        network.agents_entered(1);
        self.in_transit
            .lock()
            .push(InTransitEntry { exit_time, agent });
        // the agent must be in a container before the link is activated
        self.request_activation(network);
        Ok(())
    }

    /// An agent ended an activity on this link and starts its leg here.
    pub fn add_departing_agent(
        &self,
        agent: A,
        now: u32,
        network: &SimNetwork<A>,
        env: &ComputationalEnvironment<A>,
    ) {
        env.publish_event(&Wait2LinkEvent::new(
            now,
            self.link.id.clone(),
            agent.id().clone(),
            agent.mode().clone(),
        ));
        network.agents_entered(1);
        self.waiting_after_activity.lock().push_back(agent);
        self.request_activation(network);
    }

    /// Moves agents whose exit time has come into the waiting to leave queue, or out of the
    /// network if this link is the end of their leg. Agents waiting after an activity follow
    /// right after. Returns whether agents are still in transit, i.e. whether the link has to be
    /// moved in the next time step as well.
    pub fn advance(
        &self,
        now: u32,
        network: &SimNetwork<A>,
        env: &ComputationalEnvironment<A>,
    ) -> bool {
        let (exited, still_in_transit) = {
            let mut in_transit = self.in_transit.lock();
            let mut exited = Vec::new();
            while in_transit.peek().is_some_and(|e| e.exit_time <= now) {
                if let Some(entry) = in_transit.pop() {
                    exited.push(entry.agent);
                }
            }
            (exited, !in_transit.is_empty())
        };

        let mut leave_candidates = Vec::with_capacity(exited.len());
        for mut agent in exited {
            if self.is_end_of_leg(&agent) {
                agent.end_leg_and_compute_next_state(now);
                network.agents_left(1);
                env.arrange_next_agent_state(agent);
            } else {
                leave_candidates.push(agent);
            }
        }

        let after_activity = std::mem::take(&mut *self.waiting_after_activity.lock());
        let has_waiting = {
            let mut waiting = self.waiting_to_leave.lock();
            waiting.extend(leave_candidates);
            waiting.extend(after_activity);
            !waiting.is_empty()
        };

        if has_waiting {
            network.node(&self.link.to).request_activation(network);
        }

        still_in_transit
    }

    fn is_end_of_leg(&self, agent: &A) -> bool {
        self.link.id == *agent.destination_link_id() && agent.choose_next_link_id().is_none()
    }

    /// Removes the first agent waiting to leave the link.
    pub fn get_next_waiting_agent(
        &self,
        now: u32,
        network: &SimNetwork<A>,
        env: &ComputationalEnvironment<A>,
    ) -> Option<A> {
        let agent = self.waiting_to_leave.lock().pop_front()?;
        network.agents_left(1);
        env.publish_event(&LinkLeaveEvent::new(
            now,
            self.link.id.clone(),
            agent.id().clone(),
        ));
        Some(agent)
    }

    pub fn has_waiting_to_leave_agents(&self) -> bool {
        !self.waiting_to_leave.lock().is_empty()
    }

    /// Removes all agents from the link as stuck. Returns the number of removed agents.
    pub fn clear_agents(
        &self,
        now: u32,
        network: &SimNetwork<A>,
        env: &ComputationalEnvironment<A>,
    ) -> usize {
        let in_transit = std::mem::take(&mut *self.in_transit.lock());
        let after_activity = std::mem::take(&mut *self.waiting_after_activity.lock());
        let to_leave = std::mem::take(&mut *self.waiting_to_leave.lock());

        // into_sorted_vec is ascending, i.e. reverse exit order
        let agents = in_transit
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|e| e.agent)
            .chain(after_activity)
            .chain(to_leave);

        let mut count = 0;
        for agent in agents {
            env.abort_agent(agent, &self.link.id, now);
            count += 1;
        }
        network.agents_left(count);
        self.deactivate();
        count
    }

    /// Drops all agents without publishing events or touching the agent counter.
    pub(crate) fn reset(&self, network: &SimNetwork<A>) -> usize {
        let count = self.agent_count();
        self.in_transit.lock().clear();
        self.waiting_after_activity.lock().clear();
        self.waiting_to_leave.lock().clear();
        network.agents_left(count);
        self.deactivate();
        count
    }

    pub fn in_transit_count(&self) -> usize {
        self.in_transit.lock().len()
    }

    pub fn waiting_after_activity_count(&self) -> usize {
        self.waiting_after_activity.lock().len()
    }

    pub fn waiting_to_leave_count(&self) -> usize {
        self.waiting_to_leave.lock().len()
    }

    pub fn agent_count(&self) -> usize {
        self.in_transit_count() + self.waiting_after_activity_count() + self.waiting_to_leave_count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use macros::integration_test;

    use crate::simulation::agents::route_agent::{RouteAgent, RouteAgentState};
    use crate::simulation::agents::NetworkAgent;
    use crate::simulation::events::{LinkEnterEvent, LinkLeaveEvent, PersonStuckEvent};
    use crate::simulation::id::Id;
    use crate::simulation::travel_time::{ConstantTravelTime, TravelTimes};
    use crate::test_utils::{line_network, TestEnvironment};

    fn walk_5s() -> TravelTimes {
        let mut travel_times = TravelTimes::new();
        travel_times.add("walk", ConstantTravelTime::new(5.));
        travel_times
    }

    #[integration_test]
    fn enter_advance_leave() {
        let test_env = TestEnvironment::new(&line_network(3), walk_5s(), 1);
        let network = &test_env.network;
        let link = network.link(&Id::get_from_ext("link1"));

        let agent = RouteAgent::from_ext("x", "walk", &["link0", "link1", "link2"]);
        link.add_agent_from_intersection(agent, 10, network, &test_env.env)
            .unwrap();
        assert!(link.is_active());
        assert_eq!(1, link.in_transit_count());

        // 14 is too early
        assert!(link.advance(14, network, &test_env.env));
        assert!(!link.has_waiting_to_leave_agents());

        assert!(!link.advance(15, network, &test_env.env));
        assert_eq!(0, link.in_transit_count());
        assert_eq!(1, link.waiting_to_leave_count());
        assert!(network.node(link.to()).is_active());

        let agent = link.get_next_waiting_agent(15, network, &test_env.env).unwrap();
        assert_eq!("x", agent.id().external());
        assert!(link.get_next_waiting_agent(15, network, &test_env.env).is_none());

        let events = test_env.events.events();
        assert_eq!(2, events.len());
        assert_eq!(LinkEnterEvent::TYPE, events[0].type_);
        assert_eq!(10, events[0].time);
        assert_eq!(LinkLeaveEvent::TYPE, events[1].type_);
        assert_eq!(15, events[1].time);
    }

    #[integration_test]
    fn equal_exit_times_larger_id_first() {
        let test_env = TestEnvironment::new(&line_network(3), walk_5s(), 1);
        let network = &test_env.network;
        let link = network.link(&Id::get_from_ext("link1"));

        for id in ["2", "7"] {
            let agent = RouteAgent::from_ext(id, "walk", &["link0", "link1", "link2"]);
            link.add_agent_from_intersection(agent, 15, network, &test_env.env)
                .unwrap();
        }
        link.advance(20, network, &test_env.env);

        let first = link.get_next_waiting_agent(20, network, &test_env.env).unwrap();
        let second = link.get_next_waiting_agent(20, network, &test_env.env).unwrap();
        assert_eq!("7", first.id().external());
        assert_eq!("2", second.id().external());
    }

    #[integration_test]
    fn earlier_exit_time_first() {
        let test_env = TestEnvironment::new(&line_network(3), walk_5s(), 1);
        let network = &test_env.network;
        let link = network.link(&Id::get_from_ext("link1"));

        let late = RouteAgent::from_ext("9", "walk", &["link0", "link1", "link2"]);
        let early = RouteAgent::from_ext("1", "walk", &["link0", "link1", "link2"]);
        link.add_agent_from_intersection(late, 3, network, &test_env.env)
            .unwrap();
        link.add_agent_from_intersection(early, 2, network, &test_env.env)
            .unwrap();

        link.advance(7, network, &test_env.env);
        assert_eq!(1, link.waiting_to_leave_count());
        link.advance(8, network, &test_env.env);

        let first = link.get_next_waiting_agent(8, network, &test_env.env).unwrap();
        let second = link.get_next_waiting_agent(8, network, &test_env.env).unwrap();
        assert_eq!("1", first.id().external());
        assert_eq!("9", second.id().external());
    }

    #[integration_test]
    fn departing_agents_follow_transit_agents() {
        let test_env = TestEnvironment::new(&line_network(3), walk_5s(), 1);
        let network = &test_env.network;
        let link = network.link(&Id::get_from_ext("link1"));

        let departing = RouteAgent::from_ext("1", "walk", &["link1", "link2"]);
        link.add_departing_agent(departing, 5, network, &test_env.env);
        let transit = RouteAgent::from_ext("2", "walk", &["link0", "link1", "link2"]);
        link.add_agent_from_intersection(transit, 0, network, &test_env.env)
            .unwrap();
        assert_eq!(1, link.waiting_after_activity_count());

        // agents which ended an activity may leave in the same time step
        assert!(!link.advance(5, network, &test_env.env));
        assert_eq!(0, link.waiting_after_activity_count());

        let first = link.get_next_waiting_agent(5, network, &test_env.env).unwrap();
        let second = link.get_next_waiting_agent(5, network, &test_env.env).unwrap();
        assert_eq!("2", first.id().external());
        assert_eq!("1", second.id().external());
        assert_eq!(1, test_env.events.count("wait2link"));
    }

    #[integration_test]
    fn agent_ends_leg_on_destination() {
        let test_env = TestEnvironment::new(&line_network(3), walk_5s(), 1);
        let network = &test_env.network;
        let link = network.link(&Id::get_from_ext("link1"));

        let mut agent = RouteAgent::from_ext("1", "walk", &["link0", "link1"]);
        agent.notify_move_over_node(&Id::get_from_ext("link1"));
        link.add_agent_from_intersection(agent, 0, network, &test_env.env)
            .unwrap();

        assert!(!link.advance(5, network, &test_env.env));
        assert!(!link.has_waiting_to_leave_agents());
        assert!(!network.node(link.to()).is_active());

        let arrived = test_env.arranger.take();
        assert_eq!(1, arrived.len());
        assert_eq!(RouteAgentState::Arrived(5), arrived[0].state());
    }

    #[integration_test]
    fn invalid_travel_time_rejects_agent() {
        let mut travel_times = TravelTimes::new();
        travel_times.add("walk", ConstantTravelTime::new(-3.));
        let test_env = TestEnvironment::new(&line_network(3), travel_times, 1);
        let network = &test_env.network;
        let link = network.link(&Id::get_from_ext("link1"));

        let agent = RouteAgent::from_ext("1", "walk", &["link0", "link1"]);
        let rejected = link
            .add_agent_from_intersection(agent, 0, network, &test_env.env)
            .unwrap_err();

        assert_eq!("1", rejected.agent.id().external());
        assert_eq!(0, link.agent_count());
        assert!(!link.is_active());
        assert!(test_env.events.events().is_empty());
    }

    #[integration_test]
    fn clear_agents_counts_all_containers() {
        let test_env = TestEnvironment::new(&line_network(3), walk_5s(), 3);
        let network = &test_env.network;
        let link = network.link(&Id::get_from_ext("link1"));

        let a = RouteAgent::from_ext("1", "walk", &["link0", "link1", "link2"]);
        let b = RouteAgent::from_ext("2", "walk", &["link0", "link1", "link2"]);
        let c = RouteAgent::from_ext("3", "walk", &["link1", "link2"]);
        link.add_agent_from_intersection(a, 0, network, &test_env.env)
            .unwrap();
        link.advance(5, network, &test_env.env);
        link.add_agent_from_intersection(b, 5, network, &test_env.env)
            .unwrap();
        link.add_departing_agent(c, 6, network, &test_env.env);

        assert_eq!(3, link.clear_agents(7, network, &test_env.env));
        assert_eq!(0, link.agent_count());
        assert!(!link.is_active());
        assert_eq!(3, test_env.events.count(PersonStuckEvent::TYPE));
        assert_eq!(0, test_env.counter.living());
        assert_eq!(3, test_env.counter.lost());

        let aborted = test_env.arranger.take();
        assert!(aborted
            .iter()
            .all(|a| a.state() == RouteAgentState::Aborted(7)));
    }

    #[integration_test]
    fn concurrent_activation_enqueues_once() {
        let test_env = TestEnvironment::new(&line_network(3), walk_5s(), 1);
        let network = &test_env.network;
        let link = network.link(&Id::get_from_ext("link1"));

        let winners: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| link.request_activation(network) as usize))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(1, winners);
        assert_eq!(1, network.active_links());
    }

    #[integration_test]
    fn concurrent_appends_are_all_kept() {
        let test_env = Arc::new(TestEnvironment::new(&line_network(3), walk_5s(), 0));
        let link_id = Id::get_from_ext("link1");

        thread::scope(|s| {
            for t in 0..4 {
                let test_env = test_env.clone();
                let link_id = link_id.clone();
                s.spawn(move || {
                    let link = test_env.network.link(&link_id);
                    for i in 0..25 {
                        let id = format!("{t}-{i}");
                        let agent =
                            RouteAgent::from_ext(&id, "walk", &["link0", "link1", "link2"]);
                        link.add_agent_from_intersection(
                            agent,
                            0,
                            &test_env.network,
                            &test_env.env,
                        )
                        .unwrap();
                    }
                });
            }
        });

        let link = test_env.network.link(&link_id);
        assert_eq!(100, link.in_transit_count());
        assert_eq!(1, test_env.network.active_links());
        assert_eq!(100, test_env.events.count(LinkEnterEvent::TYPE));
    }
}
