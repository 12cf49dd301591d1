use crate::simulation::agents::Person;
use crate::simulation::id::Id;
use crate::simulation::network::Link;
use derive_builder::Builder;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub trait EventTrait: Debug + Any + Send + Sync {
    //This can't be a const, because traits with const fields are not dyn compatible.
    fn type_(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn time(&self) -> u32;
    fn link(&self) -> &Id<Link>;
    fn person(&self) -> &Id<Person>;
}

type OnEventFn = dyn Fn(&dyn EventTrait) + Send + Sync + 'static;

/// The EventsManager holds call-backs for event processing. Rust has no reflection, so handlers
/// are registered per concrete event type, which allows compile-time checking of the event types.
///
/// Events are published from all simulation threads at once. Handlers are therefore `Send + Sync`
/// and have to synchronize their own state. Registration happens before the simulation starts.
#[derive(Default)]
pub struct EventsManager {
    per_type: HashMap<TypeId, Vec<Arc<OnEventFn>>>,
    catch_all: Vec<Box<OnEventFn>>,
    finish: Vec<Box<dyn Fn() + Send + Sync + 'static>>,
}

impl Debug for EventsManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EventsManager {{ per_type: {:?}, catch_all: {:?}, finish: {:?} }}",
            self.per_type.len(),
            self.catch_all.len(),
            self.finish.len()
        )
    }
}

impl EventsManager {
    pub fn new() -> Self {
        EventsManager {
            per_type: HashMap::new(),
            catch_all: Vec::new(),
            finish: Vec::new(),
        }
    }

    pub fn publish_event(&self, event: &dyn EventTrait) {
        let tid = event.as_any().type_id();
        if let Some(list) = self.per_type.get(&tid) {
            for h in list {
                h(event);
            }
        }
        for h in &self.catch_all {
            h(event);
        }
    }

    pub fn finish(&self) {
        for f in &self.finish {
            f()
        }
    }

    /// This function is used to register callbacks for specific event types.
    pub fn on<E, F>(&mut self, f: F)
    where
        E: EventTrait,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<E>();
        let entry = self.per_type.entry(type_id).or_default();
        entry.push(Arc::new(move |ev: &dyn EventTrait| {
            if let Some(e) = ev.as_any().downcast_ref::<E>() {
                f(e);
            }
        }));
    }

    /// This function is used to register callbacks for all event types.
    pub fn on_any<F>(&mut self, f: F)
    where
        F: Fn(&dyn EventTrait) + Send + Sync + 'static,
    {
        self.catch_all.push(Box::new(f));
    }

    pub fn on_finish<F>(&mut self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.finish.push(Box::new(f));
    }
}

macro_rules! impl_event_trait {
    ($event:ty) => {
        impl EventTrait for $event {
            fn type_(&self) -> &'static str {
                Self::TYPE
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn time(&self) -> u32 {
                self.time
            }
            fn link(&self) -> &Id<Link> {
                &self.link
            }
            fn person(&self) -> &Id<Person> {
                &self.person
            }
        }
    };
}

#[derive(Builder, Debug, Clone, PartialEq)]
pub struct LinkEnterEvent {
    pub time: u32,
    pub link: Id<Link>,
    pub person: Id<Person>,
}

impl LinkEnterEvent {
    pub const TYPE: &'static str = "entered link";

    pub fn new(time: u32, link: Id<Link>, person: Id<Person>) -> Self {
        LinkEnterEvent { time, link, person }
    }
}

impl_event_trait!(LinkEnterEvent);

#[derive(Builder, Debug, Clone, PartialEq)]
pub struct LinkLeaveEvent {
    pub time: u32,
    pub link: Id<Link>,
    pub person: Id<Person>,
}

impl LinkLeaveEvent {
    pub const TYPE: &'static str = "left link";

    pub fn new(time: u32, link: Id<Link>, person: Id<Person>) -> Self {
        LinkLeaveEvent { time, link, person }
    }
}

impl_event_trait!(LinkLeaveEvent);

/// An agent ended an activity on a link and waits to leave it.
#[derive(Builder, Debug, Clone, PartialEq)]
pub struct Wait2LinkEvent {
    pub time: u32,
    pub link: Id<Link>,
    pub person: Id<Person>,
    #[builder(default)]
    pub mode: Option<Id<String>>,
}

impl Wait2LinkEvent {
    pub const TYPE: &'static str = "wait2link";

    pub fn new(time: u32, link: Id<Link>, person: Id<Person>, mode: Id<String>) -> Self {
        Wait2LinkEvent {
            time,
            link,
            person,
            mode: Some(mode),
        }
    }
}

impl_event_trait!(Wait2LinkEvent);

#[derive(Builder, Debug, Clone, PartialEq)]
pub struct PersonStuckEvent {
    pub time: u32,
    pub link: Id<Link>,
    pub person: Id<Person>,
    #[builder(default)]
    pub mode: Option<Id<String>>,
}

impl PersonStuckEvent {
    pub const TYPE: &'static str = "stuckAndAbort";

    pub fn new(time: u32, link: Id<Link>, person: Id<Person>, mode: Id<String>) -> Self {
        PersonStuckEvent {
            time,
            link,
            person,
            mode: Some(mode),
        }
    }
}

impl_event_trait!(PersonStuckEvent);

/// Flat copy of a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub type_: &'static str,
    pub time: u32,
    pub link: String,
    pub person: String,
}

impl From<&dyn EventTrait> for RecordedEvent {
    fn from(event: &dyn EventTrait) -> Self {
        RecordedEvent {
            type_: event.type_(),
            time: event.time(),
            link: event.link().external().to_string(),
            person: event.person().external().to_string(),
        }
    }
}

/// Keeps a copy of every event in publication order. Register it with [EventsCollector::register].
#[derive(Debug, Clone, Default)]
pub struct EventsCollector {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, events: &mut EventsManager) {
        let store = self.events.clone();
        events.on_any(move |e| store.lock().push(RecordedEvent::from(e)));
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, type_: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.type_ == type_)
            .count()
    }

    /// All events of one link in publication order.
    pub fn for_link(&self, link: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.link == link)
            .cloned()
            .collect()
    }
}
