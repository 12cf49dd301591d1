use std::error::Error;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::Parser;
use rust_mm_qsim::simulation::agents::route_agent::RouteAgent;
use rust_mm_qsim::simulation::agents::{AgentCollector, AgentCounter, NetworkAgent};
use rust_mm_qsim::simulation::config::{CommandLineArgs, Config};
use rust_mm_qsim::simulation::engines::network_engine::{NetworkEngine, RunControl};
use rust_mm_qsim::simulation::events::{
    EventsManager, LinkEnterEvent, LinkLeaveEvent, PersonStuckEvent,
};
use rust_mm_qsim::simulation::logging::init_logging;
use rust_mm_qsim::simulation::scenario::Scenario;
use rust_mm_qsim::simulation::travel_time::TravelTimes;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn Error>> {
    let args = CommandLineArgs::parse();

    // Load and adapt config
    let config = Arc::new(Config::try_from(args)?);
    fs::create_dir_all(&config.output.output_dir)?;
    let _guards = init_logging(&config);
    info!("Started with config: {:?}", config);
    config.write(&config.output.output_dir.join("output_config.yml"))?;

    let scenario = Scenario::build(config.clone());
    let events = Arc::new(create_events());
    let counter = Arc::new(AgentCounter::new(scenario.departures.len() as i64));
    let arrived = Arc::new(AgentCollector::<RouteAgent>::new());

    let engine = NetworkEngine::new(
        &scenario.network,
        &config,
        TravelTimes::from_config(&config.multimodal),
        events.clone(),
        counter.clone(),
        arrived.clone(),
    )?;

    let mut departures = scenario.departures.into_iter().peekable();
    let stopped = engine.run(|engine, now| {
        while let Some(departure) = departures.next_if(|d| d.time <= now) {
            let link_id = departure.link_id().clone();
            if let Err(rejected) = engine.handle_departure(departure.agent, &link_id, now) {
                warn!(
                    "Agent {} can't depart on link {link_id}: {}",
                    rejected.agent.id(),
                    rejected.error
                );
                counter.inc_lost();
                counter.dec_living();
            }
        }
        if departures.peek().is_some() {
            RunControl::Continue
        } else {
            RunControl::Exhausted
        }
    })?;

    events.finish();
    info!(
        "Simulation stopped at {stopped}. {} agents arrived, {} agents lost.",
        arrived.len(),
        counter.lost()
    );
    Ok(())
}

fn create_events() -> EventsManager {
    let mut events = EventsManager::new();
    let enter = Arc::new(AtomicUsize::new(0));
    let leave = Arc::new(AtomicUsize::new(0));
    let stuck = Arc::new(AtomicUsize::new(0));

    let enter_clone = enter.clone();
    events.on::<LinkEnterEvent, _>(move |_| {
        enter_clone.fetch_add(1, Ordering::Relaxed);
    });
    let leave_clone = leave.clone();
    events.on::<LinkLeaveEvent, _>(move |_| {
        leave_clone.fetch_add(1, Ordering::Relaxed);
    });
    let stuck_clone = stuck.clone();
    events.on::<PersonStuckEvent, _>(move |_| {
        stuck_clone.fetch_add(1, Ordering::Relaxed);
    });
    events.on_finish(move || {
        info!(
            "Events: {} link enter, {} link leave, {} stuck.",
            enter.load(Ordering::Relaxed),
            leave.load(Ordering::Relaxed),
            stuck.load(Ordering::Relaxed)
        );
    });
    events
}
