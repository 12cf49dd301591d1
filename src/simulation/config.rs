use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use nohash_hasher::IntSet;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::simulation::error::ConfigError;
use crate::simulation::id::Id;
use crate::simulation::network::PartitionMethod;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArgs {
    #[arg(long, short)]
    pub config: String,
    #[arg(long = "set", value_parser = parse_key_val)]
    pub overrides: Vec<(String, String)>,
}

impl CommandLineArgs {
    pub fn new_with_path(path: impl ToString) -> Self {
        CommandLineArgs {
            config: path.to_string(),
            overrides: Vec::new(),
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=');
    match pos {
        Some(pos) => Ok((s[..pos].to_string(), s[pos + 1..].to_string())),
        None => Err(format!("invalid KEY=VALUE: no `=` found in `{}`", s)),
    }
}

/// All sections are optional in the yaml file and fall back to their defaults.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub simulation: Simulation,
    pub partitioning: Partitioning,
    pub multimodal: Multimodal,
    pub output: Output,
    pub scenario: Scenario,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Simulation {
    pub start_time: u32,
    pub end_time: u32,
    pub time_step: u32,
    /// Simulated seconds between two progress log messages.
    pub progress_interval: u32,
    /// Stop before the end time as soon as no agent is left on the network.
    pub stop_when_empty: bool,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation {
            start_time: 0,
            end_time: 86400,
            time_step: 1,
            progress_interval: 3600,
            stop_when_empty: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Partitioning {
    pub num_parts: u32,
    pub method: PartitionMethod,
}

impl Default for Partitioning {
    fn default() -> Self {
        Partitioning {
            num_parts: 1,
            method: PartitionMethod::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Multimodal {
    /// Modes simulated on the network. Links which allow none of them are not part of the
    /// simulation. An empty list simulates all links.
    pub modes: Vec<String>,
    /// Free speed in m/s per mode.
    pub speeds: BTreeMap<String, f64>,
}

impl Multimodal {
    pub fn mode_ids(&self) -> IntSet<Id<String>> {
        self.modes.iter().map(|m| Id::create(m)).collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Output {
    pub output_dir: PathBuf,
    pub logging: Logging,
}

impl Default for Output {
    fn default() -> Self {
        Output {
            output_dir: PathBuf::from("./output"),
            logging: Logging::default(),
        }
    }
}

/// Have this extra layer of log level enum, as tracing subscriber has no
/// off/none option by default. At least it can't be parsed
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub enum Logging {
    #[default]
    None,
    Info,
}

/// Parameters of the generated grid scenario used by the command line runner.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Scenario {
    /// Number of nodes along each side of the grid.
    pub grid_size: u32,
    pub link_length: f64,
    pub link_freespeed: f64,
    pub num_agents: u32,
    /// Departures are drawn uniformly from [start_time, start_time + departure_window).
    pub departure_window: u32,
    pub seed: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Scenario {
            grid_size: 10,
            link_length: 100.,
            link_freespeed: 13.9,
            num_agents: 1000,
            departure_window: 3600,
            seed: 42,
        }
    }
}

impl TryFrom<CommandLineArgs> for Config {
    type Error = ConfigError;

    fn try_from(args: CommandLineArgs) -> Result<Self, Self::Error> {
        let mut config = Config::from_file(&PathBuf::from(&args.config))?;
        config.apply_overrides(&args.overrides)?;
        Ok(config)
    }
}

impl Config {
    pub fn from_file(config_path: &PathBuf) -> Result<Self, ConfigError> {
        let path = config_path.to_string_lossy().to_string();
        let file = File::open(config_path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_reader(BufReader::new(file))
            .map_err(|source| ConfigError::Parse { path, source })
    }

    /// Apply generic key-value overrides to the config, e.g. partitioning.num_parts=4
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Result<(), ConfigError> {
        if !overrides.is_empty() {
            info!("Applying overrides: {:?}", overrides);
        }
        for (key, value) in overrides {
            self.apply_override(key, value)?;
        }
        Ok(())
    }

    fn apply_override(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "simulation.start_time" => self.simulation.start_time = parse(key, value)?,
            "simulation.end_time" => self.simulation.end_time = parse(key, value)?,
            "simulation.time_step" => self.simulation.time_step = parse(key, value)?,
            "simulation.progress_interval" => {
                self.simulation.progress_interval = parse(key, value)?
            }
            "simulation.stop_when_empty" => self.simulation.stop_when_empty = parse(key, value)?,
            "partitioning.num_parts" => self.partitioning.num_parts = parse(key, value)?,
            "partitioning.method" => {
                self.partitioning.method = match value.to_lowercase().as_str() {
                    "blocks" => PartitionMethod::Blocks,
                    "round-robin" | "roundrobin" => PartitionMethod::RoundRobin,
                    _ => return Err(invalid(key, value)),
                }
            }
            "multimodal.modes" => {
                self.multimodal.modes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect()
            }
            "output.output_dir" => self.output.output_dir = PathBuf::from(value),
            "output.logging" => {
                self.output.logging = match value.to_lowercase().as_str() {
                    "none" => Logging::None,
                    "info" => Logging::Info,
                    _ => return Err(invalid(key, value)),
                }
            }
            "scenario.grid_size" => self.scenario.grid_size = parse(key, value)?,
            "scenario.link_length" => self.scenario.link_length = parse(key, value)?,
            "scenario.link_freespeed" => self.scenario.link_freespeed = parse(key, value)?,
            "scenario.num_agents" => self.scenario.num_agents = parse(key, value)?,
            "scenario.departure_window" => self.scenario.departure_window = parse(key, value)?,
            "scenario.seed" => self.scenario.seed = parse(key, value)?,
            _ => {
                if let Some(mode) = key.strip_prefix("multimodal.speeds.") {
                    let speed = parse(key, value)?;
                    self.multimodal.speeds.insert(mode.to_string(), speed);
                } else {
                    return Err(ConfigError::UnknownKey(key.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Modes simulated on the network. Falls back to the modes with a configured speed.
    pub fn network_modes(&self) -> IntSet<Id<String>> {
        if self.multimodal.modes.is_empty() {
            self.multimodal.speeds.keys().map(|m| Id::create(m)).collect()
        } else {
            self.multimodal.mode_ids()
        }
    }

    pub fn write(&self, output_path: &PathBuf) -> Result<(), ConfigError> {
        let path = output_path.to_string_lossy().to_string();
        let file = File::create(output_path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_yaml::to_writer(file, self).map_err(|source| ConfigError::Write { path, source })
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
