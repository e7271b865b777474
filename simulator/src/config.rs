use std::error::Error;
use std::fs::File;
use std::io::Read;

use prelude::*;

static CONFIG_FILE: &'static str = "simulator.toml";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorConfig {
    /// Simulated duration in seconds
    pub t: float,
    /// Controller cycle period in seconds
    pub dt: float,
    pub real_time: bool,
    /// CSV of `x,y` centreline points, ordered in the direction of travel
    pub track: String,
    /// Number of track points ahead of the vehicle sent as waypoints
    pub n_waypoints: usize,
    pub initial_speed: float,
    /// Delay between a command being issued and it reaching the wheels
    pub latency: float,
    /// Acceleration produced by full throttle
    pub throttle_gain: float,
    pub position_noise: float,
    pub heading_noise: float,
    pub seed: u64,
    pub max_consecutive_fallbacks: u32,
    /// Optional CSV trace of every cycle
    pub record: Option<String>,
    /// Write a flame graph of the controller to `flame-graph.html`
    pub profile: bool,
}

impl Default for SimulatorConfig {
    fn default() -> SimulatorConfig {
        SimulatorConfig {
            t: 60.0,
            dt: 0.1,
            real_time: false,
            track: "tracks/oval.csv".to_owned(),
            n_waypoints: 6,
            initial_speed: 10.0,
            latency: 0.1,
            throttle_gain: 1.0,
            position_noise: 0.0,
            heading_noise: 0.0,
            seed: 0,
            max_consecutive_fallbacks: 10,
            record: None,
            profile: false,
        }
    }
}

impl SimulatorConfig {
    pub fn load() -> Result<SimulatorConfig, Box<dyn Error>> {
        let mut config_str = String::new();
        File::open(CONFIG_FILE)
            .and_then(|mut f| f.read_to_string(&mut config_str))
            .map_err(|e| format!("unable to read {}: {}", CONFIG_FILE, e))?;
        let config: SimulatorConfig = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.dt > 0.0 && self.t >= self.dt) {
            return Err("simulator.toml: need t >= dt > 0".to_owned());
        }
        if self.n_waypoints < controller::waypoints::MIN_WAYPOINTS {
            return Err(format!(
                "simulator.toml: n_waypoints must be at least {}",
                controller::waypoints::MIN_WAYPOINTS
            ));
        }
        if !(self.latency >= 0.0 && self.position_noise >= 0.0 && self.heading_noise >= 0.0) {
            return Err("simulator.toml: latency and noise must not be negative".to_owned());
        }
        Ok(())
    }
}
