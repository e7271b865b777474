use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use prelude::*;
use crate::error::ConfigError;

static CONFIG_FILE: &'static str = "controller.toml";

/// Tuning of the controller. Built once and shared read-only by every cycle.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Number of states in the horizon
    pub N: usize,
    /// Step between horizon states in seconds
    pub dt: float,
    /// Distance from the front axle to the centre of gravity
    pub Lf: float,
    /// Actuation delay in seconds
    pub latency: float,
    pub latency_model: LatencyModel,
    pub polynomial_order: usize,
    pub v_ref: float,
    pub max_steer: float,
    pub max_throttle: float,
    pub weights: Weights,
    pub solver: SolverSettings,
    pub steering: SteeringConvention,
    pub fallback: FallbackPolicy,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Weights {
    pub cte: float,
    pub epsi: float,
    pub speed: float,
    pub steering: float,
    pub throttle: float,
    pub steering_change: float,
    pub throttle_change: float,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSettings {
    pub max_iterations: u32,
    pub constraint_tolerance: float,
    pub step_tolerance: float,
    /// Wall-clock budget for one solve in seconds
    pub time_limit: float,
    pub qp_max_iterations: u32,
    pub qp_tolerance: float,
}

/// How the errors at the end of the actuation delay are estimated.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LatencyModel {
    /// First order correction of the errors measured at the current position.
    Linear,
    /// Re-evaluates the reference at the projected position.
    Polynomial,
}

/// Maps steering between the local frame, where positive turns counter-clockwise, and the
/// polarity and units the actuator consumer expects.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SteeringConvention {
    pub invert: bool,
    /// Consumer steering is a fraction of `max_steer` rather than radians
    pub normalise: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Repeat the previous command
    Hold,
    /// Straighten the wheels and apply the given (negative) throttle
    Decelerate { throttle: float },
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            N: 15,
            dt: 0.15,
            Lf: 2.67,
            latency: 0.1,
            latency_model: LatencyModel::Linear,
            polynomial_order: 3,
            v_ref: 80.0,
            // 25 degrees
            max_steer: 0.436332,
            max_throttle: 1.0,
            weights: Weights::default(),
            solver: SolverSettings::default(),
            steering: SteeringConvention::default(),
            fallback: FallbackPolicy::Hold,
        }
    }
}

impl Default for Weights {
    fn default() -> Weights {
        Weights {
            cte: 1000.0,
            epsi: 1000.0,
            speed: 1.0,
            steering: 100.0,
            throttle: 10.0,
            steering_change: 10.0,
            throttle_change: 10.0,
        }
    }
}

impl Default for SolverSettings {
    fn default() -> SolverSettings {
        SolverSettings {
            max_iterations: 50,
            constraint_tolerance: 1e-4,
            step_tolerance: 1e-4,
            time_limit: 0.5,
            qp_max_iterations: 10000,
            qp_tolerance: 1e-5,
        }
    }
}

impl SolverSettings {
    /// Unvalidated limits saturate instead of panicking.
    pub fn time_limit(&self) -> Duration {
        match Duration::try_from_secs_f64(self.time_limit) {
            Ok(limit) => limit,
            Err(_) if self.time_limit > 0.0 => Duration::MAX,
            Err(_) => Duration::from_secs(0),
        }
    }
}

impl Default for LatencyModel {
    fn default() -> LatencyModel {
        LatencyModel::Linear
    }
}

impl Default for SteeringConvention {
    fn default() -> SteeringConvention {
        SteeringConvention {
            invert: true,
            normalise: false,
        }
    }
}

impl SteeringConvention {
    /// Converts consumer steering feedback into the local frame.
    pub fn to_local(&self, steering: float, max_steer: float) -> float {
        let steering = if self.normalise {
            steering * max_steer
        } else {
            steering
        };
        if self.invert {
            -steering
        } else {
            steering
        }
    }

    /// Converts a local frame steering angle into the consumer's convention.
    pub fn to_consumer(&self, steering: float, max_steer: float) -> float {
        let steering = if self.invert { -steering } else { steering };
        if self.normalise {
            steering / max_steer
        } else {
            steering
        }
    }
}

impl Default for FallbackPolicy {
    fn default() -> FallbackPolicy {
        FallbackPolicy::Hold
    }
}

impl ControllerConfig {
    /// Loads `controller.toml` from the working directory.
    pub fn load_default() -> Result<ControllerConfig, ConfigError> {
        ControllerConfig::load(CONFIG_FILE)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<ControllerConfig, ConfigError> {
        let path = path.as_ref();
        let mut config_str = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut config_str))
            .map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?;
        ControllerConfig::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<ControllerConfig, ConfigError> {
        let config: ControllerConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, msg: &str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid(msg.to_owned()))
            }
        }
        let positive = |v: float| v.is_finite() && v > 0.0;
        let non_negative = |v: float| v.is_finite() && v >= 0.0;

        check(self.N >= 3, "N must be at least 3")?;
        check(positive(self.dt), "dt must be positive")?;
        check(positive(self.Lf), "Lf must be positive")?;
        check(non_negative(self.latency), "latency must not be negative")?;
        check(
            (1..=3).contains(&self.polynomial_order),
            "polynomial_order must be 1, 2 or 3",
        )?;
        check(self.v_ref.is_finite(), "v_ref must be finite")?;
        check(positive(self.max_steer), "max_steer must be positive")?;
        check(positive(self.max_throttle), "max_throttle must be positive")?;

        let w = &self.weights;
        check(
            [
                w.cte,
                w.epsi,
                w.speed,
                w.steering,
                w.throttle,
                w.steering_change,
                w.throttle_change,
            ]
            .iter()
            .all(|&w| non_negative(w)),
            "weights must not be negative",
        )?;

        let s = &self.solver;
        check(s.max_iterations >= 1, "solver.max_iterations must be at least 1")?;
        check(s.qp_max_iterations >= 1, "solver.qp_max_iterations must be at least 1")?;
        check(
            positive(s.time_limit) && Duration::try_from_secs_f64(s.time_limit).is_ok(),
            "solver.time_limit must be a positive duration",
        )?;
        check(
            positive(s.constraint_tolerance) && positive(s.step_tolerance) && positive(s.qp_tolerance),
            "solver tolerances must be positive",
        )?;

        if let FallbackPolicy::Decelerate { throttle } = self.fallback {
            check(
                throttle <= 0.0 && throttle >= -self.max_throttle,
                "fallback throttle must be in [-max_throttle, 0]",
            )?;
        }

        Ok(())
    }
}
