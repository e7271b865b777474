// Ignore this lint otherwise many warnings are generated for common mathematical notation
#![allow(non_snake_case)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod command;
pub mod config;
mod error;
pub mod latency;
pub mod nlp;
pub mod sqp;
pub mod waypoints;

use std::time::Duration;

use control_model::{Control, ReferencePath, VehicleState};
use prelude::*;

pub use crate::command::{ControlCommand, PredictedTrajectory};
pub use crate::config::ControllerConfig;
pub use crate::error::{ConfigError, Error};
use crate::nlp::MpcProblem;
pub use crate::sqp::{NlpSolver, Solution, Sqp};

/// One telemetry message from the vehicle.
///
/// Waypoints and pose are in the world frame. The previous command is in the consumer's
/// steering convention.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Telemetry {
    pub ptsx: Vec<float>,
    pub ptsy: Vec<float>,
    pub x: float,
    pub y: float,
    pub psi: float,
    pub speed: float,
    pub steering_angle: float,
    pub throttle: float,
}

impl Telemetry {
    pub fn previous_command(&self) -> ControlCommand {
        ControlCommand {
            steering: self.steering_angle,
            acceleration: self.throttle,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Plan {
    pub command: ControlCommand,
    pub trajectory: PredictedTrajectory,
    pub reference: ReferencePath,
    /// State the horizon starts from, after latency compensation
    pub initial_state: VehicleState<float>,
    pub iterations: u32,
    pub cost: float,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Optimal {
        iterations: u32,
        cost: float,
        elapsed: Duration,
    },
    Fallback(Error),
}

#[derive(Clone, Debug)]
pub struct StepResult {
    pub command: ControlCommand,
    pub trajectory: PredictedTrajectory,
    pub outcome: Outcome,
}

impl StepResult {
    pub fn is_fallback(&self) -> bool {
        match self.outcome {
            Outcome::Fallback(_) => true,
            Outcome::Optimal { .. } => false,
        }
    }
}

/// Receding horizon tracking controller.
pub struct Mpc<S = Sqp> {
    config: ControllerConfig,
    solver: S,
}

impl Mpc<Sqp> {
    pub fn new(config: ControllerConfig) -> Result<Mpc<Sqp>, ConfigError> {
        let solver = Sqp::new(config.solver.clone());
        Mpc::with_solver(config, solver)
    }

    /// Builds a controller from `controller.toml` in the working directory.
    pub fn from_config() -> Result<Mpc<Sqp>, ConfigError> {
        Mpc::new(ControllerConfig::load_default()?)
    }
}

impl<S: NlpSolver> Mpc<S> {
    pub fn with_solver(config: ControllerConfig, solver: S) -> Result<Mpc<S>, ConfigError> {
        config.validate()?;
        Ok(Mpc { config, solver })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Runs one planning cycle. Errors are returned as is, with no fallback applied.
    pub fn plan(&self, telemetry: &Telemetry) -> Result<Plan, Error> {
        let _guard = start_guard("mpc plan");
        let config = &self.config;

        let reference = span_of("fit reference", || {
            waypoints::fit_reference(
                &telemetry.ptsx,
                &telemetry.ptsy,
                telemetry.x,
                telemetry.y,
                telemetry.psi,
                config.polynomial_order,
            )
        })?;

        let previous = Control {
            steering: config
                .steering
                .to_local(telemetry.steering_angle, config.max_steer),
            acceleration: telemetry.throttle,
        };
        let initial_state = latency::project(config, telemetry.speed, &previous, &reference);

        let problem = MpcProblem::new(config, reference, initial_state);
        let solution = self.solver.solve(&problem)?;
        let (command, trajectory) = command::extract(&solution.z, &problem.layout, config);

        Ok(Plan {
            command,
            trajectory,
            reference,
            initial_state,
            iterations: solution.iterations,
            cost: solution.cost,
            elapsed: solution.elapsed,
        })
    }

    /// Runs one planning cycle and falls back to a safe command if it fails.
    pub fn step(&self, telemetry: &Telemetry) -> StepResult {
        match self.plan(telemetry) {
            Ok(plan) => StepResult {
                command: plan.command,
                trajectory: plan.trajectory,
                outcome: Outcome::Optimal {
                    iterations: plan.iterations,
                    cost: plan.cost,
                    elapsed: plan.elapsed,
                },
            },
            Err(e) => {
                let previous = command::limit(telemetry.previous_command(), &self.config);
                let command = if e.is_preprocessing() {
                    previous
                } else {
                    command::fallback(&self.config.fallback, previous)
                };
                warn!("planning failed, applying {:?}: {}", command, e);
                StepResult {
                    command,
                    trajectory: PredictedTrajectory::default(),
                    outcome: Outcome::Fallback(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and returns a fixed result.
    struct MockSolver {
        calls: AtomicUsize,
        result: Result<Solution, Error>,
    }

    impl MockSolver {
        fn failing(e: Error) -> MockSolver {
            MockSolver {
                calls: AtomicUsize::new(0),
                result: Err(e),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl<'a> NlpSolver for &'a MockSolver {
        fn solve(&self, _problem: &MpcProblem) -> Result<Solution, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn straight_telemetry(speed: float) -> Telemetry {
        Telemetry {
            ptsx: vec![-10.0, 10.0, 30.0, 50.0, 70.0, 90.0],
            ptsy: vec![0.0; 6],
            speed,
            ..Default::default()
        }
    }

    #[test]
    fn decodes_telemetry_json() {
        let json = r#"{
            "ptsx": [1.0, 2.0, 3.0, 4.0],
            "ptsy": [0.5, 0.5, 0.5, 0.5],
            "x": -40.6, "y": 108.7, "psi": 3.73,
            "speed": 12.5, "steering_angle": -0.01, "throttle": 0.3
        }"#;
        let telemetry: Telemetry = serde_json::from_str(json).unwrap();
        assert_eq!(telemetry.ptsx.len(), 4);
        assert_eq!(telemetry.psi, 3.73);
        assert_eq!(
            telemetry.previous_command(),
            ControlCommand {
                steering: -0.01,
                acceleration: 0.3,
            }
        );
    }

    #[test]
    fn straight_line_at_reference_speed() {
        let mpc = Mpc::new(ControllerConfig::default()).unwrap();
        let telemetry = straight_telemetry(mpc.config().v_ref);

        let result = mpc.step(&telemetry);

        assert!(!result.is_fallback(), "{:?}", result.outcome);
        assert!(result.command.steering.abs() < 1e-3, "{:?}", result.command);
        assert!(result.command.acceleration.abs() < 1e-2, "{:?}", result.command);
        assert_eq!(result.trajectory.len(), mpc.config().N - 1);
        // The prediction runs straight down the local x axis
        for &(x, y) in &result.trajectory.points {
            assert!(x >= 0.0 && y.abs() < 1e-6, "{:?}", result.trajectory);
        }
    }

    #[test]
    fn steers_toward_curving_path() {
        let mpc = Mpc::new(ControllerConfig::default()).unwrap();
        // The path starts a metre to the left and bends further left
        let ptsx: Vec<float> = (0..6).map(|i| i as float * 15.0).collect();
        let ptsy = ptsx.iter().map(|x| 1.0 + 0.002 * x * x).collect();
        let telemetry = Telemetry {
            ptsx,
            ptsy,
            speed: 40.0,
            ..Default::default()
        };

        let plan = mpc.plan(&telemetry).unwrap();

        // Left is negative in the default consumer convention
        assert!(plan.command.steering < 0.0, "{:?}", plan.command);
        assert!(plan.command.steering >= -mpc.config().max_steer);
        assert!((plan.reference.evaluate(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rotated_pose_gives_same_command() {
        let mpc = Mpc::new(ControllerConfig::default()).unwrap();
        let base = Telemetry {
            ptsx: (0..6).map(|i| i as float * 15.0).collect(),
            ptsy: (0..6).map(|i| 0.5 + 0.01 * i as float).collect(),
            speed: 30.0,
            ..Default::default()
        };

        // Move the whole scene to a different world pose
        let (px, py, psi) = (120.0, -45.0, 2.0);
        let (ptsx, ptsy) = base
            .ptsx
            .iter()
            .zip(&base.ptsy)
            .map(|(&lx, &ly)| waypoints::to_world(px, py, psi, lx, ly))
            .unzip();
        let moved = Telemetry {
            ptsx,
            ptsy,
            x: px,
            y: py,
            psi,
            ..base.clone()
        };

        let a = mpc.plan(&base).unwrap().command;
        let b = mpc.plan(&moved).unwrap().command;
        assert!((a.steering - b.steering).abs() < 1e-3, "{:?} {:?}", a, b);
        assert!((a.acceleration - b.acceleration).abs() < 1e-3, "{:?} {:?}", a, b);
    }

    #[test]
    fn too_few_waypoints_never_reach_the_solver() {
        let solver = MockSolver::failing(Error::QpSetup("unused".to_owned()));
        let mpc = Mpc::with_solver(ControllerConfig::default(), &solver).unwrap();
        let telemetry = Telemetry {
            ptsx: vec![1.0, 2.0, 3.0],
            ptsy: vec![0.0; 3],
            steering_angle: 0.05,
            throttle: 0.2,
            ..Default::default()
        };

        match mpc.plan(&telemetry) {
            Err(Error::InsufficientWaypoints { points: 3, .. }) => (),
            other => panic!("unexpected {:?}", other),
        }

        let result = mpc.step(&telemetry);
        assert_eq!(solver.calls(), 0);
        assert_eq!(result.command, telemetry.previous_command());
        assert!(result.trajectory.is_empty());
    }

    #[test]
    fn solver_failure_applies_fallback_policy() {
        let solver = MockSolver::failing(Error::SolverTimeout {
            iterations: 3,
            elapsed: Duration::from_millis(510),
        });
        let telemetry = Telemetry {
            steering_angle: -0.1,
            throttle: 0.6,
            ..straight_telemetry(50.0)
        };

        let hold = Mpc::with_solver(ControllerConfig::default(), &solver).unwrap();
        let result = hold.step(&telemetry);
        assert_eq!(result.command, telemetry.previous_command());
        match result.outcome {
            Outcome::Fallback(Error::SolverTimeout { iterations: 3, .. }) => (),
            ref other => panic!("unexpected {:?}", other),
        }

        let config = ControllerConfig {
            fallback: FallbackPolicy::Decelerate { throttle: -0.5 },
            ..Default::default()
        };
        let decelerate = Mpc::with_solver(config, &solver).unwrap();
        let result = decelerate.step(&telemetry);
        assert_eq!(
            result.command,
            ControlCommand {
                steering: 0.0,
                acceleration: -0.5,
            }
        );
        assert!(result.is_fallback());
        assert_eq!(solver.calls(), 2);
    }

    #[test]
    fn held_command_is_clamped() {
        let solver = MockSolver::failing(Error::QpSetup("unused".to_owned()));
        let config = ControllerConfig::default();
        let mpc = Mpc::with_solver(config.clone(), &solver).unwrap();
        let telemetry = Telemetry {
            ptsx: vec![1.0],
            ptsy: vec![0.0],
            steering_angle: -5.0,
            throttle: 4.0,
            ..Default::default()
        };

        let result = mpc.step(&telemetry);
        assert!(result.is_fallback());
        assert_eq!(
            result.command,
            ControlCommand {
                steering: -config.max_steer,
                acceleration: config.max_throttle,
            }
        );

        let result = mpc.step(&Telemetry {
            steering_angle: 5.0,
            throttle: -4.0,
            ..straight_telemetry(50.0)
        });
        assert_eq!(
            result.command,
            ControlCommand {
                steering: config.max_steer,
                acceleration: -config.max_throttle,
            }
        );
        assert_eq!(solver.calls(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ControllerConfig {
            N: 1,
            ..Default::default()
        };
        match Mpc::new(config) {
            Err(ConfigError::Invalid(_)) => (),
            Err(e) => panic!("unexpected {}", e),
            Ok(_) => panic!("accepted N = 1"),
        }
    }
}
