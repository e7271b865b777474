// Ignore this lint otherwise many warnings are generated for common mathematical notation
#![allow(non_snake_case)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

mod config;
mod flame_merge;
mod simulation_model;
mod track;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::error::Error;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use control_model::Control;
use controller::{ControlCommand, Mpc, Outcome, Telemetry};
use prelude::*;

use crate::config::SimulatorConfig;
use crate::simulation_model::Plant;
use crate::track::Track;

/// One row of the optional CSV trace.
#[derive(Serialize)]
struct Record {
    t: float,
    x: float,
    y: float,
    psi: float,
    speed: float,
    cte: float,
    steering: float,
    throttle: float,
    solve_ms: float,
    iterations: u32,
    fallback: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        error!("simulation failed: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let sim_config = SimulatorConfig::load()?;
    let mpc = Mpc::from_config()?;
    let controller_config = mpc.config().clone();

    let track = Track::load(&sim_config.track)?;
    info!("loaded {} track points from {}", track.len(), sim_config.track);

    let mut plant = Plant::new(
        controller_config.Lf,
        sim_config.latency,
        sim_config.throttle_gain,
        track.start_pose(),
        sim_config.initial_speed,
    );

    let mut rng = StdRng::seed_from_u64(sim_config.seed);
    let position_noise = Normal::new(0.0, sim_config.position_noise)?;
    let heading_noise = Normal::new(0.0, sim_config.heading_noise)?;

    let mut recorder = match sim_config.record {
        Some(ref path) => Some(csv::Writer::from_path(path)?),
        None => None,
    };

    let n_steps = (sim_config.t / sim_config.dt) as usize;
    let cycle = Duration::from_secs_f64(sim_config.dt);
    let mut solve_stats = stats::OnlineStats::new();
    let mut cte_stats = stats::OnlineStats::new();
    let mut n_fallbacks = 0;
    let mut consecutive_fallbacks = 0;
    let mut applied = ControlCommand::default();
    let mut outcome: Result<(), Box<dyn Error>> = Ok(());

    for _ in 0..n_steps {
        let cycle_start = Instant::now();
        let state = *plant.state();

        // Add noise to measurement
        let (x, y, psi) = (
            state[0] + position_noise.sample(&mut rng),
            state[1] + position_noise.sample(&mut rng),
            state[2] + heading_noise.sample(&mut rng),
        );
        let (ptsx, ptsy) = track.waypoints(x, y, sim_config.n_waypoints);
        let telemetry = Telemetry {
            ptsx,
            ptsy,
            x,
            y,
            psi,
            speed: state[3],
            steering_angle: applied.steering,
            throttle: applied.acceleration,
        };

        let solve_start = Instant::now();
        let result = mpc.step(&telemetry);
        let solve_ms = solve_start.elapsed().as_secs_f64() * 1e3;
        solve_stats.add(solve_ms);

        let iterations = match result.outcome {
            Outcome::Optimal { iterations, .. } => {
                consecutive_fallbacks = 0;
                iterations
            }
            Outcome::Fallback(_) => {
                n_fallbacks += 1;
                consecutive_fallbacks += 1;
                0
            }
        };

        applied = result.command;
        plant.command(Control {
            steering: controller_config
                .steering
                .to_local(applied.steering, controller_config.max_steer),
            acceleration: applied.acceleration,
        });

        let cte = track.distance(state[0], state[1]);
        cte_stats.add(cte);

        info!(
            "t {:.2}s: position ({:.2}, {:.2}) heading {:.3} speed {:.2} cte {:.3}",
            plant.time(),
            state[0],
            state[1],
            state[2],
            state[3],
            cte
        );
        info!(
            "command {:?} after {} iterations in {:.1}ms",
            applied, iterations, solve_ms
        );

        if let Some(ref mut recorder) = recorder {
            recorder.serialize(Record {
                t: plant.time(),
                x: state[0],
                y: state[1],
                psi: state[2],
                speed: state[3],
                cte,
                steering: applied.steering,
                throttle: applied.acceleration,
                solve_ms,
                iterations,
                fallback: result.is_fallback(),
            })?;
        }

        if consecutive_fallbacks > sim_config.max_consecutive_fallbacks {
            outcome = Err(format!(
                "controller fell back on {} consecutive cycles",
                consecutive_fallbacks
            )
            .into());
            break;
        }

        plant.advance(sim_config.dt);

        if sim_config.real_time {
            match cycle.checked_sub(cycle_start.elapsed()) {
                Some(remaining) => thread::sleep(remaining),
                None => warn!(
                    "cycle missed deadline. took {:.1}ms.",
                    cycle_start.elapsed().as_secs_f64() * 1e3
                ),
            }
        }
    }

    if let Some(mut recorder) = recorder {
        recorder.flush()?;
    }

    println!("Solve time (mean/ms, stdev/ms): {:?}", solve_stats);
    println!("Cross track error (mean, stdev): {:?}", cte_stats);
    println!("Fallback cycles: {}", n_fallbacks);

    if sim_config.profile {
        flame_merge::write_flame("flame-graph.html")?;
    }

    outcome
}
