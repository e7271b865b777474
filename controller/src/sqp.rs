use log::Level::Trace;
use osqp_wrapper::{Problem, Settings, Status};
use std::time::{Duration, Instant};

use prelude::*;
use crate::config::SolverSettings;
use crate::nlp::MpcProblem;
use crate::Error;

/// Sufficient decrease parameter of the merit line search
const ARMIJO: float = 1e-4;
const MIN_STEP_LENGTH: float = 1e-8;

#[derive(Clone, Debug)]
pub struct Solution {
    pub z: Vec<float>,
    pub cost: float,
    pub iterations: u32,
    pub elapsed: Duration,
}

pub trait NlpSolver {
    fn solve(&self, problem: &MpcProblem) -> Result<Solution, Error>;
}

/// Sequential quadratic programming with OSQP subproblems.
///
/// The cost hessian is used exactly and the constraint curvature is dropped, so every
/// subproblem is convex. Steps are globalised with a backtracking line search on the l1 merit
/// function `f(z) + mu |g(z)|_1`.
#[derive(Clone, Debug)]
pub struct Sqp {
    settings: SolverSettings,
}

impl Sqp {
    pub fn new(settings: SolverSettings) -> Sqp {
        Sqp { settings }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    fn osqp_settings(&self) -> Settings {
        Settings::default()
            .verbose(log_enabled!(Trace))
            .polish(true)
            .warm_start(true)
            .eps_abs(self.settings.qp_tolerance)
            .eps_rel(self.settings.qp_tolerance)
            .max_iter(self.settings.qp_max_iterations)
    }
}

impl NlpSolver for Sqp {
    fn solve(&self, problem: &MpcProblem) -> Result<Solution, Error> {
        let _guard = start_guard("sqp solve");
        let start = Instant::now();
        let time_limit = self.settings.time_limit();
        let layout = problem.layout;
        let n_constraints = layout.n_constraints();
        let control_start = layout.control(0, 0);

        let P = problem.cost_hessian().build_csc();
        let q = problem.linear_cost();
        let (control_lo, control_hi) = problem.control_bounds();

        // Linearised constraints above simple bounds on the control steps
        let (J, J_block) = problem.jacobian_pattern();
        let n_controls = layout.n_controls();
        let mut A = sparse::vstack(&[
            J,
            sparse::hstack(&[
                sparse::zeros(n_controls, control_start),
                sparse::eye(n_controls),
            ]),
        ])
        .build_csc();

        let mut z = problem.initial_guess();
        let mut g = problem.constraints(&z);
        let mut cost = problem.cost(&z);

        let gradient = |z: &[float]| -> Vec<float> {
            P.symmetric_mul_vec(z)
                .iter()
                .zip(&q)
                .map(|(a, b)| a + b)
                .collect()
        };
        let bounds = |z: &[float], g: &[float]| -> (Vec<float>, Vec<float>) {
            let mut l = Vec::with_capacity(n_constraints + n_controls);
            let mut u = Vec::with_capacity(n_constraints + n_controls);
            l.extend(g.iter().map(|g| -g));
            u.extend(g.iter().map(|g| -g));
            let controls = &z[control_start..];
            l.extend(control_lo.iter().zip(controls).map(|(lo, z)| lo - z));
            u.extend(control_hi.iter().zip(controls).map(|(hi, z)| hi - z));
            (l, u)
        };

        A.set_block(&J_block, &problem.jacobian_values(&z));
        let mut grad = gradient(&z);
        let (l, u) = bounds(&z, &g);
        let mut qp = Problem::new(&P, &grad, &A, &l, &u, &self.osqp_settings())
            .map_err(|e| Error::QpSetup(format!("{:?}", e)))?;

        let mut mu: float = 1.0;

        for iteration in 1..=self.settings.max_iterations {
            let elapsed = start.elapsed();
            let remaining = match time_limit.checked_sub(elapsed) {
                Some(remaining) if remaining > Duration::from_secs(0) => remaining,
                _ => {
                    return Err(Error::SolverTimeout {
                        iterations: iteration - 1,
                        elapsed,
                    })
                }
            };
            qp.update_time_limit(Some(remaining));

            let (d, y) = match qp.solve() {
                Status::Solved(solution) | Status::SolvedInaccurate(solution) => {
                    (solution.x().to_vec(), solution.y().to_vec())
                }
                // The merit line search decides whether the unconverged step is any use
                Status::MaxIterationsReached(solution) => {
                    debug!("qp iteration limit reached in sqp iteration {}", iteration);
                    (solution.x().to_vec(), solution.y().to_vec())
                }
                Status::TimeLimitReached(_) => {
                    return Err(Error::SolverTimeout {
                        iterations: iteration,
                        elapsed: start.elapsed(),
                    })
                }
                status => {
                    return Err(Error::SolverNonConvergence {
                        iterations: iteration,
                        reason: qp_failure(&status).to_owned(),
                    })
                }
            };

            let line_search = start_guard("line search");
            let g_norm = norm_1(&g);
            mu = max(mu, 1.1 * norm_inf(&y[..n_constraints]));
            let merit = cost + mu * g_norm;
            // Directional derivative of the merit function along d
            let slope = min(dot(&grad, &d) - mu * g_norm, 0.0);

            let small_step = step_is_small(&z, &d, self.settings.step_tolerance);

            let mut alpha = 1.0;
            let (z_next, g_next, cost_next) = loop {
                let z_trial: Vec<float> = z.iter().zip(&d).map(|(z, d)| z + alpha * d).collect();
                let g_trial = problem.constraints(&z_trial);
                let cost_trial = problem.cost(&z_trial);
                let merit_trial = cost_trial + mu * norm_1(&g_trial);

                if small_step || merit_trial <= merit + ARMIJO * alpha * slope {
                    break (z_trial, g_trial, cost_trial);
                }

                alpha *= 0.5;
                if alpha < MIN_STEP_LENGTH {
                    return Err(Error::SolverNonConvergence {
                        iterations: iteration,
                        reason: "line search failed".to_owned(),
                    });
                }
            };

            if !cost_next.is_finite() || z_next.iter().chain(&g_next).any(|v| !v.is_finite()) {
                return Err(Error::SolverNonConvergence {
                    iterations: iteration,
                    reason: "non-finite iterate".to_owned(),
                });
            }

            line_search.end();

            z = z_next;
            g = g_next;
            cost = cost_next;

            let violation = norm_inf(&g);
            debug!(
                "sqp iteration {}: cost {:.6e} violation {:.3e} step {:.3e} alpha {} mu {:.3e}",
                iteration,
                cost,
                violation,
                norm_inf(&d),
                alpha,
                mu
            );

            // A full qp step that is already negligible means the previous iterate was stationary
            if violation <= self.settings.constraint_tolerance && small_step {
                return Ok(Solution {
                    z,
                    cost,
                    iterations: iteration,
                    elapsed: start.elapsed(),
                });
            }

            // Relinearise around the new iterate
            let _guard = start_guard("relinearise");
            grad = gradient(&z);
            A.set_block(&J_block, &problem.jacobian_values(&z));
            let (l, u) = bounds(&z, &g);
            qp.update_lin_cost(&grad);
            qp.update_A(&A);
            qp.update_bounds(&l, &u);
        }

        Err(Error::SolverNonConvergence {
            iterations: self.settings.max_iterations,
            reason: "iteration limit reached".to_owned(),
        })
    }
}

/// True when every component of the qp step `d` is within `tolerance` relative to `z`.
fn step_is_small(z: &[float], d: &[float], tolerance: float) -> bool {
    z.iter()
        .zip(d)
        .all(|(z, d)| d.abs() <= tolerance * (1.0 + z.abs()))
}

fn qp_failure(status: &Status) -> &'static str {
    match status {
        Status::PrimalInfeasible(_) | Status::PrimalInfeasibleInaccurate(_) => "qp infeasible",
        Status::DualInfeasible(_) | Status::DualInfeasibleInaccurate(_) => "qp unbounded",
        Status::NonConvex(_) => "qp non-convex",
        _ => "qp failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::nlp::{ACCELERATION, STEERING};
    use control_model::{ReferencePath, VehicleState};

    fn problem(config: &ControllerConfig, path: [float; 4], v: float) -> MpcProblem {
        let initial = VehicleState {
            v,
            cte: path[0],
            epsi: path[1].atan(),
            ..Default::default()
        };
        MpcProblem::new(config, ReferencePath::new(path), initial)
    }

    #[test]
    fn straight_path_at_reference_speed_needs_no_control() {
        let config = ControllerConfig::default();
        let problem = problem(&config, [0.0; 4], config.v_ref);

        let solution = Sqp::new(config.solver.clone()).solve(&problem).unwrap();

        for t in 0..problem.layout.N - 1 {
            let u = problem.layout.control_at(&solution.z, t);
            assert!(u.steering.abs() < 1e-4, "{:?}", u);
            assert!(u.acceleration.abs() < 1e-4, "{:?}", u);
        }
        assert!(solution.cost < 1e-3);
    }

    #[test]
    fn controls_respect_bounds_and_reproduce_states() {
        let config = ControllerConfig::default();
        // Well below the reference speed with the path off to the left
        let problem = problem(&config, [2.0, 0.0, 0.0, 0.0], 10.0);

        let solution = Sqp::new(config.solver.clone()).solve(&problem).unwrap();
        let layout = problem.layout;

        let tolerance = 1e-5;
        for t in 0..layout.N - 1 {
            let u = layout.control_at(&solution.z, t);
            assert!(u.steering.abs() <= config.max_steer + tolerance, "{:?}", u);
            assert!(u.acceleration.abs() <= config.max_throttle + tolerance, "{:?}", u);
        }
        assert!(solution.z[layout.control(STEERING, 0)] > 0.0);
        // Throttle saturates to close the speed gap
        assert!(solution.z[layout.control(ACCELERATION, 0)] > 0.9 * config.max_throttle);

        // Rolling the model forward with the returned controls reproduces the prediction
        let mut state = problem.initial;
        for t in 0..layout.N {
            if t > 0 {
                let u = layout.control_at(&solution.z, t - 1);
                state = problem.model.step(problem.dt, &state, &u, &problem.path);
            }
            let predicted = layout.state_at(&solution.z, t);
            for (a, b) in state.to_array().iter().zip(predicted.to_array().iter()) {
                assert!((a - b).abs() < 1e-2, "t {}: {:?} {:?}", t, state, predicted);
            }
        }
    }

    #[test]
    fn large_offset_saturates_steering_within_bounds() {
        let config = ControllerConfig::default();
        // Path 8m to the left and heading further away
        let problem = problem(&config, [8.0, 0.3, 0.0, 0.0], 20.0);

        let solution = Sqp::new(config.solver.clone()).solve(&problem).unwrap();
        let layout = problem.layout;

        let tolerance = 1e-5;
        let mut saturated = 0;
        for t in 0..layout.N - 1 {
            let steering = layout.control_at(&solution.z, t).steering;
            assert!(steering.abs() <= config.max_steer + tolerance, "t {}: {}", t, steering);
            if steering > config.max_steer - 1e-3 {
                saturated += 1;
            }
        }
        assert!(saturated >= 1, "{:?}", layout.control_at(&solution.z, 0));
    }

    #[test]
    fn converged_controls_match_tight_tolerance_solve() {
        let config = ControllerConfig::default();
        let problem = problem(&config, [5.0, 0.2, 0.01, 0.0], 40.0);
        let loose = Sqp::new(config.solver.clone()).solve(&problem).unwrap();

        let mut tight = config.solver.clone();
        tight.step_tolerance = 1e-7;
        tight.constraint_tolerance = 1e-8;
        tight.qp_tolerance = 1e-8;
        tight.max_iterations = 200;
        tight.time_limit = 10.0;
        let tight = Sqp::new(tight).solve(&problem).unwrap();

        let layout = problem.layout;
        for &c in [STEERING, ACCELERATION].iter() {
            let (a, b) = (loose.z[layout.control(c, 0)], tight.z[layout.control(c, 0)]);
            assert!((a - b).abs() < 1e-4, "control {}: {} vs {}", c, a, b);
        }
        assert!(loose.iterations <= tight.iterations);
    }

    #[test]
    fn small_step_is_relative_per_component() {
        let z = [200.0, 0.1];
        assert!(step_is_small(&z, &[1e-2, 1e-5], 1e-4));
        // A position scale must not hide a control step
        assert!(!step_is_small(&z, &[0.0, 1e-3], 1e-4));
    }

    #[test]
    fn exhausted_time_budget_is_a_timeout() {
        let mut config = ControllerConfig::default();
        config.solver.time_limit = 1e-9;
        let problem = problem(&config, [1.0, 0.0, 0.0, 0.0], 10.0);

        match Sqp::new(config.solver.clone()).solve(&problem) {
            Err(Error::SolverTimeout { .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn iteration_limit_is_non_convergence() {
        let mut config = ControllerConfig::default();
        config.solver.max_iterations = 1;
        let problem = problem(&config, [5.0, 0.2, 0.01, 0.0], 40.0);

        match Sqp::new(config.solver.clone()).solve(&problem) {
            Err(Error::SolverNonConvergence { iterations, .. }) => assert_eq!(iterations, 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
