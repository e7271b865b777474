//! The finite horizon tracking problem as a nonlinear program.
//!
//! The decision vector holds each state component contiguously over the horizon followed by
//! each control component:
//!
//! ```text
//! [x_0..x_N-1, y_.., psi_.., v_.., cte_.., epsi_.., delta_0..delta_N-2, a_0..a_N-2]
//! ```
//!
//! The constraint vector has the same state layout. Row `k * N` pins state component `k` to the
//! initial state and row `k * N + t + 1` is the residual of the model step from `t` to `t + 1`.

use control_model::{Control, KinematicBicycle, ReferencePath, VehicleState, NI, NS};
use prelude::*;

use crate::config::{ControllerConfig, Weights};

pub const X: usize = 0;
pub const Y: usize = 1;
pub const PSI: usize = 2;
pub const V: usize = 3;
pub const CTE: usize = 4;
pub const EPSI: usize = 5;

pub const STEERING: usize = 0;
pub const ACCELERATION: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Layout {
    pub N: usize,
}

impl Layout {
    pub fn new(N: usize) -> Layout {
        assert!(N >= 3, "horizon must contain at least three states");
        Layout { N }
    }

    pub fn n_vars(&self) -> usize {
        NS * self.N + NI * (self.N - 1)
    }

    pub fn n_constraints(&self) -> usize {
        NS * self.N
    }

    pub fn n_controls(&self) -> usize {
        NI * (self.N - 1)
    }

    /// Index of state component `k` at step `t`.
    pub fn state(&self, k: usize, t: usize) -> usize {
        debug_assert!(k < NS && t < self.N);
        k * self.N + t
    }

    /// Index of control component `c` at step `t`.
    pub fn control(&self, c: usize, t: usize) -> usize {
        debug_assert!(c < NI && t < self.N - 1);
        NS * self.N + c * (self.N - 1) + t
    }

    pub fn state_at<T: Copy>(&self, z: &[T], t: usize) -> VehicleState<T> {
        VehicleState {
            x: z[self.state(X, t)],
            y: z[self.state(Y, t)],
            psi: z[self.state(PSI, t)],
            v: z[self.state(V, t)],
            cte: z[self.state(CTE, t)],
            epsi: z[self.state(EPSI, t)],
        }
    }

    pub fn control_at<T: Copy>(&self, z: &[T], t: usize) -> Control<T> {
        Control {
            steering: z[self.control(STEERING, t)],
            acceleration: z[self.control(ACCELERATION, t)],
        }
    }
}

/// One planning cycle's optimisation problem.
#[derive(Clone, Debug)]
pub struct MpcProblem {
    pub layout: Layout,
    pub model: KinematicBicycle,
    pub dt: float,
    pub path: ReferencePath,
    pub initial: VehicleState<float>,
    pub weights: Weights,
    pub v_ref: float,
    pub max_steer: float,
    pub max_throttle: float,
}

impl MpcProblem {
    pub fn new(
        config: &ControllerConfig,
        path: ReferencePath,
        initial: VehicleState<float>,
    ) -> MpcProblem {
        MpcProblem {
            layout: Layout::new(config.N),
            model: KinematicBicycle::new(config.Lf),
            dt: config.dt,
            path,
            initial,
            weights: config.weights.clone(),
            v_ref: config.v_ref,
            max_steer: config.max_steer,
            max_throttle: config.max_throttle,
        }
    }

    pub fn cost<T: Real>(&self, z: &[T]) -> T {
        assert_eq!(z.len(), self.layout.n_vars());
        let N = self.layout.N;
        let w = &self.weights;
        let (w_cte, w_epsi, w_v): (T, T, T) = (w.cte.into(), w.epsi.into(), w.speed.into());
        let (w_delta, w_a): (T, T) = (w.steering.into(), w.throttle.into());
        let (w_ddelta, w_da): (T, T) = (w.steering_change.into(), w.throttle_change.into());
        let v_ref: T = self.v_ref.into();

        let mut cost = T::zero();
        for t in 0..N {
            let s = self.layout.state_at(z, t);
            let dv = s.v - v_ref;
            cost = cost + w_cte * s.cte * s.cte + w_epsi * s.epsi * s.epsi + w_v * dv * dv;
        }
        for t in 0..N - 1 {
            let u = self.layout.control_at(z, t);
            cost = cost
                + w_delta * u.steering * u.steering
                + w_a * u.acceleration * u.acceleration;
        }
        for t in 0..N - 2 {
            let (u, u_next) = (self.layout.control_at(z, t), self.layout.control_at(z, t + 1));
            let (ddelta, da) = (
                u_next.steering - u.steering,
                u_next.acceleration - u.acceleration,
            );
            cost = cost + w_ddelta * ddelta * ddelta + w_da * da * da;
        }
        cost
    }

    /// Initial state pin and model step residuals. All zero for a feasible `z`.
    pub fn constraints<T: Real>(&self, z: &[T]) -> Vec<T> {
        assert_eq!(z.len(), self.layout.n_vars());
        let N = self.layout.N;
        let mut g = vec![T::zero(); self.layout.n_constraints()];

        let initial = self.initial.to_array();
        for k in 0..NS {
            let row = self.layout.state(k, 0);
            let pinned: T = initial[k].into();
            g[row] = z[row] - pinned;
        }

        for t in 0..N - 1 {
            let next = self
                .model
                .step(
                    self.dt,
                    &self.layout.state_at(z, t),
                    &self.layout.control_at(z, t),
                    &self.path,
                )
                .to_array();
            for k in 0..NS {
                let row = self.layout.state(k, t + 1);
                g[row] = z[row] - next[k];
            }
        }
        g
    }

    /// Upper triangle of the constant cost hessian `P`, so that
    /// `cost(z) = 0.5 z' P z + q' z + constant`.
    pub fn cost_hessian(&self) -> sparse::Builder {
        let N = self.layout.N;
        let w = &self.weights;

        // Absolute and first difference penalty on one control over the horizon
        let control_block = |w_abs: float, w_diff: float| {
            let n = N - 1;
            let mut ends = sparse::zeros(n, n);
            ends.push(0, 0, -2.0 * w_diff);
            ends.push(n - 1, n - 1, -2.0 * w_diff);
            sparse::diags(n, &[2.0 * (w_abs + 2.0 * w_diff), -2.0 * w_diff], &[0, 1]) + ends
        };

        sparse::block_diag(&[
            // Position and heading carry no cost
            sparse::zeros(3 * N, 3 * N),
            sparse::eye(N) * (2.0 * w.speed),
            sparse::eye(N) * (2.0 * w.cte),
            sparse::eye(N) * (2.0 * w.epsi),
            control_block(w.steering, w.steering_change),
            control_block(w.throttle, w.throttle_change),
        ])
    }

    /// Linear cost term `q`.
    pub fn linear_cost(&self) -> Vec<float> {
        let mut q = vec![0.0; self.layout.n_vars()];
        for t in 0..self.layout.N {
            q[self.layout.state(V, t)] = -2.0 * self.weights.speed * self.v_ref;
        }
        q
    }

    /// Calls `f(row, col, value)` for every structurally non-zero entry of the constraint
    /// jacobian at `z`. The order of the entries does not depend on `z`.
    fn visit_jacobian<F: FnMut(usize, usize, float)>(&self, z: &[float], mut f: F) {
        let N = self.layout.N;
        let (A_mask, B_mask) = self.model.linearise_sparsity();

        for k in 0..NS {
            let row = self.layout.state(k, 0);
            f(row, row, 1.0);
        }

        for t in 0..N - 1 {
            let (A, B) = self.model.linearise(
                self.dt,
                &self.layout.state_at(z, t),
                &self.layout.control_at(z, t),
                &self.path,
            );
            for k in 0..NS {
                let row = self.layout.state(k, t + 1);
                f(row, row, 1.0);
                for j in 0..NS {
                    if A_mask[(k, j)] {
                        f(row, self.layout.state(j, t), -A[(k, j)]);
                    }
                }
                for c in 0..NI {
                    if B_mask[(k, c)] {
                        f(row, self.layout.control(c, t), -B[(k, c)]);
                    }
                }
            }
        }
    }

    /// Constraint jacobian with a fixed sparsity pattern. Its values are filled in with
    /// `jacobian_values`.
    pub fn jacobian_pattern(&self) -> (sparse::Builder, sparse::BlockRef) {
        let z = vec![0.0; self.layout.n_vars()];
        let mut entries = Vec::new();
        self.visit_jacobian(&z, |r, c, _| entries.push((r, c)));
        sparse::pattern(self.layout.n_constraints(), self.layout.n_vars(), &entries)
    }

    pub fn jacobian_values(&self, z: &[float]) -> Vec<float> {
        assert_eq!(z.len(), self.layout.n_vars());
        let mut values = Vec::new();
        self.visit_jacobian(z, |_, _, val| values.push(val));
        values
    }

    /// Lower and upper bounds of the control entries, in decision vector order.
    pub fn control_bounds(&self) -> (Vec<float>, Vec<float>) {
        let n = self.layout.N - 1;
        let mut lo = Vec::with_capacity(NI * n);
        let mut hi = Vec::with_capacity(NI * n);
        for &limit in [self.max_steer, self.max_throttle].iter() {
            lo.extend((0..n).map(|_| -limit));
            hi.extend((0..n).map(|_| limit));
        }
        (lo, hi)
    }

    /// Rolls the model forward from the initial state with zero controls.
    ///
    /// The result satisfies every constraint exactly.
    pub fn initial_guess(&self) -> Vec<float> {
        let mut z = vec![0.0; self.layout.n_vars()];
        let mut state = self.initial;
        let u = Control::default();
        for t in 0..self.layout.N {
            if t > 0 {
                state = self.model.step(self.dt, &state, &u, &self.path);
            }
            for (k, &val) in state.to_array().iter().enumerate() {
                z[self.layout.state(k, t)] = val;
            }
        }
        z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> MpcProblem {
        let config = ControllerConfig {
            N: 6,
            ..Default::default()
        };
        let initial = VehicleState::from_array([0.0, 0.0, 0.0, 30.0, 0.8, -0.05]);
        MpcProblem::new(&config, ReferencePath::new([0.8, 0.05, 0.004, -0.0001]), initial)
    }

    // Deterministic, non-trivial decision vector
    fn sample_z(problem: &MpcProblem) -> Vec<float> {
        (0..problem.layout.n_vars())
            .map(|i| {
                let i = i as float;
                (0.37 * i).sin() * 0.3 + if i >= 18.0 && i < 24.0 { 25.0 } else { 0.0 }
            })
            .collect()
    }

    #[test]
    fn layout_indices() {
        let layout = Layout::new(5);
        assert_eq!(layout.n_vars(), 6 * 5 + 2 * 4);
        assert_eq!(layout.n_constraints(), 30);
        assert_eq!(layout.state(PSI, 3), 13);
        assert_eq!(layout.control(STEERING, 0), 30);
        assert_eq!(layout.control(ACCELERATION, 3), 37);

        let z: Vec<float> = (0..layout.n_vars()).map(|i| i as float).collect();
        let s = layout.state_at(&z, 2);
        assert_eq!(s.to_array(), [2.0, 7.0, 12.0, 17.0, 22.0, 27.0]);
        let u = layout.control_at(&z, 1);
        assert_eq!((u.steering, u.acceleration), (31.0, 35.0));
    }

    #[test]
    fn initial_guess_is_feasible() {
        let problem = problem();
        let z = problem.initial_guess();
        let g = problem.constraints(&z);
        assert!(norm_inf(&g) < 1e-12, "{:?}", g);
        assert_eq!(problem.layout.state_at(&z, 0), problem.initial);
    }

    #[test]
    fn hessian_is_upper_and_matches_cost() {
        let problem = problem();
        let P = problem.cost_hessian().build_csc();
        assert!(P.is_upper_triangular());

        let z = sample_z(&problem);
        let q = problem.linear_cost();
        let Pz = P.symmetric_mul_vec(&z);
        let quadratic = 0.5 * dot(&z, &Pz) + dot(&q, &z);

        // The remaining constant is the speed tracking offset
        let constant = problem.layout.N as float * problem.weights.speed * problem.v_ref.powi(2);
        let cost = problem.cost(&z);
        assert!((quadratic + constant - cost).abs() < 1e-9 * cost.abs(), "{} {}", quadratic + constant, cost);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let problem = problem();
        let P = problem.cost_hessian().build_csc();
        let z = sample_z(&problem);
        let q = problem.linear_cost();
        let gradient: Vec<float> = P
            .symmetric_mul_vec(&z)
            .iter()
            .zip(&q)
            .map(|(a, b)| a + b)
            .collect();

        let h = 1e-5;
        for i in 0..z.len() {
            let mut plus = z.clone();
            let mut minus = z.clone();
            plus[i] += h;
            minus[i] -= h;
            let fd = (problem.cost(&plus) - problem.cost(&minus)) / (2.0 * h);
            assert!((gradient[i] - fd).abs() < 1e-4 * (1.0 + fd.abs()), "{} {} {}", i, gradient[i], fd);
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let problem = problem();
        let z = sample_z(&problem);

        let (pattern, block) = problem.jacobian_pattern();
        let mut J = pattern.build_csc();
        J.set_block(&block, &problem.jacobian_values(&z));
        let J = J.to_dense();

        let h = 1e-6;
        for i in 0..z.len() {
            let mut plus = z.clone();
            let mut minus = z.clone();
            plus[i] += h;
            minus[i] -= h;
            let (g_plus, g_minus) = (problem.constraints(&plus), problem.constraints(&minus));
            for r in 0..problem.layout.n_constraints() {
                let fd = (g_plus[r] - g_minus[r]) / (2.0 * h);
                assert!((J[(r, i)] - fd).abs() < 1e-5, "J[{}, {}] {} {}", r, i, J[(r, i)], fd);
            }
        }
    }

    #[test]
    fn bounds_cover_controls_only() {
        let problem = problem();
        let (lo, hi) = problem.control_bounds();
        assert_eq!(lo.len(), problem.layout.n_controls());
        assert_eq!(hi[0], problem.max_steer);
        assert_eq!(lo[problem.layout.N - 1], -problem.max_throttle);
    }
}
