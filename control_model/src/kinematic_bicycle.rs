// Kinematic bicycle model with the cross-track and heading errors appended to the state.

use nalgebra::{Matrix6, Matrix6x2, Vector4};

use prelude::*;
use crate::{Control, ReferencePath, VehicleState};

#[derive(Clone, Copy, Debug)]
pub struct KinematicBicycle {
    /// Distance from the front axle to the centre of gravity
    pub Lf: float,
}

impl KinematicBicycle {
    pub fn new(Lf: float) -> KinematicBicycle {
        assert!(Lf > 0.0);
        KinematicBicycle { Lf }
    }

    /// Advances the state by one forward Euler step of length `dt`.
    ///
    /// The errors at the next step are measured against the path at the current position,
    /// which is what keeps each residual of the optimisation problem local to one stage.
    pub fn step<T: Real>(
        &self,
        dt: float,
        s: &VehicleState<T>,
        u: &Control<T>,
        path: &ReferencePath,
    ) -> VehicleState<T> {
        let dt: T = dt.into();
        let inv_Lf: T = (1.0 / self.Lf).into();
        let (sin_psi, cos_psi) = s.psi.sin_cos();
        let turn = s.v * u.steering * inv_Lf * dt;

        VehicleState {
            x: s.x + s.v * cos_psi * dt,
            y: s.y + s.v * sin_psi * dt,
            psi: s.psi + turn,
            v: s.v + u.acceleration * dt,
            cte: (path.evaluate(s.x) - s.y) + s.v * s.epsi.sin() * dt,
            epsi: (s.psi - path.heading(s.x)) + turn,
        }
    }

    /// Returns the jacobian of `step` with respect to the state and the inputs.
    pub fn linearise(
        &self,
        dt: float,
        s: &VehicleState<float>,
        u: &Control<float>,
        path: &ReferencePath,
    ) -> (Matrix6<float>, Matrix6x2<float>) {
        let (sin_psi, cos_psi) = s.psi.sin_cos();
        let (sin_epsi, cos_epsi) = s.epsi.sin_cos();
        let v = s.v;
        let delta = u.steering;
        let inv_Lf = 1.0 / self.Lf;

        let f_dash = path.derivative(s.x);
        let f_dash_2 = path.second_derivative(s.x);
        // d/dx atan(f'(x))
        let d_heading_x = f_dash_2 / (1.0 + f_dash * f_dash);

        #[cfg_attr(rustfmt, rustfmt_skip)]
        let A = Matrix6::new(
            1.0, 0.0, -v * sin_psi * dt, cos_psi * dt, 0.0, 0.0,
            0.0, 1.0, v * cos_psi * dt, sin_psi * dt, 0.0, 0.0,
            0.0, 0.0, 1.0, delta * inv_Lf * dt, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
            f_dash, -1.0, 0.0, sin_epsi * dt, 0.0, v * cos_epsi * dt,
            -d_heading_x, 0.0, 1.0, delta * inv_Lf * dt, 0.0, 0.0,
        );

        #[cfg_attr(rustfmt, rustfmt_skip)]
        let B = Matrix6x2::new(
            0.0, 0.0,
            0.0, 0.0,
            v * inv_Lf * dt, 0.0,
            0.0, dt,
            0.0, 0.0,
            v * inv_Lf * dt, 0.0,
        );

        (A, B)
    }

    /// Returns two boolean matrices with true everywhere A and B could contain a non-zero value
    pub fn linearise_sparsity(&self) -> (Matrix6<bool>, Matrix6x2<bool>) {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let A_mask = Matrix6::new(
            true, false, true, true, false, false,
            false, true, true, true, false, false,
            false, false, true, true, false, false,
            false, false, false, true, false, false,
            true, true, false, true, false, true,
            true, false, true, true, false, false,
        );

        #[cfg_attr(rustfmt, rustfmt_skip)]
        let B_mask = Matrix6x2::new(
            false, false,
            false, false,
            true, false,
            false, true,
            false, false,
            true, false,
        );

        (A_mask, B_mask)
    }

    /// Continuous time derivative of the world frame pose `[x, y, psi, v]`.
    pub fn state_equation(&self, x: &Vector4<float>, u: &Control<float>) -> Vector4<float> {
        let (psi, v) = (x[2], x[3]);
        let (sin_psi, cos_psi) = psi.sin_cos();

        Vector4::new(
            v * cos_psi,
            v * sin_psi,
            v * u.steering / self.Lf,
            u.acceleration,
        )
    }

    /// Integrates the world frame pose over `dt` with the inputs held constant.
    pub fn integrate(&self, dt: float, x: &Vector4<float>, u: &Control<float>) -> Vector4<float> {
        crate::rk4(dt, 5, x, |x| self.state_equation(x, u))
    }
}
