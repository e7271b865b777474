#![allow(non_snake_case)]

use nalgebra::SVector;

use prelude::*;

mod kinematic_bicycle;
pub use crate::kinematic_bicycle::KinematicBicycle;

mod reference_path;
pub use crate::reference_path::ReferencePath;

/// Number of states in `VehicleState`.
pub const NS: usize = 6;
/// Number of inputs in `Control`.
pub const NI: usize = 2;

/// Vehicle state in the local frame of the current planning cycle.
///
/// The frame origin is the vehicle position at the start of the cycle and its x axis points
/// along the vehicle heading, so the state is only meaningful for the cycle it was made in.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VehicleState<T> {
    pub x: T,
    pub y: T,
    pub psi: T,
    pub v: T,
    /// Cross-track error
    pub cte: T,
    /// Heading error relative to the reference tangent
    pub epsi: T,
}

impl<T: Copy> VehicleState<T> {
    pub fn from_array(a: [T; NS]) -> VehicleState<T> {
        let [x, y, psi, v, cte, epsi] = a;
        VehicleState {
            x,
            y,
            psi,
            v,
            cte,
            epsi,
        }
    }

    pub fn to_array(&self) -> [T; NS] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Control<T> {
    /// Front wheel angle, positive turns counter-clockwise
    pub steering: T,
    pub acceleration: T,
}

pub fn rk4<const N: usize, F>(dt: float, num_steps: u32, y_0: &SVector<float, N>, mut f: F) -> SVector<float, N>
where
    F: FnMut(&SVector<float, N>) -> SVector<float, N>,
{
    let h = dt / float::from(num_steps);
    let mut y = *y_0;
    for _ in 0..num_steps {
        let k1 = f(&y) * h;
        let k2 = f(&(y + 0.5 * k1)) * h;
        let k3 = f(&(y + 0.5 * k2)) * h;
        let k4 = f(&(y + k3)) * h;
        y += (k1 + 2.0 * (k2 + k3) + k4) / 6.0;
    }
    y
}
