use control_model::{Control, KinematicBicycle, ReferencePath, VehicleState};
use prelude::*;
use crate::config::{ControllerConfig, LatencyModel};

/// Predicts the local frame state at the moment a command issued now takes effect.
///
/// `previous` is the command currently being applied, in the local steering convention.
pub fn project(
    config: &ControllerConfig,
    v: float,
    previous: &Control<float>,
    path: &ReferencePath,
) -> VehicleState<float> {
    let start = VehicleState {
        v,
        cte: path.evaluate(0.0),
        ..Default::default()
    };
    let dt_lat = config.latency;

    let projected = if dt_lat > 0.0 {
        let model = KinematicBicycle::new(config.Lf);
        model.step(dt_lat, &start, previous, path)
    } else {
        start
    };

    let (cte, epsi) = match config.latency_model {
        LatencyModel::Linear => {
            let [_, c1, _, _] = *path.coeffs();
            (
                path.evaluate(0.0) + v * previous.steering.sin() * dt_lat,
                c1.atan() + v * previous.steering / config.Lf * dt_lat,
            )
        }
        LatencyModel::Polynomial => (
            path.evaluate(projected.x) - projected.y,
            projected.psi - path.heading(projected.x),
        ),
    };

    VehicleState {
        cte,
        epsi,
        ..projected
    }
}
