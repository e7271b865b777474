use prelude::*;
use crate::config::{ControllerConfig, FallbackPolicy};
use crate::nlp::Layout;

/// Actuator command in the consumer's steering convention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ControlCommand {
    pub steering: float,
    /// Normalised throttle, negative to brake
    pub acceleration: float,
}

/// Planned positions in the local frame of the cycle, for display only.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PredictedTrajectory {
    pub points: Vec<(float, float)>,
}

impl PredictedTrajectory {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Splits a solution into the command to apply now and the trajectory it is expected to follow.
pub fn extract(
    z: &[float],
    layout: &Layout,
    config: &ControllerConfig,
) -> (ControlCommand, PredictedTrajectory) {
    let u = layout.control_at(z, 0);
    let steering = clamp(u.steering, -config.max_steer, config.max_steer);
    let acceleration = clamp(u.acceleration, -config.max_throttle, config.max_throttle);

    let command = ControlCommand {
        steering: config.steering.to_consumer(steering, config.max_steer),
        acceleration,
    };

    let trajectory = PredictedTrajectory {
        points: (0..layout.N - 1)
            .map(|t| {
                let s = layout.state_at(z, t);
                (s.x, s.y)
            })
            .collect(),
    };

    (command, trajectory)
}

/// Clamps a consumer command to the actuator bounds. Non-finite values become zero.
pub fn limit(command: ControlCommand, config: &ControllerConfig) -> ControlCommand {
    let finite = |v: float| if v.is_finite() { v } else { 0.0 };
    let convention = &config.steering;
    let steering = convention.to_local(finite(command.steering), config.max_steer);
    ControlCommand {
        steering: convention.to_consumer(
            clamp(steering, -config.max_steer, config.max_steer),
            config.max_steer,
        ),
        acceleration: clamp(
            finite(command.acceleration),
            -config.max_throttle,
            config.max_throttle,
        ),
    }
}

/// Command to apply when the optimiser produced nothing trustworthy.
pub fn fallback(policy: &FallbackPolicy, previous: ControlCommand) -> ControlCommand {
    match *policy {
        FallbackPolicy::Hold => previous,
        FallbackPolicy::Decelerate { throttle } => ControlCommand {
            steering: 0.0,
            acceleration: throttle,
        },
    }
}
