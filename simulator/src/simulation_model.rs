use nalgebra::Vector4;
use std::collections::VecDeque;

use control_model::{Control, KinematicBicycle};
use prelude::*;

/// World frame vehicle whose commands reach the wheels after a fixed delay.
pub struct Plant {
    model: KinematicBicycle,
    /// `[x, y, psi, v]`
    state: Vector4<float>,
    time: float,
    latency: float,
    throttle_gain: float,
    active: Control<float>,
    // (time the command takes effect, command)
    pending: VecDeque<(float, Control<float>)>,
}

impl Plant {
    pub fn new(
        Lf: float,
        latency: float,
        throttle_gain: float,
        pose: (float, float, float),
        v: float,
    ) -> Plant {
        Plant {
            model: KinematicBicycle::new(Lf),
            state: Vector4::new(pose.0, pose.1, pose.2, v),
            time: 0.0,
            latency,
            throttle_gain,
            active: Control::default(),
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &Vector4<float> {
        &self.state
    }

    pub fn time(&self) -> float {
        self.time
    }

    /// Queues a local frame command issued now.
    pub fn command(&mut self, u: Control<float>) {
        let u = Control {
            steering: u.steering,
            acceleration: u.acceleration * self.throttle_gain,
        };
        self.pending.push_back((self.time + self.latency, u));
    }

    pub fn advance(&mut self, duration: float) {
        let end = self.time + duration;
        while self.time < end {
            // Pick up any command that has taken effect
            while let Some(&(t, u)) = self.pending.front() {
                if t > self.time {
                    break;
                }
                self.active = u;
                self.pending.pop_front();
            }

            let until = match self.pending.front() {
                Some(&(t, _)) if t < end => t,
                _ => end,
            };
            self.state = self.model.integrate(until - self.time, &self.state, &self.active);
            self.state[2] = phase_unwrap(0.0, self.state[2]);
            self.time = until;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_waits_for_latency() {
        let mut plant = Plant::new(2.67, 0.25, 1.0, (0.0, 0.0, 0.0), 10.0);
        plant.command(Control {
            steering: 0.0,
            acceleration: 2.0,
        });

        plant.advance(0.1);
        assert_eq!(plant.state()[3], 10.0);

        plant.advance(0.2);
        // Accelerating for the last 0.05s
        assert!((plant.state()[3] - 10.1).abs() < 1e-9, "{}", plant.state());
        assert!((plant.time() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn zero_latency_applies_immediately() {
        let mut plant = Plant::new(2.67, 0.0, 0.5, (1.0, 2.0, 0.0), 0.0);
        plant.command(Control {
            steering: 0.0,
            acceleration: 1.0,
        });

        plant.advance(1.0);

        let state = plant.state();
        assert!((state[3] - 0.5).abs() < 1e-9);
        assert!((state[0] - 1.25).abs() < 1e-9);
        assert_eq!(state[1], 2.0);
    }
}
