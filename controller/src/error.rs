use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use prelude::*;

/// Reasons a planning cycle did not produce a trustworthy command.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    #[error("{points} waypoints cannot determine an order {order} reference fit")]
    InsufficientWaypoints { points: usize, order: usize },

    #[error("waypoint arrays differ in length ({xs} x values, {ys} y values)")]
    MismatchedWaypoints { xs: usize, ys: usize },

    #[error("waypoint geometry is degenerate (conditioning {conditioning:e})")]
    DegenerateGeometry { conditioning: float },

    #[error("solver did not converge after {iterations} iterations: {reason}")]
    SolverNonConvergence { iterations: u32, reason: String },

    #[error("solver exceeded its time limit after {iterations} iterations ({elapsed:?})")]
    SolverTimeout { iterations: u32, elapsed: Duration },

    #[error("qp setup failed: {0}")]
    QpSetup(String),
}

impl Error {
    /// True for errors raised before the optimiser is reached.
    pub fn is_preprocessing(&self) -> bool {
        match self {
            Error::InsufficientWaypoints { .. }
            | Error::MismatchedWaypoints { .. }
            | Error::DegenerateGeometry { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to deserialise config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocessing_errors_are_classified() {
        assert!(Error::InsufficientWaypoints { points: 2, order: 3 }.is_preprocessing());
        assert!(Error::MismatchedWaypoints { xs: 4, ys: 5 }.is_preprocessing());
        assert!(Error::DegenerateGeometry { conditioning: 0.0 }.is_preprocessing());
        assert!(!Error::QpSetup("bad".to_owned()).is_preprocessing());
        assert!(!Error::SolverTimeout {
            iterations: 1,
            elapsed: Duration::from_millis(600),
        }
        .is_preprocessing());
    }

    #[test]
    fn messages_name_the_failure() {
        let e = Error::InsufficientWaypoints { points: 3, order: 3 };
        assert_eq!(
            e.to_string(),
            "3 waypoints cannot determine an order 3 reference fit"
        );

        let e = Error::SolverNonConvergence {
            iterations: 50,
            reason: "line search failed".to_owned(),
        };
        assert!(e.to_string().ends_with("line search failed"));
    }
}
