//! Error types for planning and dispatch.

use thiserror::Error;

use crate::scenario::Assignment;

/// Malformed scenario input. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProblemError {
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SolveError {
    #[error("no feasible route set: {0}")]
    Infeasible(String),
}

/// Inconsistency between solver output and the problem it was built from.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("location index {0} does not exist in the problem")]
    UnknownLocation(usize),

    #[error("route for vehicle {vehicle} visits synthetic location {location} mid-route")]
    SyntheticStop { vehicle: usize, location: usize },

    #[error("route for vehicle {vehicle} does not start and end at its own nodes")]
    MisplacedEndpoints { vehicle: usize },

    #[error("route references unknown vehicle index {0}")]
    UnknownVehicle(usize),
}

/// Failure reported by a [`crate::traits::ScenarioStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("scenario {0} not found")]
    NotFound(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("scenario {0} not found")]
    ScenarioNotFound(String),

    #[error("transport failure after {attempts} attempts: {message}")]
    TransportFailure {
        attempts: u32,
        message: String,
        /// Assignments popped from the queues that never reached the store.
        pending: Vec<Assignment>,
    },

    #[error(transparent)]
    Problem(#[from] ProblemError),

    #[error(transparent)]
    Solve(#[from] SolveError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}
