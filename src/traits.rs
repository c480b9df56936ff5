//! Core seams of the dispatcher.
//!
//! The solver, the travel-time source and the scenario service each sit behind
//! one of these.

use std::time::Duration;

use crate::error::{SolveError, StoreError};
use crate::problem::RoutingProblem;
use crate::scenario::{Assignment, ScenarioSnapshot};
use crate::solver::Solution;

/// Provides a travel-time matrix for a set of locations.
///
/// The matrix is indexed by the provided location order.
pub trait DistanceMatrixProvider {
    fn matrix_for(&self, locations: &[(f64, f64)]) -> Vec<Vec<i64>>;
}

/// Searches for a feasible, low-cost set of vehicle routes.
pub trait Solver {
    /// Returns the best feasible solution found within `time_budget`.
    ///
    /// Running out of time is not an error; `Err` means no feasible
    /// assignment exists.
    fn solve(
        &self,
        problem: &RoutingProblem,
        time_budget: Duration,
    ) -> Result<Solution, SolveError>;
}

/// Remote source of scenario state.
pub trait ScenarioStore {
    fn get_snapshot(&self, scenario_id: &str) -> Result<ScenarioSnapshot, StoreError>;

    fn submit_assignments(
        &self,
        scenario_id: &str,
        batch: &[Assignment],
    ) -> Result<(), StoreError>;
}

impl<T: ScenarioStore + ?Sized> ScenarioStore for &T {
    fn get_snapshot(&self, scenario_id: &str) -> Result<ScenarioSnapshot, StoreError> {
        (**self).get_snapshot(scenario_id)
    }

    fn submit_assignments(
        &self,
        scenario_id: &str,
        batch: &[Assignment],
    ) -> Result<(), StoreError> {
        (**self).submit_assignments(scenario_id, batch)
    }
}
