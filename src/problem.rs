//! Routing problem construction.
//!
//! A scenario snapshot becomes a flat arena of locations: every awaiting
//! customer `k` contributes its pickup at `2k` and its dropoff at `2k + 1`,
//! then every vehicle contributes a start and an end node at its current
//! position. Everything else refers to locations by index.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::dimensions::{
    derive_capacity, CapacityMode, Objective, ObjectiveMode, PrecedencePolicy,
};
use crate::error::ProblemError;
use crate::euclidean::{EuclideanMatrix, DEFAULT_SPEED_FACTOR};
use crate::scenario::ScenarioSnapshot;
use crate::traits::DistanceMatrixProvider;

/// Default multiplier on the even customer split used to derive capacity.
pub const DEFAULT_CAPACITY_FACTOR: f64 = 1.5;

/// Upper bound on the longest arc times the number of arcs in a full plan.
/// Route cumuls and makespan scores stay far below `i64::MAX` under it.
pub const MAX_PLAN_TRAVEL_TIME: f64 = 1e15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationRole {
    Pickup(usize),
    Delivery(usize),
    VehicleStart(usize),
    VehicleEnd(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub position: (f64, f64),
    pub role: LocationRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrecedencePair {
    pub pickup: usize,
    pub delivery: usize,
}

/// Knobs that shape a planning cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningOptions {
    pub objective: ObjectiveMode,
    pub precedence: PrecedencePolicy,
    pub capacity_mode: CapacityMode,
    /// Uniform per-vehicle capacity; derived from fleet size when `None`.
    pub vehicle_capacity: Option<u32>,
    pub capacity_factor: f64,
    pub speed_factor: f64,
    pub stop_balance_coefficient: Option<i64>,
}

impl Default for PlanningOptions {
    fn default() -> Self {
        Self {
            objective: ObjectiveMode::default(),
            precedence: PrecedencePolicy::default(),
            capacity_mode: CapacityMode::default(),
            vehicle_capacity: None,
            capacity_factor: DEFAULT_CAPACITY_FACTOR,
            speed_factor: DEFAULT_SPEED_FACTOR,
            stop_balance_coefficient: None,
        }
    }
}

/// Immutable routing problem for one planning cycle.
#[derive(Debug, Clone)]
pub struct RoutingProblem {
    locations: Vec<Location>,
    pairs: Vec<PrecedencePair>,
    vehicle_starts: Vec<usize>,
    vehicle_ends: Vec<usize>,
    matrix: Vec<Vec<i64>>,
    customer_ids: Vec<String>,
    vehicle_ids: Vec<String>,
    capacity: u32,
    capacity_mode: CapacityMode,
    precedence: PrecedencePolicy,
    objective: Objective,
}

impl RoutingProblem {
    /// Builds a problem using straight-line travel times.
    pub fn build(
        snapshot: &ScenarioSnapshot,
        options: &PlanningOptions,
    ) -> Result<Self, ProblemError> {
        Self::build_with(snapshot, options, &EuclideanMatrix::new(options.speed_factor))
    }

    pub fn build_with<M>(
        snapshot: &ScenarioSnapshot,
        options: &PlanningOptions,
        matrix_provider: &M,
    ) -> Result<Self, ProblemError>
    where
        M: DistanceMatrixProvider,
    {
        validate(snapshot, options)?;

        let customers: Vec<_> = snapshot.awaiting_customers().collect();
        let mut locations =
            Vec::with_capacity(customers.len() * 2 + snapshot.vehicles.len() * 2);
        let mut pairs = Vec::with_capacity(customers.len());

        for (k, customer) in customers.iter().enumerate() {
            let pickup = locations.len();
            locations.push(Location {
                position: customer.pickup(),
                role: LocationRole::Pickup(k),
            });
            locations.push(Location {
                position: customer.dropoff(),
                role: LocationRole::Delivery(k),
            });
            pairs.push(PrecedencePair {
                pickup,
                delivery: pickup + 1,
            });
        }

        let mut vehicle_starts = Vec::with_capacity(snapshot.vehicles.len());
        let mut vehicle_ends = Vec::with_capacity(snapshot.vehicles.len());
        for (v, vehicle) in snapshot.vehicles.iter().enumerate() {
            vehicle_starts.push(locations.len());
            locations.push(Location {
                position: vehicle.position(),
                role: LocationRole::VehicleStart(v),
            });
            vehicle_ends.push(locations.len());
            locations.push(Location {
                position: vehicle.position(),
                role: LocationRole::VehicleEnd(v),
            });
        }

        let positions: Vec<(f64, f64)> =
            locations.iter().map(|location| location.position).collect();
        let matrix = matrix_provider.matrix_for(&positions);
        if matrix.len() != positions.len()
            || matrix.iter().any(|row| row.len() != positions.len())
        {
            return Err(ProblemError::InvalidScenario(format!(
                "travel-time matrix does not cover {} locations",
                positions.len()
            )));
        }
        check_travel_times(&matrix, customers.len() * 2 + snapshot.vehicles.len())?;

        let capacity = options.vehicle_capacity.unwrap_or_else(|| {
            derive_capacity(customers.len(), snapshot.vehicles.len(), options.capacity_factor)
        });

        debug!(
            customers = customers.len(),
            vehicles = snapshot.vehicles.len(),
            capacity,
            "built routing problem"
        );

        Ok(Self {
            locations,
            pairs,
            vehicle_starts,
            vehicle_ends,
            matrix,
            customer_ids: customers.iter().map(|customer| customer.id.clone()).collect(),
            vehicle_ids: snapshot.vehicles.iter().map(|vehicle| vehicle.id.clone()).collect(),
            capacity,
            capacity_mode: options.capacity_mode,
            precedence: options.precedence,
            objective: Objective {
                mode: options.objective,
                stop_balance_coefficient: options.stop_balance_coefficient,
            },
        })
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn location(&self, index: usize) -> Option<&Location> {
        self.locations.get(index)
    }

    pub fn pairs(&self) -> &[PrecedencePair] {
        &self.pairs
    }

    pub fn num_customers(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn num_vehicles(&self) -> usize {
        self.vehicle_ids.len()
    }

    pub fn vehicle_start(&self, vehicle: usize) -> usize {
        self.vehicle_starts[vehicle]
    }

    pub fn vehicle_end(&self, vehicle: usize) -> usize {
        self.vehicle_ends[vehicle]
    }

    pub fn customer_id(&self, customer: usize) -> Option<&str> {
        self.customer_ids.get(customer).map(String::as_str)
    }

    pub fn customer_ids(&self) -> &[String] {
        &self.customer_ids
    }

    pub fn vehicle_id(&self, vehicle: usize) -> Option<&str> {
        self.vehicle_ids.get(vehicle).map(String::as_str)
    }

    /// Travel time between two locations.
    pub fn cost(&self, from: usize, to: usize) -> i64 {
        self.matrix[from][to]
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn capacity_mode(&self) -> CapacityMode {
        self.capacity_mode
    }

    pub fn precedence(&self) -> PrecedencePolicy {
        self.precedence
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }
}

fn validate(snapshot: &ScenarioSnapshot, options: &PlanningOptions) -> Result<(), ProblemError> {
    if snapshot.vehicles.is_empty() {
        return Err(ProblemError::InvalidScenario("scenario has no vehicles".to_string()));
    }
    if snapshot.customers.is_empty() {
        return Err(ProblemError::InvalidScenario("scenario has no customers".to_string()));
    }
    if snapshot.awaiting_customers().next().is_none() {
        return Err(ProblemError::InvalidScenario(
            "no customer is awaiting service".to_string(),
        ));
    }
    if !options.speed_factor.is_finite() || options.speed_factor <= 0.0 {
        return Err(ProblemError::InvalidScenario(format!(
            "speed factor must be positive, got {}",
            options.speed_factor
        )));
    }

    let mut vehicle_ids = HashSet::new();
    for vehicle in &snapshot.vehicles {
        if !finite(vehicle.position()) {
            return Err(ProblemError::InvalidScenario(format!(
                "vehicle {} has a non-finite position",
                vehicle.id
            )));
        }
        if !vehicle_ids.insert(vehicle.id.as_str()) {
            return Err(ProblemError::InvalidScenario(format!(
                "duplicate vehicle id {}",
                vehicle.id
            )));
        }
    }

    let mut customer_ids = HashSet::new();
    for customer in &snapshot.customers {
        if !finite(customer.pickup()) || !finite(customer.dropoff()) {
            return Err(ProblemError::InvalidScenario(format!(
                "customer {} has a non-finite coordinate",
                customer.id
            )));
        }
        if !customer_ids.insert(customer.id.as_str()) {
            return Err(ProblemError::InvalidScenario(format!(
                "duplicate customer id {}",
                customer.id
            )));
        }
    }

    let served = snapshot.customers.len() - snapshot.awaiting_customers().count();
    if served > 0 {
        warn!(served, "skipping customers no longer awaiting service");
    }

    Ok(())
}

fn finite(point: (f64, f64)) -> bool {
    point.0.is_finite() && point.1.is_finite()
}

/// Rejects matrices whose plans could overflow: negative arcs, or a longest
/// arc that, taken on every arc of a plan, passes [`MAX_PLAN_TRAVEL_TIME`].
fn check_travel_times(matrix: &[Vec<i64>], arcs: usize) -> Result<(), ProblemError> {
    let mut longest = 0;
    for &cost in matrix.iter().flatten() {
        if cost < 0 {
            return Err(ProblemError::InvalidScenario(format!(
                "negative travel time {cost}"
            )));
        }
        longest = longest.max(cost);
    }
    if longest as f64 * arcs as f64 > MAX_PLAN_TRAVEL_TIME {
        return Err(ProblemError::InvalidScenario(format!(
            "travel time {longest} between two locations is too large to plan with"
        )));
    }
    Ok(())
}
