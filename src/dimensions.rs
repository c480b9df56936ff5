//! Constraint and objective assembly.
//!
//! A route is checked against three dimensions: cumulative travel time,
//! pickup/delivery precedence and vehicle capacity. Routes that violate any of
//! them have no schedule.

use serde::{Deserialize, Serialize};

use crate::problem::{LocationRole, RoutingProblem};

/// Weight of the largest finish time relative to summed travel time when
/// minimizing makespan.
pub const SPAN_COST_COEFFICIENT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectiveMode {
    /// Sum of per-vehicle travel time.
    MinTotalTime,
    /// Largest per-vehicle finish time.
    #[default]
    MinMakespan,
}

/// How tightly a delivery is bound to its pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecedencePolicy {
    /// Delivery is the very next stop after its pickup.
    #[default]
    Strict,
    /// Delivery anywhere after its pickup on the same vehicle.
    Relaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityMode {
    /// Pickup takes a seat, delivery frees it; bounds passengers on board.
    #[default]
    Concurrent,
    /// Seats are never freed; bounds customers served per vehicle.
    Cumulative,
}

/// Derived per-vehicle capacity when none is configured.
pub fn derive_capacity(num_customers: usize, num_vehicles: usize, factor: f64) -> u32 {
    if num_vehicles == 0 {
        return 1;
    }
    let share = num_customers as f64 / num_vehicles as f64 * factor;
    (share.ceil() as u32).max(1)
}

/// Time profile of one feasible route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSchedule {
    /// Cumulative travel time at the start node, every stop and the end node.
    pub cumuls: Vec<i64>,
}

impl RouteSchedule {
    pub fn finish(&self) -> i64 {
        self.cumuls.last().copied().unwrap_or(0)
    }

    pub fn stops(&self) -> usize {
        self.cumuls.len().saturating_sub(2)
    }
}

/// Fleet-wide aggregates the objective is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FleetCosts {
    pub total: i64,
    pub makespan: i64,
    pub max_stops: usize,
}

impl FleetCosts {
    pub fn from_schedules<'a>(schedules: impl IntoIterator<Item = &'a RouteSchedule>) -> Self {
        schedules.into_iter().fold(FleetCosts::default(), |acc, schedule| {
            acc.with_route(schedule.finish(), schedule.stops())
        })
    }

    /// Aggregates with one more route of the given finish time and stop count.
    pub fn with_route(self, finish: i64, stops: usize) -> Self {
        FleetCosts {
            total: self.total.saturating_add(finish),
            makespan: self.makespan.max(finish),
            max_stops: self.max_stops.max(stops),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Objective {
    pub mode: ObjectiveMode,
    /// Extra cost per stop on the busiest vehicle, spreading work across the fleet.
    pub stop_balance_coefficient: Option<i64>,
}

impl Objective {
    /// Reported objective value.
    pub fn value(&self, costs: &FleetCosts) -> i64 {
        match self.mode {
            ObjectiveMode::MinTotalTime => costs.total,
            ObjectiveMode::MinMakespan => costs.makespan,
        }
    }

    /// Score minimized by the search. Includes tie-breaks and balancing terms
    /// that never show up in [`Objective::value`].
    pub fn score(&self, costs: &FleetCosts) -> i64 {
        let base = match self.mode {
            ObjectiveMode::MinTotalTime => costs.total,
            ObjectiveMode::MinMakespan => SPAN_COST_COEFFICIENT
                .saturating_mul(costs.makespan)
                .saturating_add(costs.total),
        };
        let balance = self.stop_balance_coefficient.map_or(0, |coefficient| {
            coefficient.saturating_mul(costs.max_stops as i64)
        });
        base.saturating_add(balance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Waiting,
    OnBoard,
    Delivered,
}

/// Checks routes against all dimensions of a problem.
#[derive(Debug, Clone, Copy)]
pub struct RouteEvaluator<'a> {
    problem: &'a RoutingProblem,
}

impl<'a> RouteEvaluator<'a> {
    pub fn new(problem: &'a RoutingProblem) -> Self {
        Self { problem }
    }

    pub fn problem(&self) -> &'a RoutingProblem {
        self.problem
    }

    /// Schedules `stops` (customer locations only) on `vehicle`.
    ///
    /// Returns `None` if a stop is not a customer location, is visited twice,
    /// breaks precedence, or pushes the load over capacity.
    pub fn schedule(&self, vehicle: usize, stops: &[usize]) -> Option<RouteSchedule> {
        let problem = self.problem;
        let strict = problem.precedence() == PrecedencePolicy::Strict;
        let cumulative = problem.capacity_mode() == CapacityMode::Cumulative;
        let capacity = problem.capacity();

        let mut progress = vec![Progress::Waiting; problem.num_customers()];
        let mut on_board = 0usize;
        let mut cumuls = Vec::with_capacity(stops.len() + 2);
        let mut time: i64 = 0;
        let mut load: u32 = 0;
        let mut previous = problem.vehicle_start(vehicle);
        cumuls.push(time);

        for (position, &stop) in stops.iter().enumerate() {
            match problem.location(stop)?.role {
                LocationRole::Pickup(customer) => {
                    if progress[customer] != Progress::Waiting {
                        return None;
                    }
                    if strict && stops.get(position + 1) != Some(&(stop + 1)) {
                        return None;
                    }
                    progress[customer] = Progress::OnBoard;
                    on_board += 1;
                    load += 1;
                    if load > capacity {
                        return None;
                    }
                }
                LocationRole::Delivery(customer) => {
                    if progress[customer] != Progress::OnBoard {
                        return None;
                    }
                    progress[customer] = Progress::Delivered;
                    on_board -= 1;
                    if !cumulative {
                        load -= 1;
                    }
                }
                LocationRole::VehicleStart(_) | LocationRole::VehicleEnd(_) => return None,
            }
            time = time.saturating_add(problem.cost(previous, stop));
            cumuls.push(time);
            previous = stop;
        }

        if on_board > 0 {
            return None;
        }

        time = time.saturating_add(problem.cost(previous, problem.vehicle_end(vehicle)));
        cumuls.push(time);

        Some(RouteSchedule { cumuls })
    }

    /// Load on each arc of a feasible route: entry `k` is the load arriving at
    /// `stops[k]` (or at the end node for `k == stops.len()`). Under
    /// cumulative capacity this counts every pickup made so far.
    pub fn loads(&self, stops: &[usize]) -> Vec<u32> {
        let cumulative = self.problem.capacity_mode() == CapacityMode::Cumulative;
        let mut loads = Vec::with_capacity(stops.len() + 1);
        let mut load: u32 = 0;
        loads.push(load);
        for &stop in stops {
            match self.problem.location(stop).map(|location| location.role) {
                Some(LocationRole::Pickup(_)) => load += 1,
                Some(LocationRole::Delivery(_)) if !cumulative => load = load.saturating_sub(1),
                _ => {}
            }
            loads.push(load);
        }
        loads
    }
}
