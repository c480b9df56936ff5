//! Test fixtures for fleet-dispatch.
//!
//! Provides:
//! - a builder for scenario snapshots
//! - an in-memory scenario store that replays scripted snapshots
//! - route invariant checks shared by the solver tests

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};

use fleet_dispatch::error::StoreError;
use fleet_dispatch::problem::{LocationRole, RoutingProblem};
use fleet_dispatch::scenario::{
    Assignment, Customer, ScenarioSnapshot, ScenarioStatus, Vehicle,
};
use fleet_dispatch::solver::Solution;
use fleet_dispatch::traits::ScenarioStore;
use parking_lot::Mutex;

// ============================================================================
// Scenario builder
// ============================================================================

/// Builder for scenario snapshots with sensible defaults.
#[derive(Clone, Debug)]
pub struct TestScenario {
    snapshot: ScenarioSnapshot,
}

impl TestScenario {
    pub fn new(id: &str) -> Self {
        Self {
            snapshot: ScenarioSnapshot {
                id: id.to_string(),
                start_time: None,
                end_time: None,
                status: ScenarioStatus::Running,
                vehicles: Vec::new(),
                customers: Vec::new(),
            },
        }
    }

    pub fn vehicle(mut self, id: &str, x: f64, y: f64) -> Self {
        self.snapshot.vehicles.push(Vehicle::new(id, (x, y)));
        self
    }

    pub fn busy_vehicle(mut self, id: &str, x: f64, y: f64) -> Self {
        let mut vehicle = Vehicle::new(id, (x, y));
        vehicle.is_available = false;
        self.snapshot.vehicles.push(vehicle);
        self
    }

    pub fn customer(mut self, id: &str, pickup: (f64, f64), dropoff: (f64, f64)) -> Self {
        self.snapshot.customers.push(Customer::new(id, pickup, dropoff));
        self
    }

    pub fn served_customer(
        mut self,
        id: &str,
        pickup: (f64, f64),
        dropoff: (f64, f64),
    ) -> Self {
        let mut customer = Customer::new(id, pickup, dropoff);
        customer.awaiting_service = false;
        self.snapshot.customers.push(customer);
        self
    }

    pub fn status(mut self, status: ScenarioStatus) -> Self {
        self.snapshot.status = status;
        self
    }

    pub fn started_at(mut self, timestamp: &str) -> Self {
        self.snapshot.start_time = Some(timestamp.to_string());
        self
    }

    pub fn ended_at(mut self, timestamp: &str) -> Self {
        self.snapshot.end_time = Some(timestamp.to_string());
        self
    }

    pub fn build(self) -> ScenarioSnapshot {
        self.snapshot
    }
}

/// Deterministic scattered scenario: `vehicles` depots and `customers` trips
/// inside a 0.05 x 0.05 degree square.
pub fn scattered_scenario(vehicles: usize, customers: usize, seed: u64) -> ScenarioSnapshot {
    let mut state = seed;
    let mut next = move || {
        // xorshift64
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 10_000) as f64 / 10_000.0 * 0.05
    };

    let mut scenario = TestScenario::new("scattered");
    for v in 0..vehicles {
        scenario = scenario.vehicle(&format!("v{v}"), 48.10 + next(), 11.50 + next());
    }
    for c in 0..customers {
        let pickup = (48.10 + next(), 11.50 + next());
        let dropoff = (48.10 + next(), 11.50 + next());
        scenario = scenario.customer(&format!("c{c}"), pickup, dropoff);
    }
    scenario.build()
}

// ============================================================================
// In-memory store
// ============================================================================

/// Replays scripted snapshots for a single scenario id. The last snapshot is
/// repeated once the script runs out.
#[derive(Debug)]
pub struct InMemoryStore {
    scenario_id: String,
    script: Mutex<VecDeque<ScenarioSnapshot>>,
    last: Mutex<Option<ScenarioSnapshot>>,
    fetch_failures: Mutex<u32>,
    submit_failures: Mutex<u32>,
    fetches: Mutex<usize>,
    submitted: Mutex<Vec<Vec<Assignment>>>,
}

impl InMemoryStore {
    pub fn new(scenario_id: &str, script: Vec<ScenarioSnapshot>) -> Self {
        Self {
            scenario_id: scenario_id.to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            fetch_failures: Mutex::new(0),
            submit_failures: Mutex::new(0),
            fetches: Mutex::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next `count` fetches with a transport error.
    pub fn failing_fetches(self, count: u32) -> Self {
        *self.fetch_failures.lock() = count;
        self
    }

    /// Fails the next `count` submissions with a transport error.
    pub fn failing_submits(self, count: u32) -> Self {
        *self.submit_failures.lock() = count;
        self
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock()
    }

    pub fn submitted(&self) -> Vec<Vec<Assignment>> {
        self.submitted.lock().clone()
    }

    pub fn all_assignments(&self) -> Vec<Assignment> {
        self.submitted().into_iter().flatten().collect()
    }
}

impl ScenarioStore for InMemoryStore {
    fn get_snapshot(&self, scenario_id: &str) -> Result<ScenarioSnapshot, StoreError> {
        *self.fetches.lock() += 1;
        if scenario_id != self.scenario_id {
            return Err(StoreError::NotFound(scenario_id.to_string()));
        }

        let mut failures = self.fetch_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(StoreError::Transport("connection reset".to_string()));
        }

        let mut last = self.last.lock();
        if let Some(next) = self.script.lock().pop_front() {
            *last = Some(next);
        }
        last.clone().ok_or_else(|| StoreError::NotFound(scenario_id.to_string()))
    }

    fn submit_assignments(
        &self,
        scenario_id: &str,
        batch: &[Assignment],
    ) -> Result<(), StoreError> {
        if scenario_id != self.scenario_id {
            return Err(StoreError::NotFound(scenario_id.to_string()));
        }

        let mut failures = self.submit_failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(StoreError::Transport("503 service unavailable".to_string()));
        }

        self.submitted.lock().push(batch.to_vec());
        Ok(())
    }
}

// ============================================================================
// Invariant checks
// ============================================================================

/// Asserts precedence, capacity, coverage and reported costs of a solution.
pub fn assert_solution_invariants(
    problem: &RoutingProblem,
    solution: &Solution,
    strict: bool,
    concurrent: bool,
) {
    let mut served = HashSet::new();

    for route in &solution.routes {
        assert_eq!(route.nodes.first(), Some(&problem.vehicle_start(route.vehicle)));
        assert_eq!(route.nodes.last(), Some(&problem.vehicle_end(route.vehicle)));
        assert_eq!(route.nodes.len(), route.cumuls.len());

        let stops = route.stops();
        let mut load = 0u32;
        let mut picked = 0u32;
        for (position, &stop) in stops.iter().enumerate() {
            match problem.location(stop).unwrap().role {
                LocationRole::Pickup(customer) => {
                    let delivery = problem.pairs()[customer].delivery;
                    let delivered_at = stops
                        .iter()
                        .position(|&s| s == delivery)
                        .expect("delivery on the same vehicle as its pickup");
                    assert!(delivered_at > position, "delivery before pickup");
                    if strict {
                        assert_eq!(
                            delivered_at,
                            position + 1,
                            "delivery not directly after pickup"
                        );
                    }
                    assert!(served.insert(customer), "customer served twice");
                    load += 1;
                    picked += 1;
                }
                LocationRole::Delivery(_) => {
                    if concurrent {
                        load -= 1;
                    }
                }
                role => panic!("synthetic location {role:?} inside a route"),
            }
            assert!(load <= problem.capacity(), "capacity exceeded");
        }
        if !concurrent {
            assert!(picked <= problem.capacity());
        }

        // cumuls follow arc costs
        for (i, pair) in route.nodes.windows(2).enumerate() {
            let leg = route.cumuls[i + 1] - route.cumuls[i];
            assert_eq!(leg, problem.cost(pair[0], pair[1]));
        }
    }

    assert_eq!(served.len(), problem.num_customers(), "every customer routed");

    let finishes: Vec<i64> = solution
        .routes
        .iter()
        .map(|route| {
            route
                .nodes
                .windows(2)
                .map(|pair| problem.cost(pair[0], pair[1]))
                .sum()
        })
        .collect();
    assert_eq!(solution.total_travel_time, finishes.iter().sum::<i64>());
    assert_eq!(solution.makespan, finishes.iter().copied().max().unwrap_or(0));
}
