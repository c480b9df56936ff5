//! Pickup-and-delivery route solver.
//!
//! Routes are first built by parallel cheapest insertion of whole requests
//! (pickup plus delivery), then improved by guided local search: a local
//! search over request relocation and precedence-preserving 2-opt, where each
//! local optimum raises penalties on its most expensive arcs so the search is
//! pushed elsewhere. The best solution by true score is kept throughout.
//!
//! Insertion and relocation candidates are priced by arc deltas against the
//! current route and its arc loads; only the chosen move is rescheduled.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::dimensions::{
    CapacityMode, FleetCosts, Objective, ObjectiveMode, PrecedencePolicy, RouteEvaluator,
    RouteSchedule,
};
use crate::error::SolveError;
use crate::problem::{LocationRole, RoutingProblem};
use crate::traits::Solver;

/// Minimum augmented-score gain for a move to count as an improvement.
const IMPROVEMENT_EPSILON: f64 = 1e-6;

/// Search tuning, read from the `search` section of the dispatch config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SolveOptions {
    /// Scales the penalty weight relative to the first local optimum.
    pub alpha: f64,
    /// Penalization rounds without a new best before the search gives up.
    pub max_stagnation: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            max_stagnation: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleRoute {
    pub vehicle: usize,
    pub vehicle_id: String,
    /// Visited locations, including the vehicle's start and end nodes.
    pub nodes: Vec<usize>,
    /// Cumulative travel time at each entry of `nodes`.
    pub cumuls: Vec<i64>,
}

impl VehicleRoute {
    /// Customer locations between the start and end node.
    pub fn stops(&self) -> &[usize] {
        match self.nodes.len() {
            0..=2 => &[],
            len => &self.nodes[1..len - 1],
        }
    }

    pub fn finish_time(&self) -> i64 {
        self.cumuls.last().copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Solution {
    pub routes: Vec<VehicleRoute>,
    pub objective: ObjectiveMode,
    /// Total travel time or makespan, depending on `objective`.
    pub objective_value: i64,
    pub total_travel_time: i64,
    pub makespan: i64,
}

/// Cheapest insertion followed by guided local search.
#[derive(Debug, Clone, Default)]
pub struct GuidedLocalSearch {
    options: SolveOptions,
}

impl GuidedLocalSearch {
    pub fn new(options: SolveOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolveOptions {
        &self.options
    }
}

impl Solver for GuidedLocalSearch {
    #[instrument(
        skip_all,
        fields(customers = problem.num_customers(), vehicles = problem.num_vehicles())
    )]
    fn solve(
        &self,
        problem: &RoutingProblem,
        time_budget: Duration,
    ) -> Result<Solution, SolveError> {
        let started = Instant::now();
        let deadline = started + time_budget;

        check_capacity(problem)?;

        let mut current = construct(problem, deadline)?;
        let mut best = current.clone();
        let mut best_score = best.score();
        info!(score = best_score, "initial solution constructed");

        let mut penalties = ArcPenalties::new(problem.locations().len());
        let mut lambda = 0.0;
        let mut stagnation = 0;
        let mut rounds = 0;

        while Instant::now() < deadline {
            let score_before = best_score;
            local_search(&mut current, &penalties, lambda, deadline, &mut |candidate| {
                let score = candidate.score();
                if score < best_score {
                    best_score = score;
                    best = candidate.clone();
                }
            });
            rounds += 1;

            if best_score < score_before {
                debug!(round = rounds, score = best_score, "new best solution");
                stagnation = 0;
            } else {
                stagnation += 1;
            }

            if stagnation >= self.options.max_stagnation {
                info!(rounds, score = best_score, "no further improvement, stopping search");
                break;
            }

            if lambda == 0.0 {
                let arcs = problem.num_customers() * 2 + problem.num_vehicles();
                lambda = self.options.alpha * current.score() as f64 / arcs as f64;
                debug!(lambda, "penalty weight set from first local optimum");
            }
            if lambda <= 0.0 || !penalties.penalize(&current) {
                break;
            }
        }

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            rounds,
            score = best_score,
            "search finished"
        );
        Ok(best.into_solution())
    }
}

fn check_capacity(problem: &RoutingProblem) -> Result<(), SolveError> {
    let capacity = problem.capacity() as usize;
    if capacity == 0 {
        return Err(SolveError::Infeasible("vehicle capacity is zero".to_string()));
    }
    if problem.capacity_mode() == CapacityMode::Cumulative
        && capacity * problem.num_vehicles() < problem.num_customers()
    {
        return Err(SolveError::Infeasible(format!(
            "{} vehicles with capacity {} cannot serve {} customers",
            problem.num_vehicles(),
            capacity,
            problem.num_customers()
        )));
    }
    Ok(())
}

fn infeasible(problem: &RoutingProblem, customers: &[usize]) -> SolveError {
    let ids = customers
        .iter()
        .filter_map(|&customer| problem.customer_id(customer))
        .collect::<Vec<_>>()
        .join(", ");
    SolveError::Infeasible(format!("no feasible insertion for customers {ids}"))
}

/// Parallel cheapest insertion: every step inserts the unrouted request
/// whose best feasible position yields the lowest score. Once the deadline
/// passes, the remaining requests are appended instead.
fn construct(
    problem: &RoutingProblem,
    deadline: Instant,
) -> Result<WorkingSolution<'_>, SolveError> {
    let mut state = WorkingSolution::new(problem);
    let mut unrouted: Vec<usize> = (0..problem.num_customers()).collect();

    while !unrouted.is_empty() {
        if Instant::now() >= deadline {
            warn!(
                remaining = unrouted.len(),
                "time budget reached during construction, appending remaining requests"
            );
            return complete_by_appending(state, &unrouted);
        }

        let best = unrouted
            .par_iter()
            .enumerate()
            .filter_map(|(slot, &customer)| {
                state.best_insertion(customer).map(|insertion| (slot, insertion))
            })
            .min_by_key(|(_, insertion)| insertion.score);

        let Some((slot, insertion)) = best else {
            return Err(infeasible(problem, &unrouted));
        };

        let customer = unrouted.remove(slot);
        if !state.insert(customer, insertion.vehicle, insertion.placement) {
            return Err(infeasible(problem, &[customer]));
        }
    }

    Ok(state)
}

/// Appends each request at the end of the least busy vehicle that can still
/// take it.
fn complete_by_appending<'a>(
    mut state: WorkingSolution<'a>,
    unrouted: &[usize],
) -> Result<WorkingSolution<'a>, SolveError> {
    for &customer in unrouted {
        let mut vehicles: Vec<usize> = (0..state.routes.len()).collect();
        vehicles.sort_by_key(|&vehicle| state.routes[vehicle].len());

        let placed = vehicles.into_iter().any(|vehicle| {
            let end = state.routes[vehicle].len();
            let placement = Placement {
                pickup_at: end,
                delivery_at: end,
            };
            state.insert(customer, vehicle, placement)
        });
        if !placed {
            return Err(infeasible(state.problem(), &[customer]));
        }
    }
    Ok(state)
}

/// Where a request goes in a route: the pickup before `stops[pickup_at]`,
/// the delivery before `stops[delivery_at]` of the route it is inserted
/// into. Equal positions put the delivery right after the pickup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    pickup_at: usize,
    delivery_at: usize,
}

impl Placement {
    fn apply(self, stops: &[usize], pickup: usize) -> Vec<usize> {
        let mut placed = Vec::with_capacity(stops.len() + 2);
        placed.extend_from_slice(&stops[..self.pickup_at]);
        placed.push(pickup);
        placed.extend_from_slice(&stops[self.pickup_at..self.delivery_at]);
        placed.push(partner(pickup));
        placed.extend_from_slice(&stops[self.delivery_at..]);
        placed
    }
}

/// A feasible route prepared for pricing request placements.
struct RouteView<'r> {
    problem: &'r RoutingProblem,
    stops: &'r [usize],
    start: usize,
    end: usize,
    loads: Vec<u32>,
}

impl<'r> RouteView<'r> {
    fn new(evaluator: &RouteEvaluator<'r>, vehicle: usize, stops: &'r [usize]) -> Self {
        let problem = evaluator.problem();
        Self {
            problem,
            stops,
            start: problem.vehicle_start(vehicle),
            end: problem.vehicle_end(vehicle),
            loads: evaluator.loads(stops),
        }
    }

    fn before(&self, index: usize) -> usize {
        match index {
            0 => self.start,
            _ => self.stops[index - 1],
        }
    }

    fn at(&self, index: usize) -> usize {
        self.stops.get(index).copied().unwrap_or(self.end)
    }

    /// Change in the sum of `weight` over the route's arcs once the request
    /// starting at `pickup` is placed.
    fn delta(
        &self,
        placement: Placement,
        pickup: usize,
        weight: impl Fn(usize, usize) -> i64,
    ) -> i64 {
        let delivery = partner(pickup);
        let Placement {
            pickup_at,
            delivery_at,
        } = placement;
        let (prev, next) = (self.before(pickup_at), self.at(pickup_at));
        if pickup_at == delivery_at {
            return weight(prev, pickup) + weight(pickup, delivery) + weight(delivery, next)
                - weight(prev, next);
        }
        let opened = weight(prev, pickup) + weight(pickup, next) - weight(prev, next);
        let (prev, next) = (self.before(delivery_at), self.at(delivery_at));
        opened + weight(prev, delivery) + weight(delivery, next) - weight(prev, next)
    }

    /// Calls `f` with every placement of one more request that keeps the
    /// route within precedence and capacity.
    fn for_each_placement(&self, mut f: impl FnMut(Placement)) {
        let problem = self.problem;
        let strict = problem.precedence() == PrecedencePolicy::Strict;
        let cumulative = problem.capacity_mode() == CapacityMode::Cumulative;
        let capacity = problem.capacity();
        let len = self.stops.len();

        if cumulative && self.loads[len] + 1 > capacity {
            return;
        }

        for pickup_at in 0..=len {
            // an adjacent pair can't be split
            if strict && pickup_at > 0 && self.is_pickup(self.stops[pickup_at - 1]) {
                continue;
            }
            let mut peak = 0;
            for delivery_at in pickup_at..=len {
                if !cumulative {
                    peak = peak.max(self.loads[delivery_at]);
                    if peak + 1 > capacity {
                        break;
                    }
                }
                f(Placement {
                    pickup_at,
                    delivery_at,
                });
                if strict {
                    break;
                }
            }
        }
    }

    fn is_pickup(&self, stop: usize) -> bool {
        matches!(
            self.problem.location(stop).map(|location| location.role),
            Some(LocationRole::Pickup(_))
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Insertion {
    vehicle: usize,
    placement: Placement,
    score: i64,
}

#[derive(Debug, Clone)]
struct WorkingSolution<'a> {
    evaluator: RouteEvaluator<'a>,
    objective: Objective,
    routes: Vec<Vec<usize>>,
    schedules: Vec<RouteSchedule>,
    assigned: Vec<Option<usize>>,
}

impl<'a> WorkingSolution<'a> {
    fn new(problem: &'a RoutingProblem) -> Self {
        let schedules = (0..problem.num_vehicles())
            .map(|vehicle| {
                let start = problem.vehicle_start(vehicle);
                let end = problem.vehicle_end(vehicle);
                RouteSchedule {
                    cumuls: vec![0, problem.cost(start, end)],
                }
            })
            .collect();

        Self {
            evaluator: RouteEvaluator::new(problem),
            objective: problem.objective(),
            routes: vec![Vec::new(); problem.num_vehicles()],
            schedules,
            assigned: vec![None; problem.num_customers()],
        }
    }

    fn problem(&self) -> &'a RoutingProblem {
        self.evaluator.problem()
    }

    fn score(&self) -> i64 {
        self.objective.score(&FleetCosts::from_schedules(&self.schedules))
    }

    /// Fleet costs over every route except `excluded`.
    fn costs_without(&self, excluded: &[usize]) -> FleetCosts {
        self.schedules
            .iter()
            .enumerate()
            .filter(|(vehicle, _)| !excluded.contains(vehicle))
            .fold(FleetCosts::default(), |acc, (_, schedule)| {
                acc.with_route(schedule.finish(), schedule.stops())
            })
    }

    fn set_route(&mut self, vehicle: usize, stops: Vec<usize>, schedule: RouteSchedule) {
        for customer in self.assigned.iter_mut().filter(|owner| **owner == Some(vehicle)) {
            *customer = None;
        }
        for &stop in &stops {
            self.assigned[stop / 2] = Some(vehicle);
        }
        self.routes[vehicle] = stops;
        self.schedules[vehicle] = schedule;
    }

    /// Places `customer` on `vehicle`. Returns `false`, leaving the route
    /// untouched, if the result has no schedule.
    fn insert(&mut self, customer: usize, vehicle: usize, placement: Placement) -> bool {
        let pickup = self.problem().pairs()[customer].pickup;
        let stops = placement.apply(&self.routes[vehicle], pickup);
        match self.evaluator.schedule(vehicle, &stops) {
            Some(schedule) => {
                self.set_route(vehicle, stops, schedule);
                true
            }
            None => false,
        }
    }

    fn best_insertion(&self, customer: usize) -> Option<Insertion> {
        let problem = self.problem();
        let pickup = problem.pairs()[customer].pickup;
        let mut best: Option<Insertion> = None;

        for (vehicle, stops) in self.routes.iter().enumerate() {
            let view = RouteView::new(&self.evaluator, vehicle, stops);
            let others = self.costs_without(&[vehicle]);
            let schedule = &self.schedules[vehicle];

            view.for_each_placement(|placement| {
                let added = view.delta(placement, pickup, |from, to| problem.cost(from, to));
                let costs = others.with_route(schedule.finish() + added, schedule.stops() + 2);
                let score = self.objective.score(&costs);
                if best.is_none_or(|current| score < current.score) {
                    best = Some(Insertion {
                        vehicle,
                        placement,
                        score,
                    });
                }
            });
        }

        best
    }

    fn into_solution(self) -> Solution {
        let problem = self.problem();
        let costs = FleetCosts::from_schedules(&self.schedules);

        let routes = self
            .routes
            .into_iter()
            .zip(self.schedules)
            .enumerate()
            .map(|(vehicle, (stops, schedule))| {
                let mut nodes = Vec::with_capacity(stops.len() + 2);
                nodes.push(problem.vehicle_start(vehicle));
                nodes.extend(stops);
                nodes.push(problem.vehicle_end(vehicle));
                VehicleRoute {
                    vehicle,
                    vehicle_id: problem.vehicle_id(vehicle).unwrap_or_default().to_string(),
                    nodes,
                    cumuls: schedule.cumuls,
                }
            })
            .collect();

        Solution {
            routes,
            objective: self.objective.mode,
            objective_value: self.objective.value(&costs),
            total_travel_time: costs.total,
            makespan: costs.makespan,
        }
    }
}

/// The other half of a request: pickups sit at even indices, their
/// deliveries right after.
fn partner(location: usize) -> usize {
    location ^ 1
}

/// Arcs of a route from the vehicle's start node to its end node.
fn arcs<'s>(
    problem: &RoutingProblem,
    vehicle: usize,
    stops: &'s [usize],
) -> impl Iterator<Item = (usize, usize)> + use<'s> {
    let start = problem.vehicle_start(vehicle);
    let end = problem.vehicle_end(vehicle);
    std::iter::once(start)
        .chain(stops.iter().copied())
        .zip(stops.iter().copied().chain(std::iter::once(end)))
}

/// Guided local search penalty counts per arc.
#[derive(Debug, Clone)]
struct ArcPenalties {
    size: usize,
    data: Vec<u32>,
}

impl ArcPenalties {
    fn new(size: usize) -> Self {
        Self {
            size,
            data: vec![0; size * size],
        }
    }

    fn get(&self, from: usize, to: usize) -> i64 {
        i64::from(self.data[from * self.size + to])
    }

    fn route(&self, problem: &RoutingProblem, vehicle: usize, stops: &[usize]) -> i64 {
        arcs(problem, vehicle, stops).map(|(from, to)| self.get(from, to)).sum()
    }

    /// Penalizes the arcs of maximum utility `cost / (1 + penalty)` in the
    /// current solution. Returns `false` when no arc has a positive cost.
    fn penalize(&mut self, state: &WorkingSolution<'_>) -> bool {
        let problem = state.problem();
        let utility = |from: usize, to: usize| {
            problem.cost(from, to) as f64 / (1.0 + self.get(from, to) as f64)
        };

        let max_utility = state
            .routes
            .iter()
            .enumerate()
            .flat_map(|(vehicle, stops)| arcs(problem, vehicle, stops))
            .map(|(from, to)| utility(from, to))
            .fold(0.0, f64::max);
        if max_utility <= 0.0 {
            return false;
        }

        let selected: Vec<(usize, usize)> = state
            .routes
            .iter()
            .enumerate()
            .flat_map(|(vehicle, stops)| arcs(problem, vehicle, stops))
            .filter(|&(from, to)| (utility(from, to) - max_utility).abs() < IMPROVEMENT_EPSILON)
            .collect();

        for (from, to) in selected {
            let slot = &mut self.data[from * self.size + to];
            *slot = slot.saturating_add(1);
        }
        true
    }
}

/// Descends to a local optimum of the augmented score, reporting every
/// accepted state to `on_move`.
fn local_search<'a>(
    state: &mut WorkingSolution<'a>,
    penalties: &ArcPenalties,
    lambda: f64,
    deadline: Instant,
    on_move: &mut dyn FnMut(&WorkingSolution<'a>),
) {
    let problem = state.problem();
    let mut route_penalty: Vec<i64> = (0..problem.num_vehicles())
        .map(|vehicle| penalties.route(problem, vehicle, &state.routes[vehicle]))
        .collect();

    while Instant::now() < deadline {
        let relocated =
            relocate_pass(state, penalties, lambda, &mut route_penalty, deadline, on_move);
        let reversed =
            two_opt_pass(state, penalties, lambda, &mut route_penalty, deadline, on_move);
        if !relocated && !reversed {
            return;
        }
    }
}

fn augmented(score: i64, lambda: f64, penalty: i64) -> f64 {
    score as f64 + lambda * penalty as f64
}

/// Moves each request to its best position on any vehicle, if that lowers
/// the augmented score.
fn relocate_pass<'a>(
    state: &mut WorkingSolution<'a>,
    penalties: &ArcPenalties,
    lambda: f64,
    route_penalty: &mut [i64],
    deadline: Instant,
    on_move: &mut dyn FnMut(&WorkingSolution<'a>),
) -> bool {
    let problem = state.problem();
    let mut improved = false;

    for customer in 0..problem.num_customers() {
        if Instant::now() >= deadline {
            break;
        }
        let Some(from) = state.assigned[customer] else {
            continue;
        };
        let pickup = problem.pairs()[customer].pickup;
        let reduced: Vec<usize> = state.routes[from]
            .iter()
            .copied()
            .filter(|&stop| stop != pickup && stop != partner(pickup))
            .collect();
        let Some(reduced_schedule) = state.evaluator.schedule(from, &reduced) else {
            continue;
        };
        let reduced_penalty = penalties.route(problem, from, &reduced);

        let total_penalty: i64 = route_penalty.iter().sum();
        let current = augmented(state.score(), lambda, total_penalty);
        let base_penalty = total_penalty - route_penalty[from] + reduced_penalty;
        let mut best: Option<(f64, usize, Placement)> = None;

        for to in 0..problem.num_vehicles() {
            let (stops, schedule, others) = if to == from {
                (&reduced[..], &reduced_schedule, state.costs_without(&[from]))
            } else {
                let others = state
                    .costs_without(&[from, to])
                    .with_route(reduced_schedule.finish(), reduced_schedule.stops());
                (&state.routes[to][..], &state.schedules[to], others)
            };
            let view = RouteView::new(&state.evaluator, to, stops);

            view.for_each_placement(|placement| {
                let added = view.delta(placement, pickup, |a, b| problem.cost(a, b));
                let penalty = view.delta(placement, pickup, |a, b| penalties.get(a, b));
                let costs = others.with_route(schedule.finish() + added, schedule.stops() + 2);
                let value = augmented(
                    state.objective.score(&costs),
                    lambda,
                    base_penalty + penalty,
                );
                if best.is_none_or(|(best_value, ..)| value < best_value) {
                    best = Some((value, to, placement));
                }
            });
        }

        let Some((value, to, placement)) = best else {
            continue;
        };
        if value + IMPROVEMENT_EPSILON >= current {
            continue;
        }

        let stops = if to == from {
            placement.apply(&reduced, pickup)
        } else {
            placement.apply(&state.routes[to], pickup)
        };
        let Some(schedule) = state.evaluator.schedule(to, &stops) else {
            continue;
        };
        if to != from {
            state.set_route(from, reduced, reduced_schedule);
            route_penalty[from] = reduced_penalty;
        }
        route_penalty[to] = penalties.route(problem, to, &stops);
        state.set_route(to, stops, schedule);
        improved = true;
        on_move(state);
    }

    improved
}

/// Reverses closed route segments (segments holding both halves of every
/// request they touch), swapping each request's halves back so pickups stay
/// ahead of their deliveries.
fn two_opt_pass<'a>(
    state: &mut WorkingSolution<'a>,
    penalties: &ArcPenalties,
    lambda: f64,
    route_penalty: &mut [i64],
    deadline: Instant,
    on_move: &mut dyn FnMut(&WorkingSolution<'a>),
) -> bool {
    let problem = state.problem();
    let mut improved = false;
    let mut position = vec![usize::MAX; problem.locations().len()];

    for vehicle in 0..problem.num_vehicles() {
        // need at least two requests for a reversal to change anything
        if state.routes[vehicle].len() < 4 {
            continue;
        }

        let total_penalty: i64 = route_penalty.iter().sum();
        let current = augmented(state.score(), lambda, total_penalty);
        let others = state.costs_without(&[vehicle]);
        let stops = &state.routes[vehicle];
        for (index, &stop) in stops.iter().enumerate() {
            position[stop] = index;
        }

        let mut accepted = None;
        'search: for i in 0..stops.len() {
            if Instant::now() >= deadline {
                break;
            }
            // requests in stops[i..=j] whose other half lies after j
            let mut open = 0usize;
            for j in i..stops.len() {
                let mate = position[partner(stops[j])];
                if mate < i {
                    break;
                }
                if mate > j {
                    open += 1;
                } else {
                    open -= 1;
                }
                if open > 0 || j == i {
                    continue;
                }

                let mut candidate = stops.clone();
                candidate[i..=j].reverse();
                for stop in &mut candidate[i..=j] {
                    *stop = partner(*stop);
                }
                if candidate == *stops {
                    continue;
                }

                let Some(schedule) = state.evaluator.schedule(vehicle, &candidate) else {
                    continue;
                };
                let candidate_penalty = penalties.route(problem, vehicle, &candidate);
                let costs = others.with_route(schedule.finish(), schedule.stops());
                let value = augmented(
                    state.objective.score(&costs),
                    lambda,
                    total_penalty - route_penalty[vehicle] + candidate_penalty,
                );
                if value + IMPROVEMENT_EPSILON < current {
                    accepted = Some((candidate, schedule, candidate_penalty));
                    break 'search;
                }
            }
        }

        if let Some((candidate, schedule, candidate_penalty)) = accepted {
            route_penalty[vehicle] = candidate_penalty;
            state.set_route(vehicle, candidate, schedule);
            improved = true;
            on_move(state);
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    improved
}
