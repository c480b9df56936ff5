//! Online dispatch against a live scenario.
//!
//! A plan is computed once from the initial snapshot. The loop then polls the
//! store, hands the head of each idle vehicle's queue to that vehicle, and
//! pushes the batch back, until the scenario reports completion or the loop
//! is cancelled. Cancelling also interrupts retry backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{DispatchConfig, RetryPolicy};
use crate::dimensions::ObjectiveMode;
use crate::error::{DispatchError, StoreError};
use crate::mapper::{map_solution, FleetQueues};
use crate::problem::{PlanningOptions, RoutingProblem};
use crate::scenario::{Assignment, ScenarioSnapshot};
use crate::solver::Solution;
use crate::traits::{ScenarioStore, Solver};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    cvar: Condvar,
}

/// Shared stop signal. Waits on it wake as soon as it is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.state.cancelled.lock();
        *cancelled = true;
        self.state.cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock()
    }

    /// Sleeps for `timeout` or until cancelled. Returns whether the token is
    /// cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut cancelled = self.state.cancelled.lock();
        if !*cancelled {
            self.state
                .cvar
                .wait_while_for(&mut cancelled, |cancelled| !*cancelled, timeout);
        }
        *cancelled
    }
}

/// Result of one planning pass.
#[derive(Debug, Clone)]
pub struct Plan {
    pub problem: RoutingProblem,
    pub solution: Solution,
    pub queues: FleetQueues,
    pub solve_time: Duration,
}

/// Builds, solves and maps a snapshot in one go.
#[derive(Debug, Clone)]
pub struct Planner<V> {
    solver: V,
    options: PlanningOptions,
    time_budget: Duration,
}

impl<V: Solver> Planner<V> {
    pub fn new(solver: V, options: PlanningOptions, time_budget: Duration) -> Self {
        Self {
            solver,
            options,
            time_budget,
        }
    }

    pub fn from_config(solver: V, config: &DispatchConfig) -> Self {
        Self::new(solver, config.planning_options(), config.solver_time_budget())
    }

    pub fn plan(&self, snapshot: &ScenarioSnapshot) -> Result<Plan, DispatchError> {
        let problem = RoutingProblem::build(snapshot, &self.options)?;

        let started = Instant::now();
        let solution = self.solver.solve(&problem, self.time_budget)?;
        let solve_time = started.elapsed();

        let queues = map_solution(&problem, &solution)?;
        info!(
            scenario = %snapshot.id,
            customers = problem.num_customers(),
            vehicles = problem.num_vehicles(),
            objective = solution.objective_value,
            solve_ms = solve_time.as_millis() as u64,
            "plan ready"
        );

        Ok(Plan {
            problem,
            solution,
            queues,
            solve_time,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The scenario reports completion; nothing was assigned.
    Completed,
    /// Batch accepted by the store. Empty when no idle vehicle had work.
    Submitted(Vec<Assignment>),
    /// Cancelled while backing off between store attempts. Holds the batch
    /// that was popped but never delivered, empty if the fetch was retrying.
    Cancelled(Vec<Assignment>),
}

/// Poll/assign/submit loop over owned per-vehicle queues.
pub struct DispatchLoop<S> {
    store: S,
    scenario_id: String,
    queues: FleetQueues,
    poll_interval: Duration,
    retry: RetryPolicy,
    cancel: CancelToken,
    assignments: Vec<Assignment>,
    undelivered: Vec<Assignment>,
    cycles: usize,
    last_snapshot: Option<ScenarioSnapshot>,
}

impl<S: ScenarioStore> DispatchLoop<S> {
    pub fn new(store: S, scenario_id: impl Into<String>, queues: FleetQueues) -> Self {
        Self {
            store,
            scenario_id: scenario_id.into(),
            queues,
            poll_interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
            assignments: Vec::new(),
            undelivered: Vec::new(),
            cycles: 0,
            last_snapshot: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn queues(&self) -> &FleetQueues {
        &self.queues
    }

    /// Every assignment the store has accepted, in submission order.
    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Assignments popped from the queues whose submission was cut short by
    /// cancellation.
    pub fn undelivered(&self) -> &[Assignment] {
        &self.undelivered
    }

    pub fn cycles(&self) -> usize {
        self.cycles
    }

    pub fn last_snapshot(&self) -> Option<&ScenarioSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Runs until the scenario completes or the token is cancelled.
    #[instrument(skip_all, fields(scenario = %self.scenario_id))]
    pub fn run(&mut self) -> Result<DispatchOutcome, DispatchError> {
        loop {
            if self.cancel.is_cancelled() {
                info!(cycles = self.cycles, "dispatch cancelled");
                return Ok(DispatchOutcome::Cancelled);
            }

            match self.run_cycle()? {
                CycleOutcome::Completed => {
                    self.cancel.cancel();
                    info!(
                        cycles = self.cycles,
                        assignments = self.assignments.len(),
                        "scenario completed"
                    );
                    return Ok(DispatchOutcome::Completed);
                }
                CycleOutcome::Cancelled(_) => {
                    info!(
                        cycles = self.cycles,
                        undelivered = self.undelivered.len(),
                        "dispatch cancelled while retrying"
                    );
                    return Ok(DispatchOutcome::Cancelled);
                }
                CycleOutcome::Submitted(_) => {}
            }

            if self.cancel.wait_timeout(self.poll_interval) {
                info!(cycles = self.cycles, "dispatch cancelled");
                return Ok(DispatchOutcome::Cancelled);
            }
        }
    }

    /// One poll, assign and submit step, without the trailing wait.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, DispatchError> {
        self.cycles += 1;
        let fetched = fetch_snapshot(&self.store, &self.scenario_id, &self.retry, &self.cancel)?;
        let Some(snapshot) = fetched else {
            return Ok(CycleOutcome::Cancelled(Vec::new()));
        };

        if snapshot.status.is_completed() {
            self.last_snapshot = Some(snapshot);
            return Ok(CycleOutcome::Completed);
        }

        let batch: Vec<Assignment> = snapshot
            .vehicles
            .iter()
            .filter(|vehicle| vehicle.is_available)
            .filter_map(|vehicle| {
                self.queues
                    .pop_for(&vehicle.id)
                    .map(|customer| Assignment::new(vehicle.id.as_str(), customer))
            })
            .collect();
        self.last_snapshot = Some(snapshot);

        if batch.is_empty() {
            debug!(
                cycle = self.cycles,
                pending = self.queues.pending(),
                "no idle vehicle with work"
            );
            return Ok(CycleOutcome::Submitted(batch));
        }

        let submitted = retry_store(&self.retry, &self.cancel, "submit assignments", || {
            self.store.submit_assignments(&self.scenario_id, &batch)
        });
        match submitted {
            Ok(()) => {
                debug!(
                    cycle = self.cycles,
                    assigned = batch.len(),
                    pending = self.queues.pending(),
                    "batch submitted"
                );
                self.assignments.extend(batch.iter().cloned());
                Ok(CycleOutcome::Submitted(batch))
            }
            Err(GaveUp::Cancelled) => {
                self.undelivered.extend(batch.iter().cloned());
                Ok(CycleOutcome::Cancelled(batch))
            }
            Err(GaveUp::Failed {
                error: StoreError::NotFound(id),
                ..
            }) => Err(DispatchError::ScenarioNotFound(id)),
            Err(GaveUp::Failed {
                attempts,
                error: StoreError::Transport(message),
            }) => Err(DispatchError::TransportFailure {
                attempts,
                message,
                pending: batch,
            }),
        }
    }
}

/// Why [`retry_store`] stopped without a value.
#[derive(Debug)]
enum GaveUp {
    /// The token was cancelled during a backoff wait.
    Cancelled,
    /// `NotFound`, or the policy's attempts are used up.
    Failed { attempts: u32, error: StoreError },
}

/// Runs `op` until it succeeds, fails with `NotFound`, the policy's attempts
/// are used up, or the token is cancelled while waiting to retry.
fn retry_store<T, F>(
    retry: &RetryPolicy,
    cancel: &CancelToken,
    action: &str,
    mut op: F,
) -> Result<T, GaveUp>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(error @ StoreError::NotFound(_)) => {
                return Err(GaveUp::Failed {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) if attempt >= max_attempts => {
                return Err(GaveUp::Failed {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) => {
                let backoff = retry.backoff(attempt);
                warn!(
                    action,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    %error,
                    "retrying"
                );
                if cancel.wait_timeout(backoff) {
                    info!(action, attempt, "cancelled during retry backoff");
                    return Err(GaveUp::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}

/// Fetches the current snapshot. `None` means the token was cancelled while
/// the fetch was being retried.
fn fetch_snapshot<S: ScenarioStore>(
    store: &S,
    scenario_id: &str,
    retry: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<Option<ScenarioSnapshot>, DispatchError> {
    match retry_store(retry, cancel, "fetch snapshot", || store.get_snapshot(scenario_id)) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(GaveUp::Cancelled) => Ok(None),
        Err(GaveUp::Failed {
            error: StoreError::NotFound(id),
            ..
        }) => Err(DispatchError::ScenarioNotFound(id)),
        Err(GaveUp::Failed {
            attempts,
            error: StoreError::Transport(message),
        }) => Err(DispatchError::TransportFailure {
            attempts,
            message,
            pending: Vec::new(),
        }),
    }
}

/// Summary of a dispatch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub scenario_id: String,
    pub outcome: DispatchOutcome,
    pub assignments: Vec<Assignment>,
    /// Popped assignments that cancellation kept from reaching the store.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub undelivered: Vec<Assignment>,
    pub cycles: usize,
    pub solve_time_secs: f64,
    pub wall_time_secs: f64,
    pub objective: ObjectiveMode,
    /// `None` when nothing was planned.
    pub objective_value: Option<i64>,
    pub total_travel_time: Option<i64>,
    pub makespan: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl DispatchReport {
    fn unplanned(
        scenario_id: &str,
        outcome: DispatchOutcome,
        config: &DispatchConfig,
        started: Instant,
        snapshot: Option<ScenarioSnapshot>,
    ) -> Self {
        let (start_time, end_time) = snapshot
            .map(|snapshot| (snapshot.start_time, snapshot.end_time))
            .unwrap_or_default();
        Self {
            scenario_id: scenario_id.to_string(),
            outcome,
            assignments: Vec::new(),
            undelivered: Vec::new(),
            cycles: 0,
            solve_time_secs: 0.0,
            wall_time_secs: started.elapsed().as_secs_f64(),
            objective: config.objective_mode,
            objective_value: None,
            total_travel_time: None,
            makespan: None,
            start_time,
            end_time,
        }
    }
}

/// Plans from the current snapshot, then dispatches until the scenario
/// completes.
pub fn run_dispatch<S, V>(
    store: S,
    scenario_id: &str,
    config: &DispatchConfig,
    solver: V,
) -> Result<DispatchReport, DispatchError>
where
    S: ScenarioStore,
    V: Solver,
{
    run_dispatch_with_cancel(store, scenario_id, config, solver, CancelToken::new())
}

/// [`run_dispatch`] that also stops, with [`DispatchOutcome::Cancelled`],
/// once `cancel` is cancelled.
#[instrument(skip(store, config, solver, cancel))]
pub fn run_dispatch_with_cancel<S, V>(
    store: S,
    scenario_id: &str,
    config: &DispatchConfig,
    solver: V,
    cancel: CancelToken,
) -> Result<DispatchReport, DispatchError>
where
    S: ScenarioStore,
    V: Solver,
{
    let started = Instant::now();
    let poll_interval = config.poll_interval()?;
    let Some(initial) = fetch_snapshot(&store, scenario_id, &config.retry, &cancel)? else {
        return Ok(DispatchReport::unplanned(
            scenario_id,
            DispatchOutcome::Cancelled,
            config,
            started,
            None,
        ));
    };
    check_counts(config, &initial);

    if initial.status.is_completed() {
        info!("scenario already completed, nothing to plan");
        return Ok(DispatchReport::unplanned(
            scenario_id,
            DispatchOutcome::Completed,
            config,
            started,
            Some(initial),
        ));
    }

    let plan = Planner::from_config(solver, config).plan(&initial)?;
    let mut dispatch = DispatchLoop::new(&store, scenario_id, plan.queues)
        .with_poll_interval(poll_interval)
        .with_retry(config.retry.clone())
        .with_cancel_token(cancel);
    let outcome = dispatch.run()?;

    let last = dispatch.last_snapshot().unwrap_or(&initial);
    Ok(DispatchReport {
        scenario_id: scenario_id.to_string(),
        outcome,
        assignments: dispatch.assignments().to_vec(),
        undelivered: dispatch.undelivered().to_vec(),
        cycles: dispatch.cycles(),
        solve_time_secs: plan.solve_time.as_secs_f64(),
        wall_time_secs: started.elapsed().as_secs_f64(),
        objective: plan.solution.objective,
        objective_value: Some(plan.solution.objective_value),
        total_travel_time: Some(plan.solution.total_travel_time),
        makespan: Some(plan.solution.makespan),
        start_time: last.start_time.clone().or(initial.start_time.clone()),
        end_time: last.end_time.clone(),
    })
}

fn check_counts(config: &DispatchConfig, snapshot: &ScenarioSnapshot) {
    if let Some(expected) = config.num_vehicles
        && expected != snapshot.vehicles.len()
    {
        warn!(
            expected,
            actual = snapshot.vehicles.len(),
            "vehicle count differs from configuration"
        );
    }
    if let Some(expected) = config.num_customers
        && expected != snapshot.customers.len()
    {
        warn!(
            expected,
            actual = snapshot.customers.len(),
            "customer count differs from configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::scenario::{Customer, ScenarioStatus, Vehicle};
    use crate::solver::GuidedLocalSearch;

    /// Replays scripted snapshots and records every submitted batch.
    #[derive(Default)]
    struct ScriptedStore {
        snapshots: RefCell<VecDeque<Result<ScenarioSnapshot, StoreError>>>,
        submits: RefCell<VecDeque<Result<(), StoreError>>>,
        submitted: RefCell<Vec<Vec<Assignment>>>,
        fetches: RefCell<usize>,
    }

    impl ScriptedStore {
        fn with_snapshots(snapshots: Vec<ScenarioSnapshot>) -> Self {
            Self {
                snapshots: RefCell::new(snapshots.into_iter().map(Ok).collect()),
                ..Self::default()
            }
        }
    }

    impl ScenarioStore for ScriptedStore {
        fn get_snapshot(&self, scenario_id: &str) -> Result<ScenarioSnapshot, StoreError> {
            *self.fetches.borrow_mut() += 1;
            self.snapshots
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(StoreError::NotFound(scenario_id.to_string())))
        }

        fn submit_assignments(&self, _: &str, batch: &[Assignment]) -> Result<(), StoreError> {
            self.submits.borrow_mut().pop_front().unwrap_or(Ok(()))?;
            self.submitted.borrow_mut().push(batch.to_vec());
            Ok(())
        }
    }

    fn snapshot(status: ScenarioStatus, available: &[bool]) -> ScenarioSnapshot {
        ScenarioSnapshot {
            id: "s".into(),
            start_time: Some("t0".into()),
            end_time: None,
            status,
            vehicles: available
                .iter()
                .enumerate()
                .map(|(i, &is_available)| {
                    let mut vehicle = Vehicle::new(format!("v{i}"), (i as f64 * 10.0, 0.0));
                    vehicle.is_available = is_available;
                    vehicle
                })
                .collect(),
            customers: vec![
                Customer::new("c0", (0.0, 1.0), (0.0, 2.0)),
                Customer::new("c1", (10.0, 1.0), (10.0, 2.0)),
                Customer::new("c2", (0.0, 3.0), (0.0, 4.0)),
            ],
        }
    }

    fn plan(snapshot: &ScenarioSnapshot) -> Plan {
        let options = PlanningOptions {
            objective: ObjectiveMode::MinTotalTime,
            ..PlanningOptions::default()
        };
        Planner::new(GuidedLocalSearch::default(), options, Duration::from_millis(200))
            .plan(snapshot)
            .unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            multiplier: 2,
        }
    }

    fn slow_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 60_000,
            multiplier: 1,
        }
    }

    fn cancel_after(token: &CancelToken, delay: Duration) -> std::thread::JoinHandle<()> {
        let canceller = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            canceller.cancel();
        })
    }

    #[test]
    fn test_cancel_token_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        token.cancel();
        assert!(handle.join().unwrap());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_wait_times_out_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_cycle_assigns_only_idle_vehicles() {
        let initial = snapshot(ScenarioStatus::Active, &[true, true]);
        let plan = plan(&initial);
        let store =
            ScriptedStore::with_snapshots(vec![snapshot(ScenarioStatus::Active, &[true, false])]);
        let mut dispatch = DispatchLoop::new(&store, "s", plan.queues);

        let CycleOutcome::Submitted(batch) = dispatch.run_cycle().unwrap() else {
            panic!("expected a submitted batch");
        };

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].vehicle_id, "v0");
        assert_eq!(store.submitted.borrow().as_slice(), &[batch.clone()]);
        assert_eq!(dispatch.assignments(), batch.as_slice());
    }

    #[test]
    fn test_drained_queues_submit_nothing() {
        let initial = snapshot(ScenarioStatus::Active, &[true, true]);
        let plan = plan(&initial);
        let polls = (0..6).map(|_| snapshot(ScenarioStatus::Active, &[true, true])).collect();
        let store = ScriptedStore::with_snapshots(polls);
        let mut dispatch = DispatchLoop::new(&store, "s", plan.queues);

        for _ in 0..6 {
            dispatch.run_cycle().unwrap();
        }

        assert!(dispatch.queues().is_drained());
        let submitted = store.submitted.borrow();
        let total: usize = submitted.iter().map(Vec::len).sum();
        assert_eq!(total, 3);
        assert!(submitted.iter().all(|batch| !batch.is_empty()));
    }

    #[test]
    fn test_completion_stops_loop_and_cancels() {
        let initial = snapshot(ScenarioStatus::Active, &[true, true]);
        let plan = plan(&initial);
        let store = ScriptedStore::with_snapshots(vec![
            snapshot(ScenarioStatus::Active, &[true, true]),
            snapshot(ScenarioStatus::Completed, &[true, true]),
        ]);
        let mut dispatch = DispatchLoop::new(&store, "s", plan.queues)
            .with_poll_interval(Duration::from_millis(1));
        let token = dispatch.cancel_token();

        assert_eq!(dispatch.run().unwrap(), DispatchOutcome::Completed);
        assert!(token.is_cancelled());
        assert_eq!(dispatch.cycles(), 2);
        assert_eq!(*store.fetches.borrow(), 2);
    }

    #[test]
    fn test_external_cancel() {
        let store = ScriptedStore::default();
        let token = CancelToken::new();
        token.cancel();
        let mut dispatch =
            DispatchLoop::new(&store, "s", FleetQueues::default()).with_cancel_token(token);

        assert_eq!(dispatch.run().unwrap(), DispatchOutcome::Cancelled);
        assert_eq!(*store.fetches.borrow(), 0);
    }

    #[test]
    fn test_unknown_scenario_is_not_retried() {
        let store = ScriptedStore::default();
        let mut dispatch =
            DispatchLoop::new(&store, "nope", FleetQueues::default()).with_retry(fast_retry());

        let err = dispatch.run().unwrap_err();
        assert!(matches!(err, DispatchError::ScenarioNotFound(ref id) if id == "nope"));
        assert_eq!(*store.fetches.borrow(), 1);
        assert!(store.submitted.borrow().is_empty());
    }

    #[test]
    fn test_transient_fetch_failure_is_retried() {
        let store = ScriptedStore::default();
        store.snapshots.borrow_mut().extend([
            Err(StoreError::Transport("reset".into())),
            Ok(snapshot(ScenarioStatus::Completed, &[true])),
        ]);
        let mut dispatch =
            DispatchLoop::new(&store, "s", FleetQueues::default()).with_retry(fast_retry());

        assert_eq!(dispatch.run_cycle().unwrap(), CycleOutcome::Completed);
        assert_eq!(*store.fetches.borrow(), 2);
    }

    #[test]
    fn test_failed_submit_returns_pending_batch() {
        let initial = snapshot(ScenarioStatus::Active, &[true, true]);
        let plan = plan(&initial);
        let store =
            ScriptedStore::with_snapshots(vec![snapshot(ScenarioStatus::Active, &[true, true])]);
        store
            .submits
            .borrow_mut()
            .extend((0..3).map(|_| Err(StoreError::Transport("503".into()))));
        let mut dispatch = DispatchLoop::new(&store, "s", plan.queues).with_retry(fast_retry());

        let err = dispatch.run_cycle().unwrap_err();
        let DispatchError::TransportFailure { attempts, pending, .. } = err else {
            panic!("expected transport failure, got {err:?}");
        };
        assert_eq!(attempts, 3);
        assert_eq!(pending.len(), 2);
        assert!(dispatch.assignments().is_empty());
    }

    #[test]
    fn test_run_dispatch_reports() {
        let store = ScriptedStore::with_snapshots(vec![
            snapshot(ScenarioStatus::Active, &[true, true]),
            snapshot(ScenarioStatus::Active, &[true, true]),
            snapshot(ScenarioStatus::Active, &[true, true]),
            snapshot(ScenarioStatus::Completed, &[true, true]),
        ]);
        let config = DispatchConfig {
            objective_mode: ObjectiveMode::MinTotalTime,
            solver_time_budget_seconds: 1,
            poll_interval_seconds: 0.001,
            ..DispatchConfig::default()
        };

        let report = run_dispatch(&store, "s", &config, GuidedLocalSearch::default()).unwrap();

        assert_eq!(report.outcome, DispatchOutcome::Completed);
        assert_eq!(report.assignments.len(), 3);
        assert_eq!(report.cycles, 3);
        assert_eq!(report.objective, ObjectiveMode::MinTotalTime);
        assert!(report.objective_value.is_some());
        assert_eq!(report.start_time.as_deref(), Some("t0"));
    }

    #[test]
    fn test_run_dispatch_on_completed_scenario() {
        let store =
            ScriptedStore::with_snapshots(vec![snapshot(ScenarioStatus::Completed, &[true])]);
        let config = DispatchConfig::default();
        let report = run_dispatch(&store, "s", &config, GuidedLocalSearch::default()).unwrap();
        assert_eq!(report.cycles, 0);
        assert!(report.objective_value.is_none());
        assert!(store.submitted.borrow().is_empty());
    }

    #[test]
    fn test_cancel_during_fetch_backoff_stops_cleanly() {
        let store = ScriptedStore::default();
        store
            .snapshots
            .borrow_mut()
            .push_back(Err(StoreError::Transport("reset".into())));
        let token = CancelToken::new();
        let mut dispatch = DispatchLoop::new(&store, "s", FleetQueues::default())
            .with_retry(slow_retry())
            .with_cancel_token(token.clone());

        let started = Instant::now();
        let handle = cancel_after(&token, Duration::from_millis(50));
        assert_eq!(dispatch.run().unwrap(), DispatchOutcome::Cancelled);
        handle.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(*store.fetches.borrow(), 1);
        assert!(dispatch.undelivered().is_empty());
    }

    #[test]
    fn test_cancel_during_submit_backoff_keeps_undelivered_batch() {
        let initial = snapshot(ScenarioStatus::Active, &[true, true]);
        let plan = plan(&initial);
        let store =
            ScriptedStore::with_snapshots(vec![snapshot(ScenarioStatus::Active, &[true, true])]);
        store
            .submits
            .borrow_mut()
            .push_back(Err(StoreError::Transport("503".into())));
        let token = CancelToken::new();
        let mut dispatch = DispatchLoop::new(&store, "s", plan.queues)
            .with_retry(slow_retry())
            .with_cancel_token(token.clone());

        let handle = cancel_after(&token, Duration::from_millis(50));
        let outcome = dispatch.run_cycle().unwrap();
        handle.join().unwrap();

        let CycleOutcome::Cancelled(batch) = outcome else {
            panic!("expected a cancelled cycle, got {outcome:?}");
        };
        assert_eq!(batch.len(), 2);
        assert_eq!(dispatch.undelivered(), batch.as_slice());
        assert!(dispatch.assignments().is_empty());
        assert!(store.submitted.borrow().is_empty());
    }

    #[test]
    fn test_invalid_poll_interval_is_rejected_before_fetching() {
        let store = ScriptedStore::default();
        let config = DispatchConfig {
            poll_interval_seconds: -1.0,
            ..DispatchConfig::default()
        };

        let err = run_dispatch(&store, "s", &config, GuidedLocalSearch::default()).unwrap_err();

        assert!(matches!(err, DispatchError::Config(_)));
        assert_eq!(*store.fetches.borrow(), 0);
    }
}
