//! Dispatcher configuration.
//!
//! Defaults cover a local simulation runner. Values can come from a JSON file
//! (camelCase keys, every key optional) and then be overridden from the
//! environment with `FLEET_DISPATCH_*` variables. Both paths end in
//! [`DispatchConfig::validate`].

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dimensions::{CapacityMode, ObjectiveMode, PrecedencePolicy};
use crate::error::ConfigError;
use crate::euclidean::DEFAULT_SPEED_FACTOR;
use crate::problem::{PlanningOptions, DEFAULT_CAPACITY_FACTOR};
use crate::solver::SolveOptions;

pub const ENV_PREFIX: &str = "FLEET_DISPATCH_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt.saturating_sub(1)) as u64;
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    /// Expected fleet size; a mismatch with the scenario is logged.
    pub num_vehicles: Option<usize>,
    /// Expected number of customers; a mismatch with the scenario is logged.
    pub num_customers: Option<usize>,
    pub vehicle_capacity: Option<u32>,
    pub capacity_factor: f64,
    pub capacity_mode: CapacityMode,
    pub objective_mode: ObjectiveMode,
    pub precedence_policy: PrecedencePolicy,
    pub stop_balance_coefficient: Option<i64>,
    pub solver_time_budget_seconds: u64,
    pub poll_interval_seconds: f64,
    pub speed_factor: f64,
    pub search: SolveOptions,
    pub retry: RetryPolicy,
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            num_vehicles: None,
            num_customers: None,
            vehicle_capacity: None,
            capacity_factor: DEFAULT_CAPACITY_FACTOR,
            capacity_mode: CapacityMode::default(),
            objective_mode: ObjectiveMode::default(),
            precedence_policy: PrecedencePolicy::default(),
            stop_balance_coefficient: None,
            solver_time_budget_seconds: 30,
            poll_interval_seconds: 2.0,
            speed_factor: DEFAULT_SPEED_FACTOR,
            search: SolveOptions::default(),
            retry: RetryPolicy::default(),
            base_url: "http://localhost:8090".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

impl DispatchConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `FLEET_DISPATCH_*` variables from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by full variable name, e.g.
    /// `FLEET_DISPATCH_OBJECTIVE_MODE`.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = get("NUM_VEHICLES") {
            self.num_vehicles = Some(parse(&key, &value)?);
        }
        if let Some((key, value)) = get("NUM_CUSTOMERS") {
            self.num_customers = Some(parse(&key, &value)?);
        }
        if let Some((key, value)) = get("VEHICLE_CAPACITY") {
            self.vehicle_capacity = Some(parse(&key, &value)?);
        }
        if let Some((key, value)) = get("CAPACITY_FACTOR") {
            self.capacity_factor = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("CAPACITY_MODE") {
            self.capacity_mode = parse_enum(&key, &value.to_lowercase())?;
        }
        if let Some((key, value)) = get("OBJECTIVE_MODE") {
            self.objective_mode = parse_enum(&key, &value.to_uppercase())?;
        }
        if let Some((key, value)) = get("PRECEDENCE_POLICY") {
            self.precedence_policy = parse_enum(&key, &value.to_lowercase())?;
        }
        if let Some((key, value)) = get("STOP_BALANCE_COEFFICIENT") {
            self.stop_balance_coefficient = Some(parse(&key, &value)?);
        }
        if let Some((key, value)) = get("SOLVER_TIME_BUDGET_SECONDS") {
            self.solver_time_budget_seconds = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("POLL_INTERVAL_SECONDS") {
            self.poll_interval_seconds = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("SPEED_FACTOR") {
            self.speed_factor = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("SEARCH_ALPHA") {
            self.search.alpha = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("SEARCH_MAX_STAGNATION") {
            self.search.max_stagnation = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse(&key, &value)?;
        }
        if let Some((key, value)) = get("RETRY_INITIAL_BACKOFF_MS") {
            self.retry.initial_backoff_ms = parse(&key, &value)?;
        }
        if let Some((_, value)) = get("BASE_URL") {
            self.base_url = value;
        }
        if let Some((key, value)) = get("REQUEST_TIMEOUT_SECONDS") {
            self.request_timeout_seconds = parse(&key, &value)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Rejects numeric settings that would be silently clamped later on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.poll_interval()?;
        positive("speedFactor", self.speed_factor)?;
        positive("capacityFactor", self.capacity_factor)?;
        if !(self.search.alpha.is_finite() && self.search.alpha >= 0.0) {
            return Err(invalid("search.alpha", self.search.alpha));
        }
        Ok(())
    }

    pub fn planning_options(&self) -> PlanningOptions {
        PlanningOptions {
            objective: self.objective_mode,
            precedence: self.precedence_policy,
            capacity_mode: self.capacity_mode,
            vehicle_capacity: self.vehicle_capacity,
            capacity_factor: self.capacity_factor,
            speed_factor: self.speed_factor,
            stop_balance_coefficient: self.stop_balance_coefficient,
        }
    }

    pub fn solver_time_budget(&self) -> Duration {
        Duration::from_secs(self.solver_time_budget_seconds)
    }

    /// Wait between polls. Must be a positive, finite number of seconds.
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        let seconds = positive("pollIntervalSeconds", self.poll_interval_seconds)?;
        Duration::try_from_secs_f64(seconds).map_err(|_| invalid("pollIntervalSeconds", seconds))
    }
}

fn positive(key: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(key, value))
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

/// Parses a unit enum variant through its serde name.
fn parse_enum<T: for<'de> Deserialize<'de>>(key: &str, value: &str) -> Result<T, ConfigError> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_string()))
        .map_err(|_| invalid(key, value))
}
