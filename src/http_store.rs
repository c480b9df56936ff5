//! HTTP adapter for the scenario simulation service.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use crate::config::DispatchConfig;
use crate::error::StoreError;
use crate::scenario::{Assignment, ScenarioSnapshot, VehiclesUpdate};
use crate::traits::ScenarioStore;

#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl From<&DispatchConfig> for HttpStoreConfig {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout_secs: config.request_timeout_seconds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpScenarioStore {
    config: HttpStoreConfig,
    client: reqwest::blocking::Client,
}

impl HttpScenarioStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn url(&self, action: &str, scenario_id: &str) -> String {
        format!(
            "{}/Scenarios/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            action,
            scenario_id
        )
    }
}

impl ScenarioStore for HttpScenarioStore {
    fn get_snapshot(&self, scenario_id: &str) -> Result<ScenarioSnapshot, StoreError> {
        let response = self.client.get(self.url("get_scenario", scenario_id)).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(scenario_id.to_string()));
        }

        // the service answers an unknown id with a literal `null`
        let snapshot: Option<ScenarioSnapshot> = response.error_for_status()?.json()?;
        snapshot.ok_or_else(|| StoreError::NotFound(scenario_id.to_string()))
    }

    fn submit_assignments(
        &self,
        scenario_id: &str,
        batch: &[Assignment],
    ) -> Result<(), StoreError> {
        let body = VehiclesUpdate {
            vehicles: batch.to_vec(),
        };
        let response = self
            .client
            .put(self.url("update_scenario", scenario_id))
            .json(&body)
            .send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(scenario_id.to_string()));
        }
        response.error_for_status()?;

        debug!(scenario = scenario_id, assignments = batch.len(), "submitted batch");
        Ok(())
    }
}
