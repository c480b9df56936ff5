//! Scenario snapshots as exchanged with the simulation service.
//!
//! Field names follow the service's camelCase JSON. Snapshots are treated as
//! immutable values: every poll replaces the previous one wholesale.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioStatus {
    Created,
    Running,
    Active,
    Completed,
    #[serde(other)]
    Other,
}

impl ScenarioStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, ScenarioStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub coord_x: f64,
    pub coord_y: f64,
    pub is_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_travel_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_travelled: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_trips: Option<u32>,
}

impl Vehicle {
    pub fn new(id: impl Into<String>, position: (f64, f64)) -> Self {
        Self {
            id: id.into(),
            coord_x: position.0,
            coord_y: position.1,
            is_available: true,
            vehicle_speed: None,
            customer_id: None,
            remaining_travel_time: None,
            distance_travelled: None,
            active_time: None,
            number_of_trips: None,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.coord_x, self.coord_y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub coord_x: f64,
    pub coord_y: f64,
    pub destination_x: f64,
    pub destination_y: f64,
    pub awaiting_service: bool,
}

impl Customer {
    pub fn new(id: impl Into<String>, pickup: (f64, f64), dropoff: (f64, f64)) -> Self {
        Self {
            id: id.into(),
            coord_x: pickup.0,
            coord_y: pickup.1,
            destination_x: dropoff.0,
            destination_y: dropoff.1,
            awaiting_service: true,
        }
    }

    pub fn pickup(&self) -> (f64, f64) {
        (self.coord_x, self.coord_y)
    }

    pub fn dropoff(&self) -> (f64, f64) {
        (self.destination_x, self.destination_y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub status: ScenarioStatus,
    pub vehicles: Vec<Vehicle>,
    pub customers: Vec<Customer>,
}

impl ScenarioSnapshot {
    pub fn awaiting_customers(&self) -> impl Iterator<Item = &Customer> {
        self.customers.iter().filter(|customer| customer.awaiting_service)
    }
}

/// A single "serve this customer next" instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(rename = "id")]
    pub vehicle_id: String,
    pub customer_id: String,
}

impl Assignment {
    pub fn new(vehicle_id: impl Into<String>, customer_id: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            customer_id: customer_id.into(),
        }
    }
}

/// Request body of a batch update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehiclesUpdate {
    pub vehicles: Vec<Assignment>,
}
