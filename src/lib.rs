//! fleet-dispatch
//!
//! Plans pickup/delivery routes for a vehicle fleet and feeds them, one
//! customer at a time, to a live simulation scenario.

pub mod config;
pub mod dimensions;
pub mod dispatch;
pub mod error;
pub mod euclidean;
pub mod http_store;
pub mod mapper;
pub mod problem;
pub mod scenario;
pub mod solver;
pub mod traits;
