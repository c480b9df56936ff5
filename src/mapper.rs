//! Turns solver routes into per-vehicle customer queues.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::MappingError;
use crate::problem::{LocationRole, RoutingProblem};
use crate::solver::Solution;

/// FIFO of customers a vehicle still has to serve.
///
/// Only the dispatch loop drains it; nothing can be pushed after mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerQueue {
    customers: VecDeque<String>,
}

impl CustomerQueue {
    fn from_ordered(customers: Vec<String>) -> Self {
        Self {
            customers: customers.into(),
        }
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.customers.pop_front()
    }

    pub fn peek(&self) -> Option<&str> {
        self.customers.front().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.customers.iter().map(String::as_str)
    }
}

/// One queue per vehicle, keyed by vehicle id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetQueues {
    order: Vec<String>,
    queues: HashMap<String, CustomerQueue>,
}

impl FleetQueues {
    pub fn queue(&self, vehicle_id: &str) -> Option<&CustomerQueue> {
        self.queues.get(vehicle_id)
    }

    /// Pops the next customer for `vehicle_id`, if it has one.
    pub fn pop_for(&mut self, vehicle_id: &str) -> Option<String> {
        self.queues.get_mut(vehicle_id).and_then(CustomerQueue::pop_front)
    }

    pub fn is_drained(&self) -> bool {
        self.queues.values().all(CustomerQueue::is_empty)
    }

    /// Customers not yet handed out, over all vehicles.
    pub fn pending(&self) -> usize {
        self.queues.values().map(CustomerQueue::len).sum()
    }

    /// Vehicles in problem order with their queues.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CustomerQueue)> {
        self.order
            .iter()
            .filter_map(|id| self.queues.get(id).map(|queue| (id.as_str(), queue)))
    }
}

/// Maps every route to the ordered, deduplicated customer ids it serves.
pub fn map_solution(
    problem: &RoutingProblem,
    solution: &Solution,
) -> Result<FleetQueues, MappingError> {
    let mut queues = HashMap::with_capacity(problem.num_vehicles());
    let mut order = Vec::with_capacity(problem.num_vehicles());

    for route in &solution.routes {
        let vehicle_id = problem
            .vehicle_id(route.vehicle)
            .ok_or(MappingError::UnknownVehicle(route.vehicle))?;

        let (first, last) = match (route.nodes.first(), route.nodes.last()) {
            (Some(&first), Some(&last)) if route.nodes.len() >= 2 => (first, last),
            _ => return Err(MappingError::MisplacedEndpoints { vehicle: route.vehicle }),
        };
        if first != problem.vehicle_start(route.vehicle)
            || last != problem.vehicle_end(route.vehicle)
        {
            return Err(MappingError::MisplacedEndpoints { vehicle: route.vehicle });
        }

        let mut seen = HashSet::new();
        let mut customers = Vec::new();
        for &index in route.stops() {
            let location = problem.location(index).ok_or(MappingError::UnknownLocation(index))?;
            let customer = match location.role {
                LocationRole::Pickup(customer) | LocationRole::Delivery(customer) => customer,
                LocationRole::VehicleStart(_) | LocationRole::VehicleEnd(_) => {
                    return Err(MappingError::SyntheticStop {
                        vehicle: route.vehicle,
                        location: index,
                    });
                }
            };
            if seen.insert(customer) {
                let id = problem
                    .customer_id(customer)
                    .ok_or(MappingError::UnknownLocation(index))?;
                customers.push(id.to_string());
            }
        }

        order.push(vehicle_id.to_string());
        queues.insert(vehicle_id.to_string(), CustomerQueue::from_ordered(customers));
    }

    Ok(FleetQueues { order, queues })
}
