//! Straight-line travel-time model.
//!
//! Vehicles in the simulation move in straight lines at constant speed, so the
//! travel time between two points is their Euclidean distance scaled by a
//! fixed speed factor and rounded to whole time units.

use rayon::prelude::*;

use crate::traits::DistanceMatrixProvider;

/// Meters per coordinate unit (one degree).
const METERS_PER_UNIT: f64 = 111_000.0;

/// Simulated vehicle speed in meters per second.
const VEHICLE_SPEED_MPS: f64 = 4.5;

/// Minutes of travel per coordinate unit at the simulated speed.
pub const DEFAULT_SPEED_FACTOR: f64 = METERS_PER_UNIT / VEHICLE_SPEED_MPS / 60.0;

/// Euclidean travel-time provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EuclideanMatrix {
    /// Time units per coordinate unit.
    pub speed_factor: f64,
}

impl Default for EuclideanMatrix {
    fn default() -> Self {
        Self {
            speed_factor: DEFAULT_SPEED_FACTOR,
        }
    }
}

impl EuclideanMatrix {
    pub fn new(speed_factor: f64) -> Self {
        Self { speed_factor }
    }

    /// Travel time between two points.
    ///
    /// Symmetric and zero only for identical coordinates: a distinct pair whose
    /// scaled distance rounds to zero still costs one unit.
    pub fn cost(&self, from: (f64, f64), to: (f64, f64)) -> i64 {
        if from == to {
            return 0;
        }
        let distance = (from.0 - to.0).hypot(from.1 - to.1);
        // round() is half away from zero, which is half-up for non-negative values
        let time = (distance * self.speed_factor).round() as i64;
        time.max(1)
    }
}

impl DistanceMatrixProvider for EuclideanMatrix {
    fn matrix_for(&self, locations: &[(f64, f64)]) -> Vec<Vec<i64>> {
        locations
            .par_iter()
            .map(|from| locations.iter().map(|to| self.cost(*from, *to)).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        let model = EuclideanMatrix::default();
        assert_eq!(model.cost((1.5, 2.5), (1.5, 2.5)), 0);
    }

    #[test]
    fn test_known_distance() {
        // 3-4-5 triangle
        let model = EuclideanMatrix::new(1.0);
        assert_eq!(model.cost((0.0, 0.0), (3.0, 4.0)), 5);
        let doubled = EuclideanMatrix::new(2.0);
        assert_eq!(doubled.cost((0.0, 0.0), (3.0, 4.0)), 10);
    }

    #[test]
    fn test_rounds_half_up() {
        let model = EuclideanMatrix::new(1.0);
        assert_eq!(model.cost((0.0, 0.0), (2.5, 0.0)), 3);
        assert_eq!(model.cost((0.0, 0.0), (2.49, 0.0)), 2);
    }

    #[test]
    fn test_distinct_points_never_free() {
        let model = EuclideanMatrix::new(1.0);
        assert_eq!(model.cost((0.0, 0.0), (0.1, 0.0)), 1);
    }

    #[test]
    fn test_default_speed_matches_simulation() {
        // 0.01 degrees = 1110 m, at 4.5 m/s = 246.7 s = ~4 minutes
        let model = EuclideanMatrix::default();
        assert_eq!(model.cost((48.0, 11.0), (48.01, 11.0)), 4);
    }

    #[test]
    fn test_matrix_diagonal_is_zero() {
        let model = EuclideanMatrix::default();
        let locations = vec![(0.1, 0.1), (0.2, 0.3), (0.5, 0.1)];
        let matrix = model.matrix_for(&locations);

        for i in 0..locations.len() {
            assert_eq!(matrix[i][i], 0, "Diagonal should be zero");
        }
    }

    #[test]
    fn test_matrix_symmetric() {
        let model = EuclideanMatrix::new(10.0);
        let locations = vec![(0.0, 0.0), (1.3, 2.7), (-4.0, 0.5)];
        let matrix = model.matrix_for(&locations);

        for i in 0..locations.len() {
            for j in 0..locations.len() {
                assert_eq!(matrix[i][j], matrix[j][i], "Matrix should be symmetric");
            }
        }
    }
}
