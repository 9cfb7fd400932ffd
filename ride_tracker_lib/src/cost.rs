use serde::{Deserialize, Serialize};

use crate::error::RideError;

pub const DEFAULT_FUEL_PRICE_PER_LITER: f64 = 105.0;
pub const DEFAULT_VEHICLE_KM_PER_LITER: f64 = 45.0;
/// Fixes closer than this to the last accepted one are treated as GPS drift.
pub const DEFAULT_MIN_MOVEMENT_KM: f64 = 0.005;

/// Fixed per-vehicle parameters used to turn distance into an estimated fuel cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    fuel_price_per_liter: f64,
    vehicle_km_per_liter: f64,
    min_movement_km: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            fuel_price_per_liter: DEFAULT_FUEL_PRICE_PER_LITER,
            vehicle_km_per_liter: DEFAULT_VEHICLE_KM_PER_LITER,
            min_movement_km: DEFAULT_MIN_MOVEMENT_KM,
        }
    }
}

impl CostConfig {
    pub fn new(fuel_price_per_liter: f64, vehicle_km_per_liter: f64) -> Result<Self, RideError> {
        if !fuel_price_per_liter.is_finite() || fuel_price_per_liter < 0.0 {
            return Err(RideError::InvalidConfig(format!("fuel price must be a non-negative number, got {fuel_price_per_liter}")));
        }
        if !vehicle_km_per_liter.is_finite() || vehicle_km_per_liter <= 0.0 {
            return Err(RideError::InvalidConfig(format!("mileage must be a positive number, got {vehicle_km_per_liter}")));
        }

        Ok(Self {
            fuel_price_per_liter,
            vehicle_km_per_liter,
            min_movement_km: DEFAULT_MIN_MOVEMENT_KM,
        })
    }

    pub fn fuel_price_per_liter(&self) -> f64 {
        self.fuel_price_per_liter
    }

    pub fn vehicle_km_per_liter(&self) -> f64 {
        self.vehicle_km_per_liter
    }

    pub fn min_movement_km(&self) -> f64 {
        self.min_movement_km
    }

    pub fn cost_per_km(&self) -> f64 {
        self.fuel_price_per_liter / self.vehicle_km_per_liter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cost_per_km() {
        let config = CostConfig::default();
        assert!((config.cost_per_km() - 105.0 / 45.0).abs() < 1e-12);
        assert_eq!(config.min_movement_km(), 0.005);
    }

    #[test]
    fn rejects_zero_mileage() {
        assert!(CostConfig::new(105.0, 0.0).is_err());
        assert!(CostConfig::new(-1.0, 45.0).is_err());
        assert!(CostConfig::new(100.0, 50.0).is_ok());
    }
}
