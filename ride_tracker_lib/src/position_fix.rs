use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

/// A single position sample reported by the device.
///
/// The point is stored as `x = longitude`, `y = latitude`, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub position: Point,
    pub speed_mps: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, speed_mps: Option<f64>, timestamp: DateTime<Utc>) -> Self {
        Self {
            position: Point::new(longitude, latitude),
            speed_mps,
            timestamp,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.position.y()
    }

    pub fn longitude(&self) -> f64 {
        self.position.x()
    }

    /// Coordinates must be finite and inside the WGS84 ranges.
    pub fn has_valid_position(&self) -> bool {
        let (lat, lon) = (self.latitude(), self.longitude());
        lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
    }

    /// Reported speed in km/h, 0 when the source gave none (or garbage).
    pub fn speed_kmh(&self) -> f64 {
        match self.speed_mps {
            Some(mps) if mps.is_finite() && mps > 0.0 => mps * 3.6,
            _ => 0.0,
        }
    }
}
