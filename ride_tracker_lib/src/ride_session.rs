use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::{cost::CostConfig, geo::haversine_km, position_fix::PositionFix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Idle,
    Running,
    Paused,
    Finished,
}

/// Positioning condition, independent of [`RideStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpsStatus {
    /// Not tracking.
    Off,
    /// Subscribed, waiting for the first fix of this run.
    Acquiring,
    /// Fixes are arriving.
    Locked,
    /// The position source refused or dropped the subscription.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RideSnapshot {
    pub status: RideStatus,
    pub elapsed_seconds: u64,
    pub total_distance_km: f64,
    pub speed_kmh: f64,
    pub estimated_cost: f64,
    pub gps_status: GpsStatus,
}

impl RideSnapshot {
    pub fn display_speed(&self) -> u32 {
        self.speed_kmh.round() as u32
    }
}

/// Final figures of a finished ride, handed to the persistence sink.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RideSummary {
    pub distance_km: f64,
    pub duration_seconds: u64,
    pub cost: f64,
}

/// What happened to a fix passed to [`RideSession::on_position_fix`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixOutcome {
    /// Ride not running, fix dropped.
    NotRunning,
    /// Coordinates were not usable.
    Invalid,
    /// First fix, only sets the baseline.
    Seeded,
    /// Within the movement threshold of the baseline. The baseline stays put.
    Drift { distance_km: f64 },
    Accepted { distance_km: f64 },
}

/// In-memory state of one ride. All mutation goes through the methods below, so the
/// invariants on distance and cost hold no matter what order events arrive in.
#[derive(Debug, Clone)]
pub struct RideSession {
    config: CostConfig,
    status: RideStatus,
    elapsed_seconds: u64,
    total_distance_km: f64,
    last_fix: Option<Point>,
    speed_kmh: f64,
    estimated_cost: f64,
    gps_status: GpsStatus,
}

impl RideSession {
    pub fn new(config: CostConfig) -> Self {
        Self {
            config,
            status: RideStatus::Idle,
            elapsed_seconds: 0,
            total_distance_km: 0.0,
            last_fix: None,
            speed_kmh: 0.0,
            estimated_cost: 0.0,
            gps_status: GpsStatus::Off,
        }
    }

    pub fn status(&self) -> RideStatus {
        self.status
    }

    pub fn config(&self) -> &CostConfig {
        &self.config
    }

    pub fn last_fix(&self) -> Option<Point> {
        self.last_fix
    }

    /// Start or resume. Returns false when the call was a no-op.
    pub fn start(&mut self) -> bool {
        match self.status {
            RideStatus::Idle | RideStatus::Paused => {
                self.status = RideStatus::Running;
                self.gps_status = GpsStatus::Acquiring;
                true
            }
            RideStatus::Running | RideStatus::Finished => false,
        }
    }

    pub fn pause(&mut self) -> bool {
        if self.status != RideStatus::Running {
            return false;
        }
        self.status = RideStatus::Paused;
        self.speed_kmh = 0.0;
        self.gps_status = GpsStatus::Off;
        true
    }

    /// One second of riding. Ignored unless running.
    pub fn tick(&mut self) -> bool {
        if self.status != RideStatus::Running {
            return false;
        }
        self.elapsed_seconds += 1;
        true
    }

    pub fn on_position_fix(&mut self, fix: &PositionFix) -> FixOutcome {
        if self.status != RideStatus::Running {
            return FixOutcome::NotRunning;
        }
        if !fix.has_valid_position() {
            return FixOutcome::Invalid;
        }

        self.gps_status = GpsStatus::Locked;
        self.speed_kmh = fix.speed_kmh();

        let Some(last) = self.last_fix else {
            self.last_fix = Some(fix.position);
            return FixOutcome::Seeded;
        };

        let distance_km = haversine_km(last, fix.position);
        if distance_km > self.config.min_movement_km() {
            self.total_distance_km += distance_km;
            self.estimated_cost = self.total_distance_km * self.config.cost_per_km();
            self.last_fix = Some(fix.position);
            FixOutcome::Accepted { distance_km }
        } else {
            FixOutcome::Drift { distance_km }
        }
    }

    pub(crate) fn mark_gps_unavailable(&mut self) {
        if self.status == RideStatus::Running {
            self.gps_status = GpsStatus::Unavailable;
        }
    }

    /// Ends the ride. Only the first finish of a started ride yields a summary.
    pub fn finish(&mut self) -> Option<RideSummary> {
        match self.status {
            RideStatus::Running | RideStatus::Paused => {
                self.pause();
                self.status = RideStatus::Finished;
                Some(self.summary())
            }
            RideStatus::Idle | RideStatus::Finished => None,
        }
    }

    pub fn summary(&self) -> RideSummary {
        RideSummary {
            distance_km: self.total_distance_km,
            duration_seconds: self.elapsed_seconds,
            cost: self.estimated_cost,
        }
    }

    pub fn snapshot(&self) -> RideSnapshot {
        RideSnapshot {
            status: self.status,
            elapsed_seconds: self.elapsed_seconds,
            total_distance_km: self.total_distance_km,
            speed_kmh: self.speed_kmh,
            estimated_cost: self.estimated_cost,
            gps_status: self.gps_status,
        }
    }
}
