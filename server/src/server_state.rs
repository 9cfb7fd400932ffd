use std::sync::Arc;

use ride_tracker_data_management::DataManager;
use ride_tracker_lib::CostConfig;

use crate::odometer_scan::OdometerReader;

pub struct ServerState {
    pub data_manager: DataManager,
    /// Fuel price and mileage every live ride is costed with.
    pub cost: CostConfig,
    /// `None` when no AI key is configured.
    pub odometer_reader: Option<Arc<dyn OdometerReader>>,
}
