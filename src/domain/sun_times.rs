// Sunrise/sunset annotation data
use serde::{Deserialize, Serialize};

/// Sunrise and sunset of one calendar day, as epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunTimes {
    pub sunrise: i64,
    pub sunset: i64,
}

impl SunTimes {
    pub fn new(sunrise: i64, sunset: i64) -> Self {
        Self { sunrise, sunset }
    }
}
