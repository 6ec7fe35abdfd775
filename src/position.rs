use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Source {
    TriMet,
    Db4iot,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::TriMet => "trimet",
            Source::Db4iot => "db4iot",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response body exactly as it came off the wire, plus where and when it came from.
#[derive(Clone, Debug)]
pub struct RawBatch {
    pub source: Source,
    pub fetched_at: DateTime<Utc>,
    pub label: String,
    pub body: Vec<u8>,
}

impl RawBatch {
    pub fn new(source: Source, label: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            source,
            fetched_at: Utc::now(),
            label: label.into(),
            body,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct VehiclePosition {
    pub source: Source,
    pub vehicle_id: String,
    pub route: Option<u32>,
    pub direction: Option<u8>,
    pub trip_id: Option<String>,
    pub block_id: Option<u32>,
    pub sign: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub bearing: Option<u16>,
    pub recorded_at: DateTime<Utc>,
    pub delay_s: Option<i32>,
}

impl VehiclePosition {
    pub fn new(
        source: Source,
        vehicle_id: impl Into<String>,
        lat: f64,
        lon: f64,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            vehicle_id: vehicle_id.into(),
            route: None,
            direction: None,
            trip_id: None,
            block_id: None,
            sign: None,
            lat,
            lon,
            bearing: None,
            recorded_at,
            delay_s: None,
        }
    }

    /// Rejects out-of-range coordinates and the (0, 0) fix AVL units report before a GPS lock.
    pub fn has_valid_location(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && !(self.lat == 0.0 && self.lon == 0.0)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PreppedPosition {
    pub position: VehiclePosition,
    pub service_date: NaiveDate,
    pub local_time: NaiveTime,
    pub weekday: Weekday,
    pub seconds_since_prev: Option<i64>,
    pub meters_since_prev: Option<f64>,
    pub speed_m_s: Option<f64>,
}
