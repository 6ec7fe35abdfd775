use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Envelope returned by `ws/v2/vehicles`. Errors come back with a 200 and an `error` member.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    result_set: ResultSet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSet {
    #[serde(default)]
    query_time: Option<i64>,
    #[serde(default)]
    vehicle: Vec<Vehicle>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Bus,
    Rail,
    #[serde(other)]
    Other,
}

#[allow(unused)]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    #[serde(rename = "vehicleID")]
    pub vehicle_id: u32,
    #[serde(rename = "type")]
    pub vehicle_type: VehicleType,
    pub route_number: Option<u32>,
    pub direction: Option<u8>,
    #[serde(rename = "tripID")]
    pub trip_id: Option<String>,
    #[serde(rename = "blockID")]
    pub block_id: Option<u32>,
    pub sign_message: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: Option<u16>,
    /// Milliseconds since the epoch.
    pub time: i64,
    pub delay: Option<i32>,
    pub garage: Option<String>,
    pub in_congestion: Option<bool>,
    pub off_route: Option<bool>,
}

impl Vehicle {
    pub fn recorded_at(&self) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time)
            .with_context(|| format!("bad vehicle time (ms): {}", self.time))
    }
}

#[derive(Debug)]
pub struct VehicleSet {
    pub query_time: Option<DateTime<Utc>>,
    pub vehicles: Vec<Vehicle>,
}

pub fn parse_vehicles(body: &[u8]) -> Result<VehicleSet> {
    let response: Response =
        serde_json::from_slice(body).context("decoding TriMet vehicles response")?;
    let set = response.result_set;

    if let Some(err) = set.error {
        bail!("TriMet API error: {}", err.content);
    }

    Ok(VehicleSet {
        query_time: set.query_time.and_then(DateTime::from_timestamp_millis),
        vehicles: set.vehicle,
    })
}

#[cfg(test)]
pub(crate) const SAMPLE: &str = r#"{"resultSet":{"queryTime":1471449600123,"vehicle":[
  {"expires":1471449900000,"signMessage":"4 Division to Gresham","serviceDate":1471417200000,
   "loadPercentage":null,"latitude":45.5051,"nextStopSeq":12,"source":"tripFeed","type":"bus",
   "blockID":408,"signMessageLong":"4 Division to Gresham TC","lastLocID":7204,"nextLocID":7206,
   "locationInScheduleDay":29730,"newTrip":false,"longitude":-122.6241,"direction":0,
   "inCongestion":null,"routeNumber":4,"bearing":90,"garage":"CENTER","tripID":"6599867",
   "delay":-42,"extraBlockID":null,"messageCode":63,"lastStopSeq":11,"vehicleID":3001,
   "time":1471449590000,"offRoute":false},
  {"signMessage":"MAX Blue Line to Gresham","latitude":45.5189,"type":"rail","blockID":9001,
   "longitude":-122.6783,"direction":1,"routeNumber":100,"bearing":180,"tripID":"6600001",
   "delay":0,"vehicleID":101,"time":1471449595000}
]}}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sample() {
        let set = parse_vehicles(SAMPLE.as_bytes()).unwrap();
        assert_eq!(set.vehicles.len(), 2);

        let bus = &set.vehicles[0];
        assert_eq!(bus.vehicle_id, 3001);
        assert_eq!(bus.vehicle_type, VehicleType::Bus);
        assert_eq!(bus.route_number, Some(4));
        assert_eq!(bus.delay, Some(-42));
        assert_eq!(bus.recorded_at().unwrap().timestamp(), 1_471_449_590);
        assert_eq!(set.vehicles[1].vehicle_type, VehicleType::Rail);
        assert_eq!(set.query_time.unwrap().timestamp_millis(), 1_471_449_600_123);
    }

    #[test]
    fn error_envelope_is_an_error() {
        let body = br#"{"resultSet":{"error":{"content":"Invalid appID"}}}"#;
        let err = parse_vehicles(body).unwrap_err();
        assert!(err.to_string().contains("Invalid appID"));
    }

    #[test]
    fn empty_result_set_has_no_vehicles() {
        let set = parse_vehicles(br#"{"resultSet":{"queryTime":1}}"#).unwrap();
        assert!(set.vehicles.is_empty());
    }

    #[test]
    fn unknown_vehicle_type_is_kept_as_other() {
        let body = br#"{"resultSet":{"vehicle":[{"vehicleID":1,"type":"streetcar","latitude":45.5,"longitude":-122.6,"time":0}]}}"#;
        let set = parse_vehicles(body).unwrap();
        assert_eq!(set.vehicles[0].vehicle_type, VehicleType::Other);
    }
}
