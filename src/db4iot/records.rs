use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    #[serde(deserialize_with = "string_or_number")]
    pub vehicle_id: String,
    pub route: Option<u32>,
    pub direction: Option<u8>,
    pub trip_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: Option<u16>,
    /// Seconds since the epoch.
    pub timestamp: i64,
}

impl Record {
    pub fn recorded_at(&self) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
            .with_context(|| format!("bad record timestamp: {}", self.timestamp))
    }
}

// Older dumps carry numeric vehicle IDs, newer ones quote them.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Num(u64),
        Str(String),
    }

    Ok(match Id::deserialize(d)? {
        Id::Num(n) => n.to_string(),
        Id::Str(s) => s,
    })
}

pub fn parse_records(body: &[u8]) -> Result<Vec<Record>> {
    serde_json::from_slice(body).context("decoding db4iot records")
}

#[cfg(test)]
pub(crate) const SAMPLE: &str = r#"[
  {"vehicle_id":3001,"route":4,"direction":0,"trip_id":"6599867","latitude":45.5051,"longitude":-122.6241,"bearing":90,"timestamp":1471449590},
  {"vehicle_id":"3001","route":4,"direction":0,"trip_id":"6599867","latitude":45.5051,"longitude":-122.6141,"bearing":90,"timestamp":1471449650},
  {"vehicle_id":"2905","route":14,"latitude":0.0,"longitude":0.0,"timestamp":1471449600}
]"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_ids_may_be_numbers_or_strings() {
        let records = parse_records(SAMPLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].vehicle_id, "3001");
        assert_eq!(records[1].vehicle_id, "3001");
        assert_eq!(records[2].direction, None);
        assert_eq!(records[1].recorded_at().unwrap().timestamp(), 1_471_449_650);
    }

    #[test]
    fn rejects_non_array() {
        assert!(parse_records(br#"{"error":"nope"}"#).is_err());
    }
}
