use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, Utc, Weekday};
use tracing::{debug, info};

use crate::position::{PreppedPosition, VehiclePosition};

const R_EARTH_M: f64 = 6_371_008.8;

/// A stored fix older than this is too stale to derive motion from.
const MAX_SEED_GAP_MINUTES: i64 = 30;

/// The last fix already stored for a vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LastFix {
    pub recorded_at: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrepStats {
    pub input: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub output: usize,
}

/// Prep with no stored fixes, so motion attributes only come from this batch.
#[cfg(test)]
pub fn prep_data(positions: Vec<VehiclePosition>) -> (Vec<PreppedPosition>, PrepStats) {
    prep_data_after(positions, &HashMap::new())
}

/// Validates, deduplicates and orders the combined positions, then adds the
/// per-vehicle attributes. Output is sorted by `(vehicle_id, recorded_at)`.
///
/// Gap, distance and speed come from the vehicle's previous fix in this batch.
/// For its first fix, the entry in `last` is used instead when that fix is
/// earlier and at most `MAX_SEED_GAP_MINUTES` old; otherwise they stay empty.
pub fn prep_data_after(
    mut positions: Vec<VehiclePosition>,
    last: &HashMap<String, LastFix>,
) -> (Vec<PreppedPosition>, PrepStats) {
    let mut stats = PrepStats {
        input: positions.len(),
        ..Default::default()
    };

    positions.retain(|p| p.has_valid_location());
    stats.invalid = stats.input - positions.len();

    positions.sort_by(|a, b| {
        (&a.vehicle_id, a.recorded_at, a.source).cmp(&(&b.vehicle_id, b.recorded_at, b.source))
    });
    let before = positions.len();
    positions.dedup_by(|a, b| {
        a.source == b.source && a.vehicle_id == b.vehicle_id && a.recorded_at == b.recorded_at
    });
    stats.duplicates = before - positions.len();

    let max_gap = TimeDelta::minutes(MAX_SEED_GAP_MINUTES);
    let mut prepped: Vec<PreppedPosition> = Vec::with_capacity(positions.len());
    for position in positions {
        let prev = prepped
            .last()
            .map(|p| &p.position)
            .filter(|p| p.vehicle_id == position.vehicle_id)
            .map(|p| LastFix {
                recorded_at: p.recorded_at,
                lat: p.lat,
                lon: p.lon,
            })
            .or_else(|| {
                last.get(&position.vehicle_id).copied().filter(|fix| {
                    fix.recorded_at < position.recorded_at
                        && position.recorded_at - fix.recorded_at <= max_gap
                })
            });
        let (seconds, meters) = match prev {
            Some(prev) => (
                Some((position.recorded_at - prev.recorded_at).num_seconds()),
                Some(haversine_m(prev.lat, prev.lon, position.lat, position.lon)),
            ),
            None => (None, None),
        };
        let speed = match (seconds, meters) {
            (Some(s), Some(m)) if s > 0 => Some(m / s as f64),
            _ => None,
        };

        let local = pacific_local(position.recorded_at);
        let service_date = service_date(local);
        prepped.push(PreppedPosition {
            service_date,
            local_time: local.time(),
            weekday: service_date.weekday(),
            seconds_since_prev: seconds,
            meters_since_prev: meters,
            speed_m_s: speed,
            position,
        });
    }

    stats.output = prepped.len();
    if stats.invalid > 0 {
        debug!(invalid = stats.invalid, "dropped positions without a usable fix");
    }
    info!(
        input = stats.input,
        output = stats.output,
        duplicates = stats.duplicates,
        "prepped positions"
    );
    (prepped, stats)
}

/// True while US daylight saving is in effect for the Pacific zone: from 02:00
/// PST on the second Sunday of March to 02:00 PDT on the first Sunday of November.
fn is_pacific_dst(at: DateTime<Utc>) -> bool {
    let year = at.year();
    let start = NaiveDate::from_weekday_of_month_opt(year, 3, Weekday::Sun, 2)
        .and_then(|d| d.and_hms_opt(10, 0, 0));
    let end = NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Sun, 1)
        .and_then(|d| d.and_hms_opt(9, 0, 0));

    match (start, end) {
        (Some(start), Some(end)) => {
            let t = at.naive_utc();
            t >= start && t < end
        }
        _ => false,
    }
}

pub fn pacific_local(at: DateTime<Utc>) -> NaiveDateTime {
    let offset = if is_pacific_dst(at) { -7 } else { -8 };
    at.naive_utc() + TimeDelta::hours(offset)
}

/// Trips after midnight belong to the previous day's service until 03:00.
pub fn service_date(local: NaiveDateTime) -> NaiveDate {
    (local - TimeDelta::hours(3)).date()
}

pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * R_EARTH_M * a.sqrt().asin()
}
