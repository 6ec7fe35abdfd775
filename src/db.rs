use std::{collections::HashMap, str::FromStr};

use anyhow::{Context, Result};
use chrono::DateTime;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;

use crate::{position::PreppedPosition, prep::LastFix};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bus_positions (
    source TEXT NOT NULL,
    vehicle_id TEXT NOT NULL,
    recorded_at INTEGER NOT NULL,
    route INTEGER,
    direction INTEGER,
    trip_id TEXT,
    block_id INTEGER,
    sign TEXT,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    bearing INTEGER,
    delay_s INTEGER,
    service_date TEXT NOT NULL,
    local_time TEXT NOT NULL,
    weekday INTEGER NOT NULL,
    seconds_since_prev INTEGER,
    meters_since_prev REAL,
    speed_m_s REAL,
    PRIMARY KEY (source, vehicle_id, recorded_at)
);
CREATE INDEX IF NOT EXISTS bus_positions_service_date ON bus_positions (service_date, route);
";

const INSERT: &str = "
INSERT OR IGNORE INTO bus_positions (
    source, vehicle_id, recorded_at, route, direction, trip_id, block_id, sign,
    lat, lon, bearing, delay_s, service_date, local_time, weekday,
    seconds_since_prev, meters_since_prev, speed_m_s
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
";

/// A row of the latest-per-vehicle view.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct LatestPosition {
    pub source: String,
    pub vehicle_id: String,
    pub recorded_at: i64,
    pub route: Option<i64>,
    pub direction: Option<i64>,
    pub sign: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub bearing: Option<i64>,
    pub delay_s: Option<i64>,
    pub speed_m_s: Option<f64>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("bad database url: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {url}"))?;
        Self::with_pool(pool).await
    }

    /// A private in-memory database. One connection, since each SQLite memory connection is its own database.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("creating schema")?;
        Ok(Self { pool })
    }

    /// Inserts positions in one transaction, skipping any already stored.
    /// Returns how many rows were new.
    pub async fn insert_positions(&self, positions: &[PreppedPosition]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for p in positions {
            let v = &p.position;
            let result = sqlx::query(INSERT)
                .bind(v.source.as_str())
                .bind(&v.vehicle_id)
                .bind(v.recorded_at.timestamp())
                .bind(v.route)
                .bind(v.direction)
                .bind(&v.trip_id)
                .bind(v.block_id)
                .bind(&v.sign)
                .bind(v.lat)
                .bind(v.lon)
                .bind(v.bearing)
                .bind(v.delay_s)
                .bind(p.service_date.to_string())
                .bind(p.local_time.format("%H:%M:%S").to_string())
                .bind(p.weekday.num_days_from_monday())
                .bind(p.seconds_since_prev)
                .bind(p.meters_since_prev)
                .bind(p.speed_m_s)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("inserting {} at {}", v.vehicle_id, v.recorded_at))?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        info!(
            inserted,
            skipped = positions.len() as u64 - inserted,
            "saved prepped positions"
        );
        Ok(inserted)
    }

    /// The most recent fix for each vehicle, across sources.
    pub async fn latest_positions(&self) -> Result<Vec<LatestPosition>> {
        // SQLite takes bare columns from the row that produced MAX()
        let rows = sqlx::query_as::<_, LatestPosition>(
            "SELECT source, vehicle_id, MAX(recorded_at) AS recorded_at, route, direction, sign,
                    lat, lon, bearing, delay_s, speed_m_s
             FROM bus_positions
             GROUP BY vehicle_id
             ORDER BY vehicle_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Each vehicle's latest stored fix, keyed by vehicle ID.
    pub async fn last_fixes(&self) -> Result<HashMap<String, LastFix>> {
        let mut fixes = HashMap::new();
        for p in self.latest_positions().await? {
            let Some(recorded_at) = DateTime::from_timestamp(p.recorded_at, 0) else {
                continue;
            };
            fixes.insert(
                p.vehicle_id,
                LastFix {
                    recorded_at,
                    lat: p.lat,
                    lon: p.lon,
                },
            );
        }
        Ok(fixes)
    }

    pub async fn count(&self) -> Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bus_positions")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
