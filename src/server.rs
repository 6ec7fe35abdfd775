use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use geojson::{Feature, FeatureCollection, ser::serialize_geometry};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::db::{Database, LatestPosition};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PositionFeature<'a> {
    vehicle_id: &'a str,
    source: &'a str,
    route: Option<i64>,
    direction: Option<i64>,
    sign: Option<&'a str>,
    bearing: Option<i64>,
    delay_s: Option<i64>,
    speed_m_s: Option<f64>,
    recorded_at: i64,
    #[serde(serialize_with = "serialize_geometry")]
    geometry: geo_types::Point<f64>,
}

impl<'a> From<&'a LatestPosition> for PositionFeature<'a> {
    fn from(p: &'a LatestPosition) -> Self {
        Self {
            vehicle_id: &p.vehicle_id,
            source: &p.source,
            route: p.route,
            direction: p.direction,
            sign: p.sign.as_deref(),
            bearing: p.bearing,
            delay_s: p.delay_s,
            speed_m_s: p.speed_m_s,
            recorded_at: p.recorded_at,
            geometry: geo_types::Point::new(p.lon, p.lat),
        }
    }
}

pub fn to_feature_collection(positions: &[LatestPosition]) -> anyhow::Result<FeatureCollection> {
    let features = positions
        .iter()
        .map(|p| geojson::ser::to_feature(PositionFeature::from(p)))
        .collect::<Result<Vec<Feature>, geojson::Error>>()?;

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

struct AppError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("request failed: {:#}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

async fn positions(State(db): State<Database>) -> Result<Json<FeatureCollection>, AppError> {
    let latest = db.latest_positions().await?;
    Ok(Json(to_feature_collection(&latest)?))
}

pub fn router(db: Database) -> Router {
    Router::new()
        .route("/positions", get(positions))
        .route("/health", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .with_state(db)
}

pub async fn serve(db: Database, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "serving latest positions");
    axum::serve(listener, router(db)).await?;
    Ok(())
}
