use anyhow::{Context, Result};
use itertools::Itertools;
use tracing::debug;

use crate::position::{RawBatch, Source};

pub mod vehicles;

pub use vehicles::{Vehicle, VehicleType, parse_vehicles};

pub const DEFAULT_BASE_URL: &str = "https://developer.trimet.org/ws/v2";

pub struct TriMetClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
}

impl TriMetClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            app_id: app_id.into(),
        }
    }

    /// Fetches every vehicle currently on a route. An empty `routes` means all routes.
    pub async fn fetch_vehicles(&self, routes: &[u32]) -> Result<(RawBatch, Vec<Vehicle>)> {
        let url = format!("{}/vehicles", self.base_url);
        let mut query = vec![
            ("appID", self.app_id.clone()),
            ("onRouteOnly", "true".to_owned()),
        ];
        if !routes.is_empty() {
            query.push(("routes", routes.iter().join(",")));
        }

        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;
        resp.error_for_status_ref()
            .with_context(|| format!("fetching {url}"))?;
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("reading body of {url}"))?
            .to_vec();

        let set = parse_vehicles(&body)?;
        debug!(vehicles = set.vehicles.len(), query_time = ?set.query_time, "TriMet vehicles");

        Ok((RawBatch::new(Source::TriMet, "latest", body), set.vehicles))
    }
}
