use std::{
    io::{Read, Seek},
    path::Path,
};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::{
    adapters::{Db4iotAdapter, PositionAdapter, TriMetAdapter},
    db::Database,
    db4iot::{self, Db4iotClient, HistoricalArchive},
    position::{PreppedPosition, RawBatch, Source, VehiclePosition},
    prep::{self, PrepStats},
    snapshot::PreppedBatch,
    store::{self, ObjectStore},
    trimet::TriMetClient,
};

/// Raw bodies and the positions adapted from them.
#[derive(Debug, Default)]
pub struct Fetched {
    pub raw: Vec<RawBatch>,
    pub positions: Vec<VehiclePosition>,
}

impl Fetched {
    pub fn extend(&mut self, other: Fetched) {
        self.raw.extend(other.raw);
        self.positions.extend(other.positions);
    }

    fn push<A>(&mut self, raw: RawBatch, adapter: &A) -> Result<()>
    where
        A: PositionAdapter<Error = anyhow::Error>,
    {
        let positions = adapter.positions()?;
        info!(
            source = %adapter.source(),
            label = %raw.label,
            positions = positions.len(),
            "adapted"
        );
        self.raw.push(raw);
        self.positions.extend(positions);
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct SaveReport {
    pub raw_keys: Vec<String>,
    pub inserted: u64,
}

pub struct DataLoader<S> {
    trimet: Option<TriMetClient>,
    db4iot: Option<Db4iotClient>,
    store: S,
    db: Database,
}

impl<S: ObjectStore> DataLoader<S> {
    pub fn new(
        trimet: Option<TriMetClient>,
        db4iot: Option<Db4iotClient>,
        store: S,
        db: Database,
    ) -> Self {
        Self {
            trimet,
            db4iot,
            store,
            db,
        }
    }

    /// Current bus positions from TriMet. An empty `routes` means every route.
    pub async fn fetch_latest_bus_times(&self, routes: &[u32]) -> Result<Fetched> {
        let Some(client) = &self.trimet else {
            bail!("TriMet client is not configured (missing app ID)");
        };

        let (raw, vehicles) = client.fetch_vehicles(routes).await?;
        let mut fetched = Fetched::default();
        fetched.push(raw, &TriMetAdapter::new(&vehicles))?;
        Ok(fetched)
    }

    /// Older positions from db4iot, one request per day in `from..=to`.
    pub async fn fetch_historical_bus_times(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        route: Option<u32>,
    ) -> Result<Fetched> {
        let Some(client) = &self.db4iot else {
            bail!("historical client is not configured (missing db4iot URL)");
        };

        let mut fetched = Fetched::default();
        for (raw, records) in client.fetch_range(from, to, route).await? {
            fetched.push(raw, &Db4iotAdapter::new(&records))?;
        }
        Ok(fetched)
    }

    /// Same as `fetch_historical_bus_times`, but reading days from a local archive.
    pub fn read_archived_bus_times<R: Read + Seek>(
        &self,
        archive: &mut HistoricalArchive<R>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Fetched> {
        let mut fetched = Fetched::default();
        for date in db4iot::days(from, to, chrono::Utc::now().date_naive())? {
            let (raw, records) = archive.read_day(date)?;
            fetched.push(raw, &Db4iotAdapter::new(&records))?;
        }
        Ok(fetched)
    }

    /// Live positions plus one day of history. History is best effort: it is
    /// skipped when unconfigured or already saved, and a failed fetch keeps the
    /// live positions.
    pub async fn fetch_with_history(&self, routes: &[u32], day: NaiveDate) -> Result<Fetched> {
        let mut fetched = self.fetch_latest_bus_times(routes).await?;

        if self.db4iot.is_none() {
            warn!("skipping history: no db4iot URL configured");
        } else if store::history_saved(&self.store, day).await {
            info!(%day, "history already saved");
        } else {
            match self.fetch_historical_bus_times(day, day, None).await {
                Ok(history) => fetched.extend(history),
                Err(err) => warn!(%day, "history failed, keeping live positions: {err:#}"),
            }
        }
        Ok(fetched)
    }

    /// Fetches live positions and yesterday's history, then preps and saves them.
    pub async fn run(
        &self,
        routes: &[u32],
        day: NaiveDate,
        snapshot: Option<&Path>,
    ) -> Result<SaveReport> {
        let fetched = self.fetch_with_history(routes, day).await?;
        self.load(fetched, snapshot).await
    }

    /// Preps positions, continuing each vehicle's motion from its last stored fix.
    pub async fn prep_data(
        &self,
        positions: Vec<VehiclePosition>,
    ) -> Result<(Vec<PreppedPosition>, PrepStats)> {
        let last = self.db.last_fixes().await?;
        Ok(prep::prep_data_after(positions, &last))
    }

    /// Raw bodies go to the object store first, so they survive a failed database write.
    /// Historical days are marked as saved only after their rows are in.
    pub async fn save(&self, raw: &[RawBatch], prepped: &[PreppedPosition]) -> Result<SaveReport> {
        let mut raw_keys = Vec::with_capacity(raw.len());
        for batch in raw {
            raw_keys.push(store::save_raw(&self.store, batch).await?);
        }

        if prepped.is_empty() {
            warn!("nothing to insert");
        }
        let inserted = self.db.insert_positions(prepped).await?;

        for (batch, key) in raw.iter().zip(&raw_keys) {
            if batch.source != Source::Db4iot {
                continue;
            }
            if let Ok(day) = batch.label.parse::<NaiveDate>() {
                self.store
                    .put(&store::history_marker(day), key.clone().into_bytes())
                    .await
                    .with_context(|| format!("marking {day} as saved"))?;
            }
        }

        Ok(SaveReport { raw_keys, inserted })
    }

    /// Preps and saves a fetch, writing the prepped batch to `snapshot` first when given.
    pub async fn load(&self, fetched: Fetched, snapshot: Option<&Path>) -> Result<SaveReport> {
        let Fetched { raw, positions } = fetched;
        info!(raw = raw.len(), positions = positions.len(), "fetched");
        let (prepped, stats) = self.prep_data(positions).await?;

        let batch = PreppedBatch::new(prepped);
        if let Some(path) = snapshot {
            batch
                .save(path)
                .with_context(|| format!("writing snapshot {path:?}"))?;
            info!(?path, "wrote snapshot");
        }

        let report = self.save(&raw, &batch.positions).await?;
        info!(
            raw = report.raw_keys.len(),
            prepped = stats.output,
            inserted = report.inserted,
            total = self.db.count().await?,
            "Done"
        );
        Ok(report)
    }

    /// Inserts a snapshot written by `load`. Returns how many rows were new.
    pub async fn replay(&self, path: &Path) -> Result<u64> {
        let batch =
            PreppedBatch::load(path).with_context(|| format!("loading snapshot {path:?}"))?;
        info!(created_at = %batch.created_at, positions = batch.positions.len(), "replaying snapshot");
        self.db.insert_positions(&batch.positions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db4iot::records, store::LocalStore, testing, trimet::vehicles};
    use axum::{Router, routing::get};
    use chrono::DateTime;
    use std::{
        io::{Cursor, Write},
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use zip::{ZipWriter, write::SimpleFileOptions};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn live() -> Router {
        Router::new().route("/ws/v2/vehicles", get(|| async { vehicles::SAMPLE }))
    }

    async fn loader_for(router: Router, dir: &Path) -> DataLoader<LocalStore> {
        let base = testing::spawn(router).await;
        let http = reqwest::Client::new();

        DataLoader::new(
            Some(TriMetClient::new(http.clone(), format!("{base}/ws/v2"), "key")),
            Some(Db4iotClient::new(http, format!("{base}/history"))),
            LocalStore::new(dir),
            Database::in_memory().await.unwrap(),
        )
    }

    async fn loader(dir: &Path) -> DataLoader<LocalStore> {
        let router = live().route("/history/vehicles", get(|| async { records::SAMPLE }));
        loader_for(router, dir).await
    }

    #[tokio::test]
    async fn latest_and_history_end_up_in_storage() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path()).await;

        let mut fetched = loader.fetch_latest_bus_times(&[]).await.unwrap();
        assert_eq!(fetched.positions.len(), 1);
        fetched.extend(
            loader
                .fetch_historical_bus_times(date(2016, 8, 17), date(2016, 8, 17), None)
                .await
                .unwrap(),
        );
        assert_eq!(fetched.raw.len(), 2);
        assert_eq!(fetched.positions.len(), 4);

        let (prepped, stats) = loader.prep_data(fetched.positions).await.unwrap();
        assert_eq!(stats.invalid, 1);
        assert_eq!(prepped.len(), 3);

        let report = loader.save(&fetched.raw, &prepped).await.unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.raw_keys.len(), 2);
        assert!(report.raw_keys[0].starts_with("raw/trimet/"));
        assert!(report.raw_keys[1].starts_with("raw/db4iot/"));
        for key in &report.raw_keys {
            assert!(dir.path().join(key).is_file());
        }
        assert!(store::history_saved(&loader.store, date(2016, 8, 17)).await);

        let again = loader.save(&[], &prepped).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(loader.db.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn prep_continues_from_stored_fixes() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path()).await;

        let live = loader.fetch_latest_bus_times(&[]).await.unwrap();
        loader.load(live, None).await.unwrap();

        // stored fix for 3001 is at 1_471_449_590
        let at = DateTime::from_timestamp(1_471_449_650, 0).unwrap();
        let next = VehiclePosition::new(Source::Db4iot, "3001", 45.5051, -122.6141, at);
        let (prepped, _) = loader.prep_data(vec![next]).await.unwrap();
        assert_eq!(prepped[0].seconds_since_prev, Some(60));
        assert!(prepped[0].speed_m_s.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn unconfigured_clients_fail_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let loader = DataLoader::new(
            None,
            None,
            LocalStore::new(dir.path()),
            Database::in_memory().await.unwrap(),
        );

        assert!(loader.fetch_latest_bus_times(&[]).await.is_err());
        assert!(
            loader
                .fetch_historical_bus_times(date(2016, 8, 17), date(2016, 8, 17), None)
                .await
                .is_err()
        );
        assert!(loader.run(&[], date(2016, 8, 17), None).await.is_err());
    }

    #[tokio::test]
    async fn run_without_history_url_saves_live_positions() {
        let dir = tempfile::tempdir().unwrap();
        let base = testing::spawn(live()).await;
        let loader = DataLoader::new(
            Some(TriMetClient::new(reqwest::Client::new(), format!("{base}/ws/v2"), "key")),
            None,
            LocalStore::new(dir.path()),
            Database::in_memory().await.unwrap(),
        );

        let report = loader.run(&[], date(2016, 8, 17), None).await.unwrap();
        assert_eq!(report.raw_keys.len(), 1);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn failed_history_keeps_live_positions() {
        let dir = tempfile::tempdir().unwrap();
        // no history route, so the db4iot request gets a 404
        let loader = loader_for(live(), dir.path()).await;

        let report = loader.run(&[], date(2016, 8, 17), None).await.unwrap();
        assert_eq!(report.raw_keys.len(), 1);
        assert!(report.raw_keys[0].starts_with("raw/trimet/"));
        assert_eq!(report.inserted, 1);
        assert!(!store::history_saved(&loader.store, date(2016, 8, 17)).await);
    }

    #[tokio::test]
    async fn saved_history_is_not_fetched_again() {
        let dir = tempfile::tempdir().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = live().route(
            "/history/vehicles",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { records::SAMPLE }
            }),
        );
        let loader = loader_for(router, dir.path()).await;

        let first = loader.run(&[], date(2016, 8, 17), None).await.unwrap();
        assert_eq!(first.raw_keys.len(), 2);
        assert_eq!(first.inserted, 3);

        let second = loader.run(&[], date(2016, 8, 17), None).await.unwrap();
        assert_eq!(second.raw_keys.len(), 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn filtered_history_is_not_marked_saved() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path()).await;

        let fetched = loader
            .fetch_historical_bus_times(date(2016, 8, 17), date(2016, 8, 17), Some(4))
            .await
            .unwrap();
        loader.load(fetched, None).await.unwrap();
        assert!(!store::history_saved(&loader.store, date(2016, 8, 17)).await);
    }

    #[tokio::test]
    async fn snapshot_replays_into_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.postcard");
        let loader = loader(dir.path()).await;

        let fetched = loader.fetch_latest_bus_times(&[]).await.unwrap();
        let report = loader.load(fetched, Some(&path)).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert!(path.is_file());

        let fresh = DataLoader::new(
            None,
            None,
            LocalStore::new(dir.path()),
            Database::in_memory().await.unwrap(),
        );
        assert_eq!(fresh.replay(&path).await.unwrap(), 1);
        assert_eq!(fresh.replay(&path).await.unwrap(), 0);

        let latest = fresh.db.latest_positions().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].vehicle_id, "3001");
        assert_eq!(latest[0].source, "trimet");
    }

    #[tokio::test]
    async fn reads_history_from_archive() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("2016-08-17.json", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(records::SAMPLE.as_bytes()).unwrap();
        let mut cursor = zip.finish().unwrap();
        cursor.set_position(0);
        let mut archive = HistoricalArchive::from_reader(cursor).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path()).await;
        let fetched = loader
            .read_archived_bus_times(&mut archive, date(2016, 8, 17), date(2016, 8, 17))
            .unwrap();
        assert_eq!(fetched.raw[0].source, Source::Db4iot);
        assert_eq!(fetched.positions.len(), 3);

        assert!(
            loader
                .read_archived_bus_times(&mut archive, date(2016, 8, 17), date(2016, 8, 18))
                .is_err()
        );
    }
}
