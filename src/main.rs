mod adapters;
mod config;
mod db;
mod db4iot;
mod loader;
mod position;
mod prep;
mod server;
mod snapshot;
mod store;
#[cfg(test)]
mod testing;
mod trimet;

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{Cli, Command, Config},
    db::Database,
    db4iot::{Db4iotClient, HistoricalArchive},
    loader::DataLoader,
    store::RawStore,
    trimet::TriMetClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Cli { config, command } = Cli::parse();
    let db = Database::connect(&config.database_url).await?;

    match command {
        Command::Serve { addr } => server::serve(db, addr).await,
        Command::Replay { path } => {
            let inserted = build_loader(&config, db)?.replay(&path).await?;
            info!(inserted, "replayed snapshot");
            Ok(())
        }
        Command::Latest { routes } => {
            config.trimet_app_id()?;
            let loader = build_loader(&config, db)?;
            let fetched = loader.fetch_latest_bus_times(&routes).await?;
            loader.load(fetched, config.snapshot.as_deref()).await?;
            Ok(())
        }
        Command::Historical {
            from,
            to,
            route,
            archive,
        } => {
            let to = to.unwrap_or(from);
            let loader = build_loader(&config, db)?;
            let fetched = match archive {
                Some(path) => {
                    if route.is_some() {
                        warn!("--route is ignored when reading an archive");
                    }
                    let mut archive = HistoricalArchive::open(&path)?;
                    info!(?path, days = archive.days().count(), "opened archive");
                    loader.read_archived_bus_times(&mut archive, from, to)?
                }
                None => {
                    config.db4iot_url()?;
                    loader.fetch_historical_bus_times(from, to, route).await?
                }
            };
            loader.load(fetched, config.snapshot.as_deref()).await?;
            Ok(())
        }
        Command::Run { routes } => {
            config.trimet_app_id()?;
            let loader = build_loader(&config, db)?;
            let yesterday = Utc::now().date_naive() - TimeDelta::days(1);
            loader
                .run(&routes, yesterday, config.snapshot.as_deref())
                .await?;
            Ok(())
        }
    }
}

fn build_loader(config: &Config, db: Database) -> anyhow::Result<DataLoader<RawStore>> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("bustimes/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(60))
        .build()?;

    let trimet = config
        .trimet_app_id()
        .ok()
        .map(|id| TriMetClient::new(http.clone(), &config.trimet_url, id));
    let db4iot = config
        .db4iot_url()
        .ok()
        .map(|url| Db4iotClient::new(http.clone(), url));

    Ok(DataLoader::new(trimet, db4iot, config.raw_store(http), db))
}
