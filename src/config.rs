use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::{
    store::{HttpStore, LocalStore, RawStore},
    trimet,
};

#[derive(Parser, Debug)]
#[command(version, about = "Loads TriMet bus positions into storage and a database")]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// TriMet developer app ID
    #[arg(long, env = "TRIMET_APP_ID", hide_env_values = true, global = true)]
    pub trimet_app_id: Option<String>,

    #[arg(long, env = "TRIMET_URL", default_value = trimet::DEFAULT_BASE_URL, global = true)]
    pub trimet_url: String,

    /// Base URL of the db4iot historical API
    #[arg(long, env = "DB4IOT_URL", global = true)]
    pub db4iot_url: Option<String>,

    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://bustimes.db",
        global = true
    )]
    pub database_url: String,

    /// Directory for raw responses, used unless --raw-url is given
    #[arg(long, env = "RAW_DIR", default_value = "data", global = true)]
    pub raw_dir: PathBuf,

    /// Object store base URL; raw responses are PUT under it
    #[arg(long, env = "RAW_STORE_URL", global = true)]
    pub raw_url: Option<String>,

    #[arg(long, env = "RAW_STORE_TOKEN", hide_env_values = true, global = true)]
    pub raw_token: Option<String>,

    /// Also write each prepped batch to this postcard file
    #[arg(long, global = true)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch live positions, prep and save them
    Latest {
        #[arg(long, value_delimiter = ',')]
        routes: Vec<u32>,
    },
    /// Fetch historical positions (from 2016-08-17 on), prep and save them
    Historical {
        #[arg(long)]
        from: NaiveDate,
        /// Defaults to --from
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        route: Option<u32>,
        /// Read days from a zip of YYYY-MM-DD.json dumps instead of the API
        #[arg(long)]
        archive: Option<PathBuf>,
    },
    /// Live positions plus yesterday's history, prepped together
    Run {
        #[arg(long, value_delimiter = ',')]
        routes: Vec<u32>,
    },
    /// Insert a previously written snapshot into the database
    Replay { path: PathBuf },
    /// Serve the latest position of each vehicle as GeoJSON
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
    },
}

impl Config {
    pub fn trimet_app_id(&self) -> Result<&str> {
        self.trimet_app_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .context("no TriMet app ID: set TRIMET_APP_ID or pass --trimet-app-id")
    }

    pub fn db4iot_url(&self) -> Result<&str> {
        self.db4iot_url
            .as_deref()
            .context("no historical API: set DB4IOT_URL or pass --db4iot-url")
    }

    pub fn raw_store(&self, http: reqwest::Client) -> RawStore {
        match &self.raw_url {
            Some(url) => RawStore::Http(HttpStore::new(http, url, self.raw_token.clone())),
            None => RawStore::Local(LocalStore::new(&self.raw_dir)),
        }
    }
}
