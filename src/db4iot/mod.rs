use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use crate::position::{RawBatch, Source};

pub mod archive;
pub mod records;

pub use archive::HistoricalArchive;
pub use records::{Record, parse_records};

/// First day the historical feed has data for.
pub const HISTORY_START: NaiveDate = match NaiveDate::from_ymd_opt(2016, 8, 17) {
    Some(d) => d,
    None => panic!("invalid history start"),
};

pub fn check_date(date: NaiveDate, today: NaiveDate) -> Result<()> {
    if date < HISTORY_START {
        bail!("no historical data before {HISTORY_START}: requested {date}");
    }
    if date > today {
        bail!("historical date {date} is in the future");
    }
    Ok(())
}

/// Every day in `from..=to`, after validating both ends.
pub fn days(from: NaiveDate, to: NaiveDate, today: NaiveDate) -> Result<Vec<NaiveDate>> {
    if from > to {
        bail!("date range is backwards: {from} > {to}");
    }
    check_date(from, today)?;
    check_date(to, today)?;
    Ok(from.iter_days().take_while(|d| *d <= to).collect())
}

pub struct Db4iotClient {
    http: reqwest::Client,
    base_url: String,
}

impl Db4iotClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    pub async fn fetch_day(
        &self,
        date: NaiveDate,
        route: Option<u32>,
    ) -> Result<(RawBatch, Vec<Record>)> {
        check_date(date, Utc::now().date_naive())?;

        let url = format!("{}/vehicles", self.base_url);
        let mut query = vec![("date", date.format("%Y-%m-%d").to_string())];
        if let Some(route) = route {
            query.push(("route", route.to_string()));
        }

        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("requesting {url} for {date}"))?;
        resp.error_for_status_ref()
            .with_context(|| format!("fetching {url} for {date}"))?;
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("reading body of {url}"))?
            .to_vec();

        let records = parse_records(&body).with_context(|| format!("history for {date}"))?;
        debug!(%date, records = records.len(), "db4iot day");

        // a filtered day is not the whole day, so it must not read back as a plain date
        let label = match route {
            Some(route) => format!("{date}-route{route}"),
            None => date.to_string(),
        };
        Ok((RawBatch::new(Source::Db4iot, label, body), records))
    }

    /// Fetches each day in `from..=to` in order, one request per day.
    pub async fn fetch_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        route: Option<u32>,
    ) -> Result<Vec<(RawBatch, Vec<Record>)>> {
        let days = days(from, to, Utc::now().date_naive())?;
        info!(%from, %to, days = days.len(), "fetching history");

        let mut out = Vec::with_capacity(days.len());
        for date in days {
            out.push(self.fetch_day(date, route).await?);
        }
        Ok(out)
    }
}
