use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{Read, Seek},
    path::Path,
};
use zip::ZipArchive;

use crate::{
    db4iot::{Record, parse_records},
    position::{RawBatch, Source},
};

/// A zip of daily dumps, one `YYYY-MM-DD.json` entry per day. Other entries are ignored.
pub struct HistoricalArchive<R> {
    archive: ZipArchive<R>,
    days: BTreeMap<NaiveDate, usize>,
}

impl HistoricalArchive<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file =
            File::open(&path).with_context(|| format!("opening {:?}", path.as_ref()))?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> HistoricalArchive<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut days = BTreeMap::new();

        for i in 0..archive.len() {
            let name = archive.by_index(i)?.name().to_owned();
            let lower = name.to_ascii_lowercase();
            let Some(stem) = lower.rsplit('/').next().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") else {
                continue;
            };
            if let Some(prev) = days.insert(date, i) {
                bail!(
                    "archive has two entries for {date}: {} and {}",
                    archive.name_for_index(prev).unwrap_or("?"),
                    name
                );
            }
        }

        Ok(Self { archive, days })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.keys().copied()
    }

    pub fn read_day(&mut self, date: NaiveDate) -> Result<(RawBatch, Vec<Record>)> {
        let idx = *self
            .days
            .get(&date)
            .with_context(|| format!("archive has no entry for {date}"))?;
        let mut file = self.archive.by_index(idx)?;
        let mut body = Vec::new();
        file.read_to_end(&mut body)
            .with_context(|| format!("reading {}", file.name()))?;

        let records = parse_records(&body).with_context(|| format!("history for {date}"))?;
        Ok((
            RawBatch::new(Source::Db4iot, date.to_string(), body),
            records,
        ))
    }
}
