//! City/ZIP lookup table.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use hashbrown::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::normalize::{normalize_zip, to_state_abbr_upper};

/// A `(city, state)` bucket: lower-case city, upper-case state code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CityKey {
    pub city: String,
    pub state: String,
}

impl CityKey {
    pub fn new(city: &str, state: &str) -> Self {
        Self {
            city: city.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
            state: to_state_abbr_upper(state),
        }
    }

    /// `"city,ST"` form
    pub fn key(&self) -> String {
        format!("{},{}", self.city, self.state)
    }
}

/// Read-only ZIP → city lookup handed to the grouping pass.
pub trait CityZipTable: Send + Sync {
    /// Every bucket containing `zip`, in table order.
    fn cities_for_zip(&self, zip: &str) -> Vec<CityKey>;
}

/// In-memory table loaded from the
/// `state_fips,state_name,state_abbr,zipcode,county,city` CSV export.
///
/// Loading happens once per value; callers share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct CsvCityZipTable {
    cities: HashSet<CityKey>,
    by_zip: HashMap<String, Vec<CityKey>>,
}

const STATE_ABBR_COL: usize = 2;
const ZIP_COL: usize = 3;
const CITY_COL: usize = 5;

impl CsvCityZipTable {
    /// Load from disk, decompressing when the path ends in `.gz`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading city/ZIP table from {:?}", path);

        let file = File::open(path)
            .with_context(|| format!("Failed to open city table {:?}", path))?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let table = Self::from_reader(reader)
            .with_context(|| format!("Failed to parse city table {:?}", path))?;
        info!(
            "Loaded {} city buckets covering {} ZIPs",
            table.cities.len(),
            table.by_zip.len()
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = Self::default();
        let mut skipped = 0usize;

        for (line, record) in csv_reader.records().enumerate() {
            let record = record.context("Malformed CSV record")?;
            let (Some(state), Some(zip), Some(city)) =
                (record.get(STATE_ABBR_COL), record.get(ZIP_COL), record.get(CITY_COL))
            else {
                skipped += 1;
                continue;
            };

            if !table.insert(city, state, zip) {
                debug!("Skipping city table row {}: {:?}", line + 2, record);
                skipped += 1;
            }
        }

        if skipped > 0 {
            warn!("Skipped {} unusable city table rows", skipped);
        }
        Ok(table)
    }

    /// Build from `(city, state, zip)` triples.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    {
        let mut table = Self::default();
        for (city, state, zip) in entries {
            table.insert(city, state, zip);
        }
        table
    }

    /// Add one row. Returns false when the row has no city, state or ZIP.
    pub fn insert(&mut self, city: &str, state: &str, zip: &str) -> bool {
        let zip = normalize_zip(zip);
        let key = CityKey::new(city, state);
        if zip.is_empty() || key.city.is_empty() || key.state.is_empty() {
            return false;
        }

        self.cities.insert(key.clone());
        let cities = self.by_zip.entry(zip).or_default();
        if !cities.contains(&key) {
            cities.push(key);
        }
        true
    }

    /// Number of distinct city buckets
    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

impl CityZipTable for CsvCityZipTable {
    fn cities_for_zip(&self, zip: &str) -> Vec<CityKey> {
        self.by_zip.get(zip).cloned().unwrap_or_default()
    }
}
