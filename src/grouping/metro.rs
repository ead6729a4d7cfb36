//! Metro city grouping: split a large metro result into the main city and
//! its suburbs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::table::{CityKey, CityZipTable};
use crate::normalize::proper_capitalize;

/// Cities whose searches are large enough to be worth regrouping.
pub const MAJOR_METRO_CITIES: &[&str] = &[
    "new york",
    "los angeles",
    "chicago",
    "dallas",
    "houston",
    "washington",
    "philadelphia",
    "miami",
    "atlanta",
    "phoenix",
    "boston",
    "san francisco",
    "detroit",
    "riverside",
    "minneapolis",
    "san diego",
    "tampa",
    "denver",
    "baltimore",
    "st. louis",
    "kansas city",
    "las vegas",
    "cleveland",
    "pittsburgh",
    "portland",
    "cincinnati",
    "sacramento",
    "orlando",
    "san antonio",
    "indianapolis",
    "columbus",
    "charlotte",
    "virginia beach",
    "milwaukee",
    "providence",
    "jacksonville",
    "memphis",
    "oklahoma city",
    "louisville",
    "richmond",
    "new orleans",
    "raleigh",
    "salt lake city",
    "buffalo",
    "rochester",
    "birmingham",
    "tucson",
    "fresno",
    "tulsa",
    "urban honolulu",
    "saint paul",
    "saint louis",
    "saint petersburg",
    "fort worth",
    "fort lauderdale",
    "long beach",
    "oakland",
    "mesa",
    "colorado springs",
    "omaha",
    "albuquerque",
    "nashville",
    "seattle",
    "austin",
    "el paso",
    "bakersfield",
];

/// A metro search is regrouped only above this many ZIPs.
pub const DEFAULT_METRO_MIN_ZIPS: usize = 20;

/// When to regroup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetroRules {
    /// Regroup when the ZIP count is strictly greater than this
    pub min_zips: usize,
    /// Additional metro names, matched case-insensitively
    pub extra_metros: Vec<String>,
}

impl Default for MetroRules {
    fn default() -> Self {
        Self {
            min_zips: DEFAULT_METRO_MIN_ZIPS,
            extra_metros: Vec::new(),
        }
    }
}

impl MetroRules {
    pub fn is_major_metro(&self, city: &str) -> bool {
        let city = city.trim().to_lowercase();
        MAJOR_METRO_CITIES.contains(&city.as_str())
            || self.extra_metros.iter().any(|m| m.trim().to_lowercase() == city)
    }

    pub fn should_group(&self, city: &str, zip_count: usize) -> bool {
        self.is_major_metro(city) && zip_count > self.min_zips
    }
}

/// ZIPs attributed to the searched city and its suburbs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityGrouping {
    pub main_city: String,
    /// Whether the metro split ran
    pub grouped: bool,
    pub main_city_zips: Vec<String>,
    pub suburban_cities: BTreeMap<String, Vec<String>>,
}

fn sorted_unique(mut zips: Vec<String>) -> Vec<String> {
    zips.sort();
    zips.dedup();
    zips
}

/// Whether `bucket` is the searched city. A search without a state matches
/// the city name in any state.
fn is_searched_city(bucket: &CityKey, searched: &CityKey) -> bool {
    bucket.city == searched.city && (searched.state.is_empty() || bucket.state == searched.state)
}

/// Pick the bucket a ZIP belongs to.
fn owning_bucket(buckets: Vec<CityKey>, searched: &CityKey) -> CityKey {
    if let Some(own) = buckets.iter().find(|b| is_searched_city(b, searched)) {
        return own.clone();
    }
    if let Some(same_state) = buckets.iter().find(|b| b.state == searched.state) {
        return same_state.clone();
    }
    buckets.into_iter().next().unwrap_or_else(|| searched.clone())
}

/// Display name of a suburb; a namesake of the searched city in another state
/// carries its state code.
fn suburb_name(bucket: &CityKey, searched: &CityKey) -> String {
    let name = proper_capitalize(&bucket.city);
    if bucket.city == searched.city {
        format!("{}, {}", name, bucket.state)
    } else {
        name
    }
}

/// Group `zips` by owning city.
///
/// Non-metro searches (or metro searches at or under the size threshold)
/// attribute every ZIP to the searched city.
pub fn group_zips_by_city(
    zips: &[String],
    city: &str,
    state: &str,
    table: &dyn CityZipTable,
    rules: &MetroRules,
) -> CityGrouping {
    let main_city = proper_capitalize(city);

    if !rules.should_group(city, zips.len()) {
        debug!("No grouping for {} ({} ZIPs)", main_city, zips.len());
        return CityGrouping {
            main_city,
            grouped: false,
            main_city_zips: sorted_unique(zips.to_vec()),
            suburban_cities: BTreeMap::new(),
        };
    }

    let searched = CityKey::new(city, state);
    let mut main_city_zips = Vec::new();
    let mut suburban_cities: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for zip in zips {
        let bucket = owning_bucket(table.cities_for_zip(zip), &searched);
        debug!("ZIP {} -> {}", zip, bucket.key());
        if is_searched_city(&bucket, &searched) {
            main_city_zips.push(zip.clone());
        } else {
            suburban_cities
                .entry(suburb_name(&bucket, &searched))
                .or_default()
                .push(zip.clone());
        }
    }

    let suburban_cities: BTreeMap<String, Vec<String>> = suburban_cities
        .into_iter()
        .map(|(name, zips)| (name, sorted_unique(zips)))
        .collect();

    info!(
        "Grouped {} ZIPs for {}: {} main city, {} suburban cities",
        zips.len(),
        main_city,
        main_city_zips.len(),
        suburban_cities.len()
    );

    CityGrouping {
        main_city,
        grouped: true,
        main_city_zips: sorted_unique(main_city_zips),
        suburban_cities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::CsvCityZipTable;

    fn zip(n: usize) -> String {
        format!("{:05}", 80000 + n)
    }

    #[test]
    fn test_metro_split() {
        // 30 Denver ZIPs, 15 Aurora ZIPs, 5 unknown to the table
        let mut entries = Vec::new();
        let zips: Vec<String> = (0..50).map(zip).collect();
        for (i, z) in zips.iter().enumerate() {
            if i < 30 {
                entries.push(("Denver", "CO", z.as_str()));
            } else if i < 45 {
                entries.push(("Aurora", "CO", z.as_str()));
            }
        }
        let table = CsvCityZipTable::from_entries(entries);

        let rules = MetroRules::default();
        let grouping = group_zips_by_city(&zips, "Denver", "Colorado", &table, &rules);
        assert!(grouping.grouped);
        assert_eq!(grouping.main_city, "Denver");
        assert_eq!(grouping.main_city_zips.len(), 35);
        assert_eq!(grouping.suburban_cities.len(), 1);
        assert_eq!(grouping.suburban_cities["Aurora"].len(), 15);
        assert!(grouping.main_city_zips.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_non_metro_not_grouped() {
        let zips: Vec<String> = (0..8).rev().map(zip).collect();
        let table = CsvCityZipTable::from_entries(vec![("Longmont", "CO", "80001")]);
        let grouping = group_zips_by_city(&zips, "boulder", "CO", &table, &MetroRules::default());
        assert!(!grouping.grouped);
        assert_eq!(grouping.main_city, "Boulder");
        assert_eq!(grouping.main_city_zips.len(), 8);
        assert_eq!(grouping.main_city_zips[0], "80000");
        assert!(grouping.suburban_cities.is_empty());
    }

    #[test]
    fn test_small_metro_result_not_grouped() {
        let zips: Vec<String> = (0..20).map(zip).collect();
        let table = CsvCityZipTable::from_entries(vec![("Aurora", "CO", "80001")]);
        let grouping = group_zips_by_city(&zips, "Denver", "CO", &table, &MetroRules::default());
        assert!(!grouping.grouped);
        assert_eq!(grouping.main_city_zips.len(), 20);
    }

    #[test]
    fn test_ambiguous_zip_prefers_searched_city_then_state() {
        let table = CsvCityZipTable::from_entries(vec![
            ("Lakewood", "CO", "80001"),
            ("Denver", "CO", "80001"),
            ("Aurora", "IL", "80002"),
            ("Aurora", "CO", "80002"),
            ("Gary", "IN", "80003"),
            ("Joliet", "IL", "80003"),
        ]);
        let zips: Vec<String> = (1..=3).map(zip).collect();
        let rules = MetroRules {
            min_zips: 0,
            ..Default::default()
        };
        let grouping = group_zips_by_city(&zips, "Denver", "CO", &table, &rules);
        assert_eq!(grouping.main_city_zips, vec!["80001"]);
        assert_eq!(grouping.suburban_cities["Aurora"], vec!["80002"]);
        assert_eq!(grouping.suburban_cities["Gary"], vec!["80003"]);
    }

    #[test]
    fn test_same_name_city_in_other_state_is_suburb() {
        let table = CsvCityZipTable::from_entries(vec![
            ("Portland", "OR", "97201"),
            ("Portland", "ME", "04101"),
        ]);
        let zips = vec!["97201".to_string(), "04101".to_string(), "97299".to_string()];
        let rules = MetroRules {
            min_zips: 0,
            ..Default::default()
        };

        let grouping = group_zips_by_city(&zips, "Portland", "OR", &table, &rules);
        assert_eq!(grouping.main_city_zips, vec!["97201", "97299"]);
        assert_eq!(grouping.suburban_cities["Portland, ME"], vec!["04101"]);

        // Without a state the city name alone decides
        let grouping = group_zips_by_city(&zips, "Portland", "", &table, &rules);
        assert_eq!(grouping.main_city_zips.len(), 3);
        assert!(grouping.suburban_cities.is_empty());
    }

    #[test]
    fn test_extra_metros_and_case() {
        let rules = MetroRules {
            min_zips: 20,
            extra_metros: vec!["Boise".to_string()],
        };
        assert!(rules.is_major_metro("BOISE"));
        assert!(rules.is_major_metro("  Salt Lake City "));
        assert!(!rules.is_major_metro("Boulder"));
        assert!(rules.should_group("denver", 21));
        assert!(!rules.should_group("denver", 20));
    }
}
