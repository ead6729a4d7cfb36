//! Optional city grouping pass for metro searches.

mod metro;
mod table;

pub use metro::{
    group_zips_by_city, CityGrouping, MetroRules, DEFAULT_METRO_MIN_ZIPS, MAJOR_METRO_CITIES,
};
pub use table::{CityKey, CityZipTable, CsvCityZipTable};
