//! ZIP and place-name normalization.

use serde_json::{Map, Value};

/// Property keys that carry a ZIP in the various ZCTA sources, in lookup order.
pub const ZCTA_PROP_KEYS: [&str; 7] = [
    "ZCTA5CE10",
    "ZCTA5CE20",
    "ZCTA5",
    "GEOID10",
    "GEOID",
    "ZIP",
    "zip",
];

const STATE_NAME_TO_ABBR: [(&str, &str); 51] = [
    ("alabama", "AL"),
    ("alaska", "AK"),
    ("arizona", "AZ"),
    ("arkansas", "AR"),
    ("california", "CA"),
    ("colorado", "CO"),
    ("connecticut", "CT"),
    ("delaware", "DE"),
    ("florida", "FL"),
    ("georgia", "GA"),
    ("hawaii", "HI"),
    ("idaho", "ID"),
    ("illinois", "IL"),
    ("indiana", "IN"),
    ("iowa", "IA"),
    ("kansas", "KS"),
    ("kentucky", "KY"),
    ("louisiana", "LA"),
    ("maine", "ME"),
    ("maryland", "MD"),
    ("massachusetts", "MA"),
    ("michigan", "MI"),
    ("minnesota", "MN"),
    ("mississippi", "MS"),
    ("missouri", "MO"),
    ("montana", "MT"),
    ("nebraska", "NE"),
    ("nevada", "NV"),
    ("new hampshire", "NH"),
    ("new jersey", "NJ"),
    ("new mexico", "NM"),
    ("new york", "NY"),
    ("north carolina", "NC"),
    ("north dakota", "ND"),
    ("ohio", "OH"),
    ("oklahoma", "OK"),
    ("oregon", "OR"),
    ("pennsylvania", "PA"),
    ("rhode island", "RI"),
    ("south carolina", "SC"),
    ("south dakota", "SD"),
    ("tennessee", "TN"),
    ("texas", "TX"),
    ("utah", "UT"),
    ("vermont", "VT"),
    ("virginia", "VA"),
    ("washington", "WA"),
    ("west virginia", "WV"),
    ("wisconsin", "WI"),
    ("wyoming", "WY"),
    ("district of columbia", "DC"),
];

/// Normalize a raw ZIP string to exactly five digits.
///
/// Non-digits are stripped, short values are left-padded with `0` and long
/// values truncated. Returns an empty string when no digits remain.
pub fn normalize_zip(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    format!("{:0>5}", digits).chars().take(5).collect()
}

/// Look up a ZIP in feature properties using [`ZCTA_PROP_KEYS`].
///
/// The first key whose value normalizes to a non-empty ZIP wins.
pub fn zip_from_properties(props: &Map<String, Value>) -> String {
    for key in ZCTA_PROP_KEYS {
        let raw = match props.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        let zip = normalize_zip(&raw);
        if !zip.is_empty() {
            return zip;
        }
    }
    String::new()
}

/// Convert a state name or abbreviation to an upper-case two-letter code.
pub fn to_state_abbr_upper(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.len() == 2 {
        return trimmed.to_uppercase();
    }
    let lowered = trimmed.to_lowercase();
    STATE_NAME_TO_ABBR
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, abbr)| abbr.to_string())
        .unwrap_or_else(|| trimmed.chars().take(2).collect::<String>().to_uppercase())
}

/// Title-case a city name: `"SAN  antonio"` becomes `"San Antonio"`.
pub fn proper_capitalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
