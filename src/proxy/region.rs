//! Best-effort region inference
//!
//! Regions come from an ordered keyword table matched against the node's
//! host name. This is a heuristic: a host called `jp-relay` may well sit in
//! Frankfurt. IP-literal hosts skip the table (hex groups such as `de1` or
//! `ca` would otherwise match) and are placed by the MaxMind database's
//! continent code when one is configured.

use crate::Result;
use maxminddb::{geoip2, Reader};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

pub const UNKNOWN_REGION: &str = "unknown";

/// Region → keywords, checked in order; the first region with a matching
/// keyword wins
const REGION_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "asia",
        &[
            "jp", "japan", "tokyo", "osaka", "hk", "hkg", "hongkong", "hong-kong", "sg", "sgp",
            "singapore", "kr", "korea", "seoul", "tw", "taiwan", "taipei", "india", "mumbai",
            "bangkok", "vietnam", "asia",
        ],
    ),
    (
        "europe",
        &[
            "de", "germany", "frankfurt", "fra", "nl", "netherlands", "amsterdam", "ams", "uk",
            "gb", "london", "fr", "france", "paris", "se", "sweden", "stockholm", "fi",
            "finland", "helsinki", "pl", "poland", "warsaw", "ru", "russia", "moscow", "ch",
            "zurich", "it", "italy", "milan", "es", "spain", "madrid", "eu", "europe",
        ],
    ),
    (
        "north_america",
        &[
            "us", "usa", "america", "newyork", "nyc", "losangeles", "lax", "sanjose", "sjc",
            "seattle", "chicago", "dallas", "miami", "ca", "canada", "toronto", "montreal",
            "vancouver",
        ],
    ),
    (
        "south_america",
        &["br", "brazil", "saopaulo", "ar", "argentina", "cl", "chile"],
    ),
    (
        "oceania",
        &["au", "australia", "sydney", "melbourne", "nz", "newzealand"],
    ),
    (
        "africa",
        &["za", "southafrica", "johannesburg", "eg", "egypt", "ng", "nigeria"],
    ),
];

/// Compiled table; a keyword must not be glued to other letters
/// (`jp01` matches `jp`, `jpeg` does not)
static REGION_TABLE: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    REGION_KEYWORDS
        .iter()
        .map(|(region, keywords)| {
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = format!(r"(?i)(?:^|[^a-z])(?:{})(?:[^a-z]|$)", alternation);
            (*region, Regex::new(&pattern).expect("Invalid region pattern"))
        })
        .collect()
});

/// Keyword-table lookup only; IP literals are never matched against it
pub fn infer_region(host: &str) -> &'static str {
    if host.parse::<IpAddr>().is_ok() {
        return UNKNOWN_REGION;
    }

    REGION_TABLE
        .iter()
        .find(|(_, re)| re.is_match(host))
        .map(|(region, _)| *region)
        .unwrap_or(UNKNOWN_REGION)
}

fn region_for_continent(code: &str) -> Option<&'static str> {
    match code {
        "AS" => Some("asia"),
        "EU" => Some("europe"),
        "NA" => Some("north_america"),
        "SA" => Some("south_america"),
        "OC" => Some("oceania"),
        "AF" => Some("africa"),
        _ => None,
    }
}

/// Continent lookups in an MMDB (GeoLite2/GeoIP2 City or Country) database
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Two-letter continent code for an address, if the database knows it
    pub fn continent_code(&self, ip: IpAddr) -> Result<Option<String>> {
        let lookup_result = self.reader.lookup(ip)?;
        let city: Option<geoip2::City> = lookup_result.decode()?;
        Ok(city.and_then(|city| city.continent.code.map(String::from)))
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

/// Region inference with an optional GeoIP fallback
#[derive(Clone, Default)]
pub struct RegionResolver {
    geo: Option<GeoLocator>,
}

impl RegionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geo(geo: GeoLocator) -> Self {
        Self { geo: Some(geo) }
    }

    pub fn resolve(&self, host: &str) -> String {
        let Ok(ip) = host.parse::<IpAddr>() else {
            return infer_region(host).to_string();
        };

        self.geo
            .as_ref()
            .and_then(|geo| geo.continent_code(ip).ok().flatten())
            .and_then(|code| region_for_continent(&code))
            .unwrap_or(UNKNOWN_REGION)
            .to_string()
    }
}
