//! GeoIP lookup using a MaxMind GeoLite2/GeoIP2 City MMDB
//!
//! The database is optional: without one, every lookup misses and click
//! events simply carry no geographic fields. A lookup miss is never an error.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

/// Best-effort geographic guess for a client IP.
#[derive(Debug, Clone)]
pub struct GeoData {
    pub country: String,
    pub country_code: String,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// Thread-safe geo lookup over a memory-mapped City database.
pub struct GeoIpService {
    city_reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    /// Open the City database at `city_path`, or build a no-op service when
    /// no path is configured.
    pub fn new(city_path: Option<&str>) -> Result<Self> {
        let city_reader = match city_path {
            Some(path) => {
                let reader = unsafe { Reader::open_mmap(path) }
                    .with_context(|| format!("failed to open GeoIP City database at {path}"))?;
                Some(Arc::new(reader))
            }
            None => None,
        };

        Ok(Self { city_reader })
    }

    pub fn is_enabled(&self) -> bool {
        self.city_reader.is_some()
    }

    /// Look up country/region/city for an IP. Returns `None` when no database
    /// is loaded, the IP is not in it, or the record carries no country.
    pub fn lookup(&self, ip: IpAddr) -> Option<GeoData> {
        let reader = self.city_reader.as_ref()?;
        let result = reader.lookup(ip).ok()?;
        let city = result.decode::<geoip2::City>().ok()??;

        let country_code = city.country.iso_code.map(|s| s.to_string())?;
        let country = city
            .country
            .names
            .english
            .map(|s| s.to_string())
            .unwrap_or_else(|| country_code.clone());

        let region = city
            .subdivisions
            .first()
            .and_then(|s| s.names.english.map(|n| n.to_string()));
        let city_name = city.city.names.english.map(|s| s.to_string());

        Some(GeoData {
            country,
            country_code,
            region,
            city: city_name,
        })
    }
}

impl Clone for GeoIpService {
    fn clone(&self) -> Self {
        Self {
            city_reader: self.city_reader.clone(),
        }
    }
}
