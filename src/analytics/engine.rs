//! Incremental aggregation of click events
//!
//! Each click is folded into the per-short-code [`AggregateRecord`] right
//! after it is appended to the click log, so analytics reads never scan raw
//! events. The whole document is rewritten per click behind a version-guarded
//! conditional write; concurrent writers retry on conflict instead of
//! clobbering each other.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{Local, TimeZone, Timelike};

use crate::analytics::classifier::classify_referrer;
use crate::analytics::models::{
    AggregateRecord, ClickEvent, DeviceShareEntry, PeakHourEntry, TopLocationEntry,
};
use crate::models::Link;
use crate::storage::Storage;

/// Hour buckets retained in the peak-hours chart. One per hour of day, so the
/// bound only matters while the chart is still filling in.
pub const PEAK_HOURS_CAP: usize = 24;

/// Location entries retained in the top-locations chart. Entries that fall
/// off the bound lose their counts for good; the unbounded breakdown maps
/// stay exact.
pub const TOP_LOCATIONS_CAP: usize = 10;

/// Attempts before a conditional-write conflict is reported as an error.
const MAX_WRITE_ATTEMPTS: usize = 16;

pub struct AggregationEngine {
    storage: Arc<dyn Storage>,
}

impl AggregationEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Record one classified click: append it to the click log, then fold it
    /// into the aggregate document.
    ///
    /// The aggregate is created lazily on the first click, inheriting the
    /// link's creation time. Writes are conditional on the version read, so
    /// two concurrent clicks both land; the loser re-reads and reapplies.
    pub async fn record_click(&self, link: &Link, event: ClickEvent) -> Result<()> {
        let stored = self.storage.append_click(&event).await?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            // Recomputed per attempt: a concurrent append that commits its
            // aggregate between our read and write forces a retry, so the
            // winning write always carries a distinct-IP count at least as
            // fresh as every committed append.
            let unique_clicks = self.storage.unique_ips(&stored.short_code).await?.len() as u64;
            let now = chrono::Utc::now().timestamp();

            match self.storage.get_aggregate(&stored.short_code).await? {
                None => {
                    let empty = AggregateRecord::empty(&stored.short_code, link.created_at, now);
                    // Ignore the outcome: if another writer created the
                    // document first, the re-read below picks it up.
                    self.storage
                        .insert_aggregate(&stored.short_code, &empty)
                        .await?;
                }
                Some((current, version)) => {
                    let updated = apply(&current, &stored, unique_clicks, now);
                    if self
                        .storage
                        .update_aggregate(&stored.short_code, &updated, version)
                        .await?
                    {
                        return Ok(());
                    }

                    tracing::debug!(
                        short_code = %stored.short_code,
                        version,
                        "aggregate write conflict, retrying"
                    );
                }
            }
        }

        bail!(
            "aggregate write for '{}' still conflicting after {} attempts",
            stored.short_code,
            MAX_WRITE_ATTEMPTS
        );
    }
}

/// Fold one click event into an aggregate, returning the updated document.
///
/// Pure over its inputs; `unique_clicks` is the distinct-IP cardinality the
/// caller computed from the click log, and `now` stamps `lastUpdated`.
pub fn apply(
    current: &AggregateRecord,
    event: &ClickEvent,
    unique_clicks: u64,
    now: i64,
) -> AggregateRecord {
    let mut record = current.clone();

    let device_key = event.device.kind.as_str();
    // Category novelty is judged against the breakdown maps before they are
    // touched, so the distinct counters track map cardinality.
    let is_new_country = event
        .country
        .as_deref()
        .is_some_and(|c| !record.breakdowns.countries.contains_key(c));
    let is_new_device = !record.breakdowns.devices.contains_key(device_key);
    let is_new_browser = !record.breakdowns.browsers.contains_key(&event.browser.name);

    record.totals.clicks += 1;
    record.totals.unique_clicks = unique_clicks;
    if is_new_country {
        record.totals.countries += 1;
    }
    if is_new_device {
        record.totals.devices += 1;
    }
    if is_new_browser {
        record.totals.browsers += 1;
    }
    record.totals.last_updated = now;

    update_peak_hours(&mut record.charts.peak_hours, event.timestamp);
    update_top_locations(&mut record.charts.top_locations, event);
    update_device_breakdown(&mut record.charts.device_breakdown, device_key);

    let breakdowns = &mut record.breakdowns;
    if let Some(country) = &event.country {
        bump(&mut breakdowns.countries, country);
    }
    if let Some(region) = &event.region {
        bump(&mut breakdowns.regions, region);
    }
    if let Some(city) = &event.city {
        bump(&mut breakdowns.cities, city);
    }
    bump(&mut breakdowns.devices, device_key);
    bump(&mut breakdowns.browsers, &event.browser.name);
    bump(&mut breakdowns.operating_systems, &event.os.name);
    bump(
        &mut breakdowns.referrers,
        &classify_referrer(event.referer.as_deref()),
    );
    if let Some(source) = &event.utm_source {
        bump(&mut breakdowns.utm_sources, source);
    }
    if let Some(medium) = &event.utm_medium {
        bump(&mut breakdowns.utm_mediums, medium);
    }
    if let Some(campaign) = &event.utm_campaign {
        bump(&mut breakdowns.utm_campaigns, campaign);
    }

    record.last_click_at = Some(now);

    record
}

fn bump(map: &mut std::collections::HashMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

fn update_peak_hours(peak_hours: &mut Vec<PeakHourEntry>, timestamp: i64) {
    // Bucket by the server's local hour of day.
    let hour = Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.hour())
        .unwrap_or(0);
    let key = format!("{:02}:00", hour);

    match peak_hours.iter_mut().find(|entry| entry.hour == key) {
        Some(entry) => entry.clicks += 1,
        None => peak_hours.push(PeakHourEntry {
            hour: key,
            clicks: 1,
            label: format!("{}h", hour),
        }),
    }

    peak_hours.sort_by(|a, b| b.clicks.cmp(&a.clicks));
    peak_hours.truncate(PEAK_HOURS_CAP);
}

fn update_top_locations(top_locations: &mut Vec<TopLocationEntry>, event: &ClickEvent) {
    // A chartable location needs all three of city, region and country;
    // partial geo data still lands in the breakdown maps.
    let (Some(city), Some(region), Some(country)) = (&event.city, &event.region, &event.country)
    else {
        return;
    };

    let location = format!("{}, {}", city, region);
    match top_locations.iter_mut().find(|e| e.location == location) {
        Some(entry) => entry.clicks += 1,
        None => top_locations.push(TopLocationEntry {
            location,
            country: country.clone(),
            country_code: event.country_code.clone().unwrap_or_default(),
            clicks: 1,
            percentage: 0,
        }),
    }

    top_locations.sort_by(|a, b| b.clicks.cmp(&a.clicks));
    top_locations.truncate(TOP_LOCATIONS_CAP);

    // Percentages are relative to the retained entries, not to all clicks.
    let total: u64 = top_locations.iter().map(|e| e.clicks).sum();
    for entry in top_locations.iter_mut() {
        entry.percentage = percent(entry.clicks, total);
    }
}

fn update_device_breakdown(device_breakdown: &mut Vec<DeviceShareEntry>, device_key: &str) {
    match device_breakdown.iter_mut().find(|e| e.device == device_key) {
        Some(entry) => entry.clicks += 1,
        None => device_breakdown.push(DeviceShareEntry {
            device: device_key.to_string(),
            clicks: 1,
            percentage: 0,
        }),
    }

    // At most three categories, so no bound here.
    let total: u64 = device_breakdown.iter().map(|e| e.clicks).sum();
    for entry in device_breakdown.iter_mut() {
        entry.percentage = percent(entry.clicks, total);
    }
}

fn percent(clicks: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    ((clicks as f64 / total as f64) * 100.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::models::{BrowserInfo, DeviceInfo, DeviceType, OsInfo};

    fn event(short_code: &str) -> ClickEvent {
        ClickEvent {
            id: "evt-1".to_string(),
            short_code: short_code.to_string(),
            timestamp: 1_700_000_000,
            ip: "203.0.113.1".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            referer: None,
            device: DeviceInfo {
                kind: DeviceType::Desktop,
                is_mobile: false,
                is_tablet: false,
                is_desktop: true,
            },
            browser: BrowserInfo {
                name: "Chrome".to_string(),
                version: "120.0".to_string(),
                engine: "Blink".to_string(),
            },
            os: OsInfo {
                name: "Windows".to_string(),
                version: "10".to_string(),
                platform: "desktop".to_string(),
            },
            country: Some("Brazil".to_string()),
            country_code: Some("BR".to_string()),
            region: Some("Sao Paulo".to_string()),
            city: Some("Campinas".to_string()),
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            utm_term: None,
            utm_content: None,
        }
    }

    fn empty() -> AggregateRecord {
        AggregateRecord::empty("abc1234", 1_699_000_000, 1_700_000_000)
    }

    #[test]
    fn first_click_populates_totals_and_breakdowns() {
        let record = apply(&empty(), &event("abc1234"), 1, 1_700_000_100);

        assert_eq!(record.totals.clicks, 1);
        assert_eq!(record.totals.unique_clicks, 1);
        assert_eq!(record.totals.countries, 1);
        assert_eq!(record.totals.devices, 1);
        assert_eq!(record.totals.browsers, 1);
        assert_eq!(record.totals.last_updated, 1_700_000_100);
        assert_eq!(record.last_click_at, Some(1_700_000_100));

        assert_eq!(record.breakdowns.countries.get("Brazil"), Some(&1));
        assert_eq!(record.breakdowns.regions.get("Sao Paulo"), Some(&1));
        assert_eq!(record.breakdowns.cities.get("Campinas"), Some(&1));
        assert_eq!(record.breakdowns.devices.get("desktop"), Some(&1));
        assert_eq!(record.breakdowns.browsers.get("Chrome"), Some(&1));
        assert_eq!(record.breakdowns.operating_systems.get("Windows"), Some(&1));
        assert_eq!(record.breakdowns.referrers.get("Direct"), Some(&1));
    }

    #[test]
    fn distinct_counters_track_map_cardinality() {
        let mut record = empty();
        record = apply(&record, &event("abc1234"), 1, 1_700_000_100);

        // Same country, device and browser again: counters must not move.
        record = apply(&record, &event("abc1234"), 1, 1_700_000_200);
        assert_eq!(record.totals.countries, 1);
        assert_eq!(record.totals.devices, 1);
        assert_eq!(record.totals.browsers, 1);

        let mut other = event("abc1234");
        other.country = Some("Chile".to_string());
        other.browser.name = "Firefox".to_string();
        record = apply(&record, &other, 2, 1_700_000_300);
        assert_eq!(record.totals.countries, 2);
        assert_eq!(record.totals.browsers, 2);
        assert_eq!(record.totals.devices, 1);

        assert_eq!(
            record.totals.countries as usize,
            record.breakdowns.countries.len()
        );
        assert_eq!(
            record.totals.browsers as usize,
            record.breakdowns.browsers.len()
        );
    }

    #[test]
    fn unique_clicks_is_overwritten_not_accumulated() {
        let mut record = empty();
        record = apply(&record, &event("abc1234"), 1, 1_700_000_100);
        record = apply(&record, &event("abc1234"), 1, 1_700_000_200);
        assert_eq!(record.totals.clicks, 2);
        assert_eq!(record.totals.unique_clicks, 1);
    }

    #[test]
    fn peak_hours_increment_existing_bucket() {
        let mut record = empty();
        record = apply(&record, &event("abc1234"), 1, 1_700_000_100);
        record = apply(&record, &event("abc1234"), 1, 1_700_000_200);

        assert_eq!(record.charts.peak_hours.len(), 1);
        let entry = &record.charts.peak_hours[0];
        assert_eq!(entry.clicks, 2);
        assert!(entry.hour.ends_with(":00"));
        assert!(entry.label.ends_with('h'));
    }

    #[test]
    fn top_locations_stay_bounded_with_percentages() {
        let mut record = empty();

        for i in 0..15 {
            let mut e = event("abc1234");
            e.city = Some(format!("City {}", i));
            // Earlier cities get more clicks so the tail falls off the bound.
            for _ in 0..(15 - i) {
                record = apply(&record, &e, 1, 1_700_000_100);
            }
        }

        assert_eq!(record.charts.top_locations.len(), TOP_LOCATIONS_CAP);
        assert_eq!(record.charts.top_locations[0].location, "City 0, Sao Paulo");
        assert_eq!(record.charts.top_locations[0].clicks, 15);

        for entry in &record.charts.top_locations {
            assert!(entry.percentage <= 100);
        }

        // The breakdown maps keep every city, including the evicted ones.
        assert_eq!(record.breakdowns.cities.len(), 15);
        for entry in &record.charts.top_locations {
            let city = entry.location.split(',').next().unwrap();
            assert!(record.breakdowns.cities.contains_key(city));
        }
    }

    #[test]
    fn partial_geo_skips_chart_but_not_breakdowns() {
        let mut e = event("abc1234");
        e.region = None;
        let record = apply(&empty(), &e, 1, 1_700_000_100);

        assert!(record.charts.top_locations.is_empty());
        assert_eq!(record.breakdowns.countries.get("Brazil"), Some(&1));
        assert_eq!(record.breakdowns.cities.get("Campinas"), Some(&1));
    }

    #[test]
    fn device_breakdown_percentages_sum_close_to_hundred() {
        let mut record = empty();
        record = apply(&record, &event("abc1234"), 1, 1_700_000_100);

        let mut mobile = event("abc1234");
        mobile.device = DeviceInfo {
            kind: DeviceType::Mobile,
            is_mobile: true,
            is_tablet: false,
            is_desktop: false,
        };
        record = apply(&record, &mobile, 2, 1_700_000_200);
        record = apply(&record, &mobile, 2, 1_700_000_300);

        assert_eq!(record.charts.device_breakdown.len(), 2);
        let total: u64 = record
            .charts
            .device_breakdown
            .iter()
            .map(|e| e.percentage)
            .sum();
        assert!((99..=101).contains(&total));

        let mobile_entry = record
            .charts
            .device_breakdown
            .iter()
            .find(|e| e.device == "mobile")
            .unwrap();
        assert_eq!(mobile_entry.clicks, 2);
    }

    #[test]
    fn utm_fields_only_counted_when_present() {
        let mut e = event("abc1234");
        e.utm_source = Some("newsletter".to_string());
        e.utm_campaign = Some("launch".to_string());
        let record = apply(&empty(), &e, 1, 1_700_000_100);

        assert_eq!(record.breakdowns.utm_sources.get("newsletter"), Some(&1));
        assert_eq!(record.breakdowns.utm_campaigns.get("launch"), Some(&1));
        assert!(record.breakdowns.utm_mediums.is_empty());
    }
}
