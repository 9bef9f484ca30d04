//! Data models for click analytics
//!
//! Two persisted shapes live here: the immutable [`ClickEvent`] appended once
//! per redirect, and the mutable [`AggregateRecord`] holding the running
//! per-short-code summary the dashboard reads in O(1). [`LegacySummary`] is
//! the degraded shape served when no aggregate record exists yet.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Device category derived from the user-agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mobile" => Some(DeviceType::Mobile),
            "tablet" => Some(DeviceType::Tablet),
            "desktop" => Some(DeviceType::Desktop),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(rename = "type")]
    pub kind: DeviceType,
    pub is_mobile: bool,
    pub is_tablet: bool,
    pub is_desktop: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserInfo {
    pub name: String,
    pub version: String,
    pub engine: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    pub platform: String,
}

/// One recorded click, immutable once appended to the click store.
///
/// The classifier fills everything except `timestamp`, which the click store
/// overwrites with its own clock at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub id: String,
    pub short_code: String,
    /// Unix timestamp, server-stamped on append.
    pub timestamp: i64,
    /// Used only for unique-visitor cardinality, never exposed in responses.
    pub ip: String,
    pub user_agent: String,
    pub referer: Option<String>,
    pub device: DeviceInfo,
    pub browser: BrowserInfo,
    pub os: OsInfo,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
}

/// Running totals. `countries`/`devices`/`browsers` count distinct categories
/// ever seen, not clicks per category, and never shrink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateTotals {
    pub clicks: u64,
    pub unique_clicks: u64,
    pub countries: u64,
    pub devices: u64,
    pub browsers: u64,
    pub last_updated: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakHourEntry {
    /// "HH:00"
    pub hour: String,
    pub clicks: u64,
    /// "14h"
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLocationEntry {
    /// "{city}, {region}"
    pub location: String,
    pub country: String,
    pub country_code: String,
    pub clicks: u64,
    /// Integer percent over the currently retained entries, not the full
    /// historical population; drifts once entries fall off the bound.
    pub percentage: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceShareEntry {
    pub device: String,
    pub clicks: u64,
    pub percentage: u64,
}

/// Bounded, percentage-annotated projections of the breakdown maps, shaped
/// for charting. The breakdowns are the source of truth; these are lossy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateCharts {
    pub peak_hours: Vec<PeakHourEntry>,
    pub top_locations: Vec<TopLocationEntry>,
    pub device_breakdown: Vec<DeviceShareEntry>,
}

/// Open-ended category -> count maps. Keys are free-form strings and grow
/// without bound.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBreakdowns {
    pub countries: HashMap<String, u64>,
    pub regions: HashMap<String, u64>,
    pub cities: HashMap<String, u64>,
    pub devices: HashMap<String, u64>,
    pub browsers: HashMap<String, u64>,
    pub operating_systems: HashMap<String, u64>,
    pub referrers: HashMap<String, u64>,
    pub utm_sources: HashMap<String, u64>,
    pub utm_mediums: HashMap<String, u64>,
    pub utm_campaigns: HashMap<String, u64>,
}

/// The single mutable per-short-code summary, read on every analytics view
/// and rewritten as a whole document on every click.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRecord {
    pub short_code: String,
    pub totals: AggregateTotals,
    pub charts: AggregateCharts,
    pub breakdowns: AggregateBreakdowns,
    /// Copied from the owning link at lazy creation, immutable afterwards.
    pub created_at: i64,
    pub last_click_at: Option<i64>,
}

impl AggregateRecord {
    /// Zero-valued record created on the first click for a short code.
    pub fn empty(short_code: &str, created_at: i64, now: i64) -> Self {
        Self {
            short_code: short_code.to_string(),
            totals: AggregateTotals {
                clicks: 0,
                unique_clicks: 0,
                countries: 0,
                devices: 0,
                browsers: 0,
                last_updated: now,
            },
            charts: AggregateCharts {
                peak_hours: Vec::new(),
                top_locations: Vec::new(),
                device_breakdown: Vec::new(),
            },
            breakdowns: AggregateBreakdowns::default(),
            created_at,
            last_click_at: None,
        }
    }
}

/// Summary rebuilt from raw events when no aggregate record exists.
///
/// The four time maps are always empty on this path; the real-time engine is
/// the only producer of time-bucketed data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySummary {
    pub total_clicks: u64,
    pub unique_clicks: u64,
    pub countries: HashMap<String, u64>,
    pub regions: HashMap<String, u64>,
    pub cities: HashMap<String, u64>,
    pub devices: HashMap<String, u64>,
    pub browsers: HashMap<String, u64>,
    pub operating_systems: HashMap<String, u64>,
    pub referrers: HashMap<String, u64>,
    pub utm_sources: HashMap<String, u64>,
    pub utm_mediums: HashMap<String, u64>,
    pub utm_campaigns: HashMap<String, u64>,
    pub clicks_by_hour: HashMap<String, u64>,
    pub clicks_by_day: HashMap<String, u64>,
    pub clicks_by_date: HashMap<String, u64>,
    pub clicks_by_month: HashMap<String, u64>,
}
