//! Fallback summary rebuilt from raw click events
//!
//! Served when a short code has clicks but no aggregate document yet, for
//! example links created before the incremental engine existed. The scan is
//! bounded and O(n); the four time maps are left empty on this path.

use std::collections::HashSet;

use anyhow::Result;

use crate::analytics::classifier::classify_referrer;
use crate::analytics::models::LegacySummary;
use crate::storage::Storage;

/// Rebuild a [`LegacySummary`] by scanning the most recent `scan_limit`
/// events for the short code.
pub async fn rebuild(
    storage: &dyn Storage,
    short_code: &str,
    scan_limit: i64,
) -> Result<LegacySummary> {
    let events = storage.recent_clicks(short_code, scan_limit).await?;

    let mut summary = LegacySummary::default();
    let mut unique_ips: HashSet<&str> = HashSet::new();

    for event in &events {
        summary.total_clicks += 1;
        unique_ips.insert(event.ip.as_str());

        if let Some(country) = &event.country {
            bump(&mut summary.countries, country);
        }
        if let Some(region) = &event.region {
            bump(&mut summary.regions, region);
        }
        if let Some(city) = &event.city {
            bump(&mut summary.cities, city);
        }
        bump(&mut summary.devices, event.device.kind.as_str());
        bump(&mut summary.browsers, &event.browser.name);
        bump(&mut summary.operating_systems, &event.os.name);
        bump(
            &mut summary.referrers,
            &classify_referrer(event.referer.as_deref()),
        );
        if let Some(source) = &event.utm_source {
            bump(&mut summary.utm_sources, source);
        }
        if let Some(medium) = &event.utm_medium {
            bump(&mut summary.utm_mediums, medium);
        }
        if let Some(campaign) = &event.utm_campaign {
            bump(&mut summary.utm_campaigns, campaign);
        }
    }

    summary.unique_clicks = unique_ips.len() as u64;

    Ok(summary)
}

fn bump(map: &mut std::collections::HashMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}
