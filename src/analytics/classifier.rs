//! Event classification: raw request data -> structured [`ClickEvent`]
//!
//! Classification is an ordered-rule match over the lowercased user-agent,
//! plus UTM/referrer parsing of the referer URL. It never fails: anything the
//! rules do not recognize degrades to "Unknown" or an empty value. The geo
//! lookup is the only external collaborator and is equally best-effort.

use std::sync::Arc;

use chrono::Utc;
use url::Url;
use uuid::Uuid;

use crate::analytics::geo::GeoIpService;
use crate::analytics::models::{BrowserInfo, ClickEvent, DeviceInfo, DeviceType, OsInfo};

const MOBILE_MARKERS: &[&str] = &[
    "mobile",
    "android",
    "iphone",
    "ipad",
    "phone",
    "blackberry",
    "opera mini",
    "windows phone",
];

const TABLET_MARKERS: &[&str] = &[
    "ipad", "tablet", "kindle", "silk", "gt-p", "sm-t", "nexus 7", "nexus 9", "nexus 10",
];

/// Referrer hostname -> category table. Checked in order; first match wins.
const REFERRER_TABLE: &[(&str, &str)] = &[
    // Social media platforms
    ("facebook.com", "Facebook"),
    ("fb.com", "Facebook"),
    ("twitter.com", "Twitter"),
    ("t.co", "Twitter"),
    ("instagram.com", "Instagram"),
    ("linkedin.com", "LinkedIn"),
    ("youtube.com", "YouTube"),
    ("youtu.be", "YouTube"),
    ("tiktok.com", "TikTok"),
    ("pinterest.com", "Pinterest"),
    ("reddit.com", "Reddit"),
    // Email clients, before the search engines so mail.google.com does not
    // collapse into Google Search
    ("mail.google.com", "Gmail"),
    ("outlook.com", "Outlook"),
    ("hotmail.com", "Outlook"),
    // Search engines
    ("google.com", "Google Search"),
    ("bing.com", "Bing Search"),
    ("yahoo.com", "Yahoo Search"),
    ("duckduckgo.com", "DuckDuckGo"),
    // Messaging apps
    ("whatsapp.com", "WhatsApp"),
    ("wa.me", "WhatsApp"),
    ("telegram.org", "Telegram"),
    ("t.me", "Telegram"),
    ("discord.com", "Discord"),
];

/// Turns raw request data into a [`ClickEvent`].
pub struct EventClassifier {
    geo: Arc<GeoIpService>,
}

impl EventClassifier {
    pub fn new(geo: Arc<GeoIpService>) -> Self {
        Self { geo }
    }

    /// Build a complete click event from the inbound request's headers.
    ///
    /// Pure over its explicit inputs apart from the single geo lookup; the
    /// timestamp set here is provisional and is replaced by the click store
    /// at append time.
    pub fn classify(
        &self,
        user_agent: &str,
        referer: Option<&str>,
        ip: &str,
        short_code: &str,
    ) -> ClickEvent {
        let (device, browser, os) = parse_user_agent(user_agent);
        let utm = referer.map(extract_utm).unwrap_or_default();
        let geo = ip
            .parse()
            .ok()
            .and_then(|addr| self.geo.lookup(addr));

        let (country, country_code, region, city) = match geo {
            Some(g) => (Some(g.country), Some(g.country_code), g.region, g.city),
            None => (None, None, None, None),
        };

        ClickEvent {
            id: Uuid::new_v4().to_string(),
            short_code: short_code.to_string(),
            timestamp: Utc::now().timestamp(),
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            referer: referer.map(str::to_string),
            device,
            browser,
            os,
            country,
            country_code,
            region,
            city,
            utm_source: utm.source,
            utm_medium: utm.medium,
            utm_campaign: utm.campaign,
            utm_term: utm.term,
            utm_content: utm.content,
        }
    }
}

#[derive(Debug, Default)]
pub struct UtmParams {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub term: Option<String>,
    pub content: Option<String>,
}

/// Parse device, browser and OS categories out of a user-agent string.
pub fn parse_user_agent(user_agent: &str) -> (DeviceInfo, BrowserInfo, OsInfo) {
    let ua = user_agent.to_ascii_lowercase();
    (parse_device(&ua), parse_browser(&ua), parse_os(&ua))
}

fn parse_device(ua: &str) -> DeviceInfo {
    let is_mobile = MOBILE_MARKERS.iter().any(|m| ua.contains(m));
    let is_tablet = TABLET_MARKERS.iter().any(|m| ua.contains(m));
    let is_desktop = !is_mobile && !is_tablet;

    // Tablet takes precedence: tablet signatures are a subset of the mobile
    // ones (ipad matches both), so the specific rule wins.
    let kind = if is_tablet {
        DeviceType::Tablet
    } else if is_mobile {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    };

    DeviceInfo {
        kind,
        is_mobile,
        is_tablet,
        is_desktop,
    }
}

fn parse_browser(ua: &str) -> BrowserInfo {
    let (name, engine, version) = if ua.contains("firefox") {
        ("Firefox", "Gecko", version_after(ua, "firefox/", false))
    } else if ua.contains("chrome") && !ua.contains("edg") {
        ("Chrome", "Blink", version_after(ua, "chrome/", false))
    } else if ua.contains("safari") && !ua.contains("chrome") {
        ("Safari", "WebKit", version_after(ua, "version/", false))
    } else if ua.contains("edg") {
        ("Edge", "Blink", version_after(ua, "edg/", false))
    } else if ua.contains("opera") {
        ("Opera", "Blink", version_after(ua, "opera/", false))
    } else {
        ("Unknown", "Unknown", None)
    };

    BrowserInfo {
        name: name.to_string(),
        version: version.unwrap_or_else(|| "Unknown".to_string()),
        engine: engine.to_string(),
    }
}

fn parse_os(ua: &str) -> OsInfo {
    // iDevice user-agents carry "like Mac OS X" and Android ones carry
    // "Linux;", so the desktop rules must exclude them.
    let is_idevice = ua.contains("iphone") || ua.contains("ipad");
    let (name, platform, version) = if ua.contains("windows") {
        ("Windows", "Windows", windows_version(ua))
    } else if ua.contains("mac os") && !is_idevice {
        ("macOS", "macOS", version_after(ua, "mac os x ", true))
    } else if ua.contains("linux") && !ua.contains("android") {
        ("Linux", "Linux", None)
    } else if ua.contains("android") {
        ("Android", "Android", version_after(ua, "android ", false))
    } else if ua.contains("ios") || is_idevice {
        ("iOS", "iOS", version_after(ua, "os ", true))
    } else {
        ("Unknown", "Unknown", None)
    };

    OsInfo {
        name: name.to_string(),
        version: version.unwrap_or_else(|| "Unknown".to_string()),
        platform: platform.to_string(),
    }
}

fn windows_version(ua: &str) -> Option<String> {
    let version = if ua.contains("windows nt 10.0") {
        "10"
    } else if ua.contains("windows nt 6.3") {
        "8.1"
    } else if ua.contains("windows nt 6.2") {
        "8"
    } else if ua.contains("windows nt 6.1") {
        "7"
    } else {
        return None;
    };
    Some(version.to_string())
}

/// Extract the version string following `marker`, e.g. "129.0" after
/// "firefox/". Scans every occurrence of the marker and takes the first one
/// followed by digits. Underscore-separated mobile OS versions ("17_5") are
/// normalized to dots.
fn version_after(ua: &str, marker: &str, allow_underscore: bool) -> Option<String> {
    for (idx, _) in ua.match_indices(marker) {
        let rest = &ua[idx + marker.len()..];
        let raw: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.' || (allow_underscore && *c == '_'))
            .collect();
        if raw.chars().any(|c| c.is_ascii_digit()) {
            return Some(raw.replace('_', "."));
        }
    }
    None
}

/// Extract the five standard UTM parameters from a referer URL.
/// Parse failure yields an empty set, never an error.
pub fn extract_utm(referer: &str) -> UtmParams {
    let Ok(url) = Url::parse(referer) else {
        return UtmParams::default();
    };

    let mut utm = UtmParams::default();
    for (key, value) in url.query_pairs() {
        let value = value.to_string();
        match key.as_ref() {
            "utm_source" => utm.source = Some(value),
            "utm_medium" => utm.medium = Some(value),
            "utm_campaign" => utm.campaign = Some(value),
            "utm_term" => utm.term = Some(value),
            "utm_content" => utm.content = Some(value),
            _ => {}
        }
    }
    utm
}

/// Classify a referer URL into a traffic-source category.
///
/// No referer means the visitor typed or pasted the link: "Direct". A referer
/// that is not a parseable URL maps to "Unknown". Recognized platform
/// hostnames map through [`REFERRER_TABLE`]; anything else falls back to the
/// raw hostname.
pub fn classify_referrer(referer: Option<&str>) -> String {
    let Some(referer) = referer else {
        return "Direct".to_string();
    };

    let Ok(url) = Url::parse(referer) else {
        return "Unknown".to_string();
    };
    let Some(host) = url.host_str() else {
        return "Unknown".to_string();
    };

    let host = host.to_ascii_lowercase();
    for (needle, category) in REFERRER_TABLE {
        if host.contains(needle) {
            return category.to_string();
        }
    }
    host
}
