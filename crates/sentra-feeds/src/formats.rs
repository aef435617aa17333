//! Per-format feed parsers.
//!
//! Each parser is a pure function from response body to normalized
//! [`ThreatEntry`] values. Parsers are permissive: unparseable lines and
//! invalid domains are skipped, never fatal. Formats with a row cap stop
//! at the cap; the remainder is picked up on a later cycle once earlier
//! rows stop changing.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sentra_store::{ThreatEntry, ThreatType};
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Row cap for hosts-format feeds.
pub const HOSTS_ROW_CAP: usize = 50_000;

/// Row cap for adblock-filter feeds.
pub const ADBLOCK_ROW_CAP: usize = 30_000;

/// Host-label grammar: letters, digits, inner hyphens, 1-63 bytes per
/// label.
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("domain regex is valid")
});

/// Adblock basic domain rule: `||domain^` (with optional trailing options).
static ADBLOCK_ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\|\|([a-zA-Z0-9.-]+)\^").expect("adblock regex is valid"));

/// Adblock path rule: `||domain/...`.
static ADBLOCK_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\|\|([a-zA-Z0-9.-]+)/").expect("adblock regex is valid"));

/// The closed set of feed formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    /// URLhaus bulk JSON dump.
    UrlhausJson,
    /// OpenPhish plain-text URL list.
    OpenphishText,
    /// PhishTank verified-online JSON dump.
    PhishtankJson,
    /// One domain per line.
    PlainDomains,
    /// Hosts file (`0.0.0.0 domain`).
    Hosts,
    /// AdBlock Plus filter list.
    AdblockFilter,
}

impl FeedFormat {
    /// Parses a feed body into normalized entries. `source` is the short
    /// feed identifier recorded on each entry.
    pub fn parse(self, body: &str, source: &str) -> Vec<ThreatEntry> {
        match self {
            Self::UrlhausJson => parse_urlhaus(body, source),
            Self::OpenphishText => parse_openphish(body, source),
            Self::PhishtankJson => parse_phishtank(body, source),
            Self::PlainDomains => parse_plain_domains(body, source),
            Self::Hosts => parse_hosts(body, source),
            Self::AdblockFilter => parse_adblock(body, source),
        }
    }
}

/// Validates a domain against the host-label grammar and length limits.
pub fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty() && domain.len() <= 255 && DOMAIN_RE.is_match(domain)
}

/// Extracts the lowercased host from a URL or bare hostname. Ports are
/// dropped; anything unparseable yields `None`.
pub fn extract_domain(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    let parsed = Url::parse(&with_scheme).ok()?;
    parsed.host_str().map(str::to_ascii_lowercase)
}

// ---------------------------------------------------------------------------
// URLhaus
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UrlhausRecord {
    #[serde(default)]
    id: String,
    #[serde(default)]
    url_status: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    date_added: String,
    #[serde(default)]
    threat: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    payload_type: String,
}

fn parse_urlhaus(body: &str, source: &str) -> Vec<ThreatEntry> {
    let records: Vec<UrlhausRecord> = match serde_json::from_str(body) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(source, error = %e, "unparseable URLhaus payload");
            return Vec::new();
        }
    };

    let now = Utc::now();
    records
        .into_iter()
        .filter(|r| r.url_status == "online")
        .filter_map(|r| {
            let domain = extract_domain(&r.host)?;
            if !is_valid_domain(&domain) {
                return None;
            }

            let threat_type = if r.threat.to_ascii_lowercase().contains("phish") {
                ThreatType::Phishing
            } else {
                ThreatType::Malware
            };

            let mut metadata = HashMap::new();
            metadata.insert("payload_type".to_string(), r.payload_type);
            metadata.insert("tags".to_string(), r.tags.unwrap_or_default().join(","));
            metadata.insert("url_id".to_string(), r.id);

            Some(ThreatEntry {
                domain,
                threat_type,
                confidence: 0.90,
                source: source.to_string(),
                first_seen: parse_urlhaus_time(&r.date_added).unwrap_or(now),
                last_seen: now,
                is_active: true,
                metadata,
            })
        })
        .collect()
}

/// URLhaus timestamps look like `2024-03-01 17:22:05`, assumed UTC.
fn parse_urlhaus_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// PhishTank
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PhishtankRecord {
    #[serde(default)]
    phish_id: i64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    verified: String,
    #[serde(default)]
    online: String,
    #[serde(default)]
    target: String,
}

fn parse_phishtank(body: &str, source: &str) -> Vec<ThreatEntry> {
    let records: Vec<PhishtankRecord> = match serde_json::from_str(body) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(source, error = %e, "unparseable PhishTank payload");
            return Vec::new();
        }
    };

    let now = Utc::now();
    records
        .into_iter()
        .filter(|r| r.online == "yes" && r.verified == "yes")
        .filter_map(|r| {
            let domain = extract_domain(&r.url)?;
            if !is_valid_domain(&domain) {
                return None;
            }

            let mut metadata = HashMap::new();
            metadata.insert("target".to_string(), r.target);
            metadata.insert("phish_id".to_string(), r.phish_id.to_string());

            Some(ThreatEntry {
                domain,
                threat_type: ThreatType::Phishing,
                confidence: 0.95,
                source: source.to_string(),
                first_seen: now,
                last_seen: now,
                is_active: true,
                metadata,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Text formats
// ---------------------------------------------------------------------------

fn parse_openphish(body: &str, source: &str) -> Vec<ThreatEntry> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let domain = extract_domain(line)?;
            is_valid_domain(&domain).then(|| {
                ThreatEntry::new(domain, ThreatType::Phishing, 0.85, source)
            })
        })
        .collect()
}

fn parse_plain_domains(body: &str, source: &str) -> Vec<ThreatEntry> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let domain = line.to_ascii_lowercase();
            is_valid_domain(&domain)
                .then(|| ThreatEntry::new(domain, ThreatType::Malware, 0.85, source))
        })
        .collect()
}

fn parse_hosts(body: &str, source: &str) -> Vec<ThreatEntry> {
    let now = Utc::now();
    let mut entries = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(_ip) = parts.next() else { continue };
        let Some(domain) = parts.next() else { continue };

        let domain = domain.to_ascii_lowercase();
        if !is_valid_domain(&domain) || domain.contains("localhost") {
            continue;
        }

        let mut metadata = HashMap::new();
        metadata.insert("feed_format".to_string(), "hosts".to_string());
        metadata.insert("category".to_string(), "advertising".to_string());

        entries.push(ThreatEntry {
            domain,
            threat_type: ThreatType::Ads,
            confidence: 0.85,
            source: source.to_string(),
            first_seen: now,
            last_seen: now,
            is_active: true,
            metadata,
        });

        if entries.len() >= HOSTS_ROW_CAP {
            break;
        }
    }

    entries
}

fn parse_adblock(body: &str, source: &str) -> Vec<ThreatEntry> {
    let now = Utc::now();
    let mut entries = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
            continue;
        }

        let domain = ADBLOCK_ANCHOR_RE
            .captures(line)
            .or_else(|| ADBLOCK_PATH_RE.captures(line))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_lowercase());

        let Some(domain) = domain else { continue };
        if !is_valid_domain(&domain) {
            continue;
        }

        let mut metadata = HashMap::new();
        metadata.insert("feed_format".to_string(), "adblock".to_string());
        metadata.insert("rule_type".to_string(), "domain_block".to_string());

        entries.push(ThreatEntry {
            domain,
            threat_type: ThreatType::Ads,
            confidence: 0.80,
            source: source.to_string(),
            first_seen: now,
            last_seen: now,
            is_active: true,
            metadata,
        });

        if entries.len() >= ADBLOCK_ROW_CAP {
            break;
        }
    }

    entries
}
