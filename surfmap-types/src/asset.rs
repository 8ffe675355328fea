use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::asset_id;
use crate::script::ScanResult;

/// The kind of an asset in the reconnaissance graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Domain,
    Subdomain,
    Ip,
    Service,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain => write!(f, "domain"),
            Self::Subdomain => write!(f, "subdomain"),
            Self::Ip => write!(f, "ip"),
            Self::Service => write!(f, "service"),
        }
    }
}

impl AssetKind {
    /// Parse a kind name (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "domain" => Some(Self::Domain),
            "subdomain" => Some(Self::Subdomain),
            "ip" => Some(Self::Ip),
            "service" => Some(Self::Service),
            _ => None,
        }
    }
}

/// Lifecycle state of an asset.
///
/// Transitions: `discovered → scanning → (scanned | error)`. `scanning`
/// forbids a concurrent scan on the same asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Discovered,
    Scanning,
    Scanned,
    Error,
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::Scanning => write!(f, "scanning"),
            Self::Scanned => write!(f, "scanned"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// DNS records collected for a domain or subdomain.
///
/// Empty lists are omitted on the wire. MX entries carry a numeric
/// preference prefix (`"10 mail.example.com"`). The PTR list is the
/// deduplicated union across all resolved addresses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsRecords {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub a: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aaaa: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cname: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mx: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub txt: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub soa: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ptr: Vec<String>,
}

impl DnsRecords {
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
            && self.aaaa.is_empty()
            && self.cname.is_empty()
            && self.mx.is_empty()
            && self.txt.is_empty()
            && self.ns.is_empty()
            && self.soa.is_empty()
            && self.ptr.is_empty()
    }
}

/// A discovered asset: domain, subdomain, IP, or service.
///
/// All variants share the id/value/tags/properties envelope and differ by
/// `kind` (serialized as `type`). Relationships between IPs and services are
/// modeled by ids (`service_ids` / `source_ip`), never by in-memory pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AssetKind,
    pub value: String,
    pub discovered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scanned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scan_count: u32,
    pub status: AssetStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scan_results: Vec<ScanResult>,

    // Recon enrichment (domains / subdomains / ips)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn_org: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subdomains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_records: Option<DnsRecords>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_ids: Vec<String>,

    // Service-specific fields (kind == service)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
}

impl Asset {
    /// Create a fresh asset with a content-derived id.
    pub fn new(kind: AssetKind, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            id: asset_id(kind, &value),
            kind,
            value,
            discovered_at: Utc::now(),
            last_scanned_at: None,
            scan_count: 0,
            status: AssetStatus::Discovered,
            tags: Vec::new(),
            properties: Map::new(),
            scan_results: Vec::new(),
            ips: Vec::new(),
            asn: None,
            asn_org: None,
            subdomains: Vec::new(),
            proxied: None,
            dns_records: None,
            service_ids: Vec::new(),
            port: None,
            protocol: None,
            state: None,
            service: None,
            version: None,
            source_ip: None,
        }
    }

    pub fn is_scanned(&self) -> bool {
        self.status == AssetStatus::Scanned
    }

    /// An asset may be (re)scanned unless a scan is already in flight.
    pub fn can_be_scanned(&self) -> bool {
        self.status != AssetStatus::Scanning
    }

    /// Insert a tag if not already present. Tags form a set.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }
}

/// Filtering criteria for listing assets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<AssetKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<AssetStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_results: Option<bool>,
}

impl AssetFilter {
    pub fn matches(&self, asset: &Asset) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&asset.kind) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&asset.status) {
            return false;
        }
        if let Some(from) = self.date_from {
            if asset.discovered_at < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if asset.discovered_at > to {
                return false;
            }
        }
        if let Some(has_results) = self.has_results {
            if has_results != !asset.scan_results.is_empty() {
                return false;
            }
        }
        true
    }
}
