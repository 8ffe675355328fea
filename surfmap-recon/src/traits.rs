//! Seams between the pipeline and its external collaborators.
//!
//! Each adapter (resolver, ASN client, enumerator, port scanner) sits behind
//! a trait so the pipeline's fan-out and ordering behavior can be exercised
//! without network access or external binaries.

use async_trait::async_trait;
use surfmap_types::DnsRecords;

use crate::error::ReconError;

/// An open service observed on an IP by the port scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenService {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub version: Option<String>,
}

/// ASN lookup result for an IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnInfo {
    pub number: u32,
    pub organization: String,
}

impl AsnInfo {
    /// Canonical `AS<number>` form used on asset records.
    pub fn as_label(&self) -> String {
        format!("AS{}", self.number)
    }
}

/// Hostname to address resolution plus full DNS record collection.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve A/AAAA addresses. Failures yield an empty list.
    async fn resolve_ips(&self, hostname: &str) -> Vec<String>;

    /// Collect the full DNS record set under the root-vs-subdomain policy.
    /// Per-record-type failures produce empty lists.
    async fn lookup_dns(&self, hostname: &str) -> DnsRecords;
}

/// IP to ASN/organization lookup. `None` on any failure.
#[async_trait]
pub trait AsnClient: Send + Sync {
    async fn lookup(&self, ip: &str) -> Option<AsnInfo>;
}

/// Subdomain enumeration for a root domain.
#[async_trait]
pub trait SubdomainEnumerator: Send + Sync {
    async fn enumerate(&self, domain: &str) -> Result<Vec<String>, ReconError>;
}

/// Port scan of a single IP, returning only open services.
#[async_trait]
pub trait PortScanner: Send + Sync {
    async fn scan(&self, ip: &str) -> Result<Vec<OpenService>, ReconError>;
}
