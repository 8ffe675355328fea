use std::collections::HashSet;
use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use surfmap_types::DnsRecords;
use tracing::debug;

use crate::traits::NameResolver;

/// Whether a name is a registrable root domain.
///
/// Heuristic: exactly two dot-separated labels. Misclassifies multi-part
/// TLDs (`example.co.uk`); the production fix is the Public Suffix List.
pub fn is_root_domain(host: &str) -> bool {
    host.split('.').count() == 2
}

/// DNS resolver wrapping hickory with the recon record policy:
/// A/AAAA partitioned by address family, non-trivial CNAME only, MX/NS/SOA
/// only for root domains, PTR union across resolved addresses.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }

    /// The simplified SOA view: derived from the primary NS, since a full
    /// SOA parse adds little for inventory purposes.
    fn soa_from_ns(ns: &[String]) -> Vec<String> {
        match ns.first() {
            Some(primary) => vec![format!("Primary NS: {primary}")],
            None => Vec::new(),
        }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve_ips(&self, hostname: &str) -> Vec<String> {
        match self.resolver.lookup_ip(hostname).await {
            Ok(lookup) => lookup.iter().map(|ip| ip.to_string()).collect(),
            Err(e) => {
                debug!(hostname, error = %e, "address resolution failed");
                Vec::new()
            }
        }
    }

    async fn lookup_dns(&self, hostname: &str) -> DnsRecords {
        let mut records = DnsRecords::default();
        let is_root = is_root_domain(hostname);

        if let Ok(lookup) = self.resolver.lookup_ip(hostname).await {
            for ip in lookup.iter() {
                match ip {
                    IpAddr::V4(v4) => records.a.push(v4.to_string()),
                    IpAddr::V6(v6) => records.aaaa.push(v6.to_string()),
                }
            }
        }

        if let Ok(lookup) = self.resolver.lookup(hostname, RecordType::CNAME).await {
            for rdata in lookup.iter() {
                if let Some(cname) = rdata.as_cname() {
                    let target = cname.0.to_string();
                    let target = target.trim_end_matches('.');
                    // Skip the trivial self-reference
                    if target != hostname {
                        records.cname.push(target.to_string());
                    }
                }
            }
        }

        if let Ok(lookup) = self.resolver.txt_lookup(hostname).await {
            for txt in lookup.iter() {
                let joined: String = txt
                    .iter()
                    .map(|data| String::from_utf8_lossy(data).into_owned())
                    .collect();
                if !joined.is_empty() {
                    records.txt.push(joined);
                }
            }
        }

        if is_root {
            if let Ok(lookup) = self.resolver.mx_lookup(hostname).await {
                for mx in lookup.iter() {
                    let host = mx.exchange().to_string();
                    records.mx.push(format!("{} {}", mx.preference(), host.trim_end_matches('.')));
                }
            }

            if let Ok(lookup) = self.resolver.ns_lookup(hostname).await {
                for ns in lookup.iter() {
                    let host = ns.0.to_string();
                    records.ns.push(host.trim_end_matches('.').to_string());
                }
            }

            records.soa = Self::soa_from_ns(&records.ns);
        }

        // PTR against every resolved address, deduplicated
        let mut seen = HashSet::new();
        let addrs: Vec<String> = records.a.iter().chain(records.aaaa.iter()).cloned().collect();
        for addr in addrs {
            let Ok(ip) = addr.parse::<IpAddr>() else { continue };
            if let Ok(lookup) = self.resolver.reverse_lookup(ip).await {
                for ptr in lookup.iter() {
                    let name = ptr.0.to_string();
                    let name = name.trim_end_matches('.').to_string();
                    if seen.insert(name.clone()) {
                        records.ptr.push(name);
                    }
                }
            }
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_domain_classification() {
        assert!(is_root_domain("example.com"));
        assert!(!is_root_domain("www.example.com"));
        assert!(!is_root_domain("a.b.example.com"));
        assert!(!is_root_domain("localhost"));
        // Known limitation: multi-part TLDs are misclassified
        assert!(!is_root_domain("example.co.uk"));
    }

    #[test]
    fn soa_derived_from_primary_ns() {
        let soa = DnsResolver::soa_from_ns(&["ns1.example.com".to_string()]);
        assert_eq!(soa, vec!["Primary NS: ns1.example.com"]);
        assert!(DnsResolver::soa_from_ns(&[]).is_empty());
    }
}
