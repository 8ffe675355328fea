use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tracing::debug;

use crate::traits::{AsnClient, AsnInfo};

/// Known CDN / reverse-proxy provider substrings, matched case-insensitively
/// against the ASN organization text. Incomplete by nature; operators move
/// between organizations.
const CDN_PROVIDERS: &[&str] = &[
    "cloudflare",
    "akamai",
    "amazon",
    "aws",
    "cloudfront",
    "fastly",
    "incapsula",
    "imperva",
    "maxcdn",
    "stackpath",
    "keycdn",
    "bunnycdn",
    "jsdelivr",
    "cdnjs",
    "google cloud",
    "microsoft azure",
    "azure",
    "sucuri",
    "ddos-guard",
    "ovh cdn",
    "limelight",
    "edgecast",
    "verizon",
    "level3",
    "centurylink",
];

/// Whether an ASN organization belongs to a known CDN/proxy provider.
pub fn is_cdn_org(org: &str) -> bool {
    let lowered = org.to_lowercase();
    CDN_PROVIDERS.iter().any(|provider| lowered.contains(provider))
}

/// ASN lookup over Team Cymru's IP-to-ASN DNS interface.
///
/// The origin zone answers `<reversed-ip>.origin.asn.cymru.com` TXT queries
/// with `"15169 | 8.8.8.0/24 | US | arin | 2000-03-30"`; the AS description
/// zone answers `AS<n>.asn.cymru.com` with the organization in the last
/// pipe-separated field.
pub struct CymruAsnClient {
    resolver: TokioAsyncResolver,
}

impl CymruAsnClient {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }

    fn origin_query(ip: IpAddr) -> String {
        match ip {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                format!(
                    "{}.{}.{}.{}.origin.asn.cymru.com.",
                    octets[3], octets[2], octets[1], octets[0]
                )
            }
            IpAddr::V6(v6) => {
                let mut nibbles = Vec::with_capacity(32);
                for byte in v6.octets().iter().rev() {
                    nibbles.push(format!("{:x}", byte & 0x0f));
                    nibbles.push(format!("{:x}", byte >> 4));
                }
                format!("{}.origin6.asn.cymru.com.", nibbles.join("."))
            }
        }
    }

    async fn first_txt(&self, name: &str) -> Option<String> {
        let lookup = self.resolver.txt_lookup(name).await.ok()?;
        let txt = lookup.iter().next()?;
        let joined: String = txt
            .iter()
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .collect();
        if joined.is_empty() { None } else { Some(joined) }
    }
}

impl Default for CymruAsnClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsnClient for CymruAsnClient {
    async fn lookup(&self, ip: &str) -> Option<AsnInfo> {
        let parsed: IpAddr = ip.parse().ok()?;
        let origin = self.first_txt(&Self::origin_query(parsed)).await?;

        // "15169 | 8.8.8.0/24 | US | arin | 2000-03-30"; the first field may
        // list several ASNs for multi-origin prefixes, take the first.
        let number: u32 = origin
            .split('|')
            .next()?
            .split_whitespace()
            .next()?
            .parse()
            .ok()?;

        let organization = match self.first_txt(&format!("AS{number}.asn.cymru.com.")).await {
            Some(desc) => desc
                .rsplit('|')
                .next()
                .map(|org| org.trim().to_string())
                .unwrap_or_default(),
            None => {
                debug!(ip, asn = number, "no AS description record");
                String::new()
            }
        };

        Some(AsnInfo { number, organization })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdn_table_matches_substrings() {
        assert!(is_cdn_org("CLOUDFLARENET"));
        assert!(is_cdn_org("Akamai International B.V."));
        assert!(is_cdn_org("AMAZON-02, US"));
        assert!(is_cdn_org("Fastly, Inc."));
        assert!(is_cdn_org("MICROSOFT AZURE"));
    }

    #[test]
    fn non_cdn_orgs_pass_through() {
        assert!(!is_cdn_org("HETZNER-AS, DE"));
        assert!(!is_cdn_org("DIGITALOCEAN-ASN"));
        assert!(!is_cdn_org(""));
    }

    #[test]
    fn origin_query_reverses_v4_octets() {
        let name = CymruAsnClient::origin_query("8.8.8.8".parse().unwrap());
        assert_eq!(name, "8.8.8.8.origin.asn.cymru.com.");
        let name = CymruAsnClient::origin_query("1.2.3.4".parse().unwrap());
        assert_eq!(name, "4.3.2.1.origin.asn.cymru.com.");
    }

    #[test]
    fn origin_query_v6_uses_nibbles() {
        let name = CymruAsnClient::origin_query("2001:db8::1".parse().unwrap());
        assert!(name.ends_with(".origin6.asn.cymru.com."));
        // 32 nibbles + domain suffix
        assert_eq!(name.split('.').count(), 32 + 5);
        assert!(name.starts_with("1.0.0.0."));
    }
}
