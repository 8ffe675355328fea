use serde_json::{Value, json};
use surfmap_types::Asset;

/// Tag applied to assets fronted by a CDN/reverse proxy.
const PROXIED_TAG: &str = "cf-proxied";

/// Prepare a pipeline-emitted asset for persistence.
///
/// Recon enrichment is mirrored into the `properties{}` bag so script code
/// can read it through the `asset` view, and proxied assets gain the
/// `cf-proxied` tag.
pub fn prepare_for_store(asset: &mut Asset) {
    if !asset.ips.is_empty() {
        asset.properties.insert("ips".into(), json!(asset.ips));
    }
    if let Some(ref asn) = asset.asn {
        asset.properties.insert("asn".into(), Value::String(asn.clone()));
    }
    if let Some(ref org) = asset.asn_org {
        asset.properties.insert("asn_org".into(), Value::String(org.clone()));
    }
    if let Some(proxied) = asset.proxied {
        asset.properties.insert("proxied".into(), Value::Bool(proxied));
        if proxied {
            asset.add_tag(PROXIED_TAG);
        }
    }
    if !asset.subdomains.is_empty() {
        asset.properties.insert("subdomains".into(), json!(asset.subdomains));
    }
    if !asset.service_ids.is_empty() {
        asset.properties.insert("service_ids".into(), json!(asset.service_ids));
    }
    if let Some(port) = asset.port {
        asset.properties.insert("port".into(), json!(port));
    }
    if let Some(ref protocol) = asset.protocol {
        asset.properties.insert("protocol".into(), Value::String(protocol.clone()));
    }
    if let Some(ref state) = asset.state {
        asset.properties.insert("state".into(), Value::String(state.clone()));
    }
    if let Some(ref service) = asset.service {
        asset.properties.insert("service".into(), Value::String(service.clone()));
    }
    if let Some(ref version) = asset.version {
        asset.properties.insert("version".into(), Value::String(version.clone()));
    }
    if let Some(ref source_ip) = asset.source_ip {
        asset.properties.insert("source_ip".into(), Value::String(source_ip.clone()));
    }
}

#[cfg(test)]
mod tests {
    use surfmap_types::AssetKind;

    use super::*;

    #[test]
    fn proxied_asset_gains_tag() {
        let mut asset = Asset::new(AssetKind::Subdomain, "cdn.example.com");
        asset.proxied = Some(true);
        prepare_for_store(&mut asset);
        assert!(asset.tags.iter().any(|t| t == PROXIED_TAG));
        assert_eq!(asset.properties["proxied"], true);
    }

    #[test]
    fn unproxied_asset_untouched_by_tagging() {
        let mut asset = Asset::new(AssetKind::Subdomain, "www.example.com");
        asset.proxied = Some(false);
        prepare_for_store(&mut asset);
        assert!(asset.tags.is_empty());
        assert_eq!(asset.properties["proxied"], false);
    }

    #[test]
    fn service_fields_projected() {
        let mut asset = Asset::new(AssetKind::Service, "1.2.3.4:80/tcp");
        asset.port = Some(80);
        asset.protocol = Some("tcp".into());
        asset.state = Some("open".into());
        asset.service = Some("http".into());
        asset.source_ip = Some("1.2.3.4".into());
        prepare_for_store(&mut asset);
        assert_eq!(asset.properties["port"], 80);
        assert_eq!(asset.properties["protocol"], "tcp");
        assert_eq!(asset.properties["state"], "open");
        assert_eq!(asset.properties["service"], "http");
        assert_eq!(asset.properties["source_ip"], "1.2.3.4");
    }

    #[test]
    fn empty_enrichment_adds_nothing() {
        let mut asset = Asset::new(AssetKind::Domain, "example.com");
        prepare_for_store(&mut asset);
        assert!(asset.properties.is_empty());
        assert!(asset.tags.is_empty());
    }
}
