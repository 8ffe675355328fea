//! Stable, content-derived identifiers.
//!
//! Asset ids are the first 12 hex characters of the MD5 of `"{kind}:{value}"`.
//! MD5 is fine here: the requirement is stable collision-unlikely naming
//! across runs, not unforgeability.

use crate::asset::AssetKind;

/// Derive the id of an asset from its kind and canonical value.
pub fn asset_id(kind: AssetKind, value: &str) -> String {
    hash12(&format!("{kind}:{value}"))
}

/// Derive the id of a service asset from its `(ip, port, protocol)` triple.
///
/// Ports are uniqueness-bearing within an IP; the kind prefix is the literal
/// string `service` so re-discovery always lands on the same id.
pub fn service_id(ip: &str, port: u16, protocol: &str) -> String {
    hash12(&format!("service:{ip}:{port}:{protocol}"))
}

fn hash12(input: &str) -> String {
    let digest = md5::compute(input.as_bytes());
    let hex = format!("{digest:x}");
    hex[..12].to_string()
}

/// Key for a global checklist status: `global:{item_id}`.
pub fn global_key(item_id: &str) -> String {
    format!("global:{item_id}")
}

/// Key for a per-asset checklist status: `asset:{asset_id}:{item_id}`.
pub fn asset_key(asset_id: &str, item_id: &str) -> String {
    format!("asset:{asset_id}:{item_id}")
}

/// Generate a job id of the form `{job_type}_{16 hex chars}`.
///
/// Callers supply the randomness so this crate stays free of a rand
/// dependency; pass 8 bytes from any source.
pub fn job_id(job_type: &str, random: [u8; 8]) -> String {
    let mut hex = String::with_capacity(16);
    for b in random {
        hex.push_str(&format!("{b:02x}"));
    }
    format!("{job_type}_{hex}")
}
