pub mod asn;
pub mod dns;
pub mod enumerate;
pub mod error;
pub mod nmap;
pub mod pipeline;
pub mod traits;

pub use asn::{CymruAsnClient, is_cdn_org};
pub use dns::{DnsResolver, is_root_domain};
pub use enumerate::SubfinderEnumerator;
pub use error::ReconError;
pub use nmap::NmapScanner;
pub use pipeline::ReconPipeline;
pub use traits::{AsnClient, AsnInfo, NameResolver, OpenService, PortScanner, SubdomainEnumerator};
