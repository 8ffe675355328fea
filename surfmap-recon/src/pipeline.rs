use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use surfmap_types::{Asset, AssetKind, ReconOptions, service_id};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asn::{CymruAsnClient, is_cdn_org};
use crate::dns::{DnsResolver, is_root_domain};
use crate::enumerate::SubfinderEnumerator;
use crate::nmap::NmapScanner;
use crate::traits::{AsnClient, NameResolver, PortScanner, SubdomainEnumerator};

/// Bounded buffer between producers and the consuming sink. Producers block
/// when the consumer is slow, keeping memory bounded on broad scans.
const CHANNEL_BUFFER: usize = 100;

/// The discovery state machine: fans each seed out into subdomain
/// enumeration, DNS resolution, ASN/CDN classification and port scanning,
/// emitting heterogeneous assets onto a single stream as they are produced.
///
/// Ordering: within one task emission order is preserved, and every service
/// asset for an IP is emitted strictly before that IP's asset (so the IP's
/// `service_ids` list is final at emission). No order across tasks.
#[derive(Clone)]
pub struct ReconPipeline {
    resolver: Arc<dyn NameResolver>,
    asn: Arc<dyn AsnClient>,
    enumerator: Arc<dyn SubdomainEnumerator>,
    scanner: Arc<dyn PortScanner>,
}

impl ReconPipeline {
    /// Pipeline wired to the real adapters (hickory DNS, Team Cymru ASN,
    /// subfinder, nmap).
    pub fn new() -> Self {
        Self {
            resolver: Arc::new(DnsResolver::new()),
            asn: Arc::new(CymruAsnClient::new()),
            enumerator: Arc::new(SubfinderEnumerator::new()),
            scanner: Arc::new(NmapScanner::new()),
        }
    }

    /// Pipeline over caller-supplied adapters.
    pub fn with_adapters(
        resolver: Arc<dyn NameResolver>,
        asn: Arc<dyn AsnClient>,
        enumerator: Arc<dyn SubdomainEnumerator>,
        scanner: Arc<dyn PortScanner>,
    ) -> Self {
        Self { resolver, asn, enumerator, scanner }
    }

    /// Start discovery for the given seeds, returning the asset stream.
    ///
    /// The stream closes only after every spawned task has returned. The
    /// cancellation token is propagated into every sub-task; partial output
    /// already emitted is not retracted. `options.timeout` bounds the whole
    /// run (zero disables the deadline): when it expires the remaining
    /// fan-out is cancelled and in-flight tool invocations are dropped.
    pub fn discover(
        &self,
        options: ReconOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Asset> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let pipeline = self.clone();

        tokio::spawn(async move {
            let cancel = cancel.child_token();
            let watchdog = if options.timeout.is_zero() {
                None
            } else {
                let cancel = cancel.clone();
                let timeout = options.timeout;
                Some(tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    cancel.cancel();
                }))
            };

            let mut seeds = JoinSet::new();
            for host in options.hosts.clone() {
                let pipeline = pipeline.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                let options = options.clone();
                seeds.spawn(async move {
                    pipeline.process_input(&host, &tx, &options, &cancel).await;
                });
            }
            while seeds.join_next().await.is_some() {}
            if let Some(watchdog) = watchdog {
                watchdog.abort();
            }
            // tx drops here; the channel closes once all tasks have drained
        });

        rx
    }

    /// Classify a seed and dispatch: IP, root domain, or standalone subdomain.
    async fn process_input(
        &self,
        input: &str,
        tx: &mpsc::Sender<Asset>,
        options: &ReconOptions,
        cancel: &CancellationToken,
    ) {
        if input.parse::<IpAddr>().is_ok() {
            self.process_ip(input, tx, options, cancel).await;
        } else if is_root_domain(input) {
            self.process_domain(input, tx, options, cancel).await;
        } else {
            let ips = self.process_subdomain(input, tx, cancel).await;
            self.process_ips(ips, tx, options, cancel).await;
        }
    }

    async fn process_domain(
        &self,
        domain: &str,
        tx: &mpsc::Sender<Asset>,
        options: &ReconOptions,
        cancel: &CancellationToken,
    ) {
        debug!(domain, "processing domain");

        // Cancellation drops the in-flight enumerator invocation
        let enumerated = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.enumerator.enumerate(domain) => result,
        };
        let subdomains = match enumerated {
            Ok(subdomains) => subdomains,
            Err(e) => {
                // Best-effort: enumeration failure never aborts the domain
                warn!(domain, error = %e, "subdomain enumeration failed");
                Vec::new()
            }
        };
        info!(domain, count = subdomains.len(), "subdomain enumeration finished");

        let mut asset = self.build_host_asset(AssetKind::Domain, domain).await;
        asset.subdomains = subdomains.clone();
        let domain_ips = asset.ips.clone();
        if !Self::emit(tx, asset, cancel).await {
            return;
        }

        // Subdomain tasks run in parallel; each reports the addresses it
        // resolved so the domain can scan the union exactly once.
        let mut tasks = JoinSet::new();
        for subdomain in subdomains {
            let pipeline = self.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { pipeline.process_subdomain(&subdomain, &tx, &cancel).await });
        }

        let mut unique = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for ip in domain_ips {
            if seen.insert(ip.clone()) {
                unique.push(ip);
            }
        }
        while let Some(joined) = tasks.join_next().await {
            let Ok(sub_ips) = joined else { continue };
            for ip in sub_ips {
                if seen.insert(ip.clone()) {
                    unique.push(ip);
                }
            }
        }

        self.process_ips(unique, tx, options, cancel).await;
    }

    /// Emit the subdomain asset; returns the addresses it resolved to.
    async fn process_subdomain(
        &self,
        subdomain: &str,
        tx: &mpsc::Sender<Asset>,
        cancel: &CancellationToken,
    ) -> Vec<String> {
        debug!(subdomain, "processing subdomain");
        let asset = self.build_host_asset(AssetKind::Subdomain, subdomain).await;
        let ips = asset.ips.clone();
        Self::emit(tx, asset, cancel).await;
        ips
    }

    /// Spawn one task per unique IP and wait for all of them.
    async fn process_ips(
        &self,
        ips: Vec<String>,
        tx: &mpsc::Sender<Asset>,
        options: &ReconOptions,
        cancel: &CancellationToken,
    ) {
        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();
        for ip in ips {
            if !seen.insert(ip.clone()) {
                continue;
            }
            let pipeline = self.clone();
            let tx = tx.clone();
            let options = options.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                pipeline.process_ip(&ip, &tx, &options, &cancel).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Emit any service assets observed on the IP, then the IP asset itself.
    async fn process_ip(
        &self,
        ip: &str,
        tx: &mpsc::Sender<Asset>,
        options: &ReconOptions,
        cancel: &CancellationToken,
    ) {
        debug!(ip, "processing ip");

        let mut asset = Asset::new(AssetKind::Ip, ip);
        asset.ips = vec![ip.to_string()];

        let mut is_cdn = false;
        if let Some(info) = self.asn.lookup(ip).await {
            is_cdn = is_cdn_org(&info.organization);
            asset.asn = Some(info.as_label());
            asset.asn_org = Some(info.organization);
        }
        asset.proxied = Some(is_cdn);

        // Port-scan skip rule: a CDN-fronted address answers for the CDN,
        // not the asset owner, so its ports carry no signal.
        if options.enable_scanning && !is_cdn {
            // Cancellation drops the in-flight scanner invocation
            let scanned = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = self.scanner.scan(ip) => result,
            };
            match scanned {
                Ok(services) => {
                    for open in services {
                        let id = service_id(ip, open.port, &open.protocol);
                        let mut service =
                            Asset::new(AssetKind::Service, format!("{ip}:{}/{}", open.port, open.protocol));
                        service.id = id.clone();
                        service.port = Some(open.port);
                        service.protocol = Some(open.protocol);
                        service.state = Some(open.state);
                        service.service = open.service;
                        service.version = open.version;
                        service.source_ip = Some(ip.to_string());
                        if !Self::emit(tx, service, cancel).await {
                            return;
                        }
                        asset.service_ids.push(id);
                    }
                }
                Err(e) => {
                    // The IP asset is still emitted with partial data
                    warn!(ip, error = %e, "port scan failed");
                }
            }
        } else if is_cdn {
            debug!(ip, "skipping port scan for CDN-fronted address");
        }

        Self::emit(tx, asset, cancel).await;
    }

    /// Resolve, classify and collect DNS records for a domain or subdomain.
    async fn build_host_asset(&self, kind: AssetKind, name: &str) -> Asset {
        let mut asset = Asset::new(kind, name);
        asset.ips = self.resolver.resolve_ips(name).await;
        if !asset.ips.is_empty() {
            asset.proxied = Some(self.is_proxied(&asset.ips).await);
        }
        asset.dns_records = Some(self.resolver.lookup_dns(name).await);
        asset
    }

    /// True when any of the addresses is CDN-classified.
    async fn is_proxied(&self, ips: &[String]) -> bool {
        for ip in ips {
            if let Some(info) = self.asn.lookup(ip).await {
                if is_cdn_org(&info.organization) {
                    return true;
                }
            }
        }
        false
    }

    /// Send respecting cancellation. Returns false when the task should stop
    /// (cancelled or receiver dropped). Cancellation takes priority over a
    /// ready send so a cancelled pipeline stops emitting promptly.
    async fn emit(tx: &mpsc::Sender<Asset>, asset: Asset, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = tx.send(asset) => sent.is_ok(),
        }
    }
}

impl Default for ReconPipeline {
    fn default() -> Self {
        Self::new()
    }
}
