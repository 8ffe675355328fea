use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ReconError;
use crate::traits::{OpenService, PortScanner};

/// Deadline for the primary SYN scan.
const SYN_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for the TCP connect fallback (slower per port).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(90);

fn port_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)/(tcp|udp)\s+(open|closed|filtered)\s+(.*)").unwrap())
}

/// Port scanner adapter driving an external `nmap` binary.
///
/// Prefers a SYN scan of the top 1000 TCP ports; SYN scans need raw-socket
/// privileges, so on failure it retries with a TCP connect scan over the
/// top 100 ports. Only `open` entries are reported.
pub struct NmapScanner;

impl NmapScanner {
    pub fn new() -> Self {
        Self
    }

    fn syn_args(ip: &str) -> Vec<String> {
        [
            "-sS",
            "-T4",
            "--top-ports",
            "1000",
            "-n",
            "--open",
            "-Pn",
            "--max-retries",
            "1",
            "--max-rtt-timeout",
            "500ms",
            ip,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn connect_args(ip: &str) -> Vec<String> {
        [
            "-sT",
            "-T4",
            "--top-ports",
            "100",
            "-n",
            "--open",
            "-Pn",
            "--max-retries",
            "1",
            "--max-rtt-timeout",
            "1000ms",
            ip,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    async fn run(args: &[String], deadline: Duration) -> Result<String, ReconError> {
        let mut command = Command::new("nmap");
        command.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(deadline, command.output())
            .await
            .map_err(|_| ReconError::Timeout {
                operation: "nmap".into(),
                timeout: deadline,
            })??;

        // Combine stdout and stderr: nmap writes warnings to stderr that
        // help error reporting, and port tables to stdout.
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ReconError::ExternalTool(format!(
                "nmap exited with {}: {}",
                output.status,
                combined.trim()
            )));
        }
        Ok(combined)
    }
}

impl Default for NmapScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortScanner for NmapScanner {
    async fn scan(&self, ip: &str) -> Result<Vec<OpenService>, ReconError> {
        let output = match Self::run(&Self::syn_args(ip), SYN_TIMEOUT).await {
            Ok(output) => output,
            Err(syn_err) => {
                // SYN scans commonly fail without elevated privileges
                debug!(ip, error = %syn_err, "SYN scan failed, falling back to TCP connect");
                match Self::run(&Self::connect_args(ip), CONNECT_TIMEOUT).await {
                    Ok(output) => output,
                    Err(connect_err) => {
                        warn!(ip, %syn_err, %connect_err, "both scan modes failed");
                        return Err(ReconError::ExternalTool(format!(
                            "SYN scan and TCP connect scan both failed. SYN: {syn_err}, TCP: {connect_err}"
                        )));
                    }
                }
            }
        };

        Ok(parse_nmap_output(&output))
    }
}

/// Parse nmap's human-readable port table into open services.
///
/// Matches lines like `22/tcp   open  ssh OpenSSH 8.9`; the first token of
/// the trailing text is the service name, the rest the version string.
pub fn parse_nmap_output(output: &str) -> Vec<OpenService> {
    let mut services = Vec::new();
    for line in output.lines() {
        let Some(caps) = port_line_regex().captures(line.trim()) else {
            continue;
        };
        let Ok(port) = caps[1].parse::<u16>() else {
            continue;
        };
        let state = &caps[3];
        if state != "open" {
            continue;
        }

        let mut service = None;
        let mut version = None;
        let info = caps[4].trim();
        if !info.is_empty() {
            let mut parts = info.split_whitespace();
            service = parts.next().map(str::to_string);
            let rest: Vec<&str> = parts.collect();
            if !rest.is_empty() {
                version = Some(rest.join(" "));
            }
        }

        services.push(OpenService {
            port,
            protocol: caps[2].to_string(),
            state: state.to_string(),
            service,
            version,
        });
    }
    services
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Starting Nmap 7.94 ( https://nmap.org )
Nmap scan report for 93.184.216.34
Host is up (0.012s latency).
Not shown: 998 filtered tcp ports (no-response)
PORT    STATE SERVICE
80/tcp  open  http
443/tcp open  https nginx 1.25.3
22/tcp  closed ssh

Nmap done: 1 IP address (1 host up) scanned in 4.21 seconds
";

    #[test]
    fn parses_open_ports_only() {
        let services = parse_nmap_output(SAMPLE);
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].port, 80);
        assert_eq!(services[0].protocol, "tcp");
        assert_eq!(services[0].service.as_deref(), Some("http"));
        assert!(services[0].version.is_none());
    }

    #[test]
    fn parses_service_version() {
        let services = parse_nmap_output(SAMPLE);
        assert_eq!(services[1].port, 443);
        assert_eq!(services[1].service.as_deref(), Some("https"));
        assert_eq!(services[1].version.as_deref(), Some("nginx 1.25.3"));
    }

    #[test]
    fn ignores_unmatched_lines() {
        let services = parse_nmap_output("Host is up\ngarbage line\n");
        assert!(services.is_empty());
    }

    #[test]
    fn udp_lines_parse() {
        let services = parse_nmap_output("53/udp open  domain");
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].protocol, "udp");
        assert_eq!(services[0].service.as_deref(), Some("domain"));
    }

    #[test]
    fn filtered_and_closed_skipped() {
        let output = "80/tcp filtered http\n22/tcp closed ssh\n";
        assert!(parse_nmap_output(output).is_empty());
    }

    #[test]
    fn open_port_without_service_column() {
        let services = parse_nmap_output("8080/tcp open  ");
        assert_eq!(services.len(), 1);
        assert!(services[0].service.is_none());
    }
}
