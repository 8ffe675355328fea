use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ReconError;
use crate::traits::SubdomainEnumerator;

/// Enumeration cap per root domain.
const ENUM_TIMEOUT: Duration = Duration::from_secs(30);

/// Subdomain enumerator driving an external `subfinder` binary.
///
/// Best-effort: every source subfinder knows about is queried, output is
/// deduplicated, and the input domain itself is dropped from the results.
pub struct SubfinderEnumerator;

impl SubfinderEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SubfinderEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubdomainEnumerator for SubfinderEnumerator {
    async fn enumerate(&self, domain: &str) -> Result<Vec<String>, ReconError> {
        debug!(domain, "starting subdomain enumeration");

        let mut command = Command::new("subfinder");
        command.args(["-d", domain, "-all", "-silent"]).kill_on_drop(true);

        let output = tokio::time::timeout(ENUM_TIMEOUT, command.output())
            .await
            .map_err(|_| ReconError::Timeout {
                operation: "subfinder".into(),
                timeout: ENUM_TIMEOUT,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(domain, %stderr, "subfinder exited with failure");
            return Err(ReconError::ExternalTool(format!(
                "subfinder exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_enumeration_output(&stdout, domain))
    }
}

/// Parse line-per-name enumerator output: trim, drop blanks, drop the input
/// domain, dedupe while keeping first-seen order.
pub fn parse_enumeration_output(output: &str, domain: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut subdomains = Vec::new();
    for line in output.lines() {
        let name = line.trim();
        if name.is_empty() || name == domain {
            continue;
        }
        if seen.insert(name.to_string()) {
            subdomains.push(name.to_string());
        }
    }
    subdomains
}
