use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use rand::RngCore;
use surfmap_types::{Asset, AssetKind, Decision, ScanResult, ScannerConfig, Script};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bindings::{ExecSink, SharedSink, register_bindings};
use crate::error::ScriptError;
use crate::loader::ScriptLoader;
use crate::sandbox::LuaSandbox;

/// The script-driven scan orchestrator.
///
/// Holds the loaded script table and a bounded worker pool. Scripts are
/// scheduled in dependency phases: a script becomes eligible once every
/// name in its `requires_passed` list has produced a `pass` decision in the
/// same session. Scripts within a phase run concurrently under the pool;
/// a script whose dependencies never pass is silently skipped.
pub struct ScanEngine {
    config: ScannerConfig,
    loader: ScriptLoader,
    scripts: RwLock<HashMap<String, Script>>,
    pool: Arc<Semaphore>,
}

impl ScanEngine {
    /// Create an engine and load scripts from the configured directory.
    pub fn new(config: ScannerConfig) -> Result<Self, ScriptError> {
        let loader = ScriptLoader::new(config.scripts_dir.clone());
        let scripts = index_scripts(loader.load()?);
        info!(count = scripts.len(), dir = %config.scripts_dir, "scripts loaded");
        Ok(Self {
            pool: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            loader,
            scripts: RwLock::new(scripts),
            config,
        })
    }

    /// Reload scripts from disk, fully replacing the current table.
    pub fn reload(&self) -> Result<usize, ScriptError> {
        let scripts = index_scripts(self.loader.load()?);
        let count = scripts.len();
        *self.scripts.write().expect("script table poisoned") = scripts;
        info!(count, "scripts reloaded");
        Ok(count)
    }

    /// All loaded scripts, sorted by name.
    pub fn scripts(&self) -> Vec<Script> {
        let table = self.scripts.read().expect("script table poisoned");
        let mut scripts: Vec<Script> = table.values().cloned().collect();
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        scripts
    }

    pub fn get_script(&self, name: &str) -> Option<Script> {
        self.scripts.read().expect("script table poisoned").get(name).cloned()
    }

    /// Names of scripts applicable to an asset kind (empty `asset_types`
    /// means applicable to everything).
    pub fn applicable_scripts(&self, kind: AssetKind) -> Vec<String> {
        let table = self.scripts.read().expect("script table poisoned");
        let mut names: Vec<String> = table
            .values()
            .filter(|script| script.applies_to(kind))
            .map(|script| script.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Run the named scripts (or, when empty, all applicable scripts)
    /// against the asset. Tags emitted by scripts are merged into the asset
    /// between phases, so later phases observe them.
    pub async fn scan_asset(&self, asset: &mut Asset, script_names: &[String]) -> Vec<ScanResult> {
        let names = if script_names.is_empty() {
            self.applicable_scripts(asset.kind)
        } else {
            script_names.to_vec()
        };

        let mut candidates: HashMap<String, Script> = HashMap::new();
        {
            let table = self.scripts.read().expect("script table poisoned");
            for name in &names {
                match table.get(name) {
                    Some(script) => {
                        candidates.insert(name.clone(), script.clone());
                    }
                    None => warn!(script = %name, "requested script not loaded"),
                }
            }
        }

        let mut results = Vec::new();
        let mut executed: HashSet<String> = HashSet::new();
        let mut passed: HashSet<String> = HashSet::new();

        loop {
            let phase: Vec<Script> = candidates
                .values()
                .filter(|script| !executed.contains(&script.name))
                .filter(|script| script.requires_passed.iter().all(|req| passed.contains(req)))
                .cloned()
                .collect();
            if phase.is_empty() {
                break;
            }

            debug!(asset = %asset.id, scripts = phase.len(), "starting scan phase");

            let mut tasks = JoinSet::new();
            for script in phase {
                let pool = self.pool.clone();
                let timeout = self.config.default_timeout;
                let asset_view = asset.clone();
                tasks.spawn(async move {
                    let _permit = pool.acquire_owned().await;
                    execute_script(&asset_view, &script, timeout).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let Ok((result, tags)) = joined else { continue };
                executed.insert(result.script_name.clone());
                if result.decision == Decision::Pass {
                    passed.insert(result.script_name.clone());
                }
                for tag in tags {
                    asset.add_tag(&tag);
                }
                results.push(result);
            }
        }

        results
    }
}

fn index_scripts(scripts: Vec<Script>) -> HashMap<String, Script> {
    scripts.into_iter().map(|script| (script.name.clone(), script)).collect()
}

fn result_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Execute one script with a deadline and panic isolation, and return its
/// result plus the tags it emitted.
async fn execute_script(
    asset: &Asset,
    script: &Script,
    timeout: std::time::Duration,
) -> (ScanResult, Vec<String>) {
    let started = Instant::now();
    let executed_at = Utc::now();
    let sink: SharedSink = Arc::new(Mutex::new(ExecSink::default()));

    let run_sink = sink.clone();
    let run_asset = asset.clone();
    let content = script.content.clone();
    let chunk_name = script.name.clone();
    let handle = tokio::task::spawn_blocking(move || {
        run_in_sandbox(&run_asset, &content, &chunk_name, run_sink)
    });

    let outcome = tokio::time::timeout(timeout, handle).await;

    let (success, error) = match outcome {
        // Deadline exceeded: the blocking worker is abandoned, its late
        // side effects are discarded with the abandoned sink state.
        Err(_elapsed) => (false, Some(ScriptError::Timeout.to_string())),
        Ok(Err(join_err)) => {
            if join_err.is_panic() {
                let payload = join_err.into_panic();
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                (false, Some(ScriptError::Panic(msg).to_string()))
            } else {
                (false, Some(format!("script task failed: {join_err}")))
            }
        }
        Ok(Ok(Err(script_err))) => (false, Some(script_err.to_string())),
        Ok(Ok(Ok(()))) => (true, None),
    };

    let state = match sink.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(_) => ExecSink::default(),
    };

    if let Some(ref err) = error {
        warn!(script = %script.name, asset = %asset.id, error = %err, "script failed");
    }

    let result = ScanResult {
        id: result_id(),
        asset_id: asset.id.clone(),
        script_name: script.name.clone(),
        executed_at,
        success,
        decision: state.decision.unwrap_or(Decision::Na),
        output: state.output,
        error,
        duration_ms: started.elapsed().as_millis() as u64,
        metadata: state.metadata,
    };
    (result, state.tags)
}

fn run_in_sandbox(
    asset: &Asset,
    content: &str,
    chunk_name: &str,
    sink: SharedSink,
) -> Result<(), ScriptError> {
    let sandbox = LuaSandbox::new()?;
    register_bindings(sandbox.lua(), asset, sink)?;
    // VM teardown on return (or unwind) releases every registered socket
    sandbox.execute(content, chunk_name)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    fn scripts_dir(name: &str, scripts: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("surfmap_engine_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for (file, content) in scripts {
            fs::write(dir.join(file), content).unwrap();
        }
        dir
    }

    fn engine_for(dir: &PathBuf) -> ScanEngine {
        let config = ScannerConfig {
            scripts_dir: dir.to_str().unwrap().to_string(),
            default_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        ScanEngine::new(config).unwrap()
    }

    fn ip_asset() -> Asset {
        Asset::new(AssetKind::Ip, "10.0.0.1")
    }

    #[tokio::test]
    async fn pass_decision_recorded() {
        let dir = scripts_dir("pass", &[("a.lua", "pass()")]);
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &[]).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].decision, Decision::Pass);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn decision_defaults_to_na() {
        let dir = scripts_dir("na", &[("a.lua", r#"log("observing")"#)]);
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &[]).await;
        assert_eq!(results[0].decision, Decision::Na);
        assert!(results[0].success);
        assert_eq!(results[0].output, vec!["observing"]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn reject_blocks_dependent_script() {
        let dir = scripts_dir(
            "dep_reject",
            &[
                ("a.lua", r#"reject("nope")"#),
                ("b.lua", "-- @requires_passed a.lua\npass()"),
            ],
        );
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &[]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].script_name, "a.lua");
        assert_eq!(results[0].decision, Decision::Reject);
        assert_eq!(results[0].metadata["reject_reason"], "nope");
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn pass_unlocks_dependent_script_in_later_phase() {
        let dir = scripts_dir(
            "dep_pass",
            &[
                ("a.lua", "pass()"),
                ("b.lua", "-- @requires_passed a.lua\npass()"),
                ("c.lua", "-- @requires_passed b.lua\nlog(\"third\")"),
            ],
        );
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &[]).await;
        assert_eq!(results.len(), 3);
        let order: Vec<&str> = results.iter().map(|r| r.script_name.as_str()).collect();
        assert_eq!(order, vec!["a.lua", "b.lua", "c.lua"]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn lua_error_yields_failed_result() {
        let dir = scripts_dir("err", &[("a.lua", r#"error("kaboom")"#)]);
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &[]).await;
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("kaboom"));
        assert_eq!(results[0].decision, Decision::Na);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failing_script_does_not_stop_others() {
        let dir = scripts_dir(
            "partial",
            &[("bad.lua", r#"error("x")"#), ("good.lua", "pass()")],
        );
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &[]).await;
        assert_eq!(results.len(), 2);
        let good = results.iter().find(|r| r.script_name == "good.lua").unwrap();
        assert!(good.success);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn timeout_marks_result_failed() {
        let dir = scripts_dir("timeout", &[("slow.lua", "sleep(2)")]);
        let config = ScannerConfig {
            scripts_dir: dir.to_str().unwrap().to_string(),
            default_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let engine = ScanEngine::new(config).unwrap();
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &[]).await;
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("timeout"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn tags_merge_into_asset() {
        let dir = scripts_dir("tags", &[("a.lua", r#"add_tag("http") add_tag("http")"#)]);
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        engine.scan_asset(&mut asset, &[]).await;
        assert_eq!(asset.tags, vec!["http"]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn asset_type_filtering_selects_applicable() {
        let dir = scripts_dir(
            "kinds",
            &[
                ("ip_only.lua", "-- @asset_types ip\npass()"),
                ("domains.lua", "-- @asset_types domain\npass()"),
                ("any.lua", "pass()"),
            ],
        );
        let engine = engine_for(&dir);
        assert_eq!(
            engine.applicable_scripts(AssetKind::Ip),
            vec!["any.lua".to_string(), "ip_only.lua".to_string()]
        );

        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &[]).await;
        let names: Vec<&str> = results.iter().map(|r| r.script_name.as_str()).collect();
        assert!(names.contains(&"ip_only.lua"));
        assert!(names.contains(&"any.lua"));
        assert!(!names.contains(&"domains.lua"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn explicit_script_names_override_applicability() {
        let dir = scripts_dir(
            "explicit",
            &[("a.lua", "pass()"), ("b.lua", "pass()")],
        );
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &["a.lua".to_string()]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].script_name, "a.lua");
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unknown_script_names_skipped() {
        let dir = scripts_dir("unknown", &[("a.lua", "pass()")]);
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &["ghost.lua".to_string()]).await;
        assert!(results.is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn reload_replaces_table() {
        let dir = scripts_dir("reload", &[("a.lua", "pass()")]);
        let engine = engine_for(&dir);
        assert_eq!(engine.scripts().len(), 1);

        fs::write(dir.join("b.lua"), "pass()").unwrap();
        fs::remove_file(dir.join("a.lua")).unwrap();
        let count = engine.reload().unwrap();
        assert_eq!(count, 1);
        assert!(engine.get_script("b.lua").is_some());
        assert!(engine.get_script("a.lua").is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unreachable_socket_script_still_succeeds() {
        let dir = scripts_dir(
            "socket",
            &[(
                "probe.lua",
                r#"
local fd, err = tcp.connect("127.0.0.1", 1, 1)
if fd == nil then
    log("connect failed: " .. err)
end
local n, serr = tcp.send(999, "x")
if n == nil then
    log(serr)
end
"#,
            )],
        );
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        let results = engine.scan_asset(&mut asset, &[]).await;
        assert!(results[0].success);
        assert_eq!(results[0].decision, Decision::Na);
        assert!(results[0].output[0].starts_with("connect failed:"));
        assert!(results[0].output[1].contains("invalid fd 999"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn scan_count_visible_to_script() {
        let dir = scripts_dir("view", &[("a.lua", r#"set_metadata("seen", asset.scan_count)"#)]);
        let engine = engine_for(&dir);
        let mut asset = ip_asset();
        asset.scan_count = 7;
        let results = engine.scan_asset(&mut asset, &[]).await;
        assert_eq!(results[0].metadata["seen"], 7);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn result_ids_are_unique() {
        let a = result_id();
        let b = result_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
