use std::path::Path;

use surfmap_types::{AssetKind, Script};
use tracing::{debug, warn};

use crate::error::ScriptError;

/// Loads annotated Lua scripts from a directory.
///
/// Metadata lives in leading `--` comment lines as `@key value` directives:
///
/// ```lua
/// -- @title HTTP banner check
/// -- @description Flags services that leak server versions
/// -- @category hygiene
/// -- @asset_types service, ip
/// -- @requires_passed reachability.lua
/// ```
pub struct ScriptLoader {
    scripts_dir: String,
}

impl ScriptLoader {
    pub fn new(scripts_dir: impl Into<String>) -> Self {
        Self { scripts_dir: scripts_dir.into() }
    }

    /// Load every `*.lua` file in the scripts directory. Unreadable files
    /// are skipped with a warning. The returned list fully replaces any
    /// previous script table on reload.
    pub fn load(&self) -> Result<Vec<Script>, ScriptError> {
        let dir = Path::new(&self.scripts_dir);
        if !dir.is_dir() {
            return Err(ScriptError::Load(format!(
                "scripts directory not found: {}",
                self.scripts_dir
            )));
        }

        let mut scripts = Vec::new();
        let entries = std::fs::read_dir(dir)?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lua") {
                continue;
            }
            match load_script(&path) {
                Ok(script) => {
                    debug!(name = %script.name, "loaded script");
                    scripts.push(script);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable script");
                }
            }
        }

        // Deterministic table order regardless of directory iteration
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scripts)
    }
}

fn load_script(path: &Path) -> Result<Script, ScriptError> {
    let content = std::fs::read_to_string(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ScriptError::Load(format!("invalid script filename: {}", path.display())))?
        .to_string();

    let mut script = Script {
        name,
        path: path.display().to_string(),
        title: None,
        description: None,
        category: None,
        author: None,
        version: None,
        asset_types: Vec::new(),
        requires_passed: Vec::new(),
        content,
    };
    parse_directives(&mut script);
    Ok(script)
}

/// Extract `@key value` directives from the script's comment lines.
fn parse_directives(script: &mut Script) {
    let content = script.content.clone();
    for line in content.lines() {
        let line = line.trim();
        let Some(comment) = line.strip_prefix("--") else {
            continue;
        };
        let comment = comment.trim();

        if let Some(value) = comment.strip_prefix("@title ") {
            script.title = Some(value.trim().to_string());
        } else if let Some(value) = comment.strip_prefix("@description ") {
            script.description = Some(value.trim().to_string());
        } else if let Some(value) = comment.strip_prefix("@category ") {
            script.category = Some(value.trim().to_string());
        } else if let Some(value) = comment.strip_prefix("@author ") {
            script.author = Some(value.trim().to_string());
        } else if let Some(value) = comment.strip_prefix("@version ") {
            script.version = Some(value.trim().to_string());
        } else if let Some(value) = comment.strip_prefix("@asset_types ") {
            script.asset_types = value
                .split(',')
                .filter_map(|t| AssetKind::from_str_loose(t.trim()))
                .collect();
        } else if let Some(value) = comment.strip_prefix("@requires_passed ") {
            script.requires_passed = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("surfmap_loader_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn parses_all_directives() {
        let dir = temp_dir("directives");
        fs::write(
            dir.join("banner.lua"),
            r#"-- @title Banner check
-- @description Reads the service banner
-- @category hygiene
-- @author secteam
-- @version 1.2
-- @asset_types service, ip
-- @requires_passed reachability.lua, dns_ok.lua

log("hello")
"#,
        )
        .unwrap();

        let scripts = ScriptLoader::new(dir.to_str().unwrap()).load().unwrap();
        assert_eq!(scripts.len(), 1);
        let script = &scripts[0];
        assert_eq!(script.name, "banner.lua");
        assert_eq!(script.title.as_deref(), Some("Banner check"));
        assert_eq!(script.description.as_deref(), Some("Reads the service banner"));
        assert_eq!(script.category.as_deref(), Some("hygiene"));
        assert_eq!(script.author.as_deref(), Some("secteam"));
        assert_eq!(script.version.as_deref(), Some("1.2"));
        assert_eq!(script.asset_types, vec![AssetKind::Service, AssetKind::Ip]);
        assert_eq!(script.requires_passed, vec!["reachability.lua", "dns_ok.lua"]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn no_directives_yields_defaults() {
        let dir = temp_dir("bare");
        fs::write(dir.join("bare.lua"), "pass()\n").unwrap();

        let scripts = ScriptLoader::new(dir.to_str().unwrap()).load().unwrap();
        let script = &scripts[0];
        assert!(script.title.is_none());
        assert!(script.asset_types.is_empty());
        assert!(script.requires_passed.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn non_lua_files_ignored() {
        let dir = temp_dir("mixed");
        fs::write(dir.join("notes.txt"), "not a script").unwrap();
        fs::write(dir.join("check.lua"), "-- @title c\npass()").unwrap();

        let scripts = ScriptLoader::new(dir.to_str().unwrap()).load().unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].name, "check.lua");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_errors() {
        let loader = ScriptLoader::new("/nonexistent/surfmap/scripts");
        assert!(matches!(loader.load(), Err(ScriptError::Load(_))));
    }

    #[test]
    fn scripts_sorted_by_name() {
        let dir = temp_dir("sorted");
        fs::write(dir.join("zz.lua"), "pass()").unwrap();
        fs::write(dir.join("aa.lua"), "pass()").unwrap();

        let scripts = ScriptLoader::new(dir.to_str().unwrap()).load().unwrap();
        assert_eq!(scripts[0].name, "aa.lua");
        assert_eq!(scripts[1].name, "zz.lua");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_asset_types_dropped() {
        let dir = temp_dir("unknown_kinds");
        fs::write(dir.join("x.lua"), "-- @asset_types service, widget\npass()").unwrap();

        let scripts = ScriptLoader::new(dir.to_str().unwrap()).load().unwrap();
        assert_eq!(scripts[0].asset_types, vec![AssetKind::Service]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn directives_after_code_still_parse() {
        let dir = temp_dir("late");
        fs::write(dir.join("x.lua"), "log(\"hi\")\n-- @title Late\n").unwrap();
        let scripts = ScriptLoader::new(dir.to_str().unwrap()).load().unwrap();
        assert_eq!(scripts[0].title.as_deref(), Some("Late"));
        let _ = fs::remove_dir_all(&dir);
    }
}
