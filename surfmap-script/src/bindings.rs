//! Host functions exposed to script code and the read-only `asset` view.
//!
//! All side effects of one execution (output lines, metadata, verdicts,
//! tags) accumulate in an [`ExecSink`] owned by that execution alone, and
//! are attributed to its result atomically when the script finishes.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mlua::{Lua, Value as LuaValue};
use serde_json::{Map, Value, json};
use surfmap_types::{Asset, Decision};
use tracing::debug;

use crate::error::ScriptError;

/// Side effects of a single script execution.
#[derive(Debug, Default)]
pub struct ExecSink {
    pub output: Vec<String>,
    pub metadata: Map<String, Value>,
    pub decision: Option<Decision>,
    pub tags: Vec<String>,
}

impl ExecSink {
    /// Record a checklist verdict under `metadata.checklist_results`.
    /// Final write wins within one execution.
    fn record_checklist(&mut self, item_id: &str, status: &str, reason: &str) {
        let results = self
            .metadata
            .entry("checklist_results")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(map) = results.as_object_mut() {
            map.insert(item_id.to_string(), json!({"status": status, "reason": reason}));
        }
    }

    /// Idempotent set-insert; mirrors `Asset::add_tag`.
    fn add_tag(&mut self, tag: &str) {
        if !tag.is_empty() && !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }
}

pub type SharedSink = Arc<Mutex<ExecSink>>;

fn lock(sink: &SharedSink) -> mlua::Result<MutexGuard<'_, ExecSink>> {
    sink.lock()
        .map_err(|_| mlua::Error::RuntimeError("execution sink poisoned".into()))
}

/// Register the verdict/logging/tagging API plus the `asset` global.
pub fn register_bindings(lua: &Lua, asset: &Asset, sink: SharedSink) -> Result<(), ScriptError> {
    register_core(lua, sink)?;
    set_asset_global(lua, asset)?;
    crate::netlib::register(lua)?;
    crate::httplib::register(lua)?;
    Ok(())
}

fn register_core(lua: &Lua, sink: SharedSink) -> Result<(), ScriptError> {
    let globals = lua.globals();

    // log(msg) appends to the result output and the host log
    let log_sink = sink.clone();
    globals.set(
        "log",
        lua.create_function(move |_, msg: String| {
            debug!(target: "script", "{msg}");
            lock(&log_sink)?.output.push(msg);
            Ok(())
        })?,
    )?;

    // sleep(sec) suspends the current execution
    globals.set(
        "sleep",
        lua.create_function(|_, seconds: f64| {
            if seconds > 0.0 {
                std::thread::sleep(Duration::from_secs_f64(seconds));
            }
            Ok(())
        })?,
    )?;

    // set_metadata(k, v) with basic type coercion; last write wins
    let meta_sink = sink.clone();
    globals.set(
        "set_metadata",
        lua.create_function(move |lua, (key, value): (String, LuaValue)| {
            let coerced = coerce_lua_value(lua, value)?;
            lock(&meta_sink)?.metadata.insert(key, coerced);
            Ok(())
        })?,
    )?;

    // add_tag(tag): idempotent set-insert, merged into the asset afterwards
    let tag_sink = sink.clone();
    globals.set(
        "add_tag",
        lua.create_function(move |_, tag: String| {
            lock(&tag_sink)?.add_tag(&tag);
            Ok(())
        })?,
    )?;

    // pass() / reject(reason?) set the final decision
    let pass_sink = sink.clone();
    globals.set(
        "pass",
        lua.create_function(move |_, ()| {
            lock(&pass_sink)?.decision = Some(Decision::Pass);
            Ok(())
        })?,
    )?;

    let reject_sink = sink.clone();
    globals.set(
        "reject",
        lua.create_function(move |_, reason: Option<String>| {
            let mut sink = lock(&reject_sink)?;
            sink.decision = Some(Decision::Reject);
            if let Some(reason) = reason {
                sink.metadata.insert("reject_reason".into(), Value::String(reason));
            }
            Ok(())
        })?,
    )?;

    // pass_checklist / fail_checklist / na_checklist record per-item verdicts
    for (name, status, label) in [
        ("pass_checklist", "yes", "Passed"),
        ("fail_checklist", "no", "Failed"),
        ("na_checklist", "na", "N/A"),
    ] {
        let checklist_sink = sink.clone();
        globals.set(
            name,
            lua.create_function(move |_, (item_id, reason): (String, Option<String>)| {
                let mut sink = lock(&checklist_sink)?;
                if item_id.is_empty() {
                    sink.output.push(format!("Error: {label} checklist requires an item id"));
                    return Ok(());
                }
                let reason = reason.unwrap_or_default();
                sink.record_checklist(&item_id, status, &reason);
                sink.output.push(format!("{label} checklist: {item_id}"));
                if !reason.is_empty() {
                    sink.output.push(format!("Reason: {reason}"));
                }
                Ok(())
            })?,
        )?;
    }

    Ok(())
}

/// Coerce a Lua value into the metadata bag's JSON model: string, number,
/// bool, or the `tostring` form of anything else. The fallback is
/// idempotent (stringifying a string returns it unchanged).
fn coerce_lua_value(lua: &Lua, value: LuaValue) -> mlua::Result<Value> {
    Ok(match value {
        LuaValue::String(s) => Value::String(s.to_string_lossy().to_string()),
        LuaValue::Integer(n) => json!(n),
        LuaValue::Number(n) => json!(n),
        LuaValue::Boolean(b) => Value::Bool(b),
        other => {
            let tostring: mlua::Function = lua.globals().get("tostring")?;
            Value::String(tostring.call::<String>(other)?)
        }
    })
}

/// Build the read-only `asset` global: id, type, value, status, scan_count,
/// properties, dns_records and tags.
fn set_asset_global(lua: &Lua, asset: &Asset) -> Result<(), ScriptError> {
    let table = lua.create_table()?;
    table.set("id", asset.id.as_str())?;
    table.set("type", asset.kind.to_string())?;
    table.set("value", asset.value.as_str())?;
    table.set("status", asset.status.to_string())?;
    table.set("scan_count", asset.scan_count)?;

    if !asset.properties.is_empty() {
        let props = lua.create_table()?;
        for (key, value) in &asset.properties {
            match value {
                Value::String(s) => props.set(key.as_str(), s.as_str())?,
                Value::Number(n) => props.set(key.as_str(), n.as_f64().unwrap_or(0.0))?,
                Value::Bool(b) => props.set(key.as_str(), *b)?,
                other => props.set(key.as_str(), other.to_string())?,
            }
        }
        table.set("properties", props)?;
    }

    if let Some(ref records) = asset.dns_records {
        let dns = lua.create_table()?;
        for (field, list) in [
            ("a", &records.a),
            ("aaaa", &records.aaaa),
            ("cname", &records.cname),
            ("mx", &records.mx),
            ("txt", &records.txt),
            ("ns", &records.ns),
            ("soa", &records.soa),
            ("ptr", &records.ptr),
        ] {
            if !list.is_empty() {
                let entries = lua.create_table()?;
                for (i, record) in list.iter().enumerate() {
                    entries.set(i + 1, record.as_str())?;
                }
                dns.set(field, entries)?;
            }
        }
        table.set("dns_records", dns)?;
    }

    if !asset.tags.is_empty() {
        let tags = lua.create_table()?;
        for (i, tag) in asset.tags.iter().enumerate() {
            tags.set(i + 1, tag.as_str())?;
        }
        table.set("tags", tags)?;
    }

    lua.globals().set("asset", table)?;
    Ok(())
}
