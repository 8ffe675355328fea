//! The `http` table: a bounded HTTP client for script code.
//!
//! ```lua
//! local status, body, headers = http.request("GET", url, body, headers, timeout_sec)
//! local status, body, headers = http.get(url, headers, timeout_sec)
//! local status, body, headers = http.post(url, body, headers, timeout_sec)
//! ```
//!
//! On failure every form returns `nil, err`. Response bodies are capped at
//! 10 MiB; a default `User-Agent` is injected when the caller sets none.

use std::io::Read;
use std::time::Duration;

use mlua::{Lua, Table, Value as LuaValue};

use crate::error::ScriptError;

/// Default per-request deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Response bodies larger than this are truncated, not streamed in full.
const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

const DEFAULT_USER_AGENT: &str = "surfmap-scanner/0.3";

fn parse_timeout(seconds: Option<f64>) -> Duration {
    match seconds {
        Some(s) if s > 0.0 => Duration::from_secs_f64(s),
        _ => DEFAULT_TIMEOUT,
    }
}

/// Flatten an optional Lua table into header pairs.
fn collect_headers(headers: Option<Table>) -> mlua::Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let Some(table) = headers else {
        return Ok(pairs);
    };
    for entry in table.pairs::<String, LuaValue>() {
        let (key, value) = entry?;
        let value = match value {
            LuaValue::String(s) => s.to_string_lossy().to_string(),
            LuaValue::Integer(n) => n.to_string(),
            LuaValue::Number(n) => n.to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            other => format!("{other:?}"),
        };
        pairs.push((key, value));
    }
    Ok(pairs)
}

struct HttpResponse {
    status: u16,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
}

fn do_request(
    method: &str,
    url: &str,
    body: Option<String>,
    headers: &[(String, String)],
    timeout: Duration,
) -> Result<HttpResponse, String> {
    let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| format!("invalid method: {e}"))?;

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| e.to_string())?;

    let mut request = client.request(method, url);
    for (key, value) in headers {
        request = request.header(key, value);
    }
    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("user-agent")) {
        request = request.header("User-Agent", DEFAULT_USER_AGENT);
    }
    if let Some(body) = body {
        request = request.body(body);
    }

    let response = request.send().map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (name.to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
        })
        .collect();

    let mut body = Vec::new();
    response
        .take(MAX_BODY_BYTES)
        .read_to_end(&mut body)
        .map_err(|e| e.to_string())?;

    Ok(HttpResponse { status, body, headers })
}

fn push_response(lua: &Lua, response: HttpResponse) -> mlua::Result<(LuaValue, LuaValue, LuaValue)> {
    let headers = lua.create_table()?;
    for (key, value) in response.headers {
        // Repeated header names collapse to the last value
        headers.set(key, value)?;
    }
    Ok((
        LuaValue::Integer(i64::from(response.status)),
        LuaValue::String(lua.create_string(&response.body)?),
        LuaValue::Table(headers),
    ))
}

fn push_error(lua: &Lua, err: String) -> mlua::Result<(LuaValue, LuaValue, LuaValue)> {
    Ok((LuaValue::Nil, LuaValue::String(lua.create_string(&err)?), LuaValue::Nil))
}

/// Register the `http` table into a Lua state.
pub fn register(lua: &Lua) -> Result<(), ScriptError> {
    let http = lua.create_table()?;

    // http.request(method, url, body?, headers?, timeout_sec?)
    http.set(
        "request",
        lua.create_function(
            |lua,
             (method, url, body, headers, timeout): (
                String,
                String,
                Option<String>,
                Option<Table>,
                Option<f64>,
            )| {
                let headers = collect_headers(headers)?;
                match do_request(&method, &url, body, &headers, parse_timeout(timeout)) {
                    Ok(response) => push_response(lua, response),
                    Err(err) => push_error(lua, err),
                }
            },
        )?,
    )?;

    // http.get(url, headers?, timeout_sec?)
    http.set(
        "get",
        lua.create_function(
            |lua, (url, headers, timeout): (String, Option<Table>, Option<f64>)| {
                let headers = collect_headers(headers)?;
                match do_request("GET", &url, None, &headers, parse_timeout(timeout)) {
                    Ok(response) => push_response(lua, response),
                    Err(err) => push_error(lua, err),
                }
            },
        )?,
    )?;

    // http.post(url, body, headers?, timeout_sec?)
    http.set(
        "post",
        lua.create_function(
            |lua, (url, body, headers, timeout): (String, String, Option<Table>, Option<f64>)| {
                let headers = collect_headers(headers)?;
                match do_request("POST", &url, Some(body), &headers, parse_timeout(timeout)) {
                    Ok(response) => push_response(lua, response),
                    Err(err) => push_error(lua, err),
                }
            },
        )?,
    )?;

    lua.globals().set("http", http)?;
    Ok(())
}
