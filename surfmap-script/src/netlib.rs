//! The `tcp` table: a minimal TCP client for script code.
//!
//! ```lua
//! local fd, err = tcp.connect(host, port, timeout_sec)
//! local n, err = tcp.send(fd, data)
//! local data, err = tcp.recv(fd, max_bytes, timeout_sec)
//! tcp.close(fd)
//! ```
//!
//! Connections are registered per-VM; when the Lua state is torn down the
//! registry drops with it and every remaining socket closes, panic or not.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mlua::{Lua, Value as LuaValue};

use crate::error::ScriptError;

/// Default connect/read timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound a single `recv` may request (10 MB).
const MAX_RECV_BYTES: usize = 10 * 1024 * 1024;

#[derive(Default)]
struct ConnRegistry {
    next_fd: i64,
    conns: HashMap<i64, TcpStream>,
}

impl ConnRegistry {
    fn store(&mut self, stream: TcpStream) -> i64 {
        self.next_fd += 1;
        self.conns.insert(self.next_fd, stream);
        self.next_fd
    }
}

fn invalid_fd(fd: i64) -> String {
    format!("tcp: invalid fd {fd}")
}

fn parse_timeout(seconds: Option<f64>) -> Duration {
    match seconds {
        Some(s) if s > 0.0 => Duration::from_secs_f64(s),
        _ => DEFAULT_TIMEOUT,
    }
}

/// Register the `tcp` table into a Lua state.
pub fn register(lua: &Lua) -> Result<(), ScriptError> {
    let registry = Arc::new(Mutex::new(ConnRegistry { next_fd: 0, conns: HashMap::new() }));

    let tcp = lua.create_table()?;

    // tcp.connect(host, port, timeout_sec?) -> fd | nil, err
    let connect_reg = registry.clone();
    tcp.set(
        "connect",
        lua.create_function(
            move |_, (host, port, timeout): (String, LuaValue, Option<f64>)| {
                let port = match port {
                    LuaValue::Integer(n) => n.to_string(),
                    LuaValue::Number(n) => (n as i64).to_string(),
                    LuaValue::String(s) => s.to_string_lossy().to_string(),
                    _ => {
                        return Ok((
                            LuaValue::Nil,
                            Some("tcp.connect: port must be number or string".to_string()),
                        ));
                    }
                };
                let timeout = parse_timeout(timeout);

                let addr_str = format!("{host}:{port}");
                let addr = match addr_str.to_socket_addrs() {
                    Ok(mut addrs) => match addrs.next() {
                        Some(addr) => addr,
                        None => {
                            return Ok((LuaValue::Nil, Some(format!("no addresses for {addr_str}"))));
                        }
                    },
                    Err(e) => return Ok((LuaValue::Nil, Some(format!("resolve failed: {e}")))),
                };

                match TcpStream::connect_timeout(&addr, timeout) {
                    Ok(stream) => {
                        let _ = stream.set_read_timeout(Some(timeout));
                        let _ = stream.set_write_timeout(Some(timeout));
                        let fd = connect_reg
                            .lock()
                            .map_err(|_| mlua::Error::RuntimeError("socket registry poisoned".into()))?
                            .store(stream);
                        Ok((LuaValue::Integer(fd), None))
                    }
                    Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
                }
            },
        )?,
    )?;

    // tcp.send(fd, data) -> bytes_sent | nil, err
    let send_reg = registry.clone();
    tcp.set(
        "send",
        lua.create_function(move |_, (fd, data): (i64, mlua::String)| {
            let mut reg = send_reg
                .lock()
                .map_err(|_| mlua::Error::RuntimeError("socket registry poisoned".into()))?;
            let Some(stream) = reg.conns.get_mut(&fd) else {
                return Ok((LuaValue::Nil, Some(invalid_fd(fd))));
            };
            let bytes = data.as_bytes();
            match stream.write_all(&bytes) {
                Ok(()) => Ok((LuaValue::Integer(bytes.len() as i64), None)),
                Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
            }
        })?,
    )?;

    // tcp.recv(fd, max_bytes, timeout_sec?) -> data | nil, err
    // A timeout yields an empty payload rather than an error.
    let recv_reg = registry.clone();
    tcp.set(
        "recv",
        lua.create_function(
            move |lua, (fd, max_bytes, timeout): (i64, i64, Option<f64>)| {
                if max_bytes <= 0 || max_bytes as usize > MAX_RECV_BYTES {
                    return Ok((LuaValue::Nil, Some("tcp.recv: max_bytes out of range".to_string())));
                }
                let mut reg = recv_reg
                    .lock()
                    .map_err(|_| mlua::Error::RuntimeError("socket registry poisoned".into()))?;
                let Some(stream) = reg.conns.get_mut(&fd) else {
                    return Ok((LuaValue::Nil, Some(invalid_fd(fd))));
                };

                let _ = stream.set_read_timeout(Some(parse_timeout(timeout)));
                let mut buf = vec![0u8; max_bytes as usize];
                match stream.read(&mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        Ok((LuaValue::String(lua.create_string(&buf)?), None))
                    }
                    Err(ref e)
                        if e.kind() == std::io::ErrorKind::TimedOut
                            || e.kind() == std::io::ErrorKind::WouldBlock =>
                    {
                        Ok((LuaValue::String(lua.create_string("")?), None))
                    }
                    Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
                }
            },
        )?,
    )?;

    // tcp.close(fd) -> true | nil, err
    let close_reg = registry.clone();
    tcp.set(
        "close",
        lua.create_function(move |_, fd: i64| {
            let mut reg = close_reg
                .lock()
                .map_err(|_| mlua::Error::RuntimeError("socket registry poisoned".into()))?;
            match reg.conns.remove(&fd) {
                Some(_stream) => Ok((LuaValue::Boolean(true), None)),
                None => Ok((LuaValue::Nil, Some(invalid_fd(fd)))),
            }
        })?,
    )?;

    lua.globals().set("tcp", tcp)?;
    Ok(())
}
