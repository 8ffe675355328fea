use mlua::{Lua, StdLib, Value};

use crate::error::ScriptError;

/// Maximum memory a script can allocate (50 MB).
const MEMORY_LIMIT: usize = 50 * 1024 * 1024;

/// Maximum number of Lua VM instructions before a script is killed.
const INSTRUCTION_LIMIT: u32 = 10_000_000;

/// A sandboxed Lua environment that restricts dangerous operations.
///
/// Each script execution gets its own sandbox; no state is shared between
/// executions. Host-owned handles registered into the state (sockets) are
/// torn down with it.
pub struct LuaSandbox {
    lua: Lua,
}

impl LuaSandbox {
    pub fn new() -> Result<Self, ScriptError> {
        // Load only safe standard libraries
        let libs = StdLib::STRING
            | StdLib::TABLE
            | StdLib::MATH
            | StdLib::COROUTINE
            | StdLib::OS
            | StdLib::UTF8;

        let lua = Lua::new_with(libs, mlua::LuaOptions::default())
            .map_err(|e| ScriptError::Sandbox(format!("failed to create Lua state: {e}")))?;

        let _ = lua.set_memory_limit(MEMORY_LIMIT);
        remove_dangerous_functions(&lua)?;

        Ok(Self { lua })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Execute a script chunk under the instruction limit.
    pub fn execute(&self, code: &str, chunk_name: &str) -> Result<(), ScriptError> {
        self.lua.set_hook(
            mlua::HookTriggers::new().every_nth_instruction(INSTRUCTION_LIMIT),
            |_lua, _debug| {
                Err(mlua::Error::RuntimeError(
                    "script exceeded instruction limit".into(),
                ))
            },
        );

        let result = self
            .lua
            .load(code)
            .set_name(chunk_name)
            .exec()
            .map_err(|e| ScriptError::Lua(e.to_string()));

        self.lua.remove_hook();
        result
    }
}

/// Remove functions that would let a script escape the sandbox.
fn remove_dangerous_functions(lua: &Lua) -> Result<(), ScriptError> {
    let globals = lua.globals();

    // loadfile/dofile read arbitrary files; load executes arbitrary chunks;
    // require would reach for the package system; raw* and *metatable
    // bypass metamethod-based containment.
    let dangerous_globals = [
        "loadfile",
        "dofile",
        "load",
        "require",
        "rawget",
        "rawset",
        "getmetatable",
        "setmetatable",
    ];
    for name in &dangerous_globals {
        globals
            .set(*name, Value::Nil)
            .map_err(|e| ScriptError::Sandbox(format!("failed to remove {name}: {e}")))?;
    }

    // Keep the clock functions (os.time, os.clock, os.date, os.difftime),
    // drop everything that touches the host.
    let os_table: mlua::Table = globals
        .get("os")
        .map_err(|e| ScriptError::Sandbox(format!("os table not found: {e}")))?;
    let dangerous_os = ["execute", "remove", "rename", "exit", "tmpname", "getenv", "setlocale"];
    for name in &dangerous_os {
        os_table
            .set(*name, Value::Nil)
            .map_err(|e| ScriptError::Sandbox(format!("failed to remove os.{name}: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str) -> Result<(), ScriptError> {
        let sandbox = LuaSandbox::new().unwrap();
        sandbox.execute(code, "test")
    }

    #[test]
    fn basic_lua_runs() {
        run("local x = 1 + 2").unwrap();
    }

    #[test]
    fn string_table_math_available() {
        run(r#"
            local s = string.upper("hi")
            local t = {3, 1, 2}
            table.sort(t)
            local f = math.floor(3.7)
        "#)
        .unwrap();
    }

    #[test]
    fn os_time_available() {
        run("local t = os.time()").unwrap();
    }

    #[test]
    fn os_execute_blocked() {
        assert!(run(r#"os.execute("echo hi")"#).is_err());
    }

    #[test]
    fn os_remove_blocked() {
        assert!(run(r#"os.remove("/tmp/x")"#).is_err());
    }

    #[test]
    fn loadfile_blocked() {
        assert!(run(r#"loadfile("/etc/passwd")()"#).is_err());
    }

    #[test]
    fn load_blocked() {
        assert!(run(r#"load("return 1")()"#).is_err());
    }

    #[test]
    fn require_blocked() {
        assert!(run(r#"require("io")"#).is_err());
    }

    #[test]
    fn metatable_manipulation_blocked() {
        assert!(run(r#"setmetatable({}, {})"#).is_err());
        assert!(run(r#"local m = getmetatable("")"#).is_err());
    }

    #[test]
    fn io_library_absent() {
        assert!(run(r#"io.open("/etc/passwd")"#).is_err());
    }

    #[test]
    fn memory_limit_enforced() {
        let result = run(r#"
            local s = "x"
            for i = 1, 30 do
                s = s .. s
            end
        "#);
        assert!(result.is_err());
    }

    #[test]
    fn instruction_limit_enforced() {
        let result = run("while true do end");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("instruction limit"));
    }

    #[test]
    fn chunk_name_appears_in_errors() {
        let err = run("error('kaboom')").unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }
}
