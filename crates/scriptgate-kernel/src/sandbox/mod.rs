//! Capability-limited Luau environment for one script run.
//!
//! The VM loads only the pure libraries (`string`, `table`, `math`, `utf8`,
//! `bit32`, `coroutine`) plus base functions, with the loaders removed.
//! On top of that the script sees exactly:
//!
//! ```text
//! sdk.<api>.<fn>(...)   backend calls through the dispatch bridge
//! sdk.<fn>(...)         default-API REST functions, bare
//! json.encode / decode
//! print(...)            captured into the run's log buffer
//! file.save(name, s)    only when output is enabled
//! ```
//!
//! Every library table and the globals are frozen read-only. The script runs
//! in its own environment table, so its global assignments stay local to it.
//! Reading one of the well-known host capability names (`io`, `os`, ...)
//! records a sandbox violation on the context; the name itself was never
//! bound.

pub mod convert;

use std::sync::Arc;

use mlua::{Function, Lua, LuaOptions, MultiValue, StdLib, Table, Value, VmState};
use serde_json::Value as JsonValue;
use tokio::runtime::Handle;

use scriptgate_types::{DispatchError, FunctionEntry, FunctionSource, UpstreamError};

use crate::dispatch::{CallArgs, DispatchBridge};
use crate::executor::{ExecutionContext, ExecutionError};

/// Host capability names whose lookup counts as a violation.
pub const FORBIDDEN_GLOBALS: &[&str] = &[
    "io",
    "os",
    "debug",
    "package",
    "require",
    "dofile",
    "loadfile",
    "load",
    "loadstring",
    "getfenv",
    "setfenv",
    "ffi",
    "jit",
    "socket",
    "http",
    "net",
    "process",
    "collectgarbage",
];

/// Base functions removed after the VM is created.
const REMOVED_GLOBALS: &[&str] = &[
    "require",
    "load",
    "loadstring",
    "dofile",
    "loadfile",
    "getfenv",
    "setfenv",
    "collectgarbage",
];

/// Wraps a `(ok, value)` Rust callback so failures are raised as Lua error
/// values. Errors raised from Rust reach `pcall` as opaque userdata with a
/// traceback; this lets scripts receive a table with `status`/`body`/`message`
/// or a plain message instead. Fatal aborts still raise from Rust.
const RAISE_SHIM: &str = r#"
local raw = ...
return function(...)
    local ok, value = raw(...)
    if ok then
        return value
    end
    error(value, 2)
end
"#;

const ERROR_META: &str = r#"
return {
    __tostring = function(err)
        return err.message
    end,
}
"#;

/// A fresh VM with the run's bindings installed.
pub struct Sandbox {
    lua: Lua,
    env: Table,
}

impl Sandbox {
    pub fn new(
        ctx: Arc<ExecutionContext>,
        bridge: Arc<DispatchBridge>,
        runtime: Handle,
        memory_limit: Option<usize>,
    ) -> mlua::Result<Self> {
        let libs = StdLib::STRING
            | StdLib::TABLE
            | StdLib::MATH
            | StdLib::UTF8
            | StdLib::BIT
            | StdLib::COROUTINE;
        let lua = Lua::new_with(libs, LuaOptions::default())?;
        if let Some(limit) = memory_limit {
            lua.set_memory_limit(limit)?;
        }

        let globals = lua.globals();
        for name in REMOVED_GLOBALS {
            globals.raw_set(*name, Value::Nil)?;
        }

        let bindings = Bindings {
            raise: lua.load(RAISE_SHIM).set_name("=raise").into_function()?,
            error_meta: lua.load(ERROR_META).set_name("=error").eval()?,
            ctx: Arc::clone(&ctx),
            bridge,
            runtime,
        };

        globals.raw_set("print", bindings.print(&lua)?)?;
        globals.raw_set("json", json_table(&lua)?)?;
        globals.raw_set("sdk", bindings.sdk(&lua)?)?;
        if ctx.has_output() {
            globals.raw_set("file", bindings.file(&lua)?)?;
        }

        freeze_libraries(&globals)?;
        install_violation_hook(&lua, &globals, &ctx)?;
        globals.set_readonly(true);

        let env = lua.create_table()?;
        let env_meta = lua.create_table()?;
        env_meta.raw_set("__index", globals)?;
        env.set_metatable(Some(env_meta));

        let interrupt_ctx = Arc::clone(&ctx);
        lua.set_interrupt(move |_| {
            interrupt_ctx
                .check_live()
                .map(|()| VmState::Continue)
                .map_err(raise)
        });

        Ok(Self { lua, env })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Compile and run the script, converting its return value to JSON.
    pub fn run(&self, script: &str) -> Result<JsonValue, ExecutionError> {
        let value = self
            .lua
            .load(script)
            .set_name("=script")
            .set_environment(self.env.clone())
            .eval::<Value>()
            .map_err(|e| ExecutionError::Script(error_message(&e)))?;
        convert::lua_to_json(&self.lua, value).map_err(|e| {
            ExecutionError::Script(format!("cannot convert return value: {}", error_message(&e)))
        })
    }
}

/// Shared pieces every binding closes over.
struct Bindings {
    raise: Function,
    error_meta: Table,
    ctx: Arc<ExecutionContext>,
    bridge: Arc<DispatchBridge>,
    runtime: Handle,
}

impl Bindings {
    fn print(&self, lua: &Lua) -> mlua::Result<Function> {
        let ctx = Arc::clone(&self.ctx);
        lua.create_function(move |_, args: MultiValue| {
            let parts = args
                .iter()
                .map(Value::to_string)
                .collect::<mlua::Result<Vec<_>>>()?;
            ctx.log(parts.join("\t"));
            Ok(())
        })
    }

    /// `sdk` with one table per API, plus bare names for the default API.
    fn sdk(&self, lua: &Lua) -> mlua::Result<Table> {
        let sdk = lua.create_table()?;
        let registry = self.bridge.registry();
        for (api, _) in registry.api_names() {
            sdk.raw_set(api, lua.create_table()?)?;
        }
        for entry in registry.entries() {
            let function = self.call(lua, &entry.qualified_name)?;
            let api_table: Table = sdk.raw_get(entry.api_name.as_str())?;
            api_table.raw_set(entry.name.as_str(), function.clone())?;
            if entry.is_bare() && entry.source == FunctionSource::Rest {
                sdk.raw_set(entry.name.as_str(), function)?;
            }
        }
        Ok(sdk)
    }

    /// One backend-bound callable.
    fn call(&self, lua: &Lua, qualified: &str) -> mlua::Result<Function> {
        let ctx = Arc::clone(&self.ctx);
        let bridge = Arc::clone(&self.bridge);
        let runtime = self.runtime.clone();
        let error_meta = self.error_meta.clone();
        let qualified = qualified.to_string();

        let raw = lua.create_function(move |lua, args: MultiValue| {
            ctx.check_live().map_err(raise)?;
            let Some(entry) = bridge.registry().get(&qualified) else {
                return Ok((false, text_value(lua, &format!("unknown function: {qualified}"))?));
            };
            let values = match args
                .into_iter()
                .map(|v| convert::lua_to_json(lua, v))
                .collect::<mlua::Result<Vec<_>>>()
            {
                Ok(values) => values,
                Err(e) => {
                    let message = format!("{qualified}: cannot convert argument: {}", error_message(&e));
                    return Ok((false, text_value(lua, &message)?));
                }
            };
            // Rejected arguments never reach a backend and cost no budget.
            let call = match bridge.prepare(&qualified, CallArgs::from_values(entry, values)) {
                Ok(call) => call,
                Err(e) => return Ok((false, dispatch_error_value(lua, &error_meta, entry, e)?)),
            };

            ctx.reserve_call().map_err(raise)?;
            let send = bridge.send(call, ctx.credentials());
            // The timer must be created inside the runtime.
            let outcome = runtime.block_on(async { tokio::time::timeout(ctx.remaining(), send).await });
            match outcome {
                Err(_elapsed) => Err(raise(ctx.abort(ctx.timeout_error()))),
                Ok(Ok(value)) => Ok((true, convert::json_to_lua(lua, &value)?)),
                Ok(Err(e)) => {
                    tracing::debug!(function = %qualified, error = %e, "backend call failed");
                    Ok((false, dispatch_error_value(lua, &error_meta, entry, e)?))
                }
            }
        })?;
        self.raise.call(raw)
    }

    fn file(&self, lua: &Lua) -> mlua::Result<Table> {
        let ctx = Arc::clone(&self.ctx);
        let save = lua.create_function(move |lua, (name, content): (String, Value)| {
            let bytes = match &content {
                Value::String(s) => s.as_bytes().to_vec(),
                Value::Nil => return Ok((false, text_value(lua, "file.save: content is nil")?)),
                other => {
                    let json = convert::lua_to_json(lua, other.clone())?;
                    serde_json::to_vec_pretty(&json).map_err(mlua::Error::external)?
                }
            };
            let Some(result) = ctx.save(&name, &bytes) else {
                return Ok((false, text_value(lua, "file output is disabled")?));
            };
            match result {
                Ok(path) => Ok((true, Value::String(lua.create_string(path.to_string_lossy().as_bytes())?))),
                Err(e) => Ok((false, text_value(lua, &e.to_string())?)),
            }
        })?;

        let file = lua.create_table()?;
        file.raw_set("save", self.raise.call::<Function>(save)?)?;
        Ok(file)
    }
}

fn json_table(lua: &Lua) -> mlua::Result<Table> {
    let json = lua.create_table()?;
    json.raw_set(
        "encode",
        lua.create_function(|lua, (value, pretty): (Value, Option<bool>)| {
            let json = convert::lua_to_json(lua, value)?;
            let text = if pretty.unwrap_or(false) {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            text.map_err(|e| mlua::Error::RuntimeError(format!("json.encode: {e}")))
        })?,
    )?;
    json.raw_set(
        "decode",
        lua.create_function(|lua, text: String| {
            let value: JsonValue = serde_json::from_str(&text)
                .map_err(|e| mlua::Error::RuntimeError(format!("json.decode: {e}")))?;
            convert::json_to_lua(lua, &value)
        })?,
    )?;
    Ok(json)
}

fn text_value(lua: &Lua, text: &str) -> mlua::Result<Value> {
    lua.create_string(text).map(Value::String)
}

/// What a script's `pcall` receives when a call does not produce a value.
///
/// Backend failures are error tables. Tool calls rejected during binding
/// are reported in the same table shape as a tool that raised an error;
/// rejected REST calls are a plain message.
fn dispatch_error_value(
    lua: &Lua,
    meta: &Table,
    entry: &FunctionEntry,
    error: DispatchError,
) -> mlua::Result<Value> {
    let upstream = match error {
        DispatchError::Upstream(e) => e,
        other if entry.source == FunctionSource::Tool => {
            UpstreamError::tool(&entry.qualified_name, other.to_string())
        }
        other => return text_value(lua, &other.to_string()),
    };
    upstream_table(lua, meta, &upstream).map(Value::Table)
}

/// Error value scripts receive for a failed backend call.
fn upstream_table(lua: &Lua, meta: &Table, error: &UpstreamError) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.raw_set("message", error.message.as_str())?;
    table.raw_set("body", error.body.as_str())?;
    table.raw_set("source", error.source_kind.as_str())?;
    if let Some(status) = error.status {
        table.raw_set("status", status)?;
    }
    table.set_metatable(Some(meta.clone()));
    Ok(table)
}

fn freeze_libraries(globals: &Table) -> mlua::Result<()> {
    for name in ["string", "table", "math", "utf8", "bit32", "coroutine", "json", "file", "sdk"] {
        let Value::Table(lib) = globals.raw_get::<Value>(name)? else {
            continue;
        };
        if name == "sdk" {
            for pair in lib.clone().pairs::<Value, Value>() {
                if let (_, Value::Table(api)) = pair? {
                    api.set_readonly(true);
                }
            }
        }
        lib.set_readonly(true);
    }
    Ok(())
}

/// Classify lookups of missing globals. Unknown names read as `nil`.
fn install_violation_hook(lua: &Lua, globals: &Table, ctx: &Arc<ExecutionContext>) -> mlua::Result<()> {
    let ctx = Arc::clone(ctx);
    let index = lua.create_function(move |_, (_table, key): (Value, Value)| {
        if let Value::String(key) = &key {
            let key: String = key.to_string_lossy().into();
            if FORBIDDEN_GLOBALS.contains(&key.as_str()) {
                tracing::debug!(name = %key, "script touched a host capability");
                return Err(raise(ctx.abort(ExecutionError::SandboxViolation(key))));
            }
        }
        Ok(Value::Nil)
    })?;
    let meta = lua.create_table()?;
    meta.raw_set("__index", index)?;
    meta.set_readonly(true);
    globals.set_metatable(Some(meta));
    Ok(())
}

fn raise(error: ExecutionError) -> mlua::Error {
    mlua::Error::RuntimeError(error.to_string())
}

/// Innermost human-readable message of an mlua error.
pub fn error_message(error: &mlua::Error) -> String {
    match error {
        mlua::Error::CallbackError { cause, .. } => error_message(cause),
        mlua::Error::WithContext { cause, .. } => error_message(cause),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::MemoryError(_) => "memory limit exceeded".to_string(),
        other => other.to_string(),
    }
}
