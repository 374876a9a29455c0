//! The sandboxed script host.
//!
//! Scripts run in a fresh Lua interpreter with only the package loader,
//! base, table, math, and string libraries enabled — no I/O, no OS access.
//! A `tables` module exposes the `roll`, `pick`, `dice`, and `concat`
//! intrinsics backed by a point-in-time catalog snapshot. Scripts declare
//! an optional `params` table, define a `main` function, and report through
//! a `results` table; every failure mode is returned to the caller as a
//! single-entry `Script-Error` map rather than an error value.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mlua::{Function, Lua, LuaOptions, MultiValue, StdLib, Table as LuaTable, Value};
use tracing::{debug, warn};

use crate::core::catalog::{CatalogError, CatalogSnapshot};
use crate::core::dice::SENTINEL_BAD_DICE;
use crate::core::expand;
use crate::schema::param::{default_param_values, ParamCallback, ParamSpec};

/// Name of the function every script must define.
pub const SCRIPT_MAIN_FN: &str = "main";
/// Global a script sets to request caller-chosen parameters.
pub const SCRIPT_PARAMS_GLOBAL: &str = "params";
/// Global a script fills with its output map.
pub const SCRIPT_RESULTS_GLOBAL: &str = "results";
/// Key of the single-entry map returned for any script failure.
pub const SCRIPT_ERROR_KEY: &str = "Script-Error";

/// Longest the host waits for a parameter callback before falling back to
/// the declared defaults. A reply arriving later is discarded.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// A fresh interpreter with the sandbox whitelist. The base library is
/// always present; everything else stays off.
fn new_sandbox() -> mlua::Result<Lua> {
    Lua::new_with(
        StdLib::PACKAGE | StdLib::TABLE | StdLib::MATH | StdLib::STRING,
        LuaOptions::default(),
    )
}

/// Compile a script in a throwaway sandbox, returning its stripped
/// bytecode. Used at ingest time so broken scripts are rejected before
/// they are stored.
pub(crate) fn compile(source: &str) -> mlua::Result<Vec<u8>> {
    let lua = new_sandbox()?;
    let func = lua.load(source).into_function()?;
    Ok(func.dump(true))
}

/// Execute a stored script against a catalog snapshot.
pub(crate) fn execute_script(
    name: &str,
    snapshot: CatalogSnapshot,
    callback: Option<ParamCallback>,
) -> HashMap<String, String> {
    let snapshot = Arc::new(snapshot);
    let Some(record) = snapshot.scripts.get(name).cloned() else {
        return error_map(CatalogError::ScriptNotFound(name.to_string()).to_string());
    };
    debug!(script = name, bytes = record.bytecode.len(), "executing script");

    let lua = match new_sandbox() {
        Ok(lua) => lua,
        Err(e) => return error_map(format!("failed to initialize script runtime: {e}")),
    };
    if let Err(e) = install_tables_module(&lua, &snapshot) {
        return error_map(format!("failed to initialize script runtime: {e}"));
    }

    // Evaluate the body once at top level; this lets the script set its
    // `params` and `results` globals.
    if let Err(e) = lua.load(record.source.as_str()).set_name(name).exec() {
        return error_map(format!("failed to execute compiled script: {e}"));
    }

    let params_value = lua
        .globals()
        .get::<Value>(SCRIPT_PARAMS_GLOBAL)
        .unwrap_or(Value::Nil);

    let main_result = if let Value::Table(params_table) = params_value {
        let specs = specs_from_table(params_table);
        let chosen = elicit_params(specs, callback);
        match chosen_to_table(&lua, chosen) {
            Ok(arg) => call_main(&lua, Some(arg)),
            Err(e) => Err(e),
        }
    } else {
        call_main(&lua, None)
    };
    if let Err(e) = main_result {
        return error_map(format!("executing main(): {e}"));
    }

    match lua.globals().get::<Value>(SCRIPT_RESULTS_GLOBAL) {
        Ok(Value::Table(results)) => lua_table_to_map(results),
        _ => error_map(format!(
            "missing the required execution results table: '{SCRIPT_RESULTS_GLOBAL}'"
        )),
    }
}

fn call_main(lua: &Lua, arg: Option<LuaTable>) -> mlua::Result<()> {
    let main: Function = lua.globals().get(SCRIPT_MAIN_FN)?;
    match arg {
        Some(table) => main.call::<()>(table),
        None => main.call::<()>(()),
    }
}

/// Translate the script's `params` global into specs, ordered by name so
/// the callback sees a stable request.
fn specs_from_table(table: LuaTable) -> Vec<ParamSpec> {
    let mut specs = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        let Ok((key, value)) = pair else { continue };
        specs.push(ParamSpec::from_options(
            lua_display(&key),
            &lua_display(&value),
        ));
    }
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    specs
}

/// Ask the callback for parameter values, bounded by `CALLBACK_TIMEOUT`.
/// The callback runs in a detached thread; on timeout the defaults win and
/// any late reply is dropped with the channel.
fn elicit_params(
    specs: Vec<ParamSpec>,
    callback: Option<ParamCallback>,
) -> HashMap<String, String> {
    let Some(callback) = callback else {
        return default_param_values(&specs);
    };

    let (tx, rx) = mpsc::channel();
    let request = specs.clone();
    thread::spawn(move || {
        let _ = tx.send(callback(request));
    });
    match rx.recv_timeout(CALLBACK_TIMEOUT) {
        Ok(chosen) => chosen,
        Err(_) => {
            warn!("parameter callback timed out, falling back to defaults");
            default_param_values(&specs)
        }
    }
}

fn chosen_to_table(lua: &Lua, chosen: HashMap<String, String>) -> mlua::Result<LuaTable> {
    let table = lua.create_table()?;
    for (name, value) in chosen {
        table.set(name, value)?;
    }
    Ok(table)
}

/// Register the `tables` intrinsics so scripts can `require("tables")`.
fn install_tables_module(lua: &Lua, snapshot: &Arc<CatalogSnapshot>) -> mlua::Result<()> {
    let module = lua.create_table()?;

    let snap = Arc::clone(snapshot);
    module.set(
        "roll",
        lua.create_function(move |_, args: MultiValue| {
            let args: Vec<Value> = args.into_iter().collect();
            if args.len() != 1 {
                return Ok(format!(
                    "ERROR: roll(tableName) requires 1 argument, received: {}",
                    args.len()
                ));
            }
            let name = match &args[0] {
                Value::String(s) => s.to_string_lossy().to_string(),
                other => {
                    return Ok(format!(
                        "ERROR: roll(tableName) requires string argument, received type: {}",
                        other.type_name()
                    ))
                }
            };
            // Scripts always roll once; multi-roll is a loop in the script.
            let outcome = snap.roll(&name, 1);
            Ok(match outcome.results.first() {
                Some(result) => result.clone(),
                None => format!("ERROR: The roll failed. Does the table: {name} exist?"),
            })
        })?,
    )?;

    let snap = Arc::clone(snapshot);
    module.set(
        "pick",
        lua.create_function(move |_, args: MultiValue| {
            let args: Vec<Value> = args.into_iter().collect();
            if args.len() != 2 {
                return Ok(format!(
                    "ERROR: pick(tableName, count) requires 2 arguments received: {}",
                    args.len()
                ));
            }
            let name = match &args[0] {
                Value::String(s) => s.to_string_lossy().to_string(),
                other => {
                    return Ok(format!(
                        "ERROR: pick(tableName, count), tablename must be a string, received type: {}",
                        other.type_name()
                    ))
                }
            };
            let count = match &args[1] {
                Value::Integer(i) => *i,
                Value::Number(n) => *n as i64,
                other => {
                    return Ok(format!(
                        "ERROR: pick(tableName, count), count must be an integer, received type: {}",
                        other.type_name()
                    ))
                }
            };
            let outcome = snap.pick(&name, count.max(0) as usize);
            Ok(match outcome.results.first() {
                Some(result) => result.clone(),
                None => format!("ERROR: The pick failed. Does the table: {name} exist?"),
            })
        })?,
    )?;

    module.set(
        "dice",
        lua.create_function(move |_, args: MultiValue| {
            let args: Vec<Value> = args.into_iter().collect();
            if args.len() != 1 {
                return Ok(SENTINEL_BAD_DICE);
            }
            let expr = match &args[0] {
                Value::String(s) => s.to_string_lossy().to_string(),
                _ => return Ok(SENTINEL_BAD_DICE),
            };
            Ok(expand::evaluate_dice(&expr).unwrap_or(SENTINEL_BAD_DICE))
        })?,
    )?;

    module.set(
        "concat",
        lua.create_function(move |_, args: MultiValue| {
            let args: Vec<Value> = args.into_iter().collect();
            if args.len() != 1 {
                return Ok(format!(
                    "ERROR: concat(table-of-strings) requires a single table-type parameter, received: {}",
                    args.len()
                ));
            }
            match &args[0] {
                Value::Table(table) => {
                    // Keys sort lexicographically; values concatenate in
                    // that order.
                    let mut entries = BTreeMap::new();
                    for pair in table.clone().pairs::<Value, Value>() {
                        if let Ok((key, value)) = pair {
                            entries.insert(lua_display(&key), lua_display(&value));
                        }
                    }
                    Ok(entries.into_values().collect::<String>())
                }
                other => Ok(format!(
                    "ERROR: concat(table-of-strings), the parameter must be a Lua table, received type: {}",
                    other.type_name()
                )),
            }
        })?,
    )?;

    let package: LuaTable = lua.globals().get("package")?;
    let loaded: LuaTable = package.get("loaded")?;
    loaded.set("tables", module)
}

fn lua_table_to_map(table: LuaTable) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in table.pairs::<Value, Value>() {
        if let Ok((key, value)) = pair {
            map.insert(lua_display(&key), lua_display(&value));
        }
    }
    map
}

fn lua_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Nil => "nil".to_string(),
        other => other.type_name().to_string(),
    }
}

fn error_map(detail: String) -> HashMap<String, String> {
    HashMap::from([(SCRIPT_ERROR_KEY.to_string(), detail)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_accepts_valid_lua() {
        let bytecode = compile("function main() end\n").unwrap();
        assert!(!bytecode.is_empty());
    }

    #[test]
    fn compile_rejects_syntax_errors() {
        assert!(compile("function main( end").is_err());
    }

    #[test]
    fn sandbox_has_no_io_or_os() {
        let lua = new_sandbox().unwrap();
        let io: Value = lua.globals().get("io").unwrap();
        let os: Value = lua.globals().get("os").unwrap();
        assert!(matches!(io, Value::Nil));
        assert!(matches!(os, Value::Nil));
        let math: Value = lua.globals().get("math").unwrap();
        assert!(matches!(math, Value::Table(_)));
    }

    #[test]
    fn specs_are_sorted_by_name() {
        let lua = new_sandbox().unwrap();
        let table = lua.create_table().unwrap();
        table.set("zeta", "1|2").unwrap();
        table.set("alpha", "a|b").unwrap();
        let specs = specs_from_table(table);
        assert_eq!(specs[0].name, "alpha");
        assert_eq!(specs[1].name, "zeta");
    }

    #[test]
    fn lua_display_covers_scalars() {
        let lua = new_sandbox().unwrap();
        let s = lua.create_string("text").unwrap();
        assert_eq!(lua_display(&Value::String(s)), "text");
        assert_eq!(lua_display(&Value::Integer(7)), "7");
        assert_eq!(lua_display(&Value::Boolean(true)), "true");
        assert_eq!(lua_display(&Value::Nil), "nil");
    }
}
