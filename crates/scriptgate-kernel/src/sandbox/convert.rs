//! Lua <-> JSON conversion.

use mlua::{DeserializeOptions, Lua, LuaSerdeExt, SerializeOptions, Value};
use serde_json::Value as JsonValue;

/// Convert a script value to JSON. Luau numbers are all floats, so
/// integral values are normalized back to integers.
pub fn lua_to_json(lua: &Lua, value: Value) -> mlua::Result<JsonValue> {
    let options = DeserializeOptions::new()
        .deny_unsupported_types(true)
        .deny_recursive_tables(true);
    let mut json: JsonValue = lua.from_value_with(value, options)?;
    normalize_numbers(&mut json);
    Ok(json)
}

/// Convert JSON to a script value. `null` becomes `nil`, so scripts test
/// absence with `== nil`.
pub fn json_to_lua(lua: &Lua, value: &JsonValue) -> mlua::Result<Value> {
    let options = SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false);
    lua.to_value_with(value, options)
}

/// Rewrite floats with no fractional part as integers, recursively.
pub fn normalize_numbers(value: &mut JsonValue) {
    match value {
        JsonValue::Array(items) => items.iter_mut().for_each(normalize_numbers),
        JsonValue::Object(map) => map.values_mut().for_each(normalize_numbers),
        _ => {
            if let Some(i) = integral(value) {
                *value = JsonValue::from(i);
            }
        }
    }
}

fn integral(value: &JsonValue) -> Option<i64> {
    let f = value.as_f64().filter(|_| value.is_f64())?;
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
}
