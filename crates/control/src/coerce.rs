//! Typed parsing of loosely shaped request values.
//!
//! Control requests arrive as JSON from browsers that send numbers, numeric
//! strings, booleans or words interchangeably. Everything is turned into a
//! domain type here, once, so the rest of the bridge only sees typed values.

use serde_json::Value;
use shared::{
    domain::{DeviceUid, Direction, FUNCTION_COUNT, MAX_SPEED, SWITCH_COUNT},
    error::ControlError,
};

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(text) => {
            let text = text.trim();
            match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16).ok(),
                None => text.parse::<i64>().ok(),
            }
        }
        _ => None,
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !value.is_null())
}

pub fn parse_uid(value: Option<&Value>) -> Result<DeviceUid, ControlError> {
    let value = present(value).ok_or_else(|| ControlError::InvalidTarget("missing".into()))?;
    as_integer(value)
        .and_then(|raw| u32::try_from(raw).ok())
        .map(DeviceUid)
        .ok_or_else(|| ControlError::InvalidTarget(value.to_string()))
}

/// Clamps into `0..=MAX_SPEED`.
pub fn parse_speed(value: Option<&Value>) -> Result<u16, ControlError> {
    let value = present(value).ok_or_else(|| ControlError::invalid_value("speed", "missing"))?;
    let raw = as_integer(value)
        .ok_or_else(|| ControlError::invalid_value("speed", format!("not numeric: {value}")))?;
    Ok(raw.clamp(0, MAX_SPEED as i64) as u16)
}

/// Unrecognised words and codes fall back to `Keep`.
pub fn parse_direction(value: Option<&Value>) -> Result<Direction, ControlError> {
    let value =
        present(value).ok_or_else(|| ControlError::invalid_value("direction", "missing"))?;
    if let Value::String(text) = value {
        match text.trim().to_ascii_lowercase().as_str() {
            "forward" => return Ok(Direction::Forward),
            "reverse" => return Ok(Direction::Reverse),
            "toggle" => return Ok(Direction::Toggle),
            "keep" => return Ok(Direction::Keep),
            _ => {}
        }
    }
    Ok(as_integer(value)
        .and_then(|code| u8::try_from(code).ok())
        .map(Direction::from_code)
        .unwrap_or(Direction::Keep))
}

pub fn parse_flag(value: Option<&Value>, field: &'static str) -> Result<bool, ControlError> {
    let value = present(value).ok_or_else(|| ControlError::invalid_value(field, "missing"))?;
    let flag = match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Some(true),
            "false" | "off" | "no" | "0" => Some(false),
            _ => None,
        },
        other => match as_integer(other) {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
    };
    flag.ok_or_else(|| ControlError::invalid_value(field, format!("not a boolean: {value}")))
}

/// Accepts `3` as well as `"F3"`.
pub fn parse_function_index(value: Option<&Value>) -> Result<u8, ControlError> {
    let value = present(value).ok_or_else(|| ControlError::invalid_value("function", "missing"))?;
    let raw = match value {
        Value::String(text) => {
            let text = text.trim();
            let digits = text
                .strip_prefix('F')
                .or_else(|| text.strip_prefix('f'))
                .unwrap_or(text);
            digits.parse::<i64>().ok()
        }
        other => as_integer(other),
    };
    raw.and_then(|index| u8::try_from(index).ok())
        .filter(|index| *index < FUNCTION_COUNT)
        .ok_or_else(|| {
            ControlError::invalid_value("function", format!("expected 0..{FUNCTION_COUNT}, got {value}"))
        })
}

pub fn parse_switch_index(value: Option<&Value>) -> Result<usize, ControlError> {
    let value = present(value).ok_or_else(|| ControlError::invalid_value("idx", "missing"))?;
    let raw = as_integer(value)
        .ok_or_else(|| ControlError::invalid_value("idx", format!("not numeric: {value}")))?;
    usize::try_from(raw)
        .ok()
        .filter(|idx| *idx < SWITCH_COUNT)
        .ok_or(ControlError::IndexOutOfRange {
            index: raw,
            limit: SWITCH_COUNT,
        })
}

pub fn parse_switch_value(value: Option<&Value>) -> Result<u8, ControlError> {
    let value = present(value).ok_or_else(|| ControlError::invalid_value("value", "missing"))?;
    if let Some(raw) = as_integer(value) {
        return u8::try_from(raw)
            .map_err(|_| ControlError::invalid_value("value", format!("out of range: {raw}")));
    }
    parse_flag(Some(value), "value").map(u8::from)
}

#[cfg(test)]
#[path = "tests/coerce_tests.rs"]
mod tests;
