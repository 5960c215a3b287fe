//! Lenient readers for upstream JSON, where numbers often arrive as strings.

use serde_json::Value;

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim().trim_end_matches('%').replace(',', "");
            trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First present key wins, checked in both `snake_case` and `camelCase` spellings.
pub fn pick<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    for key in keys {
        if let Some(v) = obj.get(*key).filter(|v| !v.is_null()) {
            return Some(v);
        }
        let camel = snake_to_camel(key);
        if camel != *key
            && let Some(v) = obj.get(camel.as_str()).filter(|v| !v.is_null())
        {
            return Some(v);
        }
    }
    None
}

pub fn pick_string(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| pick(obj, &[key]).and_then(as_string))
}

/// First key whose value parses as a number. Empty or junk strings fall through to the next key.
pub fn pick_f64(obj: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| pick(obj, &[key]).and_then(as_f64))
}

pub fn round_u32(v: f64) -> u32 {
    if v.is_finite() && v > 0.0 {
        v.round().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for ch in key.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}
