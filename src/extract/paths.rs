#![forbid(unsafe_code)]

//! Dotted-path lookups into untyped payloads.
//!
//! A path such as `title.runs.0.text` walks object keys and array indexes;
//! the segment `last` picks the final array element. Every `first_*` helper
//! takes an ordered list of candidate paths and returns the first one that is
//! defined and non-empty.

use serde_json::Value;

use super::parse::parse_count;

pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                if segment == "last" {
                    items.last()?
                } else {
                    items.get(segment.parse::<usize>().ok()?)?
                }
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Flattens the text encodings the upstream uses interchangeably: plain
/// strings, `{simpleText}`, `{content}`, `{text}` and `{runs: [{text}]}`.
pub fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Object(map) => {
            if let Some(simple) = map.get("simpleText") {
                return as_text(simple);
            }
            if let Some(content) = map.get("content") {
                return as_text(content);
            }
            if let Some(Value::Array(runs)) = map.get("runs") {
                runs.iter()
                    .filter_map(|run| run.get("text").and_then(Value::as_str))
                    .collect::<String>()
            } else if let Some(text) = map.get("text") {
                return as_text(text);
            } else {
                return None;
            }
        }
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn first_text(value: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(as_text))
}

/// Numeric fields arrive as JSON numbers, numeric strings or display text
/// such as `"1.2M views"`.
pub fn first_count(value: &Value, paths: &[&str]) -> Option<u64> {
    paths.iter().find_map(|path| {
        let node = lookup(value, path)?;
        match node {
            Value::Number(number) => number
                .as_u64()
                .or_else(|| number.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64)),
            other => as_text(other).and_then(|text| parse_count(&text)),
        }
    })
}

pub fn first_bool(value: &Value, paths: &[&str]) -> Option<bool> {
    paths.iter().find_map(|path| match lookup(value, path)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(number) => number.as_u64().map(|n| n != 0),
        _ => None,
    })
}

/// True when any candidate path leads to a non-null node. Used for flags the
/// upstream expresses by the mere presence of a badge object.
pub fn any_present(value: &Value, paths: &[&str]) -> bool {
    paths
        .iter()
        .any(|path| lookup(value, path).is_some_and(|node| !node.is_null()))
}

pub fn first_strings(value: &Value, paths: &[&str]) -> Vec<String> {
    for path in paths {
        if let Some(Value::Array(items)) = lookup(value, path) {
            let collected: Vec<String> = items.iter().filter_map(as_text).collect();
            if !collected.is_empty() {
                return collected;
            }
        }
    }
    Vec::new()
}

/// Picks the last (largest) entry of the first non-empty thumbnail list and
/// normalizes protocol-relative URLs.
pub fn first_thumbnail(value: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|path| {
        let node = lookup(value, path)?;
        let url = match node {
            Value::Array(items) => items
                .iter()
                .rev()
                .find_map(|entry| entry.get("url").and_then(Value::as_str))?,
            Value::String(url) => url.as_str(),
            Value::Object(map) => map.get("url").and_then(Value::as_str)?,
            _ => return None,
        };
        normalize_url(url)
    })
}

pub fn normalize_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if trimmed.starts_with('/') {
        return Some(format!("https://www.youtube.com{trimmed}"));
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_keys_indexes_and_last() {
        let value = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(lookup(&value, "a.b.0.c"), Some(&json!(1)));
        assert_eq!(lookup(&value, "a.b.last.c"), Some(&json!(2)));
        assert_eq!(lookup(&value, "a.b.5.c"), None);
        assert_eq!(lookup(&value, "a.x"), None);
    }

    #[test]
    fn as_text_understands_every_encoding() {
        assert_eq!(as_text(&json!("plain")), Some("plain".into()));
        assert_eq!(as_text(&json!({"simpleText": "simple"})), Some("simple".into()));
        assert_eq!(as_text(&json!({"content": "view model"})), Some("view model".into()));
        assert_eq!(
            as_text(&json!({"runs": [{"text": "a "}, {"text": "b"}]})),
            Some("a b".into())
        );
        assert_eq!(as_text(&json!({"runs": []})), None);
        assert_eq!(as_text(&json!("   ")), None);
    }

    #[test]
    fn first_text_skips_empty_candidates() {
        let value = json!({"title": {"runs": []}, "headline": {"simpleText": "Fallback"}});
        assert_eq!(
            first_text(&value, &["missing", "title", "headline"]),
            Some("Fallback".into())
        );
    }

    #[test]
    fn first_count_accepts_numbers_and_text() {
        let value = json!({"n": 42, "s": "1,234", "t": {"simpleText": "297K views"}});
        assert_eq!(first_count(&value, &["n"]), Some(42));
        assert_eq!(first_count(&value, &["s"]), Some(1234));
        assert_eq!(first_count(&value, &["missing", "t"]), Some(297_000));
    }

    #[test]
    fn first_bool_and_presence() {
        let value = json!({"flag": "true", "badge": {"x": 1}, "nothing": null});
        assert_eq!(first_bool(&value, &["missing", "flag"]), Some(true));
        assert!(any_present(&value, &["badge"]));
        assert!(!any_present(&value, &["nothing", "missing"]));
    }

    #[test]
    fn thumbnails_pick_largest_and_fix_scheme() {
        let value = json!({"thumbnail": {"thumbnails": [
            {"url": "//i.ytimg.com/small.jpg"},
            {"url": "//i.ytimg.com/large.jpg"}
        ]}});
        assert_eq!(
            first_thumbnail(&value, &["thumbnail.thumbnails"]),
            Some("https://i.ytimg.com/large.jpg".into())
        );
    }
}
