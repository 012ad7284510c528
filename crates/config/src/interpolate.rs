//! `${NAME}` / `${NAME|default}` environment placeholders inside string values.
//!
//! Placeholders are expanded once per file, before the file is merged into
//! the document, and again on every reload. Keys are never touched.

use figment::value::{Dict, Value};

/// Expands every placeholder in `input` using `lookup` to resolve names.
///
/// A name that resolves to `None` or to an empty string falls back to the
/// placeholder's default, or to the empty string if it has none. Names may
/// hold ASCII alphanumerics, `_`, `-`, `?` and spaces; a placeholder using
/// any other character in its name, an empty `${}` and an unterminated `${`
/// are copied through verbatim.
///
/// ```
/// use hotconf_config::interpolate::expand;
///
/// let lookup = |name: &str| (name == "HOST").then(|| "db.internal".to_string());
/// assert_eq!(expand("tcp://${HOST}:${PORT|5432}", lookup), "tcp://db.internal:5432");
/// ```
pub fn expand<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let body_start = &rest[start + 2..];
        let Some(end) = body_start.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &body_start[..end];
        let (raw_name, default) = match body.split_once('|') {
            Some((name, default)) => (name, Some(default.trim())),
            None => (body, None),
        };
        let name = raw_name.trim();

        if is_placeholder_name(raw_name) {
            let resolved = (!name.is_empty())
                .then(|| lookup(name))
                .flatten()
                .filter(|v| !v.is_empty());
            match resolved {
                Some(value) => out.push_str(&value),
                None => out.push_str(default.unwrap_or_default()),
            }
        } else {
            out.push_str(&rest[start..start + 2 + end + 1]);
        }
        rest = &body_start[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Expands placeholders in every string value of `dict`, recursing into
/// nested dictionaries and arrays.
pub fn expand_dict<F>(dict: &mut Dict, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    for value in dict.values_mut() {
        expand_value(value, lookup);
    }
}

fn expand_value<F>(value: &mut Value, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(_, s) if s.contains("${") => *s = expand(s, lookup),
        Value::Dict(_, dict) => expand_dict(dict, lookup),
        Value::Array(_, items) => {
            for item in items {
                expand_value(item, lookup);
            }
        }
        _ => {}
    }
}

/// Resolves names against the process environment.
pub(crate) fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'?' | b' '))
}
