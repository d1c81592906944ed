//! Declaration tag parsing.
//!
//! Operations can be declared with the compact tag syntax
//! `rpc:"rest" method:"POST" name:"echo" container:"object" cache:"key:k,ttl:1s"`.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Tag parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("expected key:\"value\" at offset {0}")]
    Syntax(usize),

    #[error("unterminated value for key {0:?}")]
    Unterminated(String),

    #[error("duplicate key {0:?}")]
    Duplicate(String),

    #[error("invalid duration {0:?}")]
    Duration(String),
}

/// Parsed `key:"value"` pairs, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructTag {
    entries: Vec<(String, String)>,
}

impl StructTag {
    pub fn parse(tag: &str) -> Result<Self, TagError> {
        let bytes = tag.as_bytes();
        let mut entries: Vec<(String, String)> = Vec::new();
        let mut i = 0;

        loop {
            while i < bytes.len() && bytes[i] == b' ' {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }

            let key_start = i;
            while i < bytes.len() && bytes[i] > b' ' && bytes[i] != b':' && bytes[i] != b'"' {
                i += 1;
            }
            if i == key_start || i + 1 >= bytes.len() || bytes[i] != b':' || bytes[i + 1] != b'"'
            {
                return Err(TagError::Syntax(key_start));
            }
            let key = tag[key_start..i].to_string();
            i += 2;

            let mut value = String::new();
            let mut closed = false;
            let mut chars = tag[i..].char_indices();
            while let Some((off, c)) = chars.next() {
                match c {
                    '"' => {
                        i += off + 1;
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, escaped)) => value.push(escaped),
                        None => break,
                    },
                    c => value.push(c),
                }
            }
            if !closed {
                return Err(TagError::Unterminated(key));
            }
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(TagError::Duplicate(key));
            }
            entries.push((key, value));
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses `k1:v1<sep>k2<sep>k3:a:b` settings.
///
/// A bare key maps to itself; everything after the first `:` is the value.
pub fn parse_tag_settings(tag: &str, sep: &str) -> HashMap<String, String> {
    let mut settings = HashMap::new();
    for item in tag.split(sep) {
        let (key, value) = match item.split_once(':') {
            Some((k, v)) => (k.trim(), Some(v)),
            None => (item.trim(), None),
        };
        match value {
            Some(v) => {
                settings.insert(key.to_string(), v.to_string());
            }
            None if !key.is_empty() => {
                settings.insert(key.to_string(), key.to_string());
            }
            None => {}
        }
    }
    settings
}

/// Parses a duration such as `300ms`, `1.5s` or `1h30m`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0` is
/// accepted; negative durations are not.
pub fn parse_duration(s: &str) -> Result<Duration, TagError> {
    let invalid = || TagError::Duration(s.to_string());
    let input = s.trim().strip_prefix('+').unwrap_or(s.trim());
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err(invalid());
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total += number * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total.round() as u64))
}
