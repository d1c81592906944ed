//! Method naming conventions.
//!
//! Slot names are split into words at case boundaries (`TwoWords`,
//! `HTTPServer`), separators (`_`, `-`, space) and are then re-joined in the
//! requested style.

use std::fmt;
use std::str::FromStr;

/// How an undeclared method name is derived from its slot name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NamingConvention {
    /// Slot name unchanged.
    #[default]
    Original,
    /// `twoWords`
    CamelCase,
    /// `TwoWords`
    PascalCase,
    /// `two_words`
    SnakeCase,
    /// `twowords`
    LowerCase,
}

impl NamingConvention {
    pub fn apply(&self, name: &str) -> String {
        match self {
            NamingConvention::Original => name.to_string(),
            NamingConvention::CamelCase => camel_case_name(name),
            NamingConvention::PascalCase => pascal_case_name(name),
            NamingConvention::SnakeCase => snake_case_name(name),
            NamingConvention::LowerCase => lower_case_name(name),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NamingConvention::Original => "original",
            NamingConvention::CamelCase => "camel",
            NamingConvention::PascalCase => "pascal",
            NamingConvention::SnakeCase => "snake",
            NamingConvention::LowerCase => "lower",
        }
    }
}

impl fmt::Display for NamingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamingConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(NamingConvention::Original),
            "camel" | "camelcase" => Ok(NamingConvention::CamelCase),
            "pascal" | "pascalcase" => Ok(NamingConvention::PascalCase),
            "snake" | "snakecase" | "snake_case" => Ok(NamingConvention::SnakeCase),
            "lower" | "lowercase" => Ok(NamingConvention::LowerCase),
            other => Err(format!("unknown naming convention {:?}", other)),
        }
    }
}

/// Splits an identifier into words.
///
/// A new word starts at an upper-case letter that follows a lower-case
/// letter or digit, or that ends a run of capitals followed by a lower-case
/// letter (`HTTPServer` is `HTTP` + `Server`). Digits stay with the word
/// before them.
pub fn split_words(name: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let chars: Vec<(usize, char)> = name.char_indices().collect();
    let mut start: Option<usize> = None;

    for (i, &(pos, c)) in chars.iter().enumerate() {
        if matches!(c, '_' | '-' | ' ') {
            if let Some(s) = start.take() {
                words.push(&name[s..pos]);
            }
            continue;
        }

        let Some(s) = start else {
            start = Some(pos);
            continue;
        };

        if c.is_uppercase() {
            let prev = chars[i - 1].1;
            let next_lower = chars.get(i + 1).is_some_and(|&(_, n)| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_lower);
            if boundary {
                words.push(&name[s..pos]);
                start = Some(pos);
            }
        }
    }

    if let Some(s) = start {
        words.push(&name[s..]);
    }
    words
}

/// `TwoWords` becomes `twoWords`.
pub fn camel_case_name(name: &str) -> String {
    let words = split_words(name);
    if words.is_empty() {
        return name.to_string();
    }
    let mut out = words[0].to_lowercase();
    for word in &words[1..] {
        out.push_str(&capitalize(word));
    }
    out
}

/// `twoWords` becomes `TwoWords`.
pub fn pascal_case_name(name: &str) -> String {
    let words = split_words(name);
    if words.is_empty() {
        return name.to_string();
    }
    words.iter().map(|w| capitalize(w)).collect()
}

/// `TwoWords` becomes `two_words`.
pub fn snake_case_name(name: &str) -> String {
    let words = split_words(name);
    if words.is_empty() {
        return name.to_string();
    }
    words
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn lower_case_name(name: &str) -> String {
    name.to_lowercase()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
