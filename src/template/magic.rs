//! Macro expressions ("magic" values)
//!
//! The macro evaluator is the third resolution stage. Whatever `${...}`
//! placeholders survive scope and environment substitution are handed to a
//! [`MacroEvaluator`]. The built-in [`MagicMacroEvaluator`] understands:
//! - `${uuid}` / `${uuid7}` - random or time-ordered UUID
//! - `${now}` / `${now:FORMAT}` - current UTC time, RFC 3339 or strftime
//! - `${timestamp}` / `${timestamp_ms}` - Unix time
//! - `${date}` - current UTC date
//! - `${random_int}` / `${random_int:MAX}` / `${random_int:MIN:MAX}`
//! - `${random_string:LEN}` / `${random_hex:LEN}`
//! - `${pick:a,b,c}` - random choice
//! - `${default:NAME:FALLBACK}` - scope value or fallback
//! - `${len:NAME}` - character length of a (decrypted) scope value
//!
//! Unknown names and unusable arguments (a bad strftime format, an empty
//! range) are left untouched.

use std::borrow::Cow;

use chrono::format::{Item, StrftimeItems};
use chrono::Utc;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::{Captures, Regex};
use uuid::Uuid;

use crate::crypto::{self, Encryptor};
use crate::errors::Result;

static MACRO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([a-z_][a-z0-9_]*)(?::([^}]*))?\}").unwrap()
});

/// Variable view handed to macro evaluators
pub trait MacroScope {
    /// Value as stored, possibly still encrypted
    fn get_raw(&self, name: &str) -> Option<&str>;

    /// Value with encrypted markers decrypted
    fn get_decrypted(&self, name: &str) -> Result<Option<Cow<'_, str>>>;
}

/// Merged scope wrapped so macros can read still-encrypted values
pub struct DecryptingScope<'a> {
    vars: &'a IndexMap<String, String>,
    encryptor: &'a dyn Encryptor,
}

impl<'a> DecryptingScope<'a> {
    pub fn new(vars: &'a IndexMap<String, String>, encryptor: &'a dyn Encryptor) -> Self {
        Self { vars, encryptor }
    }
}

impl MacroScope for DecryptingScope<'_> {
    fn get_raw(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    fn get_decrypted(&self, name: &str) -> Result<Option<Cow<'_, str>>> {
        match self.vars.get(name) {
            Some(v) => crypto::decrypt_if_needed(self.encryptor, v).map(Some),
            None => Ok(None),
        }
    }
}

/// Macro-expression evaluator collaborator
pub trait MacroEvaluator: Send + Sync {
    /// Evaluate macros in `text`; text without macros must come back unchanged
    fn evaluate(&self, text: &str, scope: &dyn MacroScope) -> Result<String>;
}

/// Built-in evaluator for runtime-generated values
#[derive(Debug, Default, Clone, Copy)]
pub struct MagicMacroEvaluator;

impl MacroEvaluator for MagicMacroEvaluator {
    fn evaluate(&self, text: &str, scope: &dyn MacroScope) -> Result<String> {
        if !text.contains("${") {
            return Ok(text.to_string());
        }

        let mut failure = None;
        let out = MACRO_RE.replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let args = caps.get(2).map(|m| m.as_str());
            match generate_magic_value(name, args, scope) {
                Ok(Some(value)) => value,
                Ok(None) => caps[0].to_string(),
                Err(e) => {
                    failure.get_or_insert(e);
                    caps[0].to_string()
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(out.into_owned()),
        }
    }
}

/// Generate a magic value based on name and optional args
fn generate_magic_value(name: &str, args: Option<&str>, scope: &dyn MacroScope) -> Result<Option<String>> {
    let value = match name {
        "uuid" | "uuid4" => Some(Uuid::new_v4().to_string()),
        "uuid7" => Some(Uuid::now_v7().to_string()),

        "now" => match args {
            Some(format) => format_now(format),
            None => Some(Utc::now().to_rfc3339()),
        },
        "timestamp" => Some(Utc::now().timestamp().to_string()),
        "timestamp_ms" => Some(Utc::now().timestamp_millis().to_string()),
        "date" => Some(Utc::now().format("%Y-%m-%d").to_string()),

        "random_int" => {
            let mut rng = rand::rng();
            match args {
                Some(range) => {
                    let parts: Vec<&str> = range.split(':').collect();
                    match parts.as_slice() {
                        [max] => match max.parse::<i64>() {
                            Ok(max) if max >= 0 => Some(rng.random_range(0..=max).to_string()),
                            _ => None,
                        },
                        [min, max] => match (min.parse::<i64>(), max.parse::<i64>()) {
                            (Ok(min), Ok(max)) if min <= max => Some(rng.random_range(min..=max).to_string()),
                            _ => None,
                        },
                        _ => None,
                    }
                }
                None => Some(rng.random_range(0..=i32::MAX as i64).to_string()),
            }
        }
        "random_string" => {
            let len = args.and_then(|s| s.parse().ok()).unwrap_or(16);
            Some(random_string(len))
        }
        "random_hex" => {
            let len = args.and_then(|s| s.parse().ok()).unwrap_or(32);
            Some(random_hex(len))
        }
        "pick" => args.and_then(|options| {
            let items: Vec<&str> = options.split(',').collect();
            let idx = rand::rng().random_range(0..items.len());
            Some(items[idx].trim().to_string())
        }),

        "default" => args.and_then(|a| {
            let (var, fallback) = a.split_once(':').unwrap_or((a, ""));
            Some(scope.get_raw(var).unwrap_or(fallback).to_string())
        }),
        "len" => match args {
            Some(var) => scope.get_decrypted(var)?.map(|v| v.chars().count().to_string()),
            None => None,
        },

        _ => None,
    };
    Ok(value)
}

/// Current time in a strftime `format`; `None` when the format is invalid
fn format_now(format: &str) -> Option<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return None;
    }
    Some(Utc::now().format_with_items(items.into_iter()).to_string())
}

fn random_string(len: usize) -> String {
    use rand::distr::Alphanumeric;
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_hex(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len / 2 + 1).map(|_| rng.random()).collect();
    let encoded = hex::encode(bytes);
    encoded[..len].to_string()
}
