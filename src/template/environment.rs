//! Environment parameter placeholders
//!
//! Two grammars address a parameter of an environment system connection:
//! - plain: `${ENV.System.Connection.param}`
//! - encrypted: `{EncryptedParameterENV.System.Connection.param}`
//!
//! Keywords and names match case-insensitively. A segment may be wrapped in
//! double quotes to carry literal dots: `${ENV."billing.eu".db.host}`.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::crypto::Encryptor;
use crate::environment::{lookup_parameter, System};
use crate::errors::{ReqflowError, Result};

const SEGMENT: &str = r#"("[^"]*"|[^."{}]+)"#;

static PLAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\$\{{ENV\.{s}\.{s}\.{s}\}}", s = SEGMENT)).unwrap()
});

static ENCRYPTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\{{EncryptedParameterENV\.{s}\.{s}\.{s}\}}", s = SEGMENT)).unwrap()
});

/// Which placeholder grammar to substitute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvGrammar {
    Plain,
    Encrypted,
}

impl EnvGrammar {
    fn regex(self) -> &'static Regex {
        match self {
            EnvGrammar::Plain => &PLAIN_RE,
            EnvGrammar::Encrypted => &ENCRYPTED_RE,
        }
    }
}

/// Names that failed to resolve, collected across every field of a request
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnresolvedVariables(BTreeSet<String>);

impl UnresolvedVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: impl Into<String>) {
        self.0.insert(name.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// `Ok` when everything resolved, else one aggregated error
    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ReqflowError::VariableNotFound(self.0.into_iter().collect()))
        }
    }
}

/// Substitutes environment placeholders from a fetched set of systems
pub struct EnvParameterResolver<'a> {
    systems: &'a [System],
    encryptor: &'a dyn Encryptor,
}

impl<'a> EnvParameterResolver<'a> {
    pub fn new(systems: &'a [System], encryptor: &'a dyn Encryptor) -> Self {
        Self { systems, encryptor }
    }

    /// Substitute every placeholder of `grammar` in `text`.
    ///
    /// Matches are replaced one at a time, searching again from just past the
    /// inserted value. Unknown parameters stay in place and are recorded in
    /// `unresolved`.
    pub fn resolve(&self, text: &str, grammar: EnvGrammar, unresolved: &mut UnresolvedVariables) -> Result<String> {
        let re = grammar.regex();
        let mut out = text.to_string();
        let mut offset = 0;

        while offset <= out.len() {
            let Some(caps) = re.captures_at(&out, offset) else {
                break;
            };
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            let (system, connection, param) = segments(&caps);

            match lookup_parameter(self.systems, &system, &connection, &param) {
                Some(value) => {
                    let replacement = match grammar {
                        EnvGrammar::Encrypted if !self.encryptor.is_encrypted(value) => {
                            self.encryptor.encrypt(value)?
                        }
                        _ => value.to_string(),
                    };
                    out.replace_range(whole.clone(), &replacement);
                    offset = whole.start + replacement.len();
                }
                None => {
                    unresolved.record(format!("ENV.{}.{}.{}", system, connection, param));
                    offset = whole.end;
                }
            }
        }

        Ok(out)
    }
}

fn segments(caps: &Captures) -> (String, String, String) {
    let seg = |i: usize| {
        let raw = caps.get(i).map_or("", |m| m.as_str());
        raw.strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(raw)
            .to_string()
    };
    (seg(1), seg(2), seg(3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HmacEncryptor;

    fn systems(enc: &HmacEncryptor) -> Vec<System> {
        vec![
            System::new("Billing").with_connection("api", [("host", "billing.local"), ("port", "8080")]),
            System::new("billing.eu").with_connection("db", [("password".to_string(), enc.encrypt("s3cret").unwrap())]),
            System::new("Auth").with_connection("oauth", [("secret", "plain-secret")]),
        ]
    }

    #[test]
    fn test_plain_resolution() {
        let enc = HmacEncryptor::new("k");
        let systems = systems(&enc);
        let resolver = EnvParameterResolver::new(&systems, &enc);
        let mut missing = UnresolvedVariables::new();
        let out = resolver
            .resolve("http://${ENV.billing.API.host}:${env.Billing.api.PORT}/v1", EnvGrammar::Plain, &mut missing)
            .unwrap();
        assert_eq!(out, "http://billing.local:8080/v1");
        assert!(missing.is_empty());
    }

    #[test]
    fn test_quoted_segment_with_dots() {
        let enc = HmacEncryptor::new("k");
        let systems = systems(&enc);
        let resolver = EnvParameterResolver::new(&systems, &enc);
        let mut missing = UnresolvedVariables::new();
        let out = resolver
            .resolve(r#"${ENV."billing.eu".db.password}"#, EnvGrammar::Plain, &mut missing)
            .unwrap();
        assert!(enc.is_encrypted(&out));
    }

    #[test]
    fn test_unresolved_collected_and_left_in_place() {
        let enc = HmacEncryptor::new("k");
        let systems = systems(&enc);
        let resolver = EnvParameterResolver::new(&systems, &enc);
        let mut missing = UnresolvedVariables::new();
        let text = "${ENV.nope.a.b}/${ENV.Billing.api.host}/${ENV.Billing.api.missing}";
        let out = resolver.resolve(text, EnvGrammar::Plain, &mut missing).unwrap();
        assert_eq!(out, "${ENV.nope.a.b}/billing.local/${ENV.Billing.api.missing}");

        let err = missing.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "variables not found: ENV.Billing.api.missing, ENV.nope.a.b"
        );
    }

    #[test]
    fn test_encrypted_grammar_encrypts_plain_values() {
        let enc = HmacEncryptor::new("k");
        let systems = systems(&enc);
        let resolver = EnvParameterResolver::new(&systems, &enc);
        let mut missing = UnresolvedVariables::new();
        let out = resolver
            .resolve("{EncryptedParameterENV.Auth.oauth.secret}", EnvGrammar::Encrypted, &mut missing)
            .unwrap();
        assert!(enc.is_encrypted(&out));
        assert_eq!(enc.decrypt(&out).unwrap(), "plain-secret");
    }

    #[test]
    fn test_grammars_do_not_overlap() {
        let enc = HmacEncryptor::new("k");
        let systems = systems(&enc);
        let resolver = EnvParameterResolver::new(&systems, &enc);
        let mut missing = UnresolvedVariables::new();
        let text = "{EncryptedParameterENV.Auth.oauth.secret}";
        assert_eq!(resolver.resolve(text, EnvGrammar::Plain, &mut missing).unwrap(), text);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_value_containing_placeholder_is_not_rescanned() {
        let enc = HmacEncryptor::new("k");
        let systems = vec![System::new("s").with_connection("c", [("p", "${ENV.s.c.p}")])];
        let resolver = EnvParameterResolver::new(&systems, &enc);
        let mut missing = UnresolvedVariables::new();
        let out = resolver.resolve("${ENV.s.c.p}", EnvGrammar::Plain, &mut missing).unwrap();
        assert_eq!(out, "${ENV.s.c.p}");
    }

    #[test]
    fn test_no_placeholder_is_noop() {
        let enc = HmacEncryptor::new("k");
        let resolver = EnvParameterResolver::new(&[], &enc);
        let mut missing = UnresolvedVariables::new();
        let out = resolver.resolve("plain ${x} {y}", EnvGrammar::Plain, &mut missing).unwrap();
        assert_eq!(out, "plain ${x} {y}");
    }
}
