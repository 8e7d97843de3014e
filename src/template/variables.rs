//! Variable resolution
//!
//! One resolution pass runs three stages in order:
//! 1. `${name}` replaced from the merged scope table
//! 2. `${ENV.System.Connection.param}` replaced from the environment systems
//! 3. leftover macros handed to the [`MacroEvaluator`]
//!
//! Passes repeat while the text still contains `$` or `{`, up to
//! `max_depth` extra passes. This is a depth cap, not cycle detection: a
//! placeholder that keeps producing itself comes back unresolved once the
//! cap is hit.

use indexmap::IndexMap;
use tracing::debug;

use crate::context::ResolvingContext;
use crate::crypto::Encryptor;
use crate::environment::System;
use crate::errors::Result;
use crate::models::Request;
use crate::template::environment::{EnvGrammar, EnvParameterResolver, UnresolvedVariables};
use crate::template::magic::{DecryptingScope, MacroEvaluator};

pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Request copies derived from one resolved snapshot
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    /// Secrets decrypted, sent over the wire
    pub live: Request,
    /// Secrets masked, kept for history and delivery
    pub history: Request,
}

pub struct VariableResolver<'a> {
    env: EnvParameterResolver<'a>,
    evaluator: &'a dyn MacroEvaluator,
    encryptor: &'a dyn Encryptor,
    max_depth: usize,
}

impl<'a> VariableResolver<'a> {
    pub fn new(systems: &'a [System], evaluator: &'a dyn MacroEvaluator, encryptor: &'a dyn Encryptor) -> Self {
        Self {
            env: EnvParameterResolver::new(systems, encryptor),
            evaluator,
            encryptor,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve a single string against the merged scope table
    pub fn resolve(
        &self,
        text: &str,
        vars: &IndexMap<String, String>,
        unresolved: &mut UnresolvedVariables,
    ) -> Result<String> {
        self.drive(text, |current| self.pass(current, vars, unresolved))
    }

    /// Substitute encrypted environment placeholders, then decrypt every
    /// `{ENC}` marker (`safely == false`) or mask it (`safely == true`)
    pub fn redact_or_decrypt(
        &self,
        text: &str,
        safely: bool,
        unresolved: &mut UnresolvedVariables,
    ) -> Result<String> {
        self.drive(text, |current| {
            let substituted = self.env.resolve(current, EnvGrammar::Encrypted, unresolved)?;
            if safely {
                Ok(self.encryptor.mask_encrypted_data(&substituted))
            } else {
                self.encryptor.decrypt_all(&substituted)
            }
        })
    }

    /// Resolve every field of `request` once and derive the live and history
    /// copies from that snapshot.
    ///
    /// All fields are attempted before any missing variable is reported; the
    /// error then names every unresolved placeholder.
    pub fn resolve_request(&self, request: &Request, context: &ResolvingContext) -> Result<ResolvedRequest> {
        let vars = context.merged();
        let mut unresolved = UnresolvedVariables::new();

        let mut snapshot = request.clone();
        snapshot.visit_strings_mut(|field| {
            *field = self.resolve(field, &vars, &mut unresolved)?;
            Ok(())
        })?;

        let mut live = snapshot.clone();
        live.visit_strings_mut(|field| {
            *field = self.redact_or_decrypt(field, false, &mut unresolved)?;
            Ok(())
        })?;

        let mut history = snapshot;
        history.visit_strings_mut(|field| {
            *field = self.redact_or_decrypt(field, true, &mut unresolved)?;
            Ok(())
        })?;

        if !unresolved.is_empty() {
            debug!(request = %request.name, missing = ?unresolved, "unresolved variables");
        }
        unresolved.into_result()?;

        Ok(ResolvedRequest { live, history })
    }

    fn pass(&self, text: &str, vars: &IndexMap<String, String>, unresolved: &mut UnresolvedVariables) -> Result<String> {
        let mut out = text.to_string();
        if out.contains("${") {
            for (name, value) in vars {
                let placeholder = format!("${{{}}}", name);
                if out.contains(&placeholder) {
                    out = out.replace(&placeholder, value);
                }
            }
        }

        let out = self.env.resolve(&out, EnvGrammar::Plain, unresolved)?;

        let scope = DecryptingScope::new(vars, self.encryptor);
        self.evaluator.evaluate(&out, &scope)
    }

    /// Bounded repetition shared by both resolution modes
    fn drive<F>(&self, text: &str, mut pass: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<String>,
    {
        let mut current = pass(text)?;
        let mut depth = 0;
        while depth < self.max_depth && needs_another_pass(&current) {
            let next = pass(&current)?;
            if next == current {
                break;
            }
            current = next;
            depth += 1;
        }
        Ok(current)
    }
}

fn needs_another_pass(text: &str) -> bool {
    text.contains('$') || text.contains('{')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::context::Scope;
    use crate::crypto::HmacEncryptor;
    use crate::errors::ReqflowError;
    use crate::models::Body;
    use crate::template::magic::MagicMacroEvaluator;

    fn vars(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_no_placeholders_is_noop() {
        let enc = HmacEncryptor::new("k");
        let resolver = VariableResolver::new(&[], &MagicMacroEvaluator, &enc);
        let mut missing = UnresolvedVariables::new();
        for text in ["", "plain text", "json {\"a\": 1}", "price $5"] {
            assert_eq!(resolver.resolve(text, &IndexMap::new(), &mut missing).unwrap(), text);
            assert_eq!(resolver.redact_or_decrypt(text, true, &mut missing).unwrap(), text);
            assert_eq!(resolver.redact_or_decrypt(text, false, &mut missing).unwrap(), text);
        }
        assert!(missing.is_empty());
    }

    #[test]
    fn test_nested_variables_resolve_across_passes() {
        let enc = HmacEncryptor::new("k");
        let resolver = VariableResolver::new(&[], &MagicMacroEvaluator, &enc);
        let mut missing = UnresolvedVariables::new();
        let v = vars(&[("url", "${scheme}://${host}"), ("scheme", "https"), ("host", "${name}.io"), ("name", "api")]);
        assert_eq!(resolver.resolve("${url}/x", &v, &mut missing).unwrap(), "https://api.io/x");
    }

    #[test]
    fn test_self_referencing_placeholder_is_bounded() {
        let enc = HmacEncryptor::new("k");
        let resolver = VariableResolver::new(&[], &MagicMacroEvaluator, &enc);
        let mut missing = UnresolvedVariables::new();
        let v = vars(&[("a", "x${a}")]);
        let out = resolver.resolve("${a}", &v, &mut missing).unwrap();
        assert_eq!(out, "xxxx${a}");
    }

    #[test]
    fn test_env_value_from_scope_variable() {
        let enc = HmacEncryptor::new("k");
        let systems = vec![System::new("Shop").with_connection("api", [("host", "shop.local")])];
        let resolver = VariableResolver::new(&systems, &MagicMacroEvaluator, &enc);
        let mut missing = UnresolvedVariables::new();
        let v = vars(&[("base", "http://${ENV.shop.api.host}")]);
        assert_eq!(resolver.resolve("${base}/cart", &v, &mut missing).unwrap(), "http://shop.local/cart");
    }

    #[test]
    fn test_redact_and_decrypt_modes() {
        let enc = HmacEncryptor::new("k");
        let systems = vec![System::new("Auth").with_connection("svc", [("key", "topsecret")])];
        let resolver = VariableResolver::new(&systems, &MagicMacroEvaluator, &enc);
        let mut missing = UnresolvedVariables::new();
        let text = "key={EncryptedParameterENV.auth.svc.key}";
        assert_eq!(resolver.redact_or_decrypt(text, true, &mut missing).unwrap(), "key=******");
        assert_eq!(resolver.redact_or_decrypt(text, false, &mut missing).unwrap(), "key=topsecret");
    }

    #[test]
    fn test_resolve_request_derives_independent_copies() {
        let enc = HmacEncryptor::new("k");
        let resolver = VariableResolver::new(&[], &MagicMacroEvaluator, &enc);
        let mut ctx = ResolvingContext::new();
        ctx.set(Scope::Environment, "token", enc.encrypt("abc123").unwrap());
        ctx.set(Scope::Collection, "base", "http://api");

        let req = Request::new("r", "GET", "${base}/me")
            .with_header("X-Token", "${token}")
            .with_auth(AuthConfig::Bearer { token: "${token}".into() });
        let resolved = resolver.resolve_request(&req, &ctx).unwrap();

        assert_eq!(resolved.live.url, "http://api/me");
        assert_eq!(resolved.live.header("X-Token"), Some("abc123"));
        assert_eq!(resolved.history.header("X-Token"), Some("******"));
        assert!(matches!(&resolved.live.auth, AuthConfig::Bearer { token } if token == "abc123"));
        assert!(matches!(&resolved.history.auth, AuthConfig::Bearer { token } if token == "******"));
        assert_eq!(req.url, "${base}/me");
    }

    #[test]
    fn test_encrypted_value_followed_by_literal_text() {
        let enc = HmacEncryptor::new("k");
        let resolver = VariableResolver::new(&[], &MagicMacroEvaluator, &enc);
        let mut ctx = ResolvingContext::new();
        ctx.set(Scope::Environment, "key", enc.encrypt("abc").unwrap());

        let req = Request::new("r", "GET", "http://api/${key}-x").with_header("X-Key", "${key}v2");
        let resolved = resolver.resolve_request(&req, &ctx).unwrap();

        assert_eq!(resolved.live.url, "http://api/abc-x");
        assert_eq!(resolved.live.header("X-Key"), Some("abcv2"));
        assert_eq!(resolved.history.url, "http://api/******-x");
        assert_eq!(resolved.history.header("X-Key"), Some("******v2"));
    }

    #[test]
    fn test_resolve_request_aggregates_missing_names() {
        let enc = HmacEncryptor::new("k");
        let resolver = VariableResolver::new(&[], &MagicMacroEvaluator, &enc);
        let req = Request::new("r", "POST", "${ENV.a.b.c}")
            .with_header("X", "${ENV.x.y.z}")
            .with_body(Body::Raw {
                text: "{EncryptedParameterENV.s.c.p}".into(),
            });
        let err = resolver.resolve_request(&req, &ResolvingContext::new()).unwrap_err();
        match err {
            ReqflowError::VariableNotFound(names) => {
                assert_eq!(names, ["ENV.a.b.c", "ENV.s.c.p", "ENV.x.y.z"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
