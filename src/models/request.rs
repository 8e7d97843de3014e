//! Request definition
//!
//! A [`Request`] is the unresolved, user-authored description of one HTTP
//! call. It is cloned and resolved per execution; the original is never
//! mutated by the engine.

use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;
use crate::errors::Result;

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Transport tag used for metrics
pub const TRANSPORT_REST: &str = "REST";
pub const TRANSPORT_GRAPHQL: &str = "GRAPHQL";

/// Header or query parameter entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: true,
        }
    }
}

/// One part of a multipart body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormPart {
    pub name: String,
    #[serde(flatten)]
    pub value: FormPartValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormPartValue {
    File {
        file_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Text {
        value: String,
    },
}

/// Request body. Exactly one kind per request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    #[default]
    None,
    Raw {
        text: String,
    },
    Json {
        text: String,
    },
    #[serde(rename = "graphql")]
    GraphQl {
        query: String,
        /// JSON text of the variables object
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variables: Option<String>,
    },
    FormData {
        parts: Vec<FormPart>,
    },
    Binary {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Text rendered by the template renderer before sending
    Template {
        text: String,
    },
}

/// Per-request runtime toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOverrides {
    pub disable_cookies: bool,
    pub disable_ssl_verification: bool,
    pub disable_client_certificate: bool,
    pub disable_redirects: bool,
    pub disable_auto_encoding: bool,
}

/// A single HTTP request definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<KeyValue>,
    #[serde(default)]
    pub body: Body,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_script: Option<String>,
    #[serde(default)]
    pub overrides: RequestOverrides,
    /// Position among siblings
    #[serde(default)]
    pub order: u32,
}

impl Request {
    pub fn new(name: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            method: method.into(),
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: Body::None,
            auth: AuthConfig::None,
            pre_script: None,
            post_script: None,
            overrides: RequestOverrides::default(),
            order: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(KeyValue::new(key, value));
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(KeyValue::new(key, value));
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_post_script(mut self, script: impl Into<String>) -> Self {
        self.post_script = Some(script.into());
        self
    }

    pub fn with_pre_script(mut self, script: impl Into<String>) -> Self {
        self.pre_script = Some(script.into());
        self
    }

    /// First enabled header with this name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.enabled && h.key.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Matches a directive by exact name or id
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.name == name_or_id || self.id == name_or_id
    }

    pub fn transport(&self) -> &'static str {
        match self.body {
            Body::GraphQl { .. } => TRANSPORT_GRAPHQL,
            _ => TRANSPORT_REST,
        }
    }

    pub fn post_script_len(&self) -> u64 {
        self.post_script.as_ref().map_or(0, |s| s.len() as u64)
    }

    /// Apply `f` to every user-authored text field.
    ///
    /// Stops at the first error; callers that want to keep going collect
    /// failures inside the closure instead.
    pub fn visit_strings_mut<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut String) -> Result<()>,
    {
        f(&mut self.url)?;
        for kv in self.params.iter_mut().chain(self.headers.iter_mut()) {
            f(&mut kv.key)?;
            f(&mut kv.value)?;
        }
        match &mut self.body {
            Body::None | Body::Binary { .. } => {}
            Body::Raw { text } | Body::Json { text } | Body::Template { text } => f(text)?,
            Body::GraphQl { query, variables } => {
                f(query)?;
                if let Some(vars) = variables {
                    f(vars)?;
                }
            }
            Body::FormData { parts } => {
                for part in parts {
                    f(&mut part.name)?;
                    if let FormPartValue::Text { value } = &mut part.value {
                        f(value)?;
                    }
                }
            }
        }
        self.auth.visit_strings_mut(&mut f)
    }
}

pub(crate) mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
