//! Outbound entity construction
//!
//! Every request body becomes exactly one [`Entity`]: the bytes that go on
//! the wire plus the content type to send when the user did not set one.

use bytes::Bytes;
use indexmap::IndexMap;
use mime::Mime;
use rand::Rng;
use serde_json::{json, Value as JsonValue};

use crate::errors::{ReqflowError, Result};
use crate::models::request::{Body, FormPart, FormPartValue, Request};
use crate::template::TemplateRenderer;

pub const CONTENT_TYPE: &str = "Content-Type";

/// Serialized request body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entity {
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Entity {
    pub fn empty() -> Self {
        Self::default()
    }

    fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            body: body.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Build the entity for a resolved request
pub fn build_entity(
    request: &Request,
    vars: &IndexMap<String, String>,
    renderer: &dyn TemplateRenderer,
) -> Result<Entity> {
    match &request.body {
        Body::None => Ok(Entity::empty()),
        Body::Raw { text } => Ok(Entity::new("text/plain; charset=utf-8", text.clone())),
        Body::Json { text } => Ok(Entity::new("application/json", text.clone())),
        Body::GraphQl { query, variables } => graphql_envelope(query, variables.as_deref()),
        Body::FormData { parts } => {
            let boundary = request
                .header(CONTENT_TYPE)
                .and_then(boundary_from_content_type)
                .unwrap_or_else(generate_boundary);
            Ok(Entity::new(
                format!("multipart/form-data; boundary={}", boundary),
                encode_multipart(parts, &boundary),
            ))
        }
        Body::Binary { data } => Ok(Entity::new("application/octet-stream", data.clone())),
        Body::Template { text } => Ok(Entity::new("text/plain; charset=utf-8", renderer.render(text, vars)?)),
    }
}

/// Flatten a GraphQL body into the `{query, variables}` JSON envelope
fn graphql_envelope(query: &str, variables: Option<&str>) -> Result<Entity> {
    let variables = match variables.map(str::trim) {
        None | Some("") => JsonValue::Null,
        Some(text) => serde_json::from_str::<JsonValue>(text)
            .map_err(|e| ReqflowError::InvalidRequest(format!("GraphQL variables are not valid JSON: {}", e)))?,
    };
    let envelope = json!({ "query": query, "variables": variables });
    Ok(Entity::new("application/json", serde_json::to_vec(&envelope)?))
}

/// Boundary parameter of a user-supplied multipart content type
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mime: Mime = content_type.parse().ok()?;
    if mime.type_() != mime::MULTIPART {
        return None;
    }
    mime.get_param(mime::BOUNDARY).map(|b| b.as_str().to_string())
}

fn generate_boundary() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..24)
        .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
        .collect();
    format!("------------------------{}", suffix)
}

fn encode_multipart(parts: &[FormPart], boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        match &part.value {
            FormPartValue::Text { value } => {
                out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape_quotes(&part.name)).as_bytes(),
                );
                out.extend_from_slice(value.as_bytes());
            }
            FormPartValue::File {
                file_name,
                content_type,
                data,
            } => {
                let content_type = content_type.clone().unwrap_or_else(|| {
                    mime_guess::from_path(file_name)
                        .first_or_octet_stream()
                        .to_string()
                });
                out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        escape_quotes(&part.name),
                        escape_quotes(file_name),
                        content_type
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(data);
            }
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    out
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "%22")
}
