//! Send a resolved request and buffer the response

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use futures::StreamExt;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tracing::debug;

use crate::config::EngineConfig;
use crate::errors::{ReqflowError, Result};
use crate::http::client::{build_url, ClientFactory};
use crate::http::entity::{build_entity, CONTENT_TYPE};
use crate::http::response::ResponseData;
use crate::http::size::{check_request_size, check_response_size, serialize_request, serialize_response};
use crate::metrics::{ByteMetrics, Direction};
use crate::models::request::Request;
use crate::template::TemplateRenderer;

/// Response plus the serialized sizes on both sides
#[derive(Debug, Clone)]
pub struct Exchange {
    pub response: ResponseData,
    pub request_bytes: u64,
    pub response_bytes: u64,
}

pub struct HttpExecutor {
    clients: ClientFactory,
    renderer: Arc<dyn TemplateRenderer>,
    metrics: Arc<ByteMetrics>,
    project: String,
    request_limit: u64,
    response_limit: u64,
}

impl HttpExecutor {
    pub fn new(config: &EngineConfig, renderer: Arc<dyn TemplateRenderer>, metrics: Arc<ByteMetrics>) -> Result<Self> {
        Ok(Self {
            clients: ClientFactory::new(config)?,
            renderer,
            metrics,
            project: config.project.clone(),
            request_limit: config.request_size_limit_bytes(),
            response_limit: config.response_size_limit_bytes(),
        })
    }

    /// Same settings with an empty cookie jar
    pub fn fresh(&self) -> Self {
        Self {
            clients: self.clients.fresh(),
            renderer: self.renderer.clone(),
            metrics: self.metrics.clone(),
            project: self.project.clone(),
            request_limit: self.request_limit,
            response_limit: self.response_limit,
        }
    }

    /// Build the outbound request without sending it
    pub fn prepare(&self, request: &Request, vars: &IndexMap<String, String>) -> Result<(reqwest::Client, reqwest::Request)> {
        let method = Method::from_bytes(request.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| ReqflowError::InvalidRequest(format!("Invalid HTTP method: {}", request.method)))?;
        let url = build_url(&request.url, &request.params, !request.overrides.disable_auto_encoding)?;
        let entity = build_entity(request, vars, self.renderer.as_ref())?;

        let mut headers = HeaderMap::new();
        for kv in request.headers.iter().filter(|h| h.enabled && !h.key.trim().is_empty()) {
            let name = HeaderName::from_bytes(kv.key.trim().as_bytes())
                .map_err(|e| ReqflowError::InvalidRequest(format!("invalid header name '{}': {}", kv.key, e)))?;
            let value = HeaderValue::from_str(&kv.value)
                .map_err(|e| ReqflowError::InvalidRequest(format!("invalid value for header '{}': {}", kv.key, e)))?;
            headers.append(name, value);
        }
        if let Some(content_type) = &entity.content_type {
            if !request.has_header(CONTENT_TYPE) {
                let value = HeaderValue::from_str(content_type)
                    .map_err(|e| ReqflowError::InvalidRequest(e.to_string()))?;
                headers.insert(reqwest::header::CONTENT_TYPE, value);
            }
        }

        let client = self.clients.client_for(&request.overrides)?;
        let mut builder = client.request(method, url).headers(headers);
        if !entity.is_empty() {
            builder = builder.body(entity.body);
        }
        let outbound = builder.build()?;
        Ok((client, outbound))
    }

    /// Enforce the request ceiling, send, then enforce the response ceiling
    pub async fn execute(&self, request: &Request, vars: &IndexMap<String, String>) -> Result<Exchange> {
        let (client, outbound) = self.prepare(request, vars)?;
        let post_script_len = request.post_script_len();
        let transport = request.transport();

        let request_bytes = serialize_request(&outbound).len() as u64;
        check_request_size(request_bytes, post_script_len, self.request_limit)?;
        self.metrics.record(&self.project, transport, Direction::Request, request_bytes);

        debug!(method = %outbound.method(), url = %outbound.url(), "sending request");
        let started = Instant::now();
        let response = client.execute(outbound).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let mut stream = response.bytes_stream();
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
            // The serialized form is never smaller than the raw body
            check_response_size(buffer.len() as u64, post_script_len, self.response_limit)?;
        }
        let body = buffer.freeze();
        let duration = started.elapsed();

        let response_bytes = serialize_response(status, &headers, &body).len() as u64;
        self.metrics.record(&self.project, transport, Direction::Response, response_bytes);
        check_response_size(response_bytes, post_script_len, self.response_limit)?;

        debug!(status = status.as_u16(), bytes = response_bytes, ?duration, "response received");
        Ok(Exchange {
            response: ResponseData::new(status.as_u16(), &headers, body, duration),
            request_bytes,
            response_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::Body;
    use crate::template::TeraRenderer;

    fn executor() -> HttpExecutor {
        HttpExecutor::new(&EngineConfig::default(), Arc::new(TeraRenderer), Arc::new(ByteMetrics::new())).unwrap()
    }

    #[test]
    fn test_prepare_sets_default_content_type() {
        let req = Request::new("r", "post", "http://x/a").with_body(Body::Json { text: "{}".into() });
        let (_, outbound) = executor().prepare(&req, &IndexMap::new()).unwrap();
        assert_eq!(outbound.method(), Method::POST);
        assert_eq!(outbound.headers()["content-type"], "application/json");
    }

    #[test]
    fn test_prepare_keeps_user_content_type() {
        let req = Request::new("r", "POST", "http://x/a")
            .with_header("Content-Type", "application/vnd.api+json")
            .with_body(Body::Json { text: "{}".into() });
        let (_, outbound) = executor().prepare(&req, &IndexMap::new()).unwrap();
        let values: Vec<_> = outbound.headers().get_all("content-type").iter().collect();
        assert_eq!(values, ["application/vnd.api+json"]);
    }

    #[test]
    fn test_prepare_rejects_bad_method() {
        let req = Request::new("r", "GE T", "http://x/a");
        assert!(matches!(
            executor().prepare(&req, &IndexMap::new()),
            Err(ReqflowError::InvalidRequest(_))
        ));
    }
}
