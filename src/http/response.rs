//! Response capture
//!
//! A received response is buffered into [`ResponseData`]: status, headers,
//! body bytes, detected body type, cookies and timing.

use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use content_inspector::{inspect, ContentType};
use cookie::Cookie;
use mime::Mime;
use reqwest::header::{HeaderMap, CONTENT_TYPE, SET_COOKIE};

use crate::models::request::KeyValue;
use crate::models::result::{BodyType, CookieRecord};

#[derive(Debug, Clone, Default)]
pub struct ResponseData {
    pub status_code: u16,
    pub headers: Vec<KeyValue>,
    pub body: Bytes,
    pub body_type: BodyType,
    pub cookies: Vec<CookieRecord>,
    pub duration: Duration,
}

impl ResponseData {
    pub fn new(status_code: u16, headers: &HeaderMap, body: Bytes, duration: Duration) -> Self {
        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        Self {
            status_code,
            headers: headers
                .iter()
                .map(|(k, v)| KeyValue::new(k.as_str(), String::from_utf8_lossy(v.as_bytes())))
                .collect(),
            body_type: detect_body_type(content_type, &body),
            cookies: parse_cookies(headers),
            body,
            duration,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Body as text; binary bodies are base64 encoded
    pub fn body_text(&self) -> Option<String> {
        match self.body_type {
            BodyType::Empty => None,
            BodyType::Binary => Some(base64::engine::general_purpose::STANDARD.encode(&self.body)),
            _ => Some(String::from_utf8_lossy(&self.body).into_owned()),
        }
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Classify a body from its declared content type, falling back to sniffing
pub fn detect_body_type(content_type: Option<&str>, body: &[u8]) -> BodyType {
    if body.is_empty() {
        return BodyType::Empty;
    }

    if let Some(mime) = content_type.and_then(|ct| ct.parse::<Mime>().ok()) {
        let subtype = mime.subtype().as_str();
        let suffix = mime.suffix().map(|s| s.as_str());
        if subtype == "json" || suffix == Some("json") {
            return BodyType::Json;
        }
        if subtype == "xml" || suffix == Some("xml") {
            return BodyType::Xml;
        }
        if subtype == "html" {
            return BodyType::Html;
        }
        if mime.type_() == mime::TEXT {
            return BodyType::Text;
        }
        if mime.type_() == mime::IMAGE || mime.type_() == mime::AUDIO || mime.type_() == mime::VIDEO {
            return BodyType::Binary;
        }
    }

    if matches!(inspect(body), ContentType::BINARY) {
        return BodyType::Binary;
    }
    if serde_json::from_slice::<serde::de::IgnoredAny>(body).is_ok() {
        return BodyType::Json;
    }
    let head = String::from_utf8_lossy(&body[..body.len().min(256)]).trim_start().to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        BodyType::Html
    } else if head.starts_with("<?xml") {
        BodyType::Xml
    } else {
        BodyType::Text
    }
}

/// Cookies from every `Set-Cookie` header
pub fn parse_cookies(headers: &HeaderMap) -> Vec<CookieRecord> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|s| Cookie::parse(s).ok())
        .map(|c| CookieRecord {
            name: c.name().to_string(),
            value: c.value().to_string(),
            domain: c.domain().map(str::to_string),
            path: c.path().map(str::to_string),
            secure: c.secure().unwrap_or(false),
            http_only: c.http_only().unwrap_or(false),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_detect_from_content_type() {
        assert_eq!(detect_body_type(Some("application/json; charset=utf-8"), b"{}"), BodyType::Json);
        assert_eq!(detect_body_type(Some("application/problem+json"), b"{}"), BodyType::Json);
        assert_eq!(detect_body_type(Some("application/soap+xml"), b"<a/>"), BodyType::Xml);
        assert_eq!(detect_body_type(Some("text/html"), b"<p>"), BodyType::Html);
        assert_eq!(detect_body_type(Some("text/csv"), b"a,b"), BodyType::Text);
        assert_eq!(detect_body_type(Some("image/png"), b"abc"), BodyType::Binary);
    }

    #[test]
    fn test_detect_by_sniffing() {
        assert_eq!(detect_body_type(None, b""), BodyType::Empty);
        assert_eq!(detect_body_type(None, br#"{"a": 1}"#), BodyType::Json);
        assert_eq!(detect_body_type(None, b"<!DOCTYPE html><html>"), BodyType::Html);
        assert_eq!(detect_body_type(None, b"<?xml version=\"1.0\"?><a/>"), BodyType::Xml);
        assert_eq!(detect_body_type(None, b"hello"), BodyType::Text);
        assert_eq!(detect_body_type(None, &[0u8, 159, 146, 150, 0, 0]), BodyType::Binary);
    }

    #[test]
    fn test_parse_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("sid=abc; Path=/; HttpOnly; Secure"));
        headers.append(SET_COOKIE, HeaderValue::from_static("theme=dark; Domain=example.com"));
        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "sid");
        assert!(cookies[0].http_only && cookies[0].secure);
        assert_eq!(cookies[1].domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_binary_body_text_is_base64() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        let data = ResponseData::new(200, &headers, Bytes::from_static(&[0, 1, 2, 0]), Duration::ZERO);
        assert_eq!(data.body_type, BodyType::Binary);
        assert_eq!(data.body_text().as_deref(), Some("AAECAA=="));
    }
}
