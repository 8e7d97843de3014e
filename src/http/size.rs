//! Request and response size ceilings
//!
//! Sizes come from serializing the actual entity in HTTP/1.1 wire form
//! (start line, headers, blank line, body). `Content-Length` is never
//! trusted.

use std::io::Write;

use reqwest::header::HeaderMap;

use crate::errors::{ReqflowError, Result, SizeLimitKind};

fn write_headers(buf: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
}

/// Wire form of an outbound request
pub fn serialize_request(request: &reqwest::Request) -> Vec<u8> {
    let mut buf = Vec::new();
    let url = request.url();
    let target = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };
    let _ = write!(buf, "{} {} HTTP/1.1\r\n", request.method(), target);
    if let Some(host) = url.host_str() {
        let _ = write!(buf, "host: {}\r\n", host);
    }
    write_headers(&mut buf, request.headers());
    if let Some(body) = request.body().and_then(|b| b.as_bytes()) {
        buf.extend_from_slice(body);
    }
    buf
}

/// Wire form of an inbound response
pub fn serialize_response(status: reqwest::StatusCode, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(body.len() + 256);
    let _ = write!(
        buf,
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    write_headers(&mut buf, headers);
    buf.extend_from_slice(body);
    buf
}

/// Pre-send check: serialized size minus post-script bytes must stay below
/// `limit`
pub fn check_request_size(serialized: u64, post_script_len: u64, limit: u64) -> Result<()> {
    let size = serialized.saturating_sub(post_script_len);
    if size >= limit {
        return Err(ReqflowError::SizeLimitExceeded {
            kind: SizeLimitKind::Request,
            size,
            limit,
        });
    }
    Ok(())
}

/// Post-receive check: serialized size plus post-script bytes must stay
/// below `limit`
pub fn check_response_size(serialized: u64, post_script_len: u64, limit: u64) -> Result<()> {
    let size = serialized.saturating_add(post_script_len);
    if size >= limit {
        return Err(ReqflowError::SizeLimitExceeded {
            kind: SizeLimitKind::Response,
            size,
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_serialize_request_counts_body() {
        let client = reqwest::Client::new();
        let req = client
            .post("http://example.com/a?b=1")
            .header("X-Test", "1")
            .body("hello")
            .build()
            .unwrap();
        let wire = serialize_request(&req);
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("POST /a?b=1 HTTP/1.1\r\n"));
        assert!(text.contains("x-test: 1\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_serialize_response() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        let wire = serialize_response(reqwest::StatusCode::OK, &headers, b"ok");
        assert_eq!(wire, b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\n\r\nok");
    }

    #[test]
    fn test_request_limit_subtracts_post_script() {
        assert!(check_request_size(1100, 200, 1000).is_ok());
        let err = check_request_size(1100, 50, 1000).unwrap_err();
        assert!(matches!(
            err,
            ReqflowError::SizeLimitExceeded {
                kind: SizeLimitKind::Request,
                size: 1050,
                limit: 1000
            }
        ));
    }

    #[test]
    fn test_size_equal_to_limit_is_rejected() {
        assert!(check_request_size(999, 0, 1000).is_ok());
        assert!(matches!(
            check_request_size(1000, 0, 1000),
            Err(ReqflowError::SizeLimitExceeded {
                kind: SizeLimitKind::Request,
                size: 1000,
                limit: 1000
            })
        ));
        assert!(check_request_size(1200, 200, 1000).is_err());

        assert!(check_response_size(999, 0, 1000).is_ok());
        assert!(matches!(
            check_response_size(1000, 0, 1000),
            Err(ReqflowError::SizeLimitExceeded {
                kind: SizeLimitKind::Response,
                size: 1000,
                limit: 1000
            })
        ));
        assert!(check_response_size(800, 200, 1000).is_err());
    }

    #[test]
    fn test_response_limit_adds_post_script() {
        assert!(check_response_size(899, 100, 1000).is_ok());
        assert!(matches!(
            check_response_size(900, 101, 1000),
            Err(ReqflowError::SizeLimitExceeded {
                kind: SizeLimitKind::Response,
                ..
            })
        ));
    }
}
