//! Per-request HTTP clients
//!
//! Runtime toggles (SSL verification, client certificate, redirects,
//! cookies) are client-level settings in reqwest, so one client is built per
//! toggle combination and reused afterwards.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::{Client, Identity};
use tracing::debug;
use url::Url;

use crate::config::EngineConfig;
use crate::errors::{ReqflowError, Result};
use crate::models::request::{KeyValue, RequestOverrides};

pub const USER_AGENT_STRING: &str = concat!("reqflow/", env!("CARGO_PKG_VERSION"));

const MAX_REDIRECTS: usize = 10;

/// Characters escaped in query keys and values
const QUERY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'&')
    .add(b'+')
    .add(b'=')
    .add(b'%');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ClientKey {
    verify_ssl: bool,
    client_cert: bool,
    follow_redirects: bool,
    cookies: bool,
}

impl From<&RequestOverrides> for ClientKey {
    fn from(o: &RequestOverrides) -> Self {
        Self {
            verify_ssl: !o.disable_ssl_verification,
            client_cert: !o.disable_client_certificate,
            follow_redirects: !o.disable_redirects,
            cookies: !o.disable_cookies,
        }
    }
}

/// Builds and caches clients for one cookie jar
pub struct ClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
    identity: Option<Identity>,
    jar: Arc<Jar>,
    clients: DashMap<ClientKey, Client>,
}

impl ClientFactory {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            identity: load_identity(config)?,
            jar: Arc::new(Jar::default()),
            clients: DashMap::new(),
        })
    }

    /// Same settings, fresh cookie jar and client cache
    pub fn fresh(&self) -> Self {
        Self {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            identity: self.identity.clone(),
            jar: Arc::new(Jar::default()),
            clients: DashMap::new(),
        }
    }

    pub fn client_for(&self, overrides: &RequestOverrides) -> Result<Client> {
        let key = ClientKey::from(overrides);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        debug!(?key, "building HTTP client");
        let mut builder = Client::builder()
            .user_agent(USER_AGENT_STRING)
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .referer(false);

        builder = if key.follow_redirects {
            builder.redirect(Policy::limited(MAX_REDIRECTS))
        } else {
            builder.redirect(Policy::none())
        };

        if !key.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if key.client_cert {
            if let Some(identity) = &self.identity {
                builder = builder.identity(identity.clone());
            }
        }

        if key.cookies {
            builder = builder.cookie_provider(self.jar.clone());
        }

        let client = builder.build()?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

fn load_identity(config: &EngineConfig) -> Result<Option<Identity>> {
    let Some(cert_path) = &config.client_cert else {
        return Ok(None);
    };
    let mut pem = std::fs::read(cert_path)?;
    if let Some(key_path) = &config.client_key {
        pem.extend_from_slice(b"\n");
        pem.extend_from_slice(&std::fs::read(key_path)?);
    }
    let identity = Identity::from_pem(&pem)
        .map_err(|e| ReqflowError::Config(format!("Invalid client certificate: {}", e)))?;
    Ok(Some(identity))
}

/// Parse the URL and append enabled query parameters.
///
/// With `encode == false` keys and values are taken as already encoded.
pub fn build_url(raw: &str, params: &[KeyValue], encode: bool) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    let enabled: Vec<&KeyValue> = params.iter().filter(|p| p.enabled).collect();
    if enabled.is_empty() {
        return Ok(url);
    }

    let mut query = url.query().unwrap_or_default().to_string();
    for param in enabled {
        if !query.is_empty() {
            query.push('&');
        }
        if encode {
            query.push_str(&utf8_percent_encode(&param.key, QUERY_ENCODE_SET).to_string());
            query.push('=');
            query.push_str(&utf8_percent_encode(&param.value, QUERY_ENCODE_SET).to_string());
        } else {
            query.push_str(&param.key);
            query.push('=');
            query.push_str(&param.value);
        }
    }
    url.set_query(Some(&query));
    Ok(url)
}
