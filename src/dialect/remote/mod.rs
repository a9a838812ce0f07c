//! Remote (SOAP / REST) dialect boundary.
//!
//! Remote clients implement the same [`DialectClient`] operation set as session clients; what
//! differs is how they are built. A [`RemoteDialect`] produces one client per unit of work from
//! [`RemoteSettings`] assembled by the remote schema (static headers, authentication
//! properties and proxy).

pub mod client;
pub mod document;
pub mod proxy;

pub use client::{HttpRemoteClient, HttpRemoteDialect};
pub use proxy::{ProxyInstallation, ProxyRegistry, ProxySelector};

use crate::dialect::DialectClient;
use crate::error::{BridgeError, ErrorCode, Result};
use base64::Engine;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Wire protocol of a remote backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteType {
    Soap,
    #[default]
    #[serde(alias = "rest")]
    Restful,
}

impl fmt::Display for RemoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteType::Soap => f.write_str("SOAP"),
            RemoteType::Restful => f.write_str("Restful"),
        }
    }
}

/// HTTP proxy with optional basic credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.trim().to_string(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// `http://[user:pass@]host:port`, the form `ureq::Proxy::new` expects.
    pub fn proxy_url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => {
                format!("http://{}:{}@{}:{}", user, password, self.host, self.port)
            }
            _ => format!("http://{}:{}", self.host, self.port),
        }
    }

    /// `Proxy-Authorization` header value, when credentials are configured.
    pub fn authorization(&self) -> Option<String> {
        let user = self.username.as_ref()?;
        let password = self.password.as_deref().unwrap_or_default();
        let token =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        Some(format!("Basic {token}"))
    }
}

/// Everything a remote client needs to reach its endpoint.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub remote_type: RemoteType,
    pub address: Url,
    /// Sent with every call.
    pub headers: BTreeMap<String, String>,
    pub proxy: Option<ProxyConfig>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl RemoteSettings {
    /// # Errors
    ///
    /// A malformed `address` is a `Configuration` error naming the remote type and address.
    pub fn new(remote_type: RemoteType, address: &str) -> Result<Self> {
        Ok(Self {
            remote_type,
            address: parse_endpoint(remote_type, address)?,
            headers: BTreeMap::new(),
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        })
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn proxy(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }
}

/// Parse and check a remote endpoint address.
pub fn parse_endpoint(remote_type: RemoteType, address: &str) -> Result<Url> {
    let malformed = || {
        BridgeError::configuration(ErrorCode::MalformedEndpoint, &[&remote_type, &address])
    };
    let url = Url::parse(address.trim()).map_err(|_| malformed())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(malformed());
    }
    Ok(url)
}

/// Builder of remote clients
///
/// The remote schema calls `build_soap` or `build_rest` once per unit of work, on the first
/// `begin_transaction`.
pub trait RemoteDialect: Send + Sync {
    /// Authentication properties merged into every client's headers.
    fn properties(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn build_soap(&self, settings: &RemoteSettings) -> Result<Box<dyn DialectClient>>;

    fn build_rest(&self, settings: &RemoteSettings) -> Result<Box<dyn DialectClient>>;

    fn config_retry(&self, count: u32, period: Duration);

    fn close(&self) -> Result<()>;
}
