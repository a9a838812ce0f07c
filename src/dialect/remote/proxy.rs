//! Process-wide proxy selection for SOAP transports.
//!
//! A remote schema installs one [`RemoteProxySelector`] at construction. It claims every
//! destination whose normalised `scheme://host:port/path` is a prefix of the configured remote
//! address and hands everything else to the selector that was current before it. Closing the
//! schema uninstalls it again.

use super::ProxyConfig;
use crate::error::{BridgeError, ErrorCode, Result};
use once_cell::sync::Lazy;
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

/// Chooses the proxy (if any) for a destination.
pub trait ProxySelector: Send + Sync {
    fn select(&self, destination: &Url) -> Option<ProxyConfig>;

    /// Whether this selector (or one it falls back to) claims `prefix` with a proxy other
    /// than `proxy`.
    fn conflicts(&self, _prefix: &str, _proxy: &ProxyConfig) -> bool {
        false
    }
}

/// No proxy for anything.
pub struct DirectSelector;

impl ProxySelector for DirectSelector {
    fn select(&self, _destination: &Url) -> Option<ProxyConfig> {
        None
    }
}

pub struct RemoteProxySelector {
    prefix: String,
    proxy: ProxyConfig,
    previous: Arc<dyn ProxySelector>,
}

impl RemoteProxySelector {
    pub fn new(address: &Url, proxy: ProxyConfig, previous: Arc<dyn ProxySelector>) -> Self {
        Self {
            prefix: normalize(address),
            proxy,
            previous,
        }
    }
}

impl ProxySelector for RemoteProxySelector {
    fn select(&self, destination: &Url) -> Option<ProxyConfig> {
        if self.prefix.starts_with(&normalize(destination)) {
            Some(self.proxy.clone())
        } else {
            self.previous.select(destination)
        }
    }

    fn conflicts(&self, prefix: &str, proxy: &ProxyConfig) -> bool {
        (self.prefix == prefix && self.proxy != *proxy) || self.previous.conflicts(prefix, proxy)
    }
}

/// `scheme://host:port/path`, lowercased, with the scheme's default port filled in.
pub fn normalize(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let port = url
        .port_or_known_default()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    format!("{}://{}{}{}", url.scheme(), host, port, url.path())
}

/// Holder of the current selector.
pub struct ProxyRegistry {
    current: RwLock<Arc<dyn ProxySelector>>,
}

impl Default for ProxyRegistry {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(DirectSelector)),
        }
    }
}

impl ProxyRegistry {
    pub fn current(&self) -> Arc<dyn ProxySelector> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*current)
    }

    pub fn select(&self, destination: &Url) -> Option<ProxyConfig> {
        self.current().select(destination)
    }

    /// Install a selector for `address`, chained in front of the current one.
    ///
    /// # Errors
    ///
    /// `ProxyConflict` when another selector already routes the same address through a
    /// different proxy.
    pub fn install(&self, address: &Url, proxy: ProxyConfig) -> Result<ProxyInstallation> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let prefix = normalize(address);
        if current.conflicts(&prefix, &proxy) {
            return Err(BridgeError::configuration(
                ErrorCode::ProxyConflict,
                &[&prefix, &format!("{}:{}", proxy.host, proxy.port)],
            ));
        }

        let previous = Arc::clone(&*current);
        let installed: Arc<dyn ProxySelector> =
            Arc::new(RemoteProxySelector::new(address, proxy, Arc::clone(&previous)));
        *current = Arc::clone(&installed);
        log::info!("Installed proxy selector for {}", prefix);
        Ok(ProxyInstallation {
            prefix,
            installed,
            previous,
        })
    }

    /// Restore the selector that was current before `installation`.
    ///
    /// Returns `false` (and leaves the registry alone) when another selector has been
    /// installed on top in the meantime.
    pub fn uninstall(&self, installation: &ProxyInstallation) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if Arc::ptr_eq(&*current, &installation.installed) {
            *current = Arc::clone(&installation.previous);
            log::info!("Removed proxy selector for {}", installation.prefix);
            true
        } else {
            log::warn!(
                "Proxy selector for {} is no longer current, leaving it installed",
                installation.prefix
            );
            false
        }
    }
}

/// Token returned by [`ProxyRegistry::install`].
pub struct ProxyInstallation {
    prefix: String,
    installed: Arc<dyn ProxySelector>,
    previous: Arc<dyn ProxySelector>,
}

impl ProxyInstallation {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

static GLOBAL: Lazy<ProxyRegistry> = Lazy::new(ProxyRegistry::default);

/// The process-wide registry consulted by SOAP clients.
pub fn global() -> &'static ProxyRegistry {
    &GLOBAL
}
