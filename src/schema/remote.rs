//! Schema for the remote family.
//!
//! Each unit of work gets at most one remote client, built on its first `begin_transaction`
//! and bound until `clear_transactional`. The schema counts begins in an atomic so operators
//! can see how many remote clients are live; clearing a unit of work subtracts exactly what it
//! added.

use super::{prepare_store, release_bound, Schema, SchemaSupport, TransactionState, UnitOfWork};
use crate::config::RemoteConfig;
use crate::dialect::remote::proxy::{self, ProxyInstallation, ProxyRegistry};
use crate::dialect::remote::{parse_endpoint, RemoteDialect, RemoteSettings, RemoteType};
use crate::dialect::DialectClient;
use crate::error::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

pub struct RemoteSchema {
    support: SchemaSupport,
    dialect: Arc<dyn RemoteDialect>,
    config: RemoteConfig,
    active: AtomicUsize,
    registry: &'static ProxyRegistry,
    installation: Mutex<Option<ProxyInstallation>>,
}

impl RemoteSchema {
    /// # Errors
    ///
    /// `MalformedEndpoint` when the remote address does not parse for its remote type, and
    /// for SOAP with a configured proxy, a conflict with an already installed selector.
    pub fn new(
        support: SchemaSupport,
        dialect: Arc<dyn RemoteDialect>,
        config: RemoteConfig,
    ) -> Result<Self> {
        Self::with_registry(support, dialect, config, proxy::global())
    }

    /// Like [`RemoteSchema::new`], installing the proxy selector into `registry`.
    pub fn with_registry(
        support: SchemaSupport,
        dialect: Arc<dyn RemoteDialect>,
        config: RemoteConfig,
        registry: &'static ProxyRegistry,
    ) -> Result<Self> {
        let address = parse_endpoint(config.remote_type, &config.remote_address)?;
        let installation = match (&config.remote_type, &config.proxy) {
            (RemoteType::Soap, Some(proxy)) => Some(registry.install(&address, proxy.clone())?),
            _ => None,
        };

        Ok(Self {
            support,
            dialect,
            config,
            active: AtomicUsize::new(0),
            registry,
            installation: Mutex::new(installation),
        })
    }

    /// Begins not yet matched by a clear.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Settings for a client of `uow`. A per-call proxy wins over the configured one; SOAP
    /// clients without a per-call proxy take whatever this schema's registry selects.
    fn settings(&self, uow: &UnitOfWork) -> Result<RemoteSettings> {
        let mut settings =
            RemoteSettings::new(self.config.remote_type, &self.config.remote_address)?.timeouts(
                Duration::from_secs(self.config.connect_timeout_seconds),
                Duration::from_secs(self.config.read_timeout_seconds),
            );
        for (name, value) in &self.config.headers {
            settings = settings.header(name, value);
        }
        for (name, value) in self.dialect.properties() {
            settings = settings.header(&name, &value);
        }

        let proxy = match (uow.proxy_config(), self.config.remote_type) {
            (Some(proxy), _) => Some(proxy.clone()),
            (None, RemoteType::Soap) => self.registry.select(&settings.address),
            (None, RemoteType::Restful) => self.config.proxy.clone(),
        };
        Ok(settings.proxy(proxy))
    }

    fn build(&self, uow: &UnitOfWork) -> Result<Box<dyn DialectClient>> {
        let settings = self.settings(uow)?;
        log::debug!(
            "Building {} client for {} (unit of work {})",
            settings.remote_type,
            settings.address,
            uow.id()
        );
        match settings.remote_type {
            RemoteType::Soap => self.dialect.build_soap(&settings),
            RemoteType::Restful => self.dialect.build_rest(&settings),
        }
    }
}

impl Schema for RemoteSchema {
    fn support(&self) -> &SchemaSupport {
        &self.support
    }

    fn open_client(&self, uow: &UnitOfWork) -> Result<Box<dyn DialectClient>> {
        self.build(uow)
    }

    fn initialize(&self) -> Result<()> {
        log::info!(
            "Initialising remote schema at {} ({} tables)",
            self.config.remote_address,
            self.support.tables().len()
        );
        let mut client = self.build(&UnitOfWork::new())?;
        let prepared = prepare_store(&self.support, client.as_mut());
        if let Err(err) = client.close() {
            log::warn!("Failed to close initialisation client: {}", err);
        }
        prepared?;
        self.support.start_tasks()
    }

    fn begin_transaction(&self, uow: &mut UnitOfWork) -> Result<()> {
        self.active.fetch_add(1, Ordering::SeqCst);
        uow.count_begin();
        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.remote_clients_changed(1);

        if !uow.has_client() {
            let client = self.build(uow)?;
            uow.bind_client(client);
        }

        let Some(config) = uow.transaction().cloned() else {
            return Ok(());
        };
        if !config.isolation.is_transactional() || uow.state() == TransactionState::Active {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span(&uow.id().to_string()).entered();

        if let Some(client) = uow.client_mut() {
            client.begin_transaction(&config)?;
        }
        uow.set_state(TransactionState::Active);
        Ok(())
    }

    fn clear_transactional(&self, uow: &mut UnitOfWork) {
        release_bound(uow);
        let begun = uow.take_begin_count();
        if begun > 0 {
            self.active.fetch_sub(begun, Ordering::SeqCst);
            #[cfg(feature = "metrics")]
            crate::metrics::METRICS.remote_clients_changed(-(begun as i64));
        }
    }

    fn config_retry(&self, count: u32, period: Duration) {
        self.dialect.config_retry(count, period);
    }

    fn close(&self) -> Result<()> {
        let installation = self
            .installation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(installation) = installation {
            self.registry.uninstall(&installation);
        }
        if let Err(err) = self.support.stop_tasks() {
            log::warn!("Failed to stop task queue: {}", err);
        }
        self.dialect.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define::{ColumnDefine, DataType, TableDefine};
    use crate::dialect::remote::{HttpRemoteDialect, ProxyConfig};
    use crate::dialect::DialectType;
    use crate::error::{ErrorCode, ErrorKind};
    use crate::row::Row;
    use crate::schema::transaction::TransactionConfig;
    use crate::test_helpers::{Call, RecordingDialect};
    use once_cell::sync::Lazy;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;
    use url::Url;

    fn remote_config(remote_type: RemoteType, address: &str) -> RemoteConfig {
        let mut config = RemoteConfig::new(remote_type, address);
        config.headers = BTreeMap::from([("X-Tenant".to_string(), "acme".to_string())]);
        config.read_timeout_seconds = 15;
        config
    }

    fn schema(dialect: &Arc<RecordingDialect>, config: RemoteConfig) -> RemoteSchema {
        let support = SchemaSupport::new(
            DialectType::Remote,
            vec![TableDefine::new(
                "tickets",
                None,
                vec![ColumnDefine::new("id", DataType::BigInt).primary_key()],
                vec![],
            )],
            "main",
        );
        RemoteSchema::new(support, Arc::clone(dialect) as Arc<dyn RemoteDialect>, config).unwrap()
    }

    #[test]
    fn test_two_begins_count_twice_but_build_once() {
        let dialect = Arc::new(RecordingDialect::default());
        let schema = schema(&dialect, remote_config(RemoteType::Restful, "https://svc/api"));
        let mut uow = UnitOfWork::with_transaction(TransactionConfig::default());

        schema.begin_transaction(&mut uow).unwrap();
        schema.begin_transaction(&mut uow).unwrap();
        assert_eq!(schema.active_connections(), 2);
        assert_eq!(
            dialect
                .calls()
                .iter()
                .filter(|c| **c == Call::Build(RemoteType::Restful))
                .count(),
            1
        );
        assert_eq!(dialect.calls().iter().filter(|c| **c == Call::Begin).count(), 1);

        schema.clear_transactional(&mut uow);
        assert_eq!(schema.active_connections(), 0);
        assert!(!uow.has_client());
        assert_eq!(uow.state(), TransactionState::Idle);
    }

    #[test]
    fn test_clear_restores_only_its_own_begins() {
        let dialect = Arc::new(RecordingDialect::default());
        let schema = schema(&dialect, remote_config(RemoteType::Restful, "https://svc/api"));
        let mut first = UnitOfWork::new();
        let mut second = UnitOfWork::new();

        schema.begin_transaction(&mut first).unwrap();
        schema.begin_transaction(&mut second).unwrap();
        schema.begin_transaction(&mut second).unwrap();
        assert_eq!(schema.active_connections(), 3);

        schema.clear_transactional(&mut second);
        assert_eq!(schema.active_connections(), 1);
        schema.clear_transactional(&mut first);
        assert_eq!(schema.active_connections(), 0);
    }

    fn construct(config: RemoteConfig) -> Result<RemoteSchema> {
        let dialect: Arc<dyn RemoteDialect> = Arc::new(RecordingDialect::default());
        RemoteSchema::new(SchemaSupport::new(DialectType::Remote, vec![], "main"), dialect, config)
    }

    #[test]
    fn test_malformed_endpoint_fails_construction() {
        for remote_type in [RemoteType::Soap, RemoteType::Restful] {
            let err = construct(remote_config(remote_type, "not an url")).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Configuration);
            assert_eq!(err.code(), ErrorCode::MalformedEndpoint);
            assert!(err.to_string().contains(&remote_type.to_string()));
        }
    }

    #[test]
    fn test_settings_merge_headers_properties_and_proxy() {
        let dialect = Arc::new(RecordingDialect::default());
        dialect.property("Authorization", "Bearer token");
        let mut config = remote_config(RemoteType::Restful, "https://svc/api");
        config.proxy = Some(ProxyConfig::new("configured", 8080));
        let schema = schema(&dialect, config);

        let mut uow = UnitOfWork::new();
        schema.begin_transaction(&mut uow).unwrap();
        let settings = dialect.last_settings().unwrap();
        assert_eq!(settings.headers["X-Tenant"], "acme");
        assert_eq!(settings.headers["Authorization"], "Bearer token");
        assert_eq!(settings.proxy.as_ref().map(|p| p.host.as_str()), Some("configured"));
        assert_eq!(settings.read_timeout, Duration::from_secs(15));
        schema.clear_transactional(&mut uow);

        let mut uow = UnitOfWork::new().proxy(ProxyConfig::new("per-call", 3128));
        schema.begin_transaction(&mut uow).unwrap();
        let settings = dialect.last_settings().unwrap();
        assert_eq!(settings.proxy.map(|p| p.host), Some("per-call".to_string()));
        schema.clear_transactional(&mut uow);
    }

    #[test]
    fn test_data_operation_uses_bound_client() {
        let dialect = Arc::new(RecordingDialect::default());
        let schema = schema(&dialect, remote_config(RemoteType::Restful, "https://svc/api"));
        let mut uow = UnitOfWork::new();
        schema.begin_transaction(&mut uow).unwrap();
        schema
            .insert(&mut uow, "tickets", &Row::from([("id".to_string(), json!(4))]))
            .unwrap();
        schema.clear_transactional(&mut uow);

        let builds = dialect
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Build(_)))
            .count();
        assert_eq!(builds, 1);
    }

    static REGISTRY: Lazy<ProxyRegistry> = Lazy::new(ProxyRegistry::default);

    #[test]
    fn test_soap_proxy_selector_lives_until_close() {
        let dialect = Arc::new(RecordingDialect::default());
        let mut config = remote_config(RemoteType::Soap, "https://soap.example.com/ws/Service");
        config.proxy = Some(ProxyConfig::new("gateway", 3128));
        let support = SchemaSupport::new(DialectType::Remote, vec![], "main");
        let schema = RemoteSchema::with_registry(
            support,
            Arc::clone(&dialect) as Arc<dyn RemoteDialect>,
            config,
            &REGISTRY,
        )
        .unwrap();

        let destination = Url::parse("https://soap.example.com/ws").unwrap();
        assert_eq!(
            REGISTRY.select(&destination).map(|p| p.host),
            Some("gateway".to_string())
        );
        assert_eq!(
            REGISTRY.select(&Url::parse("https://elsewhere.example.com/ws").unwrap()),
            None
        );

        let mut uow = UnitOfWork::new();
        schema.begin_transaction(&mut uow).unwrap();
        assert_eq!(
            dialect.last_settings().unwrap().proxy.map(|p| p.host),
            Some("gateway".to_string())
        );
        schema.clear_transactional(&mut uow);

        schema.close().unwrap();
        assert_eq!(REGISTRY.select(&destination), None);

        let mut uow = UnitOfWork::new();
        schema.begin_transaction(&mut uow).unwrap();
        assert!(dialect.last_settings().unwrap().proxy.is_none());
        schema.clear_transactional(&mut uow);
    }

    static SOAP_REGISTRY: Lazy<ProxyRegistry> = Lazy::new(ProxyRegistry::default);

    /// Accepts one request on a loopback listener standing in for the proxy.
    fn proxy_listener(reply: &'static str) -> (u16, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request = String::new();
            let mut length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    length = value.trim().parse().unwrap();
                }
                request.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                reply.len(),
                reply
            )
            .unwrap();
            tx.send(request).unwrap();
        });
        (port, rx)
    }

    #[test]
    fn test_soap_client_from_http_dialect_goes_through_installed_proxy() {
        let (port, requests) = proxy_listener(
            "<Envelope><Body><r><return>{&quot;transaction_id&quot;:&quot;tx-1&quot;}</return></r></Body></Envelope>",
        );
        // `.test` never resolves, so the request can only arrive through the proxy.
        let mut config = RemoteConfig::new(RemoteType::Soap, "http://soap.internal.test/ws/Ledger");
        config.proxy = Some(ProxyConfig::new("127.0.0.1", port));
        config.connect_timeout_seconds = 2;
        config.read_timeout_seconds = 2;
        let schema = RemoteSchema::with_registry(
            SchemaSupport::new(DialectType::Remote, vec![], "main"),
            Arc::new(HttpRemoteDialect::new()),
            config,
            &SOAP_REGISTRY,
        )
        .unwrap();

        let mut uow = UnitOfWork::with_transaction(TransactionConfig::default());
        // The proxy may be asked to forward or to tunnel; either way it sees the destination.
        let _ = schema.begin_transaction(&mut uow);
        let request = requests
            .recv_timeout(Duration::from_secs(10))
            .expect("request reached the proxy");
        assert!(request.contains("soap.internal.test"));

        schema.clear_transactional(&mut uow);
        assert_eq!(schema.active_connections(), 0);
        schema.close().unwrap();
        assert_eq!(
            SOAP_REGISTRY.select(&Url::parse("http://soap.internal.test/ws/Ledger").unwrap()),
            None
        );
    }
}
