//! HTTP remote dialect over `ureq`.
//!
//! REST clients `POST {address}/{operation}` with a JSON body. SOAP clients `POST {address}`
//! with a `SOAPAction: {operation}` header and an envelope whose single argument carries the
//! same JSON document; the reply's `return` element holds the JSON answer and a `Fault` body
//! becomes a transport error.

use super::{document, ProxyConfig, RemoteDialect, RemoteSettings, RemoteType};
use crate::define::{ColumnDefine, TableDefine};
use crate::dialect::{DialectClient, RetryBudget, RetryPolicy, RoutingKey};
use crate::error::{BridgeError, ErrorCode, Result};
use crate::query::{Condition, QueryInfo};
use crate::row::Row;
use crate::schema::transaction::TransactionConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Header echoing the remote transaction id on every call after `beginTransaction`.
pub const TRANSACTION_HEADER: &str = "X-Transaction-Id";

static SOAP_RETURN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:[A-Za-z0-9_]+:)?return(?:\s[^>]*)?>(.*?)</(?:[A-Za-z0-9_]+:)?return>")
        .expect("return pattern is valid")
});

static SOAP_FAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:[A-Za-z0-9_]+:)?Fault[\s>].*?<faultstring[^>]*>(.*?)</faultstring>")
        .expect("fault pattern is valid")
});

/// Remote dialect speaking HTTP
///
/// # Examples
///
/// ```no_run
/// use bridgehead::dialect::remote::{HttpRemoteDialect, RemoteDialect, RemoteSettings, RemoteType};
///
/// let dialect = HttpRemoteDialect::new().property("Authorization", "Bearer token");
/// let settings = RemoteSettings::new(RemoteType::Restful, "https://data.example.com/api")?;
/// let client = dialect.build_rest(&settings)?;
/// # Ok::<(), bridgehead::BridgeError>(())
/// ```
#[derive(Default)]
pub struct HttpRemoteDialect {
    properties: BTreeMap<String, String>,
    retry: Arc<RetryBudget>,
}

impl HttpRemoteDialect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authentication property sent as a header by every client.
    pub fn property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }

    fn build(
        &self,
        settings: &RemoteSettings,
        proxy: Option<ProxyConfig>,
    ) -> Result<Box<dyn DialectClient>> {
        let client = HttpRemoteClient::new(settings.clone(), proxy, self.retry.policy())?;
        Ok(Box::new(client))
    }
}

impl RemoteDialect for HttpRemoteDialect {
    fn properties(&self) -> BTreeMap<String, String> {
        self.properties.clone()
    }

    /// The proxy comes from `settings`; the remote schema resolves it through its selector
    /// registry before building.
    fn build_soap(&self, settings: &RemoteSettings) -> Result<Box<dyn DialectClient>> {
        self.build(settings, settings.proxy.clone())
    }

    fn build_rest(&self, settings: &RemoteSettings) -> Result<Box<dyn DialectClient>> {
        self.build(settings, settings.proxy.clone())
    }

    fn config_retry(&self, count: u32, period: Duration) {
        self.retry.configure(count, period);
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct HttpRemoteClient {
    agent: ureq::Agent,
    settings: RemoteSettings,
    proxy_authorization: Option<String>,
    retry: RetryPolicy,
    transaction_id: Option<String>,
    in_transaction: bool,
}

impl HttpRemoteClient {
    pub fn new(
        settings: RemoteSettings,
        proxy: Option<ProxyConfig>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let mut builder = ureq::AgentBuilder::new()
            .timeout_connect(settings.connect_timeout)
            .timeout_read(settings.read_timeout);
        let mut proxy_authorization = None;
        if let Some(proxy) = proxy.as_ref() {
            let configured = ureq::Proxy::new(proxy.proxy_url()).map_err(|err| {
                BridgeError::configuration(
                    ErrorCode::InvalidConfiguration,
                    &[&format!("proxy {}:{}: {}", proxy.host, proxy.port, err)],
                )
            })?;
            builder = builder.proxy(configured);
            proxy_authorization = proxy.authorization();
        }

        Ok(Self {
            agent: builder.build(),
            settings,
            proxy_authorization,
            retry,
            transaction_id: None,
            in_transaction: false,
        })
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    fn endpoint(&self, operation: &str) -> String {
        match self.settings.remote_type {
            RemoteType::Restful => format!(
                "{}/{}",
                self.settings.address.as_str().trim_end_matches('/'),
                operation
            ),
            RemoteType::Soap => self.settings.address.to_string(),
        }
    }

    fn call(&mut self, operation: &str, payload: Value) -> Result<Value> {
        #[cfg(feature = "tracing")]
        let _span =
            tracing_helpers::remote_call_span(&self.settings.remote_type.to_string(), operation)
                .entered();

        let url = self.endpoint(operation);
        let body = match self.settings.remote_type {
            RemoteType::Restful => payload.to_string(),
            RemoteType::Soap => soap_envelope(operation, &payload),
        };
        log::debug!("Remote call {} -> {}", operation, url);

        let response = self.retry.acquire(&url, || {
            let mut request = self.agent.post(&url);
            for (name, value) in &self.settings.headers {
                request = request.set(name, value);
            }
            request = match self.settings.remote_type {
                RemoteType::Restful => request.set("Content-Type", "application/json"),
                RemoteType::Soap => request
                    .set("Content-Type", "text/xml; charset=utf-8")
                    .set("SOAPAction", operation),
            };
            if let Some(authorization) = self.proxy_authorization.as_deref() {
                if url.starts_with("http://") {
                    request = request.set("Proxy-Authorization", authorization);
                }
            }
            if let Some(id) = self.transaction_id.as_deref() {
                request = request.set(TRANSACTION_HEADER, id);
            }
            request.send_string(&body).map_err(|err| classify(&url, err))
        })?;

        let text = response.into_string().map_err(|err| {
            BridgeError::transport(ErrorCode::Backend, &[&"remote", &err])
        })?;
        match self.settings.remote_type {
            RemoteType::Restful => parse_json(&text),
            RemoteType::Soap => parse_soap(&url, &text),
        }
    }

    fn routed(route: &RoutingKey, define: &TableDefine) -> serde_json::Map<String, Value> {
        let mut payload = serde_json::Map::new();
        payload.insert("table".to_string(), json!(route.physical_table(define)));
        if let Some(database) = route.database() {
            payload.insert("database".to_string(), json!(database));
        }
        payload
    }
}

/// Connection-level failures are retryable; nothing reached the endpoint.
fn classify(url: &str, err: ureq::Error) -> BridgeError {
    if let ureq::Error::Transport(transport) = &err {
        if matches!(
            transport.kind(),
            ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns
        ) {
            return BridgeError::retryable(ErrorCode::ConnectionUnavailable, &[&url, transport]);
        }
    }
    BridgeError::from(err)
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn soap_envelope(operation: &str, payload: &Value) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\">\
         <soapenv:Body><{operation}><arg0>{}</arg0></{operation}></soapenv:Body>\
         </soapenv:Envelope>",
        xml_escape(&payload.to_string())
    )
}

fn parse_json(text: &str) -> Result<Value> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(text)?)
}

pub fn parse_soap(url: &str, text: &str) -> Result<Value> {
    if let Some(fault) = SOAP_FAULT.captures(text) {
        let message = fault.get(1).map(|m| xml_unescape(m.as_str())).unwrap_or_default();
        return Err(BridgeError::transport(ErrorCode::RemoteFault, &[&url, &message]));
    }
    match SOAP_RETURN.captures(text).and_then(|c| c.get(1)) {
        Some(value) => parse_json(&xml_unescape(value.as_str())),
        None => Ok(Value::Null),
    }
}

fn unexpected(operation: &str, value: &Value) -> BridgeError {
    BridgeError::transport(
        ErrorCode::Serialization,
        &[&format!("unexpected {operation} reply: {value}")],
    )
}

fn into_row(operation: &str, value: Value) -> Result<Row> {
    match value {
        Value::Null => Ok(Row::new()),
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(unexpected(operation, &other)),
    }
}

fn into_rows(operation: &str, value: Value) -> Result<Vec<Row>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| into_row(operation, item))
            .collect(),
        other => Err(unexpected(operation, &other)),
    }
}

fn into_count(operation: &str, value: Value) -> Result<u64> {
    match &value {
        Value::Null => Ok(0),
        Value::Number(n) => n.as_u64().ok_or_else(|| unexpected(operation, &value)),
        Value::Object(map) => ["affected", "total", "count"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_u64))
            .ok_or_else(|| unexpected(operation, &value)),
        _ => Err(unexpected(operation, &value)),
    }
}

fn into_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_u64().is_some_and(|n| n > 0),
        Value::Object(map) => map.get("locked").and_then(Value::as_bool).unwrap_or(false),
        _ => false,
    }
}

impl DialectClient for HttpRemoteClient {
    fn begin_transaction(&mut self, config: &TransactionConfig) -> Result<()> {
        let reply = self.call(
            "beginTransaction",
            json!({
                "isolation": config.isolation.to_sql(),
                "timeout_seconds": config.timeout_seconds,
                "read_only": config.read_only,
            }),
        )?;
        self.transaction_id = match &reply {
            Value::String(id) => Some(id.clone()),
            Value::Object(map) => map
                .get("transaction_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        let result = self.call("commit", json!({}));
        self.in_transaction = false;
        self.transaction_id = None;
        result.map(|_| ())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        let result = self.call("rollback", json!({}));
        self.in_transaction = false;
        self.transaction_id = None;
        result.map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        self.rollback()
    }

    fn init_sharding(&mut self, tables: &[Arc<TableDefine>]) -> Result<()> {
        let sharded: Vec<Value> = tables
            .iter()
            .filter(|t| t.is_sharded())
            .map(|t| json!({ "table": t.name(), "sharding": t.sharding() }))
            .collect();
        if sharded.is_empty() {
            return Ok(());
        }
        self.call("initSharding", json!({ "tables": sharded }))?;
        Ok(())
    }

    fn init_table(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()> {
        if define.columns().is_empty() {
            return Err(BridgeError::usage(
                ErrorCode::MissingTableMetadata,
                &[&define.name(), &"column"],
            ));
        }
        if let Some(index) = define.indexes().iter().find(|i| i.columns.is_empty()) {
            return Err(BridgeError::usage(
                ErrorCode::MissingTableMetadata,
                &[&define.name(), &format!("index {}", index.name)],
            ));
        }
        let mut payload = Self::routed(route, define);
        payload.insert("columns".to_string(), json!(define.columns()));
        payload.insert("indexes".to_string(), json!(define.indexes()));
        self.call("initTable", Value::Object(payload))?;
        Ok(())
    }

    fn table_columns(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
    ) -> Result<Vec<ColumnDefine>> {
        let reply = self.call("tableColumns", Value::Object(Self::routed(route, define)))?;
        if reply.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(reply)?)
    }

    fn insert(&mut self, route: &RoutingKey, define: &TableDefine, data: &Row) -> Result<Row> {
        let values = document::declared_data(define, data);
        if values.is_empty() {
            return Err(BridgeError::usage(ErrorCode::EmptyPayload, &[&define.name()]));
        }
        let mut payload = Self::routed(route, define);
        payload.insert("data".to_string(), Value::Object(values));
        let reply = self.call("insert", Value::Object(payload))?;
        match into_row("insert", reply)? {
            row if row.is_empty() => Ok(data.clone()),
            row => Ok(row),
        }
    }

    fn retrieve(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
        columns: &[String],
    ) -> Result<Row> {
        let mut payload = Self::routed(route, define);
        payload.insert("conditions".to_string(), document::conditions(filter));
        payload.insert("columns".to_string(), json!(columns));
        let reply = self.call("retrieve", Value::Object(payload))?;
        into_row("retrieve", reply)
    }

    fn update(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        data: &Row,
        filter: &[Condition],
    ) -> Result<u64> {
        if filter.is_empty() {
            return Err(BridgeError::usage(
                ErrorCode::EmptyFilter,
                &[&define.name(), &"update"],
            ));
        }
        let mut payload = Self::routed(route, define);
        payload.insert(
            "data".to_string(),
            Value::Object(document::declared_data(define, data)),
        );
        payload.insert("conditions".to_string(), document::conditions(filter));
        let reply = self.call("update", Value::Object(payload))?;
        into_count("update", reply)
    }

    fn delete(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
    ) -> Result<u64> {
        if filter.is_empty() {
            return Err(BridgeError::usage(
                ErrorCode::EmptyFilter,
                &[&define.name(), &"delete"],
            ));
        }
        let mut payload = Self::routed(route, define);
        payload.insert("conditions".to_string(), document::conditions(filter));
        let reply = self.call("delete", Value::Object(payload))?;
        into_count("delete", reply)
    }

    fn lock_record(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
    ) -> Result<bool> {
        let mut payload = Self::routed(route, define);
        payload.insert("conditions".to_string(), document::conditions(filter));
        let reply = self.call("lockRecord", Value::Object(payload))?;
        Ok(into_bool(&reply))
    }

    fn query(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        info: &QueryInfo,
    ) -> Result<Vec<Row>> {
        let mut payload = Self::routed(route, define);
        payload.insert("query".to_string(), document::query(info));
        let reply = self.call("query", Value::Object(payload))?;
        into_rows("query", reply)
    }

    fn query_for_update(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        filter: &[Condition],
        columns: &[String],
    ) -> Result<Vec<Row>> {
        let mut payload = Self::routed(route, define);
        payload.insert("conditions".to_string(), document::conditions(filter));
        payload.insert("columns".to_string(), json!(columns));
        let reply = self.call("queryForUpdate", Value::Object(payload))?;
        into_rows("queryForUpdate", reply)
    }

    fn query_total(
        &mut self,
        route: &RoutingKey,
        define: &TableDefine,
        info: &QueryInfo,
    ) -> Result<u64> {
        let mut payload = Self::routed(route, define);
        payload.insert("query".to_string(), document::query(info));
        let reply = self.call("queryTotal", Value::Object(payload))?;
        into_count("queryTotal", reply)
    }

    fn truncate_table(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()> {
        self.call("truncateTable", Value::Object(Self::routed(route, define)))?;
        Ok(())
    }

    fn drop_table(&mut self, route: &RoutingKey, define: &TableDefine) -> Result<()> {
        self.call("dropTable", Value::Object(Self::routed(route, define)))?;
        Ok(())
    }
}
