//! Error types shared by every layer of the crate.
//!
//! Every error carries a structured [`ErrorCode`] plus positional arguments, so callers can
//! localise or template messages instead of parsing free text. The [`ErrorKind`] of a code
//! decides how the dispatch layer treats it: configuration and drift errors are fatal at
//! startup, usage errors surface per call, transport errors go through the unit of work's
//! rollback policy, and retryable acquisition errors are subject to the retry budget.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of an error, used by rollback policies and the acquisition retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed endpoint, missing server info, missing dialect. Fatal, never retried.
    Configuration,
    /// Declared columns disagree with the live store.
    SchemaDrift,
    /// The caller supplied insufficient or inconsistent data.
    Usage,
    /// Backend or transport failure, propagated unmodified.
    Transport,
    /// Connection acquisition failure subject to the retry budget.
    RetryableAcquisition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::SchemaDrift => "schema drift",
            ErrorKind::Usage => "usage",
            ErrorKind::Transport => "transport",
            ErrorKind::RetryableAcquisition => "retryable acquisition",
        };
        f.write_str(name)
    }
}

/// Structured error code. Each code owns a message template with `{0}`, `{1}`, ...
/// placeholders filled from the error's positional arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MalformedEndpoint,
    MissingServerInfo,
    MissingDialect,
    TableNotProvisioned,
    ProxyConflict,
    InvalidConfiguration,
    SchemaDrift,
    TableNotDefined,
    NoColumnsToProject,
    MissingTableMetadata,
    ShardingValueMissing,
    ConditionMismatch,
    InvalidValue,
    EmptyPayload,
    EmptyFilter,
    Backend,
    RemoteFault,
    Serialization,
    AcquisitionExhausted,
    ConnectionUnavailable,
}

impl ErrorCode {
    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorCode::MalformedEndpoint
            | ErrorCode::MissingServerInfo
            | ErrorCode::MissingDialect
            | ErrorCode::TableNotProvisioned
            | ErrorCode::ProxyConflict
            | ErrorCode::InvalidConfiguration => ErrorKind::Configuration,
            ErrorCode::SchemaDrift => ErrorKind::SchemaDrift,
            ErrorCode::TableNotDefined
            | ErrorCode::NoColumnsToProject
            | ErrorCode::MissingTableMetadata
            | ErrorCode::ShardingValueMissing
            | ErrorCode::ConditionMismatch
            | ErrorCode::InvalidValue
            | ErrorCode::EmptyPayload
            | ErrorCode::EmptyFilter => ErrorKind::Usage,
            ErrorCode::Backend
            | ErrorCode::RemoteFault
            | ErrorCode::Serialization
            | ErrorCode::AcquisitionExhausted => ErrorKind::Transport,
            ErrorCode::ConnectionUnavailable => ErrorKind::RetryableAcquisition,
        }
    }

    /// Message template for this code.
    pub fn template(self) -> &'static str {
        match self {
            ErrorCode::MalformedEndpoint => "Malformed {0} endpoint address: {1}",
            ErrorCode::MissingServerInfo => "Missing server information for the {0} dialect",
            ErrorCode::MissingDialect => "No dialect available for the {0} schema family",
            ErrorCode::TableNotProvisioned => "Table {0} does not exist in the backing store",
            ErrorCode::ProxyConflict => {
                "A proxy selector for {0} is already installed, refusing to install one for {1}"
            }
            ErrorCode::InvalidConfiguration => "Invalid configuration: {0}",
            ErrorCode::SchemaDrift => {
                "Table {0} drifted from its definition: new columns [{1}], modified columns [{2}], columns not found [{3}]"
            }
            ErrorCode::TableNotDefined => "Table {0} is not defined for this schema",
            ErrorCode::NoColumnsToProject => "No columns to project for table {0}",
            ErrorCode::MissingTableMetadata => "Missing {1} metadata for table {0}",
            ErrorCode::ShardingValueMissing => {
                "Sharding value for column {1} is missing, cannot route table {0}"
            }
            ErrorCode::ConditionMismatch => "Condition {0} cannot take a {1} parameter",
            ErrorCode::InvalidValue => "Invalid value for column {0}: {1}",
            ErrorCode::EmptyPayload => "No declared column of table {0} is present in the payload",
            ErrorCode::EmptyFilter => "Refusing to {1} every row of table {0} without a filter",
            ErrorCode::Backend => "{0} backend failure: {1}",
            ErrorCode::RemoteFault => "Remote endpoint {0} returned a fault: {1}",
            ErrorCode::Serialization => "Failed to serialize or parse payload: {0}",
            ErrorCode::AcquisitionExhausted => {
                "Connection acquisition failed after {0} attempts: {1}"
            }
            ErrorCode::ConnectionUnavailable => "Unable to acquire a connection to {0}: {1}",
        }
    }

    /// Fill the template with positional arguments. Missing arguments render as empty strings.
    pub fn render(self, args: &[String]) -> String {
        let template = self.template();
        let mut out = String::with_capacity(template.len() + 16);
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => match after[..close].parse::<usize>() {
                    Ok(index) => {
                        if let Some(arg) = args.get(index) {
                            out.push_str(arg);
                        }
                        rest = &after[close + 1..];
                    }
                    Err(_) => {
                        out.push('{');
                        rest = after;
                    }
                },
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// The three column lists a failed drift validation reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub table: String,
    /// Declared but absent from the live store.
    pub new_columns: Vec<String>,
    /// Present on both sides with differing attributes.
    pub modified_columns: Vec<String>,
    /// Live columns without a declaration.
    pub not_found_columns: Vec<String>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.new_columns.is_empty()
            && self.modified_columns.is_empty()
            && self.not_found_columns.is_empty()
    }

    pub fn new_joined(&self) -> String {
        self.new_columns.join(",")
    }

    pub fn modified_joined(&self) -> String {
        self.modified_columns.join(",")
    }

    pub fn not_found_joined(&self) -> String {
        self.not_found_columns.join(",")
    }
}

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Crate error type
#[derive(Debug)]
pub enum BridgeError {
    Configuration {
        code: ErrorCode,
        args: Vec<String>,
    },
    SchemaDrift(DriftReport),
    Usage {
        code: ErrorCode,
        args: Vec<String>,
    },
    Transport {
        code: ErrorCode,
        args: Vec<String>,
        source: Option<BoxedSource>,
    },
    RetryableAcquisition {
        code: ErrorCode,
        args: Vec<String>,
        source: Option<BoxedSource>,
    },
}

fn collect_args(args: &[&dyn fmt::Display]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

impl BridgeError {
    pub fn configuration(code: ErrorCode, args: &[&dyn fmt::Display]) -> Self {
        BridgeError::Configuration {
            code,
            args: collect_args(args),
        }
    }

    pub fn usage(code: ErrorCode, args: &[&dyn fmt::Display]) -> Self {
        BridgeError::Usage {
            code,
            args: collect_args(args),
        }
    }

    pub fn transport(code: ErrorCode, args: &[&dyn fmt::Display]) -> Self {
        BridgeError::Transport {
            code,
            args: collect_args(args),
            source: None,
        }
    }

    pub fn transport_from<E>(code: ErrorCode, args: &[&dyn fmt::Display], source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BridgeError::Transport {
            code,
            args: collect_args(args),
            source: Some(Box::new(source)),
        }
    }

    pub fn retryable(code: ErrorCode, args: &[&dyn fmt::Display]) -> Self {
        BridgeError::RetryableAcquisition {
            code,
            args: collect_args(args),
            source: None,
        }
    }

    pub fn retryable_from<E>(code: ErrorCode, args: &[&dyn fmt::Display], source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BridgeError::RetryableAcquisition {
            code,
            args: collect_args(args),
            source: Some(Box::new(source)),
        }
    }

    pub fn drift(report: DriftReport) -> Self {
        BridgeError::SchemaDrift(report)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Configuration { .. } => ErrorKind::Configuration,
            BridgeError::SchemaDrift(_) => ErrorKind::SchemaDrift,
            BridgeError::Usage { .. } => ErrorKind::Usage,
            BridgeError::Transport { .. } => ErrorKind::Transport,
            BridgeError::RetryableAcquisition { .. } => ErrorKind::RetryableAcquisition,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::SchemaDrift(_) => ErrorCode::SchemaDrift,
            BridgeError::Configuration { code, .. }
            | BridgeError::Usage { code, .. }
            | BridgeError::Transport { code, .. }
            | BridgeError::RetryableAcquisition { code, .. } => *code,
        }
    }

    /// Positional arguments for the code's message template.
    pub fn args(&self) -> Vec<String> {
        match self {
            BridgeError::SchemaDrift(report) => vec![
                report.table.clone(),
                report.new_joined(),
                report.modified_joined(),
                report.not_found_joined(),
            ],
            BridgeError::Configuration { args, .. }
            | BridgeError::Usage { args, .. }
            | BridgeError::Transport { args, .. }
            | BridgeError::RetryableAcquisition { args, .. } => args.clone(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::RetryableAcquisition
    }

    /// Re-raise an exhausted acquisition failure as a transport error.
    pub fn into_exhausted(self, attempts: u32) -> Self {
        let message = self.to_string();
        let source = match self {
            BridgeError::RetryableAcquisition { source, .. }
            | BridgeError::Transport { source, .. } => source,
            _ => None,
        };
        BridgeError::Transport {
            code: ErrorCode::AcquisitionExhausted,
            args: vec![attempts.to_string(), message],
            source,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind(), self.code().render(&self.args()))
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Transport {
                source: Some(source),
                ..
            }
            | BridgeError::RetryableAcquisition {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<may_postgres::Error> for BridgeError {
    fn from(err: may_postgres::Error) -> Self {
        let message = err.to_string();
        BridgeError::transport_from(ErrorCode::Backend, &[&"postgres", &message], err)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        let message = err.to_string();
        BridgeError::transport_from(ErrorCode::Serialization, &[&message], err)
    }
}

impl From<ureq::Error> for BridgeError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let url = response.get_url().to_string();
                let body = response.into_string().unwrap_or_default();
                BridgeError::transport(
                    ErrorCode::RemoteFault,
                    &[&url, &format!("HTTP {status} {body}")],
                )
            }
            ureq::Error::Transport(transport) => {
                let message = transport.to_string();
                BridgeError::transport(ErrorCode::Backend, &[&"remote", &message])
            }
        }
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::configuration(ErrorCode::InvalidConfiguration, &[&err])
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
