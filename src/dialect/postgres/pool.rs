//! Connection pool for one PostgreSQL database.
//!
//! Idle `may_postgres::Client`s wait in a bounded crossbeam channel. Acquisition takes an idle
//! client when one is available and connects otherwise; release hands the client back unless
//! the channel is already full, in which case it is dropped.

use crate::error::{BridgeError, ErrorCode, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use may_postgres::Client;
use std::time::Instant;

/// Checks a connection string before any connection attempt.
///
/// Supports the URI form (`postgresql://[user[:pass]@]host[:port]/dbname`) and the key-value form
/// (`host=localhost user=postgres dbname=mydb`).
///
/// # Errors
///
/// Returns a `Configuration` error naming the problem.
pub fn validate_connection_string(connection_string: &str) -> Result<()> {
    let invalid = |reason: &str| {
        BridgeError::configuration(
            ErrorCode::InvalidConfiguration,
            &[&format!("relational_server.url: {reason}")],
        )
    };

    if connection_string.trim().is_empty() {
        return Err(invalid("connection string cannot be empty"));
    }

    let is_uri = is_uri_format(connection_string);
    if !is_uri && !connection_string.contains('=') {
        return Err(invalid(
            "expected URI format (postgresql://...) or key-value format (host=...)",
        ));
    }
    if is_uri {
        if let Err(err) = url::Url::parse(connection_string) {
            return Err(invalid(&format!("malformed URI: {err}")));
        }
    }
    Ok(())
}

fn is_uri_format(connection_string: &str) -> bool {
    connection_string.starts_with("postgresql://") || connection_string.starts_with("postgres://")
}

/// Rewrite the database name of `base`.
pub fn database_url(base: &str, database: &str) -> String {
    if is_uri_format(base) {
        let (without_query, query) = match base.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (base, None),
        };
        let scheme_end = without_query.find("://").map(|i| i + 3).unwrap_or(0);
        let authority_and_path = &without_query[scheme_end..];
        let host_part = match authority_and_path.find('/') {
            Some(slash) => &without_query[..scheme_end + slash],
            None => without_query,
        };
        match query {
            Some(query) => format!("{host_part}/{database}?{query}"),
            None => format!("{host_part}/{database}"),
        }
    } else {
        let mut pairs: Vec<String> = base
            .split_whitespace()
            .filter(|pair| !pair.starts_with("dbname="))
            .map(str::to_string)
            .collect();
        pairs.push(format!("dbname={database}"));
        pairs.join(" ")
    }
}

pub struct ConnectionPool {
    database: String,
    url: String,
    idle_tx: Sender<Client>,
    idle_rx: Receiver<Client>,
}

impl ConnectionPool {
    pub fn new(database: &str, url: String, max_idle: usize) -> Self {
        let (idle_tx, idle_rx) = bounded(max_idle.max(1));
        Self {
            database: database.to_string(),
            url,
            idle_tx,
            idle_rx,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Take an idle connection or open a new one.
    ///
    /// # Errors
    ///
    /// A failed connect is a `RetryableAcquisition` error: nothing has reached the backend yet.
    pub fn acquire(&self) -> Result<Client> {
        if let Ok(client) = self.idle_rx.try_recv() {
            return Ok(client);
        }

        let start = Instant::now();
        let client = may_postgres::connect(&self.url).map_err(|err| {
            let message = err.to_string();
            BridgeError::retryable_from(
                ErrorCode::ConnectionUnavailable,
                &[&self.database, &message],
                err,
            )
        })?;
        let waited = start.elapsed();
        log::debug!(
            "Opened connection to database {} in {:?}",
            self.database,
            waited
        );
        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.record_connection_wait(waited);
        Ok(client)
    }

    pub fn release(&self, client: Client) {
        if self.idle_tx.try_send(client).is_err() {
            log::debug!("Idle pool for {} is full, dropping connection", self.database);
        }
    }

    /// Drop every idle connection.
    pub fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.idle_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
