//! # Bridgehead
//!
//! Uniform data-access layer over heterogeneous backends. Callers describe tables once
//! ([`define`]), build backend-neutral condition and query trees ([`query`]), and issue
//! operations through a [`schema::Schema`] that routes each call to the right physical
//! database or table and hands it to a backend dialect ([`dialect`]).
//!
//! Families: relational, distribute and timescale run on the PostgreSQL dialect; remote runs
//! on the HTTP (REST / SOAP) dialect. See [`config::SchemaConfig`] for wiring one up.

pub mod config;
pub mod define;
pub mod dialect;
pub mod error;
pub mod metrics;
pub mod query;
pub mod row;
pub mod schema;
pub mod task;

#[cfg(test)]
mod test_helpers;

pub use config::SchemaConfig;
pub use error::{BridgeError, ErrorCode, ErrorKind, Result};
pub use row::Row;
pub use schema::{execute_in, Schema, UnitOfWork};
