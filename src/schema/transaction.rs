//! Transaction configuration bound to a unit of work.

use crate::error::{BridgeError, ErrorKind};
use serde::Deserialize;
use std::time::Duration;

/// Transaction isolation level
///
/// `NoTransaction` binds a configuration without opening a backend transaction: every
/// operation of the unit of work runs autocommitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[serde(alias = "none")]
    NoTransaction,
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, or `None` for `NoTransaction`.
    pub fn to_sql(self) -> Option<&'static str> {
        match self {
            IsolationLevel::NoTransaction => None,
            IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
        }
    }

    pub fn is_transactional(self) -> bool {
        self != IsolationLevel::NoTransaction
    }
}

/// Decides whether a failure is worth rolling back for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RollbackPolicy {
    #[serde(default = "default_rollback_for")]
    pub rollback_for: Vec<ErrorKind>,
}

fn default_rollback_for() -> Vec<ErrorKind> {
    vec![
        ErrorKind::Usage,
        ErrorKind::Transport,
        ErrorKind::RetryableAcquisition,
    ]
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            rollback_for: default_rollback_for(),
        }
    }
}

impl RollbackPolicy {
    pub fn only(kinds: &[ErrorKind]) -> Self {
        Self {
            rollback_for: kinds.to_vec(),
        }
    }

    pub fn accepts(&self, cause: &BridgeError) -> bool {
        self.rollback_for.contains(&cause.kind())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TransactionConfig {
    #[serde(default)]
    pub isolation: IsolationLevel,
    /// Statement timeout applied inside the transaction.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub rollback: RollbackPolicy,
}

impl TransactionConfig {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = Some(timeout.as_secs().max(1));
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn rollback(mut self, policy: RollbackPolicy) -> Self {
        self.rollback = policy;
        self
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_isolation_sql() {
        assert_eq!(IsolationLevel::NoTransaction.to_sql(), None);
        assert_eq!(IsolationLevel::Serializable.to_sql(), Some("SERIALIZABLE"));
        assert!(!IsolationLevel::NoTransaction.is_transactional());
        assert!(IsolationLevel::ReadCommitted.is_transactional());
    }

    #[test]
    fn test_default_policy_skips_configuration_errors() {
        let policy = RollbackPolicy::default();
        let transport = BridgeError::transport(ErrorCode::Backend, &[&"postgres", &"down"]);
        let config = BridgeError::configuration(ErrorCode::MissingDialect, &[&"graph"]);
        assert!(policy.accepts(&transport));
        assert!(!policy.accepts(&config));
    }

    #[test]
    fn test_only_policy() {
        let policy = RollbackPolicy::only(&[ErrorKind::Usage]);
        let usage = BridgeError::usage(ErrorCode::TableNotDefined, &[&"x"]);
        let transport = BridgeError::transport(ErrorCode::Backend, &[&"postgres", &"down"]);
        assert!(policy.accepts(&usage));
        assert!(!policy.accepts(&transport));
    }
}
