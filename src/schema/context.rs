//! Unit-of-work context.
//!
//! A [`UnitOfWork`] is passed explicitly to every schema call. It carries the bound transaction
//! configuration, the transaction state and the client slot. The slot holds a
//! `Box<dyn DialectClient>`, which is not `Send`, so a unit of work never leaves the thread that
//! created it.

use crate::dialect::remote::ProxyConfig;
use crate::dialect::DialectClient;
use crate::schema::transaction::TransactionConfig;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Idle => "idle",
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

pub struct UnitOfWork {
    id: Uuid,
    transaction: Option<TransactionConfig>,
    proxy: Option<ProxyConfig>,
    state: TransactionState,
    client: Option<Box<dyn DialectClient>>,
    begin_count: usize,
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitOfWork {
    /// Autocommit unit of work: no transaction configuration bound.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction: None,
            proxy: None,
            state: TransactionState::Idle,
            client: None,
            begin_count: 0,
        }
    }

    pub fn with_transaction(config: TransactionConfig) -> Self {
        let mut uow = Self::new();
        uow.transaction = Some(config);
        uow
    }

    /// Per-call proxy for remote schemas. Takes precedence over the schema's configured proxy.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn bind_transaction(&mut self, config: TransactionConfig) {
        self.transaction = Some(config);
    }

    pub fn unbind_transaction(&mut self) -> Option<TransactionConfig> {
        self.transaction.take()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transaction(&self) -> Option<&TransactionConfig> {
        self.transaction.as_ref()
    }

    pub fn proxy_config(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Number of `begin_transaction` calls since the last clear.
    pub fn begin_count(&self) -> usize {
        self.begin_count
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        log::debug!("Unit of work {} is {}", self.id, state);
        self.state = state;
    }

    pub(crate) fn client_mut(&mut self) -> Option<&mut dyn DialectClient> {
        match self.client.as_mut() {
            Some(client) => Some(client.as_mut()),
            None => None,
        }
    }

    pub(crate) fn bind_client(&mut self, client: Box<dyn DialectClient>) {
        self.client = Some(client);
    }

    pub(crate) fn take_client(&mut self) -> Option<Box<dyn DialectClient>> {
        self.client.take()
    }

    pub(crate) fn count_begin(&mut self) {
        self.begin_count += 1;
    }

    pub(crate) fn take_begin_count(&mut self) -> usize {
        std::mem::take(&mut self.begin_count)
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("transaction", &self.transaction)
            .field("state", &self.state)
            .field("bound", &self.client.is_some())
            .field("begin_count", &self.begin_count)
            .finish()
    }
}
