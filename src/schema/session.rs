//! Schema for the session families (relational, distribute, graph, timescale).

use super::{
    prepare_store, release_bound, Schema, SchemaSupport, TransactionState, UnitOfWork,
};
use crate::dialect::{Dialect, DialectClient};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

pub struct SessionSchema {
    support: SchemaSupport,
    dialect: Arc<dyn Dialect>,
}

impl SessionSchema {
    pub fn new(support: SchemaSupport, dialect: Arc<dyn Dialect>) -> Self {
        Self { support, dialect }
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }
}

impl Schema for SessionSchema {
    fn support(&self) -> &SchemaSupport {
        &self.support
    }

    fn open_client(&self, _uow: &UnitOfWork) -> Result<Box<dyn DialectClient>> {
        self.dialect.open()
    }

    fn initialize(&self) -> Result<()> {
        log::info!(
            "Initialising {} schema ({} tables, ddl mode {:?})",
            self.support.family(),
            self.support.tables().len(),
            self.support.mode()
        );
        let mut client = self.dialect.open()?;
        let prepared = prepare_store(&self.support, client.as_mut());
        if let Err(err) = client.close() {
            log::warn!("Failed to close initialisation client: {}", err);
        }
        prepared?;
        self.support.start_tasks()
    }

    fn begin_transaction(&self, uow: &mut UnitOfWork) -> Result<()> {
        let Some(config) = uow.transaction().cloned() else {
            log::debug!("Unit of work {} runs in autocommit mode", uow.id());
            return Ok(());
        };
        if !config.isolation.is_transactional() || uow.state() == TransactionState::Active {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span(&uow.id().to_string()).entered();

        if !uow.has_client() {
            uow.bind_client(self.dialect.open()?);
        }
        if let Some(client) = uow.client_mut() {
            client.begin_transaction(&config)?;
        }
        uow.set_state(TransactionState::Active);
        log::debug!(
            "Unit of work {} began a {:?} transaction",
            uow.id(),
            config.isolation
        );
        Ok(())
    }

    fn clear_transactional(&self, uow: &mut UnitOfWork) {
        release_bound(uow);
    }

    fn config_retry(&self, count: u32, period: Duration) {
        self.dialect.config_retry(count, period);
    }

    fn close(&self) -> Result<()> {
        if self.support.mode() == super::DdlMode::CreateDrop {
            let targets = self.support.unsharded_targets();
            log::info!("Dropping {} tables on close", targets.len());
            let mut client = self.dialect.open()?;
            let dropped = client.drop_tables(&targets);
            if let Err(err) = client.close() {
                log::warn!("Failed to close client after dropping tables: {}", err);
            }
            dropped?;
        }
        if let Err(err) = self.support.stop_tasks() {
            log::warn!("Failed to stop task queue: {}", err);
        }
        self.dialect.close()
    }
}
