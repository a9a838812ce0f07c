//! Table descriptor and live-schema drift validation.

use super::column::{ColumnDefine, GeneratorDefine};
use super::index::IndexDefine;
use super::sharding::ShardingRule;
use crate::error::{BridgeError, DriftReport, ErrorCode, Result};
use serde::{Deserialize, Serialize};

/// Immutable table descriptor
///
/// Owns its columns and indexes. Schemas share it as `Arc<TableDefine>`; nothing mutates it
/// after construction, so concurrent readers need no synchronisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefine {
    name: String,
    #[serde(default)]
    sharding: Option<ShardingRule>,
    #[serde(default)]
    columns: Vec<ColumnDefine>,
    #[serde(default)]
    indexes: Vec<IndexDefine>,
}

impl TableDefine {
    pub fn new(
        name: impl Into<String>,
        sharding: Option<ShardingRule>,
        columns: Vec<ColumnDefine>,
        indexes: Vec<IndexDefine>,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            sharding,
            columns,
            indexes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sharding(&self) -> Option<&ShardingRule> {
        self.sharding.as_ref()
    }

    pub fn is_sharded(&self) -> bool {
        self.sharding.as_ref().is_some_and(ShardingRule::is_active)
    }

    pub fn columns(&self) -> &[ColumnDefine] {
        &self.columns
    }

    pub fn indexes(&self) -> &[IndexDefine] {
        &self.indexes
    }

    /// Case-insensitive lookup; the first declared match wins.
    pub fn column(&self, name: &str) -> Option<&ColumnDefine> {
        let name = name.trim();
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn generator_define(&self, name: &str) -> Option<&GeneratorDefine> {
        if name.trim().is_empty() {
            return None;
        }
        self.column(name).and_then(|c| c.generator.as_ref())
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnDefine> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    /// Every declared column name, in declaration order.
    pub fn projection(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Compare the declaration against the live store's columns.
    ///
    /// # Errors
    ///
    /// - `TableNotProvisioned` (configuration) when `existing` is empty
    /// - a drift error listing new, modified and not-found columns when they disagree
    pub fn validate(&self, existing: &[ColumnDefine]) -> Result<()> {
        if existing.is_empty() {
            return Err(BridgeError::configuration(
                ErrorCode::TableNotProvisioned,
                &[&self.name],
            ));
        }

        let mut report = DriftReport {
            table: self.name.clone(),
            ..DriftReport::default()
        };
        let mut matched = vec![false; self.columns.len()];

        for live in existing {
            let position = self
                .columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(live.name.trim()));
            match position {
                None => report.not_found_columns.push(live.name.clone()),
                Some(index) => {
                    matched[index] = true;
                    if !self.columns[index].matches(live) {
                        report.modified_columns.push(live.name.clone());
                    }
                }
            }
        }

        report.new_columns = self
            .columns
            .iter()
            .zip(&matched)
            .filter(|(_, seen)| !**seen)
            .map(|(c, _)| c.name.clone())
            .collect();

        if report.is_empty() {
            Ok(())
        } else {
            log::warn!(
                "Table {} drifted: new [{}], modified [{}], not found [{}]",
                self.name,
                report.new_joined(),
                report.modified_joined(),
                report.not_found_joined()
            );
            Err(BridgeError::drift(report))
        }
    }
}
