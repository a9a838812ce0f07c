//! Column and generator descriptors.

use super::data_type::DataType;
use sea_query::{ColumnDef, Expr};
use serde::{Deserialize, Serialize};

/// How a column's value is produced when the caller does not supply it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationType {
    /// Store-managed identity column (`GENERATED ... AS IDENTITY`, auto increment).
    Identity,
    /// Store-managed sequence (`DEFAULT nextval(...)`).
    Sequence,
    /// Application-side generator, resolved by name at insert time.
    Custom,
}

impl GenerationType {
    /// Whether the live store knows about this generator.
    pub fn is_store_managed(self) -> bool {
        matches!(self, GenerationType::Identity | GenerationType::Sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorDefine {
    pub generation_type: GenerationType,
    /// Sequence or custom generator name. Empty for identity columns.
    #[serde(default)]
    pub generator: String,
}

impl GeneratorDefine {
    pub fn identity() -> Self {
        Self {
            generation_type: GenerationType::Identity,
            generator: String::new(),
        }
    }

    pub fn sequence(name: impl Into<String>) -> Self {
        Self {
            generation_type: GenerationType::Sequence,
            generator: name.into(),
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            generation_type: GenerationType::Custom,
            generator: name.into(),
        }
    }
}

/// Column descriptor
///
/// Built once from configuration (or read back from the live store for drift validation) and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefine {
    pub name: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub unique: bool,
    /// Raw SQL default expression.
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub generator: Option<GeneratorDefine>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDefine {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into().trim().to_string(),
            primary_key: false,
            nullable: true,
            data_type,
            length: None,
            precision: None,
            scale: None,
            unique: false,
            default_value: None,
            generator: None,
        }
    }

    /// Mark as primary key. Primary keys are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default_value = Some(expr.into());
        self
    }

    pub fn generator(mut self, generator: GeneratorDefine) -> Self {
        self.generator = Some(generator);
        self
    }

    /// The generator the live store itself maintains, if any.
    ///
    /// Custom generators run in this process and are invisible to the store, so they take no
    /// part in drift comparison.
    pub fn store_generator(&self) -> Option<&GeneratorDefine> {
        self.generator
            .as_ref()
            .filter(|g| g.generation_type.is_store_managed())
    }

    /// Whether this declared column describes the same storage as `live`.
    ///
    /// Type, nullability, key-ness and the store-managed generator must match. Sequence names
    /// are only compared when both sides name one.
    pub fn matches(&self, live: &ColumnDefine) -> bool {
        if self.data_type != live.data_type
            || self.nullable != live.nullable
            || self.primary_key != live.primary_key
        {
            return false;
        }
        match (self.store_generator(), live.store_generator()) {
            (None, None) => true,
            (Some(declared), Some(actual)) => {
                declared.generation_type == actual.generation_type
                    && (declared.generator.is_empty()
                        || actual.generator.is_empty()
                        || declared.generator.eq_ignore_ascii_case(&actual.generator))
            }
            _ => false,
        }
    }

    /// Build the `SeaQuery` column definition used by `CREATE TABLE`.
    pub(crate) fn to_column_def(&self) -> ColumnDef {
        let mut def = ColumnDef::new(crate::query::Name::new(&self.name));
        self.data_type
            .apply(&mut def, self.length, self.precision, self.scale);

        if self.nullable {
            def.null();
        } else {
            def.not_null();
        }
        if self.unique && !self.primary_key {
            def.unique_key();
        }
        match self.generator.as_ref().map(|g| g.generation_type) {
            Some(GenerationType::Identity) => {
                def.auto_increment();
            }
            Some(GenerationType::Sequence) => {
                if let Some(generator) = self.generator.as_ref() {
                    def.default(Expr::cust(format!(
                        "nextval('{}')",
                        generator.generator.replace('\'', "''")
                    )));
                }
            }
            _ => {
                if let Some(default) = self.default_value.as_ref() {
                    def.default(Expr::cust(default.clone()));
                }
            }
        }
        def
    }
}
