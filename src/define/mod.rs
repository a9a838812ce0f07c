//! Schema definition model: tables, columns, indexes, generators and sharding rules.

pub mod column;
pub mod data_type;
pub mod index;
pub mod sharding;
pub mod table;

pub use column::{ColumnDefine, GenerationType, GeneratorDefine};
pub use data_type::DataType;
pub use index::IndexDefine;
pub use sharding::{sharding_database, sharding_table, ShardingRule, ValueBag};
pub use table::TableDefine;
