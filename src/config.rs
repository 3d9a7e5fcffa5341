//! Read settings shared by the planner and the read transaction.

use serde::{Deserialize, Serialize};

use crate::sql::plan::ReadStrategy;

pub const DEFAULT_SOFT_DELETE_COLUMN: &str = "delete_time";
pub const DEFAULT_LIMIT_PARAM: &str = "__limit";
pub const DEFAULT_OFFSET_PARAM: &str = "__offset";
pub const DEFAULT_KEY_PARAM_PREFIX: &str = "__key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Nullable TIMESTAMP column marking a row as deleted
    pub soft_delete_column: String,
    pub limit_param: String,
    pub offset_param: String,
    /// Prefix of the params bound by key lookups
    pub key_param_prefix: String,
    pub strategy: ReadStrategy,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            soft_delete_column: DEFAULT_SOFT_DELETE_COLUMN.to_string(),
            limit_param: DEFAULT_LIMIT_PARAM.to_string(),
            offset_param: DEFAULT_OFFSET_PARAM.to_string(),
            key_param_prefix: DEFAULT_KEY_PARAM_PREFIX.to_string(),
            strategy: ReadStrategy::default(),
        }
    }
}

impl ReadConfig {
    /// Whether a caller param name clashes with a name the planner generates
    pub fn is_reserved_param(&self, name: &str) -> bool {
        name == self.limit_param || name == self.offset_param || name.starts_with(&self.key_param_prefix)
    }
}
