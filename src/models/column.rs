//! Column schema describing what is being enriched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The value type a column is expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable metadata for one target column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_metadata_serde() {
        let col = ColumnMetadata::new("founded", ColumnType::Date).with_description("Year founded");
        let json = serde_json::to_string(&col).expect("serialize");
        assert_eq!(
            json,
            r#"{"name":"founded","type":"date","description":"Year founded"}"#
        );

        let parsed: ColumnMetadata =
            serde_json::from_str(r#"{"name":"employees","type":"number"}"#).expect("deserialize");
        assert_eq!(parsed.column_type, ColumnType::Number);
        assert!(parsed.description.is_none());
    }
}
