#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use iso_types::{FieldDefinition, FieldId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("catalog must be a JSON object keyed by DE id, found {found}")]
    NotAnObject { found: &'static str },
}

/// A catalog entry that could not be used. Fatal for that DE only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub key: String,
    pub field: Option<FieldId>,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    fields: BTreeMap<FieldId, FieldDefinition>,
    issues: Vec<ConfigIssue>,
    name_index: HashMap<String, FieldId>,
}

impl FieldCatalog {
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let body = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&body)
    }

    pub fn from_json_str(body: &str) -> Result<Self, CatalogError> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_json_value(value)
    }

    pub fn from_json_value(value: Value) -> Result<Self, CatalogError> {
        let Value::Object(entries) = value else {
            return Err(CatalogError::NotAnObject {
                found: json_kind(&value),
            });
        };

        let mut fields = BTreeMap::new();
        let mut issues = Vec::new();
        for (key, raw) in entries {
            let field = match key.parse::<FieldId>() {
                Ok(field) => field,
                Err(err) => {
                    issues.push(ConfigIssue {
                        key,
                        field: None,
                        detail: err.to_string(),
                    });
                    continue;
                }
            };
            match serde_json::from_value::<FieldDefinition>(raw) {
                Ok(definition) => {
                    fields.insert(field, definition);
                }
                Err(err) => issues.push(ConfigIssue {
                    key,
                    field: Some(field),
                    detail: format!("malformed field definition: {err}"),
                }),
            }
        }

        for issue in &issues {
            warn!(key = %issue.key, detail = %issue.detail, "catalog entry rejected");
        }

        Ok(Self::assemble(fields, issues))
    }

    #[must_use]
    pub fn from_definitions(definitions: impl IntoIterator<Item = (FieldId, FieldDefinition)>) -> Self {
        Self::assemble(definitions.into_iter().collect(), Vec::new())
    }

    fn assemble(fields: BTreeMap<FieldId, FieldDefinition>, issues: Vec<ConfigIssue>) -> Self {
        let mut name_index = HashMap::new();
        for (field, definition) in &fields {
            if let Some(name) = &definition.name {
                name_index.entry(name.trim().to_lowercase()).or_insert(*field);
            }
        }
        // Path spellings only fill gaps left by explicit names.
        for (field, definition) in &fields {
            for path in definition.usable_canonical_paths() {
                let lowered = path.to_lowercase();
                if let Some(leaf) = lowered.rsplit('.').next() {
                    name_index.entry(leaf.to_owned()).or_insert(*field);
                }
                name_index.entry(lowered).or_insert(*field);
            }
        }

        Self {
            fields,
            issues,
            name_index,
        }
    }

    #[must_use]
    pub fn get(&self, field: FieldId) -> Option<&FieldDefinition> {
        self.fields.get(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &FieldDefinition)> {
        self.fields.iter().map(|(field, definition)| (*field, definition))
    }

    pub fn active_fields(&self) -> impl Iterator<Item = (FieldId, &FieldDefinition)> {
        self.iter().filter(|(_, definition)| definition.active)
    }

    #[must_use]
    pub fn issues(&self) -> &[ConfigIssue] {
        &self.issues
    }

    #[must_use]
    pub fn issue_for(&self, field: FieldId) -> Option<&ConfigIssue> {
        self.issues.iter().find(|issue| issue.field == Some(field))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reverse lookup from a test-data column name: configured `name`, then a
    /// canonical path or its leaf segment, then a literal DE number.
    #[must_use]
    pub fn field_for_name(&self, name: &str) -> Option<FieldId> {
        let lowered = name.trim().to_lowercase();
        if lowered == "mti" {
            return Some(FieldId::MTI);
        }
        self.name_index
            .get(&lowered)
            .copied()
            .or_else(|| FieldId::parse_loose(name).ok())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use iso_types::{FieldFormat, FieldId};
    use serde_json::json;

    use super::{CatalogError, FieldCatalog};

    fn de(number: u32) -> FieldId {
        FieldId::new(number).expect("field id")
    }

    fn sample() -> FieldCatalog {
        FieldCatalog::from_json_value(json!({
            "0": {"name": "mti", "length": 4, "dataType": "n"},
            "2": {
                "name": "primaryAccountNumber",
                "format": "LLVAR",
                "maxLength": 19,
                "dataType": "n",
                "canonicalPaths": ["card.pan"]
            },
            "4": {
                "format": "FIXED",
                "length": 12,
                "dataType": "n",
                "active": true,
                "canonicalPaths": ["transaction.amount.amount"]
            },
            "7": {"format": "BOGUS"},
            "abc": {"length": 3}
        }))
        .expect("catalog")
    }

    #[test]
    fn malformed_entries_become_issues_without_failing_the_load() {
        let catalog = sample();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.issues().len(), 2);
        assert!(catalog.issue_for(de(7)).is_some());
        assert!(catalog.get(de(7)).is_none());
        assert_eq!(
            catalog.get(de(2)).expect("de2").format,
            FieldFormat::Llvar
        );
    }

    #[test]
    fn name_lookup_prefers_names_then_paths_then_numbers() {
        let catalog = sample();
        assert_eq!(catalog.field_for_name("PrimaryAccountNumber"), Some(de(2)));
        assert_eq!(catalog.field_for_name("transaction.amount.amount"), Some(de(4)));
        assert_eq!(catalog.field_for_name("amount"), Some(de(4)));
        assert_eq!(catalog.field_for_name("DE11"), Some(de(11)));
        assert_eq!(catalog.field_for_name("MTI"), Some(FieldId::MTI));
        assert_eq!(catalog.field_for_name("unknownThing"), None);
    }

    #[test]
    fn active_fields_are_listed_in_numeric_order() {
        let catalog = sample();
        let active = catalog
            .active_fields()
            .map(|(field, _)| field)
            .collect::<Vec<_>>();
        assert_eq!(active, vec![de(4)]);
    }

    #[test]
    fn non_object_top_level_is_fatal() {
        let err = FieldCatalog::from_json_str("[1, 2]").expect_err("array must fail");
        assert!(matches!(err, CatalogError::NotAnObject { found: "array" }));
    }
}
