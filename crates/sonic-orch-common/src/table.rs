//! Configuration table entries.

/// Operation carried by a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Add or update
    Set,
    Del,
}

/// A field-value pair of a table entry.
pub type FieldValue = (String, String);

/// Key, operation, and field-values tuple.
///
/// This is the unit in which configuration changes reach a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOpFieldsValues {
    /// The key (e.g., "PortChannel1")
    pub key: String,
    pub op: Operation,
    /// Field-value pairs (empty for Del operations)
    pub fvs: Vec<FieldValue>,
}

impl KeyOpFieldsValues {
    pub fn new(key: impl Into<String>, op: Operation, fvs: Vec<FieldValue>) -> Self {
        Self {
            key: key.into(),
            op,
            fvs,
        }
    }

    pub fn set(key: impl Into<String>, fvs: Vec<FieldValue>) -> Self {
        Self::new(key, Operation::Set, fvs)
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::new(key, Operation::Del, vec![])
    }

    /// Returns the value for a field, if present. The last occurrence wins.
    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fvs
            .iter()
            .rev()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fvs.iter().any(|(f, _)| f == field)
    }
}
