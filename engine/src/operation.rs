//! Operation types delivered by the incremental update feed.
//!
//! A batch of operations is a linearized change log since a version token,
//! so it must be applied in the order it was delivered.

use crate::{error::Result, store::StoreWrite, Record};
use serde::{Deserialize, Serialize};

/// The kind of change an operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Insert a record that must not exist yet
    Create,
    /// Replace a record by identifier, inserting it if absent
    Update,
    /// Remove a record by identifier; absence is not an error
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// One entry of a collection's change log.
///
/// Wire format: `{"operation": "create", "document": {...}}`. Any other
/// fields the server attaches to the history entry are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOperation {
    /// What to do with the document
    #[serde(rename = "operation")]
    pub kind: OperationKind,
    /// Target document (or just its identifier, for deletes)
    pub document: Record,
}

impl UpdateOperation {
    /// Create an operation.
    pub fn new(kind: OperationKind, document: impl Into<Record>) -> Self {
        Self {
            kind,
            document: document.into(),
        }
    }

    /// Shorthand for a create operation.
    pub fn create(document: impl Into<Record>) -> Self {
        Self::new(OperationKind::Create, document)
    }

    /// Shorthand for an update operation.
    pub fn update(document: impl Into<Record>) -> Self {
        Self::new(OperationKind::Update, document)
    }

    /// Shorthand for a delete operation.
    pub fn delete(document: impl Into<Record>) -> Self {
        Self::new(OperationKind::Delete, document)
    }

    /// Translate into the store write that applies this operation.
    pub fn into_write(self, key_path: &str) -> Result<StoreWrite> {
        Ok(match self.kind {
            OperationKind::Create => StoreWrite::Add(self.document),
            OperationKind::Update => StoreWrite::Put(self.document),
            OperationKind::Delete => StoreWrite::Delete(self.document.key(key_path)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    #[test]
    fn deserializes_history_entry() {
        let raw = json!({
            "_id": {"$oid": "51a40ce2c6ec494fcbf56e47"},
            "document_model": "author",
            "operation": "update",
            "document": {"_id": "a1", "name": "Homer"}
        });

        let op: UpdateOperation = serde_json::from_value(raw).unwrap();
        assert_eq!(op.kind, OperationKind::Update);
        assert_eq!(op.document.key("_id").unwrap(), "a1");
    }

    #[test]
    fn rejects_unknown_operation() {
        let raw = json!({"operation": "merge", "document": {"_id": "a1"}});
        assert!(serde_json::from_value::<UpdateOperation>(raw).is_err());
    }

    #[test]
    fn create_becomes_add() {
        let write = UpdateOperation::create(json!({"_id": "a1"}))
            .into_write("_id")
            .unwrap();
        assert!(matches!(write, StoreWrite::Add(_)));
    }

    #[test]
    fn update_becomes_put() {
        let write = UpdateOperation::update(json!({"_id": "a1"}))
            .into_write("_id")
            .unwrap();
        assert!(matches!(write, StoreWrite::Put(_)));
    }

    #[test]
    fn delete_accepts_document_or_identifier() {
        let by_document = UpdateOperation::delete(json!({"_id": "a1", "name": "Homer"}))
            .into_write("_id")
            .unwrap();
        assert_eq!(by_document, StoreWrite::Delete("a1".into()));

        let by_id = UpdateOperation::delete(json!("a1"))
            .into_write("_id")
            .unwrap();
        assert_eq!(by_id, StoreWrite::Delete("a1".into()));
    }

    #[test]
    fn delete_without_identifier_fails() {
        let result = UpdateOperation::delete(json!({"name": "Homer"})).into_write("_id");
        assert!(matches!(result, Err(Error::MissingIdentifier { .. })));
    }

    #[test]
    fn kind_display() {
        assert_eq!(OperationKind::Create.to_string(), "create");
        assert_eq!(OperationKind::Delete.to_string(), "delete");
    }
}
