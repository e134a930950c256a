use serde::de::DeserializeOwned;
use serde_json::Value;

pub type Fields = serde_json::Map<String, Value>;

/// A single document of a collection, as delivered by the content store.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of a delta batch.
#[derive(Clone, PartialEq, Debug)]
pub struct Change {
    pub kind: ChangeKind,
    pub document: Document,
}

impl Document {
    #[must_use]
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

impl Change {
    #[must_use]
    pub fn added(document: Document) -> Self {
        Self {
            kind: ChangeKind::Added,
            document,
        }
    }

    #[must_use]
    pub fn modified(document: Document) -> Self {
        Self {
            kind: ChangeKind::Modified,
            document,
        }
    }

    #[must_use]
    pub fn removed(document: Document) -> Self {
        Self {
            kind: ChangeKind::Removed,
            document,
        }
    }
}

/// Applies a delta batch to a result set, tolerating replays.
///
/// Added and modified documents are upserted by id, removals of unknown ids
/// are ignored. The result is not reordered.
pub fn apply_changes(documents: &mut Vec<Document>, changes: &[Change]) {
    for change in changes {
        let position = documents
            .iter()
            .position(|document| document.id == change.document.id);
        match (change.kind, position) {
            (ChangeKind::Added | ChangeKind::Modified, Some(index)) => {
                documents[index] = change.document.clone();
            }
            (ChangeKind::Added | ChangeKind::Modified, None) => {
                documents.push(change.document.clone());
            }
            (ChangeKind::Removed, Some(index)) => {
                documents.remove(index);
            }
            (ChangeKind::Removed, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::document::{Change, Document, apply_changes};
    use serde_json::{Map, json};

    fn document(id: &str, text: &str) -> Document {
        let mut fields = Map::new();
        fields.insert("text".to_owned(), json!(text));
        Document::new(id, fields)
    }

    #[test]
    fn duplicate_deltas_are_idempotent() {
        let mut documents = vec![document("a", "first")];
        let changes = [
            Change::added(document("b", "second")),
            Change::added(document("b", "second")),
            Change::removed(document("c", "never existed")),
        ];

        apply_changes(&mut documents, &changes);
        apply_changes(&mut documents, &changes);

        assert_eq!(documents, vec![document("a", "first"), document("b", "second")]);
    }

    #[test]
    fn modify_then_remove() {
        let mut documents = vec![document("a", "first"), document("b", "second")];

        apply_changes(
            &mut documents,
            &[
                Change::modified(document("a", "edited")),
                Change::removed(document("b", "second")),
            ],
        );

        assert_eq!(documents, vec![document("a", "edited")]);
    }
}
