use crate::document::Document;
use serde_json::Value;
use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
};

/// A slash separated collection path such as `posts` or `posts/p1/likes`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct CollectionPath(String);

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// The identifying parameters of a query, used to deduplicate subscriptions.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct QueryDescriptor {
    pub collection: CollectionPath,
    pub order_by: Option<OrderBy>,
}

impl CollectionPath {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The sub-collection `name` of document `document_id` in this collection.
    #[must_use]
    pub fn child(&self, document_id: &str, name: &str) -> Self {
        Self(format!("{}/{document_id}/{name}", self.0))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CollectionPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl QueryDescriptor {
    #[must_use]
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            order_by: None,
        }
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sorts documents into the order this query delivers them in.
    ///
    /// Documents are ordered by the ordering field when there is one, ties
    /// and unordered queries fall back to ascending document id.
    pub fn sort(&self, documents: &mut [Document]) {
        documents.sort_by(|a, b| self.compare(a, b));
    }

    #[must_use]
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let by_field = self.order_by.as_ref().map_or(Ordering::Equal, |order_by| {
            let ordering = compare_values(a.field(&order_by.field), b.field(&order_by.field));
            match order_by.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            }
        });
        by_field.then_with(|| a.id.cmp(&b.id))
    }
}

impl Display for QueryDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.order_by {
            Some(OrderBy { field, direction }) => {
                write!(f, "{} order by {field} {direction:?}", self.collection)
            }
            None => Display::fmt(&self.collection, f),
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (a, b) => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}
