pub mod comment;
pub mod like;
pub mod post;
pub mod session;
pub mod user;

use crate::util::NonPositiveDurationError;
use derive_where::derive_where;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{Error, Unexpected},
};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;
use time::{Duration, UtcDateTime, macros::utc_datetime};

pub const UNIX_EPOCH: UtcDateTime = utc_datetime!(1970-01-01 00:00);

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    Id(#[from] InvalidIdError),
    #[error(transparent)]
    NonPositiveDuration(#[from] NonPositiveDurationError),
    #[error(transparent)]
    Timestamp(#[from] InvalidTimestampError),
    #[error("The document has no timestamp")]
    MissingTimestamp,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Ids must not be empty")]
pub struct InvalidIdError(String);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The timestamp is out of range: {0}ms")]
pub struct InvalidTimestampError(i64);

/// A store-assigned identifier, tagged with the kind of object it names.
///
/// Ids from the content store are strings, while the HTTP content source uses
/// numbers; both deserialize into the same decimal string form.
#[derive_where(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct Id<Marker>(String, PhantomData<Marker>);

impl<Marker> Id<Marker> {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidIdError> {
        let id = id.into();
        if id.is_empty() {
            Err(InvalidIdError(id))
        } else {
            Ok(Self(id, PhantomData))
        }
    }

    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self::new(id).expect("Id was empty.")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Self(value.to_string(), PhantomData)
    }
}

impl<Marker> TryFrom<String> for Id<Marker> {
    type Error = InvalidIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<Marker> Serialize for Id<Marker> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de, Marker> Deserialize<'de> for Id<Marker> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        let inner = match RawId::deserialize(deserializer)? {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        };
        Id::new(inner).map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"Id"))
    }
}

/// Converts a store timestamp in milliseconds since the unix epoch.
pub fn timestamp_from_millis(millis: i64) -> Result<UtcDateTime, InvalidTimestampError> {
    UNIX_EPOCH
        .checked_add(Duration::milliseconds(millis))
        .ok_or(InvalidTimestampError(millis))
}
