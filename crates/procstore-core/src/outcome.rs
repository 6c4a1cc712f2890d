// ABOUTME: The two-variant result envelope handed to collaborators, plus small shared payloads.
// ABOUTME: Serializes as {success: true, data} or {success: false, error: {code, message}}.

use serde::de;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A structured failure description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub code: String,
    pub message: String,
}

impl Fault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Uniform result shape for every storage operation crossing the API boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(Fault),
}

impl<T> Outcome<T> {
    pub fn ok(data: T) -> Self {
        Outcome::Success(data)
    }

    pub fn fail(error: Fault) -> Self {
        Outcome::Failure(error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Convert back into a `Result`, for callers that prefer `?`.
    pub fn into_result(self) -> Result<T, Fault> {
        match self {
            Outcome::Success(data) => Ok(data),
            Outcome::Failure(error) => Err(error),
        }
    }
}

impl<T, E: Into<Fault>> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Outcome::Success(data),
            Err(e) => Outcome::Failure(e.into()),
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Outcome", 2)?;
        match self {
            Outcome::Success(data) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
            }
            Outcome::Failure(error) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

/// Wire form accepted when reading an envelope back.
///
/// `data` is `Some` whenever the field is present, even as `null`, so unit
/// and optional payloads survive a round trip.
#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct RawOutcome<T> {
    success: bool,
    #[serde(default, deserialize_with = "present")]
    data: Option<T>,
    #[serde(default)]
    error: Option<Fault>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Outcome<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawOutcome::<T>::deserialize(deserializer)?;
        match (raw.success, raw.data, raw.error) {
            (true, Some(data), _) => Ok(Outcome::Success(data)),
            (false, _, Some(error)) => Ok(Outcome::Failure(error)),
            (true, None, _) => Err(de::Error::missing_field("data")),
            (false, _, None) => Err(de::Error::missing_field("error")),
        }
    }
}

/// Number of rows removed by a clear or retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedCount {
    pub cleared_count: usize,
}
