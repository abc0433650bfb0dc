// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Uniform marshal/unmarshal for JSON columns.
//!
//! The thing worth getting right here is the difference between "this column
//! has no value" (SQL `NULL`, represented as `Option::None`) and "this column
//! holds the JSON literal `null`" (`Some(serde_json::Value::Null)`). Naively
//! serializing an absent value would collide with the latter, so absence is
//! threaded through as `Option` at every boundary rather than folded into the
//! serialized payload.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::errors::RepositoryError;

/// Serialize `value` for a JSON column. `None` yields the SQL null marker.
pub fn to_json<T: Serialize>(value: &Option<T>) -> Result<Option<serde_json::Value>, RepositoryError> {
    match value {
        None => Ok(None),
        Some(v) => Ok(Some(serde_json::to_value(v)?)),
    }
}

/// Deserialize a JSON column. `None` (SQL null) decodes to `None`; a present
/// JSON value — including the literal `null` — decodes through `T`.
pub fn from_json<T: DeserializeOwned>(raw: Option<serde_json::Value>) -> Result<Option<T>, RepositoryError> {
    match raw {
        None => Ok(None),
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        n: i32,
    }

    #[test]
    fn absent_value_round_trips_to_sql_null() {
        let encoded = to_json::<Payload>(&None).unwrap();
        assert_eq!(encoded, None);
        let decoded: Option<Payload> = from_json(encoded).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn present_value_round_trips() {
        let value = Some(Payload { n: 7 });
        let encoded = to_json(&value).unwrap();
        assert_eq!(encoded, Some(json!({"n": 7})));
        let decoded: Option<Payload> = from_json(encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn json_null_literal_is_distinct_from_sql_null() {
        // A present column holding the JSON literal `null` decodes as
        // `Some(Value::Null)` when T = Value, never collapsing to `None`.
        let raw = Some(serde_json::Value::Null);
        let decoded: Option<serde_json::Value> = from_json(raw).unwrap();
        assert_eq!(decoded, Some(serde_json::Value::Null));
    }
}
