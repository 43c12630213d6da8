/*
 * RECORDS & WIRE MODELS
 *
 * A Record is an opaque server-owned JSON object with a stable identifier
 * (`tourist_id`, `area_id`, `device_id`, `log_id`...). The client never
 * interprets more than it needs: derived fields read a handful of keys,
 * everything else travels untouched.
 */

use crate::error::SyncError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

pub type Fields = serde_json::Map<String, Value>;

/// Field names used by the park and ecological-monitoring APIs
pub mod keys {
    pub const AREA_ID: &str = "area_id";
    pub const AREA_NAME: &str = "area_name";
    pub const CURRENT_VISITORS: &str = "current_visitors";
    pub const DAILY_CAPACITY: &str = "daily_capacity";
    pub const WARNING_THRESHOLD: &str = "warning_threshold";
    pub const STATUS: &str = "status";

    pub const LOG_TYPE: &str = "log_type";
    pub const MODULE: &str = "module";
    pub const CREATED_AT: &str = "created_at";

    pub const OPERATION_STATUS: &str = "operation_status";
    pub const INDICATOR_ID: &str = "indicator_id";
    pub const STANDARD_LOWER: &str = "standard_lower";
    pub const STANDARD_UPPER: &str = "standard_upper";
    pub const MONITOR_VALUE: &str = "monitor_value";
    pub const IS_ABNORMAL: &str = "is_abnormal";
    pub const COLLECTION_TIME: &str = "collection_time";
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: String,
    id_field: String,
    fields: Fields,
}

impl Record {
    /// Builds a record from a JSON object; numeric ids are kept as their decimal text.
    pub fn from_value(value: Value, id_field: &str) -> Result<Self, SyncError> {
        let Value::Object(fields) = value else {
            return Err(SyncError::Decode(format!(
                "expected a JSON object carrying '{id_field}'"
            )));
        };
        let id = match fields.get(id_field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(SyncError::Decode(format!(
                    "record is missing identifier field '{id_field}'"
                )))
            }
        };
        Ok(Self {
            id,
            id_field: id_field.to_string(),
            fields,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Numeric field; MySQL decimals arrive as strings, so numeric text is accepted.
    pub fn f64_field(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        match self.fields.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    /// Shallow merge of `patch` into the record. The identifier never changes.
    pub fn apply_patch(&mut self, patch: &Fields) {
        for (key, value) in patch {
            if key == &self.id_field {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(SyncError::from)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub total: Option<u64>,
    pub pages: Option<u64>,
}

/// Canonical read result, whatever envelope the server used
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub pagination: Option<Pagination>,
}

/// Response to a create/update: either the record itself or a `{success, message}` ack
#[derive(Debug, Clone, PartialEq)]
pub enum MutationAck {
    Record(Record),
    Acknowledged {
        id: Option<String>,
        message: Option<String>,
    },
}

impl MutationAck {
    pub fn record(&self) -> Option<&Record> {
        match self {
            MutationAck::Record(r) => Some(r),
            MutationAck::Acknowledged { .. } => None,
        }
    }
}

/// Query-string parameters for a read, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        self.params.retain(|(k, _)| k != &key);
        self.params.push((key, value.to_string()));
        self
    }

    pub fn page(self, page: u32, per_page: u32) -> Self {
        self.param("page", page).param("per_page", per_page)
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationState {
    Pending,
    Confirmed,
    Rejected,
    /// Timed out: resolved by the next authoritative poll, never retried
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingMutation {
    pub mutation_id: Uuid,
    pub target_id: String,
    pub patch: Fields,
    pub submitted_at: OffsetDateTime,
    pub state: MutationState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_numeric_id_becomes_text() {
        let record = Record::from_value(json!({"log_id": 42, "log_type": "info"}), "log_id").unwrap();
        assert_eq!(record.id(), "42");
    }

    #[test]
    fn test_record_without_id_is_decode_error() {
        let err = Record::from_value(json!({"area_name": "A区"}), "area_id").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
        assert!(Record::from_value(json!([1, 2]), "area_id").is_err());
    }

    #[test]
    fn test_numeric_text_fields() {
        let record = Record::from_value(
            json!({"indicator_id": "I1", "standard_upper": "35.50", "standard_lower": 0}),
            "indicator_id",
        )
        .unwrap();
        assert_eq!(record.f64_field("standard_upper"), Some(35.5));
        assert_eq!(record.f64_field("standard_lower"), Some(0.0));
        assert_eq!(record.f64_field("missing"), None);
    }

    #[test]
    fn test_patch_never_rewrites_identifier() {
        let mut record = Record::from_value(
            json!({"area_id": "A001", "daily_capacity": 800}),
            "area_id",
        )
        .unwrap();
        let patch = json!({"area_id": "B999", "daily_capacity": 900});
        record.apply_patch(patch.as_object().unwrap());
        assert_eq!(record.id(), "A001");
        assert_eq!(record.str_field("area_id"), Some("A001"));
        assert_eq!(record.f64_field("daily_capacity"), Some(900.0));
    }

    #[test]
    fn test_query_replaces_duplicate_keys() {
        let query = Query::new().param("type", "error").param("type", "security").page(2, 20);
        assert_eq!(
            query.pairs(),
            &[
                ("type".to_string(), "security".to_string()),
                ("page".to_string(), "2".to_string()),
                ("per_page".to_string(), "20".to_string()),
            ]
        );
    }
}
