/*
 * ENVELOPE NORMALIZATION
 *
 * The park APIs answer reads in several shapes:
 *   [ {...}, {...} ]                                  bare array
 *   { "data": [...], "pagination": {...} }            ecological console
 *   { "success": true, "logs": [...] }                keyed collection
 *   { "success": false, "error": "..." }              failure on a 200
 *
 * Detection happens once, here, and produces a single `Page`. Nothing past
 * the RemoteResource boundary ever sees the raw shape.
 */

use crate::error::SyncError;
use crate::models::{MutationAck, Page, Pagination, Record};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Detected shape of a read response
#[derive(Debug, PartialEq)]
pub enum Envelope {
    Bare(Vec<Value>),
    Data {
        items: Vec<Value>,
        pagination: Option<Pagination>,
    },
    Keyed {
        key: String,
        items: Vec<Value>,
    },
    Failure {
        message: String,
    },
}

impl Envelope {
    pub fn detect(value: Value, collection_keys: &[String]) -> Result<Self, SyncError> {
        let mut obj = match value {
            Value::Array(items) => return Ok(Envelope::Bare(items)),
            Value::Object(obj) => obj,
            other => {
                return Err(SyncError::Decode(format!(
                    "expected an array or an object envelope, got {}",
                    type_name(&other)
                )))
            }
        };

        if obj.get("success") == Some(&Value::Bool(false)) {
            return Ok(Envelope::Failure {
                message: extract_message(&obj).unwrap_or_else(|| "request failed".to_string()),
            });
        }

        if let Some(Value::Array(items)) = take_array(&mut obj, "data") {
            let pagination = match obj.remove("pagination") {
                Some(p @ Value::Object(_)) => Some(serde_json::from_value(p)?),
                _ => None,
            };
            return Ok(Envelope::Data { items, pagination });
        }

        for key in collection_keys {
            if let Some(Value::Array(items)) = take_array(&mut obj, key) {
                return Ok(Envelope::Keyed {
                    key: key.clone(),
                    items,
                });
            }
        }

        Err(SyncError::Decode(format!(
            "no collection found in response (expected 'data' or one of {collection_keys:?})"
        )))
    }

    pub fn into_page(self, id_field: &str) -> Result<Page, SyncError> {
        let (items, pagination) = match self {
            Envelope::Bare(items) => (items, None),
            Envelope::Data { items, pagination } => (items, pagination),
            Envelope::Keyed { items, .. } => (items, None),
            Envelope::Failure { message } => {
                return Err(SyncError::Api {
                    status: 200,
                    message,
                })
            }
        };
        let records = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                Record::from_value(item, id_field)
                    .map_err(|e| SyncError::Decode(format!("item {index}: {}", e.message())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            records,
            pagination,
        })
    }
}

/// Parses a successful read body into the canonical page
pub fn parse_page(body: &[u8], id_field: &str, collection_keys: &[String]) -> Result<Page, SyncError> {
    let value: Value = serde_json::from_slice(body)?;
    Envelope::detect(value, collection_keys)?.into_page(id_field)
}

/// Parses a successful create/update body
pub fn parse_ack(body: &[u8], id_field: &str) -> Result<MutationAck, SyncError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(MutationAck::Acknowledged {
            id: None,
            message: None,
        });
    }
    let obj = match serde_json::from_slice::<Value>(body)? {
        Value::Object(obj) => obj,
        other => {
            return Err(SyncError::Decode(format!(
                "expected an object acknowledgement, got {}",
                type_name(&other)
            )))
        }
    };

    if obj.get("success") == Some(&Value::Bool(false)) {
        return Err(SyncError::Api {
            status: 200,
            message: extract_message(&obj).unwrap_or_else(|| "request failed".to_string()),
        });
    }

    // `{success, data: {...record...}}` wraps the record one level down
    if let Some(inner @ Value::Object(_)) = obj.get("data") {
        if let Ok(record) = Record::from_value(inner.clone(), id_field) {
            return Ok(MutationAck::Record(record));
        }
    }

    if obj.contains_key(id_field) && !obj.contains_key("success") {
        return Record::from_value(Value::Object(obj), id_field).map(MutationAck::Record);
    }

    let id = match obj.get(id_field) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    Ok(MutationAck::Acknowledged {
        id,
        message: obj.get("message").and_then(Value::as_str).map(str::to_string),
    })
}

/// Maps a non-2xx response onto the error taxonomy
pub fn error_from_response(status: u16, body: &[u8], target: Option<&str>) -> SyncError {
    let obj = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    };
    let message = obj
        .as_ref()
        .and_then(extract_message)
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                format!("HTTP {status}")
            } else {
                text
            }
        });

    if status == 404 {
        return SyncError::NotFound(match target {
            Some(id) if obj.as_ref().and_then(extract_message).is_none() => id.to_string(),
            _ => message,
        });
    }

    if (400..500).contains(&status) {
        if let Some(fields) = obj.as_ref().and_then(extract_fields) {
            return SyncError::Validation { fields, message };
        }
    }

    SyncError::Api { status, message }
}

/// Removes `key` only when it holds an array, leaving other shapes in place
fn take_array(obj: &mut Map<String, Value>, key: &str) -> Option<Value> {
    match obj.get(key) {
        Some(Value::Array(_)) => obj.remove(key),
        _ => None,
    }
}

fn extract_message(obj: &Map<String, Value>) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

/// Field-level detail: `errors`/`fields` as a map, or `errors` as a list of messages
fn extract_fields(obj: &Map<String, Value>) -> Option<BTreeMap<String, String>> {
    for key in ["fields", "errors"] {
        match obj.get(key) {
            Some(Value::Object(map)) if !map.is_empty() => {
                return Some(
                    map.iter()
                        .map(|(field, msg)| {
                            let text = match msg {
                                Value::String(s) => s.clone(),
                                Value::Array(list) => list
                                    .iter()
                                    .filter_map(Value::as_str)
                                    .collect::<Vec<_>>()
                                    .join("; "),
                                other => other.to_string(),
                            };
                            (field.clone(), text)
                        })
                        .collect(),
                );
            }
            Some(Value::Array(list)) if !list.is_empty() => {
                return Some(
                    list.iter()
                        .enumerate()
                        .map(|(i, msg)| {
                            let text = msg.as_str().map(str::to_string).unwrap_or_else(|| msg.to_string());
                            (i.to_string(), text)
                        })
                        .collect(),
                );
            }
            _ => {}
        }
    }
    None
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
