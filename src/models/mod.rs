pub mod assignment;
pub mod gradebook;
pub mod student;
pub mod submission;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// Documents serialized with virtual ids carry both `_id` and `id`. Every
/// model accepts either key, so the duplicate is dropped before decoding.
pub fn normalize_document_ids(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            if map.contains_key("_id") {
                map.remove("id");
            }
            map.values_mut().for_each(normalize_document_ids);
        }
        JsonValue::Array(items) => items.iter_mut().for_each(normalize_document_ids),
        _ => {}
    }
}

/// Decodes a backend document after id normalization.
pub fn from_document<T: DeserializeOwned>(mut value: JsonValue) -> serde_json::Result<T> {
    normalize_document_ids(&mut value);
    serde_json::from_value(value)
}
