use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{NameMapping, Row, StorageError, TableCfg};

/// Compute a content hash from serializable data.
///
/// Object keys are sorted and every `_hash` field is ignored, so the result
/// depends only on content. Uses Blake3-256 encoded as URL-safe base64.
pub fn compute_hash<T: Serialize>(data: &T) -> Result<String, StorageError> {
    let value = serde_json::to_value(data)?;
    let bytes = serde_json::to_vec(&canonicalize(value))?;

    let hash = blake3::hash(&bytes);
    Ok(URL_SAFE_NO_PAD.encode(hash.as_bytes()))
}

/// Fill in `_hash` on a row that lacks one and return the hash.
pub fn hash_row(row: &mut Row) -> Result<String, StorageError> {
    if let Some(JsonValue::String(hash)) = row.get(NameMapping::PRIMARY_KEY_COLUMN) {
        return Ok(hash.clone());
    }
    let hash = compute_hash(&*row)?;
    row.insert(
        NameMapping::PRIMARY_KEY_COLUMN.to_string(),
        JsonValue::String(hash.clone()),
    );
    Ok(hash)
}

/// Set `_hash` on a table schema. Always recomputed, since a schema that
/// gained columns must not keep its predecessor's hash.
pub fn hash_table_cfg(cfg: &mut TableCfg) -> Result<String, StorageError> {
    cfg.hash = None;
    let hash = compute_hash(&*cfg)?;
    cfg.hash = Some(hash.clone());
    Ok(hash)
}

fn canonicalize(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<_> = map
                .into_iter()
                .filter(|(k, _)| k != NameMapping::PRIMARY_KEY_COLUMN)
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            JsonValue::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
