//! inspect — офлайн-просмотр каталога хранилища (для CLI и тестов).
//!
//! Работает через FileStore::open_cold (без warm-load) и только читает, кроме
//! явного удаления в CLI. JSON-представление значений: {"type", "value"},
//! байты и пиксели — base64.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::{json, Map, Value as Json};
use std::path::Path;

use crate::codec::decode;
use crate::disk::{FileStore, RecordStore};
use crate::snapshot::{Snapshot, Value};

/// One persisted record as seen by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordInfo {
    pub token: String,
    pub bytes: usize,
    /// None when the record does not decode.
    pub entries: Option<usize>,
}

impl RecordInfo {
    pub fn is_valid(&self) -> bool {
        self.entries.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub dir: String,
    pub records: usize,
    pub total_bytes: u64,
    pub largest_bytes: u64,
    pub largest_token: Option<String>,
    pub corrupt: usize,
    pub oversized: usize,
    pub size_limit_bytes: usize,
}

pub fn list_records(dir: &Path) -> Result<Vec<RecordInfo>> {
    let store = FileStore::open_cold(dir)?;
    let mut rows = Vec::new();
    for token in store.keys() {
        let bytes = match store.get(&token) {
            Some(b) => b,
            None => continue,
        };
        rows.push(RecordInfo {
            token,
            bytes: bytes.len(),
            entries: decode(&bytes).map(|s| s.len()),
        });
    }
    Ok(rows)
}

/// Decode one record. Missing and corrupt records are errors here: the
/// caller asked for this token explicitly.
pub fn read_record(dir: &Path, token: &str) -> Result<(Snapshot, usize)> {
    let store = FileStore::open_cold(dir)?;
    let bytes = store
        .get(token)
        .ok_or_else(|| anyhow!("no record for token '{}' in {}", token, dir.display()))?;
    let snap = decode(&bytes)
        .ok_or_else(|| anyhow!("record '{}' ({} B) is not a valid snapshot", token, bytes.len()))?;
    Ok((snap, bytes.len()))
}

/// Delete one record; false if there was none.
pub fn remove_record(dir: &Path, token: &str) -> Result<bool> {
    let store = FileStore::open_cold(dir)?;
    if store.record_len(token).is_none() {
        return Ok(false);
    }
    store.clear(token);
    Ok(true)
}

/// Delete every record, returning how many there were.
pub fn remove_all(dir: &Path) -> Result<usize> {
    let store = FileStore::open_cold(dir)?;
    let n = store.keys().len();
    store.clear_all();
    Ok(n)
}

pub fn store_stats(dir: &Path, size_limit_bytes: usize) -> Result<StoreStats> {
    let mut st = StoreStats {
        dir: dir.display().to_string(),
        size_limit_bytes,
        ..Default::default()
    };
    for r in list_records(dir)? {
        let len = r.bytes as u64;
        st.records += 1;
        st.total_bytes += len;
        if len > st.largest_bytes {
            st.largest_bytes = len;
            st.largest_token = Some(r.token.clone());
        }
        if !r.is_valid() {
            st.corrupt += 1;
        }
        if r.bytes > size_limit_bytes {
            st.oversized += 1;
        }
    }
    Ok(st)
}

pub fn snapshot_to_json(snap: &Snapshot) -> Json {
    let mut obj = Map::new();
    for (k, v) in snap.iter() {
        obj.insert(k.to_string(), value_to_json(v));
    }
    Json::Object(obj)
}

pub fn value_to_json(v: &Value) -> Json {
    let inner = match v {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Byte(b) => json!(b),
        Value::Char(c) => json!(c.to_string()),
        Value::Short(n) => json!(n),
        Value::Int(n) => json!(n),
        Value::Long(n) => json!(n),
        Value::Float(f) => float_json(*f as f64),
        Value::Double(f) => float_json(*f),
        Value::String(s) => json!(s),
        Value::Bytes(b) => json!(STANDARD.encode(b)),
        Value::IntArray(a) => json!(a),
        Value::LongArray(a) => json!(a),
        Value::DoubleArray(a) => Json::Array(a.iter().map(|f| float_json(*f)).collect()),
        Value::StringArray(a) => json!(a),
        Value::Snapshot(s) => snapshot_to_json(s),
        Value::Bitmap(bm) => json!({
            "width": bm.width,
            "height": bm.height,
            "format": format!("{:?}", bm.format),
            "pixels": STANDARD.encode(&bm.pixels),
        }),
        Value::Handle(h) => json!(format!("{:?}", h)),
    };
    json!({ "type": v.kind(), "value": inner })
}

// NaN/inf в JSON не представимы — строкой
fn float_json(f: f64) -> Json {
    serde_json::Number::from_f64(f)
        .map(Json::Number)
        .unwrap_or_else(|| json!(f.to_string()))
}

/// One-line human form of a value.
pub fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => format!("'{}'", s),
        Value::Bytes(b) => {
            let head = STANDARD.encode(&b[..b.len().min(24)]);
            let more = if b.len() > 24 { "..." } else { "" };
            format!("(binary {} B) {}{}", b.len(), head, more)
        }
        Value::Bitmap(bm) => format!(
            "{}x{} {:?} ({} B)",
            bm.width,
            bm.height,
            bm.format,
            bm.pixels.len()
        ),
        Value::Snapshot(s) => format!("{{{} entries}}", s.len()),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_form_of_values() {
        let snap = Snapshot::new()
            .with("b", vec![1u8, 2, 3])
            .with("d", f64::NAN)
            .with("n", Snapshot::new().with("i", 5i32));
        let j = snapshot_to_json(&snap);
        assert_eq!(j["b"]["type"], "bytes");
        assert_eq!(j["b"]["value"], "AQID");
        assert_eq!(j["d"]["value"], "NaN");
        assert_eq!(j["n"]["value"]["i"]["value"], 5);
    }
}
