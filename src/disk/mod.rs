//! disk — долговременное хранилище записей (ключ -> байты).
//!
//! RecordStore — минимальный контракт; все вызовы блокирующие, оркестратор зовёт
//! put/clear только из фоновых задач. Ошибки I/O проглатываются на этой границе
//! (warn! + метрика): для вызывающего это выглядит как «записи нет».
//!
//! Раскладка FileStore: один файл на ключ в каталоге хранилища, без индексного файла.
//! Ключи, непригодные как имя файла, экранируются в hex с префиксом "x-".

pub mod file;

pub use file::FileStore;

use crate::consts::{ESCAPED_PREFIX, TMP_SUFFIX};

/// Durable byte store keyed by string.
pub trait RecordStore: Send + Sync {
    /// Persist `bytes` under `key`, replacing any previous record.
    fn put(&self, key: &str, bytes: &[u8]);

    /// Read the record for `key`. May block (bounded) on the first call.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Delete the record for `key` (no-op if absent).
    fn clear(&self, key: &str);

    /// Delete every record.
    fn clear_all(&self);

    /// Keys of all persisted records.
    fn keys(&self) -> Vec<String>;
}

#[inline]
fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with(ESCAPED_PREFIX)
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// File name used for a record key.
pub fn file_name_for_key(key: &str) -> String {
    if is_plain_key(key) {
        return key.to_string();
    }
    let mut s = String::with_capacity(ESCAPED_PREFIX.len() + key.len() * 2);
    s.push_str(ESCAPED_PREFIX);
    for b in key.as_bytes() {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Inverse of [`file_name_for_key`]. Temp files and foreign names yield None.
pub fn key_for_file_name(name: &str) -> Option<String> {
    if name.ends_with(TMP_SUFFIX) {
        return None;
    }
    if let Some(hex) = name.strip_prefix(ESCAPED_PREFIX) {
        if hex.len() % 2 != 0 {
            return None;
        }
        let mut out = Vec::with_capacity(hex.len() / 2);
        for i in (0..hex.len()).step_by(2) {
            out.push(u8::from_str_radix(hex.get(i..i + 2)?, 16).ok()?);
        }
        return String::from_utf8(out).ok();
    }
    if is_plain_key(name) {
        Some(name.to_string())
    } else {
        None
    }
}
