//! codec — сериализация Snapshot <-> байты (один кадр на запись).
//!
//! Формат кадра (LE):
//!   [magic8 = "QSNAP001"][count u32]
//!   count × [key_len u32][key utf8][tag u8][payload]
//!   [crc32 u32]  — crc32fast по всем предшествующим байтам.
//!
//! Payload по тегу:
//!   NULL —; BOOL/BYTE u8; CHAR u32; SHORT i16; INT i32; LONG i64; FLOAT f32 bits; DOUBLE f64 bits;
//!   STRING/BYTES [len u32][bytes]; *_ARRAY [n u32][items]; SNAPSHOT [count u32][entries];
//!   BITMAP [w u32][h u32][fmt u8][len u32][pixels].
//!
//! decode() возвращает None на любом несоответствии (чужие/битые данные — штатная ситуация).
//! encode() падает с ошибкой на Value::Handle: у живого объекта нет байтового представления.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use std::collections::BTreeMap;

use crate::consts::*;
use crate::snapshot::{Bitmap, PixelFormat, Snapshot, Value};

/// Encode a snapshot into a self-checking frame.
///
/// Fails if any value (at any depth) is a [`Value::Handle`], or if snapshots
/// nest deeper than [`SNAP_MAX_DEPTH`]; the error names the offending key path.
pub fn encode(snap: &Snapshot) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(SNAP_MAGIC);
    put_u32(&mut out, snap.len() as u32);
    write_entries(&mut out, snap, "", 0)?;

    let mut h = Crc32::new();
    h.update(&out);
    let crc = h.finalize();
    put_u32(&mut out, crc);
    Ok(out)
}

/// Decode a frame produced by [`encode`]. Returns None for anything else.
pub fn decode(bytes: &[u8]) -> Option<Snapshot> {
    if bytes.len() < SNAP_HDR_SIZE + SNAP_CRC_SIZE || &bytes[0..8] != SNAP_MAGIC {
        return None;
    }
    let body_end = bytes.len() - SNAP_CRC_SIZE;
    let crc_expected = LittleEndian::read_u32(&bytes[body_end..]);
    let mut h = Crc32::new();
    h.update(&bytes[..body_end]);
    if h.finalize() != crc_expected {
        return None;
    }

    let mut r = Reader {
        buf: &bytes[..body_end],
        pos: 8,
    };
    let count = r.u32()? as usize;
    let snap = r.entries(count, 0)?;
    // хвост после последней записи — не наш кадр
    if r.pos != r.buf.len() {
        return None;
    }
    Some(snap)
}

/// Serialized length of a snapshot (the full frame, header and CRC included).
pub fn encoded_len(snap: &Snapshot) -> Result<usize> {
    Ok(encode(snap)?.len())
}

// ---------------------- encode helpers ----------------------

#[inline]
fn put_u32(out: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    LittleEndian::write_u32(&mut b, v);
    out.extend_from_slice(&b);
}

#[inline]
fn put_u64(out: &mut Vec<u8>, v: u64) {
    let mut b = [0u8; 8];
    LittleEndian::write_u64(&mut b, v);
    out.extend_from_slice(&b);
}

fn put_blob(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    if bytes.len() > u32::MAX as usize {
        return Err(anyhow!(
            "codec: blob too large: {} bytes (max {})",
            bytes.len(),
            u32::MAX
        ));
    }
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
    Ok(())
}

fn write_entries(out: &mut Vec<u8>, snap: &Snapshot, path: &str, depth: usize) -> Result<()> {
    for (key, value) in snap.iter() {
        put_blob(out, key.as_bytes())?;
        let key_path = if path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", path, key)
        };
        write_value(out, value, &key_path, depth)?;
    }
    Ok(())
}

fn write_value(out: &mut Vec<u8>, value: &Value, key_path: &str, depth: usize) -> Result<()> {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(*b as u8);
        }
        Value::Byte(b) => {
            out.push(TAG_BYTE);
            out.push(*b);
        }
        Value::Char(c) => {
            out.push(TAG_CHAR);
            put_u32(out, *c as u32);
        }
        Value::Short(v) => {
            out.push(TAG_SHORT);
            let mut b = [0u8; 2];
            LittleEndian::write_i16(&mut b, *v);
            out.extend_from_slice(&b);
        }
        Value::Int(v) => {
            out.push(TAG_INT);
            put_u32(out, *v as u32);
        }
        Value::Long(v) => {
            out.push(TAG_LONG);
            put_u64(out, *v as u64);
        }
        Value::Float(v) => {
            out.push(TAG_FLOAT);
            put_u32(out, v.to_bits());
        }
        Value::Double(v) => {
            out.push(TAG_DOUBLE);
            put_u64(out, v.to_bits());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            put_blob(out, s.as_bytes())?;
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            put_blob(out, b)?;
        }
        Value::IntArray(items) => {
            out.push(TAG_INT_ARRAY);
            put_u32(out, items.len() as u32);
            for v in items {
                put_u32(out, *v as u32);
            }
        }
        Value::LongArray(items) => {
            out.push(TAG_LONG_ARRAY);
            put_u32(out, items.len() as u32);
            for v in items {
                put_u64(out, *v as u64);
            }
        }
        Value::DoubleArray(items) => {
            out.push(TAG_DOUBLE_ARRAY);
            put_u32(out, items.len() as u32);
            for v in items {
                put_u64(out, v.to_bits());
            }
        }
        Value::StringArray(items) => {
            out.push(TAG_STRING_ARRAY);
            put_u32(out, items.len() as u32);
            for s in items {
                put_blob(out, s.as_bytes())?;
            }
        }
        Value::Snapshot(inner) => {
            // decode() не примет кадр глубже — не пишем его
            if depth + 1 > SNAP_MAX_DEPTH {
                return Err(anyhow!(
                    "codec: snapshot at '{}' nests deeper than {} levels",
                    key_path,
                    SNAP_MAX_DEPTH
                ));
            }
            out.push(TAG_SNAPSHOT);
            put_u32(out, inner.len() as u32);
            write_entries(out, inner, key_path, depth + 1)?;
        }
        Value::Bitmap(bm) => {
            if bm.pixels.len() != bm.expected_len() {
                return Err(anyhow!(
                    "codec: bitmap at '{}' has {} pixel bytes, expected {} ({}x{} {:?})",
                    key_path,
                    bm.pixels.len(),
                    bm.expected_len(),
                    bm.width,
                    bm.height,
                    bm.format
                ));
            }
            out.push(TAG_BITMAP);
            put_u32(out, bm.width);
            put_u32(out, bm.height);
            out.push(bm.format.to_u8());
            put_blob(out, &bm.pixels)?;
        }
        Value::Handle(_) => {
            return Err(anyhow!(
                "codec: value at '{}' is a live handle and cannot be serialized",
                key_path
            ));
        }
    }
    Ok(())
}

// ---------------------- decode helpers ----------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.buf.len() {
            return None;
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Some(s)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(LittleEndian::read_u32)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).map(LittleEndian::read_u64)
    }

    fn blob(&mut self) -> Option<&'a [u8]> {
        let n = self.u32()? as usize;
        self.take(n)
    }

    fn string(&mut self) -> Option<String> {
        let b = self.blob()?;
        std::str::from_utf8(b).ok().map(|s| s.to_string())
    }

    /// Element count guard: a count larger than the remaining bytes is garbage.
    fn count(&mut self, min_item: usize) -> Option<usize> {
        let n = self.u32()? as usize;
        let remaining = self.buf.len() - self.pos;
        if n.checked_mul(min_item.max(1))? > remaining {
            return None;
        }
        Some(n)
    }

    fn entries(&mut self, count: usize, depth: usize) -> Option<Snapshot> {
        if depth > SNAP_MAX_DEPTH {
            return None;
        }
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.string()?;
            let value = self.value(depth)?;
            if map.insert(key, value).is_some() {
                // повторяющийся ключ — кадр не от нас
                return None;
            }
        }
        Some(map.into_iter().collect())
    }

    fn value(&mut self, depth: usize) -> Option<Value> {
        let tag = self.u8()?;
        let v = match tag {
            TAG_NULL => Value::Null,
            TAG_BOOL => match self.u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                _ => return None,
            },
            TAG_BYTE => Value::Byte(self.u8()?),
            TAG_CHAR => Value::Char(char::from_u32(self.u32()?)?),
            TAG_SHORT => Value::Short(LittleEndian::read_i16(self.take(2)?)),
            TAG_INT => Value::Int(self.u32()? as i32),
            TAG_LONG => Value::Long(self.u64()? as i64),
            TAG_FLOAT => Value::Float(f32::from_bits(self.u32()?)),
            TAG_DOUBLE => Value::Double(f64::from_bits(self.u64()?)),
            TAG_STRING => Value::String(self.string()?),
            TAG_BYTES => Value::Bytes(self.blob()?.to_vec()),
            TAG_INT_ARRAY => {
                let n = self.count(4)?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.u32()? as i32);
                }
                Value::IntArray(items)
            }
            TAG_LONG_ARRAY => {
                let n = self.count(8)?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.u64()? as i64);
                }
                Value::LongArray(items)
            }
            TAG_DOUBLE_ARRAY => {
                let n = self.count(8)?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(f64::from_bits(self.u64()?));
                }
                Value::DoubleArray(items)
            }
            TAG_STRING_ARRAY => {
                let n = self.count(4)?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.string()?);
                }
                Value::StringArray(items)
            }
            TAG_SNAPSHOT => {
                let n = self.count(5)?;
                Value::Snapshot(self.entries(n, depth + 1)?)
            }
            TAG_BITMAP => {
                let width = self.u32()?;
                let height = self.u32()?;
                let format = PixelFormat::from_u8(self.u8()?)?;
                let pixels = self.blob()?.to_vec();
                let bm = Bitmap {
                    width,
                    height,
                    format,
                    pixels,
                };
                if bm.pixels.len() != bm.expected_len() {
                    return None;
                }
                Value::Bitmap(bm)
            }
            _ => return None,
        };
        Some(v)
    }
}
