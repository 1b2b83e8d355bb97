//! Snapshot — упорядоченный набор (ключ -> типизированное значение).
//!
//! - Snapshot: BTreeMap<String, Value>; ключи уникальны, порядок детерминированный.
//! - Value: закрытый набор типов, которые умеет кодек (см. codec.rs), плюс Handle —
//!   живой объект процесса, который может лежать в памяти, но не имеет байтового представления.
//! - Carrier: минимальный контракт транспортного объекта (clear / put_string / get_string /
//!   put_all). Snapshot сам по себе является Carrier.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Pixel layout of a [`Bitmap`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Alpha8 = 1,
    Rgb565 = 2,
    Argb4444 = 3,
    Argb8888 = 4,
}

impl PixelFormat {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(PixelFormat::Alpha8),
            2 => Some(PixelFormat::Rgb565),
            3 => Some(PixelFormat::Argb4444),
            4 => Some(PixelFormat::Argb8888),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Alpha8 => 1,
            PixelFormat::Rgb565 | PixelFormat::Argb4444 => 2,
            PixelFormat::Argb8888 => 4,
        }
    }
}

/// Raw image value. Pixels are stored row-major, `width * height * bpp` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            pixels: vec![0u8; len],
        }
    }

    /// Buffer length implied by the dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Live in-process object. Survives the memory path; the codec refuses it.
#[derive(Clone)]
pub struct Handle(pub Arc<dyn Any + Send + Sync>);

impl Handle {
    pub fn new<T: Any + Send + Sync>(obj: T) -> Self {
        Handle(Arc::new(obj))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:p})", Arc::as_ptr(&self.0))
    }
}

/// A single typed value inside a [`Snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
    Snapshot(Snapshot),
    Bitmap(Bitmap),
    Handle(Handle),
}

impl Value {
    /// Short type name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Char(_) => "char",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::IntArray(_) => "int[]",
            Value::LongArray(_) => "long[]",
            Value::DoubleArray(_) => "double[]",
            Value::StringArray(_) => "string[]",
            Value::Snapshot(_) => "snapshot",
            Value::Bitmap(_) => "bitmap",
            Value::Handle(_) => "handle",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

macro_rules! value_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v)
            }
        }
    };
}

value_from!(bool, Bool);
value_from!(u8, Byte);
value_from!(char, Char);
value_from!(i16, Short);
value_from!(i32, Int);
value_from!(i64, Long);
value_from!(f32, Float);
value_from!(f64, Double);
value_from!(String, String);
value_from!(Vec<u8>, Bytes);
value_from!(Vec<i32>, IntArray);
value_from!(Vec<i64>, LongArray);
value_from!(Vec<f64>, DoubleArray);
value_from!(Vec<String>, StringArray);
value_from!(Snapshot, Snapshot);
value_from!(Bitmap, Bitmap);
value_from!(Handle, Handle);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// Ordered key -> value state blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.put(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True if any value (recursively) is a [`Handle`].
    pub fn has_handles(&self) -> bool {
        self.entries.values().any(|v| match v {
            Value::Handle(_) => true,
            Value::Snapshot(inner) => inner.has_handles(),
            _ => false,
        })
    }
}

impl FromIterator<(String, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Transport-channel object handed to `save`/`restore`.
///
/// The cache only ever leaves a single short string (the token) in a carrier
/// after `save`.
pub trait Carrier {
    fn clear(&mut self);
    fn put_string(&mut self, key: &str, value: &str);
    fn get_string(&self, key: &str) -> Option<String>;
    fn put_all(&mut self, other: &Snapshot);
    /// Copy of the full content, used by `save` to build the offloaded snapshot.
    fn to_snapshot(&self) -> Snapshot;
}

impl Carrier for Snapshot {
    fn clear(&mut self) {
        self.entries.clear();
    }

    fn put_string(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn put_all(&mut self, other: &Snapshot) {
        for (k, v) in other.entries.iter() {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    fn to_snapshot(&self) -> Snapshot {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_put_all_overwrites_and_keeps_other_keys() {
        let mut c = Snapshot::new().with("a", 1i32).with("b", "x");
        let other = Snapshot::new().with("b", "y").with("c", true);
        c.put_all(&other);
        assert_eq!(c.len(), 3);
        assert_eq!(c.get_string("b").as_deref(), Some("y"));
        assert_eq!(c.get("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn handles_compare_by_identity() {
        let h = Handle::new(5u32);
        let h2 = h.clone();
        assert_eq!(h, h2);
        assert_ne!(h, Handle::new(5u32));
        assert_eq!(h.downcast_ref::<u32>(), Some(&5));

        let nested = Snapshot::new().with("inner", Snapshot::new().with("h", h));
        assert!(nested.has_handles());
    }
}
