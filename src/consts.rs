//! Общие константы (формат записи, раскладка каталога, значения по умолчанию).

// -------- Snapshot frame (codec) --------
// [magic8][count u32] + entries + [crc32 u32]
pub const SNAP_MAGIC: &[u8; 8] = b"QSNAP001";
pub const SNAP_HDR_SIZE: usize = 12;
pub const SNAP_CRC_SIZE: usize = 4;

// Теги значений. Новые теги — только в конец.
pub const TAG_NULL: u8 = 0x00;
pub const TAG_BOOL: u8 = 0x01;
pub const TAG_BYTE: u8 = 0x02;
pub const TAG_CHAR: u8 = 0x03;
pub const TAG_SHORT: u8 = 0x04;
pub const TAG_INT: u8 = 0x05;
pub const TAG_LONG: u8 = 0x06;
pub const TAG_FLOAT: u8 = 0x07;
pub const TAG_DOUBLE: u8 = 0x08;
pub const TAG_STRING: u8 = 0x09;
pub const TAG_BYTES: u8 = 0x0A;
pub const TAG_INT_ARRAY: u8 = 0x0B;
pub const TAG_LONG_ARRAY: u8 = 0x0C;
pub const TAG_DOUBLE_ARRAY: u8 = 0x0D;
pub const TAG_STRING_ARRAY: u8 = 0x0E;
pub const TAG_SNAPSHOT: u8 = 0x0F;
pub const TAG_BITMAP: u8 = 0x10;

/// Nesting limit for `Value::Snapshot` when decoding foreign data.
pub const SNAP_MAX_DEPTH: usize = 64;

// -------- Durable store layout --------
pub const STORE_DIR_NAME: &str = "quiverstash";
pub const TMP_SUFFIX: &str = ".tmp";
/// Prefix for hex-escaped file names (keys that are not filename-safe).
pub const ESCAPED_PREFIX: &str = "x-";

// -------- Carrier --------
/// Reserved carrier key format: `uuid_<type name>`.
pub const TOKEN_KEY_PREFIX: &str = "uuid_";

// -------- Defaults --------
pub const DEFAULT_SIZE_LIMIT_BYTES: usize = 512 * 1024;
pub const DEFAULT_FLUSH_WAIT_MS: u64 = 5000;
pub const DEFAULT_WARM_LOAD_WAIT_MS: u64 = 1000;
pub const DEFAULT_WORKER_KEEPALIVE_MS: u64 = 60_000;
