// tests/codec_random.rs
//
// Случайные снапшоты (oorandom) проходят encode -> decode без потерь, а любая
// порча одного байта кадра даёт None.

use anyhow::Result;
use oorandom::Rand64;

use QuiverStash::codec::{decode, encode};
use QuiverStash::size::{byte_len, size_tree};
use QuiverStash::{Bitmap, PixelFormat, Snapshot, Value};

fn random_string(rng: &mut Rand64, max: u64) -> String {
    let n = rng.rand_range(0..max + 1);
    (0..n)
        .map(|_| rng.rand_range(0x20..0x7f) as u8 as char)
        .collect()
}

fn random_value(rng: &mut Rand64, depth: u32) -> Value {
    let top = if depth >= 3 { 15 } else { 17 };
    match rng.rand_range(0..top) {
        0 => Value::Null,
        1 => Value::Bool(rng.rand_u64() & 1 == 1),
        2 => Value::Byte(rng.rand_u64() as u8),
        3 => Value::Char(char::from_u32(rng.rand_range(0x20..0xd7ff) as u32).unwrap_or('?')),
        4 => Value::Short(rng.rand_u64() as i16),
        5 => Value::Int(rng.rand_u64() as i32),
        6 => Value::Long(rng.rand_i64()),
        7 => Value::Float(rng.rand_float() as f32 * 1e6),
        8 => Value::Double(rng.rand_float() * -1e12),
        9 => Value::String(random_string(rng, 40)),
        10 => Value::Bytes((0..rng.rand_range(0..300)).map(|_| rng.rand_u64() as u8).collect()),
        11 => Value::IntArray((0..rng.rand_range(0..20)).map(|_| rng.rand_u64() as i32).collect()),
        12 => Value::LongArray((0..rng.rand_range(0..20)).map(|_| rng.rand_i64()).collect()),
        13 => Value::DoubleArray((0..rng.rand_range(0..20)).map(|_| rng.rand_float()).collect()),
        14 => Value::StringArray((0..rng.rand_range(0..6)).map(|_| random_string(rng, 12)).collect()),
        15 => {
            let mut bm = Bitmap::new(
                rng.rand_range(1..9) as u32,
                rng.rand_range(1..9) as u32,
                PixelFormat::Rgb565,
            );
            for p in bm.pixels.iter_mut() {
                *p = rng.rand_u64() as u8;
            }
            Value::Bitmap(bm)
        }
        _ => Value::Snapshot(random_snapshot(rng, depth + 1)),
    }
}

fn random_snapshot(rng: &mut Rand64, depth: u32) -> Snapshot {
    let n = rng.rand_range(0..8);
    (0..n)
        .map(|i| (format!("{}_{}", random_string(rng, 8), i), random_value(rng, depth)))
        .collect()
}

#[test]
fn random_snapshots_roundtrip() -> Result<()> {
    let mut rng = Rand64::new(0x5eed_cafe);
    for _ in 0..200 {
        let snap = random_snapshot(&mut rng, 0);
        let bytes = encode(&snap)?;
        assert_eq!(bytes.len(), byte_len(&snap)?);
        assert_eq!(size_tree("r", &snap)?.total_size, bytes.len());
        let back = decode(&bytes).expect("valid frame");
        assert_eq!(back, snap);
    }
    Ok(())
}

#[test]
fn any_single_byte_flip_is_rejected() -> Result<()> {
    let mut rng = Rand64::new(42);
    let snap = Snapshot::new()
        .with("title", "hello")
        .with("ids", vec![1i64, 2, 3])
        .with("nested", Snapshot::new().with("blob", vec![9u8; 64]));
    let bytes = encode(&snap)?;
    for _ in 0..100 {
        let mut bad = bytes.clone();
        let pos = rng.rand_range(0..bad.len() as u64) as usize;
        bad[pos] ^= 1 << rng.rand_range(0..8);
        assert!(decode(&bad).is_none(), "flip at {pos} accepted");
    }
    Ok(())
}
