// tests/inspect_store.rs
//
// Офлайн-инспекция каталога: то, что показывает CLI (list/show/stats/clear).

use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use QuiverStash::inspect::{
    list_records, read_record, remove_all, remove_record, snapshot_to_json, store_stats,
};
use QuiverStash::{LifecycleEvent, Snapshot, Stash, StashConfig};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("qstest-inspect-{prefix}-{pid}-{t}-{id}"))
}

struct Screen;

/// Saves two snapshots through a real stash and returns their tokens.
fn populate(dir: &PathBuf) -> Result<Vec<String>> {
    let cfg = StashConfig::default()
        .with_dir(dir.clone())
        .with_worker_keepalive_ms(200);
    let st = Stash::open(cfg)?;
    st.on_lifecycle(LifecycleEvent::Started)?;
    let t1 = st.save(&Arc::new(Screen), &mut Snapshot::new().with("a", 1i32))?;
    let t2 = st.save(
        &Arc::new(Screen),
        &mut Snapshot::new().with("blob", vec![0u8; 2048]).with("s", "x"),
    )?;
    st.close()?;
    let mut t = vec![t1, t2];
    t.sort();
    Ok(t)
}

#[test]
fn list_show_and_stats() -> Result<()> {
    let dir = unique_root("list");
    let tokens = populate(&dir)?;
    fs::write(dir.join("broken"), b"garbage")?;

    let rows = list_records(&dir)?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().filter(|r| r.is_valid()).count(), 2);
    let broken = rows.iter().find(|r| r.token == "broken").expect("listed");
    assert!(broken.entries.is_none());

    let (snap, len) = read_record(&dir, &tokens[0])?;
    assert!(len > 0);
    assert!(snap.len() >= 2, "payload plus token key");
    let j = snapshot_to_json(&snap);
    assert!(j.is_object());

    assert!(read_record(&dir, "broken").is_err());
    assert!(read_record(&dir, "missing").is_err());

    let st = store_stats(&dir, 1024)?;
    assert_eq!(st.records, 3);
    assert_eq!(st.corrupt, 1);
    assert_eq!(st.oversized, 1);
    assert!(st.largest_bytes > 2048);
    Ok(())
}

#[test]
fn remove_one_and_all() -> Result<()> {
    let dir = unique_root("rm");
    let tokens = populate(&dir)?;

    assert!(remove_record(&dir, &tokens[0])?);
    assert!(!remove_record(&dir, &tokens[0])?);
    assert_eq!(list_records(&dir)?.len(), 1);

    assert_eq!(remove_all(&dir)?, 1);
    assert!(list_records(&dir)?.is_empty());

    // новый стэш тоже ничего не видит
    let st = Stash::open(StashConfig::default().with_dir(dir.clone()))?;
    assert!(st.durable_tokens()?.is_empty());
    Ok(())
}
