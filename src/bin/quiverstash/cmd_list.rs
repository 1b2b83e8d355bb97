use anyhow::Result;
use std::path::PathBuf;

use QuiverStash::inspect::list_records;

pub fn exec(dir: PathBuf, json: bool) -> Result<()> {
    let rows = list_records(&dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("(no records in {})", dir.display());
        return Ok(());
    }
    for r in rows {
        match r.entries {
            Some(n) => println!("{}  {} B  {} entries", r.token, r.bytes, n),
            None => println!("{}  {} B  (corrupt)", r.token, r.bytes),
        }
    }
    Ok(())
}
