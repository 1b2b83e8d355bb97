use anyhow::Result;
use std::path::PathBuf;

use QuiverStash::inspect::store_stats;
use QuiverStash::report::kb;
use QuiverStash::StashConfig;

pub fn exec(dir: PathBuf, json: bool) -> Result<()> {
    let cfg = StashConfig::from_env();
    let st = store_stats(&dir, cfg.size_limit_bytes)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&st)?);
        return Ok(());
    }
    println!("QuiverStash store:");
    println!("  dir              = {}", st.dir);
    println!("  records          = {}", st.records);
    println!("  total            = {:.1} KB", kb(st.total_bytes as usize));
    if let Some(t) = &st.largest_token {
        println!("  largest          = {} ({:.1} KB)", t, kb(st.largest_bytes as usize));
    }
    println!("  corrupt          = {}", st.corrupt);
    println!(
        "  oversized        = {} (limit {:.1} KB)",
        st.oversized,
        kb(st.size_limit_bytes)
    );
    Ok(())
}
