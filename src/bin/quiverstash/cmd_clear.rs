use anyhow::{anyhow, Result};
use std::path::PathBuf;

use QuiverStash::inspect::{remove_all, remove_record};

pub fn exec(dir: PathBuf, token: Option<String>, all: bool) -> Result<()> {
    if all {
        let n = remove_all(&dir)?;
        println!("cleared {} record(s) in {}", n, dir.display());
        return Ok(());
    }
    let token = token.ok_or_else(|| anyhow!("either --key or --all is required"))?;
    if remove_record(&dir, &token)? {
        println!("cleared '{}'", token);
    } else {
        println!("no record for token '{}'", token);
    }
    Ok(())
}
