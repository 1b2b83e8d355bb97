use anyhow::Result;
use std::path::PathBuf;

use QuiverStash::inspect::{display_value, read_record, snapshot_to_json};
use QuiverStash::report::kb;
use QuiverStash::size::size_tree;
use QuiverStash::SizeTree;

pub fn exec(dir: PathBuf, token: String, json: bool, sizes: bool) -> Result<()> {
    let (snap, len) = read_record(&dir, &token)?;

    if sizes {
        let tree = size_tree(&token, &snap)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&tree)?);
        } else {
            print_tree(&tree, 0);
        }
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot_to_json(&snap))?);
    } else {
        println!("token={} size={} B entries={}", token, len, snap.len());
        for (k, v) in snap.iter() {
            println!("  {} [{}] = {}", k, v.kind(), display_value(v));
        }
    }
    Ok(())
}

fn print_tree(t: &SizeTree, depth: usize) {
    println!("{}{} = {:.1} KB", "  ".repeat(depth), t.key, kb(t.total_size));
    for c in &t.sub_trees {
        print_tree(c, depth + 1);
    }
}
