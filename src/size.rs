//! Size instrumentation: serialized length of a snapshot and a per-key breakdown.
//!
//! The numbers are codec frame sizes, i.e. exactly what the durable record
//! for the snapshot would occupy. Formatting is left to the caller.

use anyhow::Result;
use serde::Serialize;

use crate::codec::encoded_len;
use crate::snapshot::{Snapshot, Value};

/// Hierarchical size report: a node per key, nested snapshots expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeTree {
    pub key: String,
    pub total_size: usize,
    pub sub_trees: Vec<SizeTree>,
}

/// Serialized byte length of `snap`.
pub fn byte_len(snap: &Snapshot) -> Result<usize> {
    encoded_len(snap)
}

/// Per-key breakdown. A key's size is the growth of the frame caused by that
/// entry alone, so the children plus the empty-frame overhead add up to the total.
pub fn size_tree(label: &str, snap: &Snapshot) -> Result<SizeTree> {
    let empty = encoded_len(&Snapshot::new())?;
    let mut sub_trees = Vec::with_capacity(snap.len());
    for (key, value) in snap.iter() {
        let single = Snapshot::new().with(key, value.clone());
        let size = encoded_len(&single)? - empty;
        let children = match value {
            Value::Snapshot(inner) => size_tree(key, inner)?.sub_trees,
            _ => Vec::new(),
        };
        sub_trees.push(SizeTree {
            key: key.to_string(),
            total_size: size,
            sub_trees: children,
        });
    }
    Ok(SizeTree {
        key: label.to_string(),
        total_size: encoded_len(snap)?,
        sub_trees,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{SNAP_CRC_SIZE, SNAP_HDR_SIZE};

    #[test]
    fn breakdown_adds_up_to_total() -> Result<()> {
        let snap = Snapshot::new()
            .with("small", 1i32)
            .with("blob", vec![0u8; 1000])
            .with("nested", Snapshot::new().with("s", "abc"));
        let tree = size_tree("root", &snap)?;
        let sum: usize = tree.sub_trees.iter().map(|t| t.total_size).sum();
        assert_eq!(sum + SNAP_HDR_SIZE + SNAP_CRC_SIZE, tree.total_size);
        assert_eq!(tree.total_size, byte_len(&snap)?);

        let blob = tree.sub_trees.iter().find(|t| t.key == "blob").unwrap();
        assert!(blob.total_size > 1000);
        let nested = tree.sub_trees.iter().find(|t| t.key == "nested").unwrap();
        assert_eq!(nested.sub_trees.len(), 1);
        Ok(())
    }

    #[test]
    fn handles_make_sizing_fail() {
        let snap = Snapshot::new().with("h", crate::snapshot::Handle::new(1u8));
        assert!(byte_len(&snap).is_err());
        assert!(size_tree("root", &snap).is_err());
    }
}
