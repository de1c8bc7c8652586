//! Deterministic, collision-avoiding server-name generation.

use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NamingError {
    #[error("exhausted all {0:04}-{1:04} name slots for prefix")]
    NamesExhausted(u32, u32),
}

const SLOT_COUNT: u32 = 10_000;

/// Produce `"{prefix}-NNNN"` with `NNNN` the lowest unused zero-padded
/// integer in `[0000, 9999]`, so results are reproducible across runs given
/// the same `existing` set.
pub fn unique_name(prefix: &str, existing: &HashSet<String>) -> Result<String, NamingError> {
    for n in 0..SLOT_COUNT {
        let candidate = format!("{prefix}-{n:04}");
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(NamingError::NamesExhausted(0, SLOT_COUNT - 1))
}

/// True iff `name` belongs to the group identified by `group_id`, i.e.
/// `name` starts with `"vgcnbwc-{group_id}-"`. The trailing separator is
/// what keeps e.g. `compute` from absorbing `compute-general`.
pub fn belongs_to_group(name: &str, group_id: &str) -> bool {
    name.starts_with(&format!("vgcnbwc-{group_id}-"))
}

pub fn group_prefix(group_id: &str) -> String {
    format!("vgcnbwc-{group_id}")
}
