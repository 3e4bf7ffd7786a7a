use crate::types::{GeometryRecord, IndicatorRow, JoinedRecord};
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Canonicalization applied to the join key. One policy value is handed to
/// `join_records`, which applies it to both sides in the same pass; there is
/// no path through the API that normalizes only one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Plain string cast (trimmed).
    AsText,
    /// String cast plus left-zero-padding to a fixed width. Idempotent:
    /// keys already at or beyond the width pass through unchanged.
    ZeroPad(usize),
}

impl KeyPolicy {
    pub fn normalize(&self, raw: &str) -> String {
        let key = raw.trim();
        match *self {
            KeyPolicy::AsText => key.to_string(),
            KeyPolicy::ZeroPad(width) => format!("{key:0>width$}"),
        }
    }
}

/// Row-count diagnostics for the inner join. Dropping unmatched rows is the
/// accepted policy; this makes the loss observable instead of silent.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JoinReport {
    pub joined: usize,
    pub unmatched_rows: usize,
    pub unmatched_geometries: usize,
}

/// Inner-equality join of indicator rows to geometries on the normalized
/// key. Joined records keep the indicator table's row order. Duplicate
/// region codes after normalization violate the table's uniqueness
/// invariant and fail the load.
pub fn join_records(
    rows: Vec<IndicatorRow>,
    geometries: Vec<GeometryRecord>,
    policy: KeyPolicy,
) -> Result<(Vec<JoinedRecord>, JoinReport)> {
    let mut by_code: HashMap<String, GeometryRecord> = HashMap::with_capacity(geometries.len());
    for mut geometry in geometries {
        geometry.code = policy.normalize(&geometry.code);
        by_code.entry(geometry.code.clone()).or_insert(geometry);
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());
    let mut joined = Vec::with_capacity(rows.len());
    let mut unmatched_rows = 0;

    for mut row in rows {
        row.code = policy.normalize(&row.code);
        if !seen.insert(row.code.clone()) {
            bail!(
                "duplicate region code '{}' in indicator table after normalization",
                row.code
            );
        }
        match by_code.remove(&row.code) {
            Some(geometry) => joined.push(JoinedRecord {
                row,
                geometry: geometry.geometry,
            }),
            None => unmatched_rows += 1,
        }
    }

    let report = JoinReport {
        joined: joined.len(),
        unmatched_rows,
        unmatched_geometries: by_code.len(),
    };

    if report.unmatched_rows > 0 || report.unmatched_geometries > 0 {
        warn!(
            "join dropped {} indicator row(s) and {} geometrie(s) with no match",
            report.unmatched_rows, report.unmatched_geometries
        );
    }

    Ok((joined, report))
}
