use crate::types::{GeometryRecord, Indicator, JoinedRecord, RankedRow, RankingEntry};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Distinct UF values present in the joined set, sorted.
pub fn distinct_ufs(joined: &[JoinedRecord]) -> Vec<String> {
    let ufs: BTreeSet<&str> = joined.iter().map(|r| r.row.uf.as_str()).collect();
    ufs.into_iter().map(String::from).collect()
}

/// All joined records belonging to the given UF, in original row order.
pub fn filter_by_uf<'a>(joined: &'a [JoinedRecord], uf: &str) -> Vec<&'a JoinedRecord> {
    joined.iter().filter(|r| r.row.uf == uf).collect()
}

/// Sort records by the selected indicator descending and assign 1-based
/// positions. The sort is stable, so ties keep their original row order;
/// rows without a value sort last.
pub fn rank(records: &[&JoinedRecord], indicator: Indicator) -> Vec<RankingEntry> {
    let mut ordered: Vec<&JoinedRecord> = records.to_vec();
    ordered.sort_by(|a, b| compare_desc(a.row.value(indicator), b.row.value(indicator)));

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, record)| RankingEntry {
            position: i + 1,
            code: record.row.code.clone(),
            name: record.row.name.clone(),
            uf: record.row.uf.clone(),
            value: record.row.value(indicator),
        })
        .collect()
}

fn compare_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Entry in the region selector, scoped to one UF.
#[derive(Debug, Clone, Serialize)]
pub struct RegionOption {
    pub code: String,
    pub name: String,
}

/// Regions of a UF sorted by name, for the detail selector.
pub fn regions_in_uf(joined: &[JoinedRecord], uf: &str) -> Vec<RegionOption> {
    let mut regions: Vec<RegionOption> = filter_by_uf(joined, uf)
        .into_iter()
        .map(|r| RegionOption {
            code: r.row.code.clone(),
            name: r.row.name.clone(),
        })
        .collect();
    regions.sort_by(|a, b| a.name.cmp(&b.name));
    regions
}

/// Joined record for a single region code, if present.
pub fn region_detail<'a>(joined: &'a [JoinedRecord], code: &str) -> Option<&'a JoinedRecord> {
    joined.iter().find(|r| r.row.code == code)
}

/// Result of slicing the pre-ranked leaderboard: the entries themselves,
/// the joined records that have geometry for them, and the distinct UFs
/// those entries touch (used for the contextual outline layer).
#[derive(Debug)]
pub struct TopSelection<'a> {
    pub entries: Vec<RankingEntry>,
    pub records: Vec<&'a JoinedRecord>,
    pub ufs: BTreeSet<String>,
}

/// First `min(n, len)` entries of the leaderboard, in sheet order. The
/// leaderboard is a separate pre-ranked source; it is never re-derived
/// from the live indicator table.
pub fn top_n<'a>(
    leaderboard: &[RankedRow],
    joined: &'a [JoinedRecord],
    n: usize,
) -> TopSelection<'a> {
    let take = &leaderboard[..n.min(leaderboard.len())];

    let by_code: HashMap<&str, &JoinedRecord> =
        joined.iter().map(|r| (r.row.code.as_str(), r)).collect();

    let mut entries = Vec::with_capacity(take.len());
    let mut records = Vec::new();
    let mut ufs = BTreeSet::new();

    for (i, ranked) in take.iter().enumerate() {
        entries.push(RankingEntry {
            position: i + 1,
            code: ranked.code.clone(),
            name: ranked.name.clone(),
            uf: ranked.uf.clone(),
            value: Some(ranked.value),
        });
        ufs.insert(ranked.uf.clone());
        if let Some(record) = by_code.get(ranked.code.as_str()) {
            records.push(*record);
        }
    }

    TopSelection {
        entries,
        records,
        ufs,
    }
}

/// State outlines for the UFs touched by a top-N selection.
pub fn outlines_for<'a>(
    states: &'a [GeometryRecord],
    ufs: &BTreeSet<String>,
) -> Vec<&'a GeometryRecord> {
    states.iter().filter(|s| ufs.contains(&s.code)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndicatorRow;
    use geo::{LineString, MultiPolygon, Polygon};

    fn square() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        )])
    }

    fn joined(code: &str, name: &str, uf: &str, iqm: Option<f64>) -> JoinedRecord {
        JoinedRecord {
            row: IndicatorRow {
                code: code.to_string(),
                name: name.to_string(),
                uf: uf.to_string(),
                iqm,
                desvio_padrao: None,
                correcao: None,
                iqm_final: iqm,
            },
            geometry: square(),
        }
    }

    fn ranked(code: &str, uf: &str, value: f64) -> RankedRow {
        RankedRow {
            code: code.to_string(),
            name: format!("Micro {code}"),
            uf: uf.to_string(),
            value,
        }
    }

    #[test]
    fn filter_returns_exactly_the_uf_subset() {
        let set = vec![
            joined("01001", "A", "AC", Some(7.5)),
            joined("01002", "B", "AC", Some(9.1)),
            joined("35001", "C", "SP", Some(5.0)),
        ];
        let ac = filter_by_uf(&set, "AC");
        assert_eq!(ac.len(), 2);
        assert!(ac.iter().all(|r| r.row.uf == "AC"));
    }

    #[test]
    fn ranking_sorts_descending_with_positions() {
        let set = vec![
            joined("01001", "A", "AC", Some(7.5)),
            joined("01002", "B", "AC", Some(9.1)),
        ];
        let entries = rank(&filter_by_uf(&set, "AC"), Indicator::Iqm);
        assert_eq!(entries[0].code, "01002");
        assert_eq!(entries[0].value, Some(9.1));
        assert_eq!(entries[0].position, 1);
        assert_eq!(entries[1].code, "01001");
        assert_eq!(entries[1].value, Some(7.5));
        assert_eq!(entries[1].position, 2);
    }

    #[test]
    fn ties_keep_original_row_order() {
        let set = vec![
            joined("01001", "A", "AC", Some(5.0)),
            joined("01002", "B", "AC", Some(5.0)),
            joined("01003", "C", "AC", Some(5.0)),
        ];
        let entries = rank(&filter_by_uf(&set, "AC"), Indicator::Iqm);
        let codes: Vec<&str> = entries.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, ["01001", "01002", "01003"]);
    }

    #[test]
    fn missing_values_sort_last() {
        let set = vec![
            joined("01001", "A", "AC", None),
            joined("01002", "B", "AC", Some(2.0)),
            joined("01003", "C", "AC", Some(9.0)),
        ];
        let entries = rank(&filter_by_uf(&set, "AC"), Indicator::Iqm);
        let codes: Vec<&str> = entries.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, ["01003", "01002", "01001"]);
        assert_eq!(entries[2].value, None);
    }

    #[test]
    fn top_n_returns_min_of_n_and_len() {
        let board = vec![
            ranked("01002", "AC", 9.1),
            ranked("35001", "SP", 8.0),
            ranked("01001", "AC", 7.5),
        ];
        let set = vec![
            joined("01001", "A", "AC", Some(7.5)),
            joined("01002", "B", "AC", Some(9.1)),
            joined("35001", "C", "SP", Some(8.0)),
        ];

        let top = top_n(&board, &set, 2);
        assert_eq!(top.entries.len(), 2);
        assert_eq!(top.entries[0].code, "01002");
        assert_eq!(top.entries[0].position, 1);
        assert_eq!(top.entries[1].code, "35001");

        let top = top_n(&board, &set, 10);
        assert_eq!(top.entries.len(), 3);
    }

    #[test]
    fn top_n_derives_the_touched_ufs() {
        let board = vec![
            ranked("01002", "AC", 9.1),
            ranked("35001", "SP", 8.0),
            ranked("01001", "AC", 7.5),
        ];
        let set = vec![
            joined("01001", "A", "AC", Some(7.5)),
            joined("01002", "B", "AC", Some(9.1)),
            joined("35001", "C", "SP", Some(8.0)),
        ];
        let top = top_n(&board, &set, 3);
        let ufs: Vec<&str> = top.ufs.iter().map(String::as_str).collect();
        assert_eq!(ufs, ["AC", "SP"]);
        assert_eq!(top.records.len(), 3);
    }

    #[test]
    fn top_n_keeps_entries_without_geometry() {
        // Leaderboard row with no joined geometry still counts toward N.
        let board = vec![ranked("01002", "AC", 9.1), ranked("99999", "SP", 8.0)];
        let set = vec![joined("01002", "B", "AC", Some(9.1))];
        let top = top_n(&board, &set, 2);
        assert_eq!(top.entries.len(), 2);
        assert_eq!(top.records.len(), 1);
    }

    #[test]
    fn distinct_ufs_are_sorted_and_unique() {
        let set = vec![
            joined("35001", "C", "SP", Some(5.0)),
            joined("01001", "A", "AC", Some(7.5)),
            joined("01002", "B", "AC", Some(9.1)),
        ];
        assert_eq!(distinct_ufs(&set), ["AC", "SP"]);
    }

    #[test]
    fn regions_are_scoped_and_sorted_by_name() {
        let set = vec![
            joined("01002", "Brasiléia", "AC", Some(9.1)),
            joined("01001", "Cruzeiro do Sul", "AC", Some(7.5)),
            joined("35001", "Campinas", "SP", Some(5.0)),
        ];
        let regions = regions_in_uf(&set, "AC");
        let names: Vec<&str> = regions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Brasiléia", "Cruzeiro do Sul"]);
    }

    #[test]
    fn outlines_cover_only_touched_ufs() {
        let states = vec![
            GeometryRecord {
                code: "AC".into(),
                geometry: square(),
            },
            GeometryRecord {
                code: "SP".into(),
                geometry: square(),
            },
        ];
        let ufs: BTreeSet<String> = ["AC".to_string()].into_iter().collect();
        let outlines = outlines_for(&states, &ufs);
        assert_eq!(outlines.len(), 1);
        assert_eq!(outlines[0].code, "AC");
    }

    #[test]
    fn region_detail_finds_by_code() {
        let set = vec![joined("01001", "A", "AC", Some(7.5))];
        assert!(region_detail(&set, "01001").is_some());
        assert!(region_detail(&set, "01002").is_none());
    }
}
