use crate::config::AppConfig;
use crate::fetch;
use crate::join::{self, JoinReport};
use crate::types::{GeometryRecord, Indicator, IndicatorRow, JoinedRecord, RankedRow};
use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use geo::MultiPolygon;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const COL_CODE: &str = "Código da Microrregião";
const COL_NAME: &str = "Microrregião";
const COL_UF: &str = "UF";

/// Everything the filter/rank stage and the API work from. Built once per
/// session by `load_pipeline` and immutable afterwards; user interactions
/// only re-run queries against it.
pub struct Dataset {
    pub joined: Vec<JoinedRecord>,
    pub leaderboard: Option<Vec<RankedRow>>,
    pub states: Option<Vec<GeometryRecord>>,
    pub report: JoinReport,
}

/// Run the whole acquisition/load/join pipeline: fetch and extract the
/// geometry bundle(s), read the workbook sheets, normalize keys on both
/// sides with one policy, and inner-join.
pub async fn load_pipeline(config: &AppConfig) -> Result<Dataset> {
    let policy = config.join.key_policy();
    let client = fetch::http_client()?;

    let shp = fetch::ensure_layer(
        &client,
        &config.input.microregions,
        &config.fetch.scratch_dir,
        "microregions",
    )
    .await?;

    let (rows, skipped) = load_indicator_rows(
        &config.input.workbook,
        &config.input.qualification_sheet,
        config.input.header_row,
    )?;
    if skipped > 0 {
        warn!("dropped {} row(s) with empty code or UF at load", skipped);
    }
    info!("loaded {} indicator rows", rows.len());

    let geometries = load_geometry(&shp, &config.input.microregions.join_field)?;
    info!("loaded {} geometries", geometries.len());

    let (joined, report) = join::join_records(rows, geometries, policy)?;
    info!(
        "joined {} records ({} rows / {} geometries unmatched)",
        report.joined, report.unmatched_rows, report.unmatched_geometries
    );

    let leaderboard = match &config.input.ranking_sheet {
        Some(sheet) => {
            let mut board = load_leaderboard(
                &config.input.workbook,
                sheet,
                config.input.ranking_header_row,
            )?;
            for row in &mut board {
                row.code = policy.normalize(&row.code);
            }
            info!("loaded {} leaderboard entries", board.len());
            Some(board)
        }
        None => None,
    };

    let states = match &config.input.states {
        Some(layer) => {
            let shp =
                fetch::ensure_layer(&client, layer, &config.fetch.scratch_dir, "states").await?;
            let layer = load_geometry(&shp, &layer.join_field)?;
            info!("loaded {} state outlines", layer.len());
            Some(layer)
        }
        None => None,
    };

    Ok(Dataset {
        joined,
        leaderboard,
        states,
        report,
    })
}

/// Read the qualification sheet into indicator rows. The header offset is
/// configuration; the required columns are an explicit schema checked once
/// here, so a wrong offset fails with a precise error instead of shifting
/// every column silently. Returns the rows plus the count of rows dropped
/// for an empty code or UF.
pub fn load_indicator_rows(
    workbook: &Path,
    sheet: &str,
    header_row: usize,
) -> Result<(Vec<IndicatorRow>, usize)> {
    let range = open_sheet(workbook, sheet)?;
    let columns = header_map(&range, header_row, sheet)?;

    let code_col = require_column(&columns, COL_CODE, sheet)?;
    let name_col = require_column(&columns, COL_NAME, sheet)?;
    let uf_col = require_column(&columns, COL_UF, sheet)?;
    let mut indicator_cols = [0usize; 4];
    for (slot, indicator) in indicator_cols.iter_mut().zip(Indicator::ALL) {
        *slot = require_column(&columns, indicator.column(), sheet)?;
    }

    let mut rows = Vec::new();
    let mut skipped = 0;

    for cells in range.rows().skip(header_row + 1) {
        let code = cells.get(code_col).and_then(cell_text);
        let uf = cells.get(uf_col).and_then(cell_text);
        let (code, uf) = match (code, uf) {
            (Some(code), Some(uf)) => (code, uf),
            _ => {
                skipped += 1;
                continue;
            }
        };
        let name = cells
            .get(name_col)
            .and_then(cell_text)
            .unwrap_or_else(|| code.clone());

        let mut values = [None; 4];
        for (slot, col) in values.iter_mut().zip(indicator_cols) {
            *slot = cells.get(col).and_then(cell_number);
        }

        rows.push(IndicatorRow {
            code,
            name,
            uf,
            iqm: values[0],
            desvio_padrao: values[1],
            correcao: values[2],
            iqm_final: values[3],
        });
    }

    Ok((rows, skipped))
}

/// Read the pre-ranked leaderboard sheet in sheet order. Rows without a
/// final-index value (or without a code) are excluded here, so top-N never
/// sees them.
pub fn load_leaderboard(
    workbook: &Path,
    sheet: &str,
    header_row: usize,
) -> Result<Vec<RankedRow>> {
    let range = open_sheet(workbook, sheet)?;
    let columns = header_map(&range, header_row, sheet)?;

    let code_col = require_column(&columns, COL_CODE, sheet)?;
    let name_col = require_column(&columns, COL_NAME, sheet)?;
    let uf_col = require_column(&columns, COL_UF, sheet)?;
    let value_col = require_column(&columns, Indicator::IqmFinal.column(), sheet)?;

    let mut board = Vec::new();
    for cells in range.rows().skip(header_row + 1) {
        let code = cells.get(code_col).and_then(cell_text);
        let uf = cells.get(uf_col).and_then(cell_text);
        let value = cells.get(value_col).and_then(cell_number);
        let (code, uf, value) = match (code, uf, value) {
            (Some(code), Some(uf), Some(value)) => (code, uf, value),
            _ => continue,
        };
        let name = cells
            .get(name_col)
            .and_then(cell_text)
            .unwrap_or_else(|| code.clone());
        board.push(RankedRow {
            code,
            name,
            uf,
            value,
        });
    }

    Ok(board)
}

fn open_sheet(workbook: &Path, sheet: &str) -> Result<Range<Data>> {
    let mut book = open_workbook_auto(workbook)
        .with_context(|| format!("Failed to open workbook {:?}", workbook))?;
    book.worksheet_range(sheet)
        .with_context(|| format!("Failed to read sheet '{sheet}' from {:?}", workbook))
}

fn header_map(
    range: &Range<Data>,
    header_row: usize,
    sheet: &str,
) -> Result<HashMap<String, usize>> {
    let cells = range
        .rows()
        .nth(header_row)
        .ok_or_else(|| anyhow!("sheet '{sheet}' has no header row at index {header_row}"))?;
    Ok(cells
        .iter()
        .enumerate()
        .filter_map(|(i, cell)| cell_text(cell).map(|name| (name, i)))
        .collect())
}

fn require_column(columns: &HashMap<String, usize>, name: &str, sheet: &str) -> Result<usize> {
    columns
        .get(name)
        .copied()
        .ok_or_else(|| anyhow!("missing column '{name}' in sheet '{sheet}'"))
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        // Codes stored as numeric cells must not grow a ".0" suffix.
        Data::Float(f) if f.fract() == 0.0 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn cell_number(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

/// Read the extracted shapefile into per-feature geometry records, keeping
/// only the join key and the polygon geometry. Non-polygon shapes and
/// null-keyed features are skipped.
pub fn load_geometry(shp_path: &Path, join_field: &str) -> Result<Vec<GeometryRecord>> {
    check_projection(shp_path)?;

    let mut reader = shapefile::Reader::from_path(shp_path)
        .with_context(|| format!("Failed to open shapefile: {:?}", shp_path))?;

    let mut records = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let code_value = record
            .get(join_field)
            .ok_or_else(|| anyhow!("join field '{join_field}' not found in shapefile"))?;
        let code = match code_value {
            shapefile::dbase::FieldValue::Character(Some(s)) => s.trim().to_string(),
            shapefile::dbase::FieldValue::Character(None) => continue,
            shapefile::dbase::FieldValue::Numeric(Some(n)) => format!("{}", *n as i64),
            shapefile::dbase::FieldValue::Numeric(None) => continue,
            other => bail!(
                "join field '{join_field}' has unsupported type {:?}",
                other
            ),
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue,
        };

        records.push(GeometryRecord { code, geometry });
    }

    Ok(records)
}

/// All geometry consumed by one render must share a geographic CRS. The
/// bundles we consume ship SIRGAS 2000 / WGS84-family degrees; a projected
/// CRS in the sidecar .prj means the bundle is not usable as-is.
fn check_projection(shp_path: &Path) -> Result<()> {
    let prj_path = shp_path.with_extension("prj");
    if !prj_path.exists() {
        warn!("no .prj sidecar next to {:?}; assuming geographic CRS", shp_path);
        return Ok(());
    }
    let wkt = std::fs::read_to_string(&prj_path)
        .with_context(|| format!("Failed to read {:?}", prj_path))?;
    if wkt.contains("PROJCS") {
        bail!(
            "shapefile {:?} uses a projected CRS; a geographic (EPSG:4326-compatible) bundle is required",
            shp_path
        );
    }
    Ok(())
}
