use clap::ValueEnum;
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

/// The indicator columns carried by the qualification sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Iqm,
    DesvioPadrao,
    Correcao,
    IqmFinal,
}

impl Indicator {
    pub const ALL: [Indicator; 4] = [
        Indicator::Iqm,
        Indicator::DesvioPadrao,
        Indicator::Correcao,
        Indicator::IqmFinal,
    ];

    /// Column header as it appears in the workbook.
    pub fn column(&self) -> &'static str {
        match self {
            Indicator::Iqm => "IQM",
            Indicator::DesvioPadrao => "Desvio Padrão",
            Indicator::Correcao => "Correção",
            Indicator::IqmFinal => "IQM FINAL",
        }
    }

    /// Stable key used in API payloads and query strings.
    pub fn key(&self) -> &'static str {
        match self {
            Indicator::Iqm => "iqm",
            Indicator::DesvioPadrao => "desvio_padrao",
            Indicator::Correcao => "correcao",
            Indicator::IqmFinal => "iqm_final",
        }
    }
}

/// One row of the qualification sheet, keyed by microregion code.
#[derive(Debug, Clone)]
pub struct IndicatorRow {
    pub code: String,
    pub name: String,
    pub uf: String,
    pub iqm: Option<f64>,
    pub desvio_padrao: Option<f64>,
    pub correcao: Option<f64>,
    pub iqm_final: Option<f64>,
}

impl IndicatorRow {
    pub fn value(&self, indicator: Indicator) -> Option<f64> {
        match indicator {
            Indicator::Iqm => self.iqm,
            Indicator::DesvioPadrao => self.desvio_padrao,
            Indicator::Correcao => self.correcao,
            Indicator::IqmFinal => self.iqm_final,
        }
    }
}

/// One shapefile feature reduced to its join key and geometry.
#[derive(Debug, Clone)]
pub struct GeometryRecord {
    pub code: String,
    pub geometry: MultiPolygon<f64>,
}

/// IndicatorRow joined to its geometry. Both sides are always present;
/// unmatched rows never make it into the joined set.
#[derive(Debug, Clone)]
pub struct JoinedRecord {
    pub row: IndicatorRow,
    pub geometry: MultiPolygon<f64>,
}

/// One row of the pre-ranked leaderboard sheet, in sheet order.
#[derive(Debug, Clone)]
pub struct RankedRow {
    pub code: String,
    pub name: String,
    pub uf: String,
    pub value: f64,
}

/// Derived ranking view, recomputed per request and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RankingEntry {
    pub position: usize,
    pub code: String,
    pub name: String,
    pub uf: String,
    pub value: Option<f64>,
}
