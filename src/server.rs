use crate::config::AppConfig;
use crate::data::Dataset;
use crate::join::JoinReport;
use crate::query;
use crate::render;
use crate::types::{Indicator, JoinedRecord, RankingEntry};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use geo::algorithm::contains::Contains;
use geo::bounding_rect::BoundingRect;
use geo::Point;
use geojson::FeatureCollection;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

// Wrapper for RTree indexing
struct AreaIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for AreaIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub dataset: Dataset,
    tree: RTree<AreaIndex>,
}

type ApiError = (StatusCode, String);

pub async fn start_server(config: AppConfig, dataset: Dataset) -> Result<()> {
    info!("building spatial index for locate queries");
    let tree_items: Vec<AreaIndex> = dataset
        .joined
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            record.geometry.bounding_rect().map(|rect| AreaIndex {
                index: i,
                aabb: AABB::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                ),
            })
        })
        .collect();
    let tree = RTree::bulk_load(tree_items);

    let state = Arc::new(AppState { dataset, tree });

    let port = config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("starting server on http://{}", addr);

    let app = Router::new()
        .route("/api/meta", get(meta_handler))
        .route("/api/map", get(map_handler))
        .route("/api/ranking", get(ranking_handler))
        .route("/api/regions", get(regions_handler))
        .route("/api/region/:code", get(region_handler))
        .route("/api/top", get(top_handler))
        .route("/api/locate", get(locate_handler))
        .nest_service("/", ServeDir::new(&config.server.static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct MetaResponse {
    ufs: Vec<String>,
    indicators: Vec<&'static str>,
    join: JoinReport,
    has_ranking: bool,
}

async fn meta_handler(State(state): State<Arc<AppState>>) -> Json<MetaResponse> {
    Json(MetaResponse {
        ufs: query::distinct_ufs(&state.dataset.joined),
        indicators: Indicator::ALL.iter().map(|i| i.key()).collect(),
        join: state.dataset.report,
        has_ranking: state.dataset.leaderboard.is_some(),
    })
}

#[derive(Deserialize)]
struct ViewParams {
    uf: String,
    indicator: Indicator,
}

fn uf_subset<'a>(state: &'a AppState, uf: &str) -> Result<Vec<&'a JoinedRecord>, ApiError> {
    let records = query::filter_by_uf(&state.dataset.joined, uf);
    if records.is_empty() {
        return Err((StatusCode::NOT_FOUND, format!("unknown UF '{uf}'")));
    }
    Ok(records)
}

async fn map_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UfParams>,
) -> Result<Json<FeatureCollection>, ApiError> {
    // The features carry every indicator in their properties; the renderer
    // picks the one to shade by.
    let records = uf_subset(&state, &params.uf)?;
    Ok(Json(render::feature_collection(&records)))
}

async fn ranking_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ViewParams>,
) -> Result<Json<Vec<RankingEntry>>, ApiError> {
    let records = uf_subset(&state, &params.uf)?;
    Ok(Json(query::rank(&records, params.indicator)))
}

#[derive(Deserialize)]
struct UfParams {
    uf: String,
}

async fn regions_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UfParams>,
) -> Result<Json<Vec<query::RegionOption>>, ApiError> {
    uf_subset(&state, &params.uf)?;
    Ok(Json(query::regions_in_uf(&state.dataset.joined, &params.uf)))
}

#[derive(Serialize)]
struct RegionDetail {
    code: String,
    name: String,
    uf: String,
    iqm: Option<f64>,
    desvio_padrao: Option<f64>,
    correcao: Option<f64>,
    iqm_final: Option<f64>,
}

impl From<&JoinedRecord> for RegionDetail {
    fn from(record: &JoinedRecord) -> Self {
        RegionDetail {
            code: record.row.code.clone(),
            name: record.row.name.clone(),
            uf: record.row.uf.clone(),
            iqm: record.row.iqm,
            desvio_padrao: record.row.desvio_padrao,
            correcao: record.row.correcao,
            iqm_final: record.row.iqm_final,
        }
    }
}

async fn region_handler(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<RegionDetail>, ApiError> {
    query::region_detail(&state.dataset.joined, &code)
        .map(|record| Json(record.into()))
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown region '{code}'")))
}

#[derive(Deserialize)]
struct TopParams {
    n: Option<usize>,
}

#[derive(Serialize)]
struct TopResponse {
    entries: Vec<RankingEntry>,
    ufs: Vec<String>,
    features: FeatureCollection,
    outlines: Option<FeatureCollection>,
}

async fn top_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TopParams>,
) -> Result<Json<TopResponse>, ApiError> {
    let leaderboard = state.dataset.leaderboard.as_ref().ok_or((
        StatusCode::NOT_FOUND,
        "no ranking sheet configured".to_string(),
    ))?;

    let top = query::top_n(leaderboard, &state.dataset.joined, params.n.unwrap_or(10));
    let outlines = state
        .dataset
        .states
        .as_ref()
        .map(|states| render::outline_collection(&query::outlines_for(states, &top.ufs)));

    Ok(Json(TopResponse {
        ufs: top.ufs.iter().cloned().collect(),
        features: render::feature_collection(&top.records),
        entries: top.entries,
        outlines,
    }))
}

#[derive(Deserialize)]
struct LocateParams {
    lat: f64,
    lon: f64,
}

async fn locate_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LocateParams>,
) -> Json<Option<RegionDetail>> {
    let point = Point::new(params.lon, params.lat);
    let envelope = AABB::from_point([params.lon, params.lat]);

    let candidates = state.tree.locate_in_envelope_intersecting(&envelope);
    for candidate in candidates {
        if let Some(record) = state.dataset.joined.get(candidate.index) {
            if record.geometry.contains(&point) {
                return Json(Some(record.into()));
            }
        }
    }

    Json(None)
}
