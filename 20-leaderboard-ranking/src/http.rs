//! HTTP routes translating requests into dispatcher commands.
//!
//! Handlers validate their input, build a command through the
//! [`DispatcherHandle`], await the single response and render it as JSON.

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::dispatcher::{DispatcherHandle, ScoreEvent};
use crate::error::RankingError;
use crate::groups::Cleared;
use crate::model::RankingRow;
use crate::query::RankingQuery;

pub fn router(handle: DispatcherHandle) -> Router {
    Router::new()
        .route("/saveGamePlayRanking", post(save_game_play_ranking))
        .route("/saveWorldRanking", post(save_world_ranking))
        .route("/getRankingByEvent", get(get_ranking_by_event))
        .route("/clearRankingByKey", get(clear_ranking_by_key))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

/// Error body returned for every failed request.
#[derive(Debug)]
pub struct ApiError(RankingError);

impl From<RankingError> for ApiError {
    fn from(err: RankingError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(RankingError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(RankingError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RankingError::Validation(_) => StatusCode::BAD_REQUEST,
            RankingError::DispatcherClosed => StatusCode::SERVICE_UNAVAILABLE,
            RankingError::Store(_)
            | RankingError::WrongType(_)
            | RankingError::StoreTimeout(_)
            | RankingError::StartupLoad(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Amounts arrive either as JSON numbers or as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    fn parse(&self) -> Result<f64, RankingError> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| RankingError::validation(format!("amount '{raw}' is not a number"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SaveRankingBody {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    event_type: String,
    amount: Option<Amount>,
}

impl SaveRankingBody {
    fn into_event(self) -> Result<ScoreEvent, RankingError> {
        let amount = self
            .amount
            .ok_or_else(|| RankingError::validation("amount is required"))?
            .parse()?;
        ScoreEvent::new(self.uid, self.event_type, amount)
    }
}

async fn save_game_play_ranking(
    State(handle): State<DispatcherHandle>,
    body: Result<Json<SaveRankingBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(body) = body?;
    let event = body.into_event()?;
    let score = handle.record_event(event).await?;
    Ok(Json(json!({ "score": score })))
}

async fn save_world_ranking(
    State(handle): State<DispatcherHandle>,
    body: Result<Json<SaveRankingBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(body) = body?;
    let event = body.into_event()?;
    let score = handle.record_world_event(event).await?;
    Ok(Json(json!({ "score": score })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RankingParams {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    event_type: String,
    ranking_duration: Option<String>,
    is_server_request: Option<String>,
}

impl RankingParams {
    fn into_query(self) -> Result<RankingQuery, RankingError> {
        let for_server = match self.is_server_request.as_deref() {
            Some("1") => true,
            Some("0") => false,
            _ => {
                return Err(RankingError::validation(
                    "isServerRequest must be \"0\" or \"1\"",
                ))
            }
        };
        let scope = self
            .ranking_duration
            .filter(|duration| !duration.trim().is_empty());
        Ok(RankingQuery {
            member: self.uid,
            category: self.event_type,
            scope,
            for_server,
        })
    }
}

async fn get_ranking_by_event(
    State(handle): State<DispatcherHandle>,
    params: Result<Query<RankingParams>, QueryRejection>,
) -> Result<Json<Vec<RankingRow>>, ApiError> {
    let Query(params) = params?;
    let rows = handle.query_ranking(params.into_query()?).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct ClearParams {
    #[serde(default)]
    rankingkey: String,
}

async fn clear_ranking_by_key(
    State(handle): State<DispatcherHandle>,
    params: Result<Query<ClearParams>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(params) = params?;
    let cleared = handle.clear_by_key(params.rankingkey).await?;
    Ok(Json(json!({
        "deleted": cleared.deleted(),
        "group": matches!(cleared, Cleared::Group { .. }),
    })))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
