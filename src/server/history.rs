use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use super::AppState;
use crate::logging;
use crate::store::{self, StoreError};
use crate::tick::TickRecord;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    BadRequest(String),
    #[error("no data available for the selected range")]
    NotFound,
    #[error("error querying store: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            QueryError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            QueryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            QueryError::StoreUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_UNAVAILABLE")
            }
        };
        let body = Json(json!({ "error": code, "message": self.to_string() }));
        (status, body).into_response()
    }
}

/// Raw query string. Bounds stay strings so a bad value is a 400 from us
/// rather than axum's rejection.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub symbol: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRange {
    pub symbol: String,
    pub from: i64,
    pub to: i64,
}

impl HistoryParams {
    pub fn validate(&self) -> Result<HistoryRange, QueryError> {
        let symbol = self
            .symbol
            .as_deref()
            .map(str::trim)
            .filter(|symbol| !symbol.is_empty())
            .ok_or_else(|| QueryError::BadRequest("missing symbol".into()))?;
        let from = parse_bound("from", self.from.as_deref())?;
        let to = parse_bound("to", self.to.as_deref())?;
        if from > to {
            return Err(QueryError::BadRequest(format!(
                "from ({from}) is after to ({to})"
            )));
        }
        Ok(HistoryRange {
            symbol: symbol.to_owned(),
            from,
            to,
        })
    }
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<i64, QueryError> {
    let raw = raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| QueryError::BadRequest(format!("missing {name}")))?;
    raw.parse()
        .map_err(|_| QueryError::BadRequest(format!("{name} must be unix seconds, got {raw:?}")))
}

/// Runs the range scan with live broadcast suspended for its duration.
pub async fn query(state: &AppState, range: &HistoryRange) -> Result<Vec<TickRecord>, QueryError> {
    let _suspended = state.mode.suspend_live();
    scan_history(state, range).await
}

/// Callers hold a [`LiveSuspension`](super::LiveSuspension) around this.
async fn scan_history(
    state: &AppState,
    range: &HistoryRange,
) -> Result<Vec<TickRecord>, QueryError> {
    let rows = store::bounded(
        state.config.store_timeout,
        state.store.scan_range(&range.symbol, range.from, range.to),
    )
    .await?;
    if rows.is_empty() {
        return Err(QueryError::NotFound);
    }
    Ok(rows)
}

/// Owns the suspension for the whole request: the scan and the
/// serialization of its rows both run with live broadcast off.
pub async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Response, QueryError> {
    let range = params.validate()?;

    let body = {
        let _suspended = state.mode.suspend_live();
        let rows = scan_history(&state, &range).await.map_err(|err| {
            if let QueryError::StoreUnavailable(cause) = &err {
                logging::error(
                    "history.store_error",
                    "Historical scan failed",
                    json!({ "symbol": range.symbol, "error": cause.to_string() }),
                );
            }
            err
        })?;
        serde_json::to_string(&rows)
            .map_err(|err| QueryError::StoreUnavailable(StoreError::Unavailable(err.to_string())))?
    };

    logging::info(
        "history.served",
        "Historical query served",
        json!({ "symbol": range.symbol, "from": range.from, "to": range.to }),
    );
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
