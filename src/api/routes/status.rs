//! Status endpoint

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::aggregate::Period;
use crate::api::{error::ApiResult, state::ApiState};
use crate::query::ALL;

/// Lets CDNs and browsers hold a document for a minute
pub const CACHE_CONTROL: &str = "public, max-age=60, s-maxage=60";

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default = "default_filter")]
    pub provider: String,
    #[serde(default = "default_filter")]
    pub service: String,
}

fn default_period() -> String {
    Period::Day.as_str().to_string()
}

fn default_filter() -> String {
    ALL.to_string()
}

/// GET /api/status
///
/// Query parameters:
/// - `period`: `24h` (default), `1d`, `7d` or `30d`
/// - `provider`: provider name or slug, `all` by default
/// - `service`: service name, `all` by default
pub async fn get_status(
    State(state): State<ApiState>,
    Query(params): Query<StatusParams>,
) -> ApiResult<Response> {
    let period: Period = params.period.parse()?;
    let body = state
        .status
        .load(period, &params.provider, &params.service)
        .await?;

    Ok((
        [
            (header::CACHE_CONTROL, CACHE_CONTROL),
            (header::CONTENT_TYPE, "application/json; charset=utf-8"),
        ],
        body,
    )
        .into_response())
}
