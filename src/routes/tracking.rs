use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::rsvp::tracking;
use crate::state::AppState;
use crate::tokens;

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

#[derive(Clone, Copy)]
enum Hit {
    Open,
    Click,
}

/// Tracking never fails the caller; lookups and writes are logged and dropped.
fn record_hit(state: &AppState, token: &str, hit: Hit) {
    let now = state.clock.now();
    let result = state.db().and_then(|mut conn| {
        let Some(item) = tokens::find_item_by_token(&mut conn, token)? else {
            return Ok(());
        };
        match hit {
            Hit::Open => tracking::mark_opened(&mut conn, item.id, now)?,
            Hit::Click => tracking::mark_clicked(&mut conn, item.id, now)?,
        };
        Ok(())
    });

    if let Err(err) = result {
        warn!(error = %err, "failed to record invite tracking hit");
    }
}

pub async fn open_pixel(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    record_hit(&state, &token, Hit::Open);

    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
        ],
        tracking::pixel_gif(),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct ClickQuery {
    pub url: Option<String>,
}

pub async fn click_redirect(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<ClickQuery>,
) -> AppResult<Redirect> {
    let target = query
        .url
        .as_deref()
        .ok_or_else(|| AppError::bad_request("url is required"))?;
    let allowed = tracking::allowed_origins(&state.config);
    let target = tracking::redirect_target(target, &allowed)
        .ok_or_else(|| AppError::bad_request("redirect target is not allowed"))?;

    record_hit(&state, &token, Hit::Click);

    Ok(Redirect::temporary(target.as_str()))
}
