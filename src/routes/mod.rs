use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod admin;
pub mod auth;
pub mod health;
pub mod rsvp;
pub mod shares;
pub mod tracking;

const MAX_BODY_BYTES: usize = 64 * 1024;

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let share_routes = Router::new()
        .route("/:token", get(shares::share_info))
        .route("/:token/send-otp", post(shares::send_otp))
        .route("/:token/verify", post(shares::verify_otp))
        .route("/:token/view", get(shares::view_share))
        .route("/:token/items/:item_id", patch(shares::update_item));

    let rsvp_routes = Router::new()
        .route("/:token", get(rsvp::rsvp_form).post(rsvp::submit_rsvp))
        .route("/:token/forward", post(rsvp::forward_rsvp));

    let tracking_routes = Router::new()
        .route("/:token/open.gif", get(tracking::open_pixel))
        .route("/:token/click", get(tracking::click_redirect));

    let public_routes = Router::new()
        .nest("/public/guest-lists", share_routes)
        .nest("/public/rsvp", rsvp_routes)
        .nest("/public/t", tracking_routes);

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .route("/api/guest-lists/:id/shares", post(admin::create_share))
        .route("/api/guest-lists/:id/rsvp", post(admin::toggle_rsvp))
        .route(
            "/api/guest-lists/:id/items/:item_id/invite",
            post(admin::invite_item),
        )
        .route("/api/shares/:id/revoke", post(admin::revoke_share))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
