//! Invite open/click tracking. Each flag flips once; later hits are no-ops.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::schema::guest_list_items;

const PIXEL_GIF_BASE64: &str = "R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

/// Transparent 1x1 GIF.
pub fn pixel_gif() -> Vec<u8> {
    STANDARD.decode(PIXEL_GIF_BASE64).unwrap_or_default()
}

/// Returns true when this call flipped the flag.
pub fn mark_opened(conn: &mut PgConnection, item_id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
    let updated = diesel::update(
        guest_list_items::table
            .filter(guest_list_items::id.eq(item_id))
            .filter(guest_list_items::invite_opened.eq(false)),
    )
    .set((
        guest_list_items::invite_opened.eq(true),
        guest_list_items::invite_opened_at.eq(Some(now.naive_utc())),
    ))
    .execute(conn)?;
    Ok(updated == 1)
}

/// A click implies the invite was opened, so both flags are set.
pub fn mark_clicked(
    conn: &mut PgConnection,
    item_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    mark_opened(conn, item_id, now)?;
    let updated = diesel::update(
        guest_list_items::table
            .filter(guest_list_items::id.eq(item_id))
            .filter(guest_list_items::invite_clicked.eq(false)),
    )
    .set((
        guest_list_items::invite_clicked.eq(true),
        guest_list_items::invite_clicked_at.eq(Some(now.naive_utc())),
    ))
    .execute(conn)?;
    Ok(updated == 1)
}

/// Origins a click redirect may point at, serialized as `scheme://host[:port]`.
pub fn allowed_origins(config: &AppConfig) -> Vec<String> {
    std::iter::once(config.public_base_url.as_str())
        .chain(config.tracking_allowed_origins.iter().map(String::as_str))
        .filter_map(|raw| Url::parse(raw).ok())
        .map(|url| url.origin().ascii_serialization())
        .collect()
}

/// Parses `target` and returns it only if it is http(s) on an allowed origin.
pub fn redirect_target(target: &str, allowed: &[String]) -> Option<Url> {
    let url = Url::parse(target.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let origin = url.origin().ascii_serialization();
    allowed.iter().any(|o| *o == origin).then_some(url)
}
