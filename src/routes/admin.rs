use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, NaiveDateTime, SecondsFormat};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, AuditAction, RESOURCE_GUEST_LIST, RESOURCE_ITEM, RESOURCE_SHARE};
use crate::auth::AuthenticatedUser;
use crate::crypto::mask_email;
use crate::error::{AppError, AppResult};
use crate::jobs::enqueue_notification_best_effort;
use crate::models::{GuestList, GuestListItem, NewShare, Share};
use crate::notifier::{Notification, RsvpInvite, ShareNotification};
use crate::rsvp::{self, INVITE_STATUS_INVITED, MAX_EMAIL_LEN, MAX_NAME_LEN};
use crate::schema::{guest_list_items, guest_list_shares, guest_lists};
use crate::state::AppState;
use crate::tokens;
use crate::utils::json::non_empty;

pub const SHARE_LIFETIME_DAYS: i64 = 30;

#[derive(Deserialize)]
pub struct CreateShareRequest {
    pub recipient_email: String,
    pub recipient_name: Option<String>,
}

#[derive(Serialize)]
pub struct ShareResponse {
    pub id: Uuid,
    pub guest_list_id: Uuid,
    pub token: String,
    pub share_url: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub expires_at: NaiveDateTime,
    pub revoked: bool,
}

impl ShareResponse {
    fn new(state: &AppState, share: Share) -> Self {
        Self {
            share_url: state.config.share_link(&share.token),
            id: share.id,
            guest_list_id: share.guest_list_id,
            token: share.token,
            recipient_email: share.recipient_email,
            recipient_name: share.recipient_name,
            expires_at: share.expires_at,
            revoked: share.revoked,
        }
    }
}

pub async fn create_share(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(list_id): Path<Uuid>,
    Json(payload): Json<CreateShareRequest>,
) -> AppResult<(StatusCode, Json<ShareResponse>)> {
    let recipient_email = payload.recipient_email.trim().to_lowercase();
    if recipient_email.is_empty()
        || recipient_email.len() > MAX_EMAIL_LEN
        || !recipient_email.contains('@')
    {
        return Err(AppError::bad_request("recipient_email must be a valid email address"));
    }
    let recipient_name = non_empty(payload.recipient_name.as_deref()).unwrap_or_default();
    if recipient_name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::bad_request(format!(
            "recipient_name must be at most {MAX_NAME_LEN} characters"
        )));
    }

    let now = state.clock.now();
    let mut conn = state.db()?;
    let list: GuestList = guest_lists::table.find(list_id).first(&mut conn)?;

    let new_share = NewShare {
        id: Uuid::new_v4(),
        guest_list_id: list.id,
        token: tokens::generate_token(),
        recipient_email,
        recipient_name,
        expires_at: (now + Duration::days(SHARE_LIFETIME_DAYS)).naive_utc(),
        created_by: Some(user.user_id),
        created_at: now.naive_utc(),
    };
    let share: Share = diesel::insert_into(guest_list_shares::table)
        .values(&new_share)
        .get_result(&mut conn)?;
    drop(conn);

    info!(
        share_id = %share.id,
        guest_list_id = %list.id,
        recipient = %mask_email(&share.recipient_email),
        "created guest list share"
    );

    audit::record_best_effort(
        &state,
        AuditAction::ShareCreated,
        RESOURCE_SHARE,
        share.id,
        json!({ "guest_list_id": list.id, "created_by": user.user_id }),
    );

    enqueue_notification_best_effort(
        &state,
        Notification::ShareNotification(ShareNotification {
            recipient_email: share.recipient_email.clone(),
            recipient_name: share.recipient_name.clone(),
            guest_list_name: list.name.clone(),
            share_url: state.config.share_link(&share.token),
            expires_at: share
                .expires_at
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        }),
    );

    Ok((StatusCode::CREATED, Json(ShareResponse::new(&state, share))))
}

pub async fn revoke_share(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(share_id): Path<Uuid>,
) -> AppResult<Json<ShareResponse>> {
    let mut conn = state.db()?;
    let share: Share = diesel::update(guest_list_shares::table.find(share_id))
        .set(guest_list_shares::revoked.eq(true))
        .get_result(&mut conn)?;
    drop(conn);

    audit::record_best_effort(
        &state,
        AuditAction::ShareRevoked,
        RESOURCE_SHARE,
        share.id,
        json!({ "revoked_by": user.user_id }),
    );

    Ok(Json(ShareResponse::new(&state, share)))
}

#[derive(Deserialize)]
pub struct ToggleRsvpRequest {
    pub enabled: bool,
}

#[derive(Serialize)]
pub struct RsvpSettingsResponse {
    pub guest_list_id: Uuid,
    pub rsvp_enabled: bool,
    pub rsvp_url: Option<String>,
}

/// Turning RSVP on mints the list's generic token the first time; turning it
/// off keeps the token so old links work again once re-enabled.
pub async fn toggle_rsvp(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(list_id): Path<Uuid>,
    Json(payload): Json<ToggleRsvpRequest>,
) -> AppResult<Json<RsvpSettingsResponse>> {
    let now = state.clock.now().naive_utc();
    let mut conn = state.db()?;

    let list = conn.transaction::<GuestList, AppError, _>(|conn| {
        let list: GuestList = guest_lists::table.find(list_id).for_update().first(conn)?;
        let token = match (&list.rsvp_token, payload.enabled) {
            (None, true) => Some(tokens::generate_token()),
            (existing, _) => existing.clone(),
        };
        Ok(diesel::update(guest_lists::table.find(list.id))
            .set((
                guest_lists::rsvp_enabled.eq(payload.enabled),
                guest_lists::rsvp_token.eq(token),
                guest_lists::updated_at.eq(now),
            ))
            .get_result(conn)?)
    })?;
    drop(conn);

    let action = if list.rsvp_enabled {
        AuditAction::RsvpEnabled
    } else {
        AuditAction::RsvpDisabled
    };
    audit::record_best_effort(
        &state,
        action,
        RESOURCE_GUEST_LIST,
        list.id,
        json!({ "changed_by": user.user_id }),
    );

    Ok(Json(RsvpSettingsResponse {
        guest_list_id: list.id,
        rsvp_enabled: list.rsvp_enabled,
        rsvp_url: list
            .rsvp_token
            .as_deref()
            .filter(|_| list.rsvp_enabled)
            .map(|token| state.config.rsvp_link(token)),
    }))
}

#[derive(Serialize)]
pub struct InviteResponse {
    pub item_id: Uuid,
    pub invite_status: Option<String>,
    pub rsvp_url: String,
}

pub async fn invite_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((list_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<InviteResponse>> {
    let now = state.clock.now().naive_utc();
    let mut conn = state.db()?;

    let list: GuestList = guest_lists::table.find(list_id).first(&mut conn)?;
    let item: GuestListItem = guest_list_items::table
        .filter(guest_list_items::id.eq(item_id))
        .filter(guest_list_items::guest_list_id.eq(list.id))
        .first(&mut conn)?;
    let recipient_email = item
        .contact_email
        .clone()
        .ok_or_else(|| AppError::bad_request("this guest has no email address"))?;

    let token = rsvp::ensure_item_token(&mut conn, &item)?;
    let item: GuestListItem = diesel::update(guest_list_items::table.find(item.id))
        .set((
            guest_list_items::invite_status.eq(Some(INVITE_STATUS_INVITED)),
            guest_list_items::invited_by.eq(Some(user.username.as_str())),
            guest_list_items::updated_at.eq(now),
        ))
        .get_result(&mut conn)?;
    drop(conn);

    audit::record_best_effort(
        &state,
        AuditAction::RsvpInvited,
        RESOURCE_ITEM,
        item.id,
        json!({ "guest_list_id": list.id, "invited_by": user.user_id }),
    );

    enqueue_notification_best_effort(
        &state,
        Notification::RsvpInvite(RsvpInvite {
            recipient_email,
            recipient_name: item.contact_name.clone(),
            guest_list_name: list.name.clone(),
            event_summary: rsvp::event_summary(&list),
            rsvp_url: state.config.rsvp_link(&token),
            tracking_pixel_url: state.config.tracking_pixel_url(&token),
        }),
    );

    Ok(Json(InviteResponse {
        item_id: item.id,
        invite_status: item.invite_status,
        rsvp_url: state.config.rsvp_link(&token),
    }))
}
