use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, AuditAction, RESOURCE_ITEM, RESOURCE_SHARE};
use crate::crypto::mask_email;
use crate::error::{AppError, AppResult};
use crate::guard;
use crate::models::{GuestList, GuestListItem, Share};
use crate::notifier::spawn_otp_delivery;
use crate::otp::{self, IssueOutcome, VerifyOutcome, OTP_TTL_MINUTES};
use crate::rsvp::{EventDetails, INVITE_ROUND_MAYBE, MAX_TEXT_LEN};
use crate::schema::{guest_list_items, guest_list_shares, guest_lists};
use crate::state::AppState;
use crate::utils::json::Patch;

const INVITE_ROUNDS: &[&str] = &["first", "second", INVITE_ROUND_MAYBE];

type BearerHeader = TypedHeader<Authorization<Bearer>>;

#[derive(Serialize)]
pub struct ShareInfoResponse {
    pub guest_list: EventDetails,
    pub recipient_name: String,
    pub recipient_email_masked: String,
    pub verified: bool,
    pub expires_at: NaiveDateTime,
}

pub async fn share_info(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<ShareInfoResponse>> {
    let mut conn = state.db()?;
    let share = guard::check_share(&mut conn, &token, state.clock.now())?;
    let list: GuestList = guest_lists::table.find(share.guest_list_id).first(&mut conn)?;

    Ok(Json(ShareInfoResponse {
        guest_list: EventDetails::from(&list),
        recipient_name: share.recipient_name,
        recipient_email_masked: mask_email(&share.recipient_email),
        verified: share.verified_at.is_some(),
        expires_at: share.expires_at,
    }))
}

#[derive(Serialize)]
pub struct SendOtpResponse {
    pub sent: bool,
    pub expires_in: i64,
}

fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

pub async fn send_otp(
    State(state): State<AppState>,
    Path(token): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> AppResult<(StatusCode, Json<SendOtpResponse>)> {
    let now = state.clock.now();
    let ip = client_ip(&headers, peer.as_ref());
    let mut conn = state.db()?;
    let share = guard::check_share(&mut conn, &token, now)?;

    let issued = match otp::issue(&mut conn, &share, ip.as_deref(), now)? {
        IssueOutcome::Issued(issued) => issued,
        IssueOutcome::RateLimited => {
            info!(share_id = %share.id, "verification code rate limit reached");
            return Err(AppError::too_many_requests(
                "too many verification codes requested, try again later",
            ));
        }
    };
    drop(conn);

    spawn_otp_delivery(
        state.notifier.clone(),
        share.recipient_email.clone(),
        share.recipient_name.clone(),
        issued.code,
    );

    audit::record_best_effort(
        &state,
        AuditAction::ShareOtpSent,
        RESOURCE_SHARE,
        share.id,
        json!({ "otp_id": issued.record.id, "ip_address": ip }),
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SendOtpResponse {
            sent: true,
            expires_in: OTP_TTL_MINUTES * 60,
        }),
    ))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub code: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub session_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<VerifyRequest>,
) -> AppResult<Json<VerifyResponse>> {
    let now = state.clock.now();
    let mut conn = state.db()?;
    let share = guard::check_share(&mut conn, &token, now)?;

    let code = payload.code.trim();
    if code.is_empty() {
        return Err(AppError::bad_request("code is required"));
    }

    let outcome = otp::verify(&mut conn, &share, code, now)?;
    let failure = match outcome {
        VerifyOutcome::Verified => None,
        VerifyOutcome::Invalid {
            attempts_remaining: Some(remaining),
        } => Some((
            AuditAction::ShareOtpFailed,
            AppError::invalid_code(remaining),
        )),
        VerifyOutcome::Invalid {
            attempts_remaining: None,
        } => Some((
            AuditAction::ShareOtpFailed,
            AppError::new(
                StatusCode::UNAUTHORIZED,
                "no active verification code, request a new one",
            ),
        )),
        VerifyOutcome::Expired => Some((
            AuditAction::ShareOtpFailed,
            AppError::new(StatusCode::UNAUTHORIZED, "verification code has expired"),
        )),
        VerifyOutcome::LockedOut => Some((AuditAction::ShareOtpLocked, AppError::locked_out())),
    };

    if let Some((action, error)) = failure {
        drop(conn);
        audit::record_best_effort(
            &state,
            action,
            RESOURCE_SHARE,
            share.id,
            json!({ "reason": error.message() }),
        );
        return Err(error);
    }

    otp::mark_share_verified(&mut conn, share.id, now)?;
    drop(conn);

    let session = state.sessions.mint(share.id, &share.token, now)?;

    audit::record_best_effort(
        &state,
        AuditAction::ShareOtpVerified,
        RESOURCE_SHARE,
        share.id,
        json!({ "session_expires_at": session.expires_at }),
    );

    Ok(Json(VerifyResponse {
        session_token: session.token,
        token_type: "Bearer".to_string(),
        expires_in: session.expires_in,
    }))
}

#[derive(Serialize)]
pub struct ReviewItem {
    pub id: Uuid,
    pub contact_name: String,
    pub contact_title: Option<String>,
    pub contact_organisation: Option<String>,
    pub invite_status: Option<String>,
    pub invite_round: Option<String>,
    pub rsvp_status: Option<String>,
    pub plus_one: bool,
    pub plus_one_name: Option<String>,
    pub reviewer_notes: Option<String>,
}

impl From<GuestListItem> for ReviewItem {
    fn from(item: GuestListItem) -> Self {
        Self {
            id: item.id,
            contact_name: item.contact_name,
            contact_title: item.contact_title,
            contact_organisation: item.contact_organisation,
            invite_status: item.invite_status,
            invite_round: item.invite_round,
            rsvp_status: item.rsvp_status,
            plus_one: item.plus_one,
            plus_one_name: item.plus_one_name,
            reviewer_notes: item.reviewer_notes,
        }
    }
}

#[derive(Serialize)]
pub struct ShareViewResponse {
    pub guest_list: EventDetails,
    pub items: Vec<ReviewItem>,
    pub access_count: i32,
}

/// Share must be live and the caller must hold a session minted for it.
fn authorize(
    conn: &mut PgConnection,
    state: &AppState,
    token: &str,
    bearer: Option<&BearerHeader>,
) -> AppResult<Share> {
    let now = state.clock.now();
    let share = guard::check_share(conn, token, now)?;
    guard::check_session(&state.sessions, bearer, &share.token, now)?;
    Ok(share)
}

pub async fn view_share(
    State(state): State<AppState>,
    Path(token): Path<String>,
    bearer: Option<BearerHeader>,
) -> AppResult<Json<ShareViewResponse>> {
    let mut conn = state.db()?;
    let share = authorize(&mut conn, &state, &token, bearer.as_ref())?;

    let access_count: i32 = diesel::update(guest_list_shares::table.find(share.id))
        .set((
            guest_list_shares::access_count.eq(guest_list_shares::access_count + 1),
            guest_list_shares::last_accessed_at.eq(Some(state.clock.now().naive_utc())),
        ))
        .returning(guest_list_shares::access_count)
        .get_result(&mut conn)?;

    let list: GuestList = guest_lists::table.find(share.guest_list_id).first(&mut conn)?;
    let items: Vec<GuestListItem> = guest_list_items::table
        .filter(guest_list_items::guest_list_id.eq(list.id))
        .order((
            guest_list_items::contact_name.asc(),
            guest_list_items::created_at.asc(),
        ))
        .load(&mut conn)?;
    drop(conn);

    audit::record_best_effort(
        &state,
        AuditAction::ShareViewed,
        RESOURCE_SHARE,
        share.id,
        json!({ "access_count": access_count, "items": items.len() }),
    );

    Ok(Json(ShareViewResponse {
        guest_list: EventDetails::from(&list),
        items: items.into_iter().map(ReviewItem::from).collect(),
        access_count,
    }))
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ReviewerItemUpdate {
    #[serde(default)]
    pub invite_round: Patch<String>,
    #[serde(default)]
    pub reviewer_notes: Patch<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = guest_list_items)]
struct ReviewerChangeset {
    invite_round: Option<Option<String>>,
    reviewer_notes: Option<Option<String>>,
    updated_at: NaiveDateTime,
}

impl ReviewerItemUpdate {
    fn into_changeset(self, now: NaiveDateTime) -> AppResult<Option<ReviewerChangeset>> {
        let invite_round = match self.invite_round {
            Patch::Value(round) => {
                let round = round.trim().to_ascii_lowercase();
                if !INVITE_ROUNDS.contains(&round.as_str()) {
                    return Err(AppError::bad_request(
                        "invite_round must be first, second, maybe or null",
                    ));
                }
                Patch::Value(round)
            }
            other => other,
        };

        let reviewer_notes = match self.reviewer_notes {
            Patch::Value(notes) => {
                let notes = notes.trim().to_string();
                if notes.chars().count() > MAX_TEXT_LEN {
                    return Err(AppError::bad_request(format!(
                        "reviewer_notes must be at most {MAX_TEXT_LEN} characters"
                    )));
                }
                if notes.is_empty() {
                    Patch::Null
                } else {
                    Patch::Value(notes)
                }
            }
            other => other,
        };

        if invite_round.is_omitted() && reviewer_notes.is_omitted() {
            return Ok(None);
        }

        Ok(Some(ReviewerChangeset {
            invite_round: invite_round.into_change(),
            reviewer_notes: reviewer_notes.into_change(),
            updated_at: now,
        }))
    }
}

pub async fn update_item(
    State(state): State<AppState>,
    Path((token, item_id)): Path<(String, Uuid)>,
    bearer: Option<BearerHeader>,
    Json(body): Json<Value>,
) -> AppResult<Json<ReviewItem>> {
    let mut conn = state.db()?;
    let share = authorize(&mut conn, &state, &token, bearer.as_ref())?;

    let update: ReviewerItemUpdate =
        serde_json::from_value(body).map_err(|err| AppError::bad_request(err.to_string()))?;

    let item: GuestListItem = guest_list_items::table
        .filter(guest_list_items::id.eq(item_id))
        .filter(guest_list_items::guest_list_id.eq(share.guest_list_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let Some(changes) = update.into_changeset(state.clock.now().naive_utc())? else {
        return Ok(Json(ReviewItem::from(item)));
    };

    let updated: GuestListItem = diesel::update(guest_list_items::table.find(item.id))
        .set(&changes)
        .get_result(&mut conn)?;
    drop(conn);

    audit::record_best_effort(
        &state,
        AuditAction::ShareItemUpdated,
        RESOURCE_ITEM,
        updated.id,
        json!({
            "share_id": share.id,
            "invite_round": changes.invite_round,
            "reviewer_notes_changed": changes.reviewer_notes.is_some(),
        }),
    );

    Ok(Json(ReviewItem::from(updated)))
}
