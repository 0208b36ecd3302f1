use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{self, AuditAction, RESOURCE_ITEM};
use crate::error::{AppError, AppResult};
use crate::guard;
use crate::jobs::enqueue_notification_best_effort;
use crate::models::GuestList;
use crate::notifier::{Notification, PlusOneNotification, RsvpConfirmation, RsvpForward};
use crate::rsvp::{
    self,
    forward::{self as forwarding, ForwardRequest},
    RsvpOutcome, RsvpPrefill, RsvpRequest, RsvpResponse, RsvpSubmission,
};
use crate::schema::contacts;
use crate::state::AppState;

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> AppResult<T> {
    serde_json::from_value(body).map_err(|err| AppError::bad_request(err.to_string()))
}

pub async fn rsvp_form(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<RsvpPrefill>> {
    let mut conn = state.db()?;
    let target = guard::check_rsvp_target(&mut conn, &token)?;
    Ok(Json(rsvp::prefill(&mut conn, &target)?))
}

#[derive(Serialize)]
pub struct RsvpSubmitResponse {
    pub item_id: Uuid,
    pub rsvp_status: Option<String>,
    pub responded_at: Option<NaiveDateTime>,
    pub plus_one_added: bool,
}

pub async fn submit_rsvp(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<Json<RsvpSubmitResponse>> {
    let submission = parse_body::<RsvpRequest>(body)?.validate()?;
    let now = state.clock.now();

    let mut conn = state.db()?;
    let target = guard::check_rsvp_target(&mut conn, &token)?;
    let outcome = rsvp::submit(&mut conn, &state.blind_index, &target, &submission, now)?;
    drop(conn);

    audit::record_best_effort(
        &state,
        AuditAction::RsvpSubmitted,
        RESOURCE_ITEM,
        outcome.item.id,
        json!({
            "link": target.kind(),
            "response": submission.response.as_str(),
            "plus_one": submission.plus_one.is_some(),
        }),
    );

    notify_after_submit(&state, target.list(), &submission, &outcome);

    Ok(Json(RsvpSubmitResponse {
        item_id: outcome.item.id,
        rsvp_status: outcome.item.rsvp_status.clone(),
        responded_at: outcome.item.responded_at,
        plus_one_added: outcome.plus_one_added.is_some(),
    }))
}

fn notify_after_submit(
    state: &AppState,
    list: &GuestList,
    submission: &RsvpSubmission,
    outcome: &RsvpOutcome,
) {
    let summary = rsvp::event_summary(list);

    if submission.response == RsvpResponse::Accepted {
        match outcome.contact.email.clone() {
            Some(recipient_email) => {
                let bcc = bcc_addresses(state, list);
                enqueue_notification_best_effort(
                    state,
                    Notification::RsvpConfirmation(RsvpConfirmation {
                        recipient_email,
                        recipient_name: outcome.item.contact_name.clone(),
                        guest_list_name: list.name.clone(),
                        event_summary: summary.clone(),
                        bcc,
                        plus_one_name: outcome.item.plus_one_name.clone(),
                    }),
                );
            }
            None => debug!(item_id = %outcome.item.id, "no email on file, skipping confirmation"),
        }
    }

    if let Some(added) = &outcome.plus_one_added {
        audit::record_best_effort(
            state,
            AuditAction::RsvpPlusOneAdded,
            RESOURCE_ITEM,
            added.item_id,
            json!({ "invited_via": outcome.item.id, "contact_id": added.contact_id }),
        );

        match state.config.organiser_email.clone() {
            Some(organiser_email) => enqueue_notification_best_effort(
                state,
                Notification::PlusOne(PlusOneNotification {
                    organiser_email,
                    guest_list_name: list.name.clone(),
                    invitee_name: outcome.item.contact_name.clone(),
                    plus_one_name: added.name.clone(),
                    plus_one_email: added.email.clone(),
                }),
            ),
            None => debug!("ORGANISER_EMAIL not set, skipping plus-one notification"),
        }
    }
}

fn bcc_addresses(state: &AppState, list: &GuestList) -> Vec<String> {
    if list.bcc_contact_ids.is_empty() {
        return Vec::new();
    }

    let result = state.db().and_then(|mut conn| {
        contacts::table
            .filter(contacts::id.eq_any(list.bcc_contact_ids.clone()))
            .filter(contacts::email.is_not_null())
            .select(contacts::email)
            .load::<Option<String>>(&mut conn)
            .map_err(AppError::from)
    });

    match result {
        Ok(emails) => emails.into_iter().flatten().collect(),
        Err(err) => {
            warn!(guest_list_id = %list.id, error = %err, "failed to load bcc contacts");
            Vec::new()
        }
    }
}

#[derive(Serialize)]
pub struct ForwardResponse {
    pub item_id: Uuid,
}

pub async fn forward_rsvp(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<ForwardResponse>)> {
    let submission = parse_body::<ForwardRequest>(body)?.validate()?;

    let mut conn = state.db()?;
    let target = guard::check_rsvp_target(&mut conn, &token)?;
    let outcome = forwarding::forward(&mut conn, &state.blind_index, &target, &submission)?;
    drop(conn);

    audit::record_best_effort(
        &state,
        AuditAction::RsvpForwarded,
        RESOURCE_ITEM,
        outcome.item.id,
        json!({ "link": target.kind(), "invited_by": outcome.item.invited_by }),
    );

    let list = target.list();
    if let Some(recipient_email) = outcome.item.contact_email.clone() {
        enqueue_notification_best_effort(
            &state,
            Notification::RsvpForward(RsvpForward {
                recipient_email,
                recipient_name: outcome.item.contact_name.clone(),
                forwarder_email: outcome.forwarder_email.clone(),
                forwarder_name: outcome.forwarder_name.clone(),
                guest_list_name: list.name.clone(),
                event_summary: rsvp::event_summary(list),
                rsvp_url: state.config.rsvp_link(&outcome.rsvp_token),
                message: submission.message.clone(),
            }),
        );
    }

    Ok((
        StatusCode::CREATED,
        Json(ForwardResponse {
            item_id: outcome.item.id,
        }),
    ))
}
