use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;

use super::{
    check_email, check_len, find_item_for_contact, insert_item, new_item, INVITE_STATUS_INVITED,
    MAX_NAME_LEN, MAX_TEXT_LEN,
};
use crate::crypto::{normalize_email, BlindIndexer};
use crate::directory::{self, ContactDetails, ContactDraft};
use crate::error::{AppError, AppResult};
use crate::models::{Contact, GuestListItem};
use crate::schema::{contacts, guest_list_items};
use crate::tokens::{self, ResolvedTarget};
use crate::utils::json::non_empty;

const MAX_ORGANISATION_LEN: usize = 255;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForwardRequest {
    pub forwarder_email: Option<String>,
    pub forwarder_name: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_first_name: Option<String>,
    pub recipient_last_name: Option<String>,
    pub recipient_organisation: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSubmission {
    pub forwarder_email: Option<String>,
    pub forwarder_name: Option<String>,
    pub recipient: ContactDetails,
    pub recipient_organisation: Option<String>,
    pub message: Option<String>,
}

impl ForwardRequest {
    pub fn validate(self) -> AppResult<ForwardSubmission> {
        let recipient = ContactDetails {
            first_name: non_empty(self.recipient_first_name.as_deref()),
            last_name: non_empty(self.recipient_last_name.as_deref()),
            email: non_empty(self.recipient_email.as_deref()),
            ..Default::default()
        };
        if recipient.email.is_none() {
            return Err(AppError::bad_request("recipient_email is required"));
        }
        check_email("recipient_email", &recipient.email)?;
        check_len("recipient_first_name", &recipient.first_name, MAX_NAME_LEN)?;
        check_len("recipient_last_name", &recipient.last_name, MAX_NAME_LEN)?;

        let submission = ForwardSubmission {
            forwarder_email: non_empty(self.forwarder_email.as_deref()),
            forwarder_name: non_empty(self.forwarder_name.as_deref()),
            recipient,
            recipient_organisation: non_empty(self.recipient_organisation.as_deref()),
            message: non_empty(self.message.as_deref()),
        };
        check_email("forwarder_email", &submission.forwarder_email)?;
        check_len("forwarder_name", &submission.forwarder_name, MAX_NAME_LEN)?;
        check_len(
            "recipient_organisation",
            &submission.recipient_organisation,
            MAX_ORGANISATION_LEN,
        )?;
        check_len("message", &submission.message, MAX_TEXT_LEN)?;
        Ok(submission)
    }
}

#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    pub item: GuestListItem,
    pub rsvp_token: String,
    pub forwarder_email: String,
    pub forwarder_name: Option<String>,
}

/// The forwarder's identity: the invitee behind a personal token, or whoever
/// the request names for a generic one.
fn forwarder(
    conn: &mut PgConnection,
    target: &ResolvedTarget,
    submission: &ForwardSubmission,
) -> AppResult<(String, Option<String>)> {
    if let ResolvedTarget::Personal { item, .. } = target {
        let contact: Contact = contacts::table.find(item.contact_id).first(conn)?;
        if let Some(email) = contact.email.or_else(|| item.contact_email.clone()) {
            return Ok((email, Some(item.contact_name.clone())));
        }
    }

    let email = submission
        .forwarder_email
        .clone()
        .ok_or_else(|| AppError::bad_request("forwarder_email is required"))?;
    Ok((email, submission.forwarder_name.clone()))
}

/// Adds the recipient to the list with their own personal token.
pub fn forward(
    conn: &mut PgConnection,
    indexer: &BlindIndexer,
    target: &ResolvedTarget,
    submission: &ForwardSubmission,
) -> AppResult<ForwardOutcome> {
    let recipient_email = submission
        .recipient
        .email
        .as_deref()
        .ok_or_else(|| AppError::bad_request("recipient_email is required"))?;

    conn.transaction::<_, AppError, _>(|conn| {
        let (forwarder_email, forwarder_name) = forwarder(conn, target, submission)?;
        if normalize_email(&forwarder_email) == normalize_email(recipient_email) {
            return Err(AppError::bad_request(
                "recipient_email must differ from the forwarder's email",
            ));
        }

        let list_id = target.list().id;
        let index = indexer.email_index(recipient_email);
        if let Some(existing) = directory::find_by_email_blind_index(conn, &index)? {
            if find_item_for_contact(conn, list_id, existing.id)?.is_some() {
                return Err(AppError::conflict("this person is already on the guest list"));
            }
        }

        let organisation_id = match submission.recipient_organisation.as_deref() {
            Some(name) => directory::match_organisation_by_name(conn, name)?.map(|org| org.id),
            None => None,
        };
        let draft = ContactDraft {
            details: submission.recipient.clone(),
            organisation_id,
        };
        let (contact, _) = directory::find_or_create_contact(conn, indexer, &draft)?;
        let snapshot = directory::snapshot(conn, &contact)?;

        let token = tokens::generate_token();
        let invited_by = forwarder_name
            .clone()
            .unwrap_or_else(|| forwarder_email.clone());
        let item = new_item(
            list_id,
            &contact,
            snapshot,
            Some(token.clone()),
            Some(INVITE_STATUS_INVITED.to_string()),
            Some(invited_by),
        );
        if insert_item(conn, &item)? == 0 {
            return Err(AppError::conflict("this person is already on the guest list"));
        }

        let item: GuestListItem = guest_list_items::table.find(item.id).first(conn)?;
        Ok(ForwardOutcome {
            item,
            rsvp_token: token,
            forwarder_email,
            forwarder_name,
        })
    })
}
