//! RSVP submission state machine for personal and generic invitation links.
//!
//! Personal tokens update the invitee's existing item in place. Generic tokens
//! match the respondent to a contact by email blind index and either reuse
//! their item on the list or create one. Accepted responses that name a
//! plus-one with an email also add that person to the list as a soft "maybe".

pub mod forward;
pub mod tracking;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{normalize_email, BlindIndexer};
use crate::directory::{self, ContactDetails, ContactDraft, ContactSnapshot};
use crate::error::{AppError, AppResult};
use crate::models::{Contact, GuestList, GuestListItem, NewGuestListItem};
use crate::schema::{contacts, guest_list_items};
use crate::tokens::{self, ResolvedTarget};
use crate::utils::json::non_empty;

pub const RSVP_ACCEPTED: &str = "accepted";
pub const RSVP_DECLINED: &str = "declined";

pub const INVITE_STATUS_INVITED: &str = "invited";
pub const INVITE_ROUND_MAYBE: &str = "maybe";

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_TEXT_LEN: usize = 2000;

const GENERIC_LINK_INVITER: &str = "rsvp link";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RsvpResponse {
    Accepted,
    Declined,
}

impl RsvpResponse {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            RSVP_ACCEPTED => Some(RsvpResponse::Accepted),
            RSVP_DECLINED => Some(RsvpResponse::Declined),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RsvpResponse::Accepted => RSVP_ACCEPTED,
            RsvpResponse::Declined => RSVP_DECLINED,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RsvpRequest {
    pub response: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub dietary_requirements: Option<String>,
    pub accessibility_requirements: Option<String>,
    #[serde(default)]
    pub plus_one: bool,
    pub plus_one_name: Option<String>,
    pub plus_one_email: Option<String>,
    pub plus_one_dietary: Option<String>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlusOne {
    pub name: Option<String>,
    pub email: Option<String>,
    pub dietary: Option<String>,
}

/// A validated submission. Text fields are trimmed and `None` when blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsvpSubmission {
    pub response: RsvpResponse,
    pub details: ContactDetails,
    pub plus_one: Option<PlusOne>,
    pub comments: Option<String>,
}

pub(crate) fn check_len(field: &str, value: &Option<String>, max: usize) -> AppResult<()> {
    match value {
        Some(value) if value.chars().count() > max => Err(AppError::bad_request(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn check_email(field: &str, value: &Option<String>) -> AppResult<()> {
    check_len(field, value, MAX_EMAIL_LEN)?;
    match value {
        Some(value) if !looks_like_email(value) => Err(AppError::bad_request(format!(
            "{field} must be a valid email address"
        ))),
        _ => Ok(()),
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

impl RsvpRequest {
    pub fn validate(self) -> AppResult<RsvpSubmission> {
        let response = self
            .response
            .as_deref()
            .and_then(RsvpResponse::parse)
            .ok_or_else(|| AppError::bad_request("response must be accepted or declined"))?;

        let details = ContactDetails {
            first_name: non_empty(self.first_name.as_deref()),
            last_name: non_empty(self.last_name.as_deref()),
            email: non_empty(self.email.as_deref()),
            phone: non_empty(self.phone.as_deref()),
            dietary_requirements: non_empty(self.dietary_requirements.as_deref()),
            accessibility_requirements: non_empty(self.accessibility_requirements.as_deref()),
        };
        check_len("first_name", &details.first_name, MAX_NAME_LEN)?;
        check_len("last_name", &details.last_name, MAX_NAME_LEN)?;
        check_email("email", &details.email)?;
        check_len("phone", &details.phone, MAX_NAME_LEN)?;
        check_len(
            "dietary_requirements",
            &details.dietary_requirements,
            MAX_TEXT_LEN,
        )?;
        check_len(
            "accessibility_requirements",
            &details.accessibility_requirements,
            MAX_TEXT_LEN,
        )?;

        let comments = non_empty(self.comments.as_deref());
        check_len("comments", &comments, MAX_TEXT_LEN)?;

        // Declining guests bring nobody.
        let plus_one = if self.plus_one && response == RsvpResponse::Accepted {
            let plus_one = PlusOne {
                name: non_empty(self.plus_one_name.as_deref()),
                email: non_empty(self.plus_one_email.as_deref()),
                dietary: non_empty(self.plus_one_dietary.as_deref()),
            };
            check_len("plus_one_name", &plus_one.name, MAX_NAME_LEN)?;
            check_email("plus_one_email", &plus_one.email)?;
            check_len("plus_one_dietary", &plus_one.dietary, MAX_TEXT_LEN)?;
            Some(plus_one)
        } else {
            None
        };

        Ok(RsvpSubmission {
            response,
            details,
            plus_one,
            comments,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PlusOneAdded {
    pub item_id: Uuid,
    pub contact_id: Uuid,
    pub name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct RsvpOutcome {
    pub item: GuestListItem,
    pub contact: Contact,
    pub plus_one_added: Option<PlusOneAdded>,
}

#[derive(AsChangeset)]
#[diesel(table_name = guest_list_items, treat_none_as_null = true)]
struct ResponseChangeset {
    rsvp_status: Option<String>,
    plus_one: bool,
    plus_one_name: Option<String>,
    plus_one_email: Option<String>,
    plus_one_dietary: Option<String>,
    comments: Option<String>,
    responded_at: Option<NaiveDateTime>,
    contact_name: String,
    contact_email: Option<String>,
    contact_title: Option<String>,
    contact_organisation: Option<String>,
    updated_at: NaiveDateTime,
}

impl ResponseChangeset {
    fn new(submission: &RsvpSubmission, snapshot: ContactSnapshot, now: NaiveDateTime) -> Self {
        let plus_one = submission.plus_one.clone();
        Self {
            rsvp_status: Some(submission.response.as_str().to_string()),
            plus_one: plus_one.is_some(),
            plus_one_name: plus_one.as_ref().and_then(|p| p.name.clone()),
            plus_one_email: plus_one
                .as_ref()
                .and_then(|p| p.email.as_deref().map(normalize_email)),
            plus_one_dietary: plus_one.and_then(|p| p.dietary),
            comments: submission.comments.clone(),
            responded_at: Some(now),
            contact_name: snapshot.contact_name,
            contact_email: snapshot.contact_email,
            contact_title: snapshot.contact_title,
            contact_organisation: snapshot.contact_organisation,
            updated_at: now,
        }
    }
}

/// Records a response against the resolved link. Runs in one transaction.
pub fn submit(
    conn: &mut PgConnection,
    indexer: &BlindIndexer,
    target: &ResolvedTarget,
    submission: &RsvpSubmission,
    now: DateTime<Utc>,
) -> AppResult<RsvpOutcome> {
    conn.transaction::<_, AppError, _>(|conn| {
        let (item, contact) = match target {
            ResolvedTarget::Personal { item, .. } => {
                let contact: Contact = contacts::table.find(item.contact_id).first(conn)?;
                respond_in_place(conn, indexer, item, &contact, submission, now)?
            }
            ResolvedTarget::Generic { list } => {
                respond_via_generic_link(conn, indexer, list, submission, now)?
            }
        };

        let plus_one_added = match &submission.plus_one {
            Some(plus_one) => promote_plus_one(conn, indexer, &item, &contact, plus_one)?,
            None => None,
        };

        Ok(RsvpOutcome {
            item,
            contact,
            plus_one_added,
        })
    })
}

/// Latest submission wins: every response field is overwritten.
fn respond_in_place(
    conn: &mut PgConnection,
    indexer: &BlindIndexer,
    item: &GuestListItem,
    contact: &Contact,
    submission: &RsvpSubmission,
    now: DateTime<Utc>,
) -> AppResult<(GuestListItem, Contact)> {
    let now_naive = now.naive_utc();
    let contact =
        directory::apply_contact_update(conn, indexer, contact, &submission.details, now_naive)?;
    let snapshot = directory::snapshot(conn, &contact)?;

    let item = diesel::update(guest_list_items::table.find(item.id))
        .set(&ResponseChangeset::new(submission, snapshot, now_naive))
        .get_result(conn)?;
    Ok((item, contact))
}

fn respond_via_generic_link(
    conn: &mut PgConnection,
    indexer: &BlindIndexer,
    list: &GuestList,
    submission: &RsvpSubmission,
    now: DateTime<Utc>,
) -> AppResult<(GuestListItem, Contact)> {
    let details = &submission.details;
    let email = details
        .email
        .as_deref()
        .ok_or_else(|| AppError::bad_request("email is required"))?;
    if details.first_name.is_none() && details.last_name.is_none() {
        return Err(AppError::bad_request("first_name or last_name is required"));
    }

    let existing = directory::find_by_email_blind_index(conn, &indexer.email_index(email))?;

    let contact = match existing {
        Some(contact) => {
            if let Some(item) = find_item_for_contact(conn, list.id, contact.id)? {
                return respond_in_place(conn, indexer, &item, &contact, submission, now);
            }
            directory::apply_contact_update(conn, indexer, &contact, details, now.naive_utc())?
        }
        None => {
            let draft = ContactDraft {
                details: details.clone(),
                organisation_id: None,
            };
            let (contact, _) = directory::find_or_create_contact(conn, indexer, &draft)?;
            contact
        }
    };

    let snapshot = directory::snapshot(conn, &contact)?;
    let new_item = new_item(
        list.id,
        &contact,
        snapshot.clone(),
        None,
        None,
        Some(GENERIC_LINK_INVITER.to_string()),
    );
    let inserted = insert_item(conn, &new_item)?;
    if inserted == 0 {
        return Err(AppError::conflict(
            "a response for this person is already being recorded",
        ));
    }

    let item = diesel::update(guest_list_items::table.find(new_item.id))
        .set(&ResponseChangeset::new(submission, snapshot, now.naive_utc()))
        .get_result(conn)?;
    Ok((item, contact))
}

/// Adds the plus-one as a reviewable "maybe" unless they are already on the list.
fn promote_plus_one(
    conn: &mut PgConnection,
    indexer: &BlindIndexer,
    item: &GuestListItem,
    invitee: &Contact,
    plus_one: &PlusOne,
) -> AppResult<Option<PlusOneAdded>> {
    let Some(email) = plus_one.email.as_deref() else {
        return Ok(None);
    };
    if invitee.email.as_deref().map(normalize_email) == Some(normalize_email(email)) {
        return Ok(None);
    }

    let (first_name, last_name) = split_name(plus_one.name.as_deref());
    let draft = ContactDraft {
        details: ContactDetails {
            first_name,
            last_name,
            email: Some(email.to_string()),
            dietary_requirements: plus_one.dietary.clone(),
            ..Default::default()
        },
        organisation_id: None,
    };
    let (contact, _) = directory::find_or_create_contact(conn, indexer, &draft)?;

    if find_item_for_contact(conn, item.guest_list_id, contact.id)?.is_some() {
        return Ok(None);
    }

    let snapshot = directory::snapshot(conn, &contact)?;
    let new_item = new_item(
        item.guest_list_id,
        &contact,
        snapshot,
        None,
        None,
        Some(item.contact_name.clone()),
    );
    let new_item = NewGuestListItem {
        invite_round: Some(INVITE_ROUND_MAYBE.to_string()),
        ..new_item
    };
    if insert_item(conn, &new_item)? == 0 {
        return Ok(None);
    }

    Ok(Some(PlusOneAdded {
        item_id: new_item.id,
        contact_id: contact.id,
        name: plus_one.name.clone(),
        email: normalize_email(email),
    }))
}

pub(crate) fn new_item(
    guest_list_id: Uuid,
    contact: &Contact,
    snapshot: ContactSnapshot,
    rsvp_token: Option<String>,
    invite_status: Option<String>,
    invited_by: Option<String>,
) -> NewGuestListItem {
    NewGuestListItem {
        id: Uuid::new_v4(),
        guest_list_id,
        contact_id: contact.id,
        rsvp_token,
        contact_name: snapshot.contact_name,
        contact_email: snapshot.contact_email,
        contact_title: snapshot.contact_title,
        contact_organisation: snapshot.contact_organisation,
        invite_status,
        invite_round: None,
        invited_by,
    }
}

/// Inserts unless the (list, contact) pair already exists. Returns rows written.
pub(crate) fn insert_item(conn: &mut PgConnection, item: &NewGuestListItem) -> AppResult<usize> {
    Ok(diesel::insert_into(guest_list_items::table)
        .values(item)
        .on_conflict((guest_list_items::guest_list_id, guest_list_items::contact_id))
        .do_nothing()
        .execute(conn)?)
}

pub(crate) fn find_item_for_contact(
    conn: &mut PgConnection,
    guest_list_id: Uuid,
    contact_id: Uuid,
) -> AppResult<Option<GuestListItem>> {
    Ok(guest_list_items::table
        .filter(guest_list_items::guest_list_id.eq(guest_list_id))
        .filter(guest_list_items::contact_id.eq(contact_id))
        .first(conn)
        .optional()?)
}

fn split_name(name: Option<&str>) -> (Option<String>, Option<String>) {
    match name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => match name.split_once(char::is_whitespace) {
            Some((first, last)) => (Some(first.to_string()), non_empty(Some(last))),
            None => (Some(name.to_string()), None),
        },
        None => (None, None),
    }
}

/// "Summer reception, 2026-07-01 18:00, Town Hall"
pub fn event_summary(list: &GuestList) -> String {
    let mut parts = vec![list.name.clone()];
    match (list.event_date, list.event_time) {
        (Some(date), Some(time)) => parts.push(format!("{} {}", date, time.format("%H:%M"))),
        (Some(date), None) => parts.push(date.to_string()),
        _ => {}
    }
    if let Some(location) = list.event_location.as_deref().filter(|l| !l.trim().is_empty()) {
        parts.push(location.trim().to_string());
    }
    parts.join(", ")
}

#[derive(Debug, Serialize)]
pub struct EventDetails {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub event_date: Option<chrono::NaiveDate>,
    pub event_time: Option<chrono::NaiveTime>,
    pub event_location: Option<String>,
}

impl From<&GuestList> for EventDetails {
    fn from(list: &GuestList) -> Self {
        Self {
            id: list.id,
            name: list.name.clone(),
            description: list.description.clone(),
            event_date: list.event_date,
            event_time: list.event_time,
            event_location: list.event_location.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InviteePrefill {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub dietary_requirements: Option<String>,
    pub accessibility_requirements: Option<String>,
    pub rsvp_status: Option<String>,
    pub plus_one: bool,
    pub plus_one_name: Option<String>,
    pub plus_one_email: Option<String>,
    pub plus_one_dietary: Option<String>,
    pub comments: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RsvpPrefill {
    pub kind: &'static str,
    pub guest_list: EventDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitee: Option<InviteePrefill>,
}

pub fn prefill(conn: &mut PgConnection, target: &ResolvedTarget) -> AppResult<RsvpPrefill> {
    let invitee = match target {
        ResolvedTarget::Personal { item, .. } => {
            let contact: Contact = contacts::table.find(item.contact_id).first(conn)?;
            Some(InviteePrefill {
                first_name: contact.first_name,
                last_name: contact.last_name,
                email: contact.email,
                phone: contact.phone,
                dietary_requirements: contact.dietary_requirements,
                accessibility_requirements: contact.accessibility_requirements,
                rsvp_status: item.rsvp_status.clone(),
                plus_one: item.plus_one,
                plus_one_name: item.plus_one_name.clone(),
                plus_one_email: item.plus_one_email.clone(),
                plus_one_dietary: item.plus_one_dietary.clone(),
                comments: item.comments.clone(),
            })
        }
        ResolvedTarget::Generic { .. } => None,
    };

    Ok(RsvpPrefill {
        kind: target.kind(),
        guest_list: EventDetails::from(target.list()),
        invitee,
    })
}

/// Personal token for an item, minting one if the item has none yet.
pub fn ensure_item_token(conn: &mut PgConnection, item: &GuestListItem) -> AppResult<String> {
    if let Some(token) = &item.rsvp_token {
        return Ok(token.clone());
    }
    let token = tokens::generate_token();
    let updated = diesel::update(
        guest_list_items::table
            .filter(guest_list_items::id.eq(item.id))
            .filter(guest_list_items::rsvp_token.is_null()),
    )
    .set(guest_list_items::rsvp_token.eq(Some(token.as_str())))
    .execute(conn)?;

    if updated == 1 {
        return Ok(token);
    }
    // Someone else assigned one first.
    guest_list_items::table
        .find(item.id)
        .select(guest_list_items::rsvp_token)
        .first::<Option<String>>(conn)?
        .ok_or_else(|| AppError::internal("item token missing after assignment"))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;

    fn request(response: &str) -> RsvpRequest {
        RsvpRequest {
            response: Some(response.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn response_is_required() {
        let err = RsvpRequest::default().validate().unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(request("maybe").validate().is_err());
        assert_eq!(
            request(" Accepted ").validate().unwrap().response,
            RsvpResponse::Accepted
        );
    }

    #[test]
    fn blank_fields_become_none() {
        let submission = RsvpRequest {
            first_name: Some("  ".into()),
            email: Some(" ada@example.com ".into()),
            comments: Some("".into()),
            ..request("declined")
        }
        .validate()
        .unwrap();
        assert_eq!(submission.details.first_name, None);
        assert_eq!(submission.details.email.as_deref(), Some("ada@example.com"));
        assert_eq!(submission.comments, None);
    }

    #[test]
    fn enforces_length_and_email_limits() {
        let too_long_name = RsvpRequest {
            first_name: Some("a".repeat(MAX_NAME_LEN + 1)),
            ..request("accepted")
        };
        assert!(too_long_name.validate().is_err());

        let bad_email = RsvpRequest {
            email: Some("not-an-email".into()),
            ..request("accepted")
        };
        assert!(bad_email.validate().is_err());

        let long_comment = RsvpRequest {
            comments: Some("x".repeat(MAX_TEXT_LEN + 1)),
            ..request("accepted")
        };
        assert!(long_comment.validate().is_err());

        let exact = RsvpRequest {
            comments: Some("x".repeat(MAX_TEXT_LEN)),
            ..request("accepted")
        };
        assert!(exact.validate().is_ok());
    }

    #[test]
    fn plus_one_only_kept_when_accepting() {
        let accepted = RsvpRequest {
            plus_one: true,
            plus_one_email: Some("guest@example.com".into()),
            ..request("accepted")
        }
        .validate()
        .unwrap();
        assert_eq!(
            accepted.plus_one.and_then(|p| p.email).as_deref(),
            Some("guest@example.com")
        );

        let declined = RsvpRequest {
            plus_one: true,
            plus_one_email: Some("guest@example.com".into()),
            ..request("declined")
        }
        .validate()
        .unwrap();
        assert!(declined.plus_one.is_none());

        let unchecked = RsvpRequest {
            plus_one: false,
            plus_one_email: Some("guest@example.com".into()),
            ..request("accepted")
        }
        .validate()
        .unwrap();
        assert!(unchecked.plus_one.is_none());
    }

    #[test]
    fn splits_plus_one_names() {
        assert_eq!(
            split_name(Some("Charles Babbage")),
            (Some("Charles".into()), Some("Babbage".into()))
        );
        assert_eq!(split_name(Some("Cher")), (Some("Cher".into()), None));
        assert_eq!(split_name(Some("  ")), (None, None));
    }

    #[test]
    fn summarises_event() {
        let now = Utc::now().naive_utc();
        let list = GuestList {
            id: Uuid::new_v4(),
            name: "Summer reception".into(),
            description: None,
            status: "active".into(),
            rsvp_enabled: true,
            rsvp_token: None,
            event_date: NaiveDate::from_ymd_opt(2026, 7, 1),
            event_time: NaiveTime::from_hms_opt(18, 0, 0),
            event_location: Some("Town Hall".into()),
            bcc_contact_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(
            event_summary(&list),
            "Summer reception, 2026-07-01 18:00, Town Hall"
        );
    }
}
