//! Contact and organisation lookups used when RSVPs and forwards need to
//! match or create people.

use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use tracing::warn;
use uuid::Uuid;

use crate::crypto::{normalize_email, BlindIndexer};
use crate::error::{AppError, AppResult};
use crate::models::{Contact, NewContact, Organisation};
use crate::schema::{contacts, organisations};

pub const CONTACT_STATUS_PENDING: &str = "pending";

/// Submitted person details. Every field is already trimmed and `None` when blank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDetails {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub dietary_requirements: Option<String>,
    pub accessibility_requirements: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContactDraft {
    pub details: ContactDetails,
    pub organisation_id: Option<Uuid>,
}

#[derive(AsChangeset, Debug, Default, PartialEq, Eq)]
#[diesel(table_name = contacts)]
pub struct ContactChangeset {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<Option<String>>,
    pub email_blind_index: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub dietary_requirements: Option<Option<String>>,
    pub accessibility_requirements: Option<Option<String>>,
    pub updated_at: Option<NaiveDateTime>,
}

impl ContactChangeset {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.dietary_requirements.is_none()
            && self.accessibility_requirements.is_none()
    }
}

/// Denormalized contact fields copied onto guest list items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactSnapshot {
    pub contact_name: String,
    pub contact_email: Option<String>,
    pub contact_title: Option<String>,
    pub contact_organisation: Option<String>,
}

/// Fields that differ from the stored contact. Blank submissions never clear data.
pub fn contact_changes(
    contact: &Contact,
    details: &ContactDetails,
    indexer: &BlindIndexer,
) -> ContactChangeset {
    fn differs(current: Option<&str>, submitted: &Option<String>) -> Option<Option<String>> {
        match submitted {
            Some(value) if current != Some(value.as_str()) => Some(Some(value.clone())),
            _ => None,
        }
    }

    let mut changes = ContactChangeset::default();

    if let Some(first) = &details.first_name {
        if *first != contact.first_name {
            changes.first_name = Some(first.clone());
        }
    }
    if let Some(last) = &details.last_name {
        if *last != contact.last_name {
            changes.last_name = Some(last.clone());
        }
    }
    if let Some(email) = &details.email {
        let normalized = normalize_email(email);
        let current = contact.email.as_deref().map(normalize_email);
        if current.as_deref() != Some(normalized.as_str()) {
            changes.email = Some(Some(normalized));
            changes.email_blind_index = Some(Some(indexer.email_index(email)));
        }
    }
    changes.phone = differs(contact.phone.as_deref(), &details.phone);
    changes.dietary_requirements = differs(
        contact.dietary_requirements.as_deref(),
        &details.dietary_requirements,
    );
    changes.accessibility_requirements = differs(
        contact.accessibility_requirements.as_deref(),
        &details.accessibility_requirements,
    );

    changes
}

pub fn find_by_email_blind_index(
    conn: &mut PgConnection,
    index: &str,
) -> AppResult<Option<Contact>> {
    Ok(contacts::table
        .filter(contacts::email_blind_index.eq(index))
        .first(conn)
        .optional()?)
}

/// Returns the contact for `draft.details.email`, creating a pending one if none exists.
///
/// The boolean is true when a new contact was created.
pub fn find_or_create_contact(
    conn: &mut PgConnection,
    indexer: &BlindIndexer,
    draft: &ContactDraft,
) -> AppResult<(Contact, bool)> {
    let email = draft
        .details
        .email
        .as_deref()
        .ok_or_else(|| AppError::bad_request("email is required"))?;
    let index = indexer.email_index(email);

    if let Some(existing) = find_by_email_blind_index(conn, &index)? {
        return Ok((existing, false));
    }

    let new_contact = NewContact {
        id: Uuid::new_v4(),
        first_name: draft.details.first_name.clone().unwrap_or_default(),
        last_name: draft.details.last_name.clone().unwrap_or_default(),
        email: Some(normalize_email(email)),
        email_blind_index: Some(index.clone()),
        phone: draft.details.phone.clone(),
        title: None,
        organisation_id: draft.organisation_id,
        dietary_requirements: draft.details.dietary_requirements.clone(),
        accessibility_requirements: draft.details.accessibility_requirements.clone(),
        status: CONTACT_STATUS_PENDING.to_string(),
    };

    // A concurrent request may insert the same person between lookup and insert.
    let inserted = diesel::insert_into(contacts::table)
        .values(&new_contact)
        .on_conflict(contacts::email_blind_index)
        .do_nothing()
        .execute(conn)?;

    let contact = find_by_email_blind_index(conn, &index)?
        .ok_or_else(|| AppError::internal("contact vanished after insert"))?;
    Ok((contact, inserted == 1))
}

/// Writes submitted details onto the contact, keeping anything not supplied.
pub fn apply_contact_update(
    conn: &mut PgConnection,
    indexer: &BlindIndexer,
    contact: &Contact,
    details: &ContactDetails,
    now: NaiveDateTime,
) -> AppResult<Contact> {
    let mut changes = contact_changes(contact, details, indexer);

    if let Some(Some(index)) = &changes.email_blind_index {
        if let Some(other) = find_by_email_blind_index(conn, index)? {
            if other.id != contact.id {
                warn!(
                    contact_id = %contact.id,
                    "submitted email belongs to another contact; keeping existing email"
                );
                changes.email = None;
                changes.email_blind_index = None;
            }
        }
    }

    if changes.is_empty() {
        return Ok(contact.clone());
    }

    changes.updated_at = Some(now);
    Ok(diesel::update(contacts::table.find(contact.id))
        .set(&changes)
        .get_result(conn)?)
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Best-effort case-insensitive exact match on organisation name.
pub fn match_organisation_by_name(
    conn: &mut PgConnection,
    name: &str,
) -> AppResult<Option<Organisation>> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(organisations::table
        .filter(organisations::name.ilike(escape_like(trimmed)))
        .order(organisations::created_at.asc())
        .first(conn)
        .optional()?)
}

pub fn snapshot(conn: &mut PgConnection, contact: &Contact) -> AppResult<ContactSnapshot> {
    let organisation = match contact.organisation_id {
        Some(id) => organisations::table
            .find(id)
            .select(organisations::name)
            .first::<String>(conn)
            .optional()?,
        None => None,
    };

    Ok(ContactSnapshot {
        contact_name: contact.full_name(),
        contact_email: contact.email.clone(),
        contact_title: contact.title.clone(),
        contact_organisation: organisation,
    })
}
