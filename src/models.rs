use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = organisations)]
pub struct Organisation {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = organisations)]
pub struct NewOrganisation {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = contacts)]
pub struct Contact {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub email_blind_index: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub organisation_id: Option<Uuid>,
    pub dietary_requirements: Option<String>,
    pub accessibility_requirements: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = contacts)]
pub struct NewContact {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub email_blind_index: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub organisation_id: Option<Uuid>,
    pub dietary_requirements: Option<String>,
    pub accessibility_requirements: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = guest_lists)]
pub struct GuestList {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub rsvp_enabled: bool,
    pub rsvp_token: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub event_time: Option<NaiveTime>,
    pub event_location: Option<String>,
    pub bcc_contact_ids: Vec<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = guest_lists)]
pub struct NewGuestList {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub event_date: Option<NaiveDate>,
    pub event_time: Option<NaiveTime>,
    pub event_location: Option<String>,
    pub bcc_contact_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = guest_list_items)]
#[diesel(belongs_to(GuestList))]
#[diesel(belongs_to(Contact))]
pub struct GuestListItem {
    pub id: Uuid,
    pub guest_list_id: Uuid,
    pub contact_id: Uuid,
    pub rsvp_token: Option<String>,
    pub contact_name: String,
    pub contact_email: Option<String>,
    pub contact_title: Option<String>,
    pub contact_organisation: Option<String>,
    pub invite_status: Option<String>,
    pub invite_round: Option<String>,
    pub rsvp_status: Option<String>,
    pub plus_one: bool,
    pub plus_one_name: Option<String>,
    pub plus_one_email: Option<String>,
    pub plus_one_dietary: Option<String>,
    pub comments: Option<String>,
    pub reviewer_notes: Option<String>,
    pub invited_by: Option<String>,
    pub responded_at: Option<NaiveDateTime>,
    pub invite_opened: bool,
    pub invite_opened_at: Option<NaiveDateTime>,
    pub invite_clicked: bool,
    pub invite_clicked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = guest_list_items)]
pub struct NewGuestListItem {
    pub id: Uuid,
    pub guest_list_id: Uuid,
    pub contact_id: Uuid,
    pub rsvp_token: Option<String>,
    pub contact_name: String,
    pub contact_email: Option<String>,
    pub contact_title: Option<String>,
    pub contact_organisation: Option<String>,
    pub invite_status: Option<String>,
    pub invite_round: Option<String>,
    pub invited_by: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = guest_list_shares)]
#[diesel(belongs_to(GuestList))]
pub struct Share {
    pub id: Uuid,
    pub guest_list_id: Uuid,
    pub token: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub expires_at: NaiveDateTime,
    pub revoked: bool,
    pub verified_at: Option<NaiveDateTime>,
    pub last_accessed_at: Option<NaiveDateTime>,
    pub access_count: i32,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = guest_list_shares)]
pub struct NewShare {
    pub id: Uuid,
    pub guest_list_id: Uuid,
    pub token: String,
    pub recipient_email: String,
    pub recipient_name: String,
    pub expires_at: NaiveDateTime,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = share_otp_codes)]
#[diesel(belongs_to(Share))]
pub struct OtpCode {
    pub id: Uuid,
    pub share_id: Uuid,
    pub code_hash: String,
    pub email: String,
    pub expires_at: NaiveDateTime,
    pub used: bool,
    pub attempts: i32,
    pub ip_address: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = share_otp_codes)]
pub struct NewOtpCode {
    pub id: Uuid,
    pub share_id: Uuid,
    pub code_hash: String,
    pub email: String,
    pub expires_at: NaiveDateTime,
    pub ip_address: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = audit_logs)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub metadata: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
