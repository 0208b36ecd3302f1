use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::models::NewAuditLogEntry;
use crate::schema::audit_logs;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    ShareCreated,
    ShareRevoked,
    ShareViewed,
    ShareOtpSent,
    ShareOtpVerified,
    ShareOtpFailed,
    ShareOtpLocked,
    ShareItemUpdated,
    RsvpEnabled,
    RsvpDisabled,
    RsvpInvited,
    RsvpSubmitted,
    RsvpForwarded,
    RsvpPlusOneAdded,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::ShareCreated => "share.created",
            AuditAction::ShareRevoked => "share.revoked",
            AuditAction::ShareViewed => "share.viewed",
            AuditAction::ShareOtpSent => "share.otp_sent",
            AuditAction::ShareOtpVerified => "share.otp_verified",
            AuditAction::ShareOtpFailed => "share.otp_failed",
            AuditAction::ShareOtpLocked => "share.otp_locked",
            AuditAction::ShareItemUpdated => "share.item_updated",
            AuditAction::RsvpEnabled => "rsvp.enabled",
            AuditAction::RsvpDisabled => "rsvp.disabled",
            AuditAction::RsvpInvited => "rsvp.invited",
            AuditAction::RsvpSubmitted => "rsvp.submitted",
            AuditAction::RsvpForwarded => "rsvp.forwarded",
            AuditAction::RsvpPlusOneAdded => "rsvp.plus_one_added",
        }
    }
}

pub const RESOURCE_SHARE: &str = "guest_list_share";
pub const RESOURCE_GUEST_LIST: &str = "guest_list";
pub const RESOURCE_ITEM: &str = "guest_list_item";

pub fn record(
    conn: &mut PgConnection,
    action: AuditAction,
    resource_type: &str,
    resource_id: Uuid,
    metadata: Value,
) -> QueryResult<()> {
    let entry = NewAuditLogEntry {
        id: Uuid::new_v4(),
        action: action.as_str().to_string(),
        resource_type: resource_type.to_string(),
        resource_id,
        metadata,
    };
    diesel::insert_into(audit_logs::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

/// Audit writes never fail the request that triggered them.
pub fn record_best_effort(
    state: &AppState,
    action: AuditAction,
    resource_type: &str,
    resource_id: Uuid,
    metadata: Value,
) {
    let result = state
        .db()
        .map_err(|err| err.to_string())
        .and_then(|mut conn| {
            record(&mut conn, action, resource_type, resource_id, metadata)
                .map_err(|err| err.to_string())
        });

    if let Err(error) = result {
        warn!(
            action = action.as_str(),
            resource_type,
            %resource_id,
            %error,
            "failed to write audit log entry"
        );
    }
}
