//! Preconditions shared by every public endpoint: token resolution,
//! revocation/expiry checks and session checks.

use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::error::{AppError, AppResult};
use crate::models::{GuestList, Share};
use crate::schema::guest_list_shares;
use crate::session::{SessionClaims, SessionIssuer};
use crate::tokens::{self, ResolvedTarget};

pub const LIST_STATUS_ARCHIVED: &str = "archived";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Active,
    Revoked,
    Expired,
}

pub fn share_state(share: &Share, now: DateTime<Utc>) -> LinkState {
    if share.revoked {
        LinkState::Revoked
    } else if share.expires_at <= now.naive_utc() {
        LinkState::Expired
    } else {
        LinkState::Active
    }
}

pub fn rsvp_open(list: &GuestList) -> bool {
    list.rsvp_enabled && list.status != LIST_STATUS_ARCHIVED
}

pub fn check_share(conn: &mut PgConnection, token: &str, now: DateTime<Utc>) -> AppResult<Share> {
    if !tokens::is_well_formed(token) {
        return Err(AppError::not_found());
    }

    let share: Share = guest_list_shares::table
        .filter(guest_list_shares::token.eq(token))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    match share_state(&share, now) {
        LinkState::Active => Ok(share),
        LinkState::Revoked => Err(AppError::gone("this link has been revoked")),
        LinkState::Expired => Err(AppError::gone("this link has expired")),
    }
}

pub fn check_session(
    issuer: &SessionIssuer,
    bearer: Option<&TypedHeader<Authorization<Bearer>>>,
    expected_share_token: &str,
    now: DateTime<Utc>,
) -> AppResult<SessionClaims> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or_else(AppError::unauthorized)?;
    issuer
        .validate(bearer.token(), expected_share_token, now)
        .map_err(|err| {
            tracing::debug!(error = %err, "share session rejected");
            AppError::unauthorized()
        })
}

pub fn check_rsvp_target(conn: &mut PgConnection, token: &str) -> AppResult<ResolvedTarget> {
    let target = tokens::resolve(conn, token)?;
    if !rsvp_open(target.list()) {
        return Err(AppError::gone("responses are closed for this event"));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;

    fn share(revoked: bool, expires_at: DateTime<Utc>) -> Share {
        Share {
            id: Uuid::new_v4(),
            guest_list_id: Uuid::new_v4(),
            token: tokens::generate_token(),
            recipient_email: "reviewer@example.com".into(),
            recipient_name: "Reviewer".into(),
            expires_at: expires_at.naive_utc(),
            revoked,
            verified_at: None,
            last_accessed_at: None,
            access_count: 0,
            created_by: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn revocation_wins_over_expiry() {
        let now = Utc::now();
        assert_eq!(
            share_state(&share(true, now - Duration::days(1)), now),
            LinkState::Revoked
        );
        assert_eq!(
            share_state(&share(false, now - Duration::seconds(1)), now),
            LinkState::Expired
        );
        assert_eq!(
            share_state(&share(false, now + Duration::days(30)), now),
            LinkState::Active
        );
    }

    #[test]
    fn missing_bearer_is_unauthorized() {
        let issuer = SessionIssuer::new("secret", "guestlist", 60);
        let err = check_session(&issuer, None, "token", Utc::now()).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn session_for_other_share_is_unauthorized() {
        let issuer = SessionIssuer::new("secret", "guestlist", 60);
        let now = Utc::now();
        let minted = issuer.mint(Uuid::new_v4(), "share-a", now).unwrap();
        let header = TypedHeader(Authorization::bearer(&minted.token).unwrap());

        assert!(check_session(&issuer, Some(&header), "share-a", now).is_ok());
        let err = check_session(&issuer, Some(&header), "share-b", now).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
