use chrono::{DateTime, Duration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::{rngs::OsRng, Rng};
use uuid::Uuid;

use crate::crypto::{constant_time_eq, sha256_hex};
use crate::error::{AppError, AppResult};
use crate::models::{NewOtpCode, OtpCode, Share};
use crate::schema::{guest_list_shares, share_otp_codes};

pub const OTP_TTL_MINUTES: i64 = 10;
pub const OTP_SEND_WINDOW_MINUTES: i64 = 10;
pub const OTP_SENDS_PER_WINDOW: i64 = 3;
pub const OTP_MAX_ATTEMPTS: i32 = 5;

/// Six decimal digits, zero padded.
pub fn generate_code() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{value:06}")
}

pub fn hash_code(code: &str) -> String {
    sha256_hex(code)
}

pub fn code_matches(submitted: &str, stored_hash: &str) -> bool {
    constant_time_eq(&hash_code(submitted), stored_hash)
}

pub fn attempts_remaining(attempts_used: i32) -> i32 {
    (OTP_MAX_ATTEMPTS - attempts_used).max(0)
}

#[derive(Debug)]
pub struct IssuedCode {
    /// Plaintext for delivery only. Never stored or logged.
    pub code: String,
    pub record: OtpCode,
}

#[derive(Debug)]
pub enum IssueOutcome {
    Issued(IssuedCode),
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    Invalid { attempts_remaining: Option<i32> },
    LockedOut,
    Expired,
}

/// Issues a fresh code unless the share already had three sends in the trailing window.
///
/// The share row is locked for the duration so concurrent sends for the same
/// share are counted one after another.
pub fn issue(
    conn: &mut PgConnection,
    share: &Share,
    ip_address: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<IssueOutcome> {
    conn.transaction::<_, AppError, _>(|conn| {
        guest_list_shares::table
            .find(share.id)
            .select(guest_list_shares::id)
            .for_update()
            .first::<Uuid>(conn)?;

        let window_start = (now - Duration::minutes(OTP_SEND_WINDOW_MINUTES)).naive_utc();
        let recent: i64 = share_otp_codes::table
            .filter(share_otp_codes::share_id.eq(share.id))
            .filter(share_otp_codes::created_at.gt(window_start))
            .count()
            .get_result(conn)?;

        if recent >= OTP_SENDS_PER_WINDOW {
            return Ok(IssueOutcome::RateLimited);
        }

        let code = generate_code();
        let new_code = NewOtpCode {
            id: Uuid::new_v4(),
            share_id: share.id,
            code_hash: hash_code(&code),
            email: share.recipient_email.clone(),
            expires_at: (now + Duration::minutes(OTP_TTL_MINUTES)).naive_utc(),
            ip_address: ip_address.map(|ip| ip.chars().take(64).collect()),
            created_at: now.naive_utc(),
        };

        let record: OtpCode = diesel::insert_into(share_otp_codes::table)
            .values(&new_code)
            .get_result(conn)?;

        Ok(IssueOutcome::Issued(IssuedCode { code, record }))
    })
}

/// Checks `submitted` against the newest live code for the share.
///
/// The attempt counter is bumped with a conditional `attempts = attempts + 1`
/// so concurrent guesses cannot exceed the cap.
pub fn verify(
    conn: &mut PgConnection,
    share: &Share,
    submitted: &str,
    now: DateTime<Utc>,
) -> AppResult<VerifyOutcome> {
    let now_naive = now.naive_utc();

    let candidate: Option<OtpCode> = share_otp_codes::table
        .filter(share_otp_codes::share_id.eq(share.id))
        .filter(share_otp_codes::used.eq(false))
        .filter(share_otp_codes::expires_at.gt(now_naive))
        .order(share_otp_codes::created_at.desc())
        .first(conn)
        .optional()?;

    let Some(candidate) = candidate else {
        let latest: Option<OtpCode> = share_otp_codes::table
            .filter(share_otp_codes::share_id.eq(share.id))
            .order(share_otp_codes::created_at.desc())
            .first(conn)
            .optional()?;
        return Ok(match latest {
            Some(code) if !code.used && code.expires_at <= now_naive => VerifyOutcome::Expired,
            _ => VerifyOutcome::Invalid {
                attempts_remaining: None,
            },
        });
    };

    let bumped: Option<i32> = diesel::update(
        share_otp_codes::table
            .filter(share_otp_codes::id.eq(candidate.id))
            .filter(share_otp_codes::used.eq(false))
            .filter(share_otp_codes::attempts.lt(OTP_MAX_ATTEMPTS)),
    )
    .set(share_otp_codes::attempts.eq(share_otp_codes::attempts + 1))
    .returning(share_otp_codes::attempts)
    .get_result(conn)
    .optional()?;

    let Some(attempts_used) = bumped else {
        let current: OtpCode = share_otp_codes::table.find(candidate.id).first(conn)?;
        if current.attempts >= OTP_MAX_ATTEMPTS {
            consume(conn, candidate.id)?;
            return Ok(VerifyOutcome::LockedOut);
        }
        return Ok(VerifyOutcome::Invalid {
            attempts_remaining: None,
        });
    };

    if !code_matches(submitted, &candidate.code_hash) {
        return Ok(VerifyOutcome::Invalid {
            attempts_remaining: Some(attempts_remaining(attempts_used)),
        });
    }

    // Single use: only the request that flips `used` wins.
    if consume(conn, candidate.id)? == 0 {
        return Ok(VerifyOutcome::Invalid {
            attempts_remaining: None,
        });
    }

    Ok(VerifyOutcome::Verified)
}

fn consume(conn: &mut PgConnection, code_id: Uuid) -> AppResult<usize> {
    Ok(diesel::update(
        share_otp_codes::table
            .filter(share_otp_codes::id.eq(code_id))
            .filter(share_otp_codes::used.eq(false)),
    )
    .set(share_otp_codes::used.eq(true))
    .execute(conn)?)
}

/// Sets `verified_at` the first time a recipient proves control of the mailbox.
pub fn mark_share_verified(
    conn: &mut PgConnection,
    share_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<()> {
    diesel::update(
        guest_list_shares::table
            .filter(guest_list_shares::id.eq(share_id))
            .filter(guest_list_shares::verified_at.is_null()),
    )
    .set(guest_list_shares::verified_at.eq(Some(now.naive_utc())))
    .execute(conn)?;
    Ok(())
}

/// Deletes codes that expired before `older_than`. Returns rows removed.
pub fn purge_stale_codes(conn: &mut PgConnection, older_than: DateTime<Utc>) -> AppResult<usize> {
    Ok(diesel::delete(
        share_otp_codes::table.filter(share_otp_codes::expires_at.lt(older_than.naive_utc())),
    )
    .execute(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_matches_only_the_original_code() {
        let code = "042917";
        let hash = hash_code(code);
        assert_eq!(hash, sha256_hex(code));
        assert!(code_matches(code, &hash));

        for position in 0..code.len() {
            let mut mutated: Vec<u8> = code.bytes().collect();
            mutated[position] = match mutated[position] {
                b'9' => b'0',
                digit => digit + 1,
            };
            let mutated = String::from_utf8(mutated).unwrap();
            assert!(!code_matches(&mutated, &hash), "{mutated} should not match");
        }
    }

    #[test]
    fn remaining_attempts_count_down_to_zero() {
        assert_eq!(attempts_remaining(1), 4);
        assert_eq!(attempts_remaining(4), 1);
        assert_eq!(attempts_remaining(5), 0);
        assert_eq!(attempts_remaining(7), 0);
    }
}
