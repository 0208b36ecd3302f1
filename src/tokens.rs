use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};

use crate::error::{AppError, AppResult};
use crate::models::{GuestList, GuestListItem};
use crate::schema::{guest_list_items, guest_lists};

pub const TOKEN_BYTES: usize = 32;

/// 32 random bytes, hex-encoded: 64 lowercase characters.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Tokens are always hex; anything else cannot resolve and skips the lookup.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    Personal { item: GuestListItem, list: GuestList },
    Generic { list: GuestList },
}

impl ResolvedTarget {
    pub fn list(&self) -> &GuestList {
        match self {
            ResolvedTarget::Personal { list, .. } | ResolvedTarget::Generic { list } => list,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResolvedTarget::Personal { .. } => "personal",
            ResolvedTarget::Generic { .. } => "generic",
        }
    }
}

/// Personal item tokens take precedence over generic list tokens.
pub fn resolve(conn: &mut PgConnection, token: &str) -> AppResult<ResolvedTarget> {
    if !is_well_formed(token) {
        return Err(AppError::not_found());
    }

    let item: Option<GuestListItem> = guest_list_items::table
        .filter(guest_list_items::rsvp_token.eq(token))
        .first(conn)
        .optional()?;

    if let Some(item) = item {
        let list: GuestList = guest_lists::table.find(item.guest_list_id).first(conn)?;
        return Ok(ResolvedTarget::Personal { item, list });
    }

    let list: Option<GuestList> = guest_lists::table
        .filter(guest_lists::rsvp_token.eq(token))
        .first(conn)
        .optional()?;

    list.map(|list| ResolvedTarget::Generic { list })
        .ok_or_else(AppError::not_found)
}

pub fn find_item_by_token(
    conn: &mut PgConnection,
    token: &str,
) -> AppResult<Option<GuestListItem>> {
    if !is_well_formed(token) {
        return Ok(None);
    }
    Ok(guest_list_items::table
        .filter(guest_list_items::rsvp_token.eq(token))
        .first(conn)
        .optional()?)
}
