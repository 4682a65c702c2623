//! Request identity.
//!
//! Authentication happens upstream: the identity proxy forwards the
//! signed-in user as `x-user-id` (absent for anonymous visitors) plus
//! optional `x-user-role`, `x-user-name` and `x-user-email`. Known users
//! are upserted so sales and access rows can reference them.
//!
//! The payment provider's fulfillment callback carries no user identity; it
//! proves itself with the shared secret in `x-webhook-secret`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use super::api::{ApiError, SharedState};
use super::cache::revalidate_user;
use super::models::UserRole;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Option<String>,
    pub role: UserRole,
}

impl CurrentUser {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            role: UserRole::User,
        }
    }

    pub fn admin(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            role: UserRole::Admin,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.id.is_some()
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let Some(id) = header(parts, USER_ID_HEADER) else {
            return Ok(Self::anonymous());
        };
        let role = match header(parts, USER_ROLE_HEADER) {
            Some(raw) => Some(
                raw.parse::<UserRole>()
                    .map_err(ApiError::BadRequest)?,
            ),
            None => None,
        };
        let name = header(parts, USER_NAME_HEADER).unwrap_or_default();
        let email = header(parts, USER_EMAIL_HEADER).unwrap_or_default();

        let (user, changed) = state
            .db
            .call(move |db| {
                let before = db.get_user(&id)?;
                let user = db.upsert_user(&id, &name, &email, role)?;
                let changed = before.is_none_or(|b| {
                    b.name != user.name || b.email != user.email || b.role != user.role
                });
                Ok((user, changed))
            })
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if changed {
            revalidate_user(&state.cache, &user.id);
        }
        debug!(user_id = %user.id, role = user.role.as_str(), "resolved request user");

        Ok(Self {
            id: Some(user.id),
            role: user.role,
        })
    }
}

// ── Provider callback ─────────────────────────────────────────────────

/// Whether `presented` matches the configured webhook secret. Always false
/// while no secret is configured.
pub fn webhook_authorized(expected: Option<&str>, presented: Option<&str>) -> bool {
    match (expected, presented) {
        (Some(expected), Some(presented)) => constant_time_eq(expected, presented),
        _ => false,
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
