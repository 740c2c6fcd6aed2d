//! Session resolution and membership guards.
//!
//! The identity provider is out of scope: sessions arrive as opaque
//! tokens (cookie or bearer) mapped to user ids by configuration. The
//! core contract enforced here is membership + role per workspace.

use std::collections::HashMap;

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use uuid::Uuid;

use am_domain::config::AuthConfig;
use am_domain::tenancy::Membership;
use am_domain::{Error, Result};
use am_storage::Database;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token -> user resolution for cookie-session and bearer auth.
pub struct Sessions {
    cookie_name: String,
    tokens: HashMap<String, Uuid>,
}

impl Sessions {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            cookie_name: config.session_cookie.clone(),
            tokens: config.tokens.clone(),
        }
    }

    /// Resolve the authenticated user from request headers.
    ///
    /// Checked in priority order: session cookie, then bearer token.
    pub fn resolve(&self, headers: &HeaderMap) -> Option<Uuid> {
        if let Some(token) = self.cookie_token(headers) {
            if let Some(user_id) = self.tokens.get(&token) {
                return Some(*user_id);
            }
        }
        if let Some(token) = bearer_token(headers) {
            if let Some(user_id) = self.tokens.get(token) {
                return Some(*user_id);
            }
        }
        None
    }

    /// Resolve or fail with a permission error.
    pub fn require_user(&self, headers: &HeaderMap) -> Result<Uuid> {
        self.resolve(headers)
            .ok_or_else(|| Error::Permission("authentication required".into()))
    }

    fn cookie_token(&self, headers: &HeaderMap) -> Option<String> {
        let raw = headers.get(COOKIE)?.to_str().ok()?;
        for pair in raw.split(';') {
            let (name, value) = pair.trim().split_once('=')?;
            if name == self.cookie_name && !value.is_empty() {
                return Some(value.to_owned());
            }
        }
        None
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Membership guards
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Active membership of `user_id` in `workspace_id`, or a permission
/// error.
pub fn require_membership(db: &Database, workspace_id: Uuid, user_id: Uuid) -> Result<Membership> {
    db.read(|t| t.membership(workspace_id, user_id).cloned())
        .ok_or_else(|| Error::Permission("workspace membership required".into()))
}

/// Reject VIEWER memberships for mutating operations.
pub fn require_operator(membership: &Membership) -> Result<()> {
    if membership.role.can_operate() {
        Ok(())
    } else {
        Err(Error::Permission("insufficient role for this operation".into()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use am_domain::tenancy::{Membership, Role};

    use super::*;

    fn sessions_with(token: &str, user_id: Uuid) -> Sessions {
        let mut config = AuthConfig::default();
        config.tokens.insert(token.into(), user_id);
        Sessions::from_config(&config)
    }

    #[test]
    fn resolves_cookie_token() {
        let user = Uuid::new_v4();
        let sessions = sessions_with("tok123", user);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; am_session=tok123"));
        assert_eq!(sessions.resolve(&headers), Some(user));
    }

    #[test]
    fn resolves_bearer_token() {
        let user = Uuid::new_v4();
        let sessions = sessions_with("tok123", user);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok123"));
        assert_eq!(sessions.resolve(&headers), Some(user));
    }

    #[test]
    fn unknown_token_is_rejected() {
        let sessions = sessions_with("tok123", Uuid::new_v4());
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("am_session=wrong"));
        assert!(sessions.resolve(&headers).is_none());
        assert!(sessions.require_user(&headers).is_err());
    }

    #[test]
    fn membership_guards() {
        let db = Database::new();
        let ws = Uuid::new_v4();
        let operator = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        db.transaction(|txn| {
            txn.insert_membership(Membership::new(ws, operator, Role::Operator));
            txn.insert_membership(Membership::new(ws, viewer, Role::Viewer));
            Ok(())
        })
        .unwrap();

        let m = require_membership(&db, ws, operator).unwrap();
        assert!(require_operator(&m).is_ok());

        let v = require_membership(&db, ws, viewer).unwrap();
        assert!(require_operator(&v).is_err());

        assert!(require_membership(&db, ws, Uuid::new_v4()).is_err());
    }
}
