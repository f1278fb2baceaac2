//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use storyteller_core::{domain::Role, locale::Language};
use tracing::{error, warn};
use uuid::Uuid;

use crate::web::state::AppState;

/// The authenticated account, available to handlers as `Extension<CurrentUser>`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub preferred_language: Language,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Reads the auth session id out of the `session=` cookie.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

/// Middleware that validates the auth session cookie and loads the account.
///
/// If valid and the account is active, inserts a `CurrentUser` into request
/// extensions for handlers to use. Missing or expired sessions get 401;
/// deactivated accounts get 403.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Parse session ID from cookie
    let auth_session_id = session_cookie(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Validate auth session in database, get user_id
    let user_id = state
        .db
        .validate_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            warn!("Failed to validate auth session: {:?}", e);
            StatusCode::UNAUTHORIZED
        })?;

    // 3. Load the account; deactivation takes effect on the next request
    let user = state.db.get_user_by_id(user_id).await.map_err(|e| {
        error!("Failed to load user {} for a valid session: {:?}", user_id, e);
        StatusCode::UNAUTHORIZED
    })?;
    if !user.is_active {
        warn!("Rejected request from deactivated user {}", user_id);
        return Err(StatusCode::FORBIDDEN);
    }

    // 4. Insert the account into request extensions
    let preferred_language = user.preferred_language();
    req.extensions_mut().insert(CurrentUser {
        user_id: user.user_id,
        email: user.email,
        role: user.role,
        preferred_language,
    });

    // 5. Continue to the handler
    Ok(next.run(req).await)
}

/// Middleware for admin routes. Must run after `require_auth`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, StatusCode> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if !user.is_admin() {
        warn!("User {} attempted an admin operation", user.user_id);
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(next.run(req).await)
}
