//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for parent signup, login, logout and the profile.

use crate::web::{
    middleware::{session_cookie, CurrentUser},
    protocol::{port_failure, reject, ErrorBody, HandlerError, UserResponse},
    state::AppState,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storyteller_core::{
    domain::{NewUser, User},
    ports::PortError,
};
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub parent_name: String,
    #[serde(default)]
    pub children_names: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
    pub parent_name: String,
    pub role: String,
}

impl From<User> for AuthResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            parent_name: user.parent_name,
            role: user.role.to_string(),
        }
    }
}

//=========================================================================================
// Input Checks
//=========================================================================================

pub const MIN_PASSWORD_CHARS: usize = 6;

/// Emails are compared case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Checks a signup form and returns the account fields, minus the password
/// hash which is filled in afterwards.
pub fn check_signup(req: &SignupRequest) -> Result<NewUser, String> {
    let email = normalize_email(&req.email);
    if !is_plausible_email(&email) {
        return Err("A valid email address is required".to_string());
    }
    if req.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_CHARS
        ));
    }
    let parent_name = req.parent_name.trim().to_string();
    if !(2..=50).contains(&parent_name.chars().count()) {
        return Err("Parent name must be between 2 and 50 characters".to_string());
    }
    let children_names = req
        .children_names
        .iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>();
    if children_names.iter().any(|name| name.chars().count() > 30) {
        return Err("Child names must be at most 30 characters".to_string());
    }

    Ok(NewUser {
        email,
        hashed_password: String::new(),
        parent_name,
        children_names,
    })
}

/// Creates an auth session and returns the `Set-Cookie` value for it.
async fn start_auth_session(state: &AppState, user_id: Uuid) -> Result<String, HandlerError> {
    let auth_session_id = Uuid::new_v4().to_string();
    let lifetime = Duration::days(state.config.auth_session_days);

    state
        .db
        .create_auth_session(&auth_session_id, user_id, Utc::now() + lifetime)
        .await
        .map_err(|e| port_failure("Failed to create session", e))?;

    Ok(format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session_id,
        lifetime.num_seconds()
    ))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new parent account
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    // 1. Check the form
    let mut new_user = check_signup(&req).map_err(|msg| reject(StatusCode::BAD_REQUEST, msg))?;

    // 2. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    new_user.hashed_password = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password")
        })?
        .to_string();

    // 3. Create user in database
    let user = state.db.create_user(new_user).await.map_err(|e| match e {
        PortError::Conflict(_) => reject(
            StatusCode::CONFLICT,
            "An account with this email already exists",
        ),
        other => port_failure("Failed to create user", other),
    })?;
    info!("Registered user {}", user.user_id);

    // 4. Log the new account in
    let cookie = start_auth_session(&state, user.user_id).await?;

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::from(user)),
    ))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Account is deactivated", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let invalid = || reject(StatusCode::UNAUTHORIZED, "Invalid email or password");

    // 1. Get user by email
    let user_creds = state
        .db
        .get_user_by_email(&normalize_email(&req.email))
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => invalid(),
            other => port_failure("Failed to get user", other),
        })?;

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&user_creds.hashed_password).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        reject(StatusCode::INTERNAL_SERVER_ERROR, "Authentication error")
    })?;

    let valid = Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_ok();

    if !valid {
        return Err(invalid());
    }
    if !user_creds.is_active {
        return Err(reject(StatusCode::FORBIDDEN, "Account is deactivated"));
    }

    // 3. Start an auth session
    let cookie = start_auth_session(&state, user_creds.user_id).await?;

    let user = state
        .db
        .get_user_by_id(user_creds.user_id)
        .await
        .map_err(|e| port_failure("Failed to load user", e))?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::from(user)),
    ))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    // 1. Parse session ID from cookie
    let auth_session_id = session_cookie(&headers)
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "No session found"))?;

    // 2. Delete auth session from database
    state
        .db
        .delete_auth_session(auth_session_id)
        .await
        .map_err(|e| port_failure("Failed to logout", e))?;

    // 3. Clear cookie
    let cookie = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie.to_string())]))
}

/// GET /auth/profile - The signed-in account
#[utoipa::path(
    get,
    path = "/auth/profile",
    responses(
        (status = 200, description = "The current account", body = UserResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "auth"
)]
pub async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<UserResponse>, HandlerError> {
    let user = state
        .db
        .get_user_by_id(user.user_id)
        .await
        .map_err(|e| port_failure("Failed to load profile", e))?;
    Ok(Json(UserResponse::from(user)))
}
