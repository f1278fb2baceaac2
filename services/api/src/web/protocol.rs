//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads shared by several endpoint groups: the error body,
//! pagination, language selection, account summaries and the reading-session
//! messages.
//!
//! Every payload uses camelCase keys, matching the story documents.

use crate::web::middleware::CurrentUser;
use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storyteller_core::{
    domain::{Page, User},
    locale::{LocaleError, DEFAULT_LANGUAGE},
    ports::PortError,
    session::{NodeView, SessionState},
    validation::{ValidationError, ValidationErrors},
};
use tracing::{error, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Errors
//=========================================================================================

/// The body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    /// Every problem found in a rejected story, in detection order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<Object>)]
    pub details: Vec<ValidationError>,
}

/// The error half of every handler's return type.
pub type HandlerError = (StatusCode, Json<ErrorBody>);

pub fn reject(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
            details: Vec::new(),
        }),
    )
}

/// A story graph that failed validation, with the full list of problems.
pub fn invalid_story(status: StatusCode, message: &str, errors: ValidationErrors) -> HandlerError {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
            details: errors.into_vec(),
        }),
    )
}

/// Maps a port failure to a response and logs it. `context` describes the
/// failed step and becomes the message of a 500.
pub fn port_failure(context: &str, err: PortError) -> HandlerError {
    match err {
        PortError::NotFound(what) => {
            warn!("{}: {}", context, what);
            reject(StatusCode::NOT_FOUND, what)
        }
        PortError::Conflict(what) => {
            warn!("{}: {}", context, what);
            reject(StatusCode::CONFLICT, what)
        }
        PortError::Unauthorized => reject(StatusCode::UNAUTHORIZED, "Not authenticated"),
        PortError::Unexpected(cause) => {
            error!("{}: {}", context, cause);
            reject(StatusCode::INTERNAL_SERVER_ERROR, context)
        }
    }
}

/// A stored story that cannot be displayed. Validation should have caught it.
pub fn locale_failure(story_id: Uuid, err: LocaleError) -> HandlerError {
    error!("Story {} cannot be displayed: {}", story_id, err);
    reject(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Story text is missing its default translation",
    )
}

//=========================================================================================
// Shared Query Parameters
//=========================================================================================

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct LanguageQuery {
    /// Language code to display text in; defaults to the reader's preference.
    pub lang: Option<String>,
}

/// The language to render in: an explicit code if one was given, else the
/// reader's preferred language, else English.
pub fn display_language(requested: Option<&str>, user: Option<&CurrentUser>) -> String {
    requested
        .map(|code| code.trim().to_lowercase())
        .filter(|code| !code.is_empty())
        .or_else(|| user.map(|u| u.preferred_language.code().to_string()))
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Normalizes 1-based paging input.
pub fn paging(page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
    (
        page.unwrap_or(1).max(1),
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
    )
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

impl<T> From<&Page<T>> for Pagination {
    fn from(page: &Page<T>) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total: page.total,
        }
    }
}

//=========================================================================================
// Accounts
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub parent_name: String,
    pub children_names: Vec<String>,
    pub role: String,
    pub is_active: bool,
    pub preferred_languages: Vec<String>,
    pub stories_viewed: u64,
    pub stories_generated: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            parent_name: user.parent_name,
            children_names: user.children_names,
            role: user.role.to_string(),
            is_active: user.is_active,
            preferred_languages: user
                .preferred_languages
                .iter()
                .map(|lang| lang.code().to_string())
                .collect(),
            stories_viewed: user.usage.stories_viewed,
            stories_generated: user.usage.stories_generated,
            last_accessed: user.usage.last_accessed,
            created_at: user.created_at,
        }
    }
}

//=========================================================================================
// Reading Sessions
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChooseRequest {
    /// Position of the chosen option in the current page's choice list.
    pub choice_index: i64,
}

/// Sent after every reading operation: where the reader is, and the page to
/// show.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingResponse {
    pub session_id: Uuid,
    pub story_id: Uuid,
    pub language: String,
    #[schema(value_type = Object)]
    pub state: SessionState,
    #[schema(value_type = Object)]
    pub view: NodeView,
}
