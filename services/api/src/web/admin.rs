//! services/api/src/web/admin.rs
//!
//! Moderation endpoints. Every route here sits behind `require_admin`.

use crate::web::{
    middleware::CurrentUser,
    protocol::{
        invalid_story, locale_failure, paging, port_failure, ErrorBody, HandlerError, Pagination,
        UserResponse,
    },
    rest::parse_category,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storyteller_core::{
    domain::{PlatformStats, Story, StoryFilter, StorySort},
    locale::DEFAULT_LANGUAGE,
    validation::ValidatedStory,
};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct UserListQuery {
    /// Matches against email and parent name, case-insensitively.
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AdminStoryQuery {
    pub category: Option<String>,
    pub published: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminStoryRow {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub age_range: String,
    pub is_published: bool,
    pub views: u64,
    pub completions: u64,
    pub rating: f64,
    pub total_ratings: u64,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdminStoryListResponse {
    pub stories: Vec<AdminStoryRow>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusResponse {
    pub user_id: Uuid,
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoryStatusResponse {
    pub story_id: Uuid,
    pub is_published: bool,
}

fn admin_row(story: &Story) -> Result<AdminStoryRow, HandlerError> {
    Ok(AdminStoryRow {
        id: story.id,
        title: story
            .content
            .title
            .resolve(DEFAULT_LANGUAGE)
            .map_err(|e| locale_failure(story.id, e))?
            .to_string(),
        category: story.content.category.to_string(),
        age_range: story.content.age_range.to_string(),
        is_published: story.is_published,
        views: story.stats.views,
        completions: story.stats.completions,
        rating: story.stats.display_rating(),
        total_ratings: story.stats.total_ratings,
        created_by: story.created_by,
        created_at: story.created_at,
    })
}

/// List accounts, newest first.
#[utoipa::path(
    get,
    path = "/admin/users",
    params(UserListQuery),
    responses(
        (status = 200, description = "One page of accounts", body = UserListResponse),
        (status = 403, description = "Not an administrator")
    ),
    tag = "admin"
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<UserListResponse>, HandlerError> {
    let (page, limit) = paging(query.page, query.limit);
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let listing = state
        .db
        .list_users(search, page, limit)
        .await
        .map_err(|e| port_failure("Failed to list users", e))?;

    Ok(Json(UserListResponse {
        pagination: Pagination::from(&listing),
        users: listing.items.into_iter().map(UserResponse::from).collect(),
    }))
}

/// Flip an account between active and deactivated.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/deactivate",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "The account's new status", body = UserStatusResponse),
        (status = 404, description = "No such user", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn toggle_user_active_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserStatusResponse>, HandlerError> {
    let user = state
        .db
        .get_user_by_id(user_id)
        .await
        .map_err(|e| port_failure("Failed to load user", e))?;

    let updated = state
        .db
        .set_user_active(user_id, !user.is_active)
        .await
        .map_err(|e| port_failure("Failed to update user", e))?;
    info!(
        "Admin {} set user {} active={}",
        admin.user_id, user_id, updated.is_active
    );

    Ok(Json(UserStatusResponse {
        user_id,
        is_active: updated.is_active,
    }))
}

/// List every story, published or not, newest first.
#[utoipa::path(
    get,
    path = "/admin/stories",
    params(AdminStoryQuery),
    responses(
        (status = 200, description = "One page of stories", body = AdminStoryListResponse),
        (status = 400, description = "Unknown category", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_admin_stories_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminStoryQuery>,
) -> Result<Json<AdminStoryListResponse>, HandlerError> {
    let (page, limit) = paging(query.page, query.limit);
    let filter = StoryFilter {
        category: query.category.as_deref().map(parse_category).transpose()?,
        age_range: None,
        published: query.published,
        sort: StorySort::Newest,
        page,
        limit,
    };

    let listing = state
        .db
        .list_stories(&filter)
        .await
        .map_err(|e| port_failure("Failed to list stories", e))?;

    let stories = listing
        .items
        .iter()
        .map(admin_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(AdminStoryListResponse {
        pagination: Pagination::from(&listing),
        stories,
    }))
}

/// Flip a story between published and hidden. A story is checked again
/// before it is published.
#[utoipa::path(
    post,
    path = "/admin/stories/{id}/publish",
    params(("id" = Uuid, Path, description = "Story id")),
    responses(
        (status = 200, description = "The story's new status", body = StoryStatusResponse),
        (status = 404, description = "No such story", body = ErrorBody),
        (status = 422, description = "The story graph is invalid", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn toggle_story_published_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<CurrentUser>,
    Path(story_id): Path<Uuid>,
) -> Result<Json<StoryStatusResponse>, HandlerError> {
    let story = state
        .db
        .get_story(story_id)
        .await
        .map_err(|e| port_failure("Failed to load story", e))?;

    let publish = !story.is_published;
    if publish {
        ValidatedStory::from_story(&story).map_err(|errors| {
            warn!("Refused to publish story {}: {}", story_id, errors);
            invalid_story(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Story graph is invalid",
                errors,
            )
        })?;
    }

    let updated = state
        .db
        .set_story_published(story_id, publish)
        .await
        .map_err(|e| port_failure("Failed to update story", e))?;
    info!(
        "Admin {} set story {} published={}",
        admin.user_id, story_id, updated.is_published
    );

    Ok(Json(StoryStatusResponse {
        story_id,
        is_published: updated.is_published,
    }))
}

/// Platform-wide counts for the dashboard.
#[utoipa::path(
    get,
    path = "/admin/analytics",
    responses(
        (status = 200, description = "Account, story and feedback totals plus per-category counts", body = Object),
        (status = 403, description = "Not an administrator")
    ),
    tag = "admin"
)]
pub async fn analytics_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PlatformStats>, HandlerError> {
    state
        .db
        .platform_stats()
        .await
        .map(Json)
        .map_err(|e| port_failure("Failed to compute analytics", e))
}
