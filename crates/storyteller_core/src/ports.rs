//! crates/storyteller_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use crate::domain::{
    GenerationRequest, NewUser, Page, PlatformStats, Story, StoryContent, StoryFilter, User,
    UserActivity, UserCredentials,
};
use crate::feedback::{Feedback, NewFeedback};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    /// Fails with `Conflict` when the email is already registered.
    async fn create_user(&self, new_user: NewUser) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User>;

    async fn list_users(&self, search: Option<&str>, page: u32, limit: u32) -> PortResult<Page<User>>;

    async fn set_user_active(&self, user_id: Uuid, is_active: bool) -> PortResult<User>;

    async fn record_user_activity(&self, user_id: Uuid, activity: UserActivity) -> PortResult<()>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Returns the owning user of an unexpired auth session.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Story Management ---
    /// Stores a story whose graph has already been validated.
    async fn create_story(&self, content: StoryContent, created_by: Option<Uuid>) -> PortResult<Story>;

    async fn get_story(&self, story_id: Uuid) -> PortResult<Story>;

    async fn list_stories(&self, filter: &StoryFilter) -> PortResult<Page<Story>>;

    async fn set_story_published(&self, story_id: Uuid, is_published: bool) -> PortResult<Story>;

    // --- Story Statistics ---
    // Both are keyed by a caller-chosen id (the reading session id) so that a
    // retried call counts once. Returns whether this call did the counting.
    async fn record_story_view(&self, story_id: Uuid, view_key: Uuid) -> PortResult<bool>;

    async fn record_story_completion(&self, story_id: Uuid, completion_key: Uuid) -> PortResult<bool>;

    // --- Feedback ---
    /// Stores the feedback and folds its rating into the story's stats.
    /// Fails with `Conflict` when the user already rated this story.
    async fn create_feedback(
        &self,
        story_id: Uuid,
        user_id: Uuid,
        feedback: NewFeedback,
    ) -> PortResult<Feedback>;

    // --- Analytics ---
    async fn platform_stats(&self) -> PortResult<PlatformStats>;
}

#[async_trait]
pub trait StoryGenerationService: Send + Sync {
    /// Produces a candidate story. The result still has to pass validation.
    async fn generate_story(&self, request: &GenerationRequest) -> PortResult<StoryContent>;
}
