//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the story catalogue (browsing, authoring,
//! generation and feedback) and the master definition for the OpenAPI
//! specification.

use crate::web::{
    admin, auth,
    middleware::CurrentUser,
    protocol::{
        display_language, invalid_story, locale_failure, paging, port_failure, reject,
        ChooseRequest, ErrorBody, HandlerError, LanguageQuery, Pagination, ReadingResponse,
        UserResponse,
    },
    reading,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storyteller_core::{
    domain::{
        AgeRange, Category, GenerationRequest, Story, StoryContent, StoryFilter, StorySort,
        UserActivity,
    },
    feedback::FeedbackDraft,
    locale::{Language, LocaleError},
    ports::PortError,
    validation::validate,
};
use tracing::{info, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::profile_handler,
        list_stories_handler,
        get_story_handler,
        create_story_handler,
        generate_story_handler,
        submit_feedback_handler,
        reading::start_reading_handler,
        reading::get_reading_handler,
        reading::choose_handler,
        reading::go_back_handler,
        reading::end_reading_handler,
        admin::list_users_handler,
        admin::toggle_user_active_handler,
        admin::list_admin_stories_handler,
        admin::toggle_story_published_handler,
        admin::analytics_handler,
    ),
    components(
        schemas(
            ErrorBody, Pagination, UserResponse, ChooseRequest, ReadingResponse,
            auth::SignupRequest, auth::LoginRequest, auth::AuthResponse,
            StorySummary, StoryListResponse, LocalizedChoice, LocalizedNode, LocalizedStory,
            CreatedStoryResponse, GenerateStoryRequest, FeedbackResponse,
            admin::UserListResponse, admin::AdminStoryRow, admin::AdminStoryListResponse,
            admin::UserStatusResponse, admin::StoryStatusResponse,
        )
    ),
    tags(
        (name = "auth", description = "Parent accounts and login sessions."),
        (name = "stories", description = "Browsing, authoring and rating interactive stories."),
        (name = "reading", description = "Walking through a story one choice at a time."),
        (name = "admin", description = "Moderation and platform analytics.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListStoriesQuery {
    pub category: Option<String>,
    pub age_range: Option<String>,
    pub lang: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// One catalogue entry, in the reader's language.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorySummary {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub thumbnail_url: Option<String>,
    pub category: String,
    pub age_range: String,
    pub difficulty: String,
    pub tags: Vec<String>,
    pub views: u64,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StoryListResponse {
    pub stories: Vec<StorySummary>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedChoice {
    pub text: String,
    pub next_node_id: String,
    pub emoji: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedNode {
    pub id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub choices: Vec<LocalizedChoice>,
    pub is_ending: bool,
}

/// A full story with every text field resolved to one language.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedStory {
    pub id: Uuid,
    pub language: String,
    pub title: String,
    pub summary: String,
    pub thumbnail_url: Option<String>,
    pub category: String,
    pub age_range: String,
    pub author: String,
    pub start_node_id: String,
    pub nodes: Vec<LocalizedNode>,
    pub views: u64,
    pub completions: u64,
    pub rating: f64,
    pub total_ratings: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedStoryResponse {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub age_range: String,
    pub node_count: usize,
    pub is_published: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateStoryRequest {
    pub prompt: String,
    pub category: String,
    pub age_range: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    pub id: Uuid,
    pub story_id: Uuid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Localization Helpers
//=========================================================================================

fn summarize(story: &Story, language: &str) -> Result<StorySummary, LocaleError> {
    let content = &story.content;
    Ok(StorySummary {
        id: story.id,
        title: content.title.resolve(language)?.to_string(),
        summary: content.summary.resolve(language)?.to_string(),
        thumbnail_url: content.thumbnail_url.clone(),
        category: content.category.to_string(),
        age_range: content.age_range.to_string(),
        difficulty: content.difficulty.to_string(),
        tags: content.tags.clone(),
        views: story.stats.views,
        rating: story.stats.display_rating(),
        created_at: story.created_at,
    })
}

pub fn localize_story(story: &Story, language: &str) -> Result<LocalizedStory, LocaleError> {
    let content = &story.content;
    let nodes = content
        .nodes
        .iter()
        .map(|node| {
            let choices = node
                .choices
                .iter()
                .map(|choice| {
                    Ok(LocalizedChoice {
                        text: choice.text.resolve(language)?.to_string(),
                        next_node_id: choice.next_node_id.clone(),
                        emoji: choice.emoji.clone(),
                    })
                })
                .collect::<Result<Vec<_>, LocaleError>>()?;
            Ok(LocalizedNode {
                id: node.id.clone(),
                text: node.text.resolve(language)?.to_string(),
                image_url: node.image_url.clone(),
                audio_url: node
                    .audio_url
                    .as_ref()
                    .and_then(|audio| audio.resolve_optional(language))
                    .map(str::to_string),
                choices,
                is_ending: node.is_ending,
            })
        })
        .collect::<Result<Vec<_>, LocaleError>>()?;

    Ok(LocalizedStory {
        id: story.id,
        language: language.to_string(),
        title: content.title.resolve(language)?.to_string(),
        summary: content.summary.resolve(language)?.to_string(),
        thumbnail_url: content.thumbnail_url.clone(),
        category: content.category.to_string(),
        age_range: content.age_range.to_string(),
        author: content.author.clone(),
        start_node_id: content.start_node_id.clone(),
        nodes,
        views: story.stats.views,
        completions: story.stats.completions,
        rating: story.stats.display_rating(),
        total_ratings: story.stats.total_ratings,
    })
}

fn created_response(story: &Story, language: &str) -> Result<CreatedStoryResponse, LocaleError> {
    Ok(CreatedStoryResponse {
        id: story.id,
        title: story.content.title.resolve(language)?.to_string(),
        summary: story.content.summary.resolve(language)?.to_string(),
        category: story.content.category.to_string(),
        age_range: story.content.age_range.to_string(),
        node_count: story.content.nodes.len(),
        is_published: story.is_published,
    })
}

/// Loads a story that readers may see. Unpublished stories are reported as
/// missing.
pub async fn load_published_story(state: &AppState, story_id: Uuid) -> Result<Story, HandlerError> {
    let story = state.db.get_story(story_id).await.map_err(|e| match e {
        PortError::NotFound(_) => reject(StatusCode::NOT_FOUND, "Story not found"),
        other => port_failure("Failed to load story", other),
    })?;
    if !story.is_published {
        return Err(reject(StatusCode::NOT_FOUND, "Story not found"));
    }
    Ok(story)
}

pub fn parse_category(value: &str) -> Result<Category, HandlerError> {
    value
        .trim()
        .to_lowercase()
        .parse::<Category>()
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))
}

pub fn parse_age_range(value: &str) -> Result<AgeRange, HandlerError> {
    value
        .trim()
        .parse::<AgeRange>()
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Browse the published catalogue, most viewed first.
#[utoipa::path(
    get,
    path = "/stories",
    params(ListStoriesQuery),
    responses(
        (status = 200, description = "One page of published stories", body = StoryListResponse),
        (status = 400, description = "Unknown category or age range", body = ErrorBody),
        (status = 401, description = "Not authenticated")
    ),
    tag = "stories"
)]
pub async fn list_stories_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ListStoriesQuery>,
) -> Result<Json<StoryListResponse>, HandlerError> {
    let (page, limit) = paging(query.page, query.limit);
    let filter = StoryFilter {
        category: query.category.as_deref().map(parse_category).transpose()?,
        age_range: query.age_range.as_deref().map(parse_age_range).transpose()?,
        published: Some(true),
        sort: StorySort::MostViewed,
        page,
        limit,
    };
    let language = display_language(query.lang.as_deref(), Some(&user));

    let listing = state
        .db
        .list_stories(&filter)
        .await
        .map_err(|e| port_failure("Failed to list stories", e))?;

    let stories = listing
        .items
        .iter()
        .map(|story| summarize(story, &language).map_err(|e| locale_failure(story.id, e)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(StoryListResponse {
        pagination: Pagination::from(&listing),
        stories,
    }))
}

/// Fetch one published story with its whole graph, in the reader's language.
#[utoipa::path(
    get,
    path = "/stories/{id}",
    params(("id" = Uuid, Path, description = "Story id"), LanguageQuery),
    responses(
        (status = 200, description = "The localized story", body = LocalizedStory),
        (status = 404, description = "No such published story", body = ErrorBody)
    ),
    tag = "stories"
)]
pub async fn get_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(story_id): Path<Uuid>,
    Query(query): Query<LanguageQuery>,
) -> Result<Json<LocalizedStory>, HandlerError> {
    let story = load_published_story(&state, story_id).await?;
    let language = display_language(query.lang.as_deref(), Some(&user));
    localize_story(&story, &language)
        .map(Json)
        .map_err(|e| locale_failure(story.id, e))
}

/// Submit a hand-authored story. The graph is validated before it is stored.
#[utoipa::path(
    post,
    path = "/stories",
    request_body(content = Object, description = "A story document (title, summary, category, startNodeId, nodes)"),
    responses(
        (status = 201, description = "Story stored and published", body = CreatedStoryResponse),
        (status = 422, description = "The story graph is invalid; `details` lists every problem", body = ErrorBody)
    ),
    tag = "stories"
)]
pub async fn create_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(content): Json<StoryContent>,
) -> Result<impl IntoResponse, HandlerError> {
    validate(&content).map_err(|errors| {
        warn!("Rejected story from user {}: {}", user.user_id, errors);
        invalid_story(StatusCode::UNPROCESSABLE_ENTITY, "Story graph is invalid", errors)
    })?;

    let story = state
        .db
        .create_story(content, Some(user.user_id))
        .await
        .map_err(|e| port_failure("Failed to save story", e))?;
    info!("User {} created story {}", user.user_id, story.id);

    let response = created_response(&story, user.preferred_language.code())
        .map_err(|e| locale_failure(story.id, e))?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Ask the story generator for a new story. Only a valid graph is stored.
#[utoipa::path(
    post,
    path = "/stories/generate",
    request_body = GenerateStoryRequest,
    responses(
        (status = 201, description = "Story generated and stored", body = CreatedStoryResponse),
        (status = 400, description = "Invalid prompt, category, age range or language", body = ErrorBody),
        (status = 502, description = "The generator failed or produced an invalid story", body = ErrorBody)
    ),
    tag = "stories"
)]
pub async fn generate_story_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<GenerateStoryRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let category = parse_category(&req.category)?;
    let age_range = req
        .age_range
        .as_deref()
        .map(parse_age_range)
        .transpose()?
        .unwrap_or_default();
    let language = req
        .language
        .as_deref()
        .map(|code| {
            code.parse::<Language>()
                .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))
        })
        .transpose()?
        .unwrap_or(user.preferred_language);

    let request = GenerationRequest::new(req.prompt, category, age_range, language)
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;

    let content = state
        .story_generator
        .generate_story(&request)
        .await
        .map_err(|e| {
            warn!("Story generation failed: {}", e);
            reject(StatusCode::BAD_GATEWAY, "Failed to generate story")
        })?;

    validate(&content).map_err(|errors| {
        warn!("Generator produced an invalid story: {}", errors);
        invalid_story(
            StatusCode::BAD_GATEWAY,
            "The generated story was not readable, please try again",
            errors,
        )
    })?;

    let story = state
        .db
        .create_story(content, Some(user.user_id))
        .await
        .map_err(|e| port_failure("Failed to save story", e))?;

    if let Err(e) = state
        .db
        .record_user_activity(user.user_id, UserActivity::GeneratedStory)
        .await
    {
        warn!("Failed to count generated story for {}: {}", user.user_id, e);
    }
    info!("Generated story {} for user {}", story.id, user.user_id);

    let response =
        created_response(&story, language.code()).map_err(|e| locale_failure(story.id, e))?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Rate a story. Each account may rate a story once.
#[utoipa::path(
    post,
    path = "/stories/{id}/feedback",
    params(("id" = Uuid, Path, description = "Story id")),
    request_body(content = Object, description = "rating (1-5), optional comment, childAge (5-8), tags and isPublic"),
    responses(
        (status = 201, description = "Feedback stored", body = FeedbackResponse),
        (status = 400, description = "Invalid feedback", body = ErrorBody),
        (status = 404, description = "No such published story", body = ErrorBody),
        (status = 409, description = "Feedback already provided", body = ErrorBody)
    ),
    tag = "stories"
)]
pub async fn submit_feedback_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(story_id): Path<Uuid>,
    Json(draft): Json<FeedbackDraft>,
) -> Result<impl IntoResponse, HandlerError> {
    let feedback = draft
        .validate()
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;

    load_published_story(&state, story_id).await?;

    let stored = state
        .db
        .create_feedback(story_id, user.user_id, feedback)
        .await
        .map_err(|e| port_failure("Failed to save feedback", e))?;

    Ok((
        StatusCode::CREATED,
        Json(FeedbackResponse {
            id: stored.id,
            story_id: stored.story_id,
            rating: stored.rating.value(),
            comment: stored.comment,
            created_at: stored.created_at,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyteller_core::domain::{Choice, StoryNode};
    use storyteller_core::locale::LocalizedText;

    fn bilingual_story() -> Story {
        let mut start = StoryNode::page("start", "Hello")
            .with_choice(Choice::new("Wave", "end").with_emoji("👋"));
        start.text.insert("es", "Hola");
        start.audio_url = Some(LocalizedText::new("audio/en/start.mp3").with_translation("es", "audio/es/start.mp3"));
        Story::new(
            StoryContent::new(
                LocalizedText::new("Greetings").with_translation("es", "Saludos"),
                LocalizedText::new("Say hello."),
                Category::Friendship,
                "start",
                vec![start, StoryNode::ending("end", "Goodbye")],
            ),
            None,
        )
    }

    #[test]
    fn localized_story_falls_back_per_field() {
        let story = bilingual_story();
        let localized = localize_story(&story, "es").unwrap();
        assert_eq!(localized.title, "Saludos");
        assert_eq!(localized.summary, "Say hello.");
        assert_eq!(localized.nodes[0].text, "Hola");
        assert_eq!(localized.nodes[0].audio_url.as_deref(), Some("audio/es/start.mp3"));
        assert_eq!(localized.nodes[0].choices[0].text, "Wave");
        assert_eq!(localized.nodes[1].text, "Goodbye");
    }

    #[test]
    fn missing_default_text_is_an_error_not_a_blank() {
        let mut story = bilingual_story();
        story.content.summary = LocalizedText::default();
        assert_eq!(
            summarize(&story, "fr").unwrap_err(),
            LocaleError::MissingDefaultLocale
        );
    }

    #[test]
    fn query_values_are_parsed_leniently() {
        assert_eq!(parse_category(" Nature ").unwrap(), Category::Nature);
        assert_eq!(parse_age_range("6-7").unwrap(), AgeRange::SixToSeven);
        assert_eq!(parse_category("pirates").unwrap_err().0, StatusCode::BAD_REQUEST);
    }
}
