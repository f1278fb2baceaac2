//! services/api/src/web/reading.rs
//!
//! Handlers that walk a reader through a story. The session itself lives in
//! `AppState::reading_sessions`; these handlers translate its outcomes into
//! HTTP responses and keep the story's view and completion counters current.

use crate::web::{
    middleware::CurrentUser,
    protocol::{
        display_language, invalid_story, locale_failure, reject, ChooseRequest, ErrorBody,
        HandlerError, LanguageQuery, ReadingResponse,
    },
    rest::load_published_story,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Duration;
use std::sync::Arc;
use storyteller_core::{
    domain::UserActivity,
    session::{ReadingSession, SessionError, SessionEvent},
    validation::ValidatedStory,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

fn session_failure(err: SessionError) -> HandlerError {
    match err {
        SessionError::InvalidStory(errors) => invalid_story(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Story cannot be read",
            errors,
        ),
        SessionError::ChoiceIndexOutOfRange { .. } | SessionError::NoPreviousNode => {
            reject(StatusCode::BAD_REQUEST, err.to_string())
        }
        SessionError::SessionAlreadyCompleted => reject(StatusCode::CONFLICT, err.to_string()),
    }
}

fn session_not_found() -> HandlerError {
    reject(StatusCode::NOT_FOUND, "Reading session not found")
}

fn describe(
    session_id: Uuid,
    session: &ReadingSession,
    language: &str,
) -> Result<ReadingResponse, HandlerError> {
    let view = session
        .current_view(language)
        .map_err(|e| locale_failure(session.story_id(), e))?;
    Ok(ReadingResponse {
        session_id,
        story_id: session.story_id(),
        language: language.to_string(),
        state: session.state().clone(),
        view,
    })
}

/// Applies `step` to a copy of the session and keeps the copy only when the
/// new page renders, so a failed request never moves the reader.
fn step_then_render<T>(
    session: &mut ReadingSession,
    step: impl FnOnce(&mut ReadingSession) -> Result<T, HandlerError>,
    render: impl FnOnce(&ReadingSession) -> Result<ReadingResponse, HandlerError>,
) -> Result<(ReadingResponse, T), HandlerError> {
    let mut next = session.clone();
    let outcome = step(&mut next)?;
    let response = render(&next)?;
    *session = next;
    Ok((response, outcome))
}

/// Counts a finished read once per reading session. Failures are logged and
/// do not affect the reader.
async fn record_completion(state: &AppState, story_id: Uuid, session_id: Uuid) {
    match state.db.record_story_completion(story_id, session_id).await {
        Ok(true) => info!("Reading session {} finished story {}", session_id, story_id),
        Ok(false) => debug!("Completion of session {} already counted", session_id),
        Err(e) => warn!("Failed to record completion of story {}: {}", story_id, e),
    }
}

/// Open a story at its first page.
#[utoipa::path(
    post,
    path = "/stories/{id}/read",
    params(("id" = Uuid, Path, description = "Story id"), LanguageQuery),
    responses(
        (status = 201, description = "Reading session opened", body = ReadingResponse),
        (status = 404, description = "No such published story", body = ErrorBody),
        (status = 422, description = "The stored story graph is invalid", body = ErrorBody)
    ),
    tag = "reading"
)]
pub async fn start_reading_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(story_id): Path<Uuid>,
    Query(query): Query<LanguageQuery>,
) -> Result<impl IntoResponse, HandlerError> {
    let story = load_published_story(&state, story_id).await?;
    let validated = ValidatedStory::from_story(&story).map_err(|errors| {
        warn!("Published story {} failed validation: {}", story_id, errors);
        invalid_story(StatusCode::UNPROCESSABLE_ENTITY, "Story cannot be read", errors)
    })?;

    let session = ReadingSession::from_validated(Arc::new(validated));
    let language = display_language(query.lang.as_deref(), Some(&user));
    let finished_at_start = session.is_completed();

    let idle_limit = Duration::minutes(state.config.reading_idle_minutes);
    let session_id = state
        .reading_sessions
        .open(user.user_id, session.clone(), idle_limit)
        .await;
    let response = describe(session_id, &session, &language)?;

    if let Err(e) = state.db.record_story_view(story_id, session_id).await {
        warn!("Failed to record view of story {}: {}", story_id, e);
    }
    if let Err(e) = state
        .db
        .record_user_activity(user.user_id, UserActivity::ViewedStory)
        .await
    {
        warn!("Failed to count viewed story for {}: {}", user.user_id, e);
    }
    if finished_at_start {
        record_completion(&state, story_id, session_id).await;
    }

    info!(
        "User {} opened story {} in session {}",
        user.user_id, story_id, session_id
    );
    Ok((StatusCode::CREATED, Json(response)))
}

/// Re-render the current page, optionally in another language.
#[utoipa::path(
    get,
    path = "/reading/{session_id}",
    params(("session_id" = Uuid, Path, description = "Reading session id"), LanguageQuery),
    responses(
        (status = 200, description = "The current page", body = ReadingResponse),
        (status = 404, description = "No such reading session", body = ErrorBody)
    ),
    tag = "reading"
)]
pub async fn get_reading_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<LanguageQuery>,
) -> Result<Json<ReadingResponse>, HandlerError> {
    let language = display_language(query.lang.as_deref(), Some(&user));
    state
        .reading_sessions
        .with_session(session_id, user.user_id, |session| {
            describe(session_id, session, &language)
        })
        .await
        .ok_or_else(session_not_found)?
        .map(Json)
}

/// Take one of the current page's choices.
#[utoipa::path(
    post,
    path = "/reading/{session_id}/choose",
    params(("session_id" = Uuid, Path, description = "Reading session id"), LanguageQuery),
    request_body = ChooseRequest,
    responses(
        (status = 200, description = "The page the choice led to", body = ReadingResponse),
        (status = 400, description = "No choice at that index", body = ErrorBody),
        (status = 404, description = "No such reading session", body = ErrorBody),
        (status = 409, description = "The story has already ended", body = ErrorBody)
    ),
    tag = "reading"
)]
pub async fn choose_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<LanguageQuery>,
    Json(req): Json<ChooseRequest>,
) -> Result<Json<ReadingResponse>, HandlerError> {
    let language = display_language(query.lang.as_deref(), Some(&user));
    let (response, events) = state
        .reading_sessions
        .with_session(session_id, user.user_id, |session| {
            step_then_render(
                session,
                |next| next.choose(req.choice_index).map_err(session_failure),
                |next| describe(session_id, next, &language),
            )
        })
        .await
        .ok_or_else(session_not_found)??;

    for event in events {
        if let SessionEvent::EndingReached { story_id, .. } = event {
            record_completion(&state, story_id, session_id).await;
        }
    }
    Ok(Json(response))
}

/// Return to the previous page.
#[utoipa::path(
    post,
    path = "/reading/{session_id}/back",
    params(("session_id" = Uuid, Path, description = "Reading session id"), LanguageQuery),
    responses(
        (status = 200, description = "The previous page", body = ReadingResponse),
        (status = 400, description = "Already at the first page", body = ErrorBody),
        (status = 404, description = "No such reading session", body = ErrorBody),
        (status = 409, description = "The story has already ended", body = ErrorBody)
    ),
    tag = "reading"
)]
pub async fn go_back_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<LanguageQuery>,
) -> Result<Json<ReadingResponse>, HandlerError> {
    let language = display_language(query.lang.as_deref(), Some(&user));
    state
        .reading_sessions
        .with_session(session_id, user.user_id, |session| {
            step_then_render(
                session,
                |next| next.go_back().map_err(session_failure),
                |next| describe(session_id, next, &language),
            )
        })
        .await
        .ok_or_else(session_not_found)?
        .map(|(response, ())| Json(response))
}

/// Close a reading session.
#[utoipa::path(
    delete,
    path = "/reading/{session_id}",
    params(("session_id" = Uuid, Path, description = "Reading session id")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "No such reading session", body = ErrorBody)
    ),
    tag = "reading"
)]
pub async fn end_reading_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    if state.reading_sessions.close(session_id, user.user_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyteller_core::domain::{Category, StoryContent, StoryNode};
    use storyteller_core::locale::LocalizedText;
    use storyteller_core::validation::validate;
    use storyteller_core::Choice;

    fn two_page_session() -> ReadingSession {
        let content = StoryContent::new(
            LocalizedText::new("Puddles"),
            LocalizedText::new("A rainy walk."),
            Category::Nature,
            "start",
            vec![
                StoryNode::page("start", "Jump or step around?")
                    .with_choice(Choice::new("Jump", "splash")),
                StoryNode::ending("splash", "Splash!"),
            ],
        );
        ReadingSession::start(&storyteller_core::Story::new(content, None)).unwrap()
    }

    #[test]
    fn a_page_that_fails_to_render_leaves_the_reader_in_place() {
        let mut session = two_page_session();
        let before = session.state().clone();

        let result = step_then_render(
            &mut session,
            |next| next.choose(0).map_err(session_failure),
            |_| Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "render failed")),
        );

        assert_eq!(result.unwrap_err().0, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(session.state(), &before);
        assert!(!session.is_completed());
    }

    #[test]
    fn a_rendered_step_is_kept() {
        let mut session = two_page_session();
        let session_id = Uuid::new_v4();

        let (response, events) = step_then_render(
            &mut session,
            |next| next.choose(0).map_err(session_failure),
            |next| describe(session_id, next, "en"),
        )
        .unwrap();

        assert_eq!(response.view.node_id, "splash");
        assert!(session.is_completed());
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::EndingReached { .. })));
    }

    #[test]
    fn session_errors_map_to_client_statuses() {
        let out_of_range = SessionError::ChoiceIndexOutOfRange { index: 4, available: 2 };
        assert_eq!(session_failure(out_of_range).0, StatusCode::BAD_REQUEST);
        assert_eq!(session_failure(SessionError::NoPreviousNode).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            session_failure(SessionError::SessionAlreadyCompleted).0,
            StatusCode::CONFLICT
        );

        let broken = StoryContent::new(
            LocalizedText::new("Broken"),
            LocalizedText::new("Dead end."),
            Category::Nature,
            "start",
            vec![StoryNode::page("start", "Nowhere to go.")],
        );
        let errors = validate(&broken).unwrap_err();
        let (status, Json(body)) = session_failure(SessionError::InvalidStory(errors));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!body.details.is_empty());
    }
}
