//! End-to-end handler tests against the in-memory store and the sample
//! story generator.

use api_lib::{
    adapters::{sample_story::sample_story, InMemoryDatabase, SampleStoryGenerator},
    config::Config,
    web::{
        admin::{
            analytics_handler, list_admin_stories_handler, toggle_story_published_handler,
            toggle_user_active_handler, AdminStoryQuery,
        },
        auth::{login_handler, signup_handler, LoginRequest, SignupRequest},
        middleware::CurrentUser,
        protocol::{ChooseRequest, LanguageQuery},
        reading::{
            choose_handler, end_reading_handler, get_reading_handler, go_back_handler,
            start_reading_handler,
        },
        rest::{
            create_story_handler, generate_story_handler, get_story_handler,
            list_stories_handler, submit_feedback_handler, GenerateStoryRequest,
            ListStoriesQuery,
        },
        AppState,
    },
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use storyteller_core::{
    domain::{
        AgeRange, Category, Choice, GenerationRequest, NewUser, Story, StoryContent, StoryNode, User,
    },
    feedback::FeedbackDraft,
    locale::{Language, LocalizedText},
    ports::DatabaseService,
};
use uuid::Uuid;

struct Harness {
    db: Arc<InMemoryDatabase>,
    state: Arc<AppState>,
}

impl Harness {
    fn new() -> Self {
        let db = Arc::new(InMemoryDatabase::new());
        let state = Arc::new(AppState::new(
            db.clone(),
            Arc::new(SampleStoryGenerator::new()),
            Arc::new(Config::default()),
        ));
        Self { db, state }
    }

    async fn parent(&self, email: &str) -> CurrentUser {
        let user = self
            .db
            .create_user(NewUser {
                email: email.to_string(),
                hashed_password: String::new(),
                parent_name: "Test Parent".to_string(),
                children_names: vec![],
            })
            .await
            .unwrap();
        current(user)
    }

    async fn admin(&self, email: &str) -> CurrentUser {
        let parent = self.parent(email).await;
        current(self.db.grant_admin(parent.user_id).await.unwrap())
    }

    async fn forest_story(&self) -> Story {
        let request =
            GenerationRequest::new("A walk in the woods", Category::Adventure, AgeRange::FiveToEight, Language::En)
                .unwrap();
        let story = Story::new(sample_story(&request), None);
        self.db.insert_story(story.clone()).await;
        story
    }
}

fn current(user: User) -> CurrentUser {
    CurrentUser {
        preferred_language: user.preferred_language(),
        user_id: user.user_id,
        email: user.email,
        role: user.role,
    }
}

/// Turns any handler outcome into its status and decoded JSON body.
async fn send(result: impl IntoResponse) -> (StatusCode, Value) {
    let response = result.into_response();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn no_lang() -> Query<LanguageQuery> {
    Query(LanguageQuery::default())
}

async fn choose(h: &Harness, user: &CurrentUser, session_id: Uuid, index: i64) -> (StatusCode, Value) {
    send(
        choose_handler(
            State(h.state.clone()),
            Extension(user.clone()),
            Path(session_id),
            no_lang(),
            Json(ChooseRequest { choice_index: index }),
        )
        .await,
    )
    .await
}

#[tokio::test]
async fn a_reader_walks_the_forest_story_to_an_ending() {
    let h = Harness::new();
    let reader = h.parent("reader@example.com").await;
    let story = h.forest_story().await;

    let (status, opened) = send(
        start_reading_handler(
            State(h.state.clone()),
            Extension(reader.clone()),
            Path(story.id),
            no_lang(),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(opened["view"]["nodeId"], "start");
    assert_eq!(opened["state"]["status"], "active");
    let session_id: Uuid = serde_json::from_value(opened["sessionId"].clone()).unwrap();

    // A stale index changes nothing.
    let (status, body) = choose(&h, &reader, session_id, 5).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("2 choice"));

    let (_, dark) = choose(&h, &reader, session_id, 1).await;
    assert_eq!(dark["view"]["nodeId"], "dark_path");

    let (status, back) = send(
        go_back_handler(
            State(h.state.clone()),
            Extension(reader.clone()),
            Path(session_id),
            no_lang(),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(back["view"]["nodeId"], "start");
    assert_eq!(back["state"]["history"], json!(["start"]));

    choose(&h, &reader, session_id, 0).await;
    let (status, ended) = choose(&h, &reader, session_id, 0).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["state"]["status"], "completed");
    assert_eq!(ended["state"]["endingNodeId"], "animal_friends");
    assert_eq!(ended["view"]["isEnding"], true);
    assert_eq!(
        ended["state"]["history"],
        json!(["start", "sunny_path", "animal_friends"])
    );

    let (status, _) = choose(&h, &reader, session_id, 0).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let stats = h.db.get_story(story.id).await.unwrap().stats;
    assert_eq!(stats.views, 1);
    assert_eq!(stats.completions, 1);
    let usage = h.db.get_user_by_id(reader.user_id).await.unwrap().usage;
    assert_eq!(usage.stories_viewed, 1);

    let (status, _) = send(
        end_reading_handler(State(h.state.clone()), Extension(reader.clone()), Path(session_id)).await,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(h.state.reading_sessions.open_count().await, 0);
}

#[tokio::test]
async fn reading_sessions_are_private() {
    let h = Harness::new();
    let owner = h.parent("owner@example.com").await;
    let stranger = h.parent("stranger@example.com").await;
    let story = h.forest_story().await;

    let (_, opened) = send(
        start_reading_handler(State(h.state.clone()), Extension(owner), Path(story.id), no_lang())
            .await,
    )
    .await;
    let session_id: Uuid = serde_json::from_value(opened["sessionId"].clone()).unwrap();

    let (status, _) = send(
        get_reading_handler(
            State(h.state.clone()),
            Extension(stranger.clone()),
            Path(session_id),
            no_lang(),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = choose(&h, &stranger, session_id, 0).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn a_reader_can_switch_language_mid_story() {
    let h = Harness::new();
    let reader = h.parent("polyglot@example.com").await;
    let mut content = StoryContent::new(
        LocalizedText::new("Boats").with_translation("fr", "Bateaux"),
        LocalizedText::new("On the lake."),
        Category::Nature,
        "start",
        vec![
            StoryNode::page("start", "Row or sail?")
                .with_choice(Choice::new("Sail", "end")),
            StoryNode::ending("end", "The wind carries you home."),
        ],
    );
    content.nodes[0].text.insert("fr", "Ramer ou naviguer ?");
    let story = Story::new(content, None);
    h.db.insert_story(story.clone()).await;

    let (_, opened) = send(
        start_reading_handler(
            State(h.state.clone()),
            Extension(reader.clone()),
            Path(story.id),
            Query(LanguageQuery { lang: Some("fr".to_string()) }),
        )
        .await,
    )
    .await;
    assert_eq!(opened["language"], "fr");
    assert_eq!(opened["view"]["text"], "Ramer ou naviguer ?");
    assert_eq!(opened["view"]["choices"][0]["text"], "Sail");

    let session_id: Uuid = serde_json::from_value(opened["sessionId"].clone()).unwrap();
    let (_, english) = send(
        get_reading_handler(State(h.state.clone()), Extension(reader), Path(session_id), no_lang())
            .await,
    )
    .await;
    assert_eq!(english["language"], "en");
    assert_eq!(english["view"]["text"], "Row or sail?");
}

#[tokio::test]
async fn submitted_stories_are_validated_before_they_are_stored() {
    let h = Harness::new();
    let author = h.parent("author@example.com").await;

    let broken: StoryContent = serde_json::from_value(json!({
        "title": { "en": "Loops" },
        "summary": { "en": "Round and round." },
        "category": "fantasy",
        "startNodeId": "a",
        "nodes": [
            { "id": "a", "text": { "en": "A" }, "choices": [{ "text": { "en": "go" }, "nextNodeId": "b" }] },
            { "id": "b", "text": { "en": "B" }, "choices": [{ "text": { "en": "go" }, "nextNodeId": "a" }] }
        ]
    }))
    .unwrap();
    let (status, body) = send(
        create_story_handler(State(h.state.clone()), Extension(author.clone()), Json(broken)).await,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["kind"], "noReachableEnding");

    let request = GenerationRequest::new("Owls at night", Category::Nature, AgeRange::SixToSeven, Language::En)
        .unwrap();
    let (status, created) = send(
        create_story_handler(
            State(h.state.clone()),
            Extension(author.clone()),
            Json(sample_story(&request)),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["nodeCount"], 7);
    assert_eq!(created["ageRange"], "6-7");

    let (_, listing) = send(
        list_stories_handler(
            State(h.state.clone()),
            Extension(author),
            Query(ListStoriesQuery::default()),
        )
        .await,
    )
    .await;
    assert_eq!(listing["pagination"]["total"], 1);
    assert_eq!(listing["stories"][0]["title"], "The Magic Forest Adventure");
}

#[tokio::test]
async fn generated_stories_are_stored_and_counted() {
    let h = Harness::new();
    let parent = h.parent("gen@example.com").await;

    let (status, _) = send(
        generate_story_handler(
            State(h.state.clone()),
            Extension(parent.clone()),
            Json(GenerateStoryRequest {
                prompt: "short".to_string(),
                category: "adventure".to_string(),
                age_range: None,
                language: None,
            }),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, created) = send(
        generate_story_handler(
            State(h.state.clone()),
            Extension(parent.clone()),
            Json(GenerateStoryRequest {
                prompt: "A brave rabbit looks for the moon".to_string(),
                category: "fantasy".to_string(),
                age_range: Some("5-6".to_string()),
                language: Some("es".to_string()),
            }),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["category"], "fantasy");
    assert_eq!(created["ageRange"], "5-6");

    let story_id: Uuid = serde_json::from_value(created["id"].clone()).unwrap();
    let stored = h.db.get_story(story_id).await.unwrap();
    assert_eq!(stored.created_by, Some(parent.user_id));
    let usage = h.db.get_user_by_id(parent.user_id).await.unwrap().usage;
    assert_eq!(usage.stories_generated, 1);
}

#[tokio::test]
async fn each_parent_rates_a_story_once() {
    let h = Harness::new();
    let parent = h.parent("rater@example.com").await;
    let story = h.forest_story().await;
    let draft = || FeedbackDraft {
        rating: 4,
        comment: Some("Loved the fairy".to_string()),
        child_age: Some(6),
        tags: vec!["fun".to_string()],
        is_public: None,
    };

    let (status, body) = send(
        submit_feedback_handler(
            State(h.state.clone()),
            Extension(parent.clone()),
            Path(story.id),
            Json(FeedbackDraft { rating: 9, ..draft() }),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("between 1 and 5"));

    let (status, stored) = send(
        submit_feedback_handler(
            State(h.state.clone()),
            Extension(parent.clone()),
            Path(story.id),
            Json(draft()),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(stored["rating"], 4);

    let (status, _) = send(
        submit_feedback_handler(
            State(h.state.clone()),
            Extension(parent.clone()),
            Path(story.id),
            Json(draft()),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, detail) = send(
        get_story_handler(State(h.state.clone()), Extension(parent), Path(story.id), no_lang()).await,
    )
    .await;
    assert_eq!(detail["rating"], 4.0);
    assert_eq!(detail["totalRatings"], 1);
}

#[tokio::test]
async fn unpublished_stories_disappear_until_republished() {
    let h = Harness::new();
    let admin = h.admin("admin@example.com").await;
    let reader = h.parent("kid@example.com").await;
    let story = h.forest_story().await;

    let toggle = || {
        toggle_story_published_handler(State(h.state.clone()), Extension(admin.clone()), Path(story.id))
    };

    let (_, hidden) = send(toggle().await).await;
    assert_eq!(hidden["isPublished"], false);

    let (status, _) = send(
        get_story_handler(State(h.state.clone()), Extension(reader.clone()), Path(story.id), no_lang())
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        start_reading_handler(State(h.state.clone()), Extension(reader.clone()), Path(story.id), no_lang())
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, admin_listing) = send(
        list_admin_stories_handler(State(h.state.clone()), Query(AdminStoryQuery::default())).await,
    )
    .await;
    assert_eq!(admin_listing["stories"][0]["isPublished"], false);

    let (_, shown) = send(toggle().await).await;
    assert_eq!(shown["isPublished"], true);

    let (_, analytics) = send(analytics_handler(State(h.state.clone())).await).await;
    assert_eq!(analytics["totalUsers"], 2);
    assert_eq!(analytics["publishedStories"], 1);
}

#[tokio::test]
async fn signup_login_and_deactivation() {
    let h = Harness::new();
    let signup = || SignupRequest {
        email: "Parent@Example.com".to_string(),
        password: "storytime".to_string(),
        parent_name: "Pat".to_string(),
        children_names: vec!["Ada".to_string()],
    };

    let response = signup_handler(State(h.state.clone()), Json(signup()))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("session="));
    let session_id = cookie
        .trim_start_matches("session=")
        .split(';')
        .next()
        .unwrap();
    let user_id = h.db.validate_auth_session(session_id).await.unwrap();

    let (status, _) = send(signup_handler(State(h.state.clone()), Json(signup())).await).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let login = |password: &str| LoginRequest {
        email: "parent@example.com".to_string(),
        password: password.to_string(),
    };
    let (status, _) = send(login_handler(State(h.state.clone()), Json(login("wrong-one"))).await).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = send(login_handler(State(h.state.clone()), Json(login("storytime"))).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["parentName"], "Pat");

    let admin = h.admin("root@example.com").await;
    let (_, toggled) = send(
        toggle_user_active_handler(State(h.state.clone()), Extension(admin), Path(user_id)).await,
    )
    .await;
    assert_eq!(toggled["isActive"], false);

    let (status, _) = send(login_handler(State(h.state.clone()), Json(login("storytime"))).await).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
