//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, InMemoryDatabase, OpenAiStoryAdapter, SampleStoryGenerator},
    config::Config,
    error::ApiError,
    web::{
        admin::{
            analytics_handler, list_admin_stories_handler, list_users_handler,
            toggle_story_published_handler, toggle_user_active_handler,
        },
        auth::{login_handler, logout_handler, profile_handler, signup_handler},
        reading::{
            choose_handler, end_reading_handler, get_reading_handler, go_back_handler,
            start_reading_handler,
        },
        rest::{
            create_story_handler, generate_story_handler, get_story_handler,
            list_stories_handler, submit_feedback_handler,
        },
        require_admin, require_auth, ApiDoc, AppState,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use storyteller_core::ports::{DatabaseService, StoryGenerationService};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to the Story Store ---
    let db: Arc<dyn DatabaseService> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; accounts and stories are kept in memory only");
            Arc::new(InMemoryDatabase::new())
        }
    };

    // --- 3. Initialize the Story Generator ---
    let story_generator: Arc<dyn StoryGenerationService> = match &config.openai_api_key {
        Some(api_key) => {
            let openai_client = Client::with_config(OpenAIConfig::new().with_api_key(api_key));
            info!("Generating stories with model {}", config.story_model);
            Arc::new(OpenAiStoryAdapter::new(
                openai_client,
                config.story_model.clone(),
            ))
        }
        None => {
            warn!("OPENAI_API_KEY is not set; generated stories use the built-in sample");
            Arc::new(SampleStoryGenerator::new())
        }
    };

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(db, story_generator, config.clone()));

    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS origin '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Admin routes (auth + admin role required)
    let admin_routes = Router::new()
        .route("/admin/users", get(list_users_handler))
        .route("/admin/users/{id}/deactivate", post(toggle_user_active_handler))
        .route("/admin/stories", get(list_admin_stories_handler))
        .route("/admin/stories/{id}/publish", post(toggle_story_published_handler))
        .route("/admin/analytics", get(analytics_handler))
        .layer(axum_middleware::from_fn(require_admin));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/profile", get(profile_handler))
        .route("/stories", get(list_stories_handler).post(create_story_handler))
        .route("/stories/generate", post(generate_story_handler))
        .route("/stories/{id}", get(get_story_handler))
        .route("/stories/{id}/read", post(start_reading_handler))
        .route("/stories/{id}/feedback", post(submit_feedback_handler))
        .route(
            "/reading/{session_id}",
            get(get_reading_handler).delete(end_reading_handler),
        )
        .route("/reading/{session_id}/choose", post(choose_handler))
        .route("/reading/{session_id}/back", post(go_back_handler))
        .merge(admin_routes)
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
