//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Localized fields and the node list are stored as JSONB in the same shape the
//! API accepts, so a stored story can be re-validated exactly as it was authored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::fmt::Display;
use storyteller_core::domain::{
    CategoryStats, NewUser, Page, PlatformStats, Story, StoryContent, StoryFilter, StoryNode,
    StorySort, StoryStats, UsageStats, User, UserActivity, UserCredentials,
};
use storyteller_core::feedback::{Feedback, FeedbackTag, NewFeedback, Rating};
use storyteller_core::locale::{Language, LocalizedText};
use storyteller_core::ports::{DatabaseService, PortError, PortResult};
use uuid::Uuid;

const USER_COLUMNS: &str = "user_id, email, parent_name, children_names, role, is_active, \
     preferred_languages, stories_viewed, stories_generated, last_accessed, created_at";

const STORY_COLUMNS: &str = "id, title, summary, category, age_range, start_node_id, nodes, \
     thumbnail_url, author, difficulty, tags, is_published, views, completions, average_rating, \
     total_ratings, created_by, created_at";

const FEEDBACK_COLUMNS: &str =
    "id, story_id, user_id, rating, comment, child_age, tags, is_public, created_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn corrupt(e: impl Display) -> PortError {
    PortError::Unexpected(format!("Stored record is invalid: {}", e))
}

fn violates(e: &sqlx::Error, code: &str) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(code),
        _ => false,
    }
}

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Maps a failed write that references a story.
fn story_write_error(e: sqlx::Error, story_id: Uuid) -> PortError {
    if violates(&e, FOREIGN_KEY_VIOLATION) {
        PortError::NotFound(format!("Story {} not found", story_id))
    } else {
        unexpected(e)
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
    parent_name: String,
    children_names: Vec<String>,
    role: String,
    is_active: bool,
    preferred_languages: Vec<String>,
    stories_viewed: i64,
    stories_generated: i64,
    last_accessed: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        let preferred_languages = self
            .preferred_languages
            .iter()
            .map(|code| code.parse::<Language>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(corrupt)?;
        Ok(User {
            user_id: self.user_id,
            email: self.email,
            parent_name: self.parent_name,
            children_names: self.children_names,
            role: self.role.parse().map_err(corrupt)?,
            is_active: self.is_active,
            preferred_languages,
            usage: UsageStats {
                stories_viewed: self.stories_viewed.max(0) as u64,
                stories_generated: self.stories_generated.max(0) as u64,
                last_accessed: self.last_accessed,
            },
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
    is_active: bool,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            email: self.email,
            hashed_password: self.hashed_password,
            is_active: self.is_active,
        }
    }
}

#[derive(FromRow)]
struct StoryRecord {
    id: Uuid,
    title: Json<LocalizedText>,
    summary: Json<LocalizedText>,
    category: String,
    age_range: String,
    start_node_id: String,
    nodes: Json<Vec<StoryNode>>,
    thumbnail_url: Option<String>,
    author: String,
    difficulty: String,
    tags: Vec<String>,
    is_published: bool,
    views: i64,
    completions: i64,
    average_rating: f64,
    total_ratings: i64,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}
impl StoryRecord {
    fn to_domain(self) -> PortResult<Story> {
        Ok(Story {
            id: self.id,
            content: StoryContent {
                title: self.title.0,
                summary: self.summary.0,
                category: self.category.parse().map_err(corrupt)?,
                age_range: self.age_range.parse().map_err(corrupt)?,
                start_node_id: self.start_node_id,
                nodes: self.nodes.0,
                thumbnail_url: self.thumbnail_url,
                author: self.author,
                difficulty: self.difficulty.parse().map_err(corrupt)?,
                tags: self.tags,
            },
            stats: StoryStats {
                views: self.views.max(0) as u64,
                completions: self.completions.max(0) as u64,
                average_rating: self.average_rating,
                total_ratings: self.total_ratings.max(0) as u64,
            },
            is_published: self.is_published,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct FeedbackRecord {
    id: Uuid,
    story_id: Uuid,
    user_id: Uuid,
    rating: i16,
    comment: Option<String>,
    child_age: Option<i16>,
    tags: Vec<String>,
    is_public: bool,
    created_at: DateTime<Utc>,
}
impl FeedbackRecord {
    fn to_domain(self) -> PortResult<Feedback> {
        let tags = self
            .tags
            .iter()
            .map(|tag| tag.parse::<FeedbackTag>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(corrupt)?;
        let child_age = self
            .child_age
            .map(u8::try_from)
            .transpose()
            .map_err(corrupt)?;
        Ok(Feedback {
            id: self.id,
            story_id: self.story_id,
            user_id: self.user_id,
            rating: Rating::new(i64::from(self.rating)).map_err(corrupt)?,
            comment: self.comment,
            child_age,
            tags,
            is_public: self.is_public,
            created_at: self.created_at,
        })
    }
}

fn push_story_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &StoryFilter) {
    query.push(" WHERE TRUE");
    if let Some(category) = filter.category {
        query.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(age_range) = filter.age_range {
        query.push(" AND age_range = ").push_bind(age_range.as_str());
    }
    if let Some(published) = filter.published {
        query.push(" AND is_published = ").push_bind(published);
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user(&self, new_user: NewUser) -> PortResult<User> {
        let sql = format!(
            "INSERT INTO users (user_id, email, hashed_password, parent_name, children_names) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_user.email)
            .bind(&new_user.hashed_password)
            .bind(&new_user.parent_name)
            .bind(&new_user.children_names)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if violates(&e, UNIQUE_VIOLATION) {
                    PortError::Conflict(format!("User {} already exists", new_user.email))
                } else {
                    unexpected(e)
                }
            })?;
        record.to_domain()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password, is_active FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?;
        Ok(record.to_domain())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1");
        sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?
            .to_domain()
    }

    async fn list_users(&self, search: Option<&str>, page: u32, limit: u32) -> PortResult<Page<User>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        if let Some(search) = search {
            let pattern = format!("%{}%", search);
            for query in [&mut count, &mut select] {
                query
                    .push(" WHERE email ILIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR parent_name ILIKE ")
                    .push_bind(pattern.clone());
            }
        }
        let offset = i64::from(page.max(1) - 1) * i64::from(limit);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(offset);

        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        let records = select
            .build_query_as::<UserRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(Page {
            items: records
                .into_iter()
                .map(UserRecord::to_domain)
                .collect::<PortResult<Vec<_>>>()?,
            page: page.max(1),
            limit,
            total: total.max(0) as u64,
        })
    }

    async fn set_user_active(&self, user_id: Uuid, is_active: bool) -> PortResult<User> {
        let sql = format!("UPDATE users SET is_active = $2 WHERE user_id = $1 RETURNING {USER_COLUMNS}");
        sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user_id)
            .bind(is_active)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?
            .to_domain()
    }

    async fn record_user_activity(&self, user_id: Uuid, activity: UserActivity) -> PortResult<()> {
        let sql = match activity {
            UserActivity::ViewedStory => {
                "UPDATE users SET stories_viewed = stories_viewed + 1, last_accessed = NOW() WHERE user_id = $1"
            }
            UserActivity::GeneratedStory => {
                "UPDATE users SET stories_generated = stories_generated + 1, last_accessed = NOW() WHERE user_id = $1"
            }
        };
        let result = sqlx::query(sql)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_story(&self, content: StoryContent, created_by: Option<Uuid>) -> PortResult<Story> {
        let story = Story::new(content, created_by);
        let sql = format!(
            "INSERT INTO stories (id, title, summary, category, age_range, start_node_id, nodes, \
             thumbnail_url, author, difficulty, tags, is_published, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {STORY_COLUMNS}"
        );
        let content = &story.content;
        sqlx::query_as::<_, StoryRecord>(&sql)
            .bind(story.id)
            .bind(Json(&content.title))
            .bind(Json(&content.summary))
            .bind(content.category.as_str())
            .bind(content.age_range.as_str())
            .bind(&content.start_node_id)
            .bind(Json(&content.nodes))
            .bind(&content.thumbnail_url)
            .bind(&content.author)
            .bind(content.difficulty.as_str())
            .bind(&content.tags)
            .bind(story.is_published)
            .bind(story.created_by)
            .bind(story.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?
            .to_domain()
    }

    async fn get_story(&self, story_id: Uuid) -> PortResult<Story> {
        let sql = format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = $1");
        sqlx::query_as::<_, StoryRecord>(&sql)
            .bind(story_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Story {} not found", story_id)))?
            .to_domain()
    }

    async fn list_stories(&self, filter: &StoryFilter) -> PortResult<Page<Story>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM stories");
        push_story_filters(&mut count, filter);

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {STORY_COLUMNS} FROM stories"));
        push_story_filters(&mut select, filter);
        select.push(match filter.sort {
            StorySort::MostViewed => " ORDER BY views DESC, created_at DESC",
            StorySort::Newest => " ORDER BY created_at DESC",
        });
        select
            .push(" LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(filter.offset() as i64);

        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        let records = select
            .build_query_as::<StoryRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(Page {
            items: records
                .into_iter()
                .map(StoryRecord::to_domain)
                .collect::<PortResult<Vec<_>>>()?,
            page: filter.page.max(1),
            limit: filter.limit,
            total: total.max(0) as u64,
        })
    }

    async fn set_story_published(&self, story_id: Uuid, is_published: bool) -> PortResult<Story> {
        let sql = format!("UPDATE stories SET is_published = $2 WHERE id = $1 RETURNING {STORY_COLUMNS}");
        sqlx::query_as::<_, StoryRecord>(&sql)
            .bind(story_id)
            .bind(is_published)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Story {} not found", story_id)))?
            .to_domain()
    }

    async fn record_story_view(&self, story_id: Uuid, view_key: Uuid) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let inserted = sqlx::query(
            "INSERT INTO story_views (story_id, view_key) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(story_id)
        .bind(view_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| story_write_error(e, story_id))?
        .rows_affected()
            == 1;

        if inserted {
            sqlx::query("UPDATE stories SET views = views + 1 WHERE id = $1")
                .bind(story_id)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(inserted)
    }

    async fn record_story_completion(&self, story_id: Uuid, completion_key: Uuid) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let inserted = sqlx::query(
            "INSERT INTO story_completions (story_id, completion_key) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(story_id)
        .bind(completion_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| story_write_error(e, story_id))?
        .rows_affected()
            == 1;

        if inserted {
            sqlx::query("UPDATE stories SET completions = completions + 1 WHERE id = $1")
                .bind(story_id)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(inserted)
    }

    async fn create_feedback(
        &self,
        story_id: Uuid,
        user_id: Uuid,
        feedback: NewFeedback,
    ) -> PortResult<Feedback> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let sql = format!(
            "INSERT INTO feedback (id, story_id, user_id, rating, comment, child_age, tags, is_public) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {FEEDBACK_COLUMNS}"
        );
        let tags: Vec<&str> = feedback.tags.iter().map(FeedbackTag::as_str).collect();
        let record = sqlx::query_as::<_, FeedbackRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(story_id)
            .bind(user_id)
            .bind(i16::from(feedback.rating.value()))
            .bind(&feedback.comment)
            .bind(feedback.child_age.map(i16::from))
            .bind(&tags)
            .bind(feedback.is_public)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if violates(&e, UNIQUE_VIOLATION) {
                    PortError::Conflict("Feedback already provided for this story".to_string())
                } else {
                    story_write_error(e, story_id)
                }
            })?;

        sqlx::query(
            "UPDATE stories SET average_rating = (average_rating * total_ratings + $2) / (total_ratings + 1), \
             total_ratings = total_ratings + 1 WHERE id = $1",
        )
        .bind(story_id)
        .bind(f64::from(feedback.rating.value()))
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn platform_stats(&self) -> PortResult<PlatformStats> {
        let (total_users, active_users) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_active) FROM users",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let (total_stories, published_stories) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_published) FROM stories",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let (total_feedback, average_rating) = sqlx::query_as::<_, (i64, f64)>(
            "SELECT COUNT(*), COALESCE(AVG(rating)::float8, 0) FROM feedback",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let categories = sqlx::query_as::<_, (String, i64, f64)>(
            "SELECT category, COUNT(*), COALESCE(AVG(views)::float8, 0) FROM stories \
             WHERE is_published GROUP BY category ORDER BY COUNT(*) DESC, category",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(|(category, count, average_views)| -> PortResult<CategoryStats> {
            Ok(CategoryStats {
                category: category.parse().map_err(corrupt)?,
                count: count.max(0) as u64,
                average_views,
            })
        })
        .collect::<PortResult<Vec<_>>>()?;

        Ok(PlatformStats {
            total_users: total_users.max(0) as u64,
            active_users: active_users.max(0) as u64,
            total_stories: total_stories.max(0) as u64,
            published_stories: published_stories.max(0) as u64,
            total_feedback: total_feedback.max(0) as u64,
            average_rating,
            categories,
        })
    }
}
