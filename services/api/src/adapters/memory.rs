//! services/api/src/adapters/memory.rs
//!
//! An in-process implementation of the `DatabaseService` port. It backs the
//! service when no `DATABASE_URL` is configured and gives the handler tests a
//! real store to run against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use storyteller_core::domain::{
    CategoryStats, NewUser, Page, PlatformStats, Role, Story, StoryContent, StoryFilter,
    StorySort, UsageStats, User, UserActivity, UserCredentials,
};
use storyteller_core::feedback::{Feedback, NewFeedback};
use storyteller_core::locale::Language;
use storyteller_core::ports::{DatabaseService, PortError, PortResult};
use tokio::sync::Mutex;
use uuid::Uuid;

struct StoredUser {
    user: User,
    hashed_password: String,
}

#[derive(Default)]
struct Store {
    users: HashMap<Uuid, StoredUser>,
    auth_sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    stories: HashMap<Uuid, Story>,
    story_views: HashSet<(Uuid, Uuid)>,
    story_completions: HashSet<(Uuid, Uuid)>,
    feedback: Vec<Feedback>,
}

/// A `DatabaseService` that keeps every record in memory.
#[derive(Default)]
pub struct InMemoryDatabase {
    store: Mutex<Store>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Promotes an account to admin. Roles are never granted through the API.
    pub async fn grant_admin(&self, user_id: Uuid) -> PortResult<User> {
        let mut store = self.store.lock().await;
        let stored = store
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        stored.user.role = Role::Admin;
        Ok(stored.user.clone())
    }

    /// Inserts a fully formed story record, e.g. one with existing stats.
    pub async fn insert_story(&self, story: Story) {
        self.store.lock().await.stories.insert(story.id, story);
    }
}

fn page_of<T>(items: Vec<T>, page: u32, limit: u32) -> Page<T> {
    let total = items.len() as u64;
    let offset = (page.max(1) - 1) as usize * limit as usize;
    Page {
        items: items.into_iter().skip(offset).take(limit as usize).collect(),
        page: page.max(1),
        limit,
        total,
    }
}

fn story_not_found(story_id: Uuid) -> PortError {
    PortError::NotFound(format!("Story {} not found", story_id))
}

#[async_trait]
impl DatabaseService for InMemoryDatabase {
    async fn create_user(&self, new_user: NewUser) -> PortResult<User> {
        let mut store = self.store.lock().await;
        if store
            .users
            .values()
            .any(|stored| stored.user.email == new_user.email)
        {
            return Err(PortError::Conflict(format!(
                "User {} already exists",
                new_user.email
            )));
        }

        let user = User {
            user_id: Uuid::new_v4(),
            email: new_user.email,
            parent_name: new_user.parent_name,
            children_names: new_user.children_names,
            role: Role::Parent,
            is_active: true,
            preferred_languages: vec![Language::En],
            usage: UsageStats::default(),
            created_at: Utc::now(),
        };
        store.users.insert(
            user.user_id,
            StoredUser {
                user: user.clone(),
                hashed_password: new_user.hashed_password,
            },
        );
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let store = self.store.lock().await;
        store
            .users
            .values()
            .find(|stored| stored.user.email == email)
            .map(|stored| UserCredentials {
                user_id: stored.user.user_id,
                email: stored.user.email.clone(),
                hashed_password: stored.hashed_password.clone(),
                is_active: stored.user.is_active,
            })
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        let store = self.store.lock().await;
        store
            .users
            .get(&user_id)
            .map(|stored| stored.user.clone())
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn list_users(&self, search: Option<&str>, page: u32, limit: u32) -> PortResult<Page<User>> {
        let store = self.store.lock().await;
        let needle = search.map(str::to_lowercase);
        let mut users: Vec<User> = store
            .users
            .values()
            .map(|stored| stored.user.clone())
            .filter(|user| match &needle {
                Some(needle) => {
                    user.email.to_lowercase().contains(needle)
                        || user.parent_name.to_lowercase().contains(needle)
                }
                None => true,
            })
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(users, page, limit))
    }

    async fn set_user_active(&self, user_id: Uuid, is_active: bool) -> PortResult<User> {
        let mut store = self.store.lock().await;
        let stored = store
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        stored.user.is_active = is_active;
        Ok(stored.user.clone())
    }

    async fn record_user_activity(&self, user_id: Uuid, activity: UserActivity) -> PortResult<()> {
        let mut store = self.store.lock().await;
        let stored = store
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        let usage = &mut stored.user.usage;
        match activity {
            UserActivity::ViewedStory => usage.stories_viewed += 1,
            UserActivity::GeneratedStory => usage.stories_generated += 1,
        }
        usage.last_accessed = Some(Utc::now());
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut store = self.store.lock().await;
        store
            .auth_sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let store = self.store.lock().await;
        match store.auth_sessions.get(session_id) {
            Some((user_id, expires_at)) if *expires_at > Utc::now() => Ok(*user_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.store.lock().await.auth_sessions.remove(session_id);
        Ok(())
    }

    async fn create_story(&self, content: StoryContent, created_by: Option<Uuid>) -> PortResult<Story> {
        let story = Story::new(content, created_by);
        self.store
            .lock()
            .await
            .stories
            .insert(story.id, story.clone());
        Ok(story)
    }

    async fn get_story(&self, story_id: Uuid) -> PortResult<Story> {
        let store = self.store.lock().await;
        store
            .stories
            .get(&story_id)
            .cloned()
            .ok_or_else(|| story_not_found(story_id))
    }

    async fn list_stories(&self, filter: &StoryFilter) -> PortResult<Page<Story>> {
        let store = self.store.lock().await;
        let mut stories: Vec<Story> = store
            .stories
            .values()
            .filter(|story| filter.category.map_or(true, |c| story.content.category == c))
            .filter(|story| filter.age_range.map_or(true, |a| story.content.age_range == a))
            .filter(|story| filter.published.map_or(true, |p| story.is_published == p))
            .cloned()
            .collect();
        match filter.sort {
            StorySort::MostViewed => stories.sort_by(|a, b| {
                b.stats
                    .views
                    .cmp(&a.stats.views)
                    .then(b.created_at.cmp(&a.created_at))
            }),
            StorySort::Newest => stories.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        Ok(page_of(stories, filter.page, filter.limit))
    }

    async fn set_story_published(&self, story_id: Uuid, is_published: bool) -> PortResult<Story> {
        let mut store = self.store.lock().await;
        let story = store
            .stories
            .get_mut(&story_id)
            .ok_or_else(|| story_not_found(story_id))?;
        story.is_published = is_published;
        Ok(story.clone())
    }

    async fn record_story_view(&self, story_id: Uuid, view_key: Uuid) -> PortResult<bool> {
        let mut store = self.store.lock().await;
        if !store.stories.contains_key(&story_id) {
            return Err(story_not_found(story_id));
        }
        if !store.story_views.insert((story_id, view_key)) {
            return Ok(false);
        }
        if let Some(story) = store.stories.get_mut(&story_id) {
            story.stats.views += 1;
        }
        Ok(true)
    }

    async fn record_story_completion(&self, story_id: Uuid, completion_key: Uuid) -> PortResult<bool> {
        let mut store = self.store.lock().await;
        if !store.stories.contains_key(&story_id) {
            return Err(story_not_found(story_id));
        }
        if !store.story_completions.insert((story_id, completion_key)) {
            return Ok(false);
        }
        if let Some(story) = store.stories.get_mut(&story_id) {
            story.stats.completions += 1;
        }
        Ok(true)
    }

    async fn create_feedback(
        &self,
        story_id: Uuid,
        user_id: Uuid,
        feedback: NewFeedback,
    ) -> PortResult<Feedback> {
        let mut store = self.store.lock().await;
        if store
            .feedback
            .iter()
            .any(|f| f.story_id == story_id && f.user_id == user_id)
        {
            return Err(PortError::Conflict(
                "Feedback already provided for this story".to_string(),
            ));
        }
        let story = store
            .stories
            .get_mut(&story_id)
            .ok_or_else(|| story_not_found(story_id))?;
        story.stats.record_rating(feedback.rating);

        let record = Feedback::new(story_id, user_id, feedback);
        store.feedback.push(record.clone());
        Ok(record)
    }

    async fn platform_stats(&self) -> PortResult<PlatformStats> {
        let store = self.store.lock().await;
        let published: Vec<&Story> = store.stories.values().filter(|s| s.is_published).collect();

        let mut by_category: HashMap<_, (u64, u64)> = HashMap::new();
        for story in &published {
            let entry = by_category.entry(story.content.category).or_default();
            entry.0 += 1;
            entry.1 += story.stats.views;
        }
        let mut categories: Vec<CategoryStats> = by_category
            .into_iter()
            .map(|(category, (count, views))| CategoryStats {
                category,
                count,
                average_views: views as f64 / count as f64,
            })
            .collect();
        categories.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.category.as_str().cmp(b.category.as_str()))
        });

        let total_feedback = store.feedback.len() as u64;
        let average_rating = if total_feedback == 0 {
            0.0
        } else {
            store
                .feedback
                .iter()
                .map(|f| f64::from(f.rating.value()))
                .sum::<f64>()
                / total_feedback as f64
        };

        Ok(PlatformStats {
            total_users: store.users.len() as u64,
            active_users: store.users.values().filter(|u| u.user.is_active).count() as u64,
            total_stories: store.stories.len() as u64,
            published_stories: published.len() as u64,
            total_feedback,
            average_rating,
            categories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyteller_core::domain::{Category, StoryNode};
    use storyteller_core::feedback::FeedbackDraft;
    use storyteller_core::locale::LocalizedText;

    fn content(title: &str, category: Category) -> StoryContent {
        StoryContent::new(
            LocalizedText::new(title),
            LocalizedText::new("A short tale."),
            category,
            "end",
            vec![StoryNode::ending("end", "The end.")],
        )
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            hashed_password: "hash".to_string(),
            parent_name: "Sam".to_string(),
            children_names: vec!["Ada".to_string()],
        }
    }

    #[tokio::test]
    async fn duplicate_emails_conflict() {
        let db = InMemoryDatabase::new();
        db.create_user(new_user("a@example.com")).await.unwrap();
        let err = db.create_user(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
    }

    #[tokio::test]
    async fn views_are_counted_once_per_key() {
        let db = InMemoryDatabase::new();
        let story = db.create_story(content("Owls", Category::Nature), None).await.unwrap();
        let key = Uuid::new_v4();

        assert!(db.record_story_view(story.id, key).await.unwrap());
        assert!(!db.record_story_view(story.id, key).await.unwrap());
        assert!(db.record_story_view(story.id, Uuid::new_v4()).await.unwrap());
        assert!(db.record_story_completion(story.id, key).await.unwrap());
        assert!(!db.record_story_completion(story.id, key).await.unwrap());

        let stats = db.get_story(story.id).await.unwrap().stats;
        assert_eq!(stats.views, 2);
        assert_eq!(stats.completions, 1);
    }

    #[tokio::test]
    async fn feedback_updates_the_average_once_per_user() {
        let db = InMemoryDatabase::new();
        let story = db.create_story(content("Owls", Category::Nature), None).await.unwrap();
        let reader = Uuid::new_v4();
        let draft = |rating| FeedbackDraft {
            rating,
            ..FeedbackDraft::default()
        };

        db.create_feedback(story.id, reader, draft(4).validate().unwrap())
            .await
            .unwrap();
        db.create_feedback(story.id, Uuid::new_v4(), draft(5).validate().unwrap())
            .await
            .unwrap();
        let err = db
            .create_feedback(story.id, reader, draft(1).validate().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));

        let stats = db.get_story(story.id).await.unwrap().stats;
        assert_eq!(stats.total_ratings, 2);
        assert!((stats.average_rating - 4.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn catalogue_filters_and_sorts() {
        let db = InMemoryDatabase::new();
        let quiet = db.create_story(content("Quiet", Category::Nature), None).await.unwrap();
        let popular = db.create_story(content("Popular", Category::Nature), None).await.unwrap();
        db.create_story(content("Castle", Category::Fantasy), None).await.unwrap();
        db.record_story_view(popular.id, Uuid::new_v4()).await.unwrap();
        db.set_story_published(quiet.id, false).await.unwrap();

        let filter = StoryFilter {
            category: Some(Category::Nature),
            published: Some(true),
            sort: StorySort::MostViewed,
            ..StoryFilter::default()
        };
        let page = db.list_stories(&filter).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, popular.id);

        let everything = db.list_stories(&StoryFilter::default()).await.unwrap();
        assert_eq!(everything.total, 3);
    }

    #[tokio::test]
    async fn expired_auth_sessions_are_rejected() {
        let db = InMemoryDatabase::new();
        let user_id = Uuid::new_v4();
        db.create_auth_session("old", user_id, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        db.create_auth_session("fresh", user_id, Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();

        assert!(matches!(
            db.validate_auth_session("old").await,
            Err(PortError::Unauthorized)
        ));
        assert_eq!(db.validate_auth_session("fresh").await.unwrap(), user_id);
    }
}
