//! crates/storyteller_core/src/domain.rs
//!
//! Defines the core data structures for the application: the branching story
//! document, its aggregate counters, users and platform analytics.
//!
//! The story document serializes with camelCase keys (`startNodeId`,
//! `nextNodeId`, `isEnding`) because that is the shape authoring tools and the
//! story generator exchange.

use crate::feedback::Rating;
use crate::locale::{Language, LocalizedText};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Raised when a stored or submitted string names no known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_str`, `Display` and `FromStr` over the serde names of a
/// fieldless enum, so the same strings are used on the wire and in the
/// database.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

//=========================================================================================
// Story Enumerations
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Adventure,
    Fantasy,
    Educational,
    Friendship,
    Nature,
    Family,
}

string_enum!(Category, "category", {
    Adventure => "adventure",
    Fantasy => "fantasy",
    Educational => "educational",
    Friendship => "friendship",
    Nature => "nature",
    Family => "family",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeRange {
    #[serde(rename = "5-6")]
    FiveToSix,
    #[serde(rename = "6-7")]
    SixToSeven,
    #[serde(rename = "7-8")]
    SevenToEight,
    #[default]
    #[serde(rename = "5-8")]
    FiveToEight,
}

string_enum!(AgeRange, "age range", {
    FiveToSix => "5-6",
    SixToSeven => "6-7",
    SevenToEight => "7-8",
    FiveToEight => "5-8",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

string_enum!(Difficulty, "difficulty", {
    Easy => "easy",
    Medium => "medium",
    Hard => "hard",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Parent,
    Admin,
}

string_enum!(Role, "role", {
    Parent => "parent",
    Admin => "admin",
});

//=========================================================================================
// Story Graph
//=========================================================================================

/// An edge of the story graph: one option offered to the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    #[serde(default)]
    pub text: LocalizedText,
    #[serde(default)]
    pub next_node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

impl Choice {
    pub fn new(text: impl Into<String>, next_node_id: impl Into<String>) -> Self {
        Self {
            text: LocalizedText::new(text),
            next_node_id: next_node_id.into(),
            emoji: None,
        }
    }

    pub fn with_emoji(mut self, emoji: impl Into<String>) -> Self {
        self.emoji = Some(emoji.into());
        self
    }
}

/// One narrative beat. Either an ending with no choices, or a page with at
/// least one choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: LocalizedText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<LocalizedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Display order is selection order.
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub is_ending: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl StoryNode {
    /// A page that still needs choices added.
    pub fn page(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: LocalizedText::new(text),
            audio_url: None,
            image_url: None,
            choices: Vec::new(),
            is_ending: false,
            tags: Vec::new(),
        }
    }

    pub fn ending(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            is_ending: true,
            ..Self::page(id, text)
        }
    }

    pub fn with_choice(mut self, choice: Choice) -> Self {
        self.choices.push(choice);
        self
    }
}

fn default_author() -> String {
    "StoryBot AI".to_string()
}

/// The authored part of a story, as produced by a human editor or the story
/// generator. This is the document story validation runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryContent {
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(default)]
    pub summary: LocalizedText,
    pub category: Category,
    #[serde(default)]
    pub age_range: AgeRange,
    #[serde(default)]
    pub start_node_id: String,
    /// Order only matters for display and editing.
    #[serde(default)]
    pub nodes: Vec<StoryNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl StoryContent {
    pub fn new(
        title: LocalizedText,
        summary: LocalizedText,
        category: Category,
        start_node_id: impl Into<String>,
        nodes: Vec<StoryNode>,
    ) -> Self {
        Self {
            title,
            summary,
            category,
            age_range: AgeRange::default(),
            start_node_id: start_node_id.into(),
            nodes,
            thumbnail_url: None,
            author: default_author(),
            difficulty: Difficulty::default(),
            tags: Vec::new(),
        }
    }
}

/// Aggregate counters kept next to a story. Only reading and feedback change
/// them; authoring never does.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryStats {
    pub views: u64,
    pub completions: u64,
    pub average_rating: f64,
    pub total_ratings: u64,
}

impl StoryStats {
    /// Folds one more rating into the running average.
    pub fn record_rating(&mut self, rating: Rating) {
        let total_score = self.average_rating * self.total_ratings as f64 + f64::from(rating.value());
        self.total_ratings += 1;
        self.average_rating = total_score / self.total_ratings as f64;
    }

    /// The average rounded to one decimal place, as shown in listings.
    pub fn display_rating(&self) -> f64 {
        (self.average_rating * 10.0).round() / 10.0
    }
}

/// A stored story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: Uuid,
    #[serde(flatten)]
    pub content: StoryContent,
    pub stats: StoryStats,
    pub is_published: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Story {
    /// Wraps freshly authored content in a new, published story record.
    pub fn new(content: StoryContent, created_by: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            stats: StoryStats::default(),
            is_published: true,
            created_by,
            created_at: Utc::now(),
        }
    }
}

/// Listing order for stories. Ties are always broken by newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorySort {
    /// Most viewed first, as in the public catalogue.
    MostViewed,
    #[default]
    Newest,
}

/// Listing criteria for stories. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryFilter {
    pub category: Option<Category>,
    pub age_range: Option<AgeRange>,
    pub published: Option<bool>,
    pub sort: StorySort,
    pub page: u32,
    pub limit: u32,
}

impl Default for StoryFilter {
    fn default() -> Self {
        Self {
            category: None,
            age_range: None,
            published: None,
            sort: StorySort::default(),
            page: 1,
            limit: 20,
        }
    }
}

impl StoryFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }
}

/// One page of a listing plus the total number of matching records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

/// A request for the story generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub category: Category,
    pub age_range: AgeRange,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Prompt must be between {min} and {max} characters, got {actual}")]
pub struct PromptLengthError {
    pub min: usize,
    pub max: usize,
    pub actual: usize,
}

impl GenerationRequest {
    pub const MIN_PROMPT_CHARS: usize = 10;
    pub const MAX_PROMPT_CHARS: usize = 500;

    pub fn new(
        prompt: impl Into<String>,
        category: Category,
        age_range: AgeRange,
        language: Language,
    ) -> Result<Self, PromptLengthError> {
        let prompt = prompt.into().trim().to_string();
        let actual = prompt.chars().count();
        if !(Self::MIN_PROMPT_CHARS..=Self::MAX_PROMPT_CHARS).contains(&actual) {
            return Err(PromptLengthError {
                min: Self::MIN_PROMPT_CHARS,
                max: Self::MAX_PROMPT_CHARS,
                actual,
            });
        }
        Ok(Self {
            prompt,
            category,
            age_range,
            language,
        })
    }
}

//=========================================================================================
// Users
//=========================================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub stories_viewed: u64,
    pub stories_generated: u64,
    pub last_accessed: Option<DateTime<Utc>>,
}

/// Represents a parent or admin account - used throughout the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub parent_name: String,
    pub children_names: Vec<String>,
    pub role: Role,
    pub is_active: bool,
    pub preferred_languages: Vec<Language>,
    pub usage: UsageStats,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The language stories are shown in when a request names none.
    pub fn preferred_language(&self) -> Language {
        self.preferred_languages.first().copied().unwrap_or_default()
    }
}

/// The fields needed to register an account. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub hashed_password: String,
    pub parent_name: String,
    pub children_names: Vec<String>,
}

// Only used internally for login - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub is_active: bool,
}

/// Usage events counted on the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserActivity {
    ViewedStory,
    GeneratedStory,
}

//=========================================================================================
// Analytics
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub category: Category,
    pub count: u64,
    pub average_views: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_users: u64,
    pub active_users: u64,
    pub total_stories: u64,
    pub published_stories: u64,
    pub total_feedback: u64,
    pub average_rating: f64,
    /// Published stories per category, most populated first.
    pub categories: Vec<CategoryStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_average_accumulates() {
        let mut stats = StoryStats::default();
        for value in [5, 4, 4] {
            stats.record_rating(Rating::new(value).unwrap());
        }
        assert_eq!(stats.total_ratings, 3);
        assert!((stats.average_rating - 13.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.display_rating(), 4.3);
    }

    #[test]
    fn enums_round_trip_through_their_wire_names() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(*category));
        }
        assert_eq!("5-8".parse::<AgeRange>(), Ok(AgeRange::FiveToEight));
        assert_eq!(
            serde_json::to_string(&AgeRange::SixToSeven).unwrap(),
            "\"6-7\""
        );
        let err = "pirates".parse::<Category>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown category: 'pirates'");
    }

    #[test]
    fn story_document_uses_camel_case_and_defaults() {
        let json = r#"{
            "title": {"en": "The Lost Kite"},
            "summary": {"en": "A kite flies away."},
            "category": "adventure",
            "startNodeId": "start",
            "nodes": [
                {"id": "start", "text": {"en": "Wind!"}, "choices": [
                    {"text": {"en": "Chase it"}, "nextNodeId": "end", "emoji": "🪁"}
                ]},
                {"id": "end", "text": {"en": "Caught."}, "isEnding": true}
            ]
        }"#;
        let content: StoryContent = serde_json::from_str(json).unwrap();
        assert_eq!(content.age_range, AgeRange::FiveToEight);
        assert_eq!(content.author, "StoryBot AI");
        assert_eq!(content.difficulty, Difficulty::Easy);
        assert_eq!(content.nodes[0].choices[0].next_node_id, "end");
        assert!(content.nodes[1].is_ending);
    }

    #[test]
    fn filter_offset_is_page_based() {
        let filter = StoryFilter {
            page: 3,
            limit: 10,
            ..StoryFilter::default()
        };
        assert_eq!(filter.offset(), 20);
        assert_eq!(StoryFilter { page: 0, ..filter }.offset(), 0);
    }

    #[test]
    fn generation_prompt_length_is_checked() {
        let short = GenerationRequest::new("dragon", Category::Fantasy, AgeRange::default(), Language::En);
        assert_eq!(short.unwrap_err().actual, 6);

        let ok = GenerationRequest::new(
            "  a shy dragon learns to share  ",
            Category::Friendship,
            AgeRange::FiveToSix,
            Language::Fr,
        )
        .unwrap();
        assert_eq!(ok.prompt, "a shy dragon learns to share");
    }
}
