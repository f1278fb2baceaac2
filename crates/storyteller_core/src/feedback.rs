//! crates/storyteller_core/src/feedback.rs
//!
//! Reader feedback on a story: the rating scale, the allowed tags and the
//! checks a submission must pass before it reaches persistence.
//!
//! One feedback per (story, user) pair is enforced by the persistence port,
//! not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MAX_COMMENT_CHARS: usize = 500;
pub const CHILD_AGE_RANGE: std::ops::RangeInclusive<i64> = 5..=8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedbackError {
    #[error("Rating must be between 1 and 5, got {0}")]
    RatingOutOfRange(i64),
    #[error("Comment must be at most 500 characters, got {0}")]
    CommentTooLong(usize),
    #[error("Child age must be between 5 and 8, got {0}")]
    ChildAgeOutOfRange(i64),
    #[error("Unknown feedback tag: '{0}'")]
    UnknownTag(String),
}

/// A star rating from 1 to 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: i64) -> Result<Self, FeedbackError> {
        match u8::try_from(value) {
            Ok(v @ 1..=5) => Ok(Self(v)),
            _ => Err(FeedbackError::RatingOutOfRange(value)),
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackTag {
    Funny,
    Educational,
    Exciting,
    TooEasy,
    TooHard,
    LovedIt,
    Boring,
}

impl FeedbackTag {
    pub const ALL: [FeedbackTag; 7] = [
        FeedbackTag::Funny,
        FeedbackTag::Educational,
        FeedbackTag::Exciting,
        FeedbackTag::TooEasy,
        FeedbackTag::TooHard,
        FeedbackTag::LovedIt,
        FeedbackTag::Boring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackTag::Funny => "funny",
            FeedbackTag::Educational => "educational",
            FeedbackTag::Exciting => "exciting",
            FeedbackTag::TooEasy => "too-easy",
            FeedbackTag::TooHard => "too-hard",
            FeedbackTag::LovedIt => "loved-it",
            FeedbackTag::Boring => "boring",
        }
    }
}

impl fmt::Display for FeedbackTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackTag {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeedbackTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| FeedbackError::UnknownTag(s.to_string()))
    }
}

/// Feedback as submitted by a reader, before any checks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackDraft {
    pub rating: i64,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub child_age: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

/// Feedback that passed every check and can be handed to persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFeedback {
    pub rating: Rating,
    pub comment: Option<String>,
    pub child_age: Option<u8>,
    pub tags: Vec<FeedbackTag>,
    pub is_public: bool,
}

impl FeedbackDraft {
    pub fn validate(self) -> Result<NewFeedback, FeedbackError> {
        let rating = Rating::new(self.rating)?;

        let comment = self
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if let Some(len) = comment.as_ref().map(|c| c.chars().count()) {
            if len > MAX_COMMENT_CHARS {
                return Err(FeedbackError::CommentTooLong(len));
            }
        }

        let child_age = match self.child_age {
            Some(age) if CHILD_AGE_RANGE.contains(&age) => Some(age as u8),
            Some(age) => return Err(FeedbackError::ChildAgeOutOfRange(age)),
            None => None,
        };

        let mut tags = Vec::with_capacity(self.tags.len());
        for raw in &self.tags {
            let tag = raw.parse::<FeedbackTag>()?;
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        Ok(NewFeedback {
            rating,
            comment,
            child_age,
            tags,
            is_public: self.is_public.unwrap_or(true),
        })
    }
}

/// A stored feedback record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: Uuid,
    pub story_id: Uuid,
    pub user_id: Uuid,
    pub rating: Rating,
    pub comment: Option<String>,
    pub child_age: Option<u8>,
    pub tags: Vec<FeedbackTag>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(story_id: Uuid, user_id: Uuid, feedback: NewFeedback) -> Self {
        Self {
            id: Uuid::new_v4(),
            story_id,
            user_id,
            rating: feedback.rating,
            comment: feedback.comment,
            child_age: feedback.child_age,
            tags: feedback.tags,
            is_public: feedback.is_public,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(rating: i64) -> FeedbackDraft {
        FeedbackDraft {
            rating,
            ..FeedbackDraft::default()
        }
    }

    #[test]
    fn rating_bounds() {
        assert!(Rating::new(1).is_ok());
        assert!(Rating::new(5).is_ok());
        assert_eq!(Rating::new(0), Err(FeedbackError::RatingOutOfRange(0)));
        assert_eq!(Rating::new(6), Err(FeedbackError::RatingOutOfRange(6)));
        assert_eq!(Rating::new(-3), Err(FeedbackError::RatingOutOfRange(-3)));
    }

    #[test]
    fn valid_draft_is_normalized() {
        let feedback = FeedbackDraft {
            comment: Some("  We loved the dragon!  ".to_string()),
            child_age: Some(6),
            tags: vec!["loved-it".into(), "funny".into(), "loved-it".into()],
            ..draft(5)
        }
        .validate()
        .unwrap();

        assert_eq!(feedback.rating.value(), 5);
        assert_eq!(feedback.comment.as_deref(), Some("We loved the dragon!"));
        assert_eq!(feedback.child_age, Some(6));
        assert_eq!(feedback.tags, vec![FeedbackTag::LovedIt, FeedbackTag::Funny]);
        assert!(feedback.is_public);
    }

    #[test]
    fn blank_comment_is_dropped() {
        let feedback = FeedbackDraft {
            comment: Some("   ".to_string()),
            ..draft(3)
        }
        .validate()
        .unwrap();
        assert_eq!(feedback.comment, None);
    }

    #[test]
    fn invalid_drafts_are_rejected() {
        let long = FeedbackDraft {
            comment: Some("a".repeat(MAX_COMMENT_CHARS + 1)),
            ..draft(4)
        };
        assert_eq!(long.validate(), Err(FeedbackError::CommentTooLong(501)));

        let too_old = FeedbackDraft {
            child_age: Some(9),
            ..draft(4)
        };
        assert_eq!(too_old.validate(), Err(FeedbackError::ChildAgeOutOfRange(9)));

        let bad_tag = FeedbackDraft {
            tags: vec!["scary".into()],
            ..draft(4)
        };
        assert_eq!(
            bad_tag.validate(),
            Err(FeedbackError::UnknownTag("scary".to_string()))
        );
    }
}
