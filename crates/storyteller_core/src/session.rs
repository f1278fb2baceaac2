//! crates/storyteller_core/src/session.rs
//!
//! The reading session: a reader's walk through a validated story, one choice
//! at a time.
//!
//! A session is `Active` until it lands on an ending, then `Completed` for
//! good. Every failing call leaves the session exactly as it was, so a stale
//! choice index (the page changed under the reader) can simply be retried.

use crate::domain::Story;
use crate::locale::LocaleError;
use crate::validation::{ValidatedStory, ValidationErrors};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Story cannot be read: {0}")]
    InvalidStory(ValidationErrors),
    #[error("Choice {index} does not exist; this page has {available} choice(s)")]
    ChoiceIndexOutOfRange { index: i64, available: usize },
    #[error("The story has already reached an ending")]
    SessionAlreadyCompleted,
    #[error("Already at the first page of the story")]
    NoPreviousNode,
}

/// Where the reader is. `history` always ends with the current node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionState {
    #[serde(rename_all = "camelCase")]
    Active {
        current_node_id: String,
        history: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        ending_node_id: String,
        history: Vec<String>,
    },
}

impl SessionState {
    pub fn current_node_id(&self) -> &str {
        match self {
            SessionState::Active { current_node_id, .. } => current_node_id,
            SessionState::Completed { ending_node_id, .. } => ending_node_id,
        }
    }

    pub fn history(&self) -> &[String] {
        match self {
            SessionState::Active { history, .. } | SessionState::Completed { history, .. } => history,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionState::Completed { .. })
    }
}

/// Emitted on each successful move, for collaborators that keep statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    NodeVisited { story_id: Uuid, node_id: String },
    #[serde(rename_all = "camelCase")]
    EndingReached { story_id: Uuid, node_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceView {
    pub index: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

/// Everything a presentation layer needs to show the current page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub node_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub choices: Vec<ChoiceView>,
    pub is_ending: bool,
}

/// One reader's progress through one story.
///
/// The story is shared read-only, so any number of sessions can walk the
/// same story at once without coordination.
#[derive(Debug, Clone)]
pub struct ReadingSession {
    story: Arc<ValidatedStory>,
    state: SessionState,
}

impl ReadingSession {
    /// Opens a story at its start node, validating it first.
    pub fn start(story: &Story) -> Result<Self, SessionError> {
        let validated = ValidatedStory::from_story(story).map_err(SessionError::InvalidStory)?;
        Ok(Self::from_validated(Arc::new(validated)))
    }

    pub fn from_validated(story: Arc<ValidatedStory>) -> Self {
        let start = story.start_node();
        let history = vec![start.id.clone()];
        let state = if start.is_ending {
            SessionState::Completed {
                ending_node_id: start.id.clone(),
                history,
            }
        } else {
            SessionState::Active {
                current_node_id: start.id.clone(),
                history,
            }
        };
        Self { story, state }
    }

    /// Rebuilds a session by replaying a shared path of choice indices.
    pub fn replay(story: Arc<ValidatedStory>, choices: &[i64]) -> Result<Self, SessionError> {
        let mut session = Self::from_validated(story);
        for &choice in choices {
            session.choose(choice)?;
        }
        Ok(session)
    }

    pub fn story(&self) -> &ValidatedStory {
        &self.story
    }

    pub fn story_id(&self) -> Uuid {
        self.story.id()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    /// Follows choice `choice_index` of the current page.
    ///
    /// Negative indices are rejected like any other index outside the page's
    /// choices.
    pub fn choose(&mut self, choice_index: i64) -> Result<Vec<SessionEvent>, SessionError> {
        let (current_node_id, history) = match &self.state {
            SessionState::Completed { .. } => return Err(SessionError::SessionAlreadyCompleted),
            SessionState::Active {
                current_node_id,
                history,
            } => (current_node_id, history),
        };

        let node = self.story.node_at(current_node_id);
        let choice = usize::try_from(choice_index)
            .ok()
            .and_then(|i| node.choices.get(i))
            .ok_or(SessionError::ChoiceIndexOutOfRange {
                index: choice_index,
                available: node.choices.len(),
            })?;

        let next = self.story.node_at(&choice.next_node_id);
        let mut history = history.clone();
        history.push(next.id.clone());

        let story_id = self.story.id();
        let mut events = vec![SessionEvent::NodeVisited {
            story_id,
            node_id: next.id.clone(),
        }];

        self.state = if next.is_ending {
            events.push(SessionEvent::EndingReached {
                story_id,
                node_id: next.id.clone(),
            });
            SessionState::Completed {
                ending_node_id: next.id.clone(),
                history,
            }
        } else {
            SessionState::Active {
                current_node_id: next.id.clone(),
                history,
            }
        };

        Ok(events)
    }

    /// Steps back to the previously visited page.
    pub fn go_back(&mut self) -> Result<(), SessionError> {
        match &mut self.state {
            SessionState::Completed { .. } => Err(SessionError::SessionAlreadyCompleted),
            SessionState::Active { history, .. } if history.len() < 2 => {
                Err(SessionError::NoPreviousNode)
            }
            SessionState::Active {
                current_node_id,
                history,
            } => {
                history.pop();
                if let Some(previous) = history.last() {
                    *current_node_id = previous.clone();
                }
                Ok(())
            }
        }
    }

    /// Projects the current page into `language`, falling back to `en` per
    /// field. Never changes the session.
    pub fn current_view(&self, language: &str) -> Result<NodeView, LocaleError> {
        let node = self.story.node_at(self.state.current_node_id());

        let choices = node
            .choices
            .iter()
            .enumerate()
            .map(|(index, choice)| {
                Ok(ChoiceView {
                    index,
                    text: choice.text.resolve(language)?.to_string(),
                    emoji: choice.emoji.clone(),
                })
            })
            .collect::<Result<Vec<_>, LocaleError>>()?;

        Ok(NodeView {
            node_id: node.id.clone(),
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
    }
}
