pub mod domain;
pub mod feedback;
pub mod locale;
pub mod ports;
pub mod session;
pub mod validation;

pub use domain::{
    AgeRange, Category, Choice, Difficulty, GenerationRequest, NewUser, Page, PlatformStats, Role,
    Story, StoryContent, StoryFilter, StoryNode, StorySort, StoryStats, User, UserActivity, UserCredentials,
};
pub use feedback::{Feedback, FeedbackDraft, FeedbackError, FeedbackTag, NewFeedback, Rating};
pub use locale::{Language, LocaleError, LocalizedText};
pub use ports::{DatabaseService, PortError, PortResult, StoryGenerationService};
pub use session::{ChoiceView, NodeView, ReadingSession, SessionError, SessionEvent, SessionState};
pub use validation::{validate, ValidatedStory, ValidationError, ValidationErrors};
