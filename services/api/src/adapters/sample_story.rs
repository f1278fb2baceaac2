//! services/api/src/adapters/sample_story.rs
//!
//! A `StoryGenerationService` that needs no API key. It always writes the same
//! forest adventure, which keeps local development and the handler tests
//! deterministic.

use crate::adapters::story_llm::DEFAULT_THUMBNAIL_URL;
use async_trait::async_trait;
use storyteller_core::{
    domain::{Choice, GenerationRequest, StoryContent, StoryNode},
    locale::LocalizedText,
    ports::{PortResult, StoryGenerationService},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SampleStoryGenerator;

impl SampleStoryGenerator {
    pub fn new() -> Self {
        Self
    }
}

/// English text only; readers in other languages get the fallback.
fn text(en: &str) -> LocalizedText {
    LocalizedText::new(en)
}

fn page(id: &str, en: &str, scene: &str) -> StoryNode {
    StoryNode {
        image_url: Some(scene.to_string()),
        ..StoryNode::page(id, en)
    }
}

fn ending(id: &str, en: &str, scene: &str) -> StoryNode {
    StoryNode {
        image_url: Some(scene.to_string()),
        ..StoryNode::ending(id, en)
    }
}

pub fn sample_story(request: &GenerationRequest) -> StoryContent {
    let nodes = vec![
        page(
            "start",
            "You find yourself at the edge of a magical forest. The trees whisper secrets and the path ahead splits in two directions.",
            "forest entrance with magical glow and two paths",
        )
        .with_choice(Choice::new("Take the bright, sunny path", "sunny_path").with_emoji("☀️"))
        .with_choice(Choice::new("Try the mysterious dark path", "dark_path").with_emoji("🌙")),
        page(
            "sunny_path",
            "The sunny path leads you to a beautiful meadow filled with colorful flowers and friendly animals.",
            "sunny meadow with flowers and animals",
        )
        .with_choice(Choice::new("Make friends with the animals", "animal_friends").with_emoji("🐿️"))
        .with_choice(Choice::new("Continue exploring the meadow", "explore_meadow").with_emoji("🌼")),
        page(
            "dark_path",
            "The dark path reveals glowing mushrooms and mysterious sounds. You notice a small, lost fairy.",
            "dark forest with glowing mushrooms and a tiny fairy",
        )
        .with_choice(Choice::new("Help the lost fairy", "help_fairy").with_emoji("🧚"))
        .with_choice(Choice::new("Continue deeper into the forest", "deeper_forest").with_emoji("🌲")),
        ending(
            "animal_friends",
            "The animals show you a hidden treasure of magic berries that grant wishes!",
            "animals gathered around magical glowing berries",
        ),
        ending(
            "explore_meadow",
            "You discover an ancient map leading to the heart of the forest where dreams come true.",
            "ancient magical map in a meadow",
        ),
        ending(
            "help_fairy",
            "The grateful fairy grants you the ability to speak with all forest creatures. You become a legend among the forest dwellers.",
            "child with glowing aura surrounded by forest creatures",
        ),
        ending(
            "deeper_forest",
            "You find a magical tree house where forest protectors gather. They invite you to join their adventures.",
            "elaborate tree house with magical lights and forest protectors",
        ),
    ];

    let mut content = StoryContent::new(
        text("The Magic Forest Adventure"),
        text("A story about friendship and courage in a magical forest."),
        request.category,
        "start",
        nodes,
    );
    content.age_range = request.age_range;
    content.thumbnail_url = Some(DEFAULT_THUMBNAIL_URL.to_string());
    content
}

#[async_trait]
impl StoryGenerationService for SampleStoryGenerator {
    async fn generate_story(&self, request: &GenerationRequest) -> PortResult<StoryContent> {
        Ok(sample_story(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyteller_core::domain::{AgeRange, Category};
    use storyteller_core::locale::Language;
    use storyteller_core::validation::{validate, ValidatedStory};
    use uuid::Uuid;

    #[test]
    fn sample_story_is_valid_in_every_language() {
        for language in Language::ALL {
            let request = GenerationRequest::new(
                "A walk through the woods",
                Category::Nature,
                AgeRange::FiveToSix,
                language,
            )
            .unwrap();
            let content = sample_story(&request);
            assert_eq!(validate(&content), Ok(()));
            assert_eq!(content.category, Category::Nature);
            assert_eq!(content.age_range, AgeRange::FiveToSix);
        }
    }

    #[test]
    fn nearest_sample_ending_is_two_choices_away() {
        let request = GenerationRequest::new(
            "A walk through the woods",
            Category::Adventure,
            AgeRange::default(),
            Language::En,
        )
        .unwrap();
        let story = ValidatedStory::new(Uuid::new_v4(), sample_story(&request)).unwrap();
        assert_eq!(story.path_to_nearest_ending().map(|p| p.len()), Some(2));
    }
}
