//! services/api/src/adapters/story_llm.rs
//!
//! This module contains the adapter for the story-writing LLM.
//! It implements the `StoryGenerationService` port from the `core` crate.
//!
//! The model is asked for the story graph as JSON. Whatever it returns is only
//! a candidate: the caller validates it before anything is stored.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use storyteller_core::{
    domain::{GenerationRequest, StoryContent, StoryNode},
    locale::LocalizedText,
    ports::{PortError, PortResult, StoryGenerationService},
};

/// Cover image used for every generated story until illustrations exist.
pub const DEFAULT_THUMBNAIL_URL: &str =
    "https://images.pexels.com/photos/1001914/pexels-photo-1001914.jpeg?auto=compress&cs=tinysrgb&w=400";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `StoryGenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiStoryAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiStoryAdapter {
    /// Creates a new `OpenAiStoryAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn system_prompt(request: &GenerationRequest) -> String {
    let age_range = request.age_range;
    let language = request.language.code();
    format!(
        "You are a creative children's story writer specializing in interactive stories for ages {age_range}. \
Create engaging, age-appropriate stories with branching choices that teach positive values.

Return only a JSON object with this exact structure:
{{
  \"title\": {{\"en\": \"Story Title\", \"{language}\": \"Translated Title\"}},
  \"summary\": {{\"en\": \"Brief summary\", \"{language}\": \"Translated summary\"}},
  \"startNodeId\": \"start\",
  \"nodes\": [
    {{
      \"id\": \"start\",
      \"text\": {{\"en\": \"Story text\", \"{language}\": \"Translated text\"}},
      \"imageUrl\": \"description of scene for illustration\",
      \"choices\": [
        {{\"text\": {{\"en\": \"Choice text\", \"{language}\": \"Translated choice\"}}, \"nextNodeId\": \"node2\", \"emoji\": \"🌟\"}}
      ],
      \"isEnding\": false
    }}
  ]
}}

Rules:
- Create 5-8 interconnected story nodes.
- Every node that is not an ending has 2-3 choices; every ending has \"isEnding\": true and no choices.
- Every nextNodeId must be the id of a node in the list, and every node must be reachable from the start.
- Include at least 2 different endings.
- Write the {language} translations in {}.
- Use simple, engaging language with positive themes like friendship, courage and kindness.
- Keep each node to 2-4 short sentences.",
        request.language.display_name()
    )
}

/// The part of the story document the model writes. Catalogue fields come
/// from the request instead.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedStory {
    #[serde(default)]
    title: LocalizedText,
    #[serde(default)]
    summary: LocalizedText,
    #[serde(default)]
    start_node_id: String,
    #[serde(default)]
    nodes: Vec<StoryNode>,
}

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex is valid"))
}

/// Pulls the story JSON out of a model reply, which may wrap it in prose or
/// a code fence.
pub fn parse_story_reply(reply: &str, request: &GenerationRequest) -> PortResult<StoryContent> {
    let json = json_object_pattern()
        .find(reply)
        .map(|m| m.as_str())
        .unwrap_or(reply);
    let generated: GeneratedStory = serde_json::from_str(json).map_err(|e| {
        PortError::Unexpected(format!("Story generation returned unreadable JSON: {}", e))
    })?;

    let mut content = StoryContent::new(
        generated.title,
        generated.summary,
        request.category,
        generated.start_node_id,
        generated.nodes,
    );
    content.age_range = request.age_range;
    content.thumbnail_url = Some(DEFAULT_THUMBNAIL_URL.to_string());
    Ok(content)
}

//=========================================================================================
// `StoryGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoryGenerationService for OpenAiStoryAdapter {
    async fn generate_story(&self, request: &GenerationRequest) -> PortResult<StoryContent> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(request))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!(
                    "Create an interactive {} story based on this idea: \"{}\". \
                     Make it engaging for children aged {}. Include choices that matter and lead to different outcomes.",
                    request.category, request.prompt, request.age_range
                ))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.8)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Story generation LLM returned no text content.".to_string())
            })?;

        parse_story_reply(&reply, request)
    }
}
