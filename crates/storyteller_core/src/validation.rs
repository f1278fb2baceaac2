//! crates/storyteller_core/src/validation.rs
//!
//! Structural checks that decide whether a story graph can be read safely.
//!
//! `validate` never stops at the first structural problem: an author gets the
//! complete list in one pass. Only a malformed document (missing ids or
//! default-language text) short-circuits, because the graph checks assume
//! those fields are present.

use crate::domain::{Story, StoryContent, StoryNode};
use crate::locale::DEFAULT_LANGUAGE;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use uuid::Uuid;

//=========================================================================================
// Error Types
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum ValidationError {
    #[error("Story is malformed: {}", .0.join("; "))]
    MalformedStory(Vec<String>),
    #[error("Node id '{0}' is used more than once")]
    DuplicateNodeId(String),
    #[error("Start node '{0}' does not exist")]
    MissingStartNode(String),
    #[error("A choice on node '{from}' leads to unknown node '{target}'")]
    DanglingChoice { from: String, target: String },
    #[error("Node '{0}' must be an ending exactly when it has no choices")]
    EndingChoiceMismatch(String),
    #[error("Node '{0}' cannot be reached from the start node")]
    UnreachableNode(String),
    #[error("No ending can be reached from the start node")]
    NoReachableEnding,
}

/// Every problem found in one validation pass. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }

    pub fn contains(&self, error: &ValidationError) -> bool {
        self.0.contains(error)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s): ", self.0.len())?;
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

//=========================================================================================
// Validation
//=========================================================================================

/// Checks a candidate story document. Pure; the document is not modified.
pub fn validate(story: &StoryContent) -> Result<(), ValidationErrors> {
    let problems = malformed_problems(story);
    if !problems.is_empty() {
        return Err(ValidationErrors(vec![ValidationError::MalformedStory(problems)]));
    }

    let mut errors = Vec::new();

    // 1. Uniqueness. The first node carrying an id is the one choices resolve to.
    let mut index: HashMap<&str, &StoryNode> = HashMap::with_capacity(story.nodes.len());
    let mut duplicates = HashSet::new();
    for node in &story.nodes {
        if index.contains_key(node.id.as_str()) {
            if duplicates.insert(node.id.as_str()) {
                errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
            }
        } else {
            index.insert(node.id.as_str(), node);
        }
    }

    // 2. Start existence.
    let start_exists = index.contains_key(story.start_node_id.as_str());
    if !start_exists {
        errors.push(ValidationError::MissingStartNode(story.start_node_id.clone()));
    }

    // 3. Reference integrity.
    for node in &story.nodes {
        for choice in &node.choices {
            if !index.contains_key(choice.next_node_id.as_str()) {
                errors.push(ValidationError::DanglingChoice {
                    from: node.id.clone(),
                    target: choice.next_node_id.clone(),
                });
            }
        }
    }

    // 4. Ending consistency.
    for node in &story.nodes {
        if node.is_ending != node.choices.is_empty() {
            errors.push(ValidationError::EndingChoiceMismatch(node.id.clone()));
        }
    }

    // 5 & 6. Reachability and a reachable ending. Without a start node every
    // node would be reported unreachable, which only buries the real error.
    if start_exists {
        let reachable = reachable_from(&story.start_node_id, &index);
        let mut reported = HashSet::new();
        for node in &story.nodes {
            if !reachable.contains(node.id.as_str()) && reported.insert(node.id.as_str()) {
                errors.push(ValidationError::UnreachableNode(node.id.clone()));
            }
        }
        let ending_reachable = reachable
            .iter()
            .filter_map(|id| index.get(id))
            .any(|node| node.is_ending);
        if !ending_reachable {
            errors.push(ValidationError::NoReachableEnding);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Lists the required fields that are missing or blank.
fn malformed_problems(story: &StoryContent) -> Vec<String> {
    let mut problems = Vec::new();

    if !story.title.has_default() {
        problems.push(format!("story title has no '{DEFAULT_LANGUAGE}' text"));
    }
    if !story.summary.has_default() {
        problems.push(format!("story summary has no '{DEFAULT_LANGUAGE}' text"));
    }
    if story.start_node_id.trim().is_empty() {
        problems.push("startNodeId is empty".to_string());
    }
    if story.nodes.is_empty() {
        problems.push("story has no nodes".to_string());
    }

    for (position, node) in story.nodes.iter().enumerate() {
        let label = if node.id.trim().is_empty() {
            problems.push(format!("node #{position} has an empty id"));
            format!("#{position}")
        } else {
            format!("'{}'", node.id)
        };
        if !node.text.has_default() {
            problems.push(format!("node {label} has no '{DEFAULT_LANGUAGE}' text"));
        }
        for (choice_index, choice) in node.choices.iter().enumerate() {
            if !choice.text.has_default() {
                problems.push(format!(
                    "choice {choice_index} of node {label} has no '{DEFAULT_LANGUAGE}' text"
                ));
            }
            if choice.next_node_id.trim().is_empty() {
                problems.push(format!(
                    "choice {choice_index} of node {label} has an empty nextNodeId"
                ));
            }
        }
    }

    problems
}

/// Breadth-first walk over resolvable choices.
fn reachable_from<'a>(start: &'a str, index: &HashMap<&'a str, &'a StoryNode>) -> HashSet<&'a str> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start);
    queue.push_back(start);

    while let Some(id) = queue.pop_front() {
        let Some(node) = index.get(id) else {
            continue;
        };
        for choice in &node.choices {
            let next = choice.next_node_id.as_str();
            if index.contains_key(next) && visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    visited
}

//=========================================================================================
// ValidatedStory
//=========================================================================================

/// A story whose graph passed `validate`. The only form a reading session
/// accepts.
#[derive(Debug, Clone)]
pub struct ValidatedStory {
    id: Uuid,
    content: StoryContent,
    index: HashMap<String, usize>,
}

impl ValidatedStory {
    pub fn new(id: Uuid, content: StoryContent) -> Result<Self, ValidationErrors> {
        validate(&content)?;
        let index = content
            .nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.id.clone(), position))
            .collect();
        Ok(Self { id, content, index })
    }

    pub fn from_story(story: &Story) -> Result<Self, ValidationErrors> {
        Self::new(story.id, story.content.clone())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn content(&self) -> &StoryContent {
        &self.content
    }

    pub fn node(&self, id: &str) -> Option<&StoryNode> {
        self.index.get(id).map(|&position| &self.content.nodes[position])
    }

    pub fn start_node(&self) -> &StoryNode {
        self.node_at(&self.content.start_node_id)
    }

    /// Looks up a node id that came out of this story's own graph (the start
    /// id or a choice target), which validation guarantees resolves.
    pub(crate) fn node_at(&self, id: &str) -> &StoryNode {
        &self.content.nodes[self.index[id]]
    }

    /// The shortest sequence of choice indices from the start node to an
    /// ending. Empty when the start node is itself an ending.
    pub fn path_to_nearest_ending(&self) -> Option<Vec<usize>> {
        let start = self.content.start_node_id.as_str();
        let mut came_from: HashMap<&str, (&str, usize)> = HashMap::new();
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(id) = queue.pop_front() {
            let node = self.node_at(id);
            if node.is_ending {
                let mut path = Vec::new();
                let mut cursor = id;
                while let Some(&(parent, choice_index)) = came_from.get(cursor) {
                    path.push(choice_index);
                    cursor = parent;
                }
                path.reverse();
                return Some(path);
            }
            for (choice_index, choice) in node.choices.iter().enumerate() {
                let next = choice.next_node_id.as_str();
                if visited.insert(next) {
                    came_from.insert(next, (id, choice_index));
                    queue.push_back(next);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, Choice};
    use crate::locale::LocalizedText;

    fn story(start: &str, nodes: Vec<StoryNode>) -> StoryContent {
        StoryContent::new(
            LocalizedText::new("The Garden Gate"),
            LocalizedText::new("Which way will Mia go?"),
            Category::Nature,
            start,
            nodes,
        )
    }

    fn two_paths() -> StoryContent {
        story(
            "start",
            vec![
                StoryNode::page("start", "Mia stands at the gate.")
                    .with_choice(Choice::new("Take the sunny path", "sunny_path"))
                    .with_choice(Choice::new("Take the dark path", "dark_path")),
                StoryNode::ending("sunny_path", "Mia finds a picnic."),
                StoryNode::ending("dark_path", "Mia finds a sleepy owl."),
            ],
        )
    }

    fn errors_of(content: &StoryContent) -> Vec<ValidationError> {
        validate(content).unwrap_err().into_vec()
    }

    #[test]
    fn well_formed_story_passes() {
        assert_eq!(validate(&two_paths()), Ok(()));
    }

    #[test]
    fn non_ending_without_choices_is_a_mismatch() {
        let mut content = two_paths();
        content.nodes[2].is_ending = false;
        assert_eq!(
            errors_of(&content),
            vec![ValidationError::EndingChoiceMismatch("dark_path".to_string())]
        );
    }

    #[test]
    fn ending_with_choices_is_a_mismatch() {
        let mut content = two_paths();
        content.nodes[1]
            .choices
            .push(Choice::new("Go back", "start"));
        assert_eq!(
            errors_of(&content),
            vec![ValidationError::EndingChoiceMismatch("sunny_path".to_string())]
        );
    }

    #[test]
    fn all_structural_errors_are_collected_in_order() {
        let content = story(
            "start",
            vec![
                StoryNode::page("start", "Begin.").with_choice(Choice::new("On", "middle")),
                StoryNode::page("middle", "Still going.").with_choice(Choice::new("Onwards", "nowhere")),
                StoryNode::page("middle", "Twin.").with_choice(Choice::new("Back", "start")),
                StoryNode::ending("island", "Nobody gets here."),
            ],
        );

        assert_eq!(
            errors_of(&content),
            vec![
                ValidationError::DuplicateNodeId("middle".to_string()),
                ValidationError::DanglingChoice {
                    from: "middle".to_string(),
                    target: "nowhere".to_string(),
                },
                ValidationError::UnreachableNode("island".to_string()),
                ValidationError::NoReachableEnding,
            ]
        );
    }

    #[test]
    fn missing_start_skips_reachability_checks() {
        let mut content = two_paths();
        content.start_node_id = "prologue".to_string();
        assert_eq!(
            errors_of(&content),
            vec![ValidationError::MissingStartNode("prologue".to_string())]
        );
    }

    #[test]
    fn cycles_are_allowed_when_an_ending_is_reachable() {
        let content = story(
            "hall",
            vec![
                StoryNode::page("hall", "A long hall.")
                    .with_choice(Choice::new("Open the door", "room"))
                    .with_choice(Choice::new("Walk the hall again", "hall")),
                StoryNode::page("room", "A cosy room.")
                    .with_choice(Choice::new("Back to the hall", "hall"))
                    .with_choice(Choice::new("Go to bed", "bed")),
                StoryNode::ending("bed", "Good night."),
            ],
        );
        assert_eq!(validate(&content), Ok(()));
    }

    #[test]
    fn closed_loop_has_no_reachable_ending() {
        let content = story(
            "a",
            vec![
                StoryNode::page("a", "Round").with_choice(Choice::new("next", "b")),
                StoryNode::page("b", "and round").with_choice(Choice::new("next", "a")),
                StoryNode::ending("c", "Unreachable end"),
            ],
        );
        assert_eq!(
            errors_of(&content),
            vec![
                ValidationError::UnreachableNode("c".to_string()),
                ValidationError::NoReachableEnding,
            ]
        );
    }

    #[test]
    fn malformed_documents_short_circuit() {
        let mut content = two_paths();
        content.title = LocalizedText::default();
        content.nodes[0].choices[1].next_node_id = String::new();
        content.nodes[2].id = String::new();

        let errors = errors_of(&content);
        assert_eq!(errors.len(), 1);
        let ValidationError::MalformedStory(problems) = &errors[0] else {
            panic!("expected MalformedStory, got {errors:?}");
        };
        assert_eq!(
            problems,
            &vec![
                "story title has no 'en' text".to_string(),
                "choice 1 of node 'start' has an empty nextNodeId".to_string(),
                "node #2 has an empty id".to_string(),
            ]
        );
    }

    #[test]
    fn empty_story_is_malformed() {
        let content = story("", Vec::new());
        let errors = errors_of(&content);
        assert!(matches!(&errors[..], [ValidationError::MalformedStory(p)] if p.len() == 2));
    }

    #[test]
    fn errors_serialize_with_kind_tags() {
        let error = ValidationError::DanglingChoice {
            from: "a".to_string(),
            target: "b".to_string(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "danglingChoice", "detail": {"from": "a", "target": "b"}})
        );
        let unit = serde_json::to_value(ValidationError::NoReachableEnding).unwrap();
        assert_eq!(unit, serde_json::json!({"kind": "noReachableEnding"}));
    }

    #[test]
    fn validated_story_finds_shortest_ending_path() {
        let content = story(
            "a",
            vec![
                StoryNode::page("a", "A")
                    .with_choice(Choice::new("long way", "b"))
                    .with_choice(Choice::new("short way", "c")),
                StoryNode::page("b", "B").with_choice(Choice::new("on", "c")),
                StoryNode::page("c", "C")
                    .with_choice(Choice::new("loop", "a"))
                    .with_choice(Choice::new("finish", "end")),
                StoryNode::ending("end", "The end"),
            ],
        );
        let validated = ValidatedStory::new(Uuid::new_v4(), content).unwrap();
        assert_eq!(validated.path_to_nearest_ending(), Some(vec![1, 1]));
        assert_eq!(validated.node("b").map(|n| n.text.resolve("en")), Some(Ok("B")));
        assert!(validated.node("zzz").is_none());
    }
}
