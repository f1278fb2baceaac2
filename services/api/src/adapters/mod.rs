pub mod db;
pub mod memory;
pub mod sample_story;
pub mod story_llm;

pub use db::DbAdapter;
pub use memory::InMemoryDatabase;
pub use sample_story::SampleStoryGenerator;
pub use story_llm::OpenAiStoryAdapter;
