use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A movie the user has already seen, as shown to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieHistory {
    pub movie_id: Uuid,
    pub title: String,
    pub rating: f64,
}

/// A candidate movie with an upcoming showing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingMovie {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_history: Vec<MovieHistory>,
    pub upcoming_movies: Vec<UpcomingMovie>,
}

/// The model's structured answer
///
/// `movie_id` is kept as the raw string the model produced; checking it
/// against the candidate list is the caller's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecommendation {
    #[serde(alias = "item_id")]
    pub movie_id: String,
    #[serde(alias = "item_title", default)]
    pub movie_title: String,
    pub reason: String,
    pub confidence_score: f64,
    #[serde(skip)]
    pub raw_reply: String,
}

// ============================================================================
// OpenAI-compatible chat completions API types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}
