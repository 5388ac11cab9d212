/// Recommendation model gateway
///
/// Turns a user's history and the upcoming programme into a chat completion
/// request against an OpenAI-compatible backend (OpenRouter by default) and
/// parses the single JSON object the model is told to answer with.
///
/// The gateway does not check that the chosen movie is one of the candidates;
/// the generator owns that fallback policy.
use std::fmt::Write;
use std::time::Duration;

use reqwest::Client as HttpClient;

use crate::{
    error::{AppError, AppResult},
    models::{
        clamp_confidence, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
        ModelRecommendation, RecommendationRequest,
    },
};

const SYSTEM_PROMPT: &str = "You are a movie recommendation assistant for a cinema. \
Based on the user's viewing history and the upcoming movies, recommend ONE movie that would best suit this user. \
Respond ONLY with valid JSON in this exact format: \
{\"movie_id\": \"<id>\", \"movie_title\": \"<title>\", \"reason\": \"<personalized explanation>\", \"confidence_score\": <0.0-1.0>}. \
Do not include any other text.";

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecommendationModel: Send + Sync {
    /// Picks one upcoming movie for the user described by `request`
    async fn recommend(&self, request: RecommendationRequest) -> AppResult<ModelRecommendation>;
}

/// Connection settings for the chat completions backend
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl From<&crate::config::Config> for ModelSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            api_key: config.openrouter_api_key.clone(),
            model: config.openrouter_model.clone(),
            base_url: config.openrouter_base_url.clone(),
            max_tokens: config.openrouter_max_tokens,
            temperature: config.openrouter_temperature,
            timeout: config.openrouter_timeout(),
        }
    }
}

// No Debug derive: the settings carry the API key
pub struct OpenRouterRecommender {
    http_client: HttpClient,
    settings: ModelSettings,
}

impl OpenRouterRecommender {
    pub fn new(settings: ModelSettings) -> AppResult<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "OPENROUTER_API_KEY must not be empty".to_string(),
            ));
        }
        if settings.model.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "OPENROUTER_MODEL must not be empty".to_string(),
            ));
        }

        tracing::info!(
            model = %settings.model,
            max_tokens = settings.max_tokens,
            base_url = %settings.base_url,
            "Recommendation model initialized"
        );

        let http_client = HttpClient::builder().timeout(settings.timeout).build()?;

        Ok(Self {
            http_client,
            settings,
        })
    }

    fn build_request(&self, request: &RecommendationRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(build_prompt(request)),
            ],
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }
}

#[async_trait::async_trait]
impl RecommendationModel for OpenRouterRecommender {
    async fn recommend(&self, request: RecommendationRequest) -> AppResult<ModelRecommendation> {
        if request.upcoming_movies.is_empty() {
            return Err(AppError::NoCandidates);
        }

        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );

        tracing::info!(model = %self.settings.model, "Requesting recommendation from model");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&self.build_request(&request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Model(format!(
                "backend returned status {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = response.json().await?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::Model("no recommendation generated".to_string()))?;

        tracing::debug!(content = %content, "Model response received");

        parse_reply(&content)
    }
}

/// Renders the user-role prompt. Output depends only on `request`.
pub fn build_prompt(request: &RecommendationRequest) -> String {
    let mut prompt = String::from("User's viewing history:\n");

    if request.user_history.is_empty() {
        prompt.push_str("No previous viewing history available.\n");
    } else {
        for movie in &request.user_history {
            let _ = writeln!(prompt, "- {} (Rating: {:.1}/10)", movie.title, movie.rating);
        }
    }

    prompt.push_str("\nUpcoming movies:\n");
    for movie in &request.upcoming_movies {
        let _ = writeln!(
            prompt,
            "- ID: {}, Title: {}, Description: {}, Rating: {:.1}/10",
            movie.id, movie.title, movie.description, movie.rating
        );
    }

    prompt.push_str(
        "\nPlease recommend ONE movie from the upcoming list that would best suit this user \
         based on their history. Provide a personalized reason for your recommendation.",
    );

    prompt
}

/// Parses the model's JSON answer and clamps its confidence score
///
/// A markdown code fence around the object is tolerated; anything else
/// that is not exactly one JSON object is an error.
pub fn parse_reply(content: &str) -> AppResult<ModelRecommendation> {
    let json = strip_code_fence(content.trim());

    let mut recommendation: ModelRecommendation = serde_json::from_str(json).map_err(|e| {
        tracing::error!(content = %content, error = %e, "Failed to parse model response");
        AppError::Model(format!("failed to parse recommendation response: {}", e))
    })?;

    recommendation.confidence_score = clamp_confidence(recommendation.confidence_score);
    recommendation.raw_reply = content.to_string();

    Ok(recommendation)
}

fn strip_code_fence(content: &str) -> &str {
    match content.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => content,
    }
}
