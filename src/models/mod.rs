pub mod llm;
pub mod recommendation;
pub mod upstream;

pub use llm::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatResponseMessage,
    ModelRecommendation, MovieHistory, RecommendationRequest, UpcomingMovie,
};
pub use recommendation::{
    clamp_confidence, NewRecommendation, Page, Pagination, Recommendation, RecommendationStatus,
    SortField, SortOptions, SortOrder,
};
pub use upstream::{
    DataEnvelope, Movie, Reservation, ReservationType, TimeSlot, User, UserRole,
};
