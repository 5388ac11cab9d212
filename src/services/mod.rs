pub mod generator;
pub mod providers;
pub mod recommender;
pub mod scheduler;
pub mod worker;

pub use generator::{Collaborators, GeneratorSettings, RecommendationGenerator};
pub use recommender::{ModelSettings, OpenRouterRecommender, RecommendationModel};
pub use scheduler::start_scheduler;
pub use worker::{
    BatchRunner, BatchSummary, BatchWorker, JobRecord, JobScope, JobState, JobTicket, JobTrigger,
    WorkerHandle, WorkerShutdown,
};
