pub mod postgres;
pub mod recommendations;

pub use postgres::create_pool;
pub use postgres::run_migrations;
pub use recommendations::PgRecommendationStore;
pub use recommendations::RecommendationStore;
