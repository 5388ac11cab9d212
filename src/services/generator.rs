use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    config::Config,
    db::RecommendationStore,
    error::{AppError, AppResult, Stage},
    messaging::{EmailMessage, NotificationPublisher, RECOMMENDATION_TEMPLATE},
    models::{
        ModelRecommendation, Movie, MovieHistory, NewRecommendation, Recommendation,
        RecommendationRequest, TimeSlot, UpcomingMovie, User,
    },
    services::{
        providers::{CatalogProvider, IdentityProvider, ReservationProvider},
        recommender::RecommendationModel,
        worker::{BatchRunner, BatchSummary},
    },
};

/// Tunables for the per-user pipeline
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub lookahead_days: i64,
    pub reservation_base_url: String,
}

impl From<&Config> for GeneratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            lookahead_days: config.recommendation_lookahead_days,
            reservation_base_url: config.reservation_base_url.clone(),
        }
    }
}

/// Everything the generator talks to
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub reservations: Arc<dyn ReservationProvider>,
    pub catalog: Arc<dyn CatalogProvider>,
    pub model: Arc<dyn RecommendationModel>,
    pub store: Arc<dyn RecommendationStore>,
    pub publisher: Arc<dyn NotificationPublisher>,
}

/// Produces, stores and sends one recommendation per user
pub struct RecommendationGenerator {
    identity: Arc<dyn IdentityProvider>,
    reservations: Arc<dyn ReservationProvider>,
    catalog: Arc<dyn CatalogProvider>,
    model: Arc<dyn RecommendationModel>,
    store: Arc<dyn RecommendationStore>,
    publisher: Arc<dyn NotificationPublisher>,
    settings: GeneratorSettings,
}

impl RecommendationGenerator {
    pub fn new(collaborators: Collaborators, settings: GeneratorSettings) -> Self {
        Self {
            identity: collaborators.identity,
            reservations: collaborators.reservations,
            catalog: collaborators.catalog,
            model: collaborators.model,
            store: collaborators.store,
            publisher: collaborators.publisher,
            settings,
        }
    }

    /// Runs the pipeline for every active user, one after another
    ///
    /// Only failing to list the users aborts the run. Per-user failures are
    /// logged and counted. Once `deadline` passes, the user in flight is
    /// abandoned and every user not yet started counts as failed.
    pub async fn generate_for_all_users(&self, deadline: Instant) -> AppResult<BatchSummary> {
        let users = self
            .identity
            .get_active_users()
            .await
            .map_err(AppError::at(Stage::FetchUsers))?;

        let mut summary = BatchSummary {
            total: users.len(),
            ..BatchSummary::default()
        };

        tracing::info!(total = summary.total, "Starting recommendation run");

        for (index, user) in users.iter().enumerate() {
            if Instant::now() >= deadline {
                let remaining = users.len() - index;
                summary.failed += remaining;
                tracing::warn!(remaining, "Run deadline reached, skipping remaining users");
                break;
            }

            match self.generate_until(user, deadline).await {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        user_id = %user.id,
                        error = %e,
                        "Failed to generate recommendation for user"
                    );
                }
            }
        }

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Recommendation run finished"
        );

        Ok(summary)
    }

    /// Resolves a single user through the identity service and runs the pipeline
    pub async fn generate_for_user_id(&self, user_id: Uuid, deadline: Instant) -> AppResult<()> {
        let user = tokio::time::timeout_at(deadline, self.identity.get_user(user_id))
            .await
            .map_err(|_| AppError::DeadlineExceeded)?
            .map_err(AppError::at(Stage::FetchUser))?;

        self.generate_until(&user, deadline).await
    }

    async fn generate_until(&self, user: &User, deadline: Instant) -> AppResult<()> {
        tokio::time::timeout_at(deadline, self.generate_for_user(user))
            .await
            .map_err(|_| AppError::DeadlineExceeded)?
    }

    /// Generates, persists and publishes one recommendation for `user`
    pub async fn generate_for_user(&self, user: &User) -> AppResult<()> {
        tracing::info!(user_id = %user.id, "Generating recommendation");

        let user_history = self.viewing_history(user.id).await?;

        let upcoming_movies = self.upcoming_movies().await?;
        if upcoming_movies.is_empty() {
            return Err(AppError::NoCandidates);
        }

        let request = RecommendationRequest {
            user_history,
            upcoming_movies,
        };

        let mut answer = self
            .model
            .recommend(request.clone())
            .await
            .map_err(AppError::at(Stage::GenerateRecommendation))?;

        let (movie_id, rejected_id) = apply_fallback(&mut answer, &request.upcoming_movies)?;
        let fallback_applied = rejected_id.is_some();
        if let Some(recommended_id) = rejected_id {
            tracing::warn!(
                user_id = %user.id,
                recommended_id = %recommended_id,
                fallback_id = %movie_id,
                "Model chose a movie outside the upcoming programme, using the first candidate"
            );
        }

        let movie = self
            .catalog
            .get_movie(movie_id)
            .await
            .map_err(AppError::at(Stage::FetchRecommendedMovie))?;
        if movie.id != movie_id {
            return Err(AppError::at(Stage::FetchRecommendedMovie)(AppError::NotFound(
                format!("movie {} (catalog returned {})", movie_id, movie.id),
            )));
        }

        let generation_context = json!({
            "user_history": request.user_history,
            "upcoming_movies": request.upcoming_movies,
            "ai_response": answer,
            "raw_reply": answer.raw_reply,
            "fallback_applied": fallback_applied,
        });

        let recommendation = self
            .store
            .create(Recommendation::pending(NewRecommendation {
                user_id: user.id,
                movie_id,
                reason: answer.reason.clone(),
                confidence_score: answer.confidence_score,
                generation_context,
                email_to: user.email.clone(),
                email_subject: format!("Perfect Movie for You: {}", movie.title),
            }))
            .await
            .map_err(AppError::at(Stage::SaveRecommendation))?;

        let message = EmailMessage::new(
            user.email.clone(),
            RECOMMENDATION_TEMPLATE,
            merge_fields(
                user,
                &movie,
                &recommendation.reason,
                &self.settings.reservation_base_url,
            ),
        );

        if let Err(e) = self.publisher.publish(message).await {
            if let Err(mark_err) = self.store.mark_failed(recommendation.id).await {
                tracing::error!(
                    recommendation_id = %recommendation.id,
                    error = %mark_err,
                    "Failed to mark recommendation as failed"
                );
            }
            return Err(AppError::at(Stage::PublishNotification)(e));
        }

        if let Err(e) = self.store.mark_sent(recommendation.id).await {
            tracing::error!(
                recommendation_id = %recommendation.id,
                error = %e,
                "Failed to mark recommendation as sent"
            );
        }

        tracing::info!(
            user_id = %user.id,
            recommendation_id = %recommendation.id,
            movie_id = %movie_id,
            confidence = recommendation.confidence_score,
            "Recommendation sent"
        );

        Ok(())
    }

    /// Movies the user has reserved before, first occurrence wins
    async fn viewing_history(&self, user_id: Uuid) -> AppResult<Vec<MovieHistory>> {
        let reservations = self
            .reservations
            .get_user_reservations(user_id)
            .await
            .map_err(AppError::at(Stage::FetchReservations))?;

        let mut seen = HashSet::new();
        let mut history = Vec::new();

        for reservation in reservations {
            let timeslot = match self.catalog.get_timeslot(reservation.timeslot_id).await {
                Ok(timeslot) => timeslot,
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        timeslot_id = %reservation.timeslot_id,
                        error = %e,
                        "Skipping reservation with unresolvable showing"
                    );
                    continue;
                }
            };

            if seen.insert(timeslot.movie.id) {
                history.push(MovieHistory {
                    movie_id: timeslot.movie.id,
                    title: timeslot.movie.title,
                    rating: timeslot.movie.rating,
                });
            }
        }

        Ok(history)
    }

    async fn upcoming_movies(&self) -> AppResult<Vec<UpcomingMovie>> {
        let start = Utc::now();
        let end = start + chrono::Duration::days(self.settings.lookahead_days);

        let timeslots = self
            .catalog
            .get_upcoming_timeslots(start, end)
            .await
            .map_err(AppError::at(Stage::FetchSchedule))?;

        Ok(collect_candidates(timeslots))
    }
}

#[async_trait::async_trait]
impl BatchRunner for RecommendationGenerator {
    async fn run_batch(&self, deadline: Instant) -> AppResult<BatchSummary> {
        self.generate_for_all_users(deadline).await
    }

    async fn run_for_user(&self, user_id: Uuid, deadline: Instant) -> AppResult<BatchSummary> {
        let mut summary = BatchSummary {
            total: 1,
            ..BatchSummary::default()
        };

        match self.generate_for_user_id(user_id, deadline).await {
            Ok(()) => summary.succeeded = 1,
            Err(e) => {
                summary.failed = 1;
                tracing::error!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to generate recommendation for user"
                );
            }
        }

        Ok(summary)
    }
}

/// Distinct movies of the upcoming showings, in encounter order
fn collect_candidates(timeslots: Vec<TimeSlot>) -> Vec<UpcomingMovie> {
    let mut seen = HashSet::new();

    timeslots
        .into_iter()
        .filter(|timeslot| seen.insert(timeslot.movie.id))
        .map(|timeslot| UpcomingMovie {
            id: timeslot.movie.id,
            title: timeslot.movie.title,
            description: timeslot.movie.description,
            rating: timeslot.movie.rating,
        })
        .collect()
}

/// Pins the answer to a candidate
///
/// Returns the chosen movie id and, when the first candidate had to be
/// substituted, the unknown or malformed id the model answered with.
fn apply_fallback(
    answer: &mut ModelRecommendation,
    candidates: &[UpcomingMovie],
) -> AppResult<(Uuid, Option<String>)> {
    let chosen = Uuid::parse_str(answer.movie_id.trim())
        .ok()
        .filter(|id| candidates.iter().any(|candidate| candidate.id == *id));

    if let Some(id) = chosen {
        return Ok((id, None));
    }

    let first = candidates.first().ok_or(AppError::NoCandidates)?;
    let rejected = std::mem::replace(&mut answer.movie_id, first.id.to_string());
    answer.movie_title = first.title.clone();

    Ok((first.id, Some(rejected)))
}

/// Template merge fields for the recommendation email
fn merge_fields(
    user: &User,
    movie: &Movie,
    reason: &str,
    reservation_base_url: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("UserName".to_string(), user.first_name.clone()),
        ("MovieTitle".to_string(), movie.title.clone()),
        ("MovieDescription".to_string(), movie.description.clone()),
        ("MovieRating".to_string(), format!("{:.1}/10", movie.rating)),
        ("RecommendationReason".to_string(), reason.to_string()),
        (
            "ReservationURL".to_string(),
            format!("{}?movie={}", reservation_base_url, movie.id),
        ),
        ("ImageURL".to_string(), movie.image_url.clone()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::recommendations::MockRecommendationStore,
        messaging::publisher::MockNotificationPublisher,
        models::{RecommendationStatus, Reservation, ReservationType, UserRole},
        services::{
            providers::{MockCatalogProvider, MockIdentityProvider, MockReservationProvider},
            recommender::MockRecommendationModel,
        },
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn user(name: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", name.to_lowercase()),
            first_name: name.to_string(),
            last_name: "Novak".to_string(),
            role: UserRole::Customer,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn movie(title: &str) -> Movie {
        Movie {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: format!("{} description", title),
            image_url: format!("https://img.example.com/{}.jpg", title.to_lowercase()),
            rating: 8.2,
            length_minutes: 120,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn timeslot(movie: &Movie) -> TimeSlot {
        TimeSlot {
            id: Uuid::new_v4(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            room_id: Uuid::new_v4(),
            movie_id: movie.id,
            movie: movie.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn reservation(user_id: Uuid, timeslot_id: Uuid) -> Reservation {
        Reservation {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            timeslot_id,
            user_id,
            reservation_type: ReservationType::Online,
            row: 4,
            col: 7,
        }
    }

    fn answer(movie_id: &str, confidence_score: f64) -> ModelRecommendation {
        ModelRecommendation {
            movie_id: movie_id.to_string(),
            movie_title: "Whatever".to_string(),
            reason: "You will love it".to_string(),
            confidence_score,
            raw_reply: "{\"movie_id\": \"...\"}".to_string(),
        }
    }

    fn settings() -> GeneratorSettings {
        GeneratorSettings {
            lookahead_days: 7,
            reservation_base_url: "https://cinema.example.com/reserve".to_string(),
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    struct Mocks {
        identity: MockIdentityProvider,
        reservations: MockReservationProvider,
        catalog: MockCatalogProvider,
        model: MockRecommendationModel,
        store: MockRecommendationStore,
        publisher: MockNotificationPublisher,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                identity: MockIdentityProvider::new(),
                reservations: MockReservationProvider::new(),
                catalog: MockCatalogProvider::new(),
                model: MockRecommendationModel::new(),
                store: MockRecommendationStore::new(),
                publisher: MockNotificationPublisher::new(),
            }
        }

        fn into_generator(self) -> RecommendationGenerator {
            RecommendationGenerator::new(
                Collaborators {
                    identity: Arc::new(self.identity),
                    reservations: Arc::new(self.reservations),
                    catalog: Arc::new(self.catalog),
                    model: Arc::new(self.model),
                    store: Arc::new(self.store),
                    publisher: Arc::new(self.publisher),
                },
                settings(),
            )
        }
    }

    /// Mocks for a user with no history and the given programme, where every
    /// downstream step succeeds
    fn happy_mocks(programme: Vec<Movie>, chosen: String, confidence: f64) -> Mocks {
        let mut mocks = Mocks::new();

        mocks
            .reservations
            .expect_get_user_reservations()
            .returning(|_| Ok(vec![]));

        let slots: Vec<TimeSlot> = programme.iter().map(timeslot).collect();
        mocks
            .catalog
            .expect_get_upcoming_timeslots()
            .returning(move |_, _| Ok(slots.clone()));

        let by_id: HashMap<Uuid, Movie> = programme.iter().map(|m| (m.id, m.clone())).collect();
        mocks
            .catalog
            .expect_get_movie()
            .returning(move |id| {
                by_id
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(id.to_string()))
            });

        mocks
            .model
            .expect_recommend()
            .returning(move |_| Ok(answer(&chosen, confidence)));

        mocks.store.expect_create().returning(Ok);
        mocks.publisher.expect_publish().returning(|_| Ok(()));
        mocks.store.expect_mark_sent().returning(|_| Ok(()));

        mocks
    }

    #[test]
    fn test_collect_candidates_dedupes_in_encounter_order() {
        let a = movie("A");
        let b = movie("B");
        let c = movie("C");
        let slots = vec![timeslot(&a), timeslot(&b), timeslot(&a), timeslot(&c)];

        let titles: Vec<String> = collect_candidates(slots)
            .into_iter()
            .map(|candidate| candidate.title)
            .collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_apply_fallback_keeps_valid_choice() {
        let candidates = collect_candidates(vec![timeslot(&movie("A")), timeslot(&movie("B"))]);
        let mut chosen = answer(&candidates[1].id.to_string(), 0.8);

        let (id, rejected) = apply_fallback(&mut chosen, &candidates).unwrap();
        assert_eq!(id, candidates[1].id);
        assert_eq!(rejected, None);
        assert_eq!(chosen.movie_title, "Whatever");
    }

    #[test]
    fn test_apply_fallback_substitutes_first_candidate() {
        let candidates = collect_candidates(vec![timeslot(&movie("A")), timeslot(&movie("B"))]);

        for bogus in ["not-a-uuid".to_string(), Uuid::new_v4().to_string()] {
            let mut chosen = answer(&bogus, 0.8);
            let (id, rejected) = apply_fallback(&mut chosen, &candidates).unwrap();
            assert_eq!(id, candidates[0].id);
            assert_eq!(rejected.as_deref(), Some(bogus.as_str()));
            assert_eq!(chosen.movie_id, candidates[0].id.to_string());
            assert_eq!(chosen.movie_title, "A");
        }
    }

    #[test]
    fn test_merge_fields() {
        let person = user("Ana");
        let mut film = movie("Inception");
        film.rating = 8.75;

        let fields = merge_fields(&person, &film, "Mind-bending", "https://cinema.example.com/reserve");

        assert_eq!(fields["UserName"], "Ana");
        assert_eq!(fields["MovieTitle"], "Inception");
        assert_eq!(fields["MovieRating"], "8.8/10");
        assert_eq!(fields["RecommendationReason"], "Mind-bending");
        assert_eq!(
            fields["ReservationURL"],
            format!("https://cinema.example.com/reserve?movie={}", film.id)
        );
        assert_eq!(fields["ImageURL"], "https://img.example.com/inception.jpg");
        assert_eq!(fields.len(), 7);
    }

    #[tokio::test]
    async fn test_generate_for_user_happy_path() {
        let a = movie("Arrival");
        let b = movie("Blade Runner");
        let person = user("Ana");
        let email = person.email.clone();
        let b_id = b.id;

        let mut mocks = Mocks::new();
        mocks
            .reservations
            .expect_get_user_reservations()
            .returning(|_| Ok(vec![]));
        let slots = vec![timeslot(&a), timeslot(&b)];
        mocks
            .catalog
            .expect_get_upcoming_timeslots()
            .times(1)
            .returning(move |_, _| Ok(slots.clone()));
        let chosen = b.clone();
        mocks
            .catalog
            .expect_get_movie()
            .withf(move |id| *id == b_id)
            .returning(move |_| Ok(chosen.clone()));
        mocks
            .model
            .expect_recommend()
            .withf(|request| {
                request.user_history.is_empty() && request.upcoming_movies.len() == 2
            })
            .returning(move |_| Ok(answer(&b_id.to_string(), 0.85)));
        mocks
            .store
            .expect_create()
            .times(1)
            .withf(move |rec| {
                rec.movie_id == b_id
                    && rec.status == RecommendationStatus::Pending
                    && rec.confidence_score == 0.85
                    && rec.email_subject == "Perfect Movie for You: Blade Runner"
                    && rec.generation_context["fallback_applied"] == false
            })
            .returning(Ok);
        mocks
            .publisher
            .expect_publish()
            .times(1)
            .withf(move |message| {
                message.to == email
                    && message.template == "recommendation"
                    && message.data["MovieTitle"] == "Blade Runner"
                    && message.data["UserName"] == "Ana"
            })
            .returning(|_| Ok(()));
        mocks.store.expect_mark_sent().times(1).returning(|_| Ok(()));
        mocks.store.expect_mark_failed().never();

        let generator = mocks.into_generator();
        generator.generate_for_user(&person).await.unwrap();
    }

    #[tokio::test]
    async fn test_history_is_deduplicated_and_skips_unresolvable_showings() {
        let a = movie("A");
        let b = movie("B");
        let c = movie("C");
        let person = user("Ana");

        let slots = [timeslot(&a), timeslot(&b), timeslot(&a), timeslot(&c)];
        let broken_slot = Uuid::new_v4();

        let mut reservations: Vec<Reservation> =
            slots.iter().map(|slot| reservation(person.id, slot.id)).collect();
        reservations.insert(1, reservation(person.id, broken_slot));

        let mut mocks = happy_mocks(vec![c.clone()], c.id.to_string(), 0.9);
        mocks.reservations = MockReservationProvider::new();
        mocks
            .reservations
            .expect_get_user_reservations()
            .returning(move |_| Ok(reservations.clone()));

        let by_id: HashMap<Uuid, TimeSlot> =
            slots.iter().map(|slot| (slot.id, slot.clone())).collect();
        mocks
            .catalog
            .expect_get_timeslot()
            .times(5)
            .returning(move |id| {
                by_id
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(format!("timeslot {}", id)))
            });

        mocks.model = MockRecommendationModel::new();
        let c_id = c.id;
        mocks
            .model
            .expect_recommend()
            .withf(|request| {
                let titles: Vec<&str> = request
                    .user_history
                    .iter()
                    .map(|movie| movie.title.as_str())
                    .collect();
                titles == ["A", "B", "C"]
            })
            .returning(move |_| Ok(answer(&c_id.to_string(), 0.9)));

        let generator = mocks.into_generator();
        generator.generate_for_user(&person).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_model_choice_falls_back_to_first_candidate() {
        let a = movie("Arrival");
        let b = movie("Blade Runner");
        let a_id = a.id;

        let mut mocks = happy_mocks(vec![a, b], "00000000-0000-0000-0000-000000000000".to_string(), 0.6);
        mocks.store = MockRecommendationStore::new();
        mocks
            .store
            .expect_create()
            .times(1)
            .withf(move |rec| {
                rec.movie_id == a_id
                    && rec.generation_context["fallback_applied"] == true
                    && rec.generation_context["ai_response"]["movie_title"] == "Arrival"
            })
            .returning(Ok);
        mocks.store.expect_mark_sent().returning(|_| Ok(()));

        let generator = mocks.into_generator();
        generator.generate_for_user(&user("Ana")).await.unwrap();
    }

    #[tokio::test]
    async fn test_catalog_returning_other_movie_is_rejected() {
        let a = movie("Arrival");
        let a_id = a.id;
        let impostor = movie("Zardoz");

        let slots = vec![timeslot(&a)];
        let mut mocks = happy_mocks(vec![a], a_id.to_string(), 0.8);
        mocks.catalog = MockCatalogProvider::new();
        mocks
            .catalog
            .expect_get_upcoming_timeslots()
            .returning(move |_, _| Ok(slots.clone()));
        mocks
            .catalog
            .expect_get_movie()
            .withf(move |id| *id == a_id)
            .returning(move |_| Ok(impostor.clone()));
        mocks.store = MockRecommendationStore::new();
        mocks.store.expect_create().never();
        mocks.publisher = MockNotificationPublisher::new();
        mocks.publisher.expect_publish().never();

        let generator = mocks.into_generator();
        let err = generator.generate_for_user(&user("Ana")).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::FetchRecommendedMovie));
    }

    #[tokio::test]
    async fn test_confidence_is_clamped_before_persistence() {
        for (raw, expected) in [(1.7, 1.0), (-0.3, 0.0), (0.85, 0.85)] {
            let a = movie("Arrival");
            let a_id = a.id;

            let mut mocks = happy_mocks(vec![a], a_id.to_string(), raw);
            mocks.store = MockRecommendationStore::new();
            mocks
                .store
                .expect_create()
                .times(1)
                .withf(move |rec| rec.confidence_score == expected)
                .returning(Ok);
            mocks.store.expect_mark_sent().returning(|_| Ok(()));

            let generator = mocks.into_generator();
            generator.generate_for_user(&user("Ana")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_no_candidates_creates_no_record() {
        let mut mocks = Mocks::new();
        mocks
            .reservations
            .expect_get_user_reservations()
            .returning(|_| Ok(vec![]));
        mocks
            .catalog
            .expect_get_upcoming_timeslots()
            .returning(|_, _| Ok(vec![]));
        mocks.model.expect_recommend().never();
        mocks.store.expect_create().never();
        mocks.publisher.expect_publish().never();

        let generator = mocks.into_generator();
        let err = generator.generate_for_user(&user("Ana")).await.unwrap_err();
        assert!(matches!(err, AppError::NoCandidates));
    }

    #[tokio::test]
    async fn test_model_failure_aborts_before_persistence() {
        let a = movie("Arrival");
        let mut mocks = happy_mocks(vec![a], String::new(), 0.5);
        mocks.model = MockRecommendationModel::new();
        mocks
            .model
            .expect_recommend()
            .returning(|_| Err(AppError::Model("no recommendation generated".to_string())));
        mocks.store = MockRecommendationStore::new();
        mocks.store.expect_create().never();

        let generator = mocks.into_generator();
        let err = generator.generate_for_user(&user("Ana")).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::GenerateRecommendation));
    }

    #[tokio::test]
    async fn test_publish_failure_marks_record_failed() {
        let a = movie("Arrival");
        let a_id = a.id;

        let mut mocks = happy_mocks(vec![a], a_id.to_string(), 0.7);
        mocks.store = MockRecommendationStore::new();
        mocks
            .store
            .expect_create()
            .times(1)
            .withf(|rec| {
                let context = &rec.generation_context;
                context["user_history"].is_array()
                    && context["upcoming_movies"].as_array().map(Vec::len) == Some(1)
                    && context["ai_response"]["reason"] == "You will love it"
                    && context["raw_reply"].is_string()
            })
            .returning(Ok);
        mocks.store.expect_mark_failed().times(1).returning(|_| Ok(()));
        mocks.store.expect_mark_sent().never();

        mocks.publisher = MockNotificationPublisher::new();
        mocks
            .publisher
            .expect_publish()
            .returning(|_| Err(AppError::Unavailable("queue down".to_string())));

        let generator = mocks.into_generator();
        let err = generator.generate_for_user(&user("Ana")).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::PublishNotification));
        assert!(err.to_string().contains("queue down"));
    }

    #[tokio::test]
    async fn test_mark_sent_failure_is_not_escalated() {
        let a = movie("Arrival");
        let a_id = a.id;

        let mut mocks = happy_mocks(vec![a], a_id.to_string(), 0.7);
        mocks.store = MockRecommendationStore::new();
        mocks.store.expect_create().returning(Ok);
        mocks
            .store
            .expect_mark_sent()
            .times(1)
            .returning(|id| Err(AppError::Conflict(id.to_string())));

        let generator = mocks.into_generator();
        assert!(generator.generate_for_user(&user("Ana")).await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_counts_single_user_failure() {
        let a = movie("Arrival");
        let a_id = a.id;
        let users: Vec<User> = ["Ana", "Bor", "Cene", "Dara", "Eva"]
            .into_iter()
            .map(user)
            .collect();

        let mut mocks = happy_mocks(vec![a.clone()], a_id.to_string(), 0.7);
        mocks
            .identity
            .expect_get_active_users()
            .times(1)
            .returning(move || Ok(users.clone()));

        // The third schedule fetch belongs to the third user
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = timeslot(&a);
        mocks.catalog = MockCatalogProvider::new();
        mocks
            .catalog
            .expect_get_upcoming_timeslots()
            .times(5)
            .returning(move |_, _| {
                if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                    Err(AppError::UpstreamStatus {
                        service: "spored",
                        status: 503,
                        body: "maintenance".to_string(),
                    })
                } else {
                    Ok(vec![slot.clone()])
                }
            });
        let chosen = a.clone();
        mocks
            .catalog
            .expect_get_movie()
            .returning(move |_| Ok(chosen.clone()));

        mocks.store = MockRecommendationStore::new();
        mocks.store.expect_create().times(4).returning(Ok);
        mocks.store.expect_mark_sent().times(4).returning(|_| Ok(()));

        let generator = mocks.into_generator();
        let summary = generator.generate_for_all_users(deadline()).await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                total: 5,
                succeeded: 4,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_batch_fails_when_users_cannot_be_listed() {
        let mut mocks = Mocks::new();
        mocks.identity.expect_get_active_users().returning(|| {
            Err(AppError::UpstreamStatus {
                service: "auth",
                status: 500,
                body: "oops".to_string(),
            })
        });

        let generator = mocks.into_generator();
        let err = generator.generate_for_all_users(deadline()).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::FetchUsers));
    }

    #[tokio::test]
    async fn test_batch_with_passed_deadline_fails_every_user() {
        let users: Vec<User> = ["Ana", "Bor", "Cene"].into_iter().map(user).collect();

        let mut mocks = Mocks::new();
        mocks
            .identity
            .expect_get_active_users()
            .returning(move || Ok(users.clone()));
        mocks.reservations.expect_get_user_reservations().never();

        let generator = mocks.into_generator();
        let summary = generator.generate_for_all_users(Instant::now()).await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                total: 3,
                succeeded: 0,
                failed: 3
            }
        );
    }

    /// Reservation lookups that outlast the run deadline
    struct SlowReservations {
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ReservationProvider for SlowReservations {
        async fn get_user_reservations(&self, _user_id: Uuid) -> AppResult<Vec<Reservation>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_user_fails_it_and_skips_the_rest() {
        let users: Vec<User> = ["Ana", "Bor"].into_iter().map(user).collect();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut identity = MockIdentityProvider::new();
        identity
            .expect_get_active_users()
            .returning(move || Ok(users.clone()));
        let mut store = MockRecommendationStore::new();
        store.expect_create().never();

        let generator = RecommendationGenerator::new(
            Collaborators {
                identity: Arc::new(identity),
                reservations: Arc::new(SlowReservations {
                    delay: Duration::from_secs(120),
                    calls: calls.clone(),
                }),
                catalog: Arc::new(MockCatalogProvider::new()),
                model: Arc::new(MockRecommendationModel::new()),
                store: Arc::new(store),
                publisher: Arc::new(MockNotificationPublisher::new()),
            },
            settings(),
        );

        let summary = generator
            .generate_for_all_users(Instant::now() + Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                total: 2,
                succeeded: 0,
                failed: 2
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_for_user_resolves_user_by_id() {
        let a = movie("Arrival");
        let a_id = a.id;
        let person = user("Ana");
        let person_id = person.id;

        let mut mocks = happy_mocks(vec![a], a_id.to_string(), 0.7);
        mocks
            .identity
            .expect_get_user()
            .withf(move |id| *id == person_id)
            .returning(move |_| Ok(person.clone()));

        let generator = mocks.into_generator();
        let summary = generator.run_for_user(person_id, deadline()).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_run_for_unknown_user_counts_failure() {
        let mut mocks = Mocks::new();
        mocks
            .identity
            .expect_get_user()
            .returning(|id| Err(AppError::NotFound(format!("user {}", id))));

        let generator = mocks.into_generator();
        let summary = generator
            .run_for_user(Uuid::new_v4(), deadline())
            .await
            .unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                total: 1,
                succeeded: 0,
                failed: 1
            }
        );
    }
}
