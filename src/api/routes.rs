use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Reviews
        .route(
            "/users/:user_id/reviews/:imdb_id",
            put(handlers::put_review).delete(handlers::delete_review),
        )
        .route("/users/:user_id/reviews", get(handlers::list_reviews))
        // Recommendations
        .route(
            "/users/:user_id/recommendations",
            get(handlers::list_recommendations),
        )
        // Top movies
        .route("/top-movies", get(handlers::list_top_movies))
        .route("/top-movies/refresh", post(handlers::refresh_top_movies))
        // Change stream
        .route(
            "/internal/review-events",
            post(handlers::archive_review_events),
        )
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
        .with_state(state)
}
