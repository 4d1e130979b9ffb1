use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    middleware::RequestId,
    models::{ListReviewsResponse, Movie, Review, TopMovie},
    services::{ChangeRecord, ReviewDraft, Rotation, MAX_RECOMMENDATIONS, MAX_TOP_MOVIES},
};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct PutReviewRequest {
    pub rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReviewsParams {
    pub count: Option<String>,
    pub pagination_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopMoviesParams {
    pub max: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewEventBatch {
    pub records: Vec<ChangeRecord>,
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub archived: usize,
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Create or update a review
pub async fn put_review(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path((user_id, imdb_id)): Path<(String, String)>,
    Json(request): Json<PutReviewRequest>,
) -> AppResult<Json<Review>> {
    let draft = ReviewDraft {
        user_id,
        imdb_id,
        rating: request.rating,
    };

    let review = state.review_workflow().put(draft).await?;

    tracing::info!(
        %request_id,
        user_id = %review.user_id,
        imdb_id = %review.imdb_id,
        rating = review.rating,
        "Review saved"
    );
    Ok(Json(review))
}

/// Delete a review and announce the removal on the change feed
pub async fn delete_review(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path((user_id, imdb_id)): Path<(String, String)>,
) -> AppResult<Json<Review>> {
    let review = state.review_workflow().delete(&user_id, &imdb_id).await?;
    state.change_feed.publish(ChangeRecord::removed(review.clone()));

    tracing::info!(%request_id, %user_id, %imdb_id, "Review deleted");
    Ok(Json(review))
}

/// List a user's reviews, most recent first
pub async fn list_reviews(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Query(params): Query<ListReviewsParams>,
) -> AppResult<Json<ListReviewsResponse>> {
    let response = state
        .review_workflow()
        .list_reviews(
            &user_id,
            params.count.as_deref(),
            params.pagination_token.as_deref(),
        )
        .await?;

    tracing::debug!(%request_id, %user_id, returned = response.reviews.len(), "Reviews listed");
    Ok(Json(response))
}

/// Recommend movies for a user
pub async fn list_recommendations(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<Movie>>> {
    let movies = state
        .recommendation_engine()
        .list_recommendations(&user_id, MAX_RECOMMENDATIONS)
        .await?;

    tracing::debug!(%request_id, %user_id, returned = movies.len(), "Recommendations listed");
    Ok(Json(movies))
}

/// List the current top movies
pub async fn list_top_movies(
    State(state): State<AppState>,
    Query(params): Query<TopMoviesParams>,
) -> AppResult<Json<Vec<TopMovie>>> {
    let max = params.max.unwrap_or(MAX_TOP_MOVIES);
    let movies = state.top_movie_rotator().list_top_movies(max).await?;
    Ok(Json(movies))
}

/// Rotate the top movies on demand
pub async fn refresh_top_movies(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<TopMoviesParams>,
) -> AppResult<Json<Rotation>> {
    let max = params.max.unwrap_or(MAX_TOP_MOVIES);
    let mut rng = StdRng::from_os_rng();
    let rotation = state
        .top_movie_rotator()
        .update_top_movies(max, &mut rng)
        .await?;

    tracing::info!(
        %request_id,
        old = rotation.old.len(),
        new = rotation.new.len(),
        "Top movies rotated"
    );
    if let Some(error) = &rotation.cache_error {
        tracing::warn!(%request_id, %error, "Cached top movies not replaced after rotation");
    }
    Ok(Json(rotation))
}

/// Archive the removals contained in a batch of review change records
pub async fn archive_review_events(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(batch): Json<ReviewEventBatch>,
) -> AppResult<Json<ArchiveResponse>> {
    let received = batch.records.len();
    let archived = state.archiver().archive_change_batch(batch.records).await?;

    tracing::info!(%request_id, received, archived, "Review events processed");
    Ok(Json(ArchiveResponse { archived }))
}
