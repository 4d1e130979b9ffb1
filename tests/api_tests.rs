use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use critic_api::api::{create_router, AppState};
use critic_api::db::{Stores, WriteCondition};
use critic_api::models::{Movie, User};
use critic_api::services::{ChangeFeed, DeletedReviewArchiver};

fn movie(id: &str, genre: &str, rating: f64, keyword: &str, year: i32) -> Movie {
    Movie {
        imdb_id: id.to_string(),
        title: format!("Title {}", id),
        imdb_rating: rating,
        most_frequent_genre: genre.to_string(),
        most_frequent_keyword: keyword.to_string(),
        is_adult: false,
        release_year: year,
    }
}

async fn create_test_server() -> (TestServer, Stores) {
    let stores = Stores::in_memory();
    stores
        .users
        .put(
            User {
                login: "larry".to_string(),
                name: "Larry".to_string(),
                phone_number: "555-0100".to_string(),
            },
            WriteCondition::Always,
        )
        .await
        .unwrap();
    for m in [
        movie("tt1", "Crime", 8.0, "heist", 1995),
        movie("tt2", "Crime", 7.0, "heist-crew", 2003),
        movie("tt3", "Drama", 9.0, "rain", 2010),
    ] {
        stores.movies.put(m, WriteCondition::Always).await.unwrap();
    }

    let (feed, _handle) =
        ChangeFeed::spawn(DeletedReviewArchiver::new(stores.deleted_reviews.clone()));
    let state = AppState::new(stores.clone(), None, feed);
    let server = TestServer::new(create_router(state)).unwrap();
    (server, stores)
}

#[tokio::test]
async fn test_health_check() {
    let (server, _) = create_test_server().await;
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_request_id_echoed() {
    let (server, _) = create_test_server().await;
    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("abc-123"),
        )
        .await;
    assert_eq!(response.header("x-request-id"), "abc-123");
}

#[tokio::test]
async fn test_put_and_update_review() {
    let (server, _) = create_test_server().await;

    let response = server
        .put("/users/larry/reviews/tt1")
        .json(&json!({ "rating": 4.5 }))
        .await;
    response.assert_status_ok();
    let created: Value = response.json();
    assert_eq!(created["userId"], "larry");
    assert_eq!(created["imdbId"], "tt1");
    assert_eq!(created["rating"], 4.5);
    assert!(created.get("version").is_none());

    let response = server
        .put("/users/larry/reviews/tt1")
        .json(&json!({ "rating": 3.0 }))
        .await;
    response.assert_status_ok();
    let updated: Value = response.json();
    assert_eq!(updated["rating"], 3.0);
    assert_eq!(updated["createdAt"], created["createdAt"]);
}

#[tokio::test]
async fn test_put_review_errors() {
    let (server, _) = create_test_server().await;

    let response = server
        .put("/users/larry/reviews/tt1")
        .json(&json!({ "rating": 4.3 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .put("/users/larry/reviews/tt1")
        .json(&json!({}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .put("/users/curly/reviews/tt1")
        .json(&json!({ "rating": 4.0 }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("curly"));

    let response = server
        .put("/users/larry/reviews/tt404")
        .json(&json!({ "rating": 4.0 }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_reviews_with_pagination() {
    let (server, _) = create_test_server().await;
    for imdb_id in ["tt1", "tt2", "tt3"] {
        server
            .put(&format!("/users/larry/reviews/{}", imdb_id))
            .json(&json!({ "rating": 3.5 }))
            .await
            .assert_status_ok();
        // Keep creation timestamps distinct
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let response = server
        .get("/users/larry/reviews")
        .add_query_param("count", "2")
        .await;
    response.assert_status_ok();
    let first: Value = response.json();
    let ids: Vec<_> = first["reviews"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["imdbId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["tt3", "tt2"]);
    let token = first["paginationToken"].as_str().unwrap().to_string();
    assert!(token.starts_with("tt2#"));

    let response = server
        .get("/users/larry/reviews")
        .add_query_param("count", "2")
        .add_query_param("paginationToken", &token)
        .await;
    response.assert_status_ok();
    let second: Value = response.json();
    assert_eq!(second["reviews"].as_array().unwrap().len(), 1);
    assert_eq!(second["reviews"][0]["imdbId"], "tt1");
    assert_eq!(second["paginationToken"], "No more results.");
}

#[tokio::test]
async fn test_list_reviews_bad_count() {
    let (server, _) = create_test_server().await;
    for count in ["0", "501", "many"] {
        let response = server
            .get("/users/larry/reviews")
            .add_query_param("count", count)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_delete_review_is_archived() {
    let (server, stores) = create_test_server().await;
    server
        .put("/users/larry/reviews/tt1")
        .json(&json!({ "rating": 2.0 }))
        .await
        .assert_status_ok();

    let response = server.delete("/users/larry/reviews/tt1").await;
    response.assert_status_ok();
    let deleted: Value = response.json();
    assert_eq!(deleted["rating"], 2.0);

    server
        .delete("/users/larry/reviews/tt1")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let mut archived = Vec::new();
    for _ in 0..50 {
        archived = stores.deleted_reviews.scan(None).await.unwrap();
        if !archived.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].imdb_id, "tt1");
}

#[tokio::test]
async fn test_recommendations_from_favorite() {
    let (server, _) = create_test_server().await;
    server
        .put("/users/larry/reviews/tt1")
        .json(&json!({ "rating": 5.0 }))
        .await
        .assert_status_ok();

    let response = server.get("/users/larry/recommendations").await;
    response.assert_status_ok();
    let movies: Vec<Value> = response.json();
    assert_eq!(movies.len(), 1);
    assert_eq!(movies[0]["imdbId"], "tt2");
}

#[tokio::test]
async fn test_recommendations_fall_back_to_top_movies() {
    let (server, _) = create_test_server().await;

    server
        .post("/top-movies/refresh")
        .await
        .assert_status_ok();

    let response = server.get("/users/larry/recommendations").await;
    response.assert_status_ok();
    let movies: Vec<Value> = response.json();
    assert!(movies.len() <= 2);

    server
        .get("/users/curly/recommendations")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_top_movies_refresh_and_list() {
    let (server, _) = create_test_server().await;

    let response = server.post("/top-movies/refresh").await;
    response.assert_status_ok();
    let rotation: Value = response.json();
    assert!(rotation["old"].as_array().unwrap().is_empty());
    let new = rotation["new"].as_array().unwrap().len();
    assert!(new <= 2);

    let response = server.get("/top-movies").await;
    response.assert_status_ok();
    let listed: Vec<Value> = response.json();
    assert_eq!(listed.len(), new);

    server
        .get("/top-movies")
        .add_query_param("max", "11")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_review_events_archive_only_removals() {
    let (server, stores) = create_test_server().await;
    let old_image = json!({
        "userId": "larry",
        "imdbId": "tt3",
        "rating": 4.0,
        "createdAt": "2024-01-01T00:00:00Z",
        "updatedAt": "2024-01-02T00:00:00Z"
    });

    let response = server
        .post("/internal/review-events")
        .json(&json!({
            "records": [
                { "eventName": "REMOVE", "oldImage": old_image },
                { "eventName": "INSERT" },
                { "eventName": "MODIFY", "oldImage": old_image }
            ]
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["archived"], 1);

    let archived = stores.deleted_reviews.scan(None).await.unwrap();
    assert_eq!(archived.len(), 1);
}
