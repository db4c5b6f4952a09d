// Copyright (C) 2025 The frontpage developers <frontpage-devs@example.com>
//
// This file is part of frontpage.
//
// frontpage is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// frontpage is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with frontpage.  If not,
// see <http://www.gnu.org/licenses/>.

//! # service integration tests
//!
//! End-to-end exercises of the top-stories pipeline against a mock upstream & the in-memory
//! store: cache hit, cold miss, partial failure, breaker-open stale-fallback, breaker-open with
//! no snapshot, clamping-- plus the HTTP façade (auth, ETag, validation).

use std::{sync::Arc, time::Duration};

use axum::body::Body;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use http::{Request, StatusCode};
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use tokio::time::Instant;
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use frontpage_cache::{Memory as MemoryStore, Store};

use frontpage::{
    client::{make_client, Breaker, BreakerParameters, ClientParameters},
    entities::{CachedSnapshot, Story, SNAPSHOT_KEY},
    frontpage::{Frontpage, Tunables},
    hacker_news::HackerNews,
    http::make_router,
    metrics::Instruments,
    storage::Memory as MemoryUsers,
    token::SigningKey,
    top_stories::{top_stories, warmup, ReadError},
    users::Pepper,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            harness                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

struct Harness {
    app: Arc<Frontpage>,
    store: Arc<MemoryStore>,
    server: MockServer,
}

/// Stand up an application instance against a fresh mock upstream. `retries` is the client's
/// retry budget; tests that need the breaker to trip within a single logical call pass 4 (five
/// attempts).
async fn harness(retries: usize) -> Harness {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let client = make_client(
        "frontpage integration tests/0.0.1",
        &ClientParameters {
            per_attempt_timeout: Duration::from_millis(100),
            retries,
            retry_unit: Duration::from_millis(2),
        },
        Breaker::new(&BreakerParameters {
            threshold: 5,
            open_for: Duration::from_secs(30),
        }),
    )
    .unwrap();
    let instruments = Arc::new(Instruments::new("frontpage-integration-tests"));
    let hn = HackerNews::new(
        client,
        store.clone(),
        instruments.clone(),
        server.uri().parse().unwrap(),
        10,
    );
    let app = Arc::new(Frontpage {
        hn,
        store: store.clone(),
        users: Arc::new(MemoryUsers::new()),
        instruments,
        exporter: PrometheusExporter::new(),
        origin: "http://127.0.0.1:8080".to_owned(),
        signing_key: SigningKey::random(),
        token_lifetime: ChronoDuration::hours(12),
        pepper: Pepper::default(),
        tunables: Tunables::default(),
    });
    Harness { app, store, server }
}

fn story(score: i64) -> Story {
    Story {
        title: Some(format!("story {}", score)),
        uri: None,
        posted_by: None,
        time: String::new(),
        score,
        comment_count: 0,
    }
}

/// Plant a snapshot `age` old, retrievable for `ttl`.
async fn seed_snapshot(store: &MemoryStore, stories: Vec<Story>, age: Duration, ttl: Duration) {
    let snapshot = CachedSnapshot {
        cached_at: Utc::now() - ChronoDuration::from_std(age).unwrap(),
        total_stories: stories.len(),
        stories,
    };
    store
        .set(
            SNAPSHOT_KEY,
            Bytes::from(serde_json::to_vec(&snapshot).unwrap()),
            ttl,
        )
        .await
        .unwrap();
}

async fn read_snapshot(store: &MemoryStore) -> Option<CachedSnapshot> {
    store
        .get(SNAPSHOT_KEY)
        .await
        .unwrap()
        .map(|buf| serde_json::from_slice(&buf).unwrap())
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

async fn mount_item(server: &MockServer, id: u64, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/item/{}.json", id)))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_owned()))
        .mount(server)
        .await;
}

async fn mount_ids(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/beststories.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_owned()))
        .mount(server)
        .await;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      reader scenarios                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[tokio::test]
async fn cache_hit_touches_nothing_upstream() {
    let harness = harness(3).await;
    seed_snapshot(
        &harness.store,
        vec![story(100), story(90), story(80)],
        Duration::from_secs(30),
        Duration::from_secs(600),
    )
    .await;

    let stories = top_stories(&harness.app, 2, deadline()).await.unwrap();
    assert_eq!(stories.iter().map(|s| s.score).collect::<Vec<_>>(), vec![100, 90]);
    assert!(harness.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn cold_miss_builds_and_publishes() {
    let harness = harness(3).await;
    mount_ids(&harness.server, "[10, 20, 30]").await;
    mount_item(&harness.server, 10, r#"{"id": 10, "type": "story", "score": 50}"#).await;
    mount_item(&harness.server, 20, r#"{"id": 20, "type": "comment", "score": 9999}"#).await;
    mount_item(&harness.server, 30, r#"{"id": 30, "type": "story", "score": 70}"#).await;

    let stories = top_stories(&harness.app, 5, deadline()).await.unwrap();
    assert_eq!(stories.iter().map(|s| s.score).collect::<Vec<_>>(), vec![70, 50]);

    let snapshot = read_snapshot(&harness.store).await.unwrap();
    assert_eq!(snapshot.total_stories, 2);
    assert_eq!(snapshot.stories.len(), 2);
}

#[tokio::test]
async fn per_item_failures_leave_holes_not_errors() {
    let harness = harness(3).await;
    mount_ids(&harness.server, "[1, 2, 3]").await;
    mount_item(&harness.server, 1, r#"{"id": 1, "type": "story", "score": 10}"#).await;
    // Item 2 times-out on all four attempts.
    Mock::given(method("GET"))
        .and(path("/item/2.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"id": 2, "type": "story", "score": 9999}"#)
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&harness.server)
        .await;
    mount_item(&harness.server, 3, r#"{"id": 3, "type": "story", "score": 20}"#).await;

    let stories = top_stories(&harness.app, 5, deadline()).await.unwrap();
    assert_eq!(stories.iter().map(|s| s.score).collect::<Vec<_>>(), vec![20, 10]);
}

#[tokio::test]
async fn breaker_open_falls_back_to_stale() {
    // Five attempts per logical call so the breaker trips within the first read.
    let harness = harness(4).await;
    seed_snapshot(
        &harness.store,
        vec![story(42)],
        Duration::from_secs(300),
        Duration::from_secs(600),
    )
    .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.server)
        .await;

    // The first read finds the snapshot expired, rebuilds, burns its five attempts (opening the
    // breaker) & surfaces the transient failure.
    assert!(matches!(
        top_stories(&harness.app, 1, deadline()).await,
        Err(ReadError::Rebuild { .. })
    ));
    // The second read's rebuild is refused by the breaker, which is the (deliberately narrow)
    // stale-fallback condition.
    let stories = top_stories(&harness.app, 1, deadline()).await.unwrap();
    assert_eq!(stories.iter().map(|s| s.score).collect::<Vec<_>>(), vec![42]);
    // ...and the breaker kept the second read off the wire entirely.
    assert_eq!(harness.server.received_requests().await.unwrap().len(), 5);
}

#[tokio::test]
async fn breaker_open_with_no_snapshot_is_unavailable() {
    let harness = harness(4).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.server)
        .await;

    assert!(matches!(
        top_stories(&harness.app, 10, deadline()).await,
        Err(ReadError::Rebuild { .. })
    ));
    assert!(matches!(
        top_stories(&harness.app, 10, deadline()).await,
        Err(ReadError::Unavailable)
    ));
    assert_eq!(harness.server.received_requests().await.unwrap().len(), 5);
}

#[tokio::test]
async fn n_is_clamped_at_both_ends() {
    let harness = harness(3).await;
    seed_snapshot(
        &harness.store,
        (0..200i64).map(|i| story(1000 - i)).collect(),
        Duration::from_secs(1),
        Duration::from_secs(600),
    )
    .await;

    assert!(top_stories(&harness.app, 0, deadline()).await.unwrap().is_empty());
    assert!(top_stories(&harness.app, -3, deadline()).await.unwrap().is_empty());
    assert_eq!(
        top_stories(&harness.app, 500, deadline()).await.unwrap().len(),
        200
    );
}

#[tokio::test]
async fn warmup_is_idempotent() {
    let harness = harness(3).await;
    mount_ids(&harness.server, "[1, 2, 3]").await;
    mount_item(&harness.server, 1, r#"{"id": 1, "type": "story", "score": 10}"#).await;
    mount_item(&harness.server, 2, r#"{"id": 2, "type": "story", "score": 30}"#).await;
    mount_item(&harness.server, 3, r#"{"id": 3, "type": "story", "score": 20}"#).await;

    warmup(&harness.app, deadline()).await.unwrap();
    let first = read_snapshot(&harness.store).await.unwrap();
    warmup(&harness.app, deadline()).await.unwrap();
    let second = read_snapshot(&harness.store).await.unwrap();

    assert_eq!(first.stories, second.stories);
    assert_eq!(
        first.stories.iter().map(|s| s.score).collect::<Vec<_>>(),
        vec![30, 20, 10]
    );
}

#[tokio::test]
async fn an_empty_id_list_is_a_no_op() {
    let harness = harness(3).await;
    mount_ids(&harness.server, "[]").await;
    seed_snapshot(
        &harness.store,
        vec![story(1)],
        Duration::from_secs(1),
        Duration::from_secs(600),
    )
    .await;

    warmup(&harness.app, deadline()).await.unwrap();
    // The prior snapshot is untouched.
    assert_eq!(read_snapshot(&harness.store).await.unwrap().stories.len(), 1);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       the HTTP façade                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let buf = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&buf).unwrap()
}

/// Sign up & log in a user; returns a bearer token.
async fn obtain_token(router: &axum::Router) -> String {
    let response = router
        .clone()
        .oneshot(json_request(
            "/users/signup",
            serde_json::json!({"username": "wopr", "password": "joshua"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(json_request(
            "/users/login",
            serde_json::json!({"username": "wopr", "password": "joshua"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["token"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn the_stories_api_requires_a_token() {
    let harness = harness(3).await;
    let router = make_router(harness.app.clone());

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/best-stories?n=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signup_login_fetch_and_revalidate() {
    let harness = harness(3).await;
    seed_snapshot(
        &harness.store,
        vec![story(100), story(90)],
        Duration::from_secs(10),
        Duration::from_secs(600),
    )
    .await;
    let router = make_router(harness.app.clone());
    let token = obtain_token(&router).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/best-stories?n=1")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("cache-control")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("public, max-age="));
    let etag = response.headers().get("etag").unwrap().to_str().unwrap().to_owned();
    let stories = body_json(response).await;
    assert_eq!(stories.as_array().unwrap().len(), 1);
    assert_eq!(stories[0]["score"], 100);

    // Revalidation with the ETag we were just handed yields 304 & no body.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/best-stories?n=1")
                .header("authorization", format!("Bearer {}", token))
                .header("if-none-match", etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn malformed_n_is_a_bad_request() {
    let harness = harness(3).await;
    let router = make_router(harness.app.clone());
    let token = obtain_token(&router).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/best-stories?n=lots")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_signups_conflict() {
    let harness = harness(3).await;
    let router = make_router(harness.app.clone());

    let request = serde_json::json!({"username": "wopr", "password": "joshua"});
    let response = router
        .clone()
        .oneshot(json_request("/users/signup", request.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let response = router
        .clone()
        .oneshot(json_request("/users/signup", request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn wrong_passwords_read_as_unauthorized() {
    let harness = harness(3).await;
    let router = make_router(harness.app.clone());

    let response = router
        .clone()
        .oneshot(json_request(
            "/users/signup",
            serde_json::json!({"username": "wopr", "password": "joshua"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // A wrong password & an unknown user must be indistinguishable.
    let response = router
        .clone()
        .oneshot(json_request(
            "/users/login",
            serde_json::json!({"username": "wopr", "password": "falken"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = router
        .clone()
        .oneshot(json_request(
            "/users/login",
            serde_json::json!({"username": "nobody", "password": "joshua"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
