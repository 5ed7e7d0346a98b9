mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::{app_with, create, get, send, settings, test_app, token};
use games_api::throttle::Rate;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn root_links_every_collection() {
    let router = test_app();
    for uri in ["/api/v1", "/api/v1/"] {
        let reply = get(&router, uri).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["games"], "/api/v1/games");
        assert_eq!(reply.body["game-categories"], "/api/v1/game-categories");
        assert_eq!(reply.body["players"], "/api/v1/players");
        assert_eq!(reply.body["scores"], "/api/v1/scores");
        assert_eq!(reply.body["users"], "/api/v1/users");
    }
}

#[tokio::test]
async fn service_endpoints() {
    let router = test_app();
    assert_eq!(get(&router, "/health").await.body, json!({ "status": "ok" }));
    assert_eq!(get(&router, "/ready").await.status, StatusCode::OK);
    assert_eq!(get(&router, "/version").await.body["name"], "games-api");
}

#[tokio::test]
async fn unknown_entities_and_rows_are_not_found() {
    let router = test_app();
    assert_eq!(get(&router, "/api/v1/teams").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&router, "/api/v1/players/42").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&router, "/api/v1/players/abc").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_category_names_conflict() {
    let router = test_app();
    create(&router, "game-categories", None, json!({ "name": "Puzzle" })).await;
    let reply = send(&router, Method::POST, "/api/v1/game-categories", None, Some(json!({ "name": "Puzzle" }))).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["error"]["code"], "conflict");
}

#[tokio::test]
async fn references_must_exist_and_protect_their_targets() {
    let router = test_app();
    let alice = token("alice");

    let reply = send(
        &router,
        Method::POST,
        "/api/v1/games",
        Some(&alice),
        Some(json!({ "name": "Go", "release_date": "2024-01-01", "game_category": 77 })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["error"]["details"]["field"], "game_category");

    let category = create(&router, "game-categories", None, json!({ "name": "Board" })).await;
    create(
        &router,
        "games",
        Some(&alice),
        json!({ "name": "Go", "release_date": "2024-01-01", "game_category": category["id"] }),
    )
    .await;
    let reply = send(&router, Method::DELETE, &format!("/api/v1/game-categories/{}", category["id"]), None, None).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn body_values_are_validated() {
    let router = test_app();
    let reply = send(&router, Method::POST, "/api/v1/players", None, Some(json!({ "name": "Cy", "gender": "X" }))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["error"]["details"]["field"], "gender");

    let reply = send(&router, Method::POST, "/api/v1/players", None, Some(json!({ "gender": "F" }))).await;
    assert_eq!(reply.body["error"]["details"]["field"], "name");

    let reply = send(&router, Method::POST, "/api/v1/players", None, Some(json!(["not", "an", "object"]))).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn null_and_oversized_values_are_validation_errors() {
    let router = test_app();
    let reply = send(&router, Method::POST, "/api/v1/players", None, Some(json!({ "name": "Cy", "gender": null }))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["error"]["details"]["field"], "gender");

    let alice = token("alice");
    let category = create(&router, "game-categories", None, json!({ "name": "Card" })).await;
    let game = create(
        &router,
        "games",
        Some(&alice),
        json!({ "name": "Snap", "release_date": "2020-01-01", "game_category": category["id"] }),
    )
    .await;
    let uri = format!("/api/v1/games/{}", game["id"]);
    let reply = send(&router, Method::PATCH, &uri, Some(&alice), Some(json!({ "played": null }))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["error"]["details"]["field"], "played");

    let reply = send(&router, Method::POST, "/api/v1/players", None, Some(json!({ "name": "n".repeat(201) }))).await;
    assert_eq!(reply.body["error"]["details"]["field"], "name");

    // a token subject too long for users.username
    let long_name = token(&"u".repeat(151));
    let reply = send(
        &router,
        Method::POST,
        "/api/v1/games",
        Some(&long_name),
        Some(json!({ "name": "Slap", "release_date": "2020-01-01", "game_category": category["id"] })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["error"]["details"]["field"], "owner");
}

#[tokio::test]
async fn rejected_create_does_not_register_owner() {
    let router = test_app();
    let reply = send(
        &router,
        Method::POST,
        "/api/v1/games",
        Some(&token("carol")),
        Some(json!({ "name": "Go", "release_date": "2024-01-01", "game_category": 5 })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(get(&router, "/api/v1/users?username=carol").await.body["meta"]["count"], 0);
}

#[tokio::test]
async fn category_scope_is_throttled_separately() {
    let mut s = settings();
    s.throttle.enabled = true;
    s.throttle.anon = Rate::per_hour(100);
    s.throttle.scopes.insert("game-categories".into(), Rate::per_hour(2));
    let router = app_with(s);

    assert_eq!(get(&router, "/api/v1/game-categories").await.status, StatusCode::OK);
    assert_eq!(get(&router, "/api/v1/game-categories").await.status, StatusCode::OK);
    let reply = get(&router, "/api/v1/game-categories").await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.body["error"]["details"]["scope"], "game-categories");
    assert!(reply.headers.contains_key(header::RETRY_AFTER));

    // other entities still answer
    assert_eq!(get(&router, "/api/v1/players").await.status, StatusCode::OK);
}

#[tokio::test]
async fn authenticated_callers_have_their_own_bucket() {
    let mut s = settings();
    s.throttle.enabled = true;
    s.throttle.anon = Rate::per_hour(1);
    s.throttle.user = Rate::per_hour(3);
    let router = app_with(s);
    let alice = token("alice");

    assert_eq!(get(&router, "/api/v1/players").await.status, StatusCode::OK);
    assert_eq!(get(&router, "/api/v1/players").await.status, StatusCode::TOO_MANY_REQUESTS);
    for _ in 0..3 {
        let reply = send(&router, Method::GET, "/api/v1/players", Some(&alice), None).await;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let reply = send(&router, Method::GET, "/api/v1/players", Some(&alice), None).await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn forwarded_for_header_does_not_open_new_buckets() {
    let mut s = settings();
    s.throttle.enabled = true;
    s.throttle.anon = Rate::per_hour(1);
    let router = app_with(s);

    let mut allowed = 0;
    for i in 0..20 {
        let request = Request::builder()
            .uri("/api/v1/players")
            .header("x-forwarded-for", format!("10.0.0.{}", i))
            .body(Body::empty())
            .unwrap();
        if router.clone().oneshot(request).await.unwrap().status() == StatusCode::OK {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 1);
}

#[tokio::test]
async fn trusted_proxy_buckets_by_forwarded_address() {
    let mut s = settings();
    s.throttle.enabled = true;
    s.throttle.trust_proxy = true;
    s.throttle.anon = Rate::per_hour(1);
    let router = app_with(s);

    let from = |ip: &str| {
        Request::builder()
            .uri("/api/v1/players")
            .header("x-forwarded-for", format!("{}, 172.16.0.1", ip))
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(router.clone().oneshot(from("10.0.0.1")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(router.clone().oneshot(from("10.0.0.2")).await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        router.clone().oneshot(from("10.0.0.1")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
