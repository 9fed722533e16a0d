use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use chirp_api::{AppStateInner, router};
use chirp_db::Database;
use chirp_gateway::store::DEFAULT_PERSIST_TIMEOUT;
use chirp_gateway::{Dispatcher, Presence, Store};

struct Fixture {
    app: axum::Router,
    dispatcher: Dispatcher,
    alice: Uuid,
    bob: Uuid,
    carol: Uuid,
}

fn fixture() -> Fixture {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    db.create_user(alice, "Alice", "alice@test.com", "secret-hash").unwrap();
    db.create_user(bob, "Bob", "bob@test.com", "secret-hash").unwrap();
    db.create_user(carol, "Carol", "carol@test.com", "secret-hash").unwrap();

    let store = Store::new(db, DEFAULT_PERSIST_TIMEOUT);
    let dispatcher = Dispatcher::new(Presence::new(), store.clone());
    let app = router(Arc::new(AppStateInner { store }));
    Fixture { app, dispatcher, alice, bob, carol }
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn users_are_listed_without_credentials() {
    let f = fixture();
    let (status, body) = get(&f.app, "/users").await;

    assert_eq!(status, StatusCode::OK);
    let users = body.as_array().unwrap();
    assert_eq!(users.len(), 3);
    assert_eq!(users[0]["name"], "Alice");
    assert!(!body.to_string().contains("secret-hash"));
}

#[tokio::test]
async fn conversation_lookup_is_symmetric() {
    let f = fixture();
    let (status, first) = get(&f.app, &format!("/conversations?user1={}&user2={}", f.alice, f.bob)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = get(&f.app, &format!("/conversations?user1={}&user2={}", f.bob, f.alice)).await;

    assert_eq!(first["conversation"]["id"], second["conversation"]["id"]);
}

#[tokio::test]
async fn conversation_lookup_requires_both_users() {
    let f = fixture();
    let (status, body) = get(&f.app, &format!("/conversations?user1={}", f.alice)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "user1 and user2 required");
}

#[tokio::test]
async fn history_and_conversation_list() {
    let f = fixture();
    let (conn, _rx) = f.dispatcher.presence().connect();

    let first = f
        .dispatcher
        .send(&conn, Some(f.alice), Some(f.bob), "hey bob".into())
        .await
        .unwrap();
    f.dispatcher
        .send(&conn, Some(f.bob), Some(f.alice), "hey alice".into())
        .await
        .unwrap();
    f.dispatcher
        .send(&conn, Some(f.carol), Some(f.alice), "hi from carol".into())
        .await
        .unwrap();

    let (status, history) = get(&f.app, &format!("/conversations/{}/messages", first.conversation_id)).await;
    assert_eq!(status, StatusCode::OK);
    let texts: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["hey bob", "hey alice"]);

    let (status, list) = get(&f.app, &format!("/conversations/user/{}", f.alice)).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["user"]["name"], "Carol");
    assert_eq!(list[0]["last_message"], "hi from carol");
    assert_eq!(list[1]["user"]["name"], "Bob");
    assert_eq!(list[1]["last_message"], "hey alice");
}
