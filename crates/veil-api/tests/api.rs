use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use veil_api::suggest::Suggester;
use veil_api::{AppState, AppStateInner, router};
use veil_db::Database;
use veil_mail::Mailer;

fn test_state() -> AppState {
    Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: "integration-test-secret".into(),
        mailer: Mailer::disabled(),
        suggester: Suggester::new(None, None),
    })
}

fn test_app() -> (Router, AppState) {
    let state = test_state();
    (router(state.clone()), state)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, value)
}

async fn register(app: &Router, username: &str, email: &str) {
    let (status, body) = send(
        app,
        "POST",
        "/sign-up",
        None,
        Some(json!({ "username": username, "email": email, "password": "password123" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "sign-up failed: {body}");
}

fn stored_code(state: &AppState, username: &str) -> String {
    state
        .db
        .get_user_by_username(username)
        .unwrap()
        .unwrap()
        .verify_code
        .unwrap()
}

async fn verify(app: &Router, state: &AppState, username: &str) {
    let code = stored_code(state, username);
    let (status, body) = send(
        app,
        "POST",
        &format!("/verify/{username}"),
        None,
        Some(json!({ "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "verify failed: {body}");
}

async fn sign_in(app: &Router, identifier: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/sign-in",
        None,
        Some(json!({ "identifier": identifier, "password": "password123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "sign-in failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

async fn register_and_sign_in(app: &Router, state: &AppState, username: &str, email: &str) -> String {
    register(app, username, email).await;
    verify(app, state, username).await;
    sign_in(app, username).await
}

// -- Registration & verification --

#[tokio::test]
async fn reregister_before_verification_reissues_then_conflicts_after() {
    let (app, state) = test_app();

    register(&app, "alice", "alice@example.com").await;
    // unverified: a second sign-up refreshes the pending registration
    register(&app, "alice", "alice@example.com").await;
    assert!(!state.db.get_user_by_username("alice").unwrap().unwrap().verified);

    verify(&app, &state, "alice").await;

    let (status, body) = send(
        &app,
        "POST",
        "/sign-up",
        None,
        Some(json!({ "username": "alice", "email": "other@example.com", "password": "password123" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn sign_up_rejects_malformed_input() {
    let (app, _state) = test_app();

    for payload in [
        json!({ "username": "a", "email": "a@example.com", "password": "password123" }),
        json!({ "username": "has space", "email": "a@example.com", "password": "password123" }),
        json!({ "username": "alice", "email": "not-an-email", "password": "password123" }),
        json!({ "username": "alice", "email": "a@example.com", "password": "short" }),
    ] {
        let (status, body) = send(&app, "POST", "/sign-up", None, Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn email_of_a_verified_account_is_a_conflict() {
    let (app, state) = test_app();

    register(&app, "alice", "shared@example.com").await;
    verify(&app, &state, "alice").await;

    let (status, _) = send(
        &app,
        "POST",
        "/sign-up",
        None,
        Some(json!({ "username": "bob", "email": "shared@example.com", "password": "password123" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn email_of_a_pending_account_can_be_claimed() {
    let (app, state) = test_app();

    register(&app, "carol", "shared@example.com").await;
    register(&app, "bob", "shared@example.com").await;

    // carol's stale pending registration is gone; bob holds the email
    assert!(state.db.get_user_by_username("carol").unwrap().is_none());
    verify(&app, &state, "bob").await;
}

#[tokio::test]
async fn verify_rejects_wrong_code_then_accepts_the_right_one() {
    let (app, state) = test_app();
    register(&app, "alice", "alice@example.com").await;

    let code = stored_code(&state, "alice");
    let wrong = if code.starts_with('0') {
        format!("1{}", &code[1..])
    } else {
        format!("0{}", &code[1..])
    };

    let (status, body) = send(
        &app,
        "POST",
        "/verify/alice",
        None,
        Some(json!({ "code": wrong })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    verify(&app, &state, "alice").await;
}

#[tokio::test]
async fn verify_unknown_user_is_not_found() {
    let (app, _state) = test_app();

    let (status, _) = send(
        &app,
        "POST",
        "/verify/ghost",
        None,
        Some(json!({ "code": "123456" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn verify_after_expiry_is_gone() {
    let (app, state) = test_app();
    register(&app, "alice", "alice@example.com").await;

    let code = stored_code(&state, "alice");
    state
        .db
        .with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET verify_expires_at = '2000-01-01T00:00:00.000Z' WHERE username = 'alice'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

    let (status, _) = send(
        &app,
        "POST",
        "/verify/alice",
        None,
        Some(json!({ "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
}

// -- Username availability --

#[tokio::test]
async fn username_check_covers_format_taken_and_available() {
    let (app, state) = test_app();

    let (status, _) = send(&app, "GET", "/unique-username?username=bad%20name", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // a pending registration does not reserve the name
    register(&app, "alice", "alice@example.com").await;
    let (status, body) = send(&app, "GET", "/unique-username?username=alice", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    verify(&app, &state, "alice").await;
    let (status, body) = send(&app, "GET", "/unique-username?username=alice", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Username is already taken");
}

// -- Sign-in --

#[tokio::test]
async fn unverified_account_cannot_sign_in() {
    let (app, _state) = test_app();
    register(&app, "bob", "bob@example.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/sign-in",
        None,
        Some(json!({ "identifier": "bob", "password": "password123" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn sign_in_accepts_email_as_identifier_and_rejects_bad_password() {
    let (app, state) = test_app();
    register(&app, "alice", "alice@example.com").await;
    verify(&app, &state, "alice").await;

    let token = sign_in(&app, "alice@example.com").await;
    assert!(!token.is_empty());

    let (status, _) = send(
        &app,
        "POST",
        "/sign-in",
        None,
        Some(json!({ "identifier": "alice", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// -- Inbox --

#[tokio::test]
async fn owner_routes_require_a_valid_token() {
    let (app, _state) = test_app();

    let (status, _) = send(&app, "GET", "/get-messages", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/get-messages", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_inbox_is_a_success_with_an_empty_list() {
    let (app, state) = test_app();
    let token = register_and_sign_in(&app, &state, "alice", "alice@example.com").await;

    let (status, body) = send(&app, "GET", "/get-messages", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["messages"], json!([]));
}

#[tokio::test]
async fn accept_flag_toggle_is_idempotent() {
    let (app, state) = test_app();
    let token = register_and_sign_in(&app, &state, "alice", "alice@example.com").await;

    for _ in 0..2 {
        let (status, body) = send(
            &app,
            "POST",
            "/accept-messages",
            Some(&token),
            Some(json!({ "acceptMessage": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isAcceptingMessages"], false);
    }

    let (status, body) = send(&app, "GET", "/accept-messages", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isAcceptingMessages"], false);
}

#[tokio::test]
async fn anonymous_send_respects_validation_and_the_accept_flag() {
    let (app, state) = test_app();
    let token = register_and_sign_in(&app, &state, "alice", "alice@example.com").await;

    // empty content is invalid no matter the flag state
    let (status, _) = send(
        &app,
        "POST",
        "/send-messages",
        None,
        Some(json!({ "username": "alice", "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // messaging disabled: forbidden
    send(
        &app,
        "POST",
        "/accept-messages",
        Some(&token),
        Some(json!({ "acceptMessage": false })),
    )
    .await;
    let (status, _) = send(
        &app,
        "POST",
        "/send-messages",
        None,
        Some(json!({ "username": "alice", "content": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // empty content is still invalid while disabled
    let (status, _) = send(
        &app,
        "POST",
        "/send-messages",
        None,
        Some(json!({ "username": "alice", "content": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sending_to_missing_or_unverified_users_is_not_found() {
    let (app, _state) = test_app();
    register(&app, "pending", "pending@example.com").await;

    for target in ["ghost", "pending"] {
        let (status, _) = send(
            &app,
            "POST",
            "/send-messages",
            None,
            Some(json!({ "username": target, "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "target {target}");
    }
}

#[tokio::test]
async fn messages_list_newest_first() {
    let (app, state) = test_app();
    let token = register_and_sign_in(&app, &state, "alice", "alice@example.com").await;

    for content in ["first", "second"] {
        let (status, _) = send(
            &app,
            "POST",
            "/send-messages",
            None,
            Some(json!({ "username": "alice", "content": content })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&app, "GET", "/get-messages", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "second");
    assert_eq!(messages[1]["content"], "first");
}

#[tokio::test]
async fn deleting_another_owners_message_is_not_found_and_harmless() {
    let (app, state) = test_app();
    let alice = register_and_sign_in(&app, &state, "alice", "alice@example.com").await;
    let bob = register_and_sign_in(&app, &state, "bob", "bob@example.com").await;

    send(
        &app,
        "POST",
        "/send-messages",
        None,
        Some(json!({ "username": "bob", "content": "for bob" })),
    )
    .await;

    let (_, body) = send(&app, "GET", "/get-messages", Some(&bob), None).await;
    let message_id = body["messages"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/delete-message/{message_id}"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", "/get-messages", Some(&bob), None).await;
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn full_alice_scenario() {
    let (app, state) = test_app();

    register(&app, "alice", "alice@example.com").await;
    verify(&app, &state, "alice").await;
    let token = sign_in(&app, "alice").await;

    let (status, body) = send(
        &app,
        "POST",
        "/accept-messages",
        Some(&token),
        Some(json!({ "acceptMessage": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isAcceptingMessages"], true);

    let (status, _) = send(
        &app,
        "POST",
        "/send-messages",
        None,
        Some(json!({ "username": "alice", "content": "Hi Alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "GET", "/get-messages", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "Hi Alice");

    let message_id = messages[0]["id"].as_str().unwrap().to_string();
    let (status, body) = send(
        &app,
        "DELETE",
        &format!("/delete-message/{message_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = send(&app, "GET", "/get-messages", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"], json!([]));
}

// -- Suggestions --

#[tokio::test]
async fn suggestions_without_an_api_key_are_unavailable() {
    let (app, _state) = test_app();

    let (status, body) = send(&app, "POST", "/suggest-messages", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
}
