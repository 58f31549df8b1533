use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Request, Response, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
    },
};
use chrono::{Duration, TimeZone, Utc};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use tessera::{
    api::{self, handlers::AppState},
    clock::ManualClock,
    config::{AuthConfig, SigningSecrets},
    password::PasswordHasher,
    session::SessionOrchestrator,
    store::MemoryStore,
};
use tower::ServiceExt;

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
}

fn harness() -> Result<Harness> {
    let secrets = SigningSecrets {
        access: SecretString::from("integration-access".to_string()),
        refresh: SecretString::from("integration-refresh".to_string()),
        signup: SecretString::from("integration-signup".to_string()),
    };
    let config = AuthConfig::new(secrets)?.with_cookie_secure(false);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("bad start time"))?,
    ));
    let sessions = SessionOrchestrator::new(&config, Arc::new(MemoryStore::new()), clock.clone())?
        .with_hasher(PasswordHasher::with_memory_kib(8, 1)?);

    Ok(Harness {
        app: api::app(AppState::new(sessions, &config)),
        clock,
    })
}

fn post_json(uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body)?))?)
}

fn with_bearer(mut request: Request<Body>, token: &str) -> Result<Request<Body>> {
    request
        .headers_mut()
        .insert(AUTHORIZATION, format!("Bearer {token}").parse()?);
    Ok(request)
}

fn with_cookie(mut request: Request<Body>, cookie: &str) -> Result<Request<Body>> {
    request.headers_mut().insert(COOKIE, cookie.parse()?);
    Ok(request)
}

fn empty_post(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().method("POST").uri(uri).body(Body::empty())?)
}

async fn json_body(response: Response<Body>) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// `tessera_refresh=<token>` from a `Set-Cookie` header, if one was set.
fn refresh_cookie(response: &Response<Body>) -> Option<String> {
    let header = response.headers().get(SET_COOKIE)?.to_str().ok()?;
    let pair = header.split(';').next()?.trim();
    if pair == "tessera_refresh=" {
        None
    } else {
        Some(pair.to_string())
    }
}

fn clears_cookie(response: &Response<Body>) -> bool {
    response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("tessera_refresh=;") && value.contains("Max-Age=0"))
}

fn signup_body(email: &str) -> Value {
    json!({
        "email": email,
        "first_name": "Ada",
        "last_name": "Lovelace",
        "password": "correct horse battery"
    })
}

fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body[field].as_str().unwrap_or_default()
}

/// Signup, one step and completion; returns the completion response.
async fn register(app: &Router, email: &str) -> Result<Response<Body>> {
    let response = app
        .clone()
        .oneshot(post_json("/v1/auth/signup", &signup_body(email))?)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let started = json_body(response).await?;

    let step = with_bearer(
        post_json(
            "/v1/auth/signup/step",
            &json!({"next_step": "review", "completed_step": "verify_email"}),
        )?,
        str_field(&started, "signup_token"),
    )?;
    let response = app.clone().oneshot(step).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let stepped = json_body(response).await?;

    let complete = with_bearer(
        empty_post("/v1/auth/signup/complete")?,
        str_field(&stepped, "signup_token"),
    )?;
    Ok(app.clone().oneshot(complete).await?)
}

#[tokio::test]
async fn health_reports_store_and_build() -> Result<()> {
    let h = harness()?;
    let response = h
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let x_app = response
        .headers()
        .get("X-App")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();
    assert!(x_app.starts_with(concat!("tessera:", env!("CARGO_PKG_VERSION"))));

    let body = json_body(response).await?;
    assert_eq!(body["database"], "ok");
    assert_eq!(body["name"], "tessera");
    Ok(())
}

#[tokio::test]
async fn request_id_is_propagated() -> Result<()> {
    let h = harness()?;
    let response = h
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert!(response.headers().contains_key("x-request-id"));
    Ok(())
}

#[tokio::test]
async fn repeated_signup_resumes_the_same_attempt() -> Result<()> {
    let h = harness()?;

    let first = h
        .app
        .clone()
        .oneshot(post_json("/v1/auth/signup", &signup_body("Ada@Example.com"))?)
        .await?;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first = json_body(first).await?;
    assert_eq!(first["email"], "ada@example.com");
    assert_eq!(first["current_step"], "verify_email");
    assert!(first.get("resumed_session").is_none());

    let second = h
        .app
        .clone()
        .oneshot(post_json("/v1/auth/signup", &signup_body("ada@example.com"))?)
        .await?;
    assert_eq!(second.status(), StatusCode::OK);
    let second = json_body(second).await?;
    assert_eq!(second["attempt_id"], first["attempt_id"]);
    assert_eq!(second["resumed_session"], true);
    assert_ne!(second["signup_token"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn signup_rejects_bad_input() -> Result<()> {
    let h = harness()?;

    let mut body = signup_body("not-an-email");
    let response = h
        .app
        .clone()
        .oneshot(post_json("/v1/auth/signup", &body)?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await?["error"], "invalid_request");

    body["email"] = json!("ada@example.com");
    body["password"] = json!("short");
    let response = h.app.oneshot(post_json("/v1/auth/signup", &body)?).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn signup_flow_opens_a_session() -> Result<()> {
    let h = harness()?;

    let response = register(&h.app, "grace@example.com").await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(refresh_cookie(&response).is_some());
    let session = json_body(response).await?;
    assert_eq!(session["token_type"], "Bearer");
    assert_eq!(session["expires_in"], 900);
    assert_eq!(session["user"]["email"], "grace@example.com");
    assert_eq!(session["user"]["email_verified"], true);

    let me = with_bearer(
        Request::builder().uri("/v1/auth/me").body(Body::empty())?,
        str_field(&session, "access_token"),
    )?;
    let response = h.app.clone().oneshot(me).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["first_name"], "Ada");

    let again = h
        .app
        .oneshot(post_json("/v1/auth/signup", &signup_body("grace@example.com"))?)
        .await?;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(again).await?["error"], "already_exists");
    Ok(())
}

#[tokio::test]
async fn completed_attempt_cannot_be_reused() -> Result<()> {
    let h = harness()?;

    let response = h
        .app
        .clone()
        .oneshot(post_json("/v1/auth/signup", &signup_body("once@example.com"))?)
        .await?;
    let token = str_field(&json_body(response).await?, "signup_token").to_string();

    let complete = with_bearer(empty_post("/v1/auth/signup/complete")?, &token)?;
    assert_eq!(h.app.clone().oneshot(complete).await?.status(), StatusCode::CREATED);

    let complete = with_bearer(empty_post("/v1/auth/signup/complete")?, &token)?;
    let response = h.app.oneshot(complete).await?;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(json_body(response).await?["error"], "attempt_not_active");
    Ok(())
}

#[tokio::test]
async fn token_kinds_are_not_interchangeable() -> Result<()> {
    let h = harness()?;

    let response = h
        .app
        .clone()
        .oneshot(post_json("/v1/auth/signup", &signup_body("kind@example.com"))?)
        .await?;
    let signup_token = str_field(&json_body(response).await?, "signup_token").to_string();

    // A signup token is not an access token.
    let me = with_bearer(
        Request::builder().uri("/v1/auth/me").body(Body::empty())?,
        &signup_token,
    )?;
    assert_eq!(h.app.clone().oneshot(me).await?.status(), StatusCode::UNAUTHORIZED);

    // Nor a refresh token.
    let refresh = with_cookie(
        empty_post("/v1/auth/refresh")?,
        &format!("tessera_refresh={signup_token}"),
    )?;
    let response = h.app.oneshot(refresh).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(clears_cookie(&response));
    assert_eq!(json_body(response).await?["error"], "invalid_session");
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_after_threshold() -> Result<()> {
    let h = harness()?;

    let response = register(&h.app, "rotate@example.com").await?;
    let original = refresh_cookie(&response).unwrap_or_default();

    // Young token: new access token, same refresh cookie.
    let response = h
        .app
        .clone()
        .oneshot(with_cookie(empty_post("/v1/auth/refresh")?, &original)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(refresh_cookie(&response).is_none());

    h.clock.advance(Duration::days(7));

    let response = h
        .app
        .clone()
        .oneshot(with_cookie(empty_post("/v1/auth/refresh")?, &original)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = refresh_cookie(&response).unwrap_or_default();
    assert!(rotated.starts_with("tessera_refresh="));
    assert_ne!(rotated, original);

    // The replaced token is revoked.
    let response = h
        .app
        .clone()
        .oneshot(with_cookie(empty_post("/v1/auth/refresh")?, &original)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?["error"], "revoked_session");

    let response = h
        .app
        .oneshot(with_cookie(empty_post("/v1/auth/refresh")?, &rotated)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn refresh_without_cookie_is_no_session() -> Result<()> {
    let h = harness()?;
    let response = h.app.oneshot(empty_post("/v1/auth/refresh")?).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?["error"], "no_session");
    Ok(())
}

#[tokio::test]
async fn login_logout_and_logout_all() -> Result<()> {
    let h = harness()?;
    assert_eq!(
        register(&h.app, "login@example.com").await?.status(),
        StatusCode::CREATED
    );

    let wrong = h
        .app
        .clone()
        .oneshot(post_json(
            "/v1/auth/login",
            &json!({"email": "login@example.com", "password": "wrong password"}),
        )?)
        .await?;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(wrong).await?["error"], "invalid_credentials");

    let login = || {
        post_json(
            "/v1/auth/login",
            &json!({"email": "LOGIN@example.com", "password": "correct horse battery"}),
        )
    };

    // Logout revokes the cookie's token and clears the cookie.
    let response = h.app.clone().oneshot(login()?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = refresh_cookie(&response).unwrap_or_default();

    let response = h
        .app
        .clone()
        .oneshot(with_cookie(empty_post("/v1/auth/logout")?, &cookie)?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(clears_cookie(&response));

    let response = h
        .app
        .clone()
        .oneshot(with_cookie(empty_post("/v1/auth/refresh")?, &cookie)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // logout-all needs an access token and revokes every session.
    let response = h
        .app
        .clone()
        .oneshot(empty_post("/v1/auth/logout-all")?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let first = h.app.clone().oneshot(login()?).await?;
    let first_cookie = refresh_cookie(&first).unwrap_or_default();
    let second = json_body(h.app.clone().oneshot(login()?).await?).await?;

    let response = h
        .app
        .clone()
        .oneshot(with_bearer(
            empty_post("/v1/auth/logout-all")?,
            str_field(&second, "access_token"),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    // Two live tokens from this round plus the one from signup completion.
    assert_eq!(json_body(response).await?["revoked"], 3);

    let response = h
        .app
        .oneshot(with_cookie(empty_post("/v1/auth/refresh")?, &first_cookie)?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?["error"], "revoked_session");
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let h = harness()?;
    let response = h
        .app
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await?;
    assert!(doc["paths"]["/v1/auth/refresh"].is_object());
    Ok(())
}
