//! Integration tests for the token lifecycle: refresh, caching, rotation,
//! revocation and the authorization code flow.
//!
//! The vendor is a wiremock server; every test gets its own cache and
//! in-memory SQLite store.

mod common;

use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use atomgate::auth::{AccountId, TokenError};
use atomgate::cache::{access_token_key, profile_key, ResultCache};
use atomgate::storage::Database;
use common::{account, profile_body, token_body, Harness, ACCOUNT, TIMEOUT};

// ============================================================================
// get_access_token
// ============================================================================

#[tokio::test]
async fn test_no_credential_makes_no_network_call() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let err = h.tokens.get_access_token(&account()).await.unwrap_err();
    assert!(matches!(err, TokenError::NoCredential(_)));
}

#[tokio::test]
async fn test_refresh_then_cache_hit_makes_one_call() {
    let h = Harness::new().await;
    h.store_refresh_token("1/refresh").await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=1%2Frefresh"))
        .and(body_string_contains("client_id=client-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.a", None, 3600)))
        .expect(1)
        .mount(&h.server)
        .await;

    let first = h.tokens.get_access_token(&account()).await.unwrap();
    let second = h.tokens.get_access_token(&account()).await.unwrap();

    assert_eq!(first.secret().expose_secret(), "ya29.a");
    assert_eq!(second.secret().expose_secret(), "ya29.a");
}

#[tokio::test]
async fn test_cached_ttl_never_exceeds_expires_in() {
    let h = Harness::new().await;
    h.store_refresh_token("1/refresh").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.a", None, 120)))
        .mount(&h.server)
        .await;

    h.tokens.get_access_token(&account()).await.unwrap();

    let ttl = h.cache.ttl(&access_token_key(&account())).unwrap();
    assert!(ttl <= Duration::from_secs(120), "ttl {ttl:?} exceeds expires_in");
    assert!(ttl > Duration::from_secs(100));
}

#[tokio::test]
async fn test_rotated_refresh_token_is_stored() {
    let h = Harness::new().await;
    h.store_refresh_token("old").await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("ya29.a", Some("new"), 3600)),
        )
        .mount(&h.server)
        .await;

    h.tokens.get_access_token(&account()).await.unwrap();
    assert_eq!(h.stored_refresh_token().await.as_deref(), Some("new"));
}

#[tokio::test]
async fn test_missing_refresh_token_in_response_keeps_stored_one() {
    let h = Harness::new().await;
    h.store_refresh_token("keep-me").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.a", None, 3600)))
        .mount(&h.server)
        .await;

    h.tokens.get_access_token(&account()).await.unwrap();
    assert_eq!(h.stored_refresh_token().await.as_deref(), Some("keep-me"));
}

#[tokio::test]
async fn test_invalid_grant_removes_all_account_state() {
    let h = Harness::new().await;
    h.store_refresh_token("revoked").await;
    h.cache
        .set(
            &profile_key(&account()),
            profile_body(ACCOUNT, "Ada").to_string(),
            Duration::from_secs(3600),
        )
        .await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": "invalid_grant", "error_description": "Token has been revoked."})),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let err = h.tokens.get_access_token(&account()).await.unwrap_err();
    assert!(matches!(err, TokenError::Revoked(_)));
    assert!(h.stored_refresh_token().await.is_none());
    assert!(h.cache.get(&profile_key(&account())).await.is_none());
    assert!(h.cache.get(&access_token_key(&account())).await.is_none());

    // Nothing left to refresh with: no second call to the token endpoint
    let err = h.tokens.get_access_token(&account()).await.unwrap_err();
    assert!(matches!(err, TokenError::NoCredential(_)));
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let h = Harness::new().await;
    h.store_refresh_token("r").await;
    h.cache_access_token("ya29.a").await;

    h.tokens.revoke(&account()).await.unwrap();
    h.tokens.revoke(&account()).await.unwrap();

    assert!(!h.tokens.is_authorized(&account()).await.unwrap());
    assert!(h.cache.get(&access_token_key(&account())).await.is_none());
}

#[tokio::test]
async fn test_server_error_keeps_refresh_token() {
    let h = Harness::new().await;
    h.store_refresh_token("still-good").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
        .mount(&h.server)
        .await;

    let err = h.tokens.get_access_token(&account()).await.unwrap_err();
    assert!(matches!(err, TokenError::Rejected(500)));
    assert_eq!(h.stored_refresh_token().await.as_deref(), Some("still-good"));
    assert!(h.cache.get(&access_token_key(&account())).await.is_none());
}

#[tokio::test]
async fn test_non_bearer_token_rejected() {
    let h = Harness::new().await;
    h.store_refresh_token("r").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "mac-token",
            "expires_in": 3600,
            "token_type": "MAC",
        })))
        .mount(&h.server)
        .await;

    let err = h.tokens.get_access_token(&account()).await.unwrap_err();
    assert!(matches!(err, TokenError::UnexpectedTokenType(ref t) if t == "MAC"));
    assert!(h.cache.get(&access_token_key(&account())).await.is_none());
    assert_eq!(h.stored_refresh_token().await.as_deref(), Some("r"));
}

#[tokio::test]
async fn test_token_endpoint_timeout_mutates_nothing() {
    let h = Harness::new().await;
    h.store_refresh_token("r").await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("late", None, 3600))
                .set_delay(TIMEOUT + Duration::from_secs(1)),
        )
        .mount(&h.server)
        .await;

    let err = h.tokens.get_access_token(&account()).await.unwrap_err();
    assert!(matches!(err, TokenError::Timeout));
    assert_eq!(h.stored_refresh_token().await.as_deref(), Some("r"));
    assert!(h.cache.get(&access_token_key(&account())).await.is_none());
}

#[tokio::test]
async fn test_concurrent_refreshes_leave_one_readable_credential() {
    let path = std::env::temp_dir().join(format!("atomgate_concurrent_{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let db = Database::open(path.to_str().unwrap()).await.unwrap();

    let h = Harness::with_db(db).await;
    h.store_refresh_token("original").await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("ya29.a", Some("rotated"), 3600)),
        )
        // Each caller misses the cache and runs its own exchange
        .expect(2)
        .mount(&h.server)
        .await;

    let id = account();
    let (a, b) = tokio::join!(
        h.tokens.get_access_token(&id),
        h.tokens.get_access_token(&id)
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(h.stored_refresh_token().await.as_deref(), Some("rotated"));
    h.server.verify().await;

    h.db.close().await;
    let _ = std::fs::remove_file(&path);
}

// ============================================================================
// Authorization code flow
// ============================================================================

#[tokio::test]
async fn test_authorization_code_exchange() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=4%2Fcode"))
        .and(body_string_contains("redirect_uri="))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("ya29.a", Some("1/r"), 3600)),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let grant = h.tokens.acquire_from_authorization_code("4/code").await.unwrap();
    assert_eq!(grant.access_token.secret().expose_secret(), "ya29.a");
    assert_eq!(
        grant.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
        Some("1/r".to_string())
    );
    assert_eq!(grant.expires_in, Duration::from_secs(3600));

    // Not associated with any account yet
    assert!(h.stored_refresh_token().await.is_none());
}

#[tokio::test]
async fn test_reused_authorization_code_is_invalid_grant() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&h.server)
        .await;

    let err = h
        .tokens
        .acquire_from_authorization_code("used")
        .await
        .unwrap_err();
    assert!(matches!(err, TokenError::InvalidGrant));
}

#[tokio::test]
async fn test_complete_authorization_stores_and_caches() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("ya29.a", Some("1/r"), 3600)),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/people/me"))
        .and(header("Authorization", "Bearer ya29.a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_body(ACCOUNT, "Ada")))
        .expect(1)
        .mount(&h.server)
        .await;

    let profile = h.tokens.complete_authorization("4/code").await.unwrap();
    assert_eq!(profile.id, ACCOUNT);

    assert_eq!(h.stored_refresh_token().await.as_deref(), Some("1/r"));
    assert!(h.cache.get(&profile_key(&account())).await.is_some());
    let cached = h.tokens.get_access_token(&account()).await.unwrap();
    assert_eq!(cached.secret().expose_secret(), "ya29.a");
}

#[tokio::test]
async fn test_slow_profile_lookup_shortens_cached_ttl() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.a", Some("1/r"), 60)))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/people/me"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(profile_body(ACCOUNT, "Ada"))
                .set_delay(Duration::from_secs(1)),
        )
        .mount(&h.server)
        .await;

    h.tokens.complete_authorization("4/code").await.unwrap();

    // The second spent waiting for the profile counts against the lifetime
    let ttl = h.cache.ttl(&access_token_key(&account())).unwrap();
    assert!(ttl <= Duration::from_secs(59), "ttl {ttl:?} ignores elapsed time");
}

#[tokio::test]
async fn test_complete_authorization_profile_failure_stores_nothing() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("ya29.a", Some("1/r"), 3600)),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;

    let err = h.tokens.complete_authorization("4/code").await.unwrap_err();
    assert!(matches!(err, TokenError::Profile(_)));

    let other = AccountId::new(ACCOUNT).unwrap();
    assert!(!h.tokens.is_authorized(&other).await.unwrap());
}
