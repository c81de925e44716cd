mod common;

use chrono::Duration;
use common::{Harness, SECRET, bearer};
use jsonwebtoken::Algorithm;
use payledger::auth::token::{TokenClaims, TokenVerifier, issue_token};
use payledger::clock::ManualClock;
use payledger::error::{AuthError, PaymentError};
use std::sync::Arc;

fn verifier(clock: &ManualClock) -> TokenVerifier {
    TokenVerifier::new(SECRET, vec![Algorithm::HS256], Arc::new(clock.clone()))
}

#[tokio::test]
async fn test_verify_and_resolve_first_sighting() {
    let harness = Harness::default();
    let token = harness.token("user_123", Some("john@example.com"), true);

    let caller = harness
        .service
        .authenticate(Some(&bearer(&token)))
        .await
        .unwrap();

    assert_eq!(caller.principal.subject, "user_123");
    assert_eq!(caller.principal.email.as_deref(), Some("john@example.com"));
    assert!(caller.principal.verified);
    assert_eq!(caller.identity.subject, "user_123");
    assert_eq!(caller.identity.email.as_deref(), Some("john@example.com"));
    assert!(caller.identity.id > 0);
}

#[test]
fn test_wrong_secret_is_invalid() {
    let clock = ManualClock::default();
    let claims = TokenClaims {
        sub: "user_123".to_string(),
        email: None,
        is_verified: None,
        exp: (chrono::Utc::now() + Duration::hours(1)).timestamp(),
    };
    let token = issue_token(&claims, "someone-else", Algorithm::HS256).unwrap();

    assert!(matches!(
        verifier(&clock).verify(Some(&token)),
        Err(AuthError::Invalid(_))
    ));
}

#[test]
fn test_expired_reported_before_signature() {
    let clock = ManualClock::default();
    let claims = TokenClaims {
        sub: "user_123".to_string(),
        email: None,
        is_verified: Some(true),
        exp: (chrono::Utc::now() - Duration::minutes(5)).timestamp(),
    };
    let forged = issue_token(&claims, "someone-else", Algorithm::HS256).unwrap();

    assert_eq!(verifier(&clock).verify(Some(&forged)), Err(AuthError::Expired));
}

#[test]
fn test_disallowed_algorithm_is_invalid() {
    let clock = ManualClock::default();
    let claims = TokenClaims {
        sub: "user_1".to_string(),
        email: None,
        is_verified: None,
        exp: (chrono::Utc::now() + Duration::hours(1)).timestamp(),
    };
    let token = issue_token(&claims, SECRET, Algorithm::HS512).unwrap();

    assert!(matches!(
        verifier(&clock).verify(Some(&token)),
        Err(AuthError::Invalid(_))
    ));
}

#[tokio::test]
async fn test_pipeline_rejects_missing_header() {
    let harness = Harness::default();
    let err = harness.service.authenticate(None).await.unwrap_err();
    assert!(matches!(err, PaymentError::Auth(AuthError::Missing)));
}

#[tokio::test]
async fn test_require_verified_stage() {
    let mut config = payledger::config::AppConfig::default();
    config.auth.require_verified = true;
    let harness = Harness::new(config);

    let unverified = harness.token("user_9", None, false);
    let err = harness
        .service
        .authenticate(Some(&bearer(&unverified)))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Unauthorized { .. }));

    let verified = harness.token("user_9", None, true);
    assert!(harness.service.authenticate(Some(&bearer(&verified))).await.is_ok());
}
