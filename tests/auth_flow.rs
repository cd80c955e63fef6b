//! Service-level tests of the authentication flows and the refresh token
//! rotation invariants, run against the in-memory store.

use std::sync::Arc;

use booktrack_server::auth::{AuthService, ClientMeta};
use booktrack_server::db::store::CredentialStore;
use booktrack_server::db::MemoryStore;
use booktrack_server::error::{AppError, AuthError};
use booktrack_server::Settings;

fn service() -> (AuthService, Arc<MemoryStore>) {
    let config = Settings::new_for_test().unwrap();
    let store = Arc::new(MemoryStore::new());
    let auth = AuthService::new(store.clone(), &config).unwrap();
    (auth, store)
}

fn meta() -> ClientMeta {
    ClientMeta {
        ip: Some("198.51.100.20".to_string()),
        user_agent: Some("auth-flow-tests".to_string()),
    }
}

fn assert_auth_err(result: Result<impl Sized, AppError>, expected: AuthError) {
    match result {
        Err(AppError::Auth(e)) => assert_eq!(e, expected),
        Err(other) => panic!("expected {:?}, got {}", expected, other),
        Ok(_) => panic!("expected {:?}, got success", expected),
    }
}

#[tokio::test]
async fn test_register_then_login() {
    let (auth, _store) = service();

    let session = auth
        .register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();
    assert!(session.created);
    assert_eq!(session.user.email, "ann@example.com");
    assert!(!session.access_token.is_empty());
    assert_eq!(session.expires_in, 15 * 60);

    let session = auth
        .login("ann@example.com", "secret1", &meta())
        .await
        .unwrap();
    assert!(!session.created);

    // The access token resolves back to the account without a ledger hit.
    let user = auth.authenticate_access(&session.access_token).await.unwrap();
    assert_eq!(user.email, "ann@example.com");
}

#[tokio::test]
async fn test_duplicate_email_rejected_case_insensitively() {
    let (auth, _store) = service();

    auth.register("Ann", "A@X.com", "secret1", &meta())
        .await
        .unwrap();

    let result = auth.register("Ann again", "a@x.com", "secret2", &meta()).await;
    assert_auth_err(result, AuthError::DuplicateEmail);
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let (auth, _store) = service();

    auth.register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();

    let wrong_password = auth.login("ann@example.com", "not-it", &meta()).await;
    assert_auth_err(wrong_password, AuthError::InvalidCredentials);

    // Unknown email is indistinguishable from a wrong password.
    let unknown_email = auth.login("nobody@example.com", "secret1", &meta()).await;
    assert_auth_err(unknown_email, AuthError::InvalidCredentials);
}

#[tokio::test]
async fn test_banned_user_cannot_login() {
    let (auth, store) = service();

    let session = auth
        .register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();
    store.set_banned(session.user.id, true).await.unwrap();

    let result = auth.login("ann@example.com", "secret1", &meta()).await;
    assert_auth_err(result, AuthError::AccountBanned);
}

#[tokio::test]
async fn test_refresh_rotates_and_detects_replay() {
    let (auth, _store) = service();

    let session = auth
        .register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();
    let original_bearer = session.refresh.bearer.clone();

    // Rotation succeeds and yields a different bearer value.
    let refreshed = auth.refresh(&original_bearer, &meta()).await.unwrap();
    assert_ne!(refreshed.refresh.bearer, original_bearer);
    assert!(!refreshed.access_token.is_empty());

    // Replaying the consumed bearer is flagged as theft, not merely rejected.
    let replay = auth.refresh(&original_bearer, &meta()).await;
    assert_auth_err(replay, AuthError::SuspiciousActivity);

    // The successor minted by the rotation died with the lineage.
    let successor = auth.refresh(&refreshed.refresh.bearer, &meta()).await;
    assert_auth_err(successor, AuthError::SuspiciousActivity);
}

#[tokio::test]
async fn test_reuse_collapses_all_sessions_of_the_user() {
    let (auth, _store) = service();

    auth.register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();

    // Three concurrent devices, three independent lineages.
    let phone = auth.login("ann@example.com", "secret1", &meta()).await.unwrap();
    let laptop = auth.login("ann@example.com", "secret1", &meta()).await.unwrap();
    let tablet = auth.login("ann@example.com", "secret1", &meta()).await.unwrap();

    // The phone rotates normally, then its old bearer leaks and is replayed.
    auth.refresh(&phone.refresh.bearer, &meta()).await.unwrap();
    let replay = auth.refresh(&phone.refresh.bearer, &meta()).await;
    assert_auth_err(replay, AuthError::SuspiciousActivity);

    // No other lineage survives the collapse.
    let laptop_result = auth.refresh(&laptop.refresh.bearer, &meta()).await;
    assert_auth_err(laptop_result, AuthError::SuspiciousActivity);
    let tablet_result = auth.refresh(&tablet.refresh.bearer, &meta()).await;
    assert_auth_err(tablet_result, AuthError::SuspiciousActivity);
}

#[tokio::test]
async fn test_garbled_bearer_does_not_revoke_sessions() {
    let (auth, _store) = service();

    let session = auth
        .register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();

    let garbled = auth.refresh("definitely-not-a-token", &meta()).await;
    assert_auth_err(garbled, AuthError::InvalidRefreshToken);

    // The legitimate session still rotates.
    auth.refresh(&session.refresh.bearer, &meta()).await.unwrap();
}

#[tokio::test]
async fn test_logout_ends_every_session() {
    let (auth, _store) = service();

    auth.register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();

    let a = auth.login("ann@example.com", "secret1", &meta()).await.unwrap();
    let b = auth.login("ann@example.com", "secret1", &meta()).await.unwrap();
    let c = auth.login("ann@example.com", "secret1", &meta()).await.unwrap();

    // Logging out from one device revokes all three lineages.
    auth.logout(Some(&b.refresh.bearer), &meta()).await.unwrap();

    assert!(auth.refresh(&a.refresh.bearer, &meta()).await.is_err());
    assert!(auth.refresh(&b.refresh.bearer, &meta()).await.is_err());
    assert!(auth.refresh(&c.refresh.bearer, &meta()).await.is_err());
}

#[tokio::test]
async fn test_logout_with_undecodable_token_is_a_no_op() {
    let (auth, _store) = service();

    let session = auth
        .register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();

    auth.logout(Some("garbage"), &meta()).await.unwrap();
    auth.logout(None, &meta()).await.unwrap();

    // Nothing was revoked.
    auth.refresh(&session.refresh.bearer, &meta()).await.unwrap();
}

#[tokio::test]
async fn test_ban_is_enforced_on_next_check() {
    let (auth, store) = service();

    let session = auth
        .register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();
    let access_token = session.access_token.clone();

    store.set_banned(session.user.id, true).await.unwrap();

    // The access token is still within its validity window, but the gate
    // re-reads the flag.
    let gate = auth.authenticate_access(&access_token).await;
    assert_auth_err(gate, AuthError::AccountBanned);

    // Refresh also answers with the ban, distinctly from token problems.
    let refresh = auth.refresh(&session.refresh.bearer, &meta()).await;
    assert_auth_err(refresh, AuthError::AccountBanned);
}

#[tokio::test]
async fn test_unban_restores_access() {
    let (auth, store) = service();

    let session = auth
        .register("Ann", "ann@example.com", "secret1", &meta())
        .await
        .unwrap();

    store.set_banned(session.user.id, true).await.unwrap();
    assert!(auth.authenticate_access(&session.access_token).await.is_err());

    store.set_banned(session.user.id, false).await.unwrap();
    let user = auth
        .authenticate_access(&session.access_token)
        .await
        .unwrap();
    assert!(!user.is_banned);
}

#[tokio::test]
async fn test_federated_login_without_provider_config() {
    let (auth, _store) = service();

    let result = auth.login_federated("some-assertion", &meta()).await;
    assert_auth_err(result, AuthError::IdentityProviderUnavailable);
}
