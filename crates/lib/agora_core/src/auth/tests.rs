//! Session lifecycle scenarios against the in-memory stores.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};

use super::{AuthError, AuthResult};
use super::accounts::{AccountDirectory, MemoryAccountDirectory};
use super::dispatch::RecordingDispatcher;
use super::jwt::TokenIssuer;
use super::ledger::{MemoryRefreshLedger, RefreshTokenLedger};
use super::password::PasswordHasher;
use super::reset_codes::{MemoryResetCodeStore, ResetCodeStore};
use super::session::{Registration, SessionService, SessionStores};
use crate::models::auth::{Account, RefreshClaims, Requester, ResetRecord, Role};

const ROOT_EMAIL: &str = "root@agora.local";
const REFRESH_SECRET: &[u8] = b"test-refresh-secret";

struct Harness {
    service: SessionService,
    accounts: Arc<MemoryAccountDirectory>,
    ledger: Arc<MemoryRefreshLedger>,
    codes: Arc<MemoryResetCodeStore>,
    dispatcher: Arc<RecordingDispatcher>,
}

fn test_tokens() -> TokenIssuer {
    TokenIssuer::new(
        b"test-access-secret",
        REFRESH_SECRET,
        Duration::minutes(15),
        Duration::days(30),
    )
    .unwrap()
}

fn harness_with(dispatcher: RecordingDispatcher) -> Harness {
    let accounts = Arc::new(MemoryAccountDirectory::new());
    let ledger = Arc::new(MemoryRefreshLedger::new());
    let codes = Arc::new(MemoryResetCodeStore::new());
    let dispatcher = Arc::new(dispatcher);
    let stores = SessionStores {
        accounts: accounts.clone(),
        ledger: ledger.clone(),
        reset_codes: codes.clone(),
        dispatcher: dispatcher.clone(),
    };
    let service =
        SessionService::new(stores, test_tokens(), PasswordHasher::new(4), ROOT_EMAIL).unwrap();
    Harness {
        service,
        accounts,
        ledger,
        codes,
        dispatcher,
    }
}

fn harness() -> Harness {
    harness_with(RecordingDispatcher::new())
}

fn registration(email: &str, password: &str) -> Registration {
    Registration {
        name: "Alice".into(),
        email: email.into(),
        password: password.into(),
        secondary_id: None,
    }
}

fn root() -> Requester {
    Requester {
        email: ROOT_EMAIL.into(),
        role: Role::Root,
    }
}

fn user(email: &str) -> Requester {
    Requester {
        email: email.into(),
        role: Role::User,
    }
}

// ---------------------------------------------------------------------------
// register / login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_issues_tokens_and_public_view() {
    let h = harness();
    let session = h
        .service
        .register(Registration {
            name: "  Alice ".into(),
            email: " Alice@X.com".into(),
            password: "pw1".into(),
            secondary_id: Some(" 12.345.678-k ".into()),
        })
        .await
        .unwrap();

    assert_eq!(session.account.email, "alice@x.com");
    assert_eq!(session.account.name, "Alice");
    assert_eq!(session.account.role, Role::User);
    assert_eq!(session.account.secondary_id.as_deref(), Some("12.345.678-K"));

    let claims = h.service.tokens().verify_access(&session.tokens.access_token).unwrap();
    assert_eq!(claims.email, "alice@x.com");
    assert_eq!(claims.role, Role::User);
    assert_eq!(h.ledger.len(), 1);

    let stored = h.accounts.get_by_email("alice@x.com").await.unwrap().unwrap();
    assert_ne!(stored.password_hash, "pw1");
}

#[tokio::test]
async fn register_rejects_reserved_root_identity() {
    let h = harness();
    let err = h
        .service
        .register(registration(" ROOT@agora.local ", "pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ReservedIdentity));
    assert!(h.accounts.is_empty());
}

#[tokio::test]
async fn register_rejects_duplicates() {
    let h = harness();
    h.service
        .register(Registration {
            secondary_id: Some("11-1".into()),
            ..registration("alice@x.com", "pw1")
        })
        .await
        .unwrap();

    let dup_email = h
        .service
        .register(registration("ALICE@x.com", "pw2"))
        .await
        .unwrap_err();
    assert!(matches!(dup_email, AuthError::AlreadyExists));

    let dup_secondary = h
        .service
        .register(Registration {
            secondary_id: Some("11-1".into()),
            ..registration("other@x.com", "pw2")
        })
        .await
        .unwrap_err();
    assert!(matches!(dup_secondary, AuthError::AlreadyExists));
}

#[tokio::test]
async fn register_validates_required_fields() {
    let h = harness();
    for reg in [
        registration("", "pw"),
        registration("no-at-sign", "pw"),
        registration("a@x.com", ""),
        Registration {
            name: "   ".into(),
            ..registration("a@x.com", "pw")
        },
    ] {
        let err = h.service.register(reg).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)), "got {err:?}");
    }
}

#[tokio::test]
async fn login_succeeds_with_normalized_email() {
    let h = harness();
    h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    let session = h.service.login("  ALICE@x.com", "pw1").await.unwrap();
    assert_eq!(session.account.email, "alice@x.com");
    assert_eq!(h.ledger.len(), 2);
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let h = harness();
    h.service.register(registration("alice@x.com", "pw1")).await.unwrap();

    let wrong_password = h.service.login("alice@x.com", "nope").await.unwrap_err();
    let unknown_email = h.service.login("ghost@x.com", "pw1").await.unwrap_err();

    assert!(matches!(wrong_password, AuthError::InvalidCredentials));
    assert!(matches!(unknown_email, AuthError::InvalidCredentials));
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());
}

// ---------------------------------------------------------------------------
// refresh rotation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_is_single_use() {
    let h = harness();
    let session = h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    let original = session.tokens.refresh_token;

    let rotated = h.service.refresh(&original).await.unwrap();
    assert_ne!(rotated.refresh_token, original);
    assert!(h.service.tokens().verify_access(&rotated.access_token).is_some());

    let replay = h.service.refresh(&original).await.unwrap_err();
    assert!(matches!(replay, AuthError::InvalidRefreshToken));

    // The replacement is itself good for exactly one rotation.
    h.service.refresh(&rotated.refresh_token).await.unwrap();
    assert!(h.service.refresh(&rotated.refresh_token).await.is_err());
}

#[tokio::test]
async fn refresh_rejects_garbage_and_access_tokens() {
    let h = harness();
    let session = h.service.register(registration("alice@x.com", "pw1")).await.unwrap();

    for token in ["", "not.a.jwt", session.tokens.access_token.as_str()] {
        let err = h.service.refresh(token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
    }
}

#[tokio::test]
async fn refresh_rejects_token_not_matching_stored_hash() {
    let h = harness();
    let session = h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    let claims = h.service.tokens().verify_refresh(&session.tokens.refresh_token).unwrap();

    // Validly signed, same id, different bytes.
    let forged = encode(
        &Header::default(),
        &RefreshClaims {
            iat: claims.iat - 10,
            ..claims.clone()
        },
        &EncodingKey::from_secret(REFRESH_SECRET),
    )
    .unwrap();
    assert_ne!(forged, session.tokens.refresh_token);

    let err = h.service.refresh(&forged).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidRefreshToken));

    // The genuine token was not consumed by the forged attempt.
    h.service.refresh(&session.tokens.refresh_token).await.unwrap();
}

#[tokio::test]
async fn refresh_fails_when_account_is_gone() {
    let h = harness();
    let phantom = Account {
        email: "ghost@x.com".into(),
        name: "Ghost".into(),
        password_hash: String::new(),
        role: Role::User,
        secondary_id: None,
        created_at: Utc::now(),
    };
    let pair = h.service.issue_tokens(&phantom).await.unwrap();
    let err = h.service.refresh(&pair.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidRefreshToken));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_of_one_token_succeed_once() {
    let h = Arc::new(harness());
    let session = h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    let token = session.tokens.refresh_token;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move { h.service.refresh(&token).await }));
    }
    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn revoke_all_racing_refresh_allows_at_most_one_more_pair() {
    let h = Arc::new(harness());
    let session = h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    let token = session.tokens.refresh_token;

    let racer = {
        let h = h.clone();
        let token = token.clone();
        tokio::spawn(async move { h.service.refresh(&token).await })
    };
    h.service.logout_all(&user("alice@x.com")).await.unwrap();
    let raced = racer.await.unwrap();

    // The presented token is dead either way.
    assert!(h.service.refresh(&token).await.is_err());

    if let Ok(pair) = raced {
        // Whatever slipped through can rotate at most once more.
        if h.service.refresh(&pair.refresh_token).await.is_ok() {
            assert!(h.service.refresh(&pair.refresh_token).await.is_err());
        }
    }
}

// ---------------------------------------------------------------------------
// logout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logout_revokes_only_that_session() {
    let h = harness();
    let first = h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    let second = h.service.login("alice@x.com", "pw1").await.unwrap();

    h.service.logout(&first.tokens.refresh_token).await.unwrap();
    assert!(h.service.refresh(&first.tokens.refresh_token).await.is_err());
    h.service.refresh(&second.tokens.refresh_token).await.unwrap();

    // Unknown or malformed tokens are ignored.
    h.service.logout("garbage").await.unwrap();
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let h = harness();
    let a = h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    let b = h.service.login("alice@x.com", "pw1").await.unwrap();

    let revoked = h.service.logout_all(&user("alice@x.com")).await.unwrap();
    assert_eq!(revoked, 2);
    assert!(h.service.refresh(&a.tokens.refresh_token).await.is_err());
    assert!(h.service.refresh(&b.tokens.refresh_token).await.is_err());
}

#[tokio::test]
async fn me_returns_view_or_not_found() {
    let h = harness();
    h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    assert_eq!(h.service.me("alice@x.com").await.unwrap().name, "Alice");
    assert!(matches!(
        h.service.me("ghost@x.com").await.unwrap_err(),
        AuthError::NotFound
    ));
}

// ---------------------------------------------------------------------------
// authenticated password reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn root_reset_revokes_original_and_rotated_tokens() {
    let h = harness();
    let session = h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    let original = session.tokens.refresh_token;
    let rotated = h.service.refresh(&original).await.unwrap().refresh_token;

    h.service
        .reset_password("alice@x.com", "pw2", &root())
        .await
        .unwrap();

    assert!(matches!(
        h.service.refresh(&original).await.unwrap_err(),
        AuthError::InvalidRefreshToken
    ));
    assert!(matches!(
        h.service.refresh(&rotated).await.unwrap_err(),
        AuthError::InvalidRefreshToken
    ));
    assert!(h.service.login("alice@x.com", "pw1").await.is_err());
    h.service.login("alice@x.com", "pw2").await.unwrap();
}

#[tokio::test]
async fn reset_password_requires_root_or_self() {
    let h = harness();
    h.service.register(registration("alice@x.com", "pw1")).await.unwrap();
    h.service.register(registration("bob@x.com", "pw1")).await.unwrap();

    let err = h
        .service
        .reset_password("alice@x.com", "pw2", &user("bob@x.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Forbidden));

    let admin = Requester {
        email: "bob@x.com".into(),
        role: Role::Admin,
    };
    let err = h
        .service
        .reset_password("alice@x.com", "pw2", &admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Forbidden));

    h.service
        .reset_password("Alice@X.com", "pw2", &user("alice@x.com"))
        .await
        .unwrap();
    h.service.login("alice@x.com", "pw2").await.unwrap();
}

#[tokio::test]
async fn reset_password_for_missing_account_is_not_found() {
    let h = harness();
    let err = h
        .service
        .reset_password("ghost@x.com", "pw", &root())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NotFound));
}

// ---------------------------------------------------------------------------
// forgot-password flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_reset_looks_the_same_for_unknown_accounts() {
    let h = harness();
    h.service.register(registration("bob@x.com", "pw1")).await.unwrap();

    let known = h.service.request_password_reset("bob@x.com").await;
    let unknown = h.service.request_password_reset("nobody@x.com").await;
    assert!(known.is_ok());
    assert!(unknown.is_ok());

    assert!(h.codes.get("nobody@x.com").await.unwrap().is_none());
    assert_eq!(h.dispatcher.sent().len(), 1);
}

#[tokio::test]
async fn reset_code_verifies_then_expires() {
    let h = harness();
    h.service.register(registration("bob@x.com", "pw1")).await.unwrap();
    h.service.request_password_reset("BOB@x.com").await.unwrap();

    let code = h.dispatcher.last_code_for("bob@x.com").unwrap();
    assert_eq!(code.len(), 6);
    assert!(code.parse::<u32>().is_ok_and(|n| (100_000..=999_999).contains(&n)));

    let record = h.codes.get("bob@x.com").await.unwrap().unwrap();
    assert_eq!(record.code, code);
    let ttl_ms = record.expires_at - Utc::now().timestamp_millis();
    assert!(ttl_ms > 14 * 60 * 1000 && ttl_ms <= 15 * 60 * 1000);

    h.service.verify_reset_code("bob@x.com", &code).await.unwrap();
    // Verification does not consume the code.
    h.service.verify_reset_code("bob@x.com", &code).await.unwrap();

    // Move the expiry into the past.
    let past = Utc::now().timestamp_millis() - 1;
    h.codes.save("bob@x.com", &code, past).await.unwrap();

    let err = h.service.verify_reset_code("bob@x.com", &code).await.unwrap_err();
    assert!(matches!(err, AuthError::Expired));
    assert!(h.codes.get("bob@x.com").await.unwrap().is_none());

    let err = h.service.verify_reset_code("bob@x.com", &code).await.unwrap_err();
    assert!(matches!(err, AuthError::NotFound));
}

#[tokio::test]
async fn wrong_or_superseded_code_is_invalid() {
    let h = harness();
    h.service.register(registration("bob@x.com", "pw1")).await.unwrap();

    h.service.request_password_reset("bob@x.com").await.unwrap();
    let first = h.dispatcher.last_code_for("bob@x.com").unwrap();
    h.service.request_password_reset("bob@x.com").await.unwrap();
    let second = h.dispatcher.last_code_for("bob@x.com").unwrap();

    let wrong = if second == "123456" { "654321" } else { "123456" };
    let err = h.service.verify_reset_code("bob@x.com", wrong).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidCode));

    if first != second {
        let err = h.service.verify_reset_code("bob@x.com", &first).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
    }
    h.service.verify_reset_code("bob@x.com", &second).await.unwrap();
}

#[tokio::test]
async fn confirm_reset_succeeds_once_and_revokes_sessions() {
    let h = harness();
    let session = h.service.register(registration("bob@x.com", "pw1")).await.unwrap();
    h.service.request_password_reset("bob@x.com").await.unwrap();
    let code = h.dispatcher.last_code_for("bob@x.com").unwrap();

    h.service
        .confirm_password_reset("bob@x.com", &code, "pw2")
        .await
        .unwrap();

    assert!(h.service.login("bob@x.com", "pw1").await.is_err());
    h.service.login("bob@x.com", "pw2").await.unwrap();
    assert!(matches!(
        h.service.refresh(&session.tokens.refresh_token).await.unwrap_err(),
        AuthError::InvalidRefreshToken
    ));

    let err = h
        .service
        .confirm_password_reset("bob@x.com", &code, "pw3")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AlreadyUsed));
    h.service.login("bob@x.com", "pw2").await.unwrap();
}

#[tokio::test]
async fn confirm_reset_with_wrong_code_changes_nothing() {
    let h = harness();
    h.service.register(registration("bob@x.com", "pw1")).await.unwrap();
    h.service.request_password_reset("bob@x.com").await.unwrap();
    let code = h.dispatcher.last_code_for("bob@x.com").unwrap();
    let wrong = if code == "123456" { "654321" } else { "123456" };

    let err = h
        .service
        .confirm_password_reset("bob@x.com", wrong, "pw2")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCode));
    h.service.login("bob@x.com", "pw1").await.unwrap();
    assert!(!h.codes.get("bob@x.com").await.unwrap().unwrap().used);
}

#[tokio::test]
async fn dispatch_failure_keeps_stored_code() {
    let h = harness_with(RecordingDispatcher::failing());
    h.service.register(registration("bob@x.com", "pw1")).await.unwrap();

    h.service.request_password_reset("bob@x.com").await.unwrap();
    let code = h.dispatcher.last_code_for("bob@x.com").unwrap();
    h.service.verify_reset_code("bob@x.com", &code).await.unwrap();
}

/// Saves `REPLACEMENT_CODE` for the email right before each conditional
/// transition, as a concurrent `request_password_reset` would.
struct RacingCodeStore {
    inner: MemoryResetCodeStore,
}

const REPLACEMENT_CODE: &str = "999999";

impl RacingCodeStore {
    async fn supersede(&self, email: &str) -> AuthResult<()> {
        let expires_at = (Utc::now() + Duration::minutes(15)).timestamp_millis();
        self.inner.save(email, REPLACEMENT_CODE, expires_at).await
    }
}

#[async_trait]
impl ResetCodeStore for RacingCodeStore {
    async fn save(&self, email: &str, code: &str, expires_at: i64) -> AuthResult<()> {
        self.inner.save(email, code, expires_at).await
    }

    async fn get(&self, email: &str) -> AuthResult<Option<ResetRecord>> {
        self.inner.get(email).await
    }

    async fn mark_used(&self, email: &str, code: &str) -> AuthResult<bool> {
        self.supersede(email).await?;
        self.inner.mark_used(email, code).await
    }

    async fn delete_if_expired(&self, email: &str, now_ms: i64) -> AuthResult<bool> {
        self.supersede(email).await?;
        self.inner.delete_if_expired(email, now_ms).await
    }

    async fn purge_expired(&self, now_ms: i64) -> AuthResult<u64> {
        self.inner.purge_expired(now_ms).await
    }
}

fn racing_service() -> (SessionService, Arc<RacingCodeStore>) {
    let codes = Arc::new(RacingCodeStore {
        inner: MemoryResetCodeStore::new(),
    });
    let stores = SessionStores {
        accounts: Arc::new(MemoryAccountDirectory::new()),
        ledger: Arc::new(MemoryRefreshLedger::new()),
        reset_codes: codes.clone(),
        dispatcher: Arc::new(RecordingDispatcher::new()),
    };
    let service =
        SessionService::new(stores, test_tokens(), PasswordHasher::new(4), ROOT_EMAIL).unwrap();
    (service, codes)
}

#[tokio::test]
async fn confirm_with_code_superseded_mid_flight_applies_nothing() {
    let (service, codes) = racing_service();
    service.register(registration("bob@x.com", "pw1")).await.unwrap();

    let old_code = "123456";
    let expires_at = (Utc::now() + Duration::minutes(15)).timestamp_millis();
    codes.save("bob@x.com", old_code, expires_at).await.unwrap();

    let err = service
        .confirm_password_reset("bob@x.com", old_code, "pw2")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCode), "got {err:?}");

    service.login("bob@x.com", "pw1").await.unwrap();
    assert!(service.login("bob@x.com", "pw2").await.is_err());

    // The newer code is still live and unused.
    let record = codes.get("bob@x.com").await.unwrap().unwrap();
    assert_eq!(record.code, REPLACEMENT_CODE);
    assert!(!record.used);
    service
        .verify_reset_code("bob@x.com", REPLACEMENT_CODE)
        .await
        .unwrap();
}

#[tokio::test]
async fn expiry_cleanup_keeps_code_saved_mid_flight() {
    let (service, codes) = racing_service();
    let past = Utc::now().timestamp_millis() - 1;
    codes.save("bob@x.com", "123456", past).await.unwrap();

    let err = service
        .verify_reset_code("bob@x.com", "123456")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Expired));

    let record = codes.get("bob@x.com").await.unwrap().unwrap();
    assert_eq!(record.code, REPLACEMENT_CODE);
    service
        .verify_reset_code("bob@x.com", REPLACEMENT_CODE)
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// root bootstrap and purge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn root_bootstrap_is_idempotent() {
    let h = harness();
    assert!(
        h.service
            .ensure_root_bootstrap(ROOT_EMAIL, Some("rootpw"))
            .await
            .unwrap()
    );
    let first = h.accounts.get_by_email(ROOT_EMAIL).await.unwrap().unwrap();
    assert_eq!(first.role, Role::Root);

    assert!(
        !h.service
            .ensure_root_bootstrap(ROOT_EMAIL, Some("different"))
            .await
            .unwrap()
    );
    let second = h.accounts.get_by_email(ROOT_EMAIL).await.unwrap().unwrap();
    assert_eq!(first.password_hash, second.password_hash);
    assert_eq!(h.accounts.len(), 1);

    let session = h.service.login(ROOT_EMAIL, "rootpw").await.unwrap();
    assert_eq!(session.account.role, Role::Root);
}

#[tokio::test]
async fn root_bootstrap_without_password_is_disabled() {
    let h = harness();
    assert!(!h.service.ensure_root_bootstrap(ROOT_EMAIL, None).await.unwrap());
    assert!(!h.service.ensure_root_bootstrap(ROOT_EMAIL, Some("")).await.unwrap());
    assert!(h.accounts.is_empty());
}

#[tokio::test]
async fn purge_removes_expired_codes_and_tokens() {
    let h = harness();
    let past = Utc::now().timestamp_millis() - 1_000;
    h.codes.save("old@x.com", "111111", past).await.unwrap();
    h.codes
        .save("new@x.com", "222222", past + 3_600_000)
        .await
        .unwrap();
    h.ledger
        .save(crate::models::auth::RefreshRecord {
            token_id: "stale".into(),
            email: "old@x.com".into(),
            token_hash: "x".into(),
            revoked: false,
            created_at: Utc::now() - Duration::days(31),
            expires_at: Utc::now() - Duration::days(1),
        })
        .await
        .unwrap();

    let report = h.service.purge_expired().await.unwrap();
    assert_eq!(report.reset_codes, 1);
    assert_eq!(report.refresh_tokens, 1);
    assert!(h.codes.get("new@x.com").await.unwrap().is_some());
}
