pub mod common;

use common::fakes::FakeSecretStore;
use common::log_capture::capture_logs;
use probe_core::credentials::{CredentialError, PASSWORD_MASK, SecretStoreCredentialProvider};
use probe_core::CredentialProvider;

const SECRET_ID: &str = "prod/aurora/probe";

#[tokio::test]
async fn should_resolve_credentials_without_logging_password() {
    // Given a secret holding username and password
    let store = FakeSecretStore::default().with_secret(
        SECRET_ID,
        r#"{"username":"probe","password":"s3cr3t-value","host":"db"}"#,
    );
    let provider = SecretStoreCredentialProvider::new(store, SECRET_ID);
    let (logs, _guard) = capture_logs();

    // When resolving
    let credentials = provider.resolve().await.unwrap();

    // Then both fields are returned
    assert_eq!(credentials.username, "probe");
    assert_eq!(credentials.password(), "s3cr3t-value");

    // And the logged payload is masked
    let logs = logs.contents();
    assert!(logs.contains(PASSWORD_MASK));
    assert!(logs.contains("probe"));
    assert!(!logs.contains("s3cr3t-value"));
}

#[tokio::test]
async fn should_fail_when_password_field_is_missing() {
    // Given a secret without a password
    let store = FakeSecretStore::default().with_secret(SECRET_ID, r#"{"username":"probe"}"#);
    let provider = SecretStoreCredentialProvider::new(store, SECRET_ID);

    // When resolving
    let err = provider.resolve().await.unwrap_err();

    // Then the missing field is named
    assert!(matches!(
        err,
        CredentialError::MissingField {
            field: "password",
            ..
        }
    ));
}

#[tokio::test]
async fn should_fail_when_secret_is_not_json() {
    // Given a secret that is plain text
    let store = FakeSecretStore::default().with_secret(SECRET_ID, "not json");
    let provider = SecretStoreCredentialProvider::new(store, SECRET_ID);

    // When resolving
    let err = provider.resolve().await.unwrap_err();

    // Then parsing fails
    assert!(matches!(err, CredentialError::SecretParse { .. }));
}

#[tokio::test]
async fn should_fail_when_secret_is_unknown() {
    // Given an empty store
    let provider = SecretStoreCredentialProvider::new(FakeSecretStore::default(), SECRET_ID);

    // When resolving
    let err = provider.resolve().await.unwrap_err();

    // Then the fetch error carries the identifier
    assert!(matches!(err, CredentialError::SecretFetch { .. }));
    assert!(err.to_string().contains(SECRET_ID));
}

