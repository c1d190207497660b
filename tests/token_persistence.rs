use std::sync::Arc;

use chat_client::models::User;
use chat_client::session::SessionStore;
use chat_client::token_store::{FileTokenStore, TokenStore, TOKEN_KEY};

#[tokio::test]
async fn token_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTokenStore::new(dir.path()).await.unwrap();
    assert_eq!(store.path(), dir.path().join(TOKEN_KEY));
    assert_eq!(store.load().await.unwrap(), None);

    store.save("abc").await.unwrap();
    drop(store);

    let reopened = FileTokenStore::new(dir.path()).await.unwrap();
    assert_eq!(reopened.load().await.unwrap().as_deref(), Some("abc"));

    reopened.remove().await.unwrap();
    assert_eq!(reopened.load().await.unwrap(), None);
    // Removing twice is fine.
    reopened.remove().await.unwrap();
}

#[tokio::test]
async fn creates_missing_storage_dir() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let store = FileTokenStore::new(&nested).await.unwrap();
    store.save("t").await.unwrap();
    assert!(nested.join(TOKEN_KEY).exists());
}

#[tokio::test]
async fn session_store_restores_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let tokens = Arc::new(FileTokenStore::new(dir.path()).await.unwrap());

    let mut sessions = SessionStore::new(tokens.clone());
    let user = User {
        id: "me".to_string(),
        name: "Me".to_string(),
        email: "me@example.com".to_string(),
    };
    sessions.establish(Some(user), "tok".to_string()).await.unwrap();

    let mut restarted = SessionStore::new(tokens.clone());
    assert!(restarted.restore().await.unwrap());
    assert!(restarted.is_authenticated());
    assert_eq!(restarted.token(), Some("tok"));

    restarted.logout().await.unwrap();
    assert!(!restarted.is_authenticated());
    assert!(!dir.path().join(TOKEN_KEY).exists());
}
