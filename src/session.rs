use crate::api::ApiClient;
use crate::error::{ApiError, SessionError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The signed-in user. Only the user id survives a restart; the token lives
/// in memory for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(skip)]
    pub token: Option<String>,
}

/// Persists the session as a small TOML file.
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> SessionStore {
        SessionStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn load(&self) -> Result<Option<Session>, SessionError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let session = toml::from_str(&text).map_err(|source| SessionError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let text = toml::to_string(session)?;
        fs::write(&self.path, text).map_err(|e| self.io_error(e))
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Exchange credentials for a session and authorize the client with its token.
pub async fn sign_in(api: &ApiClient, email: &str, password: &str) -> Result<Session, ApiError> {
    let res = api.sign_in(email, password).await?;
    api.set_token(Some(res.data.token.clone()));
    info!(user_id = %res.data.user_id, "signed in");
    Ok(Session {
        user_id: res.data.user_id,
        token: Some(res.data.token),
    })
}

/// Forget the token and the persisted user id.
pub fn sign_out(api: &ApiClient, store: &SessionStore) -> Result<(), SessionError> {
    api.set_token(None);
    let result = store.clear();
    if let Err(err) = &result {
        warn!(error = %err, "failed to remove session file");
    }
    info!("signed out");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_session_round_trips_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested").join("session.toml"));
        assert_eq!(store.load().unwrap(), None);

        let session = Session {
            user_id: "u42".to_string(),
            token: Some("secret".to_string()),
        };
        store.save(&session).unwrap();

        let on_disk = fs::read_to_string(store.path()).unwrap();
        assert!(!on_disk.contains("secret"));

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.user_id, "u42");
        assert_eq!(loaded.token, None);
    }

    #[test]
    fn test_clear_removes_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.toml"));
        store
            .save(&Session {
                user_id: "u1".to_string(),
                token: None,
            })
            .unwrap();

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.toml"));
        fs::write(store.path(), "user_id = ").unwrap();
        assert!(matches!(store.load(), Err(SessionError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_sign_in_builds_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/sign-in"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {},
                "data": {"user_id": "u7", "token": "tok", "email": "me@x.io"}
            })))
            .mount(&server)
            .await;

        let api = ApiClient::new(&server.uri()).unwrap();
        let session = sign_in(&api, "me@x.io", "pw").await.unwrap();
        assert_eq!(session.user_id, "u7");
        assert_eq!(session.token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/sign-in"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let api = ApiClient::new(&server.uri()).unwrap();
        assert!(matches!(
            sign_in(&api, "me@x.io", "wrong").await,
            Err(ApiError::Http { status: 401, .. })
        ));
    }
}
