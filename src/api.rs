use crate::cache::Fetch;
use crate::error::ApiError;
use crate::models::{
    Envelope, NewLabel, SignInData, SignInRequest, Task, TaskLabel, TaskPatch,
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// HTTP client for the CheckList REST API. Cheap to clone; clones share the
/// connection pool, cookie jar and bearer token.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<ApiClient, ApiError> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    // Cache keys are these URLs.

    pub fn tasks_url(&self) -> String {
        format!("{}/tasks", self.base_url)
    }

    pub fn task_url(&self, task_id: &str) -> String {
        format!("{}/tasks/{}", self.base_url, task_id)
    }

    pub fn labels_url(&self) -> String {
        format!("{}/labels", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.token() {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    /// Sends the request and returns the body of a 2xx response.
    async fn send(&self, builder: RequestBuilder) -> Result<String, ApiError> {
        let res = builder.send().await?;
        let status = res.status();
        let url = res.url().to_string();

        if status.is_success() {
            debug!(%url, status = status.as_u16(), "request succeeded");
            Ok(res.text().await?)
        } else {
            let body = res.text().await.unwrap_or_default();
            warn!(%url, status = status.as_u16(), %body, "request failed");
            Err(ApiError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let body = self.send(self.request(Method::GET, url)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Envelope<SignInData>, ApiError> {
        let url = format!("{}/auth/sign-in", self.base_url);
        let body = self
            .send(
                self.request(Method::POST, &url)
                    .json(&SignInRequest { email, password }),
            )
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn update_task(
        &self,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<Envelope<Task>, ApiError> {
        let body = self
            .send(self.request(Method::PUT, &self.task_url(task_id)).json(patch))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, &self.task_url(task_id)))
            .await?;
        Ok(())
    }

    pub async fn create_label(&self, label: &NewLabel) -> Result<Envelope<TaskLabel>, ApiError> {
        let body = self
            .send(self.request(Method::POST, &self.labels_url()).json(label))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn delete_label(&self, label_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/{}", self.labels_url(), label_id);
        self.send(self.request(Method::DELETE, &url)).await?;
        Ok(())
    }
}

#[async_trait]
impl<T> Fetch<T> for ApiClient
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self, key: &str) -> Result<T, ApiError> {
        self.get_json(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use crate::test_support::task_json;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_sign_in_posts_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/sign-in"))
            .and(body_json(json!({"email": "a@b.c", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {},
                "data": {"user_id": "u1", "token": "tok", "email": "a@b.c"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(&server.uri()).unwrap();
        let res = api.sign_in("a@b.c", "pw").await.unwrap();
        assert_eq!(res.data.user_id, "u1");
        assert_eq!(res.data.token, "tok");
    }

    #[tokio::test]
    async fn test_token_is_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"meta": {}, "data": task_json("t1", "A")})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(&server.uri()).unwrap();
        api.set_token(Some("tok".to_string()));
        let task: Envelope<Task> = api.get_json(&api.task_url("t1")).await.unwrap();
        assert_eq!(task.data.title, "A");
        assert_eq!(task.data.status, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_non_success_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/labels/l1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let api = ApiClient::new(&server.uri()).unwrap();
        match api.delete_label("l1").await {
            Err(ApiError::Http { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected http error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(&server.uri()).unwrap();
        assert!(api.delete_task("t1").await.is_ok());
    }

    #[tokio::test]
    async fn test_put_sends_partial_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tasks/t1"))
            .and(body_json(json!({"content": "new notes"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"meta": {}, "data": task_json("t1", "A")})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(&server.uri()).unwrap();
        let patch = TaskPatch {
            content: Some("new notes".to_string()),
            ..TaskPatch::default()
        };
        assert!(api.update_task("t1", &patch).await.is_ok());
    }

    #[tokio::test]
    async fn test_garbage_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let api = ApiClient::new(&server.uri()).unwrap();
        let res: Result<Envelope<Vec<TaskLabel>>, ApiError> = api.get_json(&api.labels_url()).await;
        assert!(matches!(res, Err(ApiError::Decode(_))));
    }
}
