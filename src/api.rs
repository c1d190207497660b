//! REST calls against the chat backend.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::{MessageRecord, User, UserRecord};
use crate::session::{Credentials, Registration};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        ImageUpload {
            file_name: "image.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes,
        }
    }
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError>;
    async fn sign_up(&self, registration: &Registration) -> Result<AuthResponse, ApiError>;
    async fn fetch_users(&self, token: &str) -> Result<Vec<UserRecord>, ApiError>;
    async fn fetch_messages(&self, token: &str, peer_id: &str) -> Result<Vec<MessageRecord>, ApiError>;
    async fn send_message(&self, token: &str, receiver_id: &str, text: &str) -> Result<Value, ApiError>;
    async fn send_image(&self, token: &str, receiver_id: &str, image: ImageUpload) -> Result<Value, ApiError>;
    async fn delete_message(&self, token: &str, message_id: &str) -> Result<(), ApiError>;
}

pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: &str) -> Self {
        HttpApi {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder.header(reqwest::header::AUTHORIZATION, token)
    }

    async fn send_authorized(&self, builder: RequestBuilder, token: &str) -> Result<Response, ApiError> {
        let response = self.authorized(builder, token).send().await?;
        check_status(response, true).await
    }
}

/// Maps a non-success response to an error. With `session_bound`, a 401
/// means the stored token is no longer accepted.
async fn check_status(response: Response, session_bound: bool) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if session_bound && status == StatusCode::UNAUTHORIZED {
        log::warn!("Backend rejected the session token");
        return Err(ApiError::SessionExpired);
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    Err(ApiError::Rejected {
        status: status.as_u16(),
        message: rejection_message(&body, status),
    })
}

fn rejection_message(body: &Value, status: StatusCode) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .map_or_else(|| format!("Request failed with status {status}"), str::to_string)
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        let response = self
            .client
            .post(self.url("v1/signin"))
            .json(&json!({ "email": credentials.email, "password": credentials.password }))
            .send()
            .await?;
        let auth: AuthResponse = check_status(response, false).await?.json().await?;
        if auth.token.is_none() {
            return Err(ApiError::Decode("sign-in response carried no token".to_string()));
        }
        Ok(auth)
    }

    async fn sign_up(&self, registration: &Registration) -> Result<AuthResponse, ApiError> {
        let response = self
            .client
            .post(self.url("v1/signup"))
            .json(&json!({
                "name": registration.name,
                "email": registration.email,
                "password": registration.password,
            }))
            .send()
            .await?;
        Ok(check_status(response, false).await?.json().await?)
    }

    async fn fetch_users(&self, token: &str) -> Result<Vec<UserRecord>, ApiError> {
        let response = self.send_authorized(self.client.get(self.url("v1/users")), token).await?;
        Ok(response.json().await?)
    }

    async fn fetch_messages(&self, token: &str, peer_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        let builder = self.client.get(self.url(&format!("v2/messages/{peer_id}")));
        let response: MessagesResponse = self.send_authorized(builder, token).await?.json().await?;
        Ok(response.messages)
    }

    async fn send_message(&self, token: &str, receiver_id: &str, text: &str) -> Result<Value, ApiError> {
        let builder = self
            .client
            .post(self.url("v2/send"))
            .json(&json!({ "receiverId": receiver_id, "message": text }));
        Ok(self.send_authorized(builder, token).await?.json().await?)
    }

    async fn send_image(&self, token: &str, receiver_id: &str, image: ImageUpload) -> Result<Value, ApiError> {
        let part = Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.mime_type)?;
        let form = Form::new().text("receiverId", receiver_id.to_string()).part("image", part);
        let builder = self.client.post(self.url("v2/send-image")).multipart(form);
        Ok(self.send_authorized(builder, token).await?.json().await?)
    }

    async fn delete_message(&self, token: &str, message_id: &str) -> Result<(), ApiError> {
        let builder = self.client.delete(self.url(&format!("v2/delete/{message_id}")));
        self.send_authorized(builder, token).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let api = HttpApi::new("http://localhost:8000/");
        assert_eq!(api.url("v1/signin"), "http://localhost:8000/v1/signin");
        assert_eq!(api.url("v2/messages/42"), "http://localhost:8000/v2/messages/42");
    }

    #[test]
    fn rejection_prefers_backend_message() {
        let body = json!({ "message": "Invalid credentials" });
        assert_eq!(rejection_message(&body, StatusCode::BAD_REQUEST), "Invalid credentials");
        assert_eq!(
            rejection_message(&Value::Null, StatusCode::INTERNAL_SERVER_ERROR),
            "Request failed with status 500 Internal Server Error"
        );
    }

    fn response(status: u16, body: &'static str) -> Response {
        Response::from(http::Response::builder().status(status).body(body).unwrap())
    }

    #[tokio::test]
    async fn unauthorized_expires_only_bound_sessions() {
        let err = check_status(response(401, r#"{"message":"jwt expired"}"#), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SessionExpired));

        let err = check_status(response(401, r#"{"message":"Invalid credentials"}"#), false)
            .await
            .unwrap_err();
        match err {
            ApiError::Rejected { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_status_keeps_backend_message() {
        let err = check_status(response(500, r#"{"message":"Failed to send message"}"#), true)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Request rejected (500): Failed to send message");

        let err = check_status(response(404, "not json"), true).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Request rejected (404): Request failed with status 404 Not Found"
        );
    }

    #[tokio::test]
    async fn success_passes_the_response_through() {
        let ok = check_status(response(200, r#"{"success":true}"#), true).await.unwrap();
        let body: Value = ok.json().await.unwrap();
        assert_eq!(body["success"], true);
    }

    #[test]
    fn auth_response_tolerates_missing_fields() {
        let auth: AuthResponse = serde_json::from_str(r#"{"message":"created"}"#).unwrap();
        assert!(auth.token.is_none());
        assert!(auth.user.is_none());

        let auth: AuthResponse =
            serde_json::from_str(r#"{"token":"t","user":{"_id":"u1","name":"Ana","email":"a@x.io"}}"#).unwrap();
        assert_eq!(auth.user.unwrap().id, "u1");
    }

    #[test]
    fn messages_response_defaults_to_empty() {
        let response: MessagesResponse = serde_json::from_str("{}").unwrap();
        assert!(response.messages.is_empty());
    }
}
