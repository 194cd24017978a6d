//! HTTP client for the mutation and pull endpoints

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::coordinator::MutationTransport;
use crate::client::graph::Puller;
use crate::errors::{ClientError, ClientResult};
use crate::sync::{
    CreateNewIssueRequest, CreateRequest, DeleteRequest, MutationReceipt, PullResponse,
    UpdateRequest,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// `base_url` is the server root, e.g. `http://localhost:3000`.
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> ClientResult<MutationReceipt> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        read_response(response).await
    }
}

async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    classify(status, &body)
}

/// Map an HTTP reply to a value or a classified error.
fn classify<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> ClientResult<T> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ClientError::RateLimited);
    }
    if status.is_success() {
        return Ok(serde_json::from_slice(body)?);
    }

    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(error) => Err(ClientError::remote(error.code, status.as_u16(), error.message)),
        Err(_) => Err(ClientError::Transport(format!(
            "HTTP {} without error details",
            status.as_u16()
        ))),
    }
}

#[async_trait]
impl MutationTransport for HttpTransport {
    async fn create(&self, request: &CreateRequest) -> ClientResult<MutationReceipt> {
        self.post("mutate/create", request).await
    }

    async fn update(&self, request: &UpdateRequest) -> ClientResult<MutationReceipt> {
        self.post("mutate/update", request).await
    }

    async fn delete(&self, request: &DeleteRequest) -> ClientResult<MutationReceipt> {
        self.post("mutate/delete", request).await
    }

    async fn create_new_issue(
        &self,
        request: &CreateNewIssueRequest,
    ) -> ClientResult<MutationReceipt> {
        self.post("mutate/createNewIssue", request).await
    }
}

#[async_trait]
impl Puller for HttpTransport {
    async fn pull(&self, workspace_id: &str, cursor: Option<&str>) -> ClientResult<PullResponse> {
        let mut query = vec![("workspaceId", workspace_id)];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let response = self
            .client
            .get(self.url("pull"))
            .query(&query)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        read_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_body_is_decoded() {
        let receipt: MutationReceipt =
            classify(StatusCode::OK, br#"{"serverMutationId": 7}"#).unwrap();
        assert_eq!(receipt.server_mutation_id, 7);
    }

    #[test]
    fn test_rate_limit_is_classified() {
        let err = classify::<MutationReceipt>(StatusCode::TOO_MANY_REQUESTS, b"").unwrap_err();
        assert_eq!(err, ClientError::RateLimited);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_structured_error_is_remote() {
        let body = br#"{"code": "BAD_REQUEST", "message": "ISSUE 'I1' does not exist"}"#;
        let err = classify::<MutationReceipt>(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert_eq!(
            err,
            ClientError::remote("BAD_REQUEST", 400, "ISSUE 'I1' does not exist")
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unstructured_error_is_transport() {
        let err = classify::<MutationReceipt>(StatusCode::BAD_GATEWAY, b"<html>").unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_garbled_success_is_decode_error() {
        let err = classify::<MutationReceipt>(StatusCode::OK, b"{}").unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let transport = HttpTransport::new("http://localhost:3000/").unwrap();
        assert_eq!(transport.url("pull"), "http://localhost:3000/api/v1/pull");
    }
}
