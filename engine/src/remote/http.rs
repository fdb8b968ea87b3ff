//! HTTP client for the Tally sync server.

use super::{DateRange, RemoteResult, RemoteStore};
use crate::{error::RemoteError, record::Entity};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DeletedResponse {
    deleted: u64,
}

#[derive(Debug, Deserialize)]
struct WrittenResponse {
    written: usize,
}

/// Remote store reached over HTTP/JSON with a bearer token.
///
/// Every request carries a client-side timeout; a request that outlives it
/// is dropped (and with it the connection) rather than abandoned.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpRemote {
    /// Create a client for the server at `base_url`.
    ///
    /// Without a token every call fails with `NotAuthenticated`.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> RemoteResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Network(format!("invalid remote url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Network(format!(
                "remote url '{}' cannot carry a path",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.is_empty()),
            timeout,
        })
    }

    fn url(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Network(format!("bad base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> RemoteResult<RequestBuilder> {
        let token = self.token.as_deref().ok_or(RemoteError::NotAuthenticated)?;
        Ok(self
            .client
            .request(method, self.url(segments)?)
            .bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status, message))
    }

    async fn json<T: serde::de::DeserializeOwned>(&self, response: Response) -> RemoteResult<T> {
        response.json::<T>().await.map_err(|e| RemoteError::Rejected {
            status: 200,
            message: format!("unreadable response body: {}", e),
        })
    }

    fn classify_transport(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(self.timeout.as_millis() as u64)
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

fn classify_status(status: StatusCode, message: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::NotAuthenticated,
        StatusCode::CONFLICT => RemoteError::Conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            RemoteError::Network(format!("{}: {}", status, message))
        }
        s if s == StatusCode::BAD_GATEWAY || s == StatusCode::SERVICE_UNAVAILABLE => {
            RemoteError::Network(format!("{}: {}", status, message))
        }
        _ => RemoteError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn insert_or_update(
        &self,
        entity: Entity,
        record: serde_json::Value,
    ) -> RemoteResult<()> {
        let request = self
            .request(Method::PUT, &["v1", "records", entity.collection()])?
            .json(&record);
        self.send(request).await?;
        Ok(())
    }

    async fn update(
        &self,
        entity: Entity,
        key: &str,
        fields: serde_json::Value,
    ) -> RemoteResult<()> {
        let request = self
            .request(Method::PATCH, &["v1", "records", entity.collection(), key])?
            .json(&fields);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, entity: Entity, key: &str) -> RemoteResult<()> {
        let request = self.request(Method::DELETE, &["v1", "records", entity.collection(), key])?;
        self.send(request).await?;
        Ok(())
    }

    async fn delete_all(&self, entity: Entity) -> RemoteResult<u64> {
        let request = self.request(Method::DELETE, &["v1", "records", entity.collection()])?;
        let response = self.send(request).await?;
        Ok(self.json::<DeletedResponse>(response).await?.deleted)
    }

    async fn insert_batch(
        &self,
        entity: Entity,
        records: Vec<serde_json::Value>,
    ) -> RemoteResult<usize> {
        let request = self
            .request(Method::POST, &["v1", "records", entity.collection(), "batch"])?
            .json(&records);
        let response = self.send(request).await?;
        Ok(self.json::<WrittenResponse>(response).await?.written)
    }

    async fn list_all(
        &self,
        entity: Entity,
        range: Option<DateRange>,
    ) -> RemoteResult<Vec<serde_json::Value>> {
        let mut request = self.request(Method::GET, &["v1", "records", entity.collection()])?;
        if let Some(range) = range {
            request = request.query(&range);
        }
        let response = self.send(request).await?;
        self.json(response).await
    }

    async fn fetch_profile(&self) -> RemoteResult<serde_json::Value> {
        let request = self.request(Method::GET, &["v1", "profile"])?;
        let response = self.send(request).await?;
        self.json(response).await
    }

    async fn save_profile(&self, profile: serde_json::Value) -> RemoteResult<()> {
        let request = self.request(Method::PUT, &["v1", "profile"])?.json(&profile);
        self.send(request).await?;
        Ok(())
    }
}
