//! HTTP fetch seam used by `cached_fetch`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{FetchError, FetchResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

/// Raw response; status is checked by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Shorthand for a 200 response with a JSON body
    pub fn json_ok(body: &Value) -> Self {
        Self::new(200, body.to_string())
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> FetchResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Performs HTTP requests
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchResponse>;

    fn fetcher_name(&self) -> &str;
}

/// reqwest-backed fetcher
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchResponse> {
        debug!("{} {}", request.method, request.url);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(FetchResponse::new(status, body.to_vec()))
    }

    fn fetcher_name(&self) -> &str {
        "reqwest"
    }
}

/// Scripted fetcher for tests and offline runs.
///
/// Pops queued responses in order and repeats the last one once the queue
/// is drained. Every request is recorded.
pub struct MockFetcher {
    responses: Mutex<Vec<FetchResult<FetchResponse>>>,
    last: Mutex<Option<FetchResponse>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers 200 with the given JSON
    pub fn returning(body: Value) -> Self {
        let fetcher = Self::new();
        fetcher.push(Ok(FetchResponse::json_ok(&body)));
        fetcher
    }

    pub fn push(&self, response: FetchResult<FetchResponse>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push(response);
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut q| if q.is_empty() { None } else { Some(q.remove(0)) });

        match next {
            Some(Ok(response)) => {
                if let Ok(mut last) = self.last.lock() {
                    *last = Some(response.clone());
                }
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .ok()
                .and_then(|l| l.clone())
                .ok_or_else(|| FetchError::Network("no scripted response".to_string())),
        }
    }

    fn fetcher_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_status() {
        assert!(FetchResponse::new(204, Vec::new()).is_ok());
        assert!(!FetchResponse::new(404, Vec::new()).is_ok());
        assert!(!FetchResponse::new(500, Vec::new()).is_ok());
    }

    #[test]
    fn test_response_json() {
        let response = FetchResponse::json_ok(&json!({"id": 7}));
        let value: Value = response.json().unwrap();
        assert_eq!(value["id"], 7);

        let bad = FetchResponse::new(200, "nope");
        assert!(matches!(bad.json::<Value>(), Err(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_mock_fetcher_sequence() {
        let fetcher = MockFetcher::new();
        fetcher.push(Err(FetchError::Network("down".into())));
        fetcher.push(Ok(FetchResponse::json_ok(&json!([1, 2]))));

        let request = FetchRequest::get("https://api.test/leads");
        assert!(fetcher.fetch(&request).await.is_err());
        assert!(fetcher.fetch(&request).await.is_ok());
        // Last success repeats
        assert!(fetcher.fetch(&request).await.is_ok());
        assert_eq!(fetcher.call_count(), 3);
        assert_eq!(fetcher.requests()[0].method, HttpMethod::Get);
    }
}
