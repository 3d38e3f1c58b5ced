use crate::error::{Result, SignerError};
use crate::traits::{Signer, SigningRequest};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration for the REST CA client
#[derive(Debug, Clone)]
pub struct HttpSignerConfig {
    /// Base URL of the CA, e.g. `https://ca.example.com`
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpSignerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    name: &'a str,
    csr: &'a str,
    usages: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    validity_seconds: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    pickup_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    certificate: String,
}

/// Signing client for a CA exposing a small REST API:
///
/// - `POST {base}/v1/certificates/request` → `{"pickup_id": "..."}`
/// - `GET {base}/v1/certificates/{pickup_id}` → `200 {"certificate": "..."}`,
///   or `202` while issuance is pending
pub struct HttpSigner {
    base_url: Url,
    token: Option<String>,
    client: Client,
}

impl HttpSigner {
    pub fn new(config: HttpSignerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SignerError::transport(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            SignerError::invalid_request(format!("Invalid CA URL '{}': {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SignerError::invalid_request(format!(
                "CA URL '{}' cannot carry a path",
                config.base_url
            )));
        }

        Ok(Self {
            base_url,
            token: config.token,
            client,
        })
    }

    /// Append path segments to the base URL, escaping each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SignerError::invalid_request("CA URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        self.authorize(builder)
            .send()
            .await
            .map_err(|e| SignerError::transport(format!("HTTP request failed: {}", e)))
    }
}

async fn rejection(resp: Response) -> SignerError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    SignerError::rejected(status.as_u16(), body)
}

#[async_trait]
impl Signer for HttpSigner {
    async fn submit(&self, request: &SigningRequest) -> Result<String> {
        let url = self.endpoint(&["v1", "certificates", "request"])?;
        debug!(csr = %request.name, "POST {}", url);

        let csr = std::str::from_utf8(&request.request).map_err(|e| {
            SignerError::invalid_request(format!("request is not UTF-8 PEM: {}", e))
        })?;
        let body = SubmitBody {
            name: &request.name,
            csr,
            usages: &request.usages,
            validity_seconds: request.expiration_seconds,
        };

        let resp = self.send(self.client.post(url).json(&body)).await?;
        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }

        let parsed = resp.json::<SubmitResponse>().await.map_err(|e| {
            SignerError::invalid_response(format!("Failed to parse submit response: {}", e))
        })?;

        if parsed.pickup_id.is_empty() {
            return Err(SignerError::invalid_response("CA returned an empty pickup_id"));
        }

        Ok(parsed.pickup_id)
    }

    async fn poll(&self, pickup_id: &str) -> Result<Vec<u8>> {
        // Pickup ids are opaque and may contain '/', '\', '?' or '#'
        let url = self.endpoint(&["v1", "certificates", pickup_id])?;
        debug!(pickup_id = %pickup_id, "GET {}", url);

        let resp = self.send(self.client.get(url)).await?;
        match resp.status() {
            StatusCode::OK => {
                let parsed = resp.json::<PollResponse>().await.map_err(|e| {
                    SignerError::invalid_response(format!("Failed to parse certificate: {}", e))
                })?;
                Ok(parsed.certificate.into_bytes())
            }
            StatusCode::ACCEPTED => Err(SignerError::issuance_pending(pickup_id)),
            StatusCode::NOT_FOUND => Err(SignerError::unknown_pickup(pickup_id)),
            _ => Err(rejection(resp).await),
        }
    }
}
