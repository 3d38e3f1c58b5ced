use crate::error::{Result, SignerError};
use crate::traits::{Signer, SigningRequest};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    /// Pickup ids handed out before falling back to generated ones
    pickup_ids: VecDeque<String>,
    /// Errors returned by the next submit calls
    submit_failures: VecDeque<SignerError>,
    /// Errors returned by the next poll calls
    poll_failures: VecDeque<SignerError>,
    /// Poll count per pickup id
    polls_seen: HashMap<String, u32>,
    submissions: Vec<SigningRequest>,
    polls: Vec<String>,
}

/// In-memory CA for development runs and tests
///
/// Every submit is accepted. Each pickup id reports `IssuancePending` for the
/// first `pending_polls` polls and is issued afterwards. Unknown pickup ids are
/// treated as previously submitted, so a restarted process can still collect them.
#[derive(Clone)]
pub struct MockSigner {
    pending_polls: u32,
    certificate: Option<Vec<u8>>,
    state: Arc<Mutex<MockState>>,
}

impl MockSigner {
    pub fn new() -> Self {
        Self {
            pending_polls: 0,
            certificate: None,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Hand out these pickup ids (in order) before generating random ones
    pub fn with_pickup_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = ids.into_iter().map(Into::into).collect();
        Self {
            state: Arc::new(Mutex::new(MockState {
                pickup_ids: ids,
                ..Default::default()
            })),
            ..self
        }
    }

    /// Number of polls per pickup id that report pending before issuance
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Bytes returned for every issued certificate
    pub fn with_certificate(mut self, certificate: impl Into<Vec<u8>>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    /// Make the next submit fail with `err`
    pub async fn fail_next_submit(&self, err: SignerError) {
        self.state.lock().await.submit_failures.push_back(err);
    }

    /// Make the next poll fail with `err`
    pub async fn fail_next_poll(&self, err: SignerError) {
        self.state.lock().await.poll_failures.push_back(err);
    }

    /// Requests received so far
    pub async fn submissions(&self) -> Vec<SigningRequest> {
        self.state.lock().await.submissions.clone()
    }

    /// Pickup ids polled so far, one entry per call
    pub async fn polls(&self) -> Vec<String> {
        self.state.lock().await.polls.clone()
    }

    fn certificate_for(&self, pickup_id: &str) -> Vec<u8> {
        match &self.certificate {
            Some(cert) => cert.clone(),
            None => format!(
                "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
                pickup_id
            )
            .into_bytes(),
        }
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Signer for MockSigner {
    async fn submit(&self, request: &SigningRequest) -> Result<String> {
        let mut state = self.state.lock().await;
        state.submissions.push(request.clone());

        if let Some(err) = state.submit_failures.pop_front() {
            debug!(csr = %request.name, error = %err, "Mock: injected submit failure");
            return Err(err);
        }

        let pickup_id = state
            .pickup_ids
            .pop_front()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(csr = %request.name, pickup_id = %pickup_id, "Mock: request accepted");
        Ok(pickup_id)
    }

    async fn poll(&self, pickup_id: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock().await;
        state.polls.push(pickup_id.to_string());

        if let Some(err) = state.poll_failures.pop_front() {
            debug!(pickup_id = %pickup_id, error = %err, "Mock: injected poll failure");
            return Err(err);
        }

        let seen = state.polls_seen.entry(pickup_id.to_string()).or_insert(0);
        *seen += 1;
        if *seen <= self.pending_polls {
            return Err(SignerError::issuance_pending(pickup_id));
        }

        debug!(pickup_id = %pickup_id, "Mock: certificate issued");
        Ok(self.certificate_for(pickup_id))
    }
}
