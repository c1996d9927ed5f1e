//! Typed client for the backend's REST surface, plus the entry point for
//! opening the live metrics subscription.

use reqwest::{RequestBuilder, Response};
use std::time::Duration;
use url::Url;

use crate::aggregate::AggregateView;
use crate::error::{ApiError, FeedError};
use crate::sse;
use crate::stream::Subscription;
use crate::types::{
    Agent, AgentsEnvelope, BlockRequest, ControlAction, ControlRequest, MetricSample,
    PoliciesEnvelope, Policy, Session,
};

// Per-request deadline for the request/response endpoints. The live feed is
// exempt; it stays open until torn down.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle on one backend. Cheap to clone; clones share the HTTP pool.
#[derive(Debug, Clone)]
pub struct FleetApi {
    http: reqwest::Client,
    base: Url,
    bearer: Option<String>,
}

impl FleetApi {
    /// Build a client for the given backend base URL, e.g.
    /// `http://monitor:50051`. A trailing slash is optional; non-http(s)
    /// bases are rejected.
    pub fn new(mut base: Url) -> Result<FleetApi, ApiError> {
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::InvalidBase { url: base });
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| ApiError::Client { source })?;
        Ok(FleetApi {
            http,
            base,
            bearer: None,
        })
    }

    /// Attach a bearer token to every request.
    pub fn with_token(mut self, token: impl Into<String>) -> FleetApi {
        self.bearer = Some(token.into());
        self
    }

    pub fn with_session(self, session: &Session) -> FleetApi {
        self.with_token(session.token.clone())
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    // new() guarantees an http(s) base with a trailing slash; join cannot
    // fail on these relative paths
    fn endpoint(&self, path: &str) -> Url {
        self.base.join(path).expect("endpoint url")
    }

    fn get(&self, url: Url) -> RequestBuilder {
        self.authorize(self.http.get(url).timeout(REQUEST_TIMEOUT))
    }

    fn post(&self, url: Url) -> RequestBuilder {
        self.authorize(self.http.post(url).timeout(REQUEST_TIMEOUT))
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.bearer {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn send(endpoint: &'static str, rb: RequestBuilder) -> Result<Response, ApiError> {
        let resp = rb
            .send()
            .await
            .map_err(|source| ApiError::Transport { endpoint, source })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }

    /// `GET /v1/agents`
    pub async fn agents(&self) -> Result<Vec<Agent>, ApiError> {
        let resp = Self::send("agents", self.get(self.endpoint("v1/agents"))).await?;
        let body: AgentsEnvelope = resp.json().await.map_err(|source| ApiError::Decode {
            endpoint: "agents",
            source,
        })?;
        Ok(body.agents)
    }

    /// `GET /v1/policies`
    pub async fn policies(&self) -> Result<Vec<Policy>, ApiError> {
        let resp = Self::send("policies", self.get(self.endpoint("v1/policies"))).await?;
        let body: PoliciesEnvelope = resp.json().await.map_err(|source| ApiError::Decode {
            endpoint: "policies",
            source,
        })?;
        Ok(body.policies)
    }

    /// `GET /v1/stats/{hostname}`: one reading for one host.
    pub async fn host_metrics(&self, hostname: &str) -> Result<MetricSample, ApiError> {
        let url = self.endpoint(&format!("v1/stats/{hostname}"));
        let resp = Self::send("host stats", self.get(url)).await?;
        resp.json().await.map_err(|source| ApiError::Decode {
            endpoint: "host stats",
            source,
        })
    }

    /// `POST /v1/agent/{id}/control`
    pub async fn control(&self, agent_id: &str, action: ControlAction) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("v1/agent/{agent_id}/control"));
        Self::send("control", self.post(url).json(&ControlRequest { action })).await?;
        Ok(())
    }

    /// `POST /v1/agent/{id}/block`
    pub async fn set_blocked(&self, agent_id: &str, blocked: bool) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("v1/agent/{agent_id}/block"));
        Self::send("block", self.post(url).json(&BlockRequest { blocked })).await?;
        Ok(())
    }

    /// `POST /v1/agent/{id}/policy/{policy_id}/apply`
    pub async fn apply_policy(&self, agent_id: &str, policy_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("v1/agent/{agent_id}/policy/{policy_id}/apply"));
        Self::send("apply policy", self.post(url)).await?;
        Ok(())
    }

    pub fn stream_url(&self) -> Url {
        self.endpoint("v1/stats/stream")
    }

    /// Subscribe to `GET /v1/stats/stream`. One connection per call; when it
    /// dies the subscription stays errored and the caller decides whether to
    /// open a new one.
    pub fn stream_metrics<U, E>(&self, on_update: U, on_error: E) -> Subscription
    where
        U: FnMut(AggregateView) + Send + 'static,
        E: FnOnce(FeedError) + Send + 'static,
    {
        let client = self.http.clone();
        let url = self.stream_url();
        let bearer = self.bearer.clone();
        Subscription::spawn(
            async move { sse::connect(&client, url, bearer.as_deref()).await },
            on_update,
            on_error,
        )
    }
}
