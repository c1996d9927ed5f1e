//! Types that mirror the backend's JSON schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One metrics reading for one host, as pushed on the live feed and returned
/// by the per-host stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub hostname: String,
    pub agent_id: String,
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
    // producer-side capture time (unix seconds); ordering uses arrival, not this
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl MetricSample {
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    #[default]
    Offline,
    Degraded,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
            AgentStatus::Degraded => "degraded",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub host: String,
    pub env: String,
    pub region: String,
    pub status: AgentStatus,
    pub version: String,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub ram: f64,
    #[serde(default)]
    pub disk: f64,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
    // absent on backends that predate the block endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

impl Agent {
    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub thresholds: BTreeMap<String, String>,
    #[serde(default)]
    pub actions: Vec<String>,
    pub enabled: bool,
    #[serde(default)]
    pub applied_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Lifecycle action accepted by the agent control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Restart,
    Shutdown,
}

impl ControlAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(ControlAction::Start),
            "restart" => Some(ControlAction::Restart),
            "shutdown" => Some(ControlAction::Shutdown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Restart => "restart",
            ControlAction::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Backend role; unknown strings fall back to the least privileged role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    #[default]
    Viewer,
}

impl Role {
    pub fn parse(s: &str) -> Role {
        match s {
            "admin" => Role::Admin,
            "operator" => Role::Operator,
            _ => Role::Viewer,
        }
    }

    /// Control, block and policy-apply endpoints require this.
    pub fn can_operate(&self) -> bool {
        matches!(self, Role::Admin | Role::Operator)
    }
}

/// Bearer identity attached to authenticated API calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub username: String,
    #[serde(default)]
    pub role: Role,
}

// Wrapper bodies used by the list endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsEnvelope {
    #[serde(default)]
    pub agents: Vec<Agent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliciesEnvelope {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockRequest {
    pub blocked: bool,
}
