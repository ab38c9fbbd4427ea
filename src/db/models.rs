//! Database model types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Health classification of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Online,
    Issues,
    Offline,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Online => "online",
            ServiceStatus::Issues => "issues",
            ServiceStatus::Offline => "offline",
        }
    }

    /// Anything other than online counts as degraded.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, ServiceStatus::Online)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(ServiceStatus::Online),
            "issues" => Ok(ServiceStatus::Issues),
            "offline" => Ok(ServiceStatus::Offline),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// A single probe result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSample {
    pub url: String,
    pub status: ServiceStatus,
    /// Milliseconds, or None when the probe got no response.
    pub response_time: Option<i64>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentKind {
    Incident,
    Maintenance,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::Incident => "incident",
            IncidentKind::Maintenance => "maintenance",
        }
    }
}

impl FromStr for IncidentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incident" => Ok(IncidentKind::Incident),
            "maintenance" => Ok(IncidentKind::Maintenance),
            other => Err(format!("unknown incident kind: {}", other)),
        }
    }
}

/// An operator-managed incident or maintenance window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub kind: IncidentKind,
    /// URLs of the affected services.
    pub services: Vec<String>,
    pub started_at: i64,
    pub resolved_at: Option<i64>,
}

impl Incident {
    pub fn is_ongoing(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn affects(&self, url: &str) -> bool {
        self.services.iter().any(|s| s == url)
    }
}

impl Default for Incident {
    fn default() -> Self {
        Self {
            id: 0,
            title: String::new(),
            description: String::new(),
            kind: IncidentKind::Incident,
            services: Vec::new(),
            started_at: 0,
            resolved_at: None,
        }
    }
}
