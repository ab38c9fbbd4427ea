//! Detection of sustained degradation.
//!
//! A service alerts once when its newest samples form a fresh degradation
//! streak: the last `consecutive_failures` samples are degraded and the
//! one before them is online. Later ticks of the same streak no longer
//! match, and flapping never builds a streak.

use crate::config::AlertSettings;
use crate::db::{Incident, ServiceSample, ServiceStatus, Store};
use crate::notify::{escape_html, wrap_html, Alert};
use crate::registry::{RegistryView, ServiceTarget};

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertRule {
    pub consecutive_failures: usize,
}

impl Default for AlertRule {
    fn default() -> Self {
        Self {
            consecutive_failures: 2,
        }
    }
}

impl AlertRule {
    pub fn from_settings(settings: &AlertSettings) -> Self {
        Self {
            consecutive_failures: settings.consecutive_failures.max(1),
        }
    }

    /// Number of recent samples the rule inspects.
    pub fn lookback(&self) -> usize {
        self.consecutive_failures + 1
    }

    /// `recent` is newest first.
    pub fn is_fresh_transition(&self, recent: &[ServiceStatus]) -> bool {
        let n = self.consecutive_failures;
        if recent.len() < n + 1 {
            return false;
        }
        recent[..n].iter().all(ServiceStatus::is_degraded) && recent[n] == ServiceStatus::Online
    }
}

/// Evaluates freshly recorded samples against the alert rule.
pub struct IncidentCorrelator {
    store: Arc<Store>,
}

impl IncidentCorrelator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Return one alert per service whose newest sample starts a streak.
    ///
    /// `batch` must already be recorded in the store.
    pub fn evaluate(&self, view: &RegistryView, batch: &[ServiceSample]) -> Vec<Alert> {
        let snapshot = view.snapshot();
        let rule = AlertRule::from_settings(&snapshot.alert);
        let mut incidents: Option<Vec<Incident>> = None;
        let mut alerts = Vec::new();

        for sample in batch.iter().filter(|s| s.status.is_degraded()) {
            let Some(target) = view.target(&sample.url) else {
                continue;
            };

            let recent = match self.store.recent_samples(&sample.url, rule.lookback()) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Correlator: Failed to read history for {}: {}", target.name, e);
                    continue;
                }
            };
            let statuses: Vec<ServiceStatus> = recent.iter().map(|s| s.status).collect();

            if !rule.is_fresh_transition(&statuses) {
                continue;
            }

            tracing::info!("Correlator: {} degraded ({})", target.name, sample.status);

            let incidents = incidents.get_or_insert_with(|| {
                self.store.get_incidents().unwrap_or_else(|e| {
                    tracing::warn!("Correlator: Failed to load incidents: {}", e);
                    Vec::new()
                })
            });
            alerts.push(render_alert(&snapshot.name, target, sample.status, incidents));
        }

        alerts
    }
}

/// Build the alert payload for a degraded service.
pub fn render_alert(site_name: &str, target: &ServiceTarget, status: ServiceStatus, incidents: &[Incident]) -> Alert {
    let subject = if site_name.is_empty() {
        format!("{} is {}", target.name, status)
    } else {
        format!("{}: {} is {}", site_name, target.name, status)
    };

    let mut inner = format!(
        "<h2>{}</h2>\n<p>The service <strong>{}</strong> in <em>{}</em> is currently <strong>{}</strong>.</p>",
        escape_html(&subject),
        escape_html(&target.name),
        escape_html(&target.category),
        status,
    );

    if !target.hide_url {
        inner.push_str(&format!("\n<p>URL: {}</p>", escape_html(&target.url)));
    }

    let related: Vec<&Incident> = incidents.iter().filter(|i| i.affects(&target.url)).collect();
    if !related.is_empty() {
        inner.push_str("\n<p>Related incidents:</p>\n<ul>");
        for incident in related {
            inner.push_str(&format!("\n<li>{}</li>", escape_html(&incident.title)));
        }
        inner.push_str("\n</ul>");
    }

    Alert {
        url: target.url.clone(),
        subject,
        html_body: wrap_html(&inner),
    }
}
