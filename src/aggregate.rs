//! Aggregation of raw samples into per-service status summaries.
//!
//! Views are derived on demand from the store and the current registry;
//! nothing here is persisted.

use crate::config::ConfigSnapshot;
use crate::db::{DbError, Incident, ServiceSample, ServiceStatus, Store};
use crate::registry::{RegistryView, ServiceTarget};

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Summary of one bucket of the history bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketStatus {
    pub status: Option<ServiceStatus>,
    pub response_time: Option<i64>,
}

impl BucketStatus {
    const EMPTY: BucketStatus = BucketStatus {
        status: None,
        response_time: None,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceView {
    pub name: String,
    pub description: String,
    pub url: String,
    pub hide_url: bool,
    pub expected_response_code: u16,
    pub status: Option<ServiceStatus>,
    pub response_time: Option<i64>,
    pub latest_timestamp: Option<i64>,
    pub uptime_percentage: f64,
    pub hourly_status: Vec<BucketStatus>,
    /// Titles of unresolved incidents referencing this service.
    pub ongoing_incidents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryView {
    pub name: String,
    pub description: String,
    pub services: Vec<ServiceView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub categories: Vec<CategoryView>,
    #[serde(rename = "overallStatus")]
    pub overall_status: ServiceStatus,
    #[serde(rename = "lastUpdate")]
    pub last_update: i64,
    #[serde(rename = "timeRange")]
    pub time_range: String,
}

/// Upper bound on history buckets per service.
pub const MAX_BUCKETS: usize = 1440;

/// Bucket geometry for one lookback window. When the window holds more
/// than [`MAX_BUCKETS`] intervals only the newest ones are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub intervals: usize,
    pub interval_ms: i64,
    pub window_ms: i64,
}

impl Window {
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let interval_ms = snapshot.check_interval().as_millis() as i64;
        let window_ms = snapshot.retention().as_millis() as i64;
        let intervals = if interval_ms > 0 {
            ((window_ms / interval_ms) as usize).min(MAX_BUCKETS)
        } else {
            0
        };
        Self {
            intervals,
            interval_ms,
            window_ms,
        }
    }

    /// End time of bucket `i`, where 0 is the oldest and the last ends at `now`.
    pub fn bucket_end(&self, i: usize, now: i64) -> i64 {
        now - (self.intervals - 1 - i) as i64 * self.interval_ms
    }
}

/// Fill each bucket with the newest sample at or before its end time.
///
/// `samples` must be sorted by timestamp ascending.
pub fn build_buckets(samples: &[ServiceSample], window: &Window, now: i64) -> Vec<BucketStatus> {
    let mut buckets = Vec::with_capacity(window.intervals);
    let mut next = 0;
    let mut current: Option<&ServiceSample> = None;

    for i in 0..window.intervals {
        let end = window.bucket_end(i, now);
        while next < samples.len() && samples[next].timestamp <= end {
            current = Some(&samples[next]);
            next += 1;
        }
        buckets.push(match current {
            Some(s) => BucketStatus {
                status: Some(s.status),
                response_time: s.response_time,
            },
            None => BucketStatus::EMPTY,
        });
    }

    buckets
}

/// Share of online buckets out of all buckets, rounded to two decimals.
/// Empty buckets count against the service.
pub fn uptime_percentage(buckets: &[BucketStatus], intervals: usize) -> f64 {
    if intervals == 0 {
        return 0.0;
    }
    let online = buckets
        .iter()
        .filter(|b| b.status == Some(ServiceStatus::Online))
        .count();
    let pct = online as f64 / intervals as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Human readable label for the lookback window.
pub fn time_range_label(hours: f64) -> String {
    if hours <= 24.0 {
        format!("{} hours", trim_number(hours))
    } else {
        format!("{} days", (hours / 24.0).round() as i64)
    }
}

fn trim_number(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Builds status views from stored samples.
pub struct Aggregator {
    store: Arc<Store>,
}

impl Aggregator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Full status view for every configured service.
    ///
    /// Samples for URLs no longer in the registry are ignored.
    pub fn status_view(&self, view: &RegistryView, incidents: &[Incident], now: i64) -> Result<StatusView, DbError> {
        let snapshot = view.snapshot();
        let window = Window::from_snapshot(snapshot);

        let mut by_url: HashMap<String, Vec<ServiceSample>> = HashMap::new();
        for sample in self.store.query_range(None, now - window.window_ms)? {
            if sample.timestamp <= now && view.target(&sample.url).is_some() {
                by_url.entry(sample.url.clone()).or_default().push(sample);
            }
        }

        let services: HashMap<&str, ServiceView> = view
            .targets()
            .iter()
            .map(|t| {
                let samples = by_url.get(&t.url).map(Vec::as_slice).unwrap_or(&[]);
                (t.url.as_str(), summarize(t, samples, incidents, &window, now))
            })
            .collect();

        let overall_status = if services.values().all(|s| s.status == Some(ServiceStatus::Online)) {
            ServiceStatus::Online
        } else {
            ServiceStatus::Issues
        };

        let categories = snapshot
            .categories
            .iter()
            .map(|category| CategoryView {
                name: category.name.clone(),
                description: category.description.clone(),
                // A URL listed in several categories is probed once and
                // shown under each, with that entry's display fields.
                services: category
                    .services
                    .iter()
                    .filter_map(|configured| {
                        services.get(configured.url.as_str()).map(|shared| ServiceView {
                            name: configured.name.clone(),
                            description: configured.description.clone(),
                            hide_url: configured.hide_url,
                            ..shared.clone()
                        })
                    })
                    .collect(),
            })
            .collect();

        Ok(StatusView {
            categories,
            overall_status,
            last_update: now,
            time_range: time_range_label(snapshot.retention().as_secs_f64() / 3600.0),
        })
    }

    /// View of a single service, or `None` if the URL is not configured.
    pub fn service_view(
        &self,
        view: &RegistryView,
        url: &str,
        incidents: &[Incident],
        now: i64,
    ) -> Result<Option<ServiceView>, DbError> {
        let Some(target) = view.target(url) else {
            return Ok(None);
        };
        let window = Window::from_snapshot(view.snapshot());
        let samples: Vec<_> = self
            .store
            .query_range(Some(url), now - window.window_ms)?
            .into_iter()
            .filter(|s| s.timestamp <= now)
            .collect();

        Ok(Some(summarize(target, &samples, incidents, &window, now)))
    }
}

fn summarize(
    target: &ServiceTarget,
    samples: &[ServiceSample],
    incidents: &[Incident],
    window: &Window,
    now: i64,
) -> ServiceView {
    let latest = samples.last();
    let hourly_status = build_buckets(samples, window, now);

    ServiceView {
        name: target.name.clone(),
        description: target.description.clone(),
        url: target.url.clone(),
        hide_url: target.hide_url,
        expected_response_code: target.expected_response_code,
        status: latest.map(|s| s.status),
        response_time: latest.and_then(|s| s.response_time),
        latest_timestamp: latest.map(|s| s.timestamp),
        uptime_percentage: uptime_percentage(&hourly_status, window.intervals),
        hourly_status,
        ongoing_incidents: incidents
            .iter()
            .filter(|i| i.is_ongoing() && i.affects(&target.url))
            .map(|i| i.title.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Category, ServiceConfig};
    use crate::db::IncidentKind;

    const MINUTE: i64 = 60_000;
    const NOW: i64 = 1_700_000_000_000;

    fn service(name: &str, url: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            description: String::new(),
            url: url.to_string(),
            hide_url: false,
            expected_response_code: 200,
        }
    }

    fn registry_view() -> RegistryView {
        RegistryView::new(ConfigSnapshot {
            check_interval_minutes: 5.0,
            data_retention_hours: 1.0,
            categories: vec![Category {
                name: "Core".to_string(),
                description: "Core services".to_string(),
                services: vec![
                    service("A", "https://a"),
                    service("B", "https://b"),
                    service("C", "https://c"),
                ],
            }],
            ..Default::default()
        })
    }

    fn sample(url: &str, status: ServiceStatus, ts: i64, rt: Option<i64>) -> ServiceSample {
        ServiceSample {
            url: url.to_string(),
            status,
            response_time: rt,
            timestamp: ts,
        }
    }

    fn aggregator_with(samples: &[ServiceSample]) -> Aggregator {
        let store = Arc::new(Store::in_memory().unwrap());
        store.append_samples(samples).unwrap();
        Aggregator::new(store)
    }

    #[test]
    fn test_window_geometry() {
        let window = Window::from_snapshot(registry_view().snapshot());
        assert_eq!(window.intervals, 12);
        assert_eq!(window.interval_ms, 5 * MINUTE);
        assert_eq!(window.bucket_end(11, NOW), NOW);
        assert_eq!(window.bucket_end(0, NOW), NOW - 11 * 5 * MINUTE);
    }

    #[test]
    fn test_buckets_take_newest_sample_before_end() {
        let window = Window {
            intervals: 4,
            interval_ms: MINUTE,
            window_ms: 4 * MINUTE,
        };
        let samples = vec![
            sample("u", ServiceStatus::Offline, NOW - 2 * MINUTE - 10, None),
            sample("u", ServiceStatus::Issues, NOW - 2 * MINUTE, Some(30)),
            sample("u", ServiceStatus::Online, NOW - 10, Some(5)),
        ];
        let buckets = build_buckets(&samples, &window, NOW);
        assert_eq!(
            buckets,
            vec![
                BucketStatus::EMPTY,
                BucketStatus { status: Some(ServiceStatus::Issues), response_time: Some(30) },
                BucketStatus { status: Some(ServiceStatus::Issues), response_time: Some(30) },
                BucketStatus { status: Some(ServiceStatus::Online), response_time: Some(5) },
            ]
        );
        assert_eq!(uptime_percentage(&buckets, 4), 25.0);
    }

    #[test]
    fn test_uptime_rounding() {
        let buckets = vec![
            BucketStatus { status: Some(ServiceStatus::Online), response_time: None },
            BucketStatus::EMPTY,
            BucketStatus::EMPTY,
        ];
        assert_eq!(uptime_percentage(&buckets, 3), 33.33);
        assert_eq!(uptime_percentage(&[], 0), 0.0);
    }

    #[test]
    fn test_three_target_scenario() {
        let agg = aggregator_with(&[
            sample("https://a", ServiceStatus::Online, NOW - 1_000, Some(80)),
            sample("https://b", ServiceStatus::Offline, NOW - 1_000, Some(20)),
            sample("https://c", ServiceStatus::Offline, NOW - 1_000, None),
        ]);

        let view = agg.status_view(&registry_view(), &[], NOW).unwrap();
        assert_eq!(view.overall_status, ServiceStatus::Issues);
        assert_eq!(view.time_range, "1 hours");

        let services = &view.categories[0].services;
        assert_eq!(services.len(), 3);

        let a = &services[0];
        assert_eq!(a.status, Some(ServiceStatus::Online));
        assert_eq!(a.hourly_status.len(), 12);
        assert_eq!(a.hourly_status.iter().filter(|b| b.status.is_none()).count(), 11);
        assert_eq!(a.uptime_percentage, ((1.0 / 12.0 * 100.0) * 100.0_f64).round() / 100.0);
        assert_eq!(a.uptime_percentage, 8.33);

        assert_eq!(services[1].status, Some(ServiceStatus::Offline));
        assert_eq!(services[2].response_time, None);
        assert_eq!(services[2].uptime_percentage, 0.0);
    }

    #[test]
    fn test_all_online_is_online() {
        let agg = aggregator_with(&[
            sample("https://a", ServiceStatus::Online, NOW, Some(1)),
            sample("https://b", ServiceStatus::Online, NOW, Some(1)),
            sample("https://c", ServiceStatus::Online, NOW, Some(1)),
        ]);
        let view = agg.status_view(&registry_view(), &[], NOW).unwrap();
        assert_eq!(view.overall_status, ServiceStatus::Online);
    }

    #[test]
    fn test_empty_store_gives_sparse_view() {
        let agg = aggregator_with(&[]);
        let view = agg.status_view(&registry_view(), &[], NOW).unwrap();

        assert_eq!(view.overall_status, ServiceStatus::Issues);
        for s in &view.categories[0].services {
            assert_eq!(s.status, None);
            assert_eq!(s.response_time, None);
            assert_eq!(s.latest_timestamp, None);
            assert_eq!(s.uptime_percentage, 0.0);
            assert!(s.hourly_status.iter().all(|b| *b == BucketStatus::EMPTY));
        }
    }

    #[test]
    fn test_view_is_idempotent() {
        let mut samples = Vec::new();
        for i in 0..12 {
            let status = if i % 3 == 0 { ServiceStatus::Issues } else { ServiceStatus::Online };
            samples.push(sample("https://a", status, NOW - i * 5 * MINUTE, Some(i)));
        }
        let agg = aggregator_with(&samples);
        let reg = registry_view();

        let first = agg.status_view(&reg, &[], NOW).unwrap();
        let second = agg.status_view(&reg, &[], NOW).unwrap();
        assert_eq!(first, second);

        let single = agg.service_view(&reg, "https://a", &[], NOW).unwrap().unwrap();
        assert_eq!(single, first.categories[0].services[0]);
    }

    #[test]
    fn test_ignores_unknown_and_old_samples() {
        let agg = aggregator_with(&[
            sample("https://removed", ServiceStatus::Offline, NOW, None),
            sample("https://a", ServiceStatus::Offline, NOW - 2 * 60 * MINUTE, None),
        ]);
        let reg = registry_view();

        let view = agg.status_view(&reg, &[], NOW).unwrap();
        assert_eq!(view.categories[0].services[0].status, None);
        assert!(agg.service_view(&reg, "https://removed", &[], NOW).unwrap().is_none());
    }

    #[test]
    fn test_ongoing_incident_overlay() {
        let agg = aggregator_with(&[]);
        let incidents = vec![
            Incident {
                id: 1,
                title: "Network outage".to_string(),
                kind: IncidentKind::Incident,
                services: vec!["https://b".to_string()],
                started_at: NOW - MINUTE,
                ..Default::default()
            },
            Incident {
                id: 2,
                title: "Old maintenance".to_string(),
                kind: IncidentKind::Maintenance,
                services: vec!["https://b".to_string()],
                started_at: NOW - 10 * MINUTE,
                resolved_at: Some(NOW - 5 * MINUTE),
                ..Default::default()
            },
        ];

        let view = agg.status_view(&registry_view(), &incidents, NOW).unwrap();
        let services = &view.categories[0].services;
        assert!(services[0].ongoing_incidents.is_empty());
        assert_eq!(services[1].ongoing_incidents, vec!["Network outage".to_string()]);
    }

    #[test]
    fn test_bucket_count_is_capped() {
        let snapshot = ConfigSnapshot {
            check_interval_minutes: 0.001,
            data_retention_hours: 24.0,
            categories: vec![Category {
                name: "Fast".to_string(),
                description: String::new(),
                services: vec![service("A", "https://a")],
            }],
            ..Default::default()
        };
        let window = Window::from_snapshot(&snapshot);
        assert_eq!(window.intervals, MAX_BUCKETS);
        assert_eq!(window.bucket_end(MAX_BUCKETS - 1, NOW), NOW);

        let agg = aggregator_with(&[sample("https://a", ServiceStatus::Online, NOW, Some(1))]);
        let view = agg.status_view(&RegistryView::new(snapshot), &[], NOW).unwrap();
        let a = &view.categories[0].services[0];
        assert_eq!(a.hourly_status.len(), MAX_BUCKETS);
        assert_eq!(view.time_range, "24 hours");
    }

    #[test]
    fn test_shared_url_listed_under_each_category() {
        let reg = RegistryView::new(ConfigSnapshot {
            check_interval_minutes: 5.0,
            data_retention_hours: 1.0,
            categories: vec![
                Category {
                    name: "Public".to_string(),
                    description: String::new(),
                    services: vec![service("Gateway", "https://gw")],
                },
                Category {
                    name: "Internal".to_string(),
                    description: String::new(),
                    services: vec![
                        ServiceConfig {
                            hide_url: true,
                            ..service("Gateway (internal)", "https://gw")
                        },
                        service("DB", "https://db"),
                    ],
                },
            ],
            ..Default::default()
        });
        assert_eq!(reg.targets().len(), 2);

        let agg = aggregator_with(&[sample("https://gw", ServiceStatus::Issues, NOW - 1_000, Some(90))]);
        let view = agg.status_view(&reg, &[], NOW).unwrap();

        let public = &view.categories[0].services;
        let internal = &view.categories[1].services;
        assert_eq!(public.len(), 1);
        assert_eq!(internal.len(), 2);

        assert_eq!(public[0].name, "Gateway");
        assert!(!public[0].hide_url);
        assert_eq!(internal[0].name, "Gateway (internal)");
        assert!(internal[0].hide_url);
        assert_eq!(internal[0].status, Some(ServiceStatus::Issues));
        assert_eq!(internal[0].hourly_status, public[0].hourly_status);
        assert_eq!(internal[1].name, "DB");
    }

    #[test]
    fn test_time_range_label() {
        assert_eq!(time_range_label(24.0), "24 hours");
        assert_eq!(time_range_label(1.5), "1.5 hours");
        assert_eq!(time_range_label(72.0), "3 days");
    }

    #[test]
    fn test_serialized_field_names() {
        let agg = aggregator_with(&[]);
        let view = agg.status_view(&registry_view(), &[], NOW).unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["overallStatus"], "issues");
        assert_eq!(json["lastUpdate"], NOW);
        assert!(json["categories"][0]["services"][0]["hourly_status"].is_array());
        assert!(json["categories"][0]["services"][0]["status"].is_null());
    }
}
