//! Target registry: the flattened, atomically swappable view of the
//! current configuration snapshot.

use crate::config::ConfigSnapshot;

use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One probe target derived from the configuration. The URL is its identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceTarget {
    pub name: String,
    pub description: String,
    pub url: String,
    pub hide_url: bool,
    pub expected_response_code: u16,
    pub category: String,
}

/// Immutable view built from one snapshot.
#[derive(Debug)]
pub struct RegistryView {
    snapshot: Arc<ConfigSnapshot>,
    targets: Vec<ServiceTarget>,
    by_url: HashMap<String, usize>,
}

impl RegistryView {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        let mut targets = Vec::new();
        let mut by_url = HashMap::new();

        for category in &snapshot.categories {
            for service in &category.services {
                if by_url.contains_key(&service.url) {
                    tracing::warn!(
                        "Registry: Service url {} repeated in category {}, probing it once",
                        service.url,
                        category.name
                    );
                    continue;
                }
                by_url.insert(service.url.clone(), targets.len());
                targets.push(ServiceTarget {
                    name: service.name.clone(),
                    description: service.description.clone(),
                    url: service.url.clone(),
                    hide_url: service.hide_url,
                    expected_response_code: service.expected_response_code,
                    category: category.name.clone(),
                });
            }
        }

        Self {
            snapshot: Arc::new(snapshot),
            targets,
            by_url,
        }
    }

    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    /// Targets in category order, then service order.
    pub fn targets(&self) -> &[ServiceTarget] {
        &self.targets
    }

    pub fn target(&self, url: &str) -> Option<&ServiceTarget> {
        self.by_url.get(url).map(|&i| &self.targets[i])
    }
}

/// Holder of the current [`RegistryView`].
///
/// Readers take a full `Arc` of the view, so a probe cycle keeps working
/// against the view it started with even if a reload swaps in a new one.
pub struct TargetRegistry {
    current: ArcSwap<RegistryView>,
}

impl TargetRegistry {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistryView::new(snapshot)),
        }
    }

    pub fn current(&self) -> Arc<RegistryView> {
        self.current.load_full()
    }

    /// Swap in `snapshot` if it differs structurally from the current one.
    /// Returns whether a swap happened.
    pub fn replace_if_changed(&self, snapshot: ConfigSnapshot) -> bool {
        if *self.current.load().snapshot() == snapshot {
            return false;
        }
        self.current.store(Arc::new(RegistryView::new(snapshot)));
        true
    }
}
