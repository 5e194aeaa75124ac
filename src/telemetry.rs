use log::warn;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Namespaced counter/gauge registry.
///
/// The replication gateway and the lifecycle controller record their activity
/// here; hosts can snapshot the registry and export it however they like.
#[derive(Debug)]
pub struct MetricsRegistry {
    namespace: String,
    counters: HashMap<String, u64>,
    gauges: HashMap<String, u64>,
}

impl MetricsRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            counters: HashMap::new(),
            gauges: HashMap::new(),
        }
    }

    pub fn inc_counter(&mut self, name: impl Into<String>, delta: u64) -> u64 {
        let key = self.qualify(name.into());
        let counter = self.counters.entry(key).or_insert(0);
        *counter = counter.saturating_add(delta);
        *counter
    }

    pub fn set_gauge(&mut self, name: impl Into<String>, value: u64) {
        let key = self.qualify(name.into());
        self.gauges.insert(key, value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
        }
    }

    fn qualify(&self, name: String) -> String {
        let namespace = if self.namespace.ends_with('.') {
            self.namespace.clone()
        } else {
            format!("{}.", self.namespace)
        };
        if name.starts_with(&namespace) {
            name
        } else {
            format!("{}{}", namespace, name)
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.get(name).copied()
    }
}

/// Cloneable handle to a registry shared across subsystems.
#[derive(Debug, Clone)]
pub struct SharedMetrics {
    inner: Arc<Mutex<MetricsRegistry>>,
}

impl SharedMetrics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsRegistry::new(namespace))),
        }
    }

    pub fn inc_counter(&self, name: &str, delta: u64) {
        self.lock_inner().inc_counter(name, delta);
    }

    pub fn set_gauge(&self, name: &str, value: u64) {
        self.lock_inner().set_gauge(name, value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock_inner().snapshot()
    }

    fn lock_inner(&self) -> MutexGuard<'_, MetricsRegistry> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("event=metrics_registry_poisoned; recovering state");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self::new("replistate")
    }
}
