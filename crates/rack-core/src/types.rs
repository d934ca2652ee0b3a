//! Domain types served by providers and rendered by the API.
//!
//! These types are the persisted state of the platform: apps, builds,
//! releases, processes, objects, registries, certificates, resources,
//! and instances. All of them are JSON-serializable; timestamps are UTC.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── App ────────────────────────────────────────────────────────────

/// A deployed application within a rack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub name: String,
    pub generation: String,
    pub locked: bool,
    /// Active release id, empty until the first promote.
    pub release: String,
    pub status: String,
    pub parameters: HashMap<String, String>,
}

impl App {
    /// True while a promote or rollback is in flight.
    pub fn updating(&self) -> bool {
        matches!(self.status.as_str(), "creating" | "deleting" | "rollback" | "updating")
    }

    /// True when all services are scaled to zero.
    pub fn sleeping(&self) -> bool {
        self.parameters.get("Sleep").map(String::as_str) == Some("true")
    }
}

// ── Build ──────────────────────────────────────────────────────────

/// One invocation of the build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Build {
    pub id: String,
    pub app: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entrypoint: String,
    /// URL of the stored log blob, set when the build terminates.
    #[serde(default)]
    pub logs: String,
    /// Verbatim manifest contents, persisted by the pipeline.
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub process: String,
    /// Release produced by this build, empty until complete.
    #[serde(default)]
    pub release: String,
    pub status: String,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

impl Build {
    pub fn new(app: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            app: app.to_string(),
            description: String::new(),
            entrypoint: String::new(),
            logs: String::new(),
            manifest: String::new(),
            process: String::new(),
            release: String::new(),
            status: "created".to_string(),
            started: Some(Utc::now()),
            ended: None,
        }
    }
}

// ── Release ────────────────────────────────────────────────────────

/// An immutable binding of build, environment, and manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub id: String,
    pub app: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub description: String,
    pub created: DateTime<Utc>,
}

// ── Process ────────────────────────────────────────────────────────

/// A running instance of a service. The core only observes these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Process {
    pub id: String,
    pub app: String,
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub instance: String,
    #[serde(default)]
    pub release: String,
    pub status: String,
    pub cpu: f64,
    pub memory: f64,
    #[serde(default)]
    pub ports: Vec<String>,
    pub started: Option<DateTime<Utc>>,
}

// ── Object ─────────────────────────────────────────────────────────

/// A content blob in an app's object namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Object {
    pub key: String,
    pub url: String,
}

// ── Registry ───────────────────────────────────────────────────────

/// Credentials for an external image registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registry {
    pub server: String,
    pub username: String,
    pub password: String,
}

// ── Certificate ────────────────────────────────────────────────────

/// A TLS certificate referenced by service ports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Certificate {
    pub id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub domains: Vec<String>,
    pub expiration: DateTime<Utc>,
}

// ── Resource ───────────────────────────────────────────────────────

/// A managed addon (database, queue, cache, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// An entry in the resource type catalog served by `OPTIONS /resources`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceType {
    pub name: String,
    pub parameters: Vec<ResourceParameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceParameter {
    pub name: String,
    pub default: String,
}

// ── Instance ───────────────────────────────────────────────────────

/// A host machine in the rack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: String,
    pub agent: bool,
    pub cpu: f64,
    pub memory: f64,
    pub processes: i32,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub public_ip: String,
    pub status: String,
    pub started: Option<DateTime<Utc>>,
}

// ── System ─────────────────────────────────────────────────────────

/// Rack-level system description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct System {
    pub name: String,
    pub provider: String,
    pub region: String,
    pub status: String,
    pub version: String,
    #[serde(default)]
    pub count: i32,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub outputs: HashMap<String, String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Aggregate capacity across instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capacity {
    pub cluster_cpu: i64,
    pub cluster_memory: i64,
    pub process_cpu: i64,
    pub process_memory: i64,
}

// ── Metrics ────────────────────────────────────────────────────────

/// A named metric series. Values are kept ascending by time; providers
/// must return them sorted and `sorted` normalizes untrusted input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub name: String,
    pub values: Vec<MetricValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricValue {
    pub time: DateTime<Utc>,
    pub minimum: f64,
    pub average: f64,
    pub maximum: f64,
    pub sum: f64,
    pub count: f64,
}

impl Metric {
    /// Return the metric with values sorted ascending by time.
    pub fn sorted(mut self) -> Self {
        self.values.sort_by_key(|v| v.time);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn app_updating_states() {
        let mut app = App {
            name: "app1".into(),
            generation: "2".into(),
            locked: false,
            release: String::new(),
            status: "running".into(),
            parameters: HashMap::new(),
        };
        assert!(!app.updating());
        for status in ["creating", "deleting", "rollback", "updating"] {
            app.status = status.into();
            assert!(app.updating(), "{status} should count as updating");
        }
    }

    #[test]
    fn app_sleeping_from_parameters() {
        let mut app = App {
            name: "app1".into(),
            generation: "2".into(),
            locked: false,
            release: String::new(),
            status: "running".into(),
            parameters: HashMap::new(),
        };
        assert!(!app.sleeping());
        app.parameters.insert("Sleep".into(), "true".into());
        assert!(app.sleeping());
    }

    #[test]
    fn metric_sorted_orders_ascending() {
        let at = |s| MetricValue {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, s).unwrap(),
            minimum: 0.0,
            average: 0.0,
            maximum: 0.0,
            sum: 0.0,
            count: 0.0,
        };
        let metric = Metric {
            name: "cpu".into(),
            values: vec![at(30), at(10), at(20)],
        };
        let sorted = metric.sorted();
        let seconds: Vec<_> = sorted
            .values
            .iter()
            .map(|v| v.time.timestamp() % 60)
            .collect();
        assert_eq!(seconds, vec![10, 20, 30]);
    }

    #[test]
    fn build_new_defaults() {
        let b = Build::new("app1", "BTESTTESTTE");
        assert_eq!(b.status, "created");
        assert!(b.started.is_some());
        assert!(b.ended.is_none());
        assert!(b.release.is_empty());
    }
}
