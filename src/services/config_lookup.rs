//! Config Lookup (C8).
//!
//! Three-tier resolution for event and host settings, backed by a
//! `figment`-loaded `GlobalConfig`, an in-memory `BroadcastOverrides`
//! map (simulating the operator-injected runtime broadcast tier), and
//! a per-task `RuntimeConfig` — following the host's layered
//! `services/config.rs` `Config` struct in spirit: several nested
//! sections, a `Default` for each, an env-var override hook.

use std::collections::HashMap;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::ConfigError;
use crate::domain::TaskId;

const DEFAULT_HOST_SKEY: &str = "remote";

/// Global, suite-wide configuration: per-task-name event settings and
/// per-`(host, owner)` remote settings. Loaded once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// `task events` section, keyed by task name (or `"*"` for the
    /// suite-wide default bucket probed when no task-specific entry
    /// exists).
    #[serde(default)]
    pub task_events: HashMap<String, HashMap<String, Value>>,
    /// Per-`"host@owner"` remote settings, e.g. `retrieve job logs`.
    #[serde(default)]
    pub host_conf: HashMap<String, HashMap<String, Value>>,
}

impl GlobalConfig {
    /// Load from a YAML file merged with `CYCLECORE_`-prefixed
    /// environment variables, the way the host's config loader layers
    /// file + env.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("CYCLECORE_"))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn lookup(&self, task_name: &str, key: &str) -> Option<Value> {
        self.task_events
            .get(task_name)
            .and_then(|m| m.get(key))
            .or_else(|| self.task_events.get("*").and_then(|m| m.get(key)))
            .cloned()
    }

    fn lookup_host(&self, host: &str, owner: &str, key: &str) -> Option<Value> {
        let bucket = format!("{host}@{owner}");
        self.host_conf.get(&bucket).and_then(|m| m.get(key)).cloned()
    }
}

/// Per-task runtime configuration: the static task definition's own
/// `events`/`remote`/... sections, one `HashMap<String, Value>` per
/// section name (`skey`).
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub sections: HashMap<String, HashMap<String, Value>>,
    pub host: Option<String>,
    pub owner: Option<String>,
}

impl RuntimeConfig {
    fn lookup(&self, section: &str, key: &str) -> Option<Value> {
        self.sections.get(section).and_then(|m| m.get(key)).cloned()
    }
}

/// Operator-injected overrides, highest priority, one bucket per task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastOverride {
    pub sections: HashMap<String, HashMap<String, Value>>,
}

impl BroadcastOverride {
    fn lookup(&self, section: &str, key: &str) -> Option<Value> {
        self.sections.get(section).and_then(|m| m.get(key)).cloned()
    }

    /// Parse a broadcast override from the YAML snippet an operator
    /// hands the scheduler (e.g. `cylc broadcast` reads/writes these
    /// directly, never through the figment-loaded suite config).
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Render back to YAML, for the broadcast manager to persist or
    /// echo to an operator query.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// The three-tier resolver. Holds global config, the per-task
/// broadcast override table, and per-task runtime configs.
pub struct ConfigLookup {
    global: GlobalConfig,
    broadcasts: HashMap<TaskId, BroadcastOverride>,
    runtime_configs: HashMap<TaskId, RuntimeConfig>,
}

impl ConfigLookup {
    pub fn new(global: GlobalConfig) -> Self {
        Self {
            global,
            broadcasts: HashMap::new(),
            runtime_configs: HashMap::new(),
        }
    }

    pub fn set_broadcast(&mut self, task: TaskId, over: BroadcastOverride) {
        self.broadcasts.insert(task, over);
    }

    pub fn set_runtime_config(&mut self, task: TaskId, cfg: RuntimeConfig) {
        self.runtime_configs.insert(task, cfg);
    }

    /// `get_events_conf(task, key, default)`: broadcast "events" →
    /// task runtime config "events" → global "task events". First
    /// non-null wins.
    pub fn get_events_conf(&self, task: &TaskId, key: &str, default: Value) -> Value {
        if let Some(over) = self.broadcasts.get(task) {
            if let Some(v) = over.lookup("events", key) {
                return v;
            }
        }
        if let Some(rc) = self.runtime_configs.get(task) {
            if let Some(v) = rc.lookup("events", key) {
                return v;
            }
        }
        if let Some(v) = self.global.lookup(&task.name, key) {
            return v;
        }
        default
    }

    /// `get_host_conf(task, key, default, skey="remote")`: broadcast
    /// under `skey` → task runtime config under `skey` → global host
    /// lookup for `(task_host, task_owner)`.
    pub fn get_host_conf(&self, task: &TaskId, key: &str, default: Value, skey: Option<&str>) -> Value {
        let skey = skey.unwrap_or(DEFAULT_HOST_SKEY);
        if let Some(over) = self.broadcasts.get(task) {
            if let Some(v) = over.lookup(skey, key) {
                return v;
            }
        }
        let rc = self.runtime_configs.get(task);
        if let Some(rc) = rc {
            if let Some(v) = rc.lookup(skey, key) {
                return v;
            }
        }
        let host = rc.and_then(|rc| rc.host.as_deref()).unwrap_or("localhost");
        let owner = rc.and_then(|rc| rc.owner.as_deref()).unwrap_or("");
        if let Some(v) = self.global.lookup_host(host, owner, key) {
            return v;
        }
        default
    }
}
