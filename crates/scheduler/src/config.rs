//! Scheduler configuration.

use std::str::FromStr;

use tracing::{info, warn};
use uuid::Uuid;

use wikitask_core::DomainError;

/// Default cap on executions per task (1 initial try + 9 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

pub const DEFAULT_NAME: &str = "wikitask-scheduler";

/// Task scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Consumer thread name, also used in logs.
    pub name: String,
    /// Identifies this scheduler's rows in a shared task store.
    ///
    /// Must be the same across restarts for recovery to find the rows of a
    /// crashed run, and distinct between schedulers sharing one store.
    pub instance_id: Uuid,
    /// Executions allowed before a task is abandoned.
    pub max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            instance_id: Self::derived_instance_id(DEFAULT_NAME),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `WIKITASK_SCHEDULER_NAME`, `WIKITASK_INSTANCE_ID`
    /// and `WIKITASK_MAX_ATTEMPTS`.
    ///
    /// Without a valid `WIKITASK_INSTANCE_ID` the id is derived from the name.
    /// Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = lookup("WIKITASK_SCHEDULER_NAME").filter(|n| !n.trim().is_empty()) {
            config.name = name;
        }

        let explicit = lookup("WIKITASK_INSTANCE_ID").and_then(|raw| match Uuid::from_str(raw.trim()) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(value = %raw, error = %e, "ignoring invalid WIKITASK_INSTANCE_ID");
                None
            }
        });
        config.instance_id = match explicit {
            Some(id) => id,
            None => {
                let id = Self::derived_instance_id(&config.name);
                info!(
                    scheduler = %config.name,
                    instance = %id,
                    "WIKITASK_INSTANCE_ID not set; using id derived from the scheduler name"
                );
                id
            }
        };

        if let Some(raw) = lookup("WIKITASK_MAX_ATTEMPTS") {
            match parse_max_attempts(&raw) {
                Ok(n) => config.max_attempts = n,
                Err(e) => warn!(value = %raw, error = %e, "ignoring invalid WIKITASK_MAX_ATTEMPTS"),
            }
        }

        config
    }

    /// Stable instance id for a scheduler name (UUIDv5).
    pub fn derived_instance_id(name: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("wikitask:{}", name).as_bytes())
    }

    /// Sets the name only; the instance id is left as it is.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_instance_id(mut self, instance_id: Uuid) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// Values below 1 are clamped to 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether a task that has run `attempts` times may run again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

fn parse_max_attempts(raw: &str) -> Result<u32, DomainError> {
    let n = raw
        .trim()
        .parse::<u32>()
        .map_err(|e| DomainError::validation(format!("max attempts: {}", e)))?;
    if n == 0 {
        return Err(DomainError::validation("max attempts must be at least 1"));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_allows_ten_attempts() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert!(config.should_retry(9));
        assert!(!config.should_retry(10));
    }

    #[test]
    fn reads_overrides() {
        let id = Uuid::now_v7();
        let id_str = id.to_string();
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("WIKITASK_SCHEDULER_NAME", "links-worker"),
            ("WIKITASK_INSTANCE_ID", id_str.as_str()),
            ("WIKITASK_MAX_ATTEMPTS", "3"),
        ]));
        assert_eq!(config.name, "links-worker");
        assert_eq!(config.instance_id, id);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("WIKITASK_INSTANCE_ID", "not-a-uuid"),
            ("WIKITASK_MAX_ATTEMPTS", "0"),
        ]));
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.name, "wikitask-scheduler");
        assert_eq!(config.instance_id, SchedulerConfig::default().instance_id);
    }

    #[test]
    fn default_instance_id_survives_restarts() {
        assert_eq!(SchedulerConfig::default().instance_id, SchedulerConfig::default().instance_id);
        assert_eq!(
            SchedulerConfig::from_lookup(lookup(&[])).instance_id,
            SchedulerConfig::default().instance_id
        );
    }

    #[test]
    fn instance_id_follows_configured_name() {
        let links = SchedulerConfig::from_lookup(lookup(&[("WIKITASK_SCHEDULER_NAME", "links-worker")]));
        let index = SchedulerConfig::from_lookup(lookup(&[("WIKITASK_SCHEDULER_NAME", "index-worker")]));
        assert_eq!(links.instance_id, SchedulerConfig::derived_instance_id("links-worker"));
        assert_ne!(links.instance_id, index.instance_id);
    }

    #[test]
    fn builder_clamps_attempts() {
        let config = SchedulerConfig::default().with_max_attempts(0);
        assert_eq!(config.max_attempts, 1);
        assert!(!config.should_retry(1));
    }
}
