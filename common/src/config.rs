use std::{str::FromStr, time::Duration};
use tracing::warn;

pub const DEFAULT_API_IMAGE: &str = "quay.io/podified-antelope-centos9/openstack-nova-api:current-podified";
pub const DEFAULT_CONDUCTOR_IMAGE: &str =
    "quay.io/podified-antelope-centos9/openstack-nova-conductor:current-podified";

/// Operator wide settings, built once at startup and shared by every controller
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Name of the cell every other cell depends on
    pub primary_cell: String,
    /// Delay before retrying a pass waiting on something not watched
    pub requeue_timeout: Duration,
    /// Delay before retrying a failed pass
    pub error_requeue: Duration,
    /// Delay before re-checking a healthy instance
    pub resync: Duration,
    /// Deadline of every call to the cluster
    pub api_timeout: Duration,
    pub service_name: String,
    pub service_type: String,
    pub api_image: String,
    pub conductor_image: String,
    pub api_port: i32,
    /// Label key selecting the pods of a service
    pub app_selector: String,
    pub field_manager: String,
    pub reporter: String,
    pub reporter_instance: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            primary_cell: "cell0".to_string(),
            requeue_timeout: Duration::from_secs(10),
            error_requeue: Duration::from_secs(5 * 60),
            resync: Duration::from_secs(15 * 60),
            api_timeout: Duration::from_secs(30),
            service_name: "nova".to_string(),
            service_type: "compute".to_string(),
            api_image: DEFAULT_API_IMAGE.to_string(),
            conductor_image: DEFAULT_CONDUCTOR_IMAGE.to_string(),
            api_port: 8774,
            app_selector: "service".to_string(),
            field_manager: "nova-operator".to_string(),
            reporter: "nova-operator".to_string(),
            reporter_instance: None,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value {value:?} for {key}");
            default
        }),
    }
}

fn secs_or(key: &str, raw: Option<String>, default: Duration) -> Duration {
    Duration::from_secs(parse_or(key, raw, default.as_secs()))
}

impl OperatorConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup, unset and invalid keys keep their default
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let def = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            primary_cell: non_empty("NOVA_PRIMARY_CELL").unwrap_or(def.primary_cell),
            requeue_timeout: secs_or(
                "NOVA_REQUEUE_TIMEOUT_SECS",
                non_empty("NOVA_REQUEUE_TIMEOUT_SECS"),
                def.requeue_timeout,
            ),
            error_requeue: secs_or(
                "NOVA_ERROR_REQUEUE_SECS",
                non_empty("NOVA_ERROR_REQUEUE_SECS"),
                def.error_requeue,
            ),
            resync: secs_or("NOVA_RESYNC_SECS", non_empty("NOVA_RESYNC_SECS"), def.resync),
            api_timeout: secs_or(
                "NOVA_API_TIMEOUT_SECS",
                non_empty("NOVA_API_TIMEOUT_SECS"),
                def.api_timeout,
            ),
            service_name: non_empty("NOVA_SERVICE_NAME").unwrap_or(def.service_name),
            service_type: non_empty("NOVA_SERVICE_TYPE").unwrap_or(def.service_type),
            api_image: non_empty("NOVA_API_IMAGE").unwrap_or(def.api_image),
            conductor_image: non_empty("NOVA_CONDUCTOR_IMAGE").unwrap_or(def.conductor_image),
            reporter_instance: non_empty("POD_NAME"),
            ..def
        }
    }

    /// Finalizer token this operator puts on objects of the given kind
    #[must_use]
    pub fn finalizer(&self, kind: &str) -> String {
        format!("openstack.org/{}", kind.to_lowercase())
    }

    /// Name of the database holding a cell
    #[must_use]
    pub fn cell_database_name(&self, cell: &str) -> String {
        format!("nova_{cell}")
    }

    #[must_use]
    pub fn is_primary_cell(&self, cell: &str) -> bool {
        self.primary_cell == cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = OperatorConfig::from_lookup(|_| None);
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(config.primary_cell, "cell0");
        assert_eq!(config.requeue_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_values_are_read_and_invalid_ones_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("NOVA_PRIMARY_CELL", "main"),
            ("NOVA_REQUEUE_TIMEOUT_SECS", "3"),
            ("NOVA_ERROR_REQUEUE_SECS", "soon"),
            ("NOVA_SERVICE_NAME", ""),
            ("POD_NAME", "nova-operator-0"),
        ]);
        let config = OperatorConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.primary_cell, "main");
        assert!(config.is_primary_cell("main"));
        assert_eq!(config.requeue_timeout, Duration::from_secs(3));
        assert_eq!(config.error_requeue, Duration::from_secs(300));
        assert_eq!(config.service_name, "nova");
        assert_eq!(config.reporter_instance.as_deref(), Some("nova-operator-0"));
    }

    #[test]
    fn test_finalizer_and_database_names() {
        let config = OperatorConfig::default();
        assert_eq!(config.finalizer("NovaAPI"), "openstack.org/novaapi");
        assert_eq!(config.cell_database_name("cell1"), "nova_cell1");
    }
}
