use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("K8s error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Elapsed wait error: {0}")]
    Elapsed(#[from] tokio::time::error::Elapsed),

    #[error("Conflict while writing {0}")]
    Conflict(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Registering template failed with error: {0}")]
    HbsTemplateError(#[from] handlebars::TemplateError),
    #[error("Renderer error: {0}")]
    HbsRenderError(#[from] handlebars::RenderError),

    #[error("Error: {0}")]
    Other(String),
}
impl Error {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }

    /// True for the optimistic-concurrency failures a read-modify-write may retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod conditions;
pub mod config;
pub mod handlebarshandler;
pub mod hasheshandlers;
pub mod k8smock;
pub mod keystone;
pub mod mariadb;
pub mod nova;
pub mod novaapi;
pub mod novacell;
pub mod rabbitmq;
pub mod store;

pub use conditions::{Condition, ConditionType, Conditions, HasConditions};
pub use config::OperatorConfig;
pub use store::ObjectStore;

/// ChildRef describe a k8s object managed by the instance holding it in its status
#[derive(Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChildRef {
    /// kind of k8s object
    pub kind: String,
    /// Name of the object (in the namespace of the owner)
    pub name: String,
}

impl ChildRef {
    #[must_use]
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

/// Record a child in a sorted list of references, returns true when it was not known yet
pub fn record_child(children: &mut Vec<ChildRef>, child: ChildRef) -> bool {
    match children.binary_search(&child) {
        Ok(_) => false,
        Err(pos) => {
            children.insert(pos, child);
            true
        }
    }
}

/// Password selectors are the keys of the service Secret holding each password
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordSelector {
    /// Key of the API database password
    #[serde(default = "default_api_database_selector")]
    pub api_database: String,
    /// Key of the cell database password
    #[serde(default = "default_cell_database_selector")]
    pub cell_database: String,
    /// Key of the service user password in the identity service
    #[serde(default = "default_service_selector")]
    pub service: String,
}
fn default_api_database_selector() -> String {
    "NovaAPIDatabasePassword".to_string()
}
fn default_cell_database_selector() -> String {
    "NovaCell0DatabasePassword".to_string()
}
fn default_service_selector() -> String {
    "NovaPassword".to_string()
}
impl Default for PasswordSelector {
    fn default() -> Self {
        Self {
            api_database: default_api_database_selector(),
            cell_database: default_cell_database_selector(),
            service: default_service_selector(),
        }
    }
}

/// Debugging switches of the deployed services
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DebugSettings {
    /// Keep the containers idle instead of starting the service
    #[serde(default)]
    pub stop_service: bool,
    /// Raise the log level of the service
    #[serde(default)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_child_keeps_list_sorted_and_unique() {
        let mut children = Vec::new();
        assert!(record_child(&mut children, ChildRef::new("NovaCell", "nova-cell1")));
        assert!(record_child(&mut children, ChildRef::new("MariaDBDatabase", "nova-api")));
        assert!(record_child(&mut children, ChildRef::new("NovaCell", "nova-cell0")));
        assert!(!record_child(&mut children, ChildRef::new("NovaCell", "nova-cell1")));
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["nova-api", "nova-cell0", "nova-cell1"]);
    }

    #[test]
    fn test_password_selector_defaults_from_empty_object() {
        let sel: PasswordSelector = serde_json::from_str("{}").unwrap();
        assert_eq!(sel, PasswordSelector::default());
        assert_eq!(sel.service, "NovaPassword");
    }
}
