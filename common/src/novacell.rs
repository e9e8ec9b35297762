use crate::{
    conditions::{Conditions, HasConditions},
    DebugSettings, PasswordSelector,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) fn default_user() -> String {
    "nova".to_string()
}
pub(crate) fn default_database_instance() -> String {
    "openstack".to_string()
}
pub(crate) fn default_message_bus_instance() -> String {
    "rabbitmq".to_string()
}
pub(crate) fn default_replicas() -> i32 {
    1
}
pub(crate) fn default_region() -> String {
    "regionOne".to_string()
}
fn default_cell_database_selector() -> String {
    "NovaCell0DatabasePassword".to_string()
}

/// Template of the conductor service of a cell
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NovaConductorTemplate {
    /// Container image, the operator default when unset
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    /// Added to the service configuration as its own file
    #[serde(default)]
    pub custom_service_config: String,
    /// Configuration files replacing the generated ones
    #[serde(default)]
    pub default_config_overwrite: BTreeMap<String, String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}
impl Default for NovaConductorTemplate {
    fn default() -> Self {
        Self {
            container_image: None,
            replicas: default_replicas(),
            custom_service_config: String::new(),
            default_config_overwrite: BTreeMap::new(),
            node_selector: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CellPasswordSelector {
    /// Key of the cell database password in the service Secret
    #[serde(default = "default_cell_database_selector")]
    pub database: String,
}
impl Default for CellPasswordSelector {
    fn default() -> Self {
        Self {
            database: default_cell_database_selector(),
        }
    }
}

/// Description of one cell inside a Nova deployment
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NovaCellTemplate {
    /// MariaDB instance hosting the cell database
    #[serde(default = "default_database_instance")]
    pub cell_database_instance: String,
    #[serde(default = "default_user")]
    pub cell_database_user: String,
    /// RabbitMQ cluster of the cell, ignored by the primary cell which shares the API one
    #[serde(default = "default_message_bus_instance")]
    pub cell_message_bus_instance: String,
    /// Whether the services of the cell reach the API database
    #[serde(default, rename = "hasAPIAccess")]
    pub has_api_access: bool,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub conductor_service_template: NovaConductorTemplate,
    #[serde(default)]
    pub password_selectors: CellPasswordSelector,
}
impl Default for NovaCellTemplate {
    fn default() -> Self {
        Self {
            cell_database_instance: default_database_instance(),
            cell_database_user: default_user(),
            cell_message_bus_instance: default_message_bus_instance(),
            has_api_access: false,
            node_selector: BTreeMap::new(),
            conductor_service_template: NovaConductorTemplate::default(),
            password_selectors: CellPasswordSelector::default(),
        }
    }
}

/// Generate the Kubernetes wrapper struct `NovaCell` from our Spec and Status struct
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "NovaCell",
    status = "NovaCellStatus",
    shortname = "novacell",
    group = "nova.openstack.org",
    version = "v1beta1",
    namespaced,
    derive = "Default"
)]
#[kube(
    doc = "Custom resource representing a cell of a Nova deployment",
    printcolumn = r#"
    {"name":"cell",   "type":"string", "description":"Cell name", "jsonPath":".spec.cellName"},
    {"name":"conductors", "type":"integer", "description":"Ready conductors", "jsonPath":".status.conductorServiceReadyCount"},
    {"name":"ready",  "type":"string", "description":"Ready", "jsonPath":".status.conditions[?(@.type == 'Ready')].status"},
    {"name":"errors", "type":"string", "description":"Errors", "jsonPath":".status.conditions[?(@.status == 'False')].message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NovaCellSpec {
    /// Name of the cell in the deployment
    pub cell_name: String,
    /// Secret holding the service passwords
    pub secret: String,
    pub cell_database_hostname: String,
    pub cell_database_name: String,
    #[serde(default = "default_user")]
    pub cell_database_user: String,
    /// Secret holding the transport_url of the cell message bus
    pub cell_message_bus_secret_name: String,
    /// Set only for cells with API access
    #[serde(default)]
    pub api_database_hostname: Option<String>,
    #[serde(default)]
    pub api_database_name: Option<String>,
    #[serde(default)]
    pub api_database_user: Option<String>,
    /// Public URL of the identity service
    pub keystone_auth_url: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_user")]
    pub service_user: String,
    #[serde(default)]
    pub password_selectors: PasswordSelector,
    #[serde(default)]
    pub conductor_service_template: NovaConductorTemplate,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub debug: DebugSettings,
}

/// The status object of `NovaCell`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NovaCellStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub conductor_service_ready_count: i32,
    /// Hashes of the inputs of the conductor deployment
    #[serde(default)]
    pub hash: BTreeMap<String, String>,
}

impl NovaCellSpec {
    /// Whether the cell services are configured with the API database
    pub fn has_api_access(&self) -> bool {
        self.api_database_hostname.is_some()
    }
}

impl NovaCell {
    pub fn status_mut(&mut self) -> &mut NovaCellStatus {
        self.status.get_or_insert_with(NovaCellStatus::default)
    }
}

impl HasConditions for NovaCell {
    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(NovaCellStatus::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_template_defaults() {
        let template: NovaCellTemplate = serde_json::from_str(r#"{"hasAPIAccess": true}"#).unwrap();
        assert!(template.has_api_access);
        assert_eq!(template.cell_database_instance, "openstack");
        assert_eq!(template.cell_message_bus_instance, "rabbitmq");
        assert_eq!(template.conductor_service_template.replicas, 1);
        assert_eq!(template.password_selectors.database, "NovaCell0DatabasePassword");
        let empty: NovaCellTemplate = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, NovaCellTemplate::default());
    }
}
