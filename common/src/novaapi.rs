use crate::{
    conditions::{Conditions, HasConditions},
    novacell::{default_region, default_replicas, default_user},
    DebugSettings, PasswordSelector,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Template of the API service
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NovaAPITemplate {
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
impl Default for NovaAPITemplate {
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

/// Generate the Kubernetes wrapper struct `NovaAPI` from our Spec and Status struct
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "NovaAPI",
    status = "NovaAPIStatus",
    shortname = "novaapi",
    group = "nova.openstack.org",
    version = "v1beta1",
    namespaced,
    derive = "Default"
)]
#[kube(
    doc = "Custom resource representing the API tier of a Nova deployment",
    printcolumn = r#"
    {"name":"replicas", "type":"integer", "description":"Ready replicas", "jsonPath":".status.readyCount"},
    {"name":"ready",  "type":"string", "description":"Ready", "jsonPath":".status.conditions[?(@.type == 'Ready')].status"},
    {"name":"errors", "type":"string", "description":"Errors", "jsonPath":".status.conditions[?(@.status == 'False')].message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NovaAPISpec {
    /// Secret holding the service passwords
    pub secret: String,
    pub api_database_hostname: String,
    pub api_database_name: String,
    #[serde(default = "default_user")]
    pub api_database_user: String,
    pub cell0_database_hostname: String,
    pub cell0_database_name: String,
    #[serde(default = "default_user")]
    pub cell0_database_user: String,
    /// Secret holding the transport_url of the API message bus
    pub api_message_bus_secret_name: String,
    /// Public URL of the identity service
    pub keystone_auth_url: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_user")]
    pub service_user: String,
    #[serde(default)]
    pub password_selectors: PasswordSelector,
    #[serde(default)]
    pub service_template: NovaAPITemplate,
    #[serde(default)]
    pub debug: DebugSettings,
}

/// The status object of `NovaAPI`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NovaAPIStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub ready_count: i32,
    /// Hashes of the inputs of the deployment
    #[serde(default)]
    pub hash: BTreeMap<String, String>,
    /// Exposed URL by interface
    #[serde(default)]
    pub api_endpoints: BTreeMap<String, String>,
}

impl HasConditions for NovaAPI {
    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(NovaAPIStatus::default).conditions
    }
}

impl NovaAPI {
    pub fn ready_count(&self) -> i32 {
        self.status.as_ref().map_or(0, |s| s.ready_count)
    }

    pub fn status_mut(&mut self) -> &mut NovaAPIStatus {
        self.status.get_or_insert_with(NovaAPIStatus::default)
    }
}
