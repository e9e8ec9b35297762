use crate::{
    conditions::{Conditions, HasConditions},
    novaapi::NovaAPITemplate,
    novacell::{default_database_instance, default_message_bus_instance, default_user, NovaCellTemplate},
    ChildRef, DebugSettings, PasswordSelector,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_keystone_instance() -> String {
    "keystone".to_string()
}

/// Generate the Kubernetes wrapper struct `Nova` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen.rs)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "Nova",
    status = "NovaStatus",
    shortname = "nova",
    group = "nova.openstack.org",
    version = "v1beta1",
    namespaced,
    derive = "Default"
)]
#[kube(
    doc = "Custom resource representing a Nova compute service deployment",
    printcolumn = r#"
    {"name":"cells",  "type":"string", "description":"Cells", "jsonPath":".status.conditions[?(@.type == 'NovaAllCellsReady')].status"},
    {"name":"api",    "type":"integer", "description":"Ready API replicas", "jsonPath":".status.apiServiceReadyCount"},
    {"name":"ready",  "type":"string", "description":"Ready", "jsonPath":".status.conditions[?(@.type == 'Ready')].status"},
    {"name":"last_updated", "type":"date", "description":"Last update date", "format": "date-time", "jsonPath":".status.conditions[?(@.type == 'Ready')].lastTransitionTime"},
    {"name":"errors", "type":"string", "description":"Errors", "jsonPath":".status.conditions[?(@.status == 'False')].message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NovaSpec {
    /// KeystoneAPI instance to register the service in
    #[serde(default = "default_keystone_instance")]
    pub keystone_instance: String,
    /// MariaDB instance hosting the API database
    #[serde(default = "default_database_instance")]
    pub api_database_instance: String,
    #[serde(default = "default_user")]
    pub api_database_user: String,
    /// RabbitMQ cluster of the API, shared with the primary cell
    #[serde(default = "default_message_bus_instance")]
    pub api_message_bus_instance: String,
    /// Cells of the deployment by name, the primary cell is mandatory
    pub cell_templates: BTreeMap<String, NovaCellTemplate>,
    #[serde(default)]
    pub api_service_template: NovaAPITemplate,
    /// Secret holding the service passwords
    pub secret: String,
    #[serde(default = "default_user")]
    pub service_user: String,
    #[serde(default)]
    pub password_selectors: PasswordSelector,
    #[serde(default)]
    pub debug: DebugSettings,
}

/// The status object of `Nova`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NovaStatus {
    #[serde(default)]
    pub conditions: Conditions,
    /// Ready replicas of the API tier
    #[serde(default)]
    pub api_service_ready_count: i32,
    #[serde(default)]
    pub hash: BTreeMap<String, String>,
    /// Objects created for this instance
    #[serde(default)]
    pub children: Vec<ChildRef>,
}

impl HasConditions for Nova {
    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(NovaStatus::default).conditions
    }
}

impl Nova {
    pub fn status_mut(&mut self) -> &mut NovaStatus {
        self.status.get_or_insert_with(NovaStatus::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_nova_parses_with_defaults() {
        let nova: Nova = serde_json::from_value(serde_json::json!({
            "apiVersion": "nova.openstack.org/v1beta1",
            "kind": "Nova",
            "metadata": {"name": "nova", "namespace": "openstack"},
            "spec": {
                "secret": "osp-secret",
                "cellTemplates": {"cell0": {}, "cell1": {"hasAPIAccess": true}}
            }
        }))
        .unwrap();
        assert_eq!(nova.spec.keystone_instance, "keystone");
        assert_eq!(nova.spec.api_database_instance, "openstack");
        assert_eq!(nova.spec.api_message_bus_instance, "rabbitmq");
        assert_eq!(nova.spec.api_service_template.replicas, 1);
        let cells: Vec<&String> = nova.spec.cell_templates.keys().collect();
        assert_eq!(cells, vec!["cell0", "cell1"]);
        assert!(nova.spec.cell_templates["cell1"].has_api_access);
        assert!(nova.status.is_none());
    }
}
