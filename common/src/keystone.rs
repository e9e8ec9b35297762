use crate::conditions::{Conditions, HasConditions};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registration of a service and its user in the identity service
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "KeystoneService",
    status = "KeystoneServiceStatus",
    group = "keystone.openstack.org",
    version = "v1beta1",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneServiceSpec {
    pub service_type: String,
    pub service_name: String,
    #[serde(default)]
    pub service_description: String,
    #[serde(default)]
    pub enabled: bool,
    pub service_user: String,
    pub secret: String,
    pub password_selector: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneServiceStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub service_id: Option<String>,
}

impl HasConditions for KeystoneService {
    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(KeystoneServiceStatus::default).conditions
    }
}

/// The identity service deployment, read only
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "KeystoneAPI",
    status = "KeystoneAPIStatus",
    group = "keystone.openstack.org",
    version = "v1beta1",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneAPISpec {
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneAPIStatus {
    #[serde(default)]
    pub conditions: Conditions,
    /// Endpoint URLs by interface (public, internal, admin)
    #[serde(default)]
    pub api_endpoints: BTreeMap<String, String>,
}

impl KeystoneAPI {
    pub fn endpoint(&self, interface: &str) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.api_endpoints.get(interface))
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }

    pub fn region(&self) -> &str {
        self.spec.region.as_deref().unwrap_or("regionOne")
    }
}

/// Endpoints of a service registered in the identity service
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "KeystoneEndpoint",
    status = "KeystoneEndpointStatus",
    group = "keystone.openstack.org",
    version = "v1beta1",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneEndpointSpec {
    pub service_name: String,
    /// URL by interface
    pub endpoints: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneEndpointStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub endpoint_id: BTreeMap<String, String>,
}

impl HasConditions for KeystoneEndpoint {
    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(KeystoneEndpointStatus::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keystone_api_endpoint_lookup() {
        let api: KeystoneAPI = serde_json::from_value(serde_json::json!({
            "apiVersion": "keystone.openstack.org/v1beta1",
            "kind": "KeystoneAPI",
            "metadata": {"name": "keystone", "namespace": "openstack"},
            "spec": {},
            "status": {
                "apiEndpoints": {"public": "http://keystone-public.openstack.svc:5000", "internal": ""},
                "conditions": [{"type": "Ready", "status": "True", "reason": "Ready", "severity": "", "message": "Setup complete", "lastTransitionTime": "2024-01-01T00:00:00Z"}]
            }
        }))
        .unwrap();
        assert_eq!(api.endpoint("public"), Some("http://keystone-public.openstack.svc:5000"));
        assert_eq!(api.endpoint("internal"), None);
        assert_eq!(api.endpoint("admin"), None);
        assert_eq!(api.region(), "regionOne");
    }
}
