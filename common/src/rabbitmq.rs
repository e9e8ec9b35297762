use crate::conditions::{Conditions, HasConditions};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Key of the transport URL in the Secret published by a TransportURL
pub const TRANSPORT_URL_KEY: &str = "transport_url";

/// Access to a message bus cluster, published as a Secret
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "TransportURL",
    status = "TransportURLStatus",
    group = "rabbitmq.openstack.org",
    version = "v1beta1",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct TransportURLSpec {
    /// Name of the RabbitMQ cluster
    pub rabbitmq_cluster_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransportURLStatus {
    #[serde(default)]
    pub conditions: Conditions,
    /// Secret holding the transport_url
    #[serde(default)]
    pub secret_name: Option<String>,
}

impl TransportURL {
    /// Secret to read the transport URL from, once the bus is usable
    pub fn ready_secret(&self) -> Option<&str> {
        if !self.is_ready() {
            return None;
        }
        self.status
            .as_ref()
            .and_then(|s| s.secret_name.as_deref())
            .filter(|n| !n.is_empty())
    }
}

impl HasConditions for TransportURL {
    fn conditions(&self) -> Option<&Conditions> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    fn conditions_mut(&mut self) -> &mut Conditions {
        &mut self.status.get_or_insert_with(TransportURLStatus::default).conditions
    }
}
