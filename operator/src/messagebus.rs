use crate::{
    children::{ensure, OperationResult, Owner},
    gate::{DependencyMessages, ResourceStatus},
    manager::Context,
};
use common::{
    conditions::{
        ConditionStatus, ConditionType, Severity, MQ_READY_ERROR_MESSAGE, MQ_READY_MESSAGE, MQ_READY_RUNNING_MESSAGE,
    },
    rabbitmq::TransportURL,
    HasConditions,
};
use tracing::{debug, warn};

pub const MESSAGE_BUS: DependencyMessages = DependencyMessages {
    ready: MQ_READY_MESSAGE,
    running: MQ_READY_RUNNING_MESSAGE,
    error: MQ_READY_ERROR_MESSAGE,
};

/// Observed state of a requested message bus access
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageBusState {
    pub status: ResourceStatus,
    /// Secret holding the transport URL, once completed
    pub secret_name: Option<String>,
}

impl MessageBusState {
    fn creating() -> Self {
        Self {
            status: ResourceStatus::Creating,
            secret_name: None,
        }
    }
}

fn failure(transport: &TransportURL) -> Option<&str> {
    transport
        .conditions()
        .and_then(|c| c.get(&ConditionType::READY))
        .filter(|c| c.status == ConditionStatus::False && c.severity == Some(Severity::Error))
        .map(|c| c.message.as_str())
}

/// Request access to a message bus cluster and report its state
pub async fn ensure_transport(ctx: &Context, owner: &Owner, name: &str, cluster: &str) -> MessageBusState {
    let applied = ensure(ctx, ctx.stores.transports.as_ref(), owner, name, |mq: &mut TransportURL| {
        mq.spec.rabbitmq_cluster_name = cluster.to_string();
    })
    .await;

    match applied {
        Err(e) => {
            warn!("Failed to apply TransportURL {}/{name}: {e}", owner.namespace);
            MessageBusState {
                status: ResourceStatus::Failed(e.to_string()),
                secret_name: None,
            }
        }
        Ok((_, OperationResult::Created)) => MessageBusState::creating(),
        Ok((mq, _)) => {
            if let Some(secret) = mq.ready_secret() {
                MessageBusState {
                    status: ResourceStatus::Completed,
                    secret_name: Some(secret.to_string()),
                }
            } else if let Some(message) = failure(&mq) {
                MessageBusState {
                    status: ResourceStatus::Failed(message.to_string()),
                    secret_name: None,
                }
            } else {
                debug!("TransportURL {}/{name} is not ready yet", owner.namespace);
                MessageBusState::creating()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCluster, NAMESPACE};

    #[tokio::test]
    async fn test_transport_lifecycle() {
        let cluster = MemoryCluster::new();
        let ctx = cluster.context();
        let owner = cluster.nova_owner("nova");

        let state = ensure_transport(&ctx, &owner, "nova-api-transport", "rabbitmq").await;
        assert_eq!(state, MessageBusState::creating());
        let mq = cluster.transports.fetch(NAMESPACE, "nova-api-transport").unwrap();
        assert_eq!(mq.spec.rabbitmq_cluster_name, "rabbitmq");

        cluster.complete_transport("nova-api-transport");
        let state = ensure_transport(&ctx, &owner, "nova-api-transport", "rabbitmq").await;
        assert_eq!(state.status, ResourceStatus::Completed);
        assert_eq!(
            state.secret_name.as_deref(),
            Some("rabbitmq-transport-url-nova-api-transport")
        );
    }

    #[tokio::test]
    async fn test_reported_failure() {
        let cluster = MemoryCluster::new();
        let ctx = cluster.context();
        let owner = cluster.nova_owner("nova");
        ensure_transport(&ctx, &owner, "cell1-transport", "rabbitmq-cell1").await;
        cluster.fail_transport("cell1-transport", "no such cluster");
        let state = ensure_transport(&ctx, &owner, "cell1-transport", "rabbitmq-cell1").await;
        assert_eq!(state.status, ResourceStatus::Failed("no such cluster".to_string()));
    }
}
