use crate::{children::Owner, manager::Context};
use kube::runtime::events::{Event, EventType, Recorder};
use k8s_openapi::api::core::v1::ObjectReference;
use tracing::{debug, warn};

#[must_use]
pub fn from_create(src_type: &str, src_name: &str, child_type: &str, child_name: &str, child: Option<ObjectReference>) -> Event {
    Event {
        type_: EventType::Normal,
        reason: format!("Reconciling `{src_name}` {src_type}"),
        note: Some(format!("Creating `{child_name}` {child_type} for `{src_name}` {src_type}")),
        action: format!("Creating `{child_name}` {child_type}"),
        secondary: child,
    }
}

#[must_use]
pub fn from_update(src_type: &str, src_name: &str, child_type: &str, child_name: &str, child: Option<ObjectReference>) -> Event {
    Event {
        type_: EventType::Normal,
        reason: format!("Reconciling `{src_name}` {src_type}"),
        note: Some(format!("Updating `{child_name}` {child_type} for `{src_name}` {src_type}")),
        action: format!("Updating `{child_name}` {child_type}"),
        secondary: child,
    }
}

#[must_use]
pub fn from_release(src_type: &str, src_name: &str, child_type: &str, child_name: &str) -> Event {
    Event {
        type_: EventType::Normal,
        reason: format!("Deleting `{src_name}` {src_type}"),
        note: Some(format!("Releasing `{child_name}` {child_type} for `{src_name}` {src_type}")),
        action: format!("Releasing `{child_name}` {child_type}"),
        secondary: None,
    }
}

#[must_use]
pub fn from_failure(src_type: &str, src_name: &str, step: &str, message: &str) -> Event {
    Event {
        type_: EventType::Warning,
        reason: format!("Reconciling `{src_name}` {src_type}"),
        note: Some(format!("{step} failed: {message}")),
        action: step.to_string(),
        secondary: None,
    }
}

/// Publish an event about the owner, failures are only logged
pub async fn publish(ctx: &Context, owner: &Owner, ev: Event) {
    let Some(client) = ctx.client.clone() else {
        debug!("{}/{}: {}", owner.kind, owner.name, ev.action);
        return;
    };
    let recorder = Recorder::new(client, ctx.reporter.clone(), owner.object.clone());
    if let Err(e) = recorder.publish(ev).await {
        warn!("Failed to publish event for {}/{}: {e:?}", owner.kind, owner.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_texts() {
        let ev = from_create("Nova", "nova", "NovaCell", "nova-cell0", None);
        assert_eq!(ev.action, "Creating `nova-cell0` NovaCell");
        assert_eq!(ev.note.as_deref(), Some("Creating `nova-cell0` NovaCell for `nova` Nova"));
        let ev = from_failure("Nova", "nova", "NovaAPI", "quota exceeded");
        assert_eq!(ev.type_, EventType::Warning);
        assert_eq!(ev.note.as_deref(), Some("NovaAPI failed: quota exceeded"));
    }

    #[tokio::test]
    async fn test_publish_without_client_only_logs() {
        let cluster = crate::testing::MemoryCluster::new();
        let ctx = cluster.context();
        assert!(ctx.client.is_none());
        let owner = cluster.nova_owner("nova");
        assert_eq!(ctx.reporter.controller, ctx.config.reporter);
        publish(&ctx, &owner, from_release("Nova", "nova", "KeystoneService", "nova")).await;
        assert!(cluster.operations().is_empty());
    }
}
