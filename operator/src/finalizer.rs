use crate::{
    children::{remove_finalizer, Owner, MAX_WRITE_ATTEMPTS},
    events,
    manager::Context,
    Error, Result,
};
use common::ObjectStore;
use futures::future::BoxFuture;
use kube::Resource;
use tracing::{debug, info};

/// What happened to the finalizer of a child
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Released {
    Removed,
    NotPresent,
    Gone,
}

/// Remove our finalizer token from a child, a missing child counts as released
pub async fn release_child<K>(store: &dyn ObjectStore<K>, namespace: &str, name: &str, token: &str) -> Result<Released>
where
    K: Resource + Send + Sync + 'static,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(mut obj) = store.get(namespace, name).await? else {
            return Ok(Released::Gone);
        };
        if !remove_finalizer(obj.meta_mut(), token) {
            return Ok(Released::NotPresent);
        }
        match store.replace(&obj).await {
            Ok(_) => return Ok(Released::Removed),
            Err(e) if e.is_not_found() => return Ok(Released::Gone),
            Err(e) if e.is_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                debug!("Conflict releasing {namespace}/{name} (attempt {attempt}), retrying");
            }
            Err(e) => return Err(Error::StoreError(e)),
        }
    }
}

/// A child to release, with a label for logs and events
pub struct ReleaseStep<'a> {
    pub kind: &'static str,
    pub name: String,
    pub run: BoxFuture<'a, Result<Released>>,
}

/// Release children in order, stopping at the first failure
///
/// The owner keeps its own finalizer until every step succeeded
pub async fn release_all(ctx: &Context, owner: &Owner, steps: Vec<ReleaseStep<'_>>) -> Result<()> {
    for step in steps {
        match step.run.await? {
            Released::Removed => {
                info!("Removed finalizer from {} {}/{}", step.kind, owner.namespace, step.name);
                let ev = events::from_release(&owner.kind, &owner.name, step.kind, &step.name);
                events::publish(ctx, owner, ev).await;
            }
            Released::NotPresent | Released::Gone => {
                debug!("{} {}/{} holds no finalizer of ours", step.kind, owner.namespace, step.name);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryCluster;
    use common::{
        k8smock::StoreOp,
        keystone::{KeystoneEndpoint, KeystoneService},
    };
    use futures::FutureExt;
    use kube::ResourceExt;

    const TOKEN: &str = "openstack.org/nova";

    fn finalized<K: Resource + Default>(name: &str) -> K {
        let mut obj = K::default();
        obj.meta_mut().name = Some(name.to_string());
        obj.meta_mut().namespace = Some("openstack".to_string());
        obj.meta_mut().finalizers = Some(vec![TOKEN.to_string(), "other/keep".to_string()]);
        obj
    }

    #[tokio::test]
    async fn test_release_child_outcomes() {
        let cluster = MemoryCluster::new();
        cluster.keystone_services.insert(finalized::<KeystoneService>("nova"));
        let store = cluster.keystone_services.as_ref();
        let released = release_child::<KeystoneService>(store, "openstack", "nova", TOKEN).await;
        assert_eq!(released.unwrap(), Released::Removed);
        let svc = cluster.keystone_services.fetch("openstack", "nova").unwrap();
        assert_eq!(svc.finalizers().to_vec(), vec!["other/keep".to_string()]);
        let released = release_child::<KeystoneService>(store, "openstack", "nova", TOKEN).await;
        assert_eq!(released.unwrap(), Released::NotPresent);
        let released = release_child::<KeystoneService>(store, "openstack", "missing", TOKEN).await;
        assert_eq!(released.unwrap(), Released::Gone);
    }

    #[tokio::test]
    async fn test_release_all_in_order_and_stops_on_failure() {
        let cluster = MemoryCluster::new();
        let ctx = cluster.context();
        let owner = cluster.nova_owner("nova");
        cluster.keystone_services.insert(finalized::<KeystoneService>("nova"));
        cluster.keystone_endpoints.insert(finalized::<KeystoneEndpoint>("nova"));
        cluster.keystone_endpoints.fail_writes_for("nova", "webhook denied");

        let steps = vec![
            ReleaseStep {
                kind: "KeystoneService",
                name: "nova".to_string(),
                run: release_child(ctx.stores.keystone_services.as_ref(), "openstack", "nova", TOKEN).boxed(),
            },
            ReleaseStep {
                kind: "KeystoneEndpoint",
                name: "nova".to_string(),
                run: release_child(ctx.stores.keystone_endpoints.as_ref(), "openstack", "nova", TOKEN).boxed(),
            },
        ];
        let err = release_all(&ctx, &owner, steps).await.unwrap_err();
        assert!(err.to_string().contains("webhook denied"));
        let ops = cluster.operations();
        assert_eq!(
            ops,
            vec![StoreOp::Replace {
                kind: "KeystoneService".to_string(),
                name: "nova".to_string()
            }]
        );
    }
}
