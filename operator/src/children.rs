use crate::{events, manager::Context, Error, Result};
use common::ObjectStore;
use k8s_openapi::{
    api::core::v1::ObjectReference, apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{api::ObjectMeta, Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, info};

/// Attempts of a read-modify-write before giving up on conflicts
pub const MAX_WRITE_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

/// The instance owning the children being reconciled
#[derive(Clone, Debug)]
pub struct Owner {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub reference: OwnerReference,
    pub object: ObjectReference,
}

impl Owner {
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Result<Self> {
        let kind = K::kind(&()).to_string();
        let reference = obj
            .controller_owner_ref(&())
            .ok_or_else(|| Error::MissingUid(format!("{kind}/{}", obj.name_any())))?;
        Ok(Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
            object: obj.object_ref(&()),
            reference,
            kind,
        })
    }

    /// Make the owner the controller of an object, keeping other owners
    pub fn adopt(&self, meta: &mut ObjectMeta) {
        let refs = meta.owner_references.get_or_insert_with(Vec::new);
        refs.retain(|r| r.uid != self.reference.uid && r.controller != Some(true));
        refs.push(self.reference.clone());
    }
}

/// Add a finalizer token, returns true when it was missing
pub fn add_finalizer(meta: &mut ObjectMeta, token: &str) -> bool {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if finalizers.iter().any(|f| f == token) {
        false
    } else {
        finalizers.push(token.to_string());
        true
    }
}

/// Remove a finalizer token, returns true when it was present
pub fn remove_finalizer(meta: &mut ObjectMeta, token: &str) -> bool {
    match meta.finalizers.as_mut() {
        Some(finalizers) if finalizers.iter().any(|f| f == token) => {
            finalizers.retain(|f| f != token);
            true
        }
        _ => false,
    }
}

/// Converge the named child of the owner towards the state set by `mutate`
///
/// The child is created when missing, otherwise written only if `mutate` changed it.
/// Optimistic concurrency failures restart from a fresh read.
pub async fn create_or_patch<K, F>(
    store: &dyn ObjectStore<K>,
    owner: &Owner,
    name: &str,
    mutate: F,
) -> Result<(K, OperationResult)>
where
    K: Resource + Default + Clone + Serialize + Send + Sync + 'static,
    F: Fn(&mut K),
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match store.get(&owner.namespace, name).await? {
            None => {
                let mut obj = K::default();
                obj.meta_mut().name = Some(name.to_string());
                obj.meta_mut().namespace = Some(owner.namespace.clone());
                owner.adopt(obj.meta_mut());
                mutate(&mut obj);
                store.create(&obj).await.map(|o| (o, OperationResult::Created))
            }
            Some(current) => {
                let mut desired = current.clone();
                owner.adopt(desired.meta_mut());
                mutate(&mut desired);
                if serde_json::to_value(&desired)? == serde_json::to_value(&current)? {
                    return Ok((current, OperationResult::Unchanged));
                }
                store.replace(&desired).await.map(|o| (o, OperationResult::Updated))
            }
        };
        match outcome {
            Err(e) if e.is_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                debug!("Conflict on {name} (attempt {attempt}), retrying from a fresh read");
            }
            other => return other.map_err(Error::StoreError),
        }
    }
}

/// create_or_patch, then log and publish what was done
pub async fn ensure<K, F>(
    ctx: &Context,
    store: &dyn ObjectStore<K>,
    owner: &Owner,
    name: &str,
    mutate: F,
) -> Result<(K, OperationResult)>
where
    K: Resource<DynamicType = ()> + Default + Clone + Serialize + Send + Sync + 'static,
    F: Fn(&mut K),
{
    let (obj, op) = create_or_patch(store, owner, name, mutate).await?;
    let kind = K::kind(&());
    match op {
        OperationResult::Created => {
            info!("Created {kind} {}/{name} for {} {}", owner.namespace, owner.kind, owner.name);
            let ev = events::from_create(&owner.kind, &owner.name, &kind, name, Some(obj.object_ref(&())));
            events::publish(ctx, owner, ev).await;
        }
        OperationResult::Updated => {
            info!("Updated {kind} {}/{name} for {} {}", owner.namespace, owner.kind, owner.name);
            let ev = events::from_update(&owner.kind, &owner.name, &kind, name, Some(obj.object_ref(&())));
            events::publish(ctx, owner, ev).await;
        }
        OperationResult::Unchanged => debug!("{kind} {}/{name} is up to date", owner.namespace),
    }
    Ok((obj, op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::k8smock::{Journal, MemoryStore, StoreOp};
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::collections::BTreeMap;

    fn owner() -> Owner {
        let mut nova = common::nova::Nova::new("nova", Default::default());
        nova.metadata.namespace = Some("openstack".to_string());
        nova.metadata.uid = Some("nova-uid".to_string());
        Owner::of(&nova).unwrap()
    }

    fn fill(value: &str) -> impl Fn(&mut ConfigMap) + '_ {
        move |cm: &mut ConfigMap| {
            cm.data = Some(BTreeMap::from([("key".to_string(), value.to_string())]));
        }
    }

    #[test]
    fn test_owner_requires_uid() {
        let nova = common::nova::Nova::new("nova", Default::default());
        assert!(matches!(Owner::of(&nova), Err(Error::MissingUid(_))));
        let owner = owner();
        assert_eq!(owner.reference.controller, Some(true));
        assert_eq!(owner.reference.kind, "Nova");
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut meta = ObjectMeta::default();
        assert!(add_finalizer(&mut meta, "openstack.org/nova"));
        assert!(!add_finalizer(&mut meta, "openstack.org/nova"));
        assert!(remove_finalizer(&mut meta, "openstack.org/nova"));
        assert!(!remove_finalizer(&mut meta, "openstack.org/nova"));
        assert_eq!(meta.finalizers, Some(vec![]));
    }

    #[tokio::test]
    async fn test_create_update_then_unchanged() {
        let journal = Journal::default();
        let store = MemoryStore::<ConfigMap>::new(journal.clone());
        let owner = owner();
        let (cm, op) = create_or_patch(&store, &owner, "cfg", fill("a")).await.unwrap();
        assert_eq!(op, OperationResult::Created);
        assert_eq!(cm.owner_references()[0].uid, "nova-uid");

        let (_, op) = create_or_patch(&store, &owner, "cfg", fill("a")).await.unwrap();
        assert_eq!(op, OperationResult::Unchanged);
        let (cm, op) = create_or_patch(&store, &owner, "cfg", fill("b")).await.unwrap();
        assert_eq!(op, OperationResult::Updated);
        assert_eq!(cm.data.unwrap()["key"], "b");
        assert_eq!(cm.metadata.owner_references.unwrap().len(), 1);
        assert_eq!(journal.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_a_bounded_number_of_times() {
        let store = MemoryStore::<ConfigMap>::new(Journal::default());
        let owner = owner();
        store.inject_conflicts(2);
        let (_, op) = create_or_patch(&store, &owner, "cfg", fill("a")).await.unwrap();
        assert_eq!(op, OperationResult::Created);

        store.inject_conflicts(MAX_WRITE_ATTEMPTS as u64);
        let err = create_or_patch(&store, &owner, "cfg", fill("b")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_write_failure_is_returned() {
        let journal = Journal::default();
        let store = MemoryStore::<ConfigMap>::new(journal.clone());
        store.fail_writes_for("cfg", "quota exceeded");
        let err = create_or_patch(&store, &owner(), "cfg", fill("a")).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert!(!journal
            .lock()
            .unwrap()
            .iter()
            .any(|op| matches!(op, StoreOp::Create { .. })));
    }
}
