use crate::{
    store::{describe, object_location, ObjectStore},
    Error, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

/// A write recorded by a MemoryStore
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Create { kind: String, name: String },
    Replace { kind: String, name: String },
    ReplaceStatus { kind: String, name: String },
    Remove { kind: String, name: String },
}
impl StoreOp {
    pub fn kind(&self) -> &str {
        match self {
            StoreOp::Create { kind, .. }
            | StoreOp::Replace { kind, .. }
            | StoreOp::ReplaceStatus { kind, .. }
            | StoreOp::Remove { kind, .. } => kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StoreOp::Create { name, .. }
            | StoreOp::Replace { name, .. }
            | StoreOp::ReplaceStatus { name, .. }
            | StoreOp::Remove { name, .. } => name,
        }
    }
}

/// Operation log shared by every store of a test cluster
pub type Journal = Arc<Mutex<Vec<StoreOp>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn with_status(target: &mut Value, status: Option<Value>) {
    if let Some(map) = target.as_object_mut() {
        match status {
            None | Some(Value::Null) => {
                map.remove("status");
            }
            Some(s) => {
                map.insert("status".to_string(), s);
            }
        }
    }
}

/// In memory ObjectStore for one kind, with the write semantics of the API server:
/// resourceVersion conflicts, status kept apart from the object, and deletion
/// blocked by finalizers
pub struct MemoryStore<K> {
    kind: String,
    objects: Mutex<BTreeMap<(String, String), K>>,
    journal: Journal,
    version: AtomicU64,
    failures: Mutex<BTreeMap<String, String>>,
    conflicts: AtomicU64,
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self {
            kind: K::kind(&K::DynamicType::default()).to_string(),
            objects: Mutex::new(BTreeMap::new()),
            journal,
            version: AtomicU64::new(0),
            failures: Mutex::new(BTreeMap::new()),
            conflicts: AtomicU64::new(0),
        }
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn record(&self, op: StoreOp) {
        lock(&self.journal).push(op);
    }

    fn check_write(&self, name: &str) -> Result<()> {
        if let Some(message) = lock(&self.failures).get(name) {
            return Err(Error::Other(message.clone()));
        }
        let pending = self.conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(Error::Conflict(format!("{}/{name}", self.kind)));
        }
        Ok(())
    }

    /// Seed an object as if it already existed in the cluster
    pub fn insert(&self, mut obj: K) -> K {
        let version = self.next_version();
        let meta = obj.meta_mut();
        meta.resource_version = Some(version.clone());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}-{version}", self.kind.to_lowercase()));
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Time(Utc::now()));
        }
        let key = (obj.namespace().unwrap_or_default(), obj.name_any());
        lock(&self.objects).insert(key, obj.clone());
        obj
    }

    pub fn fetch(&self, namespace: &str, name: &str) -> Option<K> {
        lock(&self.objects)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn list(&self) -> Vec<K> {
        lock(&self.objects).values().cloned().collect()
    }

    /// Change an object behind the back of the reconciler, like another controller would
    pub fn update_with<F>(&self, namespace: &str, name: &str, change: F) -> bool
    where
        F: FnOnce(&mut K),
    {
        let version = self.next_version();
        let mut objects = lock(&self.objects);
        match objects.get_mut(&(namespace.to_string(), name.to_string())) {
            Some(obj) => {
                change(obj);
                obj.meta_mut().resource_version = Some(version);
                true
            }
            None => false,
        }
    }

    /// Ask for the deletion of an object, it stays until its finalizers are gone
    pub fn request_delete(&self, namespace: &str, name: &str) -> bool {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = lock(&self.objects);
        let Some(obj) = objects.get_mut(&key) else {
            return false;
        };
        if obj.finalizers().is_empty() {
            objects.remove(&key);
            drop(objects);
            self.record(StoreOp::Remove {
                kind: self.kind.clone(),
                name: name.to_string(),
            });
        } else if obj.meta().deletion_timestamp.is_none() {
            obj.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
        }
        true
    }

    /// Make every write on the named object fail with the given message
    pub fn fail_writes_for(&self, name: &str, message: &str) {
        lock(&self.failures).insert(name.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Make the next writes fail with a conflict
    pub fn inject_conflicts(&self, count: u64) {
        self.conflicts.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.fetch(namespace, name))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_location(obj)?;
        self.check_write(&name)?;
        let key = (namespace.clone(), name.clone());
        if lock(&self.objects).contains_key(&key) {
            return Err(Error::AlreadyExists(describe::<K>(&namespace, &name)));
        }
        let mut value = serde_json::to_value(obj)?;
        with_status(&mut value, None);
        let mut created: K = serde_json::from_value(value)?;
        let version = self.next_version();
        let meta = created.meta_mut();
        meta.uid = Some(format!("uid-{}-{version}", self.kind.to_lowercase()));
        meta.resource_version = Some(version);
        meta.creation_timestamp = Some(Time(Utc::now()));
        meta.deletion_timestamp = None;
        lock(&self.objects).insert(key, created.clone());
        self.record(StoreOp::Create {
            kind: self.kind.clone(),
            name,
        });
        Ok(created)
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_location(obj)?;
        self.check_write(&name)?;
        let key = (namespace.clone(), name.clone());
        let mut objects = lock(&self.objects);
        let Some(stored) = objects.get(&key) else {
            return Err(Error::NotFound(describe::<K>(&namespace, &name)));
        };
        if obj.resource_version().is_some() && obj.resource_version() != stored.resource_version() {
            return Err(Error::Conflict(describe::<K>(&namespace, &name)));
        }
        let stored_status = serde_json::to_value(stored)?.get("status").cloned();
        let mut value = serde_json::to_value(obj)?;
        with_status(&mut value, stored_status);
        let mut replaced: K = serde_json::from_value(value)?;
        let meta = replaced.meta_mut();
        meta.uid = stored.meta().uid.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp.clone();
        meta.deletion_timestamp = stored.meta().deletion_timestamp.clone();
        meta.resource_version = Some(self.next_version());
        let gone = replaced.meta().deletion_timestamp.is_some() && replaced.finalizers().is_empty();
        if gone {
            objects.remove(&key);
        } else {
            objects.insert(key, replaced.clone());
        }
        drop(objects);
        self.record(StoreOp::Replace {
            kind: self.kind.clone(),
            name: name.clone(),
        });
        if gone {
            self.record(StoreOp::Remove {
                kind: self.kind.clone(),
                name,
            });
        }
        Ok(replaced)
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_location(obj)?;
        self.check_write(&name)?;
        let key = (namespace.clone(), name.clone());
        let mut objects = lock(&self.objects);
        let Some(stored) = objects.get(&key) else {
            return Err(Error::NotFound(describe::<K>(&namespace, &name)));
        };
        if obj.resource_version().is_some() && obj.resource_version() != stored.resource_version() {
            return Err(Error::Conflict(describe::<K>(&namespace, &name)));
        }
        let status = serde_json::to_value(obj)?.get("status").cloned();
        let mut value = serde_json::to_value(stored)?;
        with_status(&mut value, status);
        let mut updated: K = serde_json::from_value(value)?;
        updated.meta_mut().resource_version = Some(self.next_version());
        objects.insert(key, updated.clone());
        drop(objects);
        self.record(StoreOp::ReplaceStatus {
            kind: self.kind.clone(),
            name,
        });
        Ok(updated)
    }
}
