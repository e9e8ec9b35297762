use crate::{children::add_finalizer, manager::Context, Error, Reconciler, Result};
use common::{store::describe, ObjectStore};
use kube::{runtime::controller::Action, Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// What the instance looked like when loaded, to write back only what changed
struct Observed {
    status: Option<Value>,
    finalizers: Vec<String>,
}

impl Observed {
    fn of<K: Resource + Serialize>(obj: &K) -> Result<Self> {
        Ok(Self {
            status: status_of(obj)?,
            finalizers: obj.finalizers().to_vec(),
        })
    }
}

fn status_of<K: Serialize>(obj: &K) -> Result<Option<Value>> {
    Ok(serde_json::to_value(obj)?.get("status").cloned())
}

/// Drive one pass over the named instance
///
/// The instance is loaded, its conditions seeded, then either cleaned up
/// (deletion requested), given its finalizer (first pass) or reconciled.
/// Ready is computed and the status persisted on every exit path, errors
/// of the pass included.
pub async fn run<K>(ctx: &Context, store: &dyn ObjectStore<K>, namespace: &str, name: &str) -> Result<Action>
where
    K: Reconciler + Resource<DynamicType = ()> + Clone + Serialize + Send + Sync + 'static,
{
    let Some(mut obj) = store.get(namespace, name).await? else {
        debug!("{} is gone, nothing to do", describe::<K>(namespace, name));
        return Ok(Action::await_change());
    };
    let observed = Observed::of(&obj)?;
    obj.conditions_mut().init(K::condition_types());

    let result = if obj.meta().deletion_timestamp.is_some() {
        obj.cleanup(ctx).await
    } else {
        match K::finalizer(ctx) {
            Some(token) if add_finalizer(obj.meta_mut(), &token) => {
                // The finalizer must be stored before any child holding our token exists
                info!("Added finalizer {token} to {}", describe::<K>(namespace, name));
                Ok(Action::await_change())
            }
            _ => obj.reconcile(ctx).await,
        }
    };

    let persisted = persist(store, &observed, obj).await;
    match (result, persisted) {
        (Err(e), Err(p)) => {
            warn!("Failed to persist the status of {}: {p}", describe::<K>(namespace, name));
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(p)) => Err(p),
        (Ok(action), Ok(())) => Ok(action),
    }
}

/// Compute Ready, then write the status and the finalizers when they changed
async fn persist<K>(store: &dyn ObjectStore<K>, observed: &Observed, mut obj: K) -> Result<()>
where
    K: Reconciler + Resource<DynamicType = ()> + Clone + Serialize + Send + Sync + 'static,
{
    obj.conditions_mut().compute_ready();
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    if status_of(&obj)? != observed.status {
        match store.replace_status(&obj).await {
            Ok(mut written) => {
                written.meta_mut().finalizers = obj.meta().finalizers.clone();
                obj = written;
            }
            Err(e) if e.is_not_found() => {
                debug!("{} vanished before its status was written", describe::<K>(&namespace, &name));
                return Ok(());
            }
            Err(e) => return Err(Error::StoreError(e)),
        }
    }

    if obj.finalizers() != observed.finalizers.as_slice() {
        match store.replace(&obj).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!("{} is already gone", describe::<K>(&namespace, &name));
            }
            Err(e) => return Err(Error::StoreError(e)),
        }
    }
    Ok(())
}

/// Requeue policy shared by the controllers
///
/// Configuration errors wait for the object to change, anything else is retried later
#[must_use]
pub fn error_action(ctx: &Context, error: &Error) -> Action {
    if error.is_configuration() {
        Action::await_change()
    } else {
        Action::requeue(ctx.config.error_requeue)
    }
}
