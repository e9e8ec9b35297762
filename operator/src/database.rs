use crate::{
    children::{ensure, OperationResult, Owner},
    gate::{DependencyMessages, ResourceStatus},
    manager::Context,
};
use common::{
    conditions::{DB_READY_ERROR_MESSAGE, DB_READY_MESSAGE, DB_READY_RUNNING_MESSAGE},
    mariadb::{MariaDBDatabase, DATABASE_INSTANCE_LABEL},
};
use tracing::{debug, warn};

pub const DATABASE: DependencyMessages = DependencyMessages {
    ready: DB_READY_MESSAGE,
    running: DB_READY_RUNNING_MESSAGE,
    error: DB_READY_ERROR_MESSAGE,
};

/// A database to request from a MariaDB instance
pub struct DatabaseRequest<'a> {
    /// Name of the MariaDBDatabase object
    pub name: &'a str,
    /// Name of the database in the server
    pub database_name: &'a str,
    /// MariaDB instance hosting the database
    pub instance: &'a str,
    /// Secret with the password of the database user
    pub secret: &'a str,
}

/// Observed state of a requested database
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseState {
    pub status: ResourceStatus,
    pub hostname: Option<String>,
}

impl DatabaseState {
    fn creating() -> Self {
        Self {
            status: ResourceStatus::Creating,
            hostname: None,
        }
    }
}

/// Request a database and report its state, failures are part of the state
pub async fn ensure_database(ctx: &Context, owner: &Owner, request: &DatabaseRequest<'_>) -> DatabaseState {
    let applied = ensure(ctx, ctx.stores.databases.as_ref(), owner, request.name, |db: &mut MariaDBDatabase| {
        db.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(DATABASE_INSTANCE_LABEL.to_string(), request.instance.to_string());
        db.spec.name = request.database_name.to_string();
        db.spec.secret = request.secret.to_string();
    })
    .await;

    match applied {
        Err(e) => {
            warn!("Failed to apply MariaDBDatabase {}/{}: {e}", owner.namespace, request.name);
            DatabaseState {
                status: ResourceStatus::Failed(e.to_string()),
                hostname: None,
            }
        }
        Ok((_, OperationResult::Created)) => DatabaseState::creating(),
        Ok((db, _)) => {
            if let Some(hostname) = db.ready_hostname() {
                DatabaseState {
                    status: ResourceStatus::Completed,
                    hostname: Some(hostname.to_string()),
                }
            } else if let Some(message) = db.failure() {
                DatabaseState {
                    status: ResourceStatus::Failed(message.to_string()),
                    hostname: None,
                }
            } else {
                debug!("MariaDBDatabase {}/{} is being created", owner.namespace, request.name);
                DatabaseState::creating()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCluster, NAMESPACE};
    use kube::ResourceExt;

    fn request() -> DatabaseRequest<'static> {
        DatabaseRequest {
            name: "nova-api",
            database_name: "nova_api",
            instance: "openstack",
            secret: "osp-secret",
        }
    }

    #[tokio::test]
    async fn test_database_lifecycle() {
        let cluster = MemoryCluster::new();
        let ctx = cluster.context();
        let owner = cluster.nova_owner("nova");

        let state = ensure_database(&ctx, &owner, &request()).await;
        assert_eq!(state.status, ResourceStatus::Creating);
        let db = cluster.databases.fetch(NAMESPACE, "nova-api").unwrap();
        assert_eq!(db.labels()[DATABASE_INSTANCE_LABEL], "openstack");
        assert_eq!(db.spec.name, "nova_api");

        assert_eq!(ensure_database(&ctx, &owner, &request()).await.status, ResourceStatus::Creating);
        cluster.complete_database("nova-api");
        let state = ensure_database(&ctx, &owner, &request()).await;
        assert_eq!(state.status, ResourceStatus::Completed);
        assert_eq!(state.hostname.as_deref(), Some("openstack.openstack.svc"));
    }

    #[tokio::test]
    async fn test_database_failures() {
        let cluster = MemoryCluster::new();
        let ctx = cluster.context();
        let owner = cluster.nova_owner("nova");

        cluster.databases.fail_writes_for("nova-api", "quota exceeded");
        let state = ensure_database(&ctx, &owner, &request()).await;
        assert!(matches!(state.status, ResourceStatus::Failed(e) if e.contains("quota exceeded")));

        cluster.databases.clear_failures();
        ensure_database(&ctx, &owner, &request()).await;
        cluster.fail_database("nova-api", "access denied");
        let state = ensure_database(&ctx, &owner, &request()).await;
        assert_eq!(state.status, ResourceStatus::Failed("access denied".to_string()));
    }
}
