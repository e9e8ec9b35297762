//! In memory cluster for the controller tests
//!
//! Every store shares one journal so tests can assert on the order of writes.
//! The helpers play the part of the other controllers (database, message bus,
//! identity, workloads) by flipping the status of their objects.

use crate::{
    children::Owner,
    manager::{Context, Stores},
    nova, novaapi, novacell, Result,
};
use common::{
    conditions::{ConditionReason, ConditionStatus, ConditionType, Severity},
    handlebarshandler::ConfigRenderer,
    k8smock::{Journal, MemoryStore, StoreOp},
    keystone::{KeystoneAPI, KeystoneAPIStatus, KeystoneEndpoint, KeystoneService},
    mariadb::{MariaDBDatabase, MariaDBDatabaseStatus},
    nova::Nova,
    novaapi::NovaAPI,
    novacell::NovaCell,
    rabbitmq::{TransportURL, TransportURLStatus, TRANSPORT_URL_KEY},
    HasConditions, OperatorConfig,
};
use k8s_openapi::{
    api::{
        apps::v1::{StatefulSet, StatefulSetStatus},
        core::v1::{ConfigMap, Secret, Service},
    },
    ByteString,
};
use kube::{api::ObjectMeta, runtime::controller::Action, ResourceExt};
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, sync::Arc};

pub const NAMESPACE: &str = "openstack";
pub const SECRET: &str = "osp-secret";
pub const KEYSTONE_URL: &str = "http://keystone-public.openstack.svc:5000";
pub const DB_HOSTNAME: &str = "openstack.openstack.svc";

pub struct MemoryCluster {
    journal: Journal,
    pub novas: Arc<MemoryStore<Nova>>,
    pub cells: Arc<MemoryStore<NovaCell>>,
    pub apis: Arc<MemoryStore<NovaAPI>>,
    pub databases: Arc<MemoryStore<MariaDBDatabase>>,
    pub transports: Arc<MemoryStore<TransportURL>>,
    pub keystone_services: Arc<MemoryStore<KeystoneService>>,
    pub keystone_apis: Arc<MemoryStore<KeystoneAPI>>,
    pub keystone_endpoints: Arc<MemoryStore<KeystoneEndpoint>>,
    pub secrets: Arc<MemoryStore<Secret>>,
    pub config_maps: Arc<MemoryStore<ConfigMap>>,
    pub stateful_sets: Arc<MemoryStore<StatefulSet>>,
    pub services: Arc<MemoryStore<Service>>,
    ctx: Arc<Context>,
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..ObjectMeta::default()
    }
}

fn mark_ready<K: HasConditions>(obj: &mut K) {
    obj.conditions_mut().mark_true(ConditionType::READY, "Setup complete");
}

fn mark_failed<K: HasConditions>(obj: &mut K, message: &str) {
    obj.conditions_mut().mark_false(
        ConditionType::READY,
        ConditionReason::ERROR,
        Severity::Error,
        message.to_string(),
    );
}

fn has_failed<K: HasConditions>(obj: &K) -> bool {
    obj.conditions()
        .and_then(|c| c.get(&ConditionType::READY))
        .is_some_and(|c| c.status == ConditionStatus::False && c.severity == Some(Severity::Error))
}

fn transport_secret_name(transport: &str) -> String {
    format!("rabbitmq-transport-url-{transport}")
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::with_config(OperatorConfig::default())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let journal = Journal::default();
        let novas: Arc<MemoryStore<Nova>> = Arc::new(MemoryStore::new(journal.clone()));
        let cells: Arc<MemoryStore<NovaCell>> = Arc::new(MemoryStore::new(journal.clone()));
        let apis: Arc<MemoryStore<NovaAPI>> = Arc::new(MemoryStore::new(journal.clone()));
        let databases: Arc<MemoryStore<MariaDBDatabase>> = Arc::new(MemoryStore::new(journal.clone()));
        let transports: Arc<MemoryStore<TransportURL>> = Arc::new(MemoryStore::new(journal.clone()));
        let keystone_services: Arc<MemoryStore<KeystoneService>> = Arc::new(MemoryStore::new(journal.clone()));
        let keystone_apis: Arc<MemoryStore<KeystoneAPI>> = Arc::new(MemoryStore::new(journal.clone()));
        let keystone_endpoints: Arc<MemoryStore<KeystoneEndpoint>> = Arc::new(MemoryStore::new(journal.clone()));
        let secrets: Arc<MemoryStore<Secret>> = Arc::new(MemoryStore::new(journal.clone()));
        let config_maps: Arc<MemoryStore<ConfigMap>> = Arc::new(MemoryStore::new(journal.clone()));
        let stateful_sets: Arc<MemoryStore<StatefulSet>> = Arc::new(MemoryStore::new(journal.clone()));
        let services: Arc<MemoryStore<Service>> = Arc::new(MemoryStore::new(journal.clone()));
        let stores = Stores {
            novas: novas.clone(),
            cells: cells.clone(),
            apis: apis.clone(),
            databases: databases.clone(),
            transports: transports.clone(),
            keystone_services: keystone_services.clone(),
            keystone_apis: keystone_apis.clone(),
            keystone_endpoints: keystone_endpoints.clone(),
            secrets: secrets.clone(),
            config_maps: config_maps.clone(),
            stateful_sets: stateful_sets.clone(),
            services: services.clone(),
        };
        let renderer = ConfigRenderer::new().unwrap();
        let ctx = Arc::new(Context::new(stores, config, renderer, None));
        Self {
            journal,
            novas,
            cells,
            apis,
            databases,
            transports,
            keystone_services,
            keystone_apis,
            keystone_endpoints,
            secrets,
            config_maps,
            stateful_sets,
            services,
            ctx,
        }
    }

    pub fn context(&self) -> Arc<Context> {
        self.ctx.clone()
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_operations(&self) {
        self.journal.lock().unwrap().clear();
    }

    /// Writes other than status updates, the ones that touch children or finalizers
    pub fn writes(&self) -> Vec<StoreOp> {
        self.operations()
            .into_iter()
            .filter(|op| !matches!(op, StoreOp::ReplaceStatus { .. }))
            .collect()
    }

    pub fn nova_owner(&self, name: &str) -> Owner {
        let mut nova = self.nova(&[("cell0", false)]);
        nova.metadata.name = Some(name.to_string());
        nova.metadata.uid = Some(format!("uid-{name}"));
        Owner::of(&nova).unwrap()
    }

    /// A Nova named "nova" with the given cells, as a user would write it
    pub fn nova(&self, cells: &[(&str, bool)]) -> Nova {
        let templates: Map<String, Value> = cells
            .iter()
            .map(|(cell, api_access)| {
                let template = json!({
                    "hasAPIAccess": api_access,
                    "cellMessageBusInstance": format!("rabbitmq-{cell}"),
                });
                ((*cell).to_string(), template)
            })
            .collect();
        serde_json::from_value(json!({
            "apiVersion": "nova.openstack.org/v1beta1",
            "kind": "Nova",
            "metadata": {"name": "nova", "namespace": NAMESPACE},
            "spec": {
                "secret": SECRET,
                "cellTemplates": templates,
            }
        }))
        .unwrap()
    }

    pub fn cell(&self, name: &str, cell_name: &str) -> NovaCell {
        serde_json::from_value(json!({
            "apiVersion": "nova.openstack.org/v1beta1",
            "kind": "NovaCell",
            "metadata": {"name": name, "namespace": NAMESPACE},
            "spec": {
                "cellName": cell_name,
                "secret": SECRET,
                "cellDatabaseHostname": DB_HOSTNAME,
                "cellDatabaseName": format!("nova_{cell_name}"),
                "cellMessageBusSecretName": transport_secret_name("nova-api-transport"),
                "keystoneAuthUrl": KEYSTONE_URL,
            }
        }))
        .unwrap()
    }

    pub fn api(&self, name: &str) -> NovaAPI {
        serde_json::from_value(json!({
            "apiVersion": "nova.openstack.org/v1beta1",
            "kind": "NovaAPI",
            "metadata": {"name": name, "namespace": NAMESPACE},
            "spec": {
                "secret": SECRET,
                "apiDatabaseHostname": DB_HOSTNAME,
                "apiDatabaseName": "nova_api",
                "cell0DatabaseHostname": DB_HOSTNAME,
                "cell0DatabaseName": "nova_cell0",
                "apiMessageBusSecretName": transport_secret_name("nova-api-transport"),
                "keystoneAuthUrl": KEYSTONE_URL,
            }
        }))
        .unwrap()
    }

    pub fn secret(name: &str, values: &[(&str, &str)]) -> Secret {
        let data = values
            .iter()
            .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
            .collect::<BTreeMap<_, _>>();
        Secret {
            metadata: meta(name),
            data: Some(data),
            ..Secret::default()
        }
    }

    /// The credentials Secret with every default password key
    pub fn service_secret() -> Secret {
        Self::secret(SECRET, &[
            ("NovaPassword", "service-password"),
            ("NovaAPIDatabasePassword", "api-db-password"),
            ("NovaCell0DatabasePassword", "cell-db-password"),
        ])
    }

    /// The identity service, with a public endpoint unless `url` is empty
    pub fn keystone_api(&self, url: &str) -> KeystoneAPI {
        let mut keystone = KeystoneAPI::new("keystone", Default::default());
        keystone.metadata.namespace = Some(NAMESPACE.to_string());
        let mut status = KeystoneAPIStatus::default();
        if !url.is_empty() {
            status.api_endpoints.insert("public".to_string(), url.to_string());
        }
        keystone.status = Some(status);
        keystone
    }

    /// Objects a Nova reads but does not create
    pub fn seed_inputs(&self) {
        self.secrets.insert(Self::service_secret());
        self.keystone_apis.insert(self.keystone_api(KEYSTONE_URL));
    }

    pub fn complete_database(&self, name: &str) {
        let found = self.databases.update_with(NAMESPACE, name, |db| {
            db.status = Some(MariaDBDatabaseStatus {
                completed: true,
                hostname: Some(DB_HOSTNAME.to_string()),
                ..MariaDBDatabaseStatus::default()
            });
            mark_ready(db);
        });
        assert!(found, "MariaDBDatabase {name} not found");
    }

    pub fn fail_database(&self, name: &str, message: &str) {
        let found = self.databases.update_with(NAMESPACE, name, |db| {
            db.status = Some(MariaDBDatabaseStatus::default());
            mark_failed(db, message);
        });
        assert!(found, "MariaDBDatabase {name} not found");
    }

    /// Mark a TransportURL ready and publish its Secret
    pub fn complete_transport(&self, name: &str) {
        let secret = transport_secret_name(name);
        let found = self.transports.update_with(NAMESPACE, name, |mq| {
            mq.status = Some(TransportURLStatus {
                secret_name: Some(secret.clone()),
                ..TransportURLStatus::default()
            });
            mark_ready(mq);
        });
        assert!(found, "TransportURL {name} not found");
        let url = format!("rabbit://{name}@rabbitmq.{NAMESPACE}.svc:5672");
        self.secrets.insert(Self::secret(&secret, &[(TRANSPORT_URL_KEY, &url)]));
    }

    pub fn fail_transport(&self, name: &str, message: &str) {
        let found = self.transports.update_with(NAMESPACE, name, |mq| {
            mq.status = Some(TransportURLStatus::default());
            mark_failed(mq, message);
        });
        assert!(found, "TransportURL {name} not found");
    }

    pub fn ready_keystone_service(&self, name: &str) {
        assert!(self.keystone_services.update_with(NAMESPACE, name, mark_ready));
    }

    pub fn ready_keystone_endpoint(&self, name: &str) {
        assert!(self.keystone_endpoints.update_with(NAMESPACE, name, mark_ready));
    }

    /// Report the cell ready, as its own controller would
    pub fn ready_cell(&self, name: &str) {
        assert!(self.cells.update_with(NAMESPACE, name, mark_ready));
    }

    pub fn ready_api(&self, name: &str, replicas: i32) {
        assert!(self.apis.update_with(NAMESPACE, name, |api| {
            api.status_mut().ready_count = replicas;
            mark_ready(api);
        }));
    }

    /// Report every replica of a StatefulSet ready
    pub fn roll_out(&self, name: &str) {
        assert!(self.stateful_sets.update_with(NAMESPACE, name, |sts| {
            let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            sts.status = Some(StatefulSetStatus {
                replicas,
                ready_replicas: Some(replicas),
                ..StatefulSetStatus::default()
            });
        }));
    }

    /// Let every collaborator finish its work, failed ones stay failed
    pub fn settle(&self) {
        for db in self.databases.list() {
            if !has_failed(&db) && db.ready_hostname().is_none() {
                self.complete_database(&db.name_any());
            }
        }
        for mq in self.transports.list() {
            if !has_failed(&mq) && mq.ready_secret().is_none() {
                self.complete_transport(&mq.name_any());
            }
        }
        for svc in self.keystone_services.list() {
            if !svc.is_ready() {
                self.ready_keystone_service(&svc.name_any());
            }
        }
        for ep in self.keystone_endpoints.list() {
            if !ep.is_ready() {
                self.ready_keystone_endpoint(&ep.name_any());
            }
        }
        for sts in self.stateful_sets.list() {
            if sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0) == 0 {
                self.roll_out(&sts.name_any());
            }
        }
    }

    pub async fn reconcile_nova(&self, name: &str) -> Result<Action> {
        let nova = self.novas.fetch(NAMESPACE, name).unwrap();
        nova::reconcile(Arc::new(nova), self.context()).await
    }

    pub async fn reconcile_cell(&self, name: &str) -> Result<Action> {
        let cell = self.cells.fetch(NAMESPACE, name).unwrap();
        novacell::reconcile(Arc::new(cell), self.context()).await
    }

    pub async fn reconcile_api(&self, name: &str) -> Result<Action> {
        let api = self.apis.fetch(NAMESPACE, name).unwrap();
        novaapi::reconcile(Arc::new(api), self.context()).await
    }

    /// Run every controller in turn until the named Nova is Ready, or give up
    pub async fn converge(&self, name: &str) -> Result<Action> {
        let mut action = Action::await_change();
        for _ in 0..20 {
            self.settle();
            action = self.reconcile_nova(name).await?;
            for cell in self.cells.list() {
                self.reconcile_cell(&cell.name_any()).await?;
            }
            for api in self.apis.list() {
                self.reconcile_api(&api.name_any()).await?;
            }
            if self.novas.fetch(NAMESPACE, name).is_some_and(|n| n.is_ready()) {
                break;
            }
        }
        Ok(action)
    }
}
