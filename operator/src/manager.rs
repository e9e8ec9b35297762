use crate::{nova, novaapi, novacell, Metrics};
use chrono::{DateTime, Utc};
use common::{
    handlebarshandler::ConfigRenderer,
    keystone::{KeystoneAPI, KeystoneEndpoint, KeystoneService},
    mariadb::MariaDBDatabase,
    nova::Nova,
    novaapi::NovaAPI,
    novacell::NovaCell,
    rabbitmq::TransportURL,
    store::KubeStore,
    ObjectStore, OperatorConfig,
};
use futures::{future::BoxFuture, FutureExt, StreamExt};
use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{ConfigMap, Secret, Service},
};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::Controller,
        events::Reporter,
        watcher::Config,
    },
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Access to every kind the controllers read or write
#[derive(Clone)]
pub struct Stores {
    pub novas: Arc<dyn ObjectStore<Nova>>,
    pub cells: Arc<dyn ObjectStore<NovaCell>>,
    pub apis: Arc<dyn ObjectStore<NovaAPI>>,
    pub databases: Arc<dyn ObjectStore<MariaDBDatabase>>,
    pub transports: Arc<dyn ObjectStore<TransportURL>>,
    pub keystone_services: Arc<dyn ObjectStore<KeystoneService>>,
    pub keystone_apis: Arc<dyn ObjectStore<KeystoneAPI>>,
    pub keystone_endpoints: Arc<dyn ObjectStore<KeystoneEndpoint>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub stateful_sets: Arc<dyn ObjectStore<StatefulSet>>,
    pub services: Arc<dyn ObjectStore<Service>>,
}

impl Stores {
    #[must_use]
    pub fn kube(client: &Client, config: &OperatorConfig) -> Self {
        Self {
            novas: Arc::new(KubeStore::new(client.clone(), config)),
            cells: Arc::new(KubeStore::new(client.clone(), config)),
            apis: Arc::new(KubeStore::new(client.clone(), config)),
            databases: Arc::new(KubeStore::new(client.clone(), config)),
            transports: Arc::new(KubeStore::new(client.clone(), config)),
            keystone_services: Arc::new(KubeStore::new(client.clone(), config)),
            keystone_apis: Arc::new(KubeStore::new(client.clone(), config)),
            keystone_endpoints: Arc::new(KubeStore::new(client.clone(), config)),
            secrets: Arc::new(KubeStore::new(client.clone(), config)),
            config_maps: Arc::new(KubeStore::new(client.clone(), config)),
            stateful_sets: Arc::new(KubeStore::new(client.clone(), config)),
            services: Arc::new(KubeStore::new(client.clone(), config)),
        }
    }
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Cluster access
    pub stores: Stores,
    /// Operator settings
    pub config: Arc<OperatorConfig>,
    /// Service configuration templates
    pub renderer: ConfigRenderer,
    /// Client used to record events, absent when running without a cluster
    pub client: Option<Client>,
    /// Identity of the operator on the events it records
    pub reporter: Reporter,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    #[must_use]
    pub fn new(stores: Stores, config: OperatorConfig, renderer: ConfigRenderer, client: Option<Client>) -> Self {
        let diagnostics = Diagnostics::new(&config);
        Self {
            stores,
            reporter: diagnostics.reporter.clone(),
            diagnostics: Arc::new(RwLock::new(diagnostics)),
            config: Arc::new(config),
            renderer,
            client,
            metrics: Metrics::default(),
        }
    }

    pub async fn touch(&self) {
        self.diagnostics.write().await.last_event = Utc::now();
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Diagnostics {
    fn new(config: &OperatorConfig) -> Self {
        Self {
            last_event: Utc::now(),
            reporter: Reporter {
                controller: config.reporter.clone(),
                instance: config.reporter_instance.clone(),
            },
        }
    }
}

/// Data owned by the Manager
#[derive(Clone)]
pub struct Manager {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Metrics,
}

/// Manager that owns a Controller for Nova, NovaCell and NovaAPI
impl Manager {
    /// Lifecycle initialization interface for app
    ///
    /// This returns a `Manager` that drives the `Controller`s + their futures to be awaited
    /// It is up to `main` to wait for the controller streams.
    pub async fn new(
        config: OperatorConfig,
    ) -> (Self, BoxFuture<'static, ()>, BoxFuture<'static, ()>, BoxFuture<'static, ()>) {
        let client = Client::try_default().await.expect("create client");
        let stores = Stores::kube(&client, &config);
        let renderer = ConfigRenderer::new().expect("valid service configuration templates");
        let context = Arc::new(Context::new(stores, config, renderer, Some(client.clone())));
        let manager = Manager {
            diagnostics: context.diagnostics.clone(),
            metrics: context.metrics.clone(),
        };

        let novas = Api::<Nova>::all(client.clone());
        let cells = Api::<NovaCell>::all(client.clone());
        let apis = Api::<NovaAPI>::all(client.clone());
        // Ensure CRD is installed before loop-watching
        let _r = novas
            .list(&ListParams::default().limit(1))
            .await
            .expect("is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");
        let _r = cells
            .list(&ListParams::default().limit(1))
            .await
            .expect("is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");
        let _r = apis
            .list(&ListParams::default().limit(1))
            .await
            .expect("is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");

        // All good. Start controllers and return their futures.
        let controller_nova = Controller::new(novas, Config::default().any_semantic())
            .owns(cells.clone(), Config::default())
            .owns(apis.clone(), Config::default())
            .owns(Api::<MariaDBDatabase>::all(client.clone()), Config::default())
            .owns(Api::<TransportURL>::all(client.clone()), Config::default())
            .owns(Api::<KeystoneService>::all(client.clone()), Config::default())
            .shutdown_on_signal()
            .run(nova::reconcile, nova::error_policy, context.clone())
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        let controller_cell = Controller::new(cells, Config::default().any_semantic())
            .owns(Api::<ConfigMap>::all(client.clone()), Config::default())
            .owns(Api::<StatefulSet>::all(client.clone()), Config::default())
            .shutdown_on_signal()
            .run(novacell::reconcile, novacell::error_policy, context.clone())
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        let controller_api = Controller::new(apis, Config::default().any_semantic())
            .owns(Api::<ConfigMap>::all(client.clone()), Config::default())
            .owns(Api::<StatefulSet>::all(client.clone()), Config::default())
            .owns(Api::<Service>::all(client.clone()), Config::default())
            .owns(Api::<KeystoneEndpoint>::all(client), Config::default())
            .shutdown_on_signal()
            .run(novaapi::reconcile, novaapi::error_policy, context)
            .filter_map(|x| async move { std::result::Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .boxed();

        (manager, controller_nova, controller_cell, controller_api)
    }

    /// Metrics getter
    #[must_use]
    pub fn metrics(&self) -> String {
        self.metrics.encode()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
