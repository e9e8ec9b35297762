use crate::{
    children::{remove_finalizer, OperationResult, Owner},
    deployment::{self, Workload},
    finalizer::{release_all, release_child, ReleaseStep},
    identity,
    manager::Context,
    status, telemetry, Error, Reconciler, Result,
};
use async_trait::async_trait;
use common::{
    conditions::{
        ConditionReason, ConditionType, Severity, DEPLOYMENT_READY_ERROR_MESSAGE, DEPLOYMENT_READY_MESSAGE,
        DEPLOYMENT_READY_RUNNING_MESSAGE, EXPOSE_SERVICE_READY_ERROR_MESSAGE, EXPOSE_SERVICE_READY_MESSAGE,
        INPUT_READY_ERROR_MESSAGE, INPUT_READY_MESSAGE, INPUT_READY_WAITING_MESSAGE,
        KEYSTONE_ENDPOINT_READY_ERROR_MESSAGE, SERVICE_CONFIG_READY_ERROR_MESSAGE, SERVICE_CONFIG_READY_MESSAGE,
    },
    handlebarshandler::{DatabaseParams, ServiceConfigParams, ServiceKind},
    hasheshandlers::{hash_of_input_hashes, secret_hash},
    novaapi::NovaAPI,
    HasConditions,
};
use futures::FutureExt;
use kube::{
    api::{Resource, ResourceExt},
    runtime::controller::Action,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, field, info, instrument, warn, Span};

const CONDITIONS: &[ConditionType] = &[
    ConditionType::INPUT_READY,
    ConditionType::SERVICE_CONFIG_READY,
    ConditionType::DEPLOYMENT_READY,
    ConditionType::EXPOSE_SERVICE_READY,
    ConditionType::KEYSTONE_ENDPOINT_READY,
];
const API: &str = "nova-api";
/// Interfaces the API is published on
pub const ENDPOINT_TYPES: [&str; 3] = ["admin", "internal", "public"];

#[instrument(skip(ctx, api), fields(trace_id))]
pub async fn reconcile(api: Arc<NovaAPI>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));
    let _mes = ctx.metrics.novaapi.count_and_measure(&trace_id);
    ctx.touch().await;
    let ns = api.namespace().unwrap_or_default(); // api is namespace scoped
    status::run(&ctx, ctx.stores.apis.as_ref(), &ns, &api.name_any()).await
}

#[must_use]
pub fn error_policy(api: Arc<NovaAPI>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        "reconcile failed for NovaAPI {}/{}: {error}",
        api.namespace().unwrap_or_default(),
        api.name_any()
    );
    ctx.metrics.novaapi.reconcile_failure(&api.name_any(), error);
    status::error_action(&ctx, error)
}

fn finalizer_token(ctx: &Context) -> String {
    ctx.config.finalizer(&NovaAPI::kind(&()))
}

/// URL of the API behind the Service of an interface
pub fn endpoint_url(service: &str, namespace: &str, port: i32) -> String {
    format!("http://{service}.{namespace}.svc:{port}/v2.1")
}

fn input_waiting(api: &mut NovaAPI, ctx: &Context, what: &str) -> Action {
    info!("NovaAPI {}/{} waits for {what}", api.namespace().unwrap_or_default(), api.name_any());
    api.conditions_mut().mark_false(
        ConditionType::INPUT_READY,
        ConditionReason::REQUESTED,
        Severity::Info,
        INPUT_READY_WAITING_MESSAGE.to_string(),
    );
    Action::requeue(ctx.config.requeue_timeout)
}

fn failed(api: &mut NovaAPI, type_: ConditionType, severity: Severity, prefix: &str, e: Error) -> Error {
    api.conditions_mut()
        .mark_false(type_, ConditionReason::ERROR, severity, format!("{prefix}: {e}"));
    e
}

/// Services and identity endpoints of the API, once its pods are ready
async fn expose(
    api: &mut NovaAPI,
    ctx: &Context,
    owner: &Owner,
    selector: &BTreeMap<String, String>,
) -> Result<Action> {
    let port = ctx.config.api_port;
    let mut endpoints = BTreeMap::new();
    for iface in ENDPOINT_TYPES {
        let name = format!("{}-{iface}", ctx.config.service_name);
        if let Err(e) = deployment::ensure_service(ctx, owner, &name, selector, iface, port).await {
            return Err(failed(
                api,
                ConditionType::EXPOSE_SERVICE_READY,
                Severity::Warning,
                EXPOSE_SERVICE_READY_ERROR_MESSAGE,
                e,
            ));
        }
        endpoints.insert(iface.to_string(), endpoint_url(&name, &owner.namespace, port));
    }
    api.status_mut().api_endpoints = endpoints.clone();
    api.conditions_mut()
        .mark_true(ConditionType::EXPOSE_SERVICE_READY, EXPOSE_SERVICE_READY_MESSAGE);

    let token = finalizer_token(ctx);
    let endpoint =
        match identity::ensure_keystone_endpoint(ctx, owner, &ctx.config.service_name, &endpoints, &token).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                return Err(failed(
                    api,
                    ConditionType::KEYSTONE_ENDPOINT_READY,
                    Severity::Warning,
                    KEYSTONE_ENDPOINT_READY_ERROR_MESSAGE,
                    e,
                ))
            }
        };
    if let Some(condition) = endpoint
        .conditions()
        .and_then(|c| c.mirror(ConditionType::KEYSTONE_ENDPOINT_READY))
    {
        api.conditions_mut().set(condition);
    }
    if endpoint.is_ready() {
        info!("Successfully reconciled NovaAPI {}/{}", owner.namespace, owner.name);
        Ok(Action::requeue(ctx.config.resync))
    } else {
        debug!("Waiting for KeystoneEndpoint {}/{}", owner.namespace, endpoint.name_any());
        Ok(Action::await_change())
    }
}

#[async_trait]
impl Reconciler for NovaAPI {
    fn condition_types() -> &'static [ConditionType] {
        CONDITIONS
    }

    fn finalizer(ctx: &Context) -> Option<String> {
        Some(finalizer_token(ctx))
    }

    async fn reconcile(&mut self, ctx: &Context) -> Result<Action> {
        let owner = Owner::of(&*self)?;
        let spec = self.spec.clone();
        let ns = owner.namespace.clone();
        let selectors = &spec.password_selectors;

        let Some(secret) = deployment::read_secret(ctx, &ns, &spec.secret).await? else {
            return Ok(input_waiting(self, ctx, &format!("Secret {}", spec.secret)));
        };
        let keys = [
            selectors.service.as_str(),
            selectors.api_database.as_str(),
            selectors.cell_database.as_str(),
        ];
        let passwords = match deployment::secret_values(&secret, &keys) {
            Ok(values) => values,
            Err(e) => {
                return Err(failed(self, ConditionType::INPUT_READY, Severity::Error, INPUT_READY_ERROR_MESSAGE, e))
            }
        };
        let transport_url = match deployment::transport_url(ctx, &ns, &spec.api_message_bus_secret_name).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                let what = format!("Secret {}", spec.api_message_bus_secret_name);
                return Ok(input_waiting(self, ctx, &what));
            }
            Err(e) => {
                return Err(failed(self, ConditionType::INPUT_READY, Severity::Error, INPUT_READY_ERROR_MESSAGE, e))
            }
        };
        let mut hashes = BTreeMap::new();
        hashes.insert(spec.secret.clone(), secret_hash(&secret)?);
        self.conditions_mut()
            .mark_true(ConditionType::INPUT_READY, INPUT_READY_MESSAGE);

        let password = |key: &str| passwords.get(key).cloned().unwrap_or_default();
        let template = &spec.service_template;
        let params = ServiceConfigParams {
            keystone_url: spec.keystone_auth_url.clone(),
            service_user: spec.service_user.clone(),
            service_password: password(&selectors.service),
            api_database: Some(DatabaseParams {
                name: spec.api_database_name.clone(),
                user: spec.api_database_user.clone(),
                password: password(&selectors.api_database),
                hostname: spec.api_database_hostname.clone(),
            }),
            cell_database: Some(DatabaseParams {
                name: spec.cell0_database_name.clone(),
                user: spec.cell0_database_user.clone(),
                password: password(&selectors.cell_database),
                hostname: spec.cell0_database_hostname.clone(),
            }),
            transport_url,
            region: spec.region.clone(),
            log_file: "/var/log/nova/nova-api.log".to_string(),
            api_port: ctx.config.api_port,
            workers: 1,
            debug: spec.debug.verbose,
        };
        let rendered = ctx.renderer.render(
            ServiceKind::Api,
            &params,
            &template.custom_service_config,
            &template.default_config_overwrite,
        );
        let config = match rendered {
            Ok(config) => config,
            Err(e) => {
                return Err(failed(
                    self,
                    ConditionType::SERVICE_CONFIG_READY,
                    Severity::Warning,
                    SERVICE_CONFIG_READY_ERROR_MESSAGE,
                    Error::StoreError(e),
                ))
            }
        };
        let labels = BTreeMap::from([(ctx.config.app_selector.clone(), API.to_string())]);
        let config_map = format!("{}-config-data", owner.name);
        if let Err(e) = deployment::ensure_config_map(ctx, &owner, &config_map, &labels, &config.files).await {
            return Err(failed(
                self,
                ConditionType::SERVICE_CONFIG_READY,
                Severity::Warning,
                SERVICE_CONFIG_READY_ERROR_MESSAGE,
                e,
            ));
        }
        hashes.insert(config_map.clone(), config.hash.clone());
        self.conditions_mut()
            .mark_true(ConditionType::SERVICE_CONFIG_READY, SERVICE_CONFIG_READY_MESSAGE);

        let input_hash = hash_of_input_hashes(&hashes)?;
        self.status_mut().hash.insert("input".to_string(), input_hash.clone());

        let image = template.container_image.clone().unwrap_or_else(|| ctx.config.api_image.clone());
        let workload = Workload {
            name: &owner.name,
            container: API,
            image: &image,
            replicas: template.replicas,
            labels: &labels,
            node_selector: &template.node_selector,
            config_map: &config_map,
            input_hash: &input_hash,
            port: Some(ctx.config.api_port),
            stop_service: spec.debug.stop_service,
        };
        let (sts, op) = match deployment::ensure_stateful_set(ctx, &owner, &workload).await {
            Ok(applied) => applied,
            Err(e) => {
                return Err(failed(
                    self,
                    ConditionType::DEPLOYMENT_READY,
                    Severity::Warning,
                    DEPLOYMENT_READY_ERROR_MESSAGE,
                    e,
                ))
            }
        };
        let ready = deployment::ready_replicas(&sts);
        self.status_mut().ready_count = ready;
        if op != OperationResult::Unchanged || ready == 0 {
            debug!("StatefulSet of NovaAPI {ns}/{} is rolling out", owner.name);
            self.conditions_mut().mark_false(
                ConditionType::DEPLOYMENT_READY,
                ConditionReason::REQUESTED,
                Severity::Info,
                DEPLOYMENT_READY_RUNNING_MESSAGE.to_string(),
            );
            return Ok(Action::await_change());
        }
        self.conditions_mut()
            .mark_true(ConditionType::DEPLOYMENT_READY, DEPLOYMENT_READY_MESSAGE);

        expose(self, ctx, &owner, &labels).await
    }

    async fn cleanup(&mut self, ctx: &Context) -> Result<Action> {
        let owner = Owner::of(&*self)?;
        let token = finalizer_token(ctx);
        let endpoint = ctx.config.service_name.clone();
        let steps = vec![ReleaseStep {
            kind: "KeystoneEndpoint",
            name: endpoint.clone(),
            run: release_child(ctx.stores.keystone_endpoints.as_ref(), &owner.namespace, &endpoint, &token).boxed(),
        }];
        release_all(ctx, &owner, steps).await?;
        if remove_finalizer(self.meta_mut(), &token) {
            info!("Removed finalizer {token} from NovaAPI {}/{}", owner.namespace, owner.name);
        }
        Ok(Action::await_change())
    }
}
