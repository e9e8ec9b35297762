use crate::{
    children::{OperationResult, Owner},
    deployment::{self, Workload},
    manager::Context,
    status, telemetry, Error, Reconciler, Result,
};
use async_trait::async_trait;
use common::{
    conditions::{
        ConditionReason, ConditionType, Severity, DEPLOYMENT_READY_ERROR_MESSAGE, DEPLOYMENT_READY_MESSAGE,
        DEPLOYMENT_READY_RUNNING_MESSAGE, INPUT_READY_ERROR_MESSAGE, INPUT_READY_MESSAGE,
        INPUT_READY_WAITING_MESSAGE, SERVICE_CONFIG_READY_ERROR_MESSAGE, SERVICE_CONFIG_READY_MESSAGE,
    },
    handlebarshandler::{DatabaseParams, ServiceConfigParams, ServiceKind},
    hasheshandlers::{hash_of_input_hashes, secret_hash},
    novacell::NovaCell,
    HasConditions,
};
use kube::{api::ResourceExt, runtime::controller::Action};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, field, info, instrument, warn, Span};

const CONDITIONS: &[ConditionType] = &[
    ConditionType::INPUT_READY,
    ConditionType::SERVICE_CONFIG_READY,
    ConditionType::DEPLOYMENT_READY,
];
const CONDUCTOR: &str = "nova-conductor";

#[instrument(skip(ctx, cell), fields(trace_id))]
pub async fn reconcile(cell: Arc<NovaCell>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));
    let _mes = ctx.metrics.novacell.count_and_measure(&trace_id);
    ctx.touch().await;
    let ns = cell.namespace().unwrap_or_default(); // cell is namespace scoped
    status::run(&ctx, ctx.stores.cells.as_ref(), &ns, &cell.name_any()).await
}

#[must_use]
pub fn error_policy(cell: Arc<NovaCell>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        "reconcile failed for NovaCell {}/{}: {error}",
        cell.namespace().unwrap_or_default(),
        cell.name_any()
    );
    ctx.metrics.novacell.reconcile_failure(&cell.name_any(), error);
    status::error_action(&ctx, error)
}

fn input_waiting(cell: &mut NovaCell, ctx: &Context, what: &str) -> Action {
    info!("NovaCell {}/{} waits for {what}", cell.namespace().unwrap_or_default(), cell.name_any());
    cell.conditions_mut().mark_false(
        ConditionType::INPUT_READY,
        ConditionReason::REQUESTED,
        Severity::Info,
        INPUT_READY_WAITING_MESSAGE.to_string(),
    );
    Action::requeue(ctx.config.requeue_timeout)
}

fn input_failed(cell: &mut NovaCell, e: Error) -> Error {
    cell.conditions_mut().mark_false(
        ConditionType::INPUT_READY,
        ConditionReason::ERROR,
        Severity::Error,
        format!("{INPUT_READY_ERROR_MESSAGE}: {e}"),
    );
    e
}

fn config_failed(cell: &mut NovaCell, e: Error) -> Error {
    cell.conditions_mut().mark_false(
        ConditionType::SERVICE_CONFIG_READY,
        ConditionReason::ERROR,
        Severity::Warning,
        format!("{SERVICE_CONFIG_READY_ERROR_MESSAGE}: {e}"),
    );
    e
}

#[async_trait]
impl Reconciler for NovaCell {
    fn condition_types() -> &'static [ConditionType] {
        CONDITIONS
    }

    // Every child is garbage collected through its owner reference
    fn finalizer(_ctx: &Context) -> Option<String> {
        None
    }

    async fn reconcile(&mut self, ctx: &Context) -> Result<Action> {
        let owner = Owner::of(&*self)?;
        let spec = self.spec.clone();
        let ns = owner.namespace.clone();
        let selectors = &spec.password_selectors;

        let Some(secret) = deployment::read_secret(ctx, &ns, &spec.secret).await? else {
            return Ok(input_waiting(self, ctx, &format!("Secret {}", spec.secret)));
        };
        let mut keys = vec![selectors.service.as_str(), selectors.cell_database.as_str()];
        if spec.has_api_access() {
            keys.push(selectors.api_database.as_str());
        }
        let passwords = match deployment::secret_values(&secret, &keys) {
            Ok(values) => values,
            Err(e) => return Err(input_failed(self, e)),
        };
        let transport_url = match deployment::transport_url(ctx, &ns, &spec.cell_message_bus_secret_name).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                let what = format!("Secret {}", spec.cell_message_bus_secret_name);
                return Ok(input_waiting(self, ctx, &what));
            }
            Err(e) => return Err(input_failed(self, e)),
        };
        let mut hashes = BTreeMap::new();
        hashes.insert(spec.secret.clone(), secret_hash(&secret)?);
        self.conditions_mut()
            .mark_true(ConditionType::INPUT_READY, INPUT_READY_MESSAGE);

        let password = |key: &str| passwords.get(key).cloned().unwrap_or_default();
        let template = &spec.conductor_service_template;
        let params = ServiceConfigParams {
            keystone_url: spec.keystone_auth_url.clone(),
            service_user: spec.service_user.clone(),
            service_password: password(&selectors.service),
            api_database: spec.api_database_hostname.as_ref().map(|hostname| DatabaseParams {
                name: spec.api_database_name.clone().unwrap_or_default(),
                user: spec.api_database_user.clone().unwrap_or_default(),
                password: password(&selectors.api_database),
                hostname: hostname.clone(),
            }),
            cell_database: Some(DatabaseParams {
                name: spec.cell_database_name.clone(),
                user: spec.cell_database_user.clone(),
                password: password(&selectors.cell_database),
                hostname: spec.cell_database_hostname.clone(),
            }),
            transport_url,
            region: spec.region.clone(),
            log_file: "/var/log/nova/nova-conductor.log".to_string(),
            api_port: ctx.config.api_port,
            workers: 1,
            debug: spec.debug.verbose,
        };
        let rendered = ctx
            .renderer
            .render(
                ServiceKind::Conductor,
                &params,
                &template.custom_service_config,
                &template.default_config_overwrite,
            )
            .map_err(Error::StoreError);
        let config = match rendered {
            Ok(config) => config,
            Err(e) => return Err(config_failed(self, e)),
        };
        let labels = BTreeMap::from([
            (ctx.config.app_selector.clone(), CONDUCTOR.to_string()),
            ("cell".to_string(), spec.cell_name.clone()),
        ]);
        let config_map = format!("{}-conductor-config-data", owner.name);
        if let Err(e) = deployment::ensure_config_map(ctx, &owner, &config_map, &labels, &config.files).await {
            return Err(config_failed(self, e));
        }
        hashes.insert(config_map.clone(), config.hash.clone());
        self.conditions_mut()
            .mark_true(ConditionType::SERVICE_CONFIG_READY, SERVICE_CONFIG_READY_MESSAGE);

        let input_hash = hash_of_input_hashes(&hashes)?;
        self.status_mut().hash.insert("input".to_string(), input_hash.clone());

        let name = format!("{}-conductor", owner.name);
        let image = template.container_image.clone().unwrap_or_else(|| ctx.config.conductor_image.clone());
        let node_selector = if template.node_selector.is_empty() {
            &spec.node_selector
        } else {
            &template.node_selector
        };
        let workload = Workload {
            name: &name,
            container: CONDUCTOR,
            image: &image,
            replicas: template.replicas,
            labels: &labels,
            node_selector,
            config_map: &config_map,
            input_hash: &input_hash,
            port: None,
            stop_service: spec.debug.stop_service,
        };
        let (sts, op) = match deployment::ensure_stateful_set(ctx, &owner, &workload).await {
            Ok(applied) => applied,
            Err(e) => {
                self.conditions_mut().mark_false(
                    ConditionType::DEPLOYMENT_READY,
                    ConditionReason::ERROR,
                    Severity::Warning,
                    format!("{DEPLOYMENT_READY_ERROR_MESSAGE}: {e}"),
                );
                return Err(e);
            }
        };
        let ready = deployment::ready_replicas(&sts);
        self.status_mut().conductor_service_ready_count = ready;
        if op != OperationResult::Unchanged || ready == 0 {
            debug!("Conductor of NovaCell {ns}/{} is rolling out", owner.name);
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
        Ok(Action::requeue(ctx.config.resync))
    }

    async fn cleanup(&mut self, _ctx: &Context) -> Result<Action> {
        Ok(Action::await_change())
    }
}
