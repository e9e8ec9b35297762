use crate::{
    aggregate::{aggregate, Outcome, CELLS, CELL_DATABASES, CELL_MESSAGE_BUSES},
    children::{ensure, remove_finalizer, OperationResult, Owner},
    database::{ensure_database, DatabaseRequest, DatabaseState, DATABASE},
    events,
    finalizer::{release_all, release_child, ReleaseStep},
    gate::{DependencyGate, Gate, GateUnit},
    identity::{self, IdentityEndpoint},
    manager::Context,
    messagebus::{ensure_transport, MessageBusState, MESSAGE_BUS},
    status, telemetry, Error, Reconciler, Result,
};
use async_trait::async_trait;
use common::{
    conditions::{
        Condition, ConditionReason, ConditionType, Severity, KEYSTONE_SERVICE_READY_ERROR_MESSAGE,
        NOVA_API_READY_ERROR_MESSAGE,
    },
    keystone::KeystoneService,
    nova::{Nova, NovaSpec},
    novaapi::{NovaAPI, NovaAPISpec},
    novacell::{NovaCell, NovaCellSpec, NovaCellTemplate},
    record_child, ChildRef, HasConditions, OperatorConfig, PasswordSelector,
};
use futures::FutureExt;
use kube::{
    api::{Resource, ResourceExt},
    runtime::controller::Action,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, field, info, instrument, warn, Span};

/// Database of the API tier, shared by the cells with API access
const API_DATABASE_NAME: &str = "nova_api";
const API_TRANSPORT_NAME: &str = "nova-api-transport";

const CONDITIONS: &[ConditionType] = &[
    ConditionType::KEYSTONE_SERVICE_READY,
    ConditionType::NOVA_API_DB_READY,
    ConditionType::NOVA_API_MQ_READY,
    ConditionType::NOVA_ALL_CELLS_DB_READY,
    ConditionType::NOVA_ALL_CELLS_MQ_READY,
    ConditionType::NOVA_ALL_CELLS_READY,
    ConditionType::NOVA_API_READY,
];

#[instrument(skip(ctx, nova), fields(trace_id))]
pub async fn reconcile(nova: Arc<Nova>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));
    let _mes = ctx.metrics.nova.count_and_measure(&trace_id);
    ctx.touch().await;
    let ns = nova.namespace().unwrap_or_default(); // nova is namespace scoped
    status::run(&ctx, ctx.stores.novas.as_ref(), &ns, &nova.name_any()).await
}

#[must_use]
pub fn error_policy(nova: Arc<Nova>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        "reconcile failed for Nova {}/{}: {error}",
        nova.namespace().unwrap_or_default(),
        nova.name_any()
    );
    ctx.metrics.nova.reconcile_failure(&nova.name_any(), error);
    status::error_action(&ctx, error)
}

/// What a cell depends on, as observed during this pass
struct CellDependencies {
    database: DatabaseState,
    message_bus: MessageBusState,
}

fn finalizer_token(ctx: &Context) -> String {
    ctx.config.finalizer(&Nova::kind(&()))
}

fn cell_resource_name(nova: &str, cell: &str) -> String {
    format!("{nova}-{cell}")
}

fn api_resource_name(nova: &str) -> String {
    format!("{nova}-api")
}

fn track(nova: &mut Nova, kind: &str, name: &str) {
    record_child(&mut nova.status_mut().children, ChildRef::new(kind, name));
}

fn set_condition(nova: &mut Nova, condition: Condition) {
    nova.conditions_mut().set(condition);
}

/// Register the service in the identity service and resolve its public URL
///
/// None while the registration is not ready yet
async fn ensure_identity(
    nova: &mut Nova,
    ctx: &Context,
    owner: &Owner,
    spec: &NovaSpec,
) -> Result<Option<IdentityEndpoint>> {
    let service = match identity::ensure_keystone_service(ctx, owner, spec, &finalizer_token(ctx)).await {
        Ok(service) => service,
        Err(e) => {
            nova.conditions_mut().mark_false(
                ConditionType::KEYSTONE_SERVICE_READY,
                ConditionReason::ERROR,
                Severity::Error,
                format!("{KEYSTONE_SERVICE_READY_ERROR_MESSAGE}: {e}"),
            );
            return Err(e);
        }
    };
    track(nova, &KeystoneService::kind(&()), &service.name_any());

    let mirrored = service
        .conditions()
        .and_then(|c| c.mirror(ConditionType::KEYSTONE_SERVICE_READY));
    if !mirrored.as_ref().is_some_and(Condition::is_true) {
        if let Some(condition) = mirrored {
            set_condition(nova, condition);
        }
        return Ok(None);
    }
    match identity::public_endpoint(ctx, &owner.namespace, &spec.keystone_instance).await {
        Ok(endpoint) => {
            set_condition(nova, mirrored.unwrap_or_else(|| {
                Condition::ok(ConditionType::KEYSTONE_SERVICE_READY, "KeystoneService ready")
            }));
            Ok(Some(endpoint))
        }
        Err(e) => {
            nova.conditions_mut().mark_false(
                ConditionType::KEYSTONE_SERVICE_READY,
                ConditionReason::ERROR,
                Severity::Error,
                format!("{KEYSTONE_SERVICE_READY_ERROR_MESSAGE}: {e}"),
            );
            Err(e)
        }
    }
}

/// Ensure the cell sub-instance and report its outcome
async fn ensure_cell(
    nova: &mut Nova,
    ctx: &Context,
    owner: &Owner,
    name: &str,
    spec: NovaCellSpec,
) -> (Outcome, bool) {
    let applied = ensure(ctx, ctx.stores.cells.as_ref(), owner, name, |cell: &mut NovaCell| {
        cell.spec = spec.clone();
    })
    .await;
    match applied {
        Err(e) => {
            warn!("Failed to apply NovaCell {}/{name}: {e}", owner.namespace);
            let ev = events::from_failure(&owner.kind, &owner.name, "NovaCell", &e.to_string());
            events::publish(ctx, owner, ev).await;
            (Outcome::Failed(e.to_string()), false)
        }
        Ok((cell, op)) => {
            track(nova, &NovaCell::kind(&()), name);
            if op != OperationResult::Created && cell.is_ready() {
                (Outcome::Ready, true)
            } else {
                (Outcome::Creating, false)
            }
        }
    }
}

async fn ensure_api(nova: &mut Nova, ctx: &Context, owner: &Owner, spec: NovaAPISpec) -> Result<Action> {
    let name = api_resource_name(&owner.name);
    let applied = ensure(ctx, ctx.stores.apis.as_ref(), owner, &name, |api: &mut NovaAPI| {
        api.spec = spec.clone();
    })
    .await;
    let api = match applied {
        Ok((api, _)) => api,
        Err(e) => {
            nova.conditions_mut().mark_false(
                ConditionType::NOVA_API_READY,
                ConditionReason::ERROR,
                Severity::Error,
                format!("{NOVA_API_READY_ERROR_MESSAGE}: {e}"),
            );
            return Err(e);
        }
    };
    track(nova, &NovaAPI::kind(&()), &name);
    nova.status_mut().api_service_ready_count = api.ready_count();
    if let Some(condition) = api.conditions().and_then(|c| c.mirror(ConditionType::NOVA_API_READY)) {
        set_condition(nova, condition);
    }
    if api.is_ready() {
        info!("Successfully reconciled Nova {}/{}", owner.namespace, owner.name);
        Ok(Action::requeue(ctx.config.resync))
    } else {
        debug!("Waiting for NovaAPI {}/{name} to become Ready", owner.namespace);
        Ok(Action::await_change())
    }
}

/// Full specification of a cell, from its template and the resolved dependencies
fn cell_spec(
    config: &OperatorConfig,
    nova: &NovaSpec,
    cell: &str,
    template: &NovaCellTemplate,
    deps: &CellDependencies,
    api_database: &DatabaseState,
    identity: &IdentityEndpoint,
) -> NovaCellSpec {
    let access = template.has_api_access;
    NovaCellSpec {
        cell_name: cell.to_string(),
        secret: nova.secret.clone(),
        cell_database_hostname: deps.database.hostname.clone().unwrap_or_default(),
        cell_database_name: config.cell_database_name(cell),
        cell_database_user: template.cell_database_user.clone(),
        cell_message_bus_secret_name: deps.message_bus.secret_name.clone().unwrap_or_default(),
        api_database_hostname: access.then(|| api_database.hostname.clone().unwrap_or_default()),
        api_database_name: access.then(|| API_DATABASE_NAME.to_string()),
        api_database_user: access.then(|| nova.api_database_user.clone()),
        keystone_auth_url: identity.auth_url.clone(),
        region: identity.region.clone(),
        service_user: nova.service_user.clone(),
        password_selectors: PasswordSelector {
            cell_database: template.password_selectors.database.clone(),
            ..nova.password_selectors.clone()
        },
        conductor_service_template: template.conductor_service_template.clone(),
        node_selector: template.node_selector.clone(),
        debug: nova.debug.clone(),
    }
}

#[allow(clippy::too_many_arguments)]
fn api_spec(
    config: &OperatorConfig,
    nova: &NovaSpec,
    primary: &NovaCellTemplate,
    primary_database: &DatabaseState,
    api_database: &DatabaseState,
    api_message_bus: &MessageBusState,
    identity: &IdentityEndpoint,
) -> NovaAPISpec {
    NovaAPISpec {
        secret: nova.secret.clone(),
        api_database_hostname: api_database.hostname.clone().unwrap_or_default(),
        api_database_name: API_DATABASE_NAME.to_string(),
        api_database_user: nova.api_database_user.clone(),
        cell0_database_hostname: primary_database.hostname.clone().unwrap_or_default(),
        cell0_database_name: config.cell_database_name(&config.primary_cell),
        cell0_database_user: primary.cell_database_user.clone(),
        api_message_bus_secret_name: api_message_bus.secret_name.clone().unwrap_or_default(),
        keystone_auth_url: identity.auth_url.clone(),
        region: identity.region.clone(),
        service_user: nova.service_user.clone(),
        password_selectors: PasswordSelector {
            cell_database: primary.password_selectors.database.clone(),
            ..nova.password_selectors.clone()
        },
        service_template: nova.api_service_template.clone(),
        debug: nova.debug.clone(),
    }
}

#[async_trait]
impl Reconciler for Nova {
    fn condition_types() -> &'static [ConditionType] {
        CONDITIONS
    }

    fn finalizer(ctx: &Context) -> Option<String> {
        Some(finalizer_token(ctx))
    }

    async fn reconcile(&mut self, ctx: &Context) -> Result<Action> {
        let config = ctx.config.clone();
        let owner = Owner::of(&*self)?;
        let spec = self.spec.clone();

        let Some(primary_template) = spec.cell_templates.get(&config.primary_cell) else {
            let err = Error::MissingPrimaryCell(config.primary_cell.clone());
            self.conditions_mut().mark_false(
                ConditionType::NOVA_ALL_CELLS_READY,
                ConditionReason::ERROR,
                Severity::Error,
                err.to_string(),
            );
            return Err(err);
        };

        let Some(identity) = ensure_identity(self, ctx, &owner, &spec).await? else {
            debug!("Waiting for the KeystoneService of Nova {}/{} to become Ready", owner.namespace, owner.name);
            return Ok(Action::await_change());
        };

        // The API database is reported on its own, whatever its state the cells move on
        let api_db_name = format!("{}-api", config.service_name);
        let api_database = ensure_database(ctx, &owner, &DatabaseRequest {
            name: &api_db_name,
            database_name: API_DATABASE_NAME,
            instance: &spec.api_database_instance,
            secret: &spec.secret,
        })
        .await;
        track(self, "MariaDBDatabase", &api_db_name);
        set_condition(self, api_database.status.condition(ConditionType::NOVA_API_DB_READY, &DATABASE));

        let mut cell_databases = BTreeMap::new();
        for (cell, template) in &spec.cell_templates {
            let name = format!("{}-{cell}", config.service_name);
            let database = ensure_database(ctx, &owner, &DatabaseRequest {
                name: &name,
                database_name: &config.cell_database_name(cell),
                instance: &template.cell_database_instance,
                secret: &spec.secret,
            })
            .await;
            track(self, "MariaDBDatabase", &name);
            cell_databases.insert(cell.clone(), database);
        }
        let outcomes: Vec<(String, Outcome)> = cell_databases
            .iter()
            .map(|(cell, db)| (cell.clone(), Outcome::from(&db.status)))
            .collect();
        let databases = aggregate(ConditionType::NOVA_ALL_CELLS_DB_READY, &CELL_DATABASES, &outcomes);
        set_condition(self, databases.condition);

        let api_message_bus = ensure_transport(ctx, &owner, API_TRANSPORT_NAME, &spec.api_message_bus_instance).await;
        track(self, "TransportURL", API_TRANSPORT_NAME);
        set_condition(self, api_message_bus.status.condition(ConditionType::NOVA_API_MQ_READY, &MESSAGE_BUS));

        let mut cells = BTreeMap::new();
        for (cell, template) in &spec.cell_templates {
            let Some(database) = cell_databases.remove(cell) else {
                continue;
            };
            // The primary cell shares the message bus of the API
            let message_bus = if config.is_primary_cell(cell) {
                api_message_bus.clone()
            } else {
                let name = format!("{cell}-transport");
                let state = ensure_transport(ctx, &owner, &name, &template.cell_message_bus_instance).await;
                track(self, "TransportURL", &name);
                state
            };
            cells.insert(cell.clone(), CellDependencies { database, message_bus });
        }
        let outcomes: Vec<(String, Outcome)> = cells
            .iter()
            .map(|(cell, deps)| (cell.clone(), Outcome::from(&deps.message_bus.status)))
            .collect();
        let message_buses = aggregate(ConditionType::NOVA_ALL_CELLS_MQ_READY, &CELL_MESSAGE_BUSES, &outcomes);
        set_condition(self, message_buses.condition);

        // The primary cell goes first so the others see its state from this pass
        let gate = DependencyGate::new(&config);
        let mut primary_ready = false;
        let mut outcomes = Vec::new();
        let ordered = spec
            .cell_templates
            .get_key_value(&config.primary_cell)
            .into_iter()
            .chain(spec.cell_templates.iter().filter(|(cell, _)| !config.is_primary_cell(cell)));
        for (cell, template) in ordered {
            let Some(deps) = cells.get(cell) else {
                continue;
            };
            // Cells reaching the API database also wait for it
            let database = if template.has_api_access && deps.database.status.is_completed() {
                &api_database.status
            } else {
                &deps.database.status
            };
            let unit = GateUnit {
                name: cell,
                has_api_access: template.has_api_access,
                database,
                message_bus: &deps.message_bus.status,
            };
            if let Gate::Skip(reason) = gate.can_proceed(&unit, primary_ready) {
                debug!("Skipping cell {cell} of Nova {}/{}: {reason}", owner.namespace, owner.name);
                outcomes.push((cell.clone(), Outcome::Skipped(reason)));
                continue;
            }
            let cell_spec = cell_spec(&config, &spec, cell, template, deps, &api_database, &identity);
            let name = cell_resource_name(&owner.name, cell);
            let (outcome, ready) = ensure_cell(self, ctx, &owner, &name, cell_spec).await;
            if config.is_primary_cell(cell) {
                primary_ready = ready;
            }
            outcomes.push((cell.clone(), outcome));
        }
        let cells_status = aggregate(ConditionType::NOVA_ALL_CELLS_READY, &CELLS, &outcomes);
        info!(
            "Cells of Nova {}/{}: failed {:?}, creating {:?}, waiting {:?}, ready {:?}",
            owner.namespace,
            owner.name,
            cells_status.failed,
            cells_status.creating,
            cells_status.skipped,
            cells_status.ready
        );
        set_condition(self, cells_status.condition);

        // The API tier registers in the primary cell
        if !primary_ready || !api_database.status.is_completed() || !api_message_bus.status.is_completed() {
            debug!(
                "Waiting for cell {} of Nova {}/{} to become Ready",
                config.primary_cell, owner.namespace, owner.name
            );
            return Ok(Action::await_change());
        }
        let Some(primary) = cells.get(&config.primary_cell) else {
            return Ok(Action::await_change());
        };
        let api_spec = api_spec(
            &config,
            &spec,
            primary_template,
            &primary.database,
            &api_database,
            &api_message_bus,
            &identity,
        );
        ensure_api(self, ctx, &owner, api_spec).await
    }

    async fn cleanup(&mut self, ctx: &Context) -> Result<Action> {
        let owner = Owner::of(&*self)?;
        let token = finalizer_token(ctx);
        let service = ctx.config.service_name.clone();
        let steps = vec![ReleaseStep {
            kind: "KeystoneService",
            name: service.clone(),
            run: release_child(ctx.stores.keystone_services.as_ref(), &owner.namespace, &service, &token).boxed(),
        }];
        release_all(ctx, &owner, steps).await?;
        if remove_finalizer(self.meta_mut(), &token) {
            info!("Removed finalizer {token} from Nova {}/{}", owner.namespace, owner.name);
        }
        Ok(Action::await_change())
    }
}
