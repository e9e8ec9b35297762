use crate::{
    children::{add_finalizer, ensure, Owner},
    manager::Context,
    Error, Result,
};
use common::{
    keystone::{KeystoneEndpoint, KeystoneService},
    nova::NovaSpec,
};
use std::collections::BTreeMap;

/// Identity service coordinates handed down to the services
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityEndpoint {
    pub auth_url: String,
    pub region: String,
}

/// Register the compute service and its user, holding it with our finalizer
pub async fn ensure_keystone_service(
    ctx: &Context,
    owner: &Owner,
    spec: &NovaSpec,
    token: &str,
) -> Result<KeystoneService> {
    let config = &ctx.config;
    let (service, _) = ensure(
        ctx,
        ctx.stores.keystone_services.as_ref(),
        owner,
        &config.service_name,
        |svc: &mut KeystoneService| {
            svc.metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert(config.app_selector.clone(), config.service_name.clone());
            add_finalizer(&mut svc.metadata, token);
            svc.spec.service_type = config.service_type.clone();
            svc.spec.service_name = config.service_name.clone();
            svc.spec.service_description = "Nova Compute Service".to_string();
            svc.spec.enabled = true;
            svc.spec.service_user = spec.service_user.clone();
            svc.spec.secret = spec.secret.clone();
            svc.spec.password_selector = spec.password_selectors.service.clone();
        },
    )
    .await?;
    Ok(service)
}

/// Public URL and region of the named identity service
pub async fn public_endpoint(ctx: &Context, namespace: &str, instance: &str) -> Result<IdentityEndpoint> {
    let keystone = ctx
        .stores
        .keystone_apis
        .get(namespace, instance)
        .await?
        .ok_or_else(|| Error::MissingKeystoneAPI(format!("{namespace}/{instance}")))?;
    let auth_url = keystone
        .endpoint("public")
        .ok_or_else(|| Error::MissingKeystoneEndpoint(format!("{namespace}/{instance}")))?;
    Ok(IdentityEndpoint {
        auth_url: auth_url.to_string(),
        region: keystone.region().to_string(),
    })
}

/// Register the endpoints of the service, holding them with our finalizer
pub async fn ensure_keystone_endpoint(
    ctx: &Context,
    owner: &Owner,
    name: &str,
    endpoints: &BTreeMap<String, String>,
    token: &str,
) -> Result<KeystoneEndpoint> {
    let config = &ctx.config;
    let (endpoint, _) = ensure(
        ctx,
        ctx.stores.keystone_endpoints.as_ref(),
        owner,
        name,
        |ep: &mut KeystoneEndpoint| {
            ep.metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert(config.app_selector.clone(), config.service_name.clone());
            add_finalizer(&mut ep.metadata, token);
            ep.spec.service_name = config.service_name.clone();
            ep.spec.endpoints = endpoints.clone();
        },
    )
    .await?;
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCluster, NAMESPACE};
    use kube::ResourceExt;

    #[tokio::test]
    async fn test_keystone_service_holds_finalizer() {
        let cluster = MemoryCluster::new();
        let ctx = cluster.context();
        let owner = cluster.nova_owner("nova");
        let nova = cluster.nova(&[("cell0", false)]);
        let svc = ensure_keystone_service(&ctx, &owner, &nova.spec, "openstack.org/nova")
            .await
            .unwrap();
        assert_eq!(svc.finalizers(), ["openstack.org/nova".to_string()].as_slice());
        assert_eq!(svc.spec.service_type, "compute");
        assert_eq!(svc.spec.password_selector, "NovaPassword");
        assert_eq!(svc.labels()["service"], "nova");
    }

    #[tokio::test]
    async fn test_public_endpoint_resolution() {
        let cluster = MemoryCluster::new();
        let ctx = cluster.context();
        let err = public_endpoint(&ctx, NAMESPACE, "keystone").await.unwrap_err();
        assert!(matches!(err, Error::MissingKeystoneAPI(_)));

        cluster.keystone_apis.insert(cluster.keystone_api(""));
        let err = public_endpoint(&ctx, NAMESPACE, "keystone").await.unwrap_err();
        assert!(matches!(err, Error::MissingKeystoneEndpoint(_)));

        cluster.keystone_apis.insert(cluster.keystone_api("http://keystone-public.openstack.svc:5000"));
        let endpoint = public_endpoint(&ctx, NAMESPACE, "keystone").await.unwrap();
        assert_eq!(endpoint.auth_url, "http://keystone-public.openstack.svc:5000");
        assert_eq!(endpoint.region, "regionOne");
    }
}
