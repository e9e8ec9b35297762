use crate::{
    children::{ensure, OperationResult, Owner},
    manager::Context,
    Error, Result,
};
use common::rabbitmq::TRANSPORT_URL_KEY;
use k8s_openapi::{
    api::{
        apps::v1::{StatefulSet, StatefulSetSpec},
        core::v1::{
            ConfigMap, Container, ContainerPort, EnvVar, PodSpec, Secret, Service, ServicePort, ServiceSpec,
            Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;

/// Pod template annotation carrying the hash of every input of a workload
pub const INPUT_HASH_ANNOTATION: &str = "nova.openstack.org/input-hash";
const CONFIG_VOLUME: &str = "config-data";
const CONFIG_MOUNT: &str = "/var/lib/openstack/config";
const KOLLA_START: &str = "/usr/local/bin/kolla_start";

pub async fn read_secret(ctx: &Context, namespace: &str, name: &str) -> Result<Option<Secret>> {
    Ok(ctx.stores.secrets.get(namespace, name).await?)
}

/// Value of a Secret key, empty values count as missing
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .or_else(|| secret.string_data.as_ref().and_then(|d| d.get(key)).cloned())
        .filter(|v| !v.is_empty())
}

/// Values of the given keys, all of them are required
pub fn secret_values(secret: &Secret, keys: &[&str]) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();
    let mut missing = Vec::new();
    for key in keys {
        match secret_value(secret, key) {
            Some(value) => {
                values.insert((*key).to_string(), value);
            }
            None if !missing.contains(key) => missing.push(*key),
            None => {}
        }
    }
    if missing.is_empty() {
        Ok(values)
    } else {
        Err(Error::MissingSecretField(secret.name_any(), missing.join(", ")))
    }
}

/// Transport URL published by a TransportURL, None while its Secret is missing
pub async fn transport_url(ctx: &Context, namespace: &str, secret_name: &str) -> Result<Option<String>> {
    match read_secret(ctx, namespace, secret_name).await? {
        None => Ok(None),
        Some(secret) => {
            let mut values = secret_values(&secret, &[TRANSPORT_URL_KEY])?;
            Ok(values.remove(TRANSPORT_URL_KEY))
        }
    }
}

/// Store rendered configuration files
pub async fn ensure_config_map(
    ctx: &Context,
    owner: &Owner,
    name: &str,
    labels: &BTreeMap<String, String>,
    files: &BTreeMap<String, String>,
) -> Result<ConfigMap> {
    let (cm, _) = ensure(ctx, ctx.stores.config_maps.as_ref(), owner, name, |cm: &mut ConfigMap| {
        cm.metadata
            .labels
            .get_or_insert_with(Default::default)
            .extend(labels.clone());
        cm.data = Some(files.clone());
    })
    .await?;
    Ok(cm)
}

/// Everything a service StatefulSet is built from
#[derive(Clone, Debug)]
pub struct Workload<'a> {
    pub name: &'a str,
    pub container: &'a str,
    pub image: &'a str,
    pub replicas: i32,
    pub labels: &'a BTreeMap<String, String>,
    pub node_selector: &'a BTreeMap<String, String>,
    pub config_map: &'a str,
    pub input_hash: &'a str,
    pub port: Option<i32>,
    pub stop_service: bool,
}

impl Workload<'_> {
    fn command(&self) -> Vec<String> {
        if self.stop_service {
            vec!["/bin/sleep".to_string(), "infinity".to_string()]
        } else {
            vec!["/bin/bash".to_string(), "-c".to_string(), KOLLA_START.to_string()]
        }
    }

    fn env(&self) -> Vec<EnvVar> {
        vec![
            EnvVar {
                name: "KOLLA_CONFIG_STRATEGY".to_string(),
                value: Some("COPY_ALWAYS".to_string()),
                ..EnvVar::default()
            },
            EnvVar {
                name: "CONFIG_HASH".to_string(),
                value: Some(self.input_hash.to_string()),
                ..EnvVar::default()
            },
        ]
    }

    /// Set the fields we own on a StatefulSet, leaving the others to the cluster
    fn apply(&self, sts: &mut StatefulSet, volume: &Volume) {
        sts.metadata
            .labels
            .get_or_insert_with(Default::default)
            .extend(self.labels.clone());
        let spec = sts.spec.get_or_insert_with(StatefulSetSpec::default);
        spec.replicas = Some(self.replicas);
        spec.selector = LabelSelector {
            match_labels: Some(self.labels.clone()),
            ..LabelSelector::default()
        };
        let meta = spec.template.metadata.get_or_insert_with(Default::default);
        meta.labels.get_or_insert_with(Default::default).extend(self.labels.clone());
        meta.annotations
            .get_or_insert_with(Default::default)
            .insert(INPUT_HASH_ANNOTATION.to_string(), self.input_hash.to_string());

        let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
        pod.node_selector = (!self.node_selector.is_empty()).then(|| self.node_selector.clone());
        let volumes = pod.volumes.get_or_insert_with(Vec::new);
        volumes.retain(|v| v.name != volume.name);
        volumes.push(volume.clone());

        let found = pod.containers.iter().position(|c| c.name == self.container);
        let idx = match found {
            Some(idx) => idx,
            None => {
                pod.containers.push(Container {
                    name: self.container.to_string(),
                    ..Container::default()
                });
                pod.containers.len() - 1
            }
        };
        let container = &mut pod.containers[idx];
        container.image = Some(self.image.to_string());
        container.command = Some(self.command());
        container.env = Some(self.env());
        container.ports = self.port.map(|port| {
            vec![ContainerPort {
                container_port: port,
                name: Some("osapi".to_string()),
                protocol: Some("TCP".to_string()),
                ..ContainerPort::default()
            }]
        });
        container.volume_mounts = Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_MOUNT.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        }]);
    }
}

/// Converge the StatefulSet of a service, a changed input hash rolls its pods
pub async fn ensure_stateful_set(
    ctx: &Context,
    owner: &Owner,
    workload: &Workload<'_>,
) -> Result<(StatefulSet, OperationResult)> {
    let volume: Volume = serde_json::from_value(json!({
        "name": CONFIG_VOLUME,
        "configMap": {"name": workload.config_map, "defaultMode": 0o640}
    }))?;
    ensure(ctx, ctx.stores.stateful_sets.as_ref(), owner, workload.name, |sts: &mut StatefulSet| {
        workload.apply(sts, &volume);
    })
    .await
}

pub fn ready_replicas(sts: &StatefulSet) -> i32 {
    sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0)
}

/// Expose a service port to the pods matching the selector
pub async fn ensure_service(
    ctx: &Context,
    owner: &Owner,
    name: &str,
    selector: &BTreeMap<String, String>,
    endpoint: &str,
    port: i32,
) -> Result<Service> {
    let (svc, _) = ensure(ctx, ctx.stores.services.as_ref(), owner, name, |svc: &mut Service| {
        let labels = svc.metadata.labels.get_or_insert_with(Default::default);
        labels.extend(selector.clone());
        labels.insert("endpoint".to_string(), endpoint.to_string());
        let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
        spec.selector = Some(selector.clone());
        spec.type_ = Some("ClusterIP".to_string());
        spec.ports = Some(vec![ServicePort {
            name: Some(name.to_string()),
            port,
            protocol: Some("TCP".to_string()),
            target_port: Some(IntOrString::Int(port)),
            ..ServicePort::default()
        }]);
    })
    .await?;
    Ok(svc)
}
